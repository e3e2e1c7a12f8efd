//! Mnemo - Multi-tenant personal memory service
//!
//! Stores free-form memories and structured entities per user, recalls them
//! via hybrid semantic + lexical search, and reconciles person-entities
//! with an external contact source.

pub mod embedding;
pub mod error;
pub mod ledger;
pub mod mcp;
pub mod memory;
pub mod ratelimit;
pub mod search;
pub mod storage;
pub mod sync;
pub mod types;

pub use memory::MemoryCore;
pub use error::{MnemoError, Result};
pub use storage::Storage;
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
