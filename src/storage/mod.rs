//! Storage engine for Mnemo
//!
//! The only component that knows the on-disk schema. Every operation is
//! scoped by `user_id`; unscoped calls are refused with `InvalidArgument`.

mod alias;
mod connection;
mod migrations;

pub mod entity_queries;
pub mod interaction_queries;
pub mod queries;
pub mod usage_queries;
pub mod users;

pub use alias::canonicalize_memory_fields;
pub use connection::{ensure_user_scope, Storage};
pub use migrations::SCHEMA_VERSION;
