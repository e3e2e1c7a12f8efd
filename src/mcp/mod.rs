//! Tool-call surface for agent integration
//!
//! Protocol types and the dispatcher; transports live outside this crate.

pub mod protocol;
pub mod tools;

pub use protocol::{codes, ToolDefinition, ToolError, ToolRequest, ToolResponse};
pub use tools::{tool_definitions, ToolDispatcher, TOOL_DEFINITIONS};
