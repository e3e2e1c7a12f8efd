//! JSON-RPC tool-call protocol types
//!
//! The transport (stdio/HTTP framing) lives outside this crate; these are
//! the request/response/error shapes it exchanges with the tool dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MnemoError;

/// Standard JSON-RPC error codes used by the tool surface
pub mod codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    pub const UNAUTHENTICATED: i64 = -32001;
    pub const RATE_LIMITED: i64 = 429;
}

/// A tool-call request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// A tool-call response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
}

/// Structured error object: `{code, message, details?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolError {
    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: codes::METHOD_NOT_FOUND,
            message: format!("unknown tool: {}", method),
            details: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: codes::INVALID_PARAMS,
            message: message.into(),
            details: None,
        }
    }
}

impl From<MnemoError> for ToolError {
    fn from(err: MnemoError) -> Self {
        let details = err
            .retry_after()
            .map(|secs| serde_json::json!({ "retryAfter": secs }));
        Self {
            code: err.code(),
            message: err.to_string(),
            details,
        }
    }
}

impl ToolResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: ToolError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A tool definition advertised to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let error: ToolError = MnemoError::RateLimited(30).into();
        assert_eq!(error.code, codes::RATE_LIMITED);
        assert_eq!(error.details, Some(serde_json::json!({"retryAfter": 30})));
    }

    #[test]
    fn test_request_deserialization() {
        let request: ToolRequest = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"method":"store_memory","params":{"title":"t"}}"#,
        )
        .unwrap();
        assert_eq!(request.method, "store_memory");
        assert_eq!(request.params["title"], "t");

        // params default to null when omitted
        let request: ToolRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":2,"method":"get_statistics"}"#).unwrap();
        assert!(request.params.is_null());
    }

    #[test]
    fn test_response_serialization() {
        let response = ToolResponse::success(
            Some(serde_json::json!(1)),
            serde_json::json!({"memoryId": "m-1"}),
        );
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"result\""));
        assert!(!json.contains("\"error\""));

        let response = ToolResponse::failure(None, ToolError::method_not_found("bogus"));
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("-32601"));
    }
}
