//! Tool definitions and dispatch
//!
//! Maps the agent-facing tool surface onto Memory Core operations. The
//! transport hands over a tool name, JSON arguments and an identity already
//! resolved by the identity provider; everything below is tenant-scoped by
//! that identity.

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::protocol::{ToolDefinition, ToolError};
use crate::memory::MemoryCore;
use crate::ratelimit::RateLimiter;
use crate::types::{
    AuthContext, CreateEntityInput, CreateMemoryInput, EntityPatch, EntityType, MemoryPatch,
    MemoryType, RankStrategy, RateLimitConfig, SearchOptions,
};

/// All tool definitions: (name, description, JSON schema)
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "store_memory",
        "Store a new memory for the authenticated user",
        r#"{
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "content": {"type": "string"},
                "type": {"type": "string", "enum": ["system", "learned", "memory", "biographical", "professional", "personal", "technical", "project", "interaction", "preference", "semantic"], "default": "memory"},
                "importance": {"type": "number", "description": "1-4, or legacy 0-1 float"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "entity_ids": {"type": "array", "items": {"type": "string"}},
                "metadata": {"type": "object"}
            },
            "required": ["title", "content"]
        }"#,
    ),
    (
        "recall_memories",
        "Search memories with hybrid semantic + lexical retrieval. Supports field:value metadata queries.",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "default": 10},
                "threshold": {"type": "number", "description": "Similarity floor, 0 disables"},
                "strategy": {"type": "string", "enum": ["similarity", "recency", "importance", "frequency", "composite"]},
                "memory_types": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "memory_add",
        "Alias for store_memory",
        r#"{
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "content": {"type": "string"},
                "type": {"type": "string", "default": "memory"},
                "importance": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "entity_ids": {"type": "array", "items": {"type": "string"}},
                "metadata": {"type": "object"}
            },
            "required": ["title", "content"]
        }"#,
    ),
    (
        "memory_search",
        "Alias for recall_memories",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "default": 10},
                "threshold": {"type": "number"},
                "strategy": {"type": "string", "enum": ["similarity", "recency", "importance", "frequency", "composite"]},
                "memory_types": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "get_memory",
        "Retrieve a memory by id",
        r#"{
            "type": "object",
            "properties": {
                "memoryId": {"type": "string"}
            },
            "required": ["memoryId"]
        }"#,
    ),
    (
        "update_memory",
        "Update an existing memory; text changes regenerate its embedding",
        r#"{
            "type": "object",
            "properties": {
                "memoryId": {"type": "string"},
                "patch": {"type": "object"}
            },
            "required": ["memoryId", "patch"]
        }"#,
    ),
    (
        "delete_memory",
        "Delete a memory",
        r#"{
            "type": "object",
            "properties": {
                "memoryId": {"type": "string"}
            },
            "required": ["memoryId"]
        }"#,
    ),
    (
        "entity_create",
        "Create an entity (person, organization, project, ...)",
        r#"{
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "type": {"type": "string", "enum": ["person", "organization", "project", "concept", "location", "event"], "default": "person"},
                "description": {"type": "string"},
                "company": {"type": "string"},
                "title": {"type": "string"},
                "email": {"type": "string"},
                "phone": {"type": "string"},
                "website": {"type": "string"},
                "importance": {"type": "number"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "notes": {"type": "string"},
                "metadata": {"type": "object"}
            },
            "required": ["name"]
        }"#,
    ),
    (
        "entity_search",
        "Search entities by name, company, email or notes",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "default": 10}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "entity_update",
        "Update an existing entity",
        r#"{
            "type": "object",
            "properties": {
                "entityId": {"type": "string"},
                "patch": {"type": "object"}
            },
            "required": ["entityId", "patch"]
        }"#,
    ),
    (
        "unified_search",
        "Search memories, entities and interactions together",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer", "default": 10},
                "threshold": {"type": "number"},
                "memory_types": {"type": "array", "items": {"type": "string"}},
                "entity_types": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "get_statistics",
        "Per-user record counts and vector-search health",
        r#"{"type": "object", "properties": {}}"#,
    ),
    (
        "get_recent_interactions",
        "Most recent conversation log entries",
        r#"{
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "default": 20}
            }
        }"#,
    ),
    (
        "get_daily_costs",
        "Per-provider cost report for one day (default today)",
        r#"{
            "type": "object",
            "properties": {
                "date": {"type": "string", "description": "YYYY-MM-DD"}
            }
        }"#,
    ),
    (
        "update_missing_embeddings",
        "Repair memories that are missing embeddings",
        r#"{
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "default": 50}
            }
        }"#,
    ),
];

/// Build the advertised tool list
pub fn tool_definitions() -> Vec<ToolDefinition> {
    TOOL_DEFINITIONS
        .iter()
        .map(|(name, description, schema)| ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::from_str(schema).expect("valid tool schema"),
        })
        .collect()
}

type ToolResult = std::result::Result<Value, ToolError>;

/// Dispatches tool calls into the Memory Core
pub struct ToolDispatcher {
    core: Arc<MemoryCore>,
    limiter: RateLimiter,
}

#[derive(Deserialize)]
struct RecallArgs {
    query: String,
    limit: Option<i64>,
    threshold: Option<f32>,
    strategy: Option<String>,
    memory_types: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct MemoryIdArgs {
    #[serde(rename = "memoryId", alias = "memory_id", alias = "id")]
    memory_id: String,
}

#[derive(Deserialize)]
struct UpdateMemoryArgs {
    #[serde(rename = "memoryId", alias = "memory_id", alias = "id")]
    memory_id: String,
    patch: MemoryPatch,
}

#[derive(Deserialize)]
struct EntitySearchArgs {
    query: String,
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct UpdateEntityArgs {
    #[serde(rename = "entityId", alias = "entity_id", alias = "id")]
    entity_id: String,
    patch: EntityPatch,
}

#[derive(Deserialize)]
struct UnifiedArgs {
    query: String,
    limit: Option<i64>,
    threshold: Option<f32>,
    memory_types: Option<Vec<String>>,
    entity_types: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct LimitArgs {
    limit: Option<i64>,
}

#[derive(Deserialize)]
struct DateArgs {
    date: Option<String>,
}

fn parse_args<T: serde::de::DeserializeOwned>(params: Value) -> std::result::Result<T, ToolError> {
    serde_json::from_value(params).map_err(|e| ToolError::invalid_params(e.to_string()))
}

fn parse_memory_types(
    names: Option<Vec<String>>,
) -> std::result::Result<Option<Vec<MemoryType>>, ToolError> {
    names
        .map(|names| {
            names
                .iter()
                .map(|s| s.parse::<MemoryType>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(ToolError::invalid_params)
        })
        .transpose()
}

impl ToolDispatcher {
    pub fn new(core: Arc<MemoryCore>, rate_limit: &RateLimitConfig) -> Self {
        Self {
            core,
            limiter: RateLimiter::new(rate_limit),
        }
    }

    /// Handle one tool call for an authenticated identity
    pub async fn dispatch(&self, auth: &AuthContext, tool: &str, params: Value) -> ToolResult {
        self.limiter.check(&auth.user_id)?;
        let user_id = auth.user_id.as_str();

        match tool {
            "store_memory" | "memory_add" => {
                let input: CreateMemoryInput = parse_args(params)?;
                let memory = self.core.store_memory(user_id, &input).await?;
                Ok(json!({ "memoryId": memory.id }))
            }
            "recall_memories" | "memory_search" => {
                let args: RecallArgs = parse_args(params)?;
                let options = SearchOptions {
                    limit: args.limit,
                    threshold: args.threshold,
                    strategy: args
                        .strategy
                        .as_deref()
                        .map(|s| s.parse::<RankStrategy>())
                        .transpose()
                        .map_err(ToolError::invalid_params)?,
                    memory_types: parse_memory_types(args.memory_types)?,
                };
                let response = self.core.search_memories(user_id, &args.query, &options).await?;
                let count = response.results.len();
                Ok(json!({
                    "results": response.results,
                    "method": response.method.as_str(),
                    "count": count,
                }))
            }
            "get_memory" => {
                let args: MemoryIdArgs = parse_args(params)?;
                let memory = self.core.get_memory(user_id, &args.memory_id)?;
                Ok(serde_json::to_value(memory).unwrap_or(Value::Null))
            }
            "update_memory" => {
                let args: UpdateMemoryArgs = parse_args(params)?;
                self.core
                    .update_memory(user_id, &args.memory_id, &args.patch)
                    .await?;
                Ok(json!({ "ok": true }))
            }
            "delete_memory" => {
                let args: MemoryIdArgs = parse_args(params)?;
                self.core.delete_memory(user_id, &args.memory_id)?;
                Ok(json!({ "ok": true }))
            }
            "entity_create" => {
                let input: CreateEntityInput = parse_args(params)?;
                let entity = self.core.store_entity(user_id, &input)?;
                Ok(json!({ "entityId": entity.id }))
            }
            "entity_search" => {
                let args: EntitySearchArgs = parse_args(params)?;
                let entities =
                    self.core
                        .search_entities(user_id, &args.query, args.limit.unwrap_or(10))?;
                let count = entities.len();
                Ok(json!({ "entities": entities, "count": count }))
            }
            "entity_update" => {
                let args: UpdateEntityArgs = parse_args(params)?;
                self.core.update_entity(user_id, &args.entity_id, &args.patch)?;
                Ok(json!({ "ok": true }))
            }
            "unified_search" => {
                let args: UnifiedArgs = parse_args(params)?;
                let entity_types = args
                    .entity_types
                    .map(|names| {
                        names
                            .iter()
                            .map(|s| s.parse::<EntityType>())
                            .collect::<std::result::Result<Vec<_>, _>>()
                            .map_err(ToolError::invalid_params)
                    })
                    .transpose()?;
                let options = SearchOptions {
                    limit: args.limit,
                    threshold: args.threshold,
                    strategy: None,
                    memory_types: parse_memory_types(args.memory_types)?,
                };
                let response = self
                    .core
                    .unified_search(user_id, &args.query, &options, entity_types.as_deref())
                    .await?;
                Ok(serde_json::to_value(response)
                    .map_err(|e| ToolError::from(crate::error::MnemoError::from(e)))?)
            }
            "get_statistics" => {
                let stats = self.core.get_statistics(user_id)?;
                Ok(serde_json::to_value(stats)
                    .map_err(|e| ToolError::from(crate::error::MnemoError::from(e)))?)
            }
            "get_recent_interactions" => {
                let args: LimitArgs = parse_args(params)?;
                let interactions =
                    self.core.recent_interactions(user_id, args.limit.unwrap_or(20))?;
                let count = interactions.len();
                Ok(json!({ "interactions": interactions, "count": count }))
            }
            "get_daily_costs" => {
                let args: DateArgs = parse_args(params)?;
                let date = args
                    .date
                    .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());
                let report = self.core.daily_costs(user_id, &date)?;
                Ok(json!({ "date": date, "report": report }))
            }
            "update_missing_embeddings" => {
                let args: LimitArgs = parse_args(params)?;
                let report = self
                    .core
                    .repair_missing_embeddings(user_id, args.limit.unwrap_or(50))
                    .await?;
                Ok(json!({
                    "scanned": report.scanned,
                    "updated": report.updated,
                    "failed": report.failed,
                }))
            }
            other => Err(ToolError::method_not_found(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_definitions_parse() {
        let definitions = tool_definitions();
        assert_eq!(definitions.len(), TOOL_DEFINITIONS.len());
        for definition in &definitions {
            assert!(definition.input_schema.is_object());
        }
    }

    #[test]
    fn test_parse_memory_types() {
        let parsed = parse_memory_types(Some(vec!["semantic".to_string(), "technical".to_string()]))
            .unwrap()
            .unwrap();
        assert_eq!(parsed, vec![MemoryType::Semantic, MemoryType::Technical]);

        assert!(parse_memory_types(Some(vec!["bogus".to_string()])).is_err());
        assert!(parse_memory_types(None).unwrap().is_none());
    }
}
