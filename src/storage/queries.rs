//! Database queries for memory operations
//!
//! Every function takes the tenant key and bakes it into the SQL predicate.
//! A missing tenant key is rejected before any SQL runs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use super::alias::canonicalize_memory_fields;
use super::connection::ensure_user_scope;
use crate::error::{MnemoError, Result};
use crate::types::*;

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let id: String = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let mut title: String = row.get("title")?;
    let mut content: String = row.get("content")?;
    let memory_type_str: String = row.get("memory_type")?;
    let importance: i64 = row.get("importance")?;
    let tags_str: String = row.get("tags")?;
    let entity_ids_str: String = row.get("entity_ids")?;
    let metadata_str: String = row.get("metadata")?;
    let has_embedding: i64 = row.get("has_embedding")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let is_archived: i64 = row.get("is_archived")?;

    let tags: Vec<String> = serde_json::from_str(&tags_str).unwrap_or_default();
    let entity_ids: Vec<String> = serde_json::from_str(&entity_ids_str).unwrap_or_default();
    let mut metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_str).unwrap_or_default();

    canonicalize_memory_fields(&mut title, &mut content, &mut metadata);

    Ok(Memory {
        id,
        user_id,
        title,
        content,
        memory_type: memory_type_str.parse().unwrap_or_default(),
        importance: Importance::from_int(importance),
        tags,
        entity_ids,
        metadata,
        has_embedding: has_embedding != 0,
        embedding: None,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
        expires_at: expires_at.as_deref().map(parse_timestamp),
        is_archived: is_archived != 0,
    })
}

pub(crate) fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

const MEMORY_COLUMNS: &str = "id, user_id, title, content, memory_type, importance, tags, \
     entity_ids, metadata, has_embedding, created_at, updated_at, expires_at, is_archived";

/// Create a memory; generates an id when none is supplied
pub fn create_memory(conn: &Connection, user_id: &str, input: &CreateMemoryInput) -> Result<Memory> {
    ensure_user_scope(user_id)?;

    let now = Utc::now();
    let memory = Memory {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        title: input.title.clone(),
        content: input.content.clone(),
        memory_type: input.memory_type,
        importance: input.importance.unwrap_or_default(),
        tags: input.tags.clone(),
        entity_ids: input.entity_ids.clone(),
        metadata: input.metadata.clone(),
        has_embedding: false,
        embedding: None,
        created_at: now,
        updated_at: now,
        expires_at: input.expires_at,
        is_archived: false,
    };

    conn.execute(
        "INSERT INTO memories (id, user_id, title, content, memory_type, importance, tags,
                               entity_ids, metadata, has_embedding, created_at, updated_at,
                               expires_at, is_archived)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?, 0)",
        params![
            memory.id,
            memory.user_id,
            memory.title,
            memory.content,
            memory.memory_type.as_str(),
            memory.importance.as_int(),
            serde_json::to_string(&memory.tags)?,
            serde_json::to_string(&memory.entity_ids)?,
            serde_json::to_string(&memory.metadata)?,
            memory.created_at.to_rfc3339(),
            memory.updated_at.to_rfc3339(),
            memory.expires_at.map(|at| at.to_rfc3339()),
        ],
    )?;

    Ok(memory)
}

/// Get a memory by id. Cross-tenant lookups return `None`, never the row.
pub fn get_memory(conn: &Connection, user_id: &str, memory_id: &str) -> Result<Option<Memory>> {
    ensure_user_scope(user_id)?;

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM memories WHERE id = ? AND user_id = ?",
        MEMORY_COLUMNS
    ))?;

    let memory = stmt
        .query_row(params![memory_id, user_id], memory_from_row)
        .optional()?;

    if let Some(mut memory) = memory {
        memory.embedding = get_embedding(conn, &memory.id)?;
        memory.has_embedding = memory.embedding.is_some();
        Ok(Some(memory))
    } else {
        Ok(None)
    }
}

/// Apply a patch to a memory. `NOT_FOUND` covers both missing rows and
/// rows owned by another tenant.
pub fn update_memory(
    conn: &Connection,
    user_id: &str,
    memory_id: &str,
    patch: &MemoryPatch,
) -> Result<Memory> {
    ensure_user_scope(user_id)?;

    let mut memory = get_memory(conn, user_id, memory_id)?
        .ok_or_else(|| MnemoError::NotFound(format!("memory {}", memory_id)))?;

    if let Some(ref title) = patch.title {
        memory.title = title.clone();
    }
    if let Some(ref content) = patch.content {
        memory.content = content.clone();
    }
    if let Some(memory_type) = patch.memory_type {
        memory.memory_type = memory_type;
    }
    if let Some(importance) = patch.importance {
        memory.importance = importance;
    }
    if let Some(ref tags) = patch.tags {
        memory.tags = tags.clone();
    }
    if let Some(ref entity_ids) = patch.entity_ids {
        memory.entity_ids = entity_ids.clone();
    }
    if let Some(ref metadata) = patch.metadata {
        memory.metadata = metadata.clone();
    }
    if let Some(expires_at) = patch.expires_at {
        memory.expires_at = expires_at;
    }
    if let Some(is_archived) = patch.is_archived {
        memory.is_archived = is_archived;
    }
    memory.updated_at = Utc::now();

    conn.execute(
        "UPDATE memories SET title = ?, content = ?, memory_type = ?, importance = ?,
                tags = ?, entity_ids = ?, metadata = ?, updated_at = ?, expires_at = ?,
                is_archived = ?
         WHERE id = ? AND user_id = ?",
        params![
            memory.title,
            memory.content,
            memory.memory_type.as_str(),
            memory.importance.as_int(),
            serde_json::to_string(&memory.tags)?,
            serde_json::to_string(&memory.entity_ids)?,
            serde_json::to_string(&memory.metadata)?,
            memory.updated_at.to_rfc3339(),
            memory.expires_at.map(|at| at.to_rfc3339()),
            memory.is_archived,
            memory.id,
            user_id,
        ],
    )?;

    Ok(memory)
}

/// Hard-delete a memory
pub fn delete_memory(conn: &Connection, user_id: &str, memory_id: &str) -> Result<()> {
    ensure_user_scope(user_id)?;

    let affected = conn.execute(
        "DELETE FROM memories WHERE id = ? AND user_id = ?",
        params![memory_id, user_id],
    )?;

    if affected == 0 {
        return Err(MnemoError::NotFound(format!("memory {}", memory_id)));
    }

    // The embeddings row goes with it
    conn.execute(
        "DELETE FROM embeddings WHERE memory_id = ?",
        params![memory_id],
    )?;

    Ok(())
}

/// List a user's memories, newest first. Includes archived rows (archival
/// only removes a memory from search), excludes expired ones.
pub fn list_memories(conn: &Connection, user_id: &str, limit: i64) -> Result<Vec<Memory>> {
    ensure_user_scope(user_id)?;

    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM memories
         WHERE user_id = ? AND (expires_at IS NULL OR expires_at > ?)
         ORDER BY updated_at DESC
         LIMIT ?",
        MEMORY_COLUMNS
    ))?;

    let memories = stmt
        .query_map(params![user_id, now, limit], memory_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(memories)
}

/// Most recent searchable memories (excludes archived and expired), for
/// empty-query recall
pub fn list_active_memories(conn: &Connection, user_id: &str, limit: i64) -> Result<Vec<Memory>> {
    ensure_user_scope(user_id)?;

    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM memories
         WHERE user_id = ? AND is_archived = 0
           AND (expires_at IS NULL OR expires_at > ?)
         ORDER BY updated_at DESC
         LIMIT ?",
        MEMORY_COLUMNS
    ))?;

    let memories = stmt
        .query_map(params![user_id, now, limit], memory_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(memories)
}

/// Case-insensitive substring search over title and content.
/// Excludes archived and expired rows, newest first.
pub fn search_memories_lexical(
    conn: &Connection,
    user_id: &str,
    query: &str,
    limit: i64,
) -> Result<Vec<Memory>> {
    ensure_user_scope(user_id)?;

    let now = Utc::now().to_rfc3339();
    let needle = query.to_lowercase();

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM memories
         WHERE user_id = ?
           AND is_archived = 0
           AND (expires_at IS NULL OR expires_at > ?)
           AND (instr(lower(title), ?) > 0 OR instr(lower(content), ?) > 0)
         ORDER BY updated_at DESC
         LIMIT ?",
        MEMORY_COLUMNS
    ))?;

    let memories = stmt
        .query_map(params![user_id, now, needle, needle, limit], memory_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(memories)
}

/// Search by a single field. Top-level columns (`memory_type`, `importance`,
/// `user_id`) match directly; any other field name is a dotted path into the
/// metadata JSON.
pub fn search_memories_by_metadata(
    conn: &Connection,
    user_id: &str,
    field: &str,
    value: &str,
    limit: i64,
) -> Result<Vec<Memory>> {
    ensure_user_scope(user_id)?;

    let now = Utc::now().to_rfc3339();

    let memories = match field {
        "memory_type" | "memoryType" | "type" => {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM memories
                 WHERE user_id = ? AND is_archived = 0
                   AND (expires_at IS NULL OR expires_at > ?)
                   AND memory_type = ?
                 ORDER BY updated_at DESC LIMIT ?",
                MEMORY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id, now, value.to_lowercase(), limit], memory_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        "importance" => {
            let level: i64 = value.parse().map_err(|_| {
                MnemoError::InvalidArgument(format!("importance must be numeric, got {:?}", value))
            })?;
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM memories
                 WHERE user_id = ? AND is_archived = 0
                   AND (expires_at IS NULL OR expires_at > ?)
                   AND importance = ?
                 ORDER BY updated_at DESC LIMIT ?",
                MEMORY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id, now, level, limit], memory_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
        "user_id" | "userId" => {
            // The scope argument is the tenant; a mismatching filter value
            // legitimately returns nothing.
            if value != user_id {
                return Ok(vec![]);
            }
            list_active_memories(conn, user_id, limit)?
        }
        path => {
            let json_path = metadata_json_path(path)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memories
                 WHERE user_id = ? AND is_archived = 0
                   AND (expires_at IS NULL OR expires_at > ?)
                   AND CAST(json_extract(metadata, ?) AS TEXT) = ?
                 ORDER BY updated_at DESC LIMIT ?",
                MEMORY_COLUMNS
            ))?;
            let rows = stmt
                .query_map(params![user_id, now, json_path, value, limit], memory_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        }
    };

    Ok(memories)
}

/// Build a SQLite `json_extract` path from a dotted field name, rejecting
/// anything that could escape the quoting
fn metadata_json_path(field: &str) -> Result<String> {
    let path = field.strip_prefix("metadata.").unwrap_or(field);
    if path.is_empty()
        || !path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(MnemoError::InvalidArgument(format!(
            "invalid metadata field: {:?}",
            field
        )));
    }
    Ok(format!("$.{}", path))
}

/// Memories that have a stored embedding of the configured dimension,
/// paired with the decoded vector. Mismatched vectors are skipped (treated
/// as absent).
pub fn get_memories_with_embedding(
    conn: &Connection,
    user_id: &str,
    dimension: usize,
    limit: i64,
) -> Result<Vec<(Memory, Vec<f32>)>> {
    ensure_user_scope(user_id)?;

    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM memories
         WHERE user_id = ? AND has_embedding = 1
           AND is_archived = 0
           AND (expires_at IS NULL OR expires_at > ?)
         ORDER BY updated_at DESC
         LIMIT ?",
        MEMORY_COLUMNS
    ))?;

    let memories: Vec<Memory> = stmt
        .query_map(params![user_id, now, limit], memory_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(memories.len());
    for memory in memories {
        if let Some(vector) = get_embedding(conn, &memory.id)? {
            if vector.len() == dimension {
                out.push((memory, vector));
            }
        }
    }

    Ok(out)
}

/// Memories with no stored embedding, oldest first so the repair pass
/// catches up from the back
pub fn get_memories_missing_embedding(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<Memory>> {
    ensure_user_scope(user_id)?;

    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM memories
         WHERE user_id = ? AND has_embedding = 0
           AND (expires_at IS NULL OR expires_at > ?)
         ORDER BY updated_at ASC
         LIMIT ?",
        MEMORY_COLUMNS
    ))?;

    let memories = stmt
        .query_map(params![user_id, now, limit], memory_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(memories)
}

/// Store an embedding as little-endian f32 bytes and flip the row flag
pub fn put_embedding(
    conn: &Connection,
    memory_id: &str,
    vector: &[f32],
    model: &str,
) -> Result<()> {
    let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
    let now = Utc::now().to_rfc3339();

    conn.execute(
        "INSERT OR REPLACE INTO embeddings (memory_id, embedding, model, dimensions, created_at)
         VALUES (?, ?, ?, ?, ?)",
        params![memory_id, bytes, model, vector.len() as i64, now],
    )?;

    conn.execute(
        "UPDATE memories SET has_embedding = 1 WHERE id = ?",
        params![memory_id],
    )?;

    Ok(())
}

/// Drop a stored embedding (e.g., after the embedded text changed)
pub fn clear_embedding(conn: &Connection, memory_id: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM embeddings WHERE memory_id = ?",
        params![memory_id],
    )?;
    conn.execute(
        "UPDATE memories SET has_embedding = 0 WHERE id = ?",
        params![memory_id],
    )?;
    Ok(())
}

/// Get the embedding for a memory. Byte-length mismatches mean the stored
/// vector is malformed; it is treated as absent.
pub fn get_embedding(conn: &Connection, memory_id: &str) -> Result<Option<Vec<f32>>> {
    let row = conn
        .query_row(
            "SELECT embedding, dimensions FROM embeddings WHERE memory_id = ?",
            params![memory_id],
            |row| {
                let bytes: Vec<u8> = row.get(0)?;
                let dimensions: i64 = row.get(1)?;
                Ok((bytes, dimensions as usize))
            },
        )
        .optional()?;

    let Some((bytes, dimensions)) = row else {
        return Ok(None);
    };

    let expected_len = dimensions.checked_mul(4);
    if expected_len != Some(bytes.len()) {
        tracing::warn!(
            memory_id,
            dimensions,
            bytes = bytes.len(),
            "malformed stored embedding, treating as absent"
        );
        return Ok(None);
    }

    let mut vector = Vec::with_capacity(dimensions);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = chunk.try_into().expect("chunks_exact(4)");
        vector.push(f32::from_le_bytes(arr));
    }
    Ok(Some(vector))
}

/// Count all non-expired memories for a user
pub fn count_memories(conn: &Connection, user_id: &str) -> Result<i64> {
    ensure_user_scope(user_id)?;
    let now = Utc::now().to_rfc3339();
    let count = conn.query_row(
        "SELECT COUNT(*) FROM memories
         WHERE user_id = ? AND (expires_at IS NULL OR expires_at > ?)",
        params![user_id, now],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Count memories that carry an embedding
pub fn count_memories_with_embedding(conn: &Connection, user_id: &str) -> Result<i64> {
    ensure_user_scope(user_id)?;
    let now = Utc::now().to_rfc3339();
    let count = conn.query_row(
        "SELECT COUNT(*) FROM memories
         WHERE user_id = ? AND has_embedding = 1
           AND (expires_at IS NULL OR expires_at > ?)",
        params![user_id, now],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Per-type memory counts
pub fn memory_type_counts(conn: &Connection, user_id: &str) -> Result<HashMap<String, i64>> {
    ensure_user_scope(user_id)?;
    let mut stmt = conn.prepare_cached(
        "SELECT memory_type, COUNT(*) FROM memories WHERE user_id = ? GROUP BY memory_type",
    )?;
    let counts: Vec<(String, i64)> = stmt
        .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(counts.into_iter().collect())
}
