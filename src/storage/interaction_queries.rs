//! Database queries for interaction log entries

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;

use super::connection::ensure_user_scope;
use super::queries::parse_timestamp;
use crate::error::Result;
use crate::types::Interaction;

fn interaction_from_row(row: &Row) -> rusqlite::Result<Interaction> {
    let metadata_str: String = row.get("metadata")?;
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_str).unwrap_or_default();
    let created_at: String = row.get("created_at")?;

    Ok(Interaction {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        agent_name: row.get("agent_name")?,
        content: row.get("content")?,
        context: row.get("context")?,
        metadata,
        created_at: parse_timestamp(&created_at),
    })
}

/// Append an interaction log entry
pub fn create_interaction(
    conn: &Connection,
    user_id: &str,
    agent_name: &str,
    content: &str,
    context: Option<&str>,
    metadata: &HashMap<String, serde_json::Value>,
) -> Result<Interaction> {
    ensure_user_scope(user_id)?;

    let interaction = Interaction {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        agent_name: agent_name.to_string(),
        content: content.to_string(),
        context: context.map(|s| s.to_string()),
        metadata: metadata.clone(),
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO interactions (id, user_id, agent_name, content, context, metadata, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            interaction.id,
            interaction.user_id,
            interaction.agent_name,
            interaction.content,
            interaction.context,
            serde_json::to_string(&interaction.metadata)?,
            interaction.created_at.to_rfc3339(),
        ],
    )?;

    Ok(interaction)
}

/// Most recent interactions, newest first
pub fn list_recent_interactions(
    conn: &Connection,
    user_id: &str,
    limit: i64,
) -> Result<Vec<Interaction>> {
    ensure_user_scope(user_id)?;

    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, agent_name, content, context, metadata, created_at
         FROM interactions
         WHERE user_id = ?
         ORDER BY created_at DESC
         LIMIT ?",
    )?;

    let interactions = stmt
        .query_map(params![user_id, limit], interaction_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(interactions)
}

/// Substring search over interaction content (for unified search)
pub fn search_interactions(
    conn: &Connection,
    user_id: &str,
    query: &str,
    limit: i64,
) -> Result<Vec<Interaction>> {
    ensure_user_scope(user_id)?;

    let needle = query.to_lowercase();
    let mut stmt = conn.prepare_cached(
        "SELECT id, user_id, agent_name, content, context, metadata, created_at
         FROM interactions
         WHERE user_id = ? AND instr(lower(content), ?) > 0
         ORDER BY created_at DESC
         LIMIT ?",
    )?;

    let interactions = stmt
        .query_map(params![user_id, needle, limit], interaction_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(interactions)
}

/// Count a user's interactions
pub fn count_interactions(conn: &Connection, user_id: &str) -> Result<i64> {
    ensure_user_scope(user_id)?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM interactions WHERE user_id = ?",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    fn seed_user(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO users (id, email, name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                id,
                format!("{}@example.com", id),
                id,
                Utc::now().to_rfc3339(),
                Utc::now().to_rfc3339()
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_create_and_list() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                seed_user(conn, "u1");
                create_interaction(conn, "u1", "assistant", "first", None, &HashMap::new())?;
                create_interaction(
                    conn,
                    "u1",
                    "assistant",
                    "second",
                    Some("ctx"),
                    &HashMap::new(),
                )?;

                let recent = list_recent_interactions(conn, "u1", 10)?;
                assert_eq!(recent.len(), 2);
                assert_eq!(recent[0].content, "second");
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_isolation() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                seed_user(conn, "u1");
                seed_user(conn, "u2");
                create_interaction(conn, "u1", "agent", "private chat", None, &HashMap::new())?;

                assert!(list_recent_interactions(conn, "u2", 10)?.is_empty());
                assert!(search_interactions(conn, "u2", "private", 10)?.is_empty());
                Ok(())
            })
            .unwrap();
    }
}
