//! Database queries for entity operations

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use super::connection::ensure_user_scope;
use super::queries::parse_timestamp;
use crate::error::{MnemoError, Result};
use crate::types::*;

/// Parse an entity from a database row
pub fn entity_from_row(row: &Row) -> rusqlite::Result<Entity> {
    let id: String = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let name: String = row.get("name")?;
    let entity_type_str: String = row.get("entity_type")?;
    let importance: i64 = row.get("importance")?;
    let tags_str: String = row.get("tags")?;
    let metadata_str: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let tags: Vec<String> = serde_json::from_str(&tags_str).unwrap_or_default();
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_str).unwrap_or_default();

    Ok(Entity {
        id,
        user_id,
        name,
        entity_type: entity_type_str.parse().unwrap_or_default(),
        description: row.get("description")?,
        company: row.get("company")?,
        title: row.get("title")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        website: row.get("website")?,
        importance: Importance::from_int(importance),
        tags,
        notes: row.get("notes")?,
        metadata,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

const ENTITY_COLUMNS: &str = "id, user_id, name, entity_type, description, company, title, \
     email, phone, website, importance, tags, notes, metadata, created_at, updated_at";

/// Create an entity; generates an id
pub fn create_entity(conn: &Connection, user_id: &str, input: &CreateEntityInput) -> Result<Entity> {
    ensure_user_scope(user_id)?;

    if input.name.trim().is_empty() {
        return Err(MnemoError::InvalidArgument(
            "entity name must not be empty".to_string(),
        ));
    }

    let now = Utc::now();
    let entity = Entity {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        name: input.name.clone(),
        entity_type: input.entity_type,
        description: input.description.clone(),
        company: input.company.clone(),
        title: input.title.clone(),
        email: input.email.clone(),
        phone: input.phone.clone(),
        website: input.website.clone(),
        importance: input.importance.unwrap_or_default(),
        tags: input.tags.clone(),
        notes: input.notes.clone(),
        metadata: input.metadata.clone(),
        created_at: now,
        updated_at: now,
    };

    conn.execute(
        "INSERT INTO entities (id, user_id, name, entity_type, description, company, title,
                               email, phone, website, importance, tags, notes, metadata,
                               created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            entity.id,
            entity.user_id,
            entity.name,
            entity.entity_type.as_str(),
            entity.description,
            entity.company,
            entity.title,
            entity.email,
            entity.phone,
            entity.website,
            entity.importance.as_int(),
            serde_json::to_string(&entity.tags)?,
            entity.notes,
            serde_json::to_string(&entity.metadata)?,
            entity.created_at.to_rfc3339(),
            entity.updated_at.to_rfc3339(),
        ],
    )?;

    Ok(entity)
}

/// Get an entity by id; cross-tenant lookups return `None`
pub fn get_entity(conn: &Connection, user_id: &str, entity_id: &str) -> Result<Option<Entity>> {
    ensure_user_scope(user_id)?;

    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM entities WHERE id = ? AND user_id = ?",
        ENTITY_COLUMNS
    ))?;

    let entity = stmt
        .query_row(params![entity_id, user_id], entity_from_row)
        .optional()?;

    Ok(entity)
}

/// Apply a patch to an entity
pub fn update_entity(
    conn: &Connection,
    user_id: &str,
    entity_id: &str,
    patch: &EntityPatch,
) -> Result<Entity> {
    ensure_user_scope(user_id)?;

    let mut entity = get_entity(conn, user_id, entity_id)?
        .ok_or_else(|| MnemoError::NotFound(format!("entity {}", entity_id)))?;

    if let Some(ref name) = patch.name {
        entity.name = name.clone();
    }
    if let Some(entity_type) = patch.entity_type {
        entity.entity_type = entity_type;
    }
    if let Some(ref description) = patch.description {
        entity.description = Some(description.clone());
    }
    if let Some(ref company) = patch.company {
        entity.company = Some(company.clone());
    }
    if let Some(ref title) = patch.title {
        entity.title = Some(title.clone());
    }
    if let Some(ref email) = patch.email {
        entity.email = Some(email.clone());
    }
    if let Some(ref phone) = patch.phone {
        entity.phone = Some(phone.clone());
    }
    if let Some(ref website) = patch.website {
        entity.website = Some(website.clone());
    }
    if let Some(importance) = patch.importance {
        entity.importance = importance;
    }
    if let Some(ref tags) = patch.tags {
        entity.tags = tags.clone();
    }
    if let Some(ref notes) = patch.notes {
        entity.notes = Some(notes.clone());
    }
    if let Some(ref metadata) = patch.metadata {
        entity.metadata = metadata.clone();
    }
    entity.updated_at = Utc::now();

    persist_entity(conn, &entity)?;

    Ok(entity)
}

/// Write back a fully-materialized entity (used by the sync engine, which
/// edits records in memory before committing them)
pub fn persist_entity(conn: &Connection, entity: &Entity) -> Result<()> {
    ensure_user_scope(&entity.user_id)?;

    let affected = conn.execute(
        "UPDATE entities SET name = ?, entity_type = ?, description = ?, company = ?,
                title = ?, email = ?, phone = ?, website = ?, importance = ?, tags = ?,
                notes = ?, metadata = ?, updated_at = ?
         WHERE id = ? AND user_id = ?",
        params![
            entity.name,
            entity.entity_type.as_str(),
            entity.description,
            entity.company,
            entity.title,
            entity.email,
            entity.phone,
            entity.website,
            entity.importance.as_int(),
            serde_json::to_string(&entity.tags)?,
            entity.notes,
            serde_json::to_string(&entity.metadata)?,
            entity.updated_at.to_rfc3339(),
            entity.id,
            entity.user_id,
        ],
    )?;

    if affected == 0 {
        return Err(MnemoError::NotFound(format!("entity {}", entity.id)));
    }

    Ok(())
}

/// Delete an entity. Memories referencing it keep their dangling id; reads
/// resolve references lazily and skip missing entities.
pub fn delete_entity(conn: &Connection, user_id: &str, entity_id: &str) -> Result<()> {
    ensure_user_scope(user_id)?;

    let affected = conn.execute(
        "DELETE FROM entities WHERE id = ? AND user_id = ?",
        params![entity_id, user_id],
    )?;

    if affected == 0 {
        return Err(MnemoError::NotFound(format!("entity {}", entity_id)));
    }

    Ok(())
}

/// List a user's entities, optionally filtered by type
pub fn list_entities(
    conn: &Connection,
    user_id: &str,
    entity_type: Option<EntityType>,
    limit: i64,
) -> Result<Vec<Entity>> {
    ensure_user_scope(user_id)?;

    let entities = if let Some(et) = entity_type {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM entities WHERE user_id = ? AND entity_type = ?
             ORDER BY updated_at DESC LIMIT ?",
            ENTITY_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, et.as_str(), limit], entity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    } else {
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {} FROM entities WHERE user_id = ?
             ORDER BY updated_at DESC LIMIT ?",
            ENTITY_COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id, limit], entity_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };

    Ok(entities)
}

/// Case-insensitive substring search over name, company, email and notes
pub fn search_entities_by_text(
    conn: &Connection,
    user_id: &str,
    query: &str,
    limit: i64,
) -> Result<Vec<Entity>> {
    ensure_user_scope(user_id)?;

    let needle = query.to_lowercase();
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM entities
         WHERE user_id = ?
           AND (instr(lower(name), ?) > 0
                OR instr(lower(COALESCE(company, '')), ?) > 0
                OR instr(lower(COALESCE(email, '')), ?) > 0
                OR instr(lower(COALESCE(notes, '')), ?) > 0)
         ORDER BY updated_at DESC
         LIMIT ?",
        ENTITY_COLUMNS
    ))?;

    let entities = stmt
        .query_map(
            params![user_id, needle, needle, needle, needle, limit],
            entity_from_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(entities)
}

/// Count a user's entities
pub fn count_entities(conn: &Connection, user_id: &str) -> Result<i64> {
    ensure_user_scope(user_id)?;
    let count = conn.query_row(
        "SELECT COUNT(*) FROM entities WHERE user_id = ?",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(count)
}
