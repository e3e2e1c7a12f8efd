//! User account queries

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use super::queries::parse_timestamp;
use crate::error::{MnemoError, Result};
use crate::types::User;

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let metadata_str: String = row.get("metadata")?;
    let metadata: HashMap<String, serde_json::Value> =
        serde_json::from_str(&metadata_str).unwrap_or_default();
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let is_active: i64 = row.get("is_active")?;

    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        name: row.get("name")?,
        metadata,
        is_active: is_active != 0,
        created_at: parse_timestamp(&created_at),
        updated_at: parse_timestamp(&updated_at),
    })
}

/// Create a user. A duplicate email is a `Conflict`.
pub fn create_user(conn: &Connection, user: &User) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO users (id, email, name, metadata, is_active, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
            user.id,
            user.email,
            user.name,
            serde_json::to_string(&user.metadata)?,
            user.is_active,
            user.created_at.to_rfc3339(),
            user.updated_at.to_rfc3339(),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(MnemoError::Conflict(format!(
                "user with email {} already exists",
                user.email
            )))
        }
        Err(e) => Err(MnemoError::Database(e)),
    }
}

/// Get a user by id
pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, email, name, metadata, is_active, created_at, updated_at
             FROM users WHERE id = ?",
            params![id],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

/// Get a user by email (case-insensitive)
pub fn get_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>> {
    let user = conn
        .query_row(
            "SELECT id, email, name, metadata, is_active, created_at, updated_at
             FROM users WHERE email = ? COLLATE NOCASE",
            params![email],
            user_from_row,
        )
        .optional()?;
    Ok(user)
}

/// Update a user's name, metadata and active flag
pub fn update_user(conn: &Connection, user: &User) -> Result<()> {
    let affected = conn.execute(
        "UPDATE users SET name = ?, metadata = ?, is_active = ?, updated_at = ?
         WHERE id = ?",
        params![
            user.name,
            serde_json::to_string(&user.metadata)?,
            user.is_active,
            Utc::now().to_rfc3339(),
            user.id,
        ],
    )?;

    if affected == 0 {
        return Err(MnemoError::NotFound(format!("user {}", user.id)));
    }

    Ok(())
}

/// Merge a single metadata key into a user record (used by the sync engine
/// to persist sync tokens and timestamps)
pub fn set_user_metadata(
    conn: &Connection,
    user_id: &str,
    key: &str,
    value: serde_json::Value,
) -> Result<()> {
    let mut user = get_user_by_id(conn, user_id)?
        .ok_or_else(|| MnemoError::NotFound(format!("user {}", user_id)))?;
    user.metadata.insert(key.to_string(), value);
    update_user(conn, &user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    #[test]
    fn test_create_and_lookup() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let user = User::new("alice@example.com", "Alice");
                create_user(conn, &user)?;

                let by_id = get_user_by_id(conn, &user.id)?.unwrap();
                assert_eq!(by_id.email, "alice@example.com");

                let by_email = get_user_by_email(conn, "ALICE@example.com")?.unwrap();
                assert_eq!(by_email.id, user.id);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_duplicate_email_conflict() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                create_user(conn, &User::new("bob@example.com", "Bob"))?;
                let err = create_user(conn, &User::new("bob@example.com", "Bobby")).unwrap_err();
                assert!(matches!(err, MnemoError::Conflict(_)));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_metadata_merge() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let user = User::new("carol@example.com", "Carol");
                create_user(conn, &user)?;

                set_user_metadata(conn, &user.id, "contactSyncToken", serde_json::json!("tok-1"))?;
                set_user_metadata(conn, &user.id, "other", serde_json::json!(42))?;

                let fetched = get_user_by_id(conn, &user.id)?.unwrap();
                assert_eq!(
                    fetched.metadata.get("contactSyncToken"),
                    Some(&serde_json::json!("tok-1"))
                );
                assert_eq!(fetched.metadata.get("other"), Some(&serde_json::json!(42)));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_update_missing_user() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let ghost = User::new("ghost@example.com", "Ghost");
                let err = update_user(conn, &ghost).unwrap_err();
                assert!(matches!(err, MnemoError::NotFound(_)));
                Ok(())
            })
            .unwrap();
    }
}
