//! External contact source contract
//!
//! The source holds the user's address book: list with incremental sync
//! tokens, and create/update with optimistic-concurrency tags. Updates MUST
//! carry the stored etag; a mismatch comes back as `ExternalConflict` and
//! the engine re-reads and retries once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Marker embedded in exported contact notes so the next sync's cascade
/// matches on UID instead of re-exporting
pub const INTERNAL_ID_MARKER: &str = "mnemo-id:";

/// A contact record in the external source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExternalContact {
    pub uid: String,
    /// Optimistic-concurrency tag; changes on every write
    pub etag: String,
    pub name: String,
    #[serde(default)]
    pub emails: Vec<String>,
    #[serde(default)]
    pub phones: Vec<String>,
    pub organization: Option<String>,
    pub title: Option<String>,
    pub notes: Option<String>,
    pub address: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ExternalContact {
    /// Internal entity id embedded in the notes field, if this record was
    /// exported by us
    pub fn embedded_internal_id(&self) -> Option<&str> {
        let notes = self.notes.as_deref()?;
        let start = notes.find(INTERNAL_ID_MARKER)? + INTERNAL_ID_MARKER.len();
        let rest = &notes[start..];
        let end = rest
            .find(|c: char| c.is_whitespace())
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }
}

/// One page of contacts plus the continuation token for the next
/// incremental sync
#[derive(Debug, Clone, Default)]
pub struct ContactPage {
    pub contacts: Vec<ExternalContact>,
    pub next_sync_token: Option<String>,
}

/// Contract for the external contact provider
#[async_trait]
pub trait ContactSource: Send + Sync {
    /// List contacts. With a sync token, only changes since the last run
    /// come back; an expired token fails with `SyncTokenExpired`.
    async fn list(&self, sync_token: Option<&str>) -> Result<ContactPage>;

    /// Fetch one contact by uid
    async fn get(&self, uid: &str) -> Result<Option<ExternalContact>>;

    /// Create a contact; returns (uid, etag)
    async fn create(&self, contact: &ExternalContact) -> Result<(String, String)>;

    /// Update a contact. `if_match_etag` is mandatory; a stale tag fails
    /// with `ExternalConflict` and the caller must re-read. Returns the new
    /// etag.
    async fn update(
        &self,
        uid: &str,
        contact: &ExternalContact,
        if_match_etag: &str,
    ) -> Result<String>;
}

/// Timeout for a list call, proportional to the expected batch size
pub fn list_timeout(expected_contacts: usize) -> Duration {
    Duration::from_secs(60) + Duration::from_secs(2) * expected_contacts as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_internal_id() {
        let mut contact = ExternalContact {
            notes: Some("imported note\nmnemo-id:abc-123".to_string()),
            ..Default::default()
        };
        assert_eq!(contact.embedded_internal_id(), Some("abc-123"));

        contact.notes = Some("mnemo-id:xyz trailing words".to_string());
        assert_eq!(contact.embedded_internal_id(), Some("xyz"));

        contact.notes = Some("no marker here".to_string());
        assert_eq!(contact.embedded_internal_id(), None);

        contact.notes = None;
        assert_eq!(contact.embedded_internal_id(), None);
    }

    #[test]
    fn test_list_timeout_scales() {
        assert_eq!(list_timeout(0), Duration::from_secs(60));
        assert_eq!(list_timeout(30), Duration::from_secs(120));
    }
}
