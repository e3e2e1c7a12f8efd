//! Conflict detection and resolution for matched entity/contact pairs
//!
//! Three strategies: newest-wins, oldest-wins, and field-level merge. The
//! merge rules prefer the external value for fields the user most likely
//! edited in their contacts app (name, address), union multi-valued fields,
//! and always retain internal-only fields like importance.

use chrono::Utc;

use super::matcher::{normalize_email, normalize_name, normalize_phone};
use super::source::{ExternalContact, INTERNAL_ID_MARKER};
use crate::types::{
    ConflictStrategy, Entity, META_EXTERNAL_ETAG, META_EXTERNAL_UID,
};

/// Entity metadata key for merged-in secondary emails
pub const META_ALT_EMAILS: &str = "alternateEmails";
/// Entity metadata key for merged-in secondary phones
pub const META_ALT_PHONES: &str = "alternatePhones";
/// Entity metadata key for the postal address carried from the external side
pub const META_ADDRESS: &str = "address";

/// Fields compared for conflict detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncField {
    Name,
    Email,
    Phone,
    Organization,
}

/// Fields that differ between the two sides of a matched pair
pub fn conflicting_fields(entity: &Entity, contact: &ExternalContact) -> Vec<SyncField> {
    let mut conflicts = Vec::new();

    if normalize_name(&entity.name) != normalize_name(&contact.name) && !contact.name.is_empty() {
        conflicts.push(SyncField::Name);
    }

    let entity_email = entity.email.as_deref().map(normalize_email);
    let contact_email = contact.emails.first().map(|e| normalize_email(e));
    if entity_email != contact_email && (entity_email.is_some() || contact_email.is_some()) {
        conflicts.push(SyncField::Email);
    }

    let entity_phone = entity
        .phone
        .as_deref()
        .map(normalize_phone)
        .filter(|p| !p.is_empty());
    let contact_phone = contact
        .phones
        .first()
        .map(|p| normalize_phone(p))
        .filter(|p| !p.is_empty());
    if entity_phone != contact_phone && (entity_phone.is_some() || contact_phone.is_some()) {
        conflicts.push(SyncField::Phone);
    }

    let entity_org = entity.company.as_deref().unwrap_or("").trim().to_lowercase();
    let contact_org = contact
        .organization
        .as_deref()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    if entity_org != contact_org && (!entity_org.is_empty() || !contact_org.is_empty()) {
        conflicts.push(SyncField::Organization);
    }

    conflicts
}

/// What the resolver decided for one pair
#[derive(Debug, Clone)]
pub enum PairResolution {
    /// Nothing to write on either side
    Identical,
    /// Write the internal side
    UpdateEntity(Box<Entity>),
    /// Write the external side
    UpdateExternal(Box<ExternalContact>),
    /// Field-level merge: write both sides
    UpdateBoth {
        entity: Box<Entity>,
        contact: Box<ExternalContact>,
    },
}

/// Resolve a matched pair under the configured strategy
pub fn resolve_pair(
    entity: &Entity,
    contact: &ExternalContact,
    strategy: ConflictStrategy,
) -> PairResolution {
    let conflicts = conflicting_fields(entity, contact);

    if conflicts.is_empty() {
        // fields agree; still refresh the stored uid/etag if the external
        // side rewrote the record
        if entity.external_uid() != Some(contact.uid.as_str())
            || entity.external_etag() != Some(contact.etag.as_str())
        {
            let mut refreshed = entity.clone();
            stamp_external_ref(&mut refreshed, &contact.uid, &contact.etag);
            return PairResolution::UpdateEntity(Box::new(refreshed));
        }
        return PairResolution::Identical;
    }

    match strategy {
        ConflictStrategy::Newest => {
            if contact.updated_at > entity.updated_at {
                PairResolution::UpdateEntity(Box::new(apply_contact_to_entity(entity, contact)))
            } else {
                PairResolution::UpdateExternal(Box::new(contact_from_entity(entity, Some(contact))))
            }
        }
        ConflictStrategy::Oldest => {
            if contact.updated_at < entity.updated_at {
                PairResolution::UpdateEntity(Box::new(apply_contact_to_entity(entity, contact)))
            } else {
                PairResolution::UpdateExternal(Box::new(contact_from_entity(entity, Some(contact))))
            }
        }
        ConflictStrategy::Merge => {
            let (merged_entity, merged_contact) = merge_pair(entity, contact);
            PairResolution::UpdateBoth {
                entity: Box::new(merged_entity),
                contact: Box::new(merged_contact),
            }
        }
    }
}

fn stamp_external_ref(entity: &mut Entity, uid: &str, etag: &str) {
    entity
        .metadata
        .insert(META_EXTERNAL_UID.to_string(), serde_json::json!(uid));
    entity
        .metadata
        .insert(META_EXTERNAL_ETAG.to_string(), serde_json::json!(etag));
}

/// Overwrite an entity's synced fields from the external record
pub fn apply_contact_to_entity(entity: &Entity, contact: &ExternalContact) -> Entity {
    let mut updated = entity.clone();

    if !contact.name.is_empty() {
        updated.name = contact.name.clone();
    }
    if let Some(email) = contact.emails.first() {
        updated.email = Some(email.clone());
    }
    if let Some(phone) = contact.phones.first() {
        updated.phone = Some(phone.clone());
    }
    if let Some(ref org) = contact.organization {
        updated.company = Some(org.clone());
    }
    if let Some(ref title) = contact.title {
        updated.title = Some(title.clone());
    }
    if let Some(ref address) = contact.address {
        updated
            .metadata
            .insert(META_ADDRESS.to_string(), serde_json::json!(address));
    }
    stamp_external_ref(&mut updated, &contact.uid, &contact.etag);
    updated.updated_at = Utc::now();

    updated
}

/// Build the external representation of an entity.
///
/// `existing` carries the uid/etag/notes of the record being updated; pass
/// `None` when exporting a brand-new contact, which embeds the internal-id
/// marker so the next sync matches on UID.
pub fn contact_from_entity(entity: &Entity, existing: Option<&ExternalContact>) -> ExternalContact {
    let notes = match existing {
        Some(contact) => contact.notes.clone(),
        None => {
            let marker = format!("{}{}", INTERNAL_ID_MARKER, entity.id);
            match entity.notes.as_deref() {
                Some(n) if !n.is_empty() => Some(format!("{}\n{}", n, marker)),
                _ => Some(marker),
            }
        }
    };

    ExternalContact {
        uid: existing.map(|c| c.uid.clone()).unwrap_or_default(),
        etag: existing.map(|c| c.etag.clone()).unwrap_or_default(),
        name: entity.name.clone(),
        emails: entity.email.iter().cloned().collect(),
        phones: entity.phone.iter().cloned().collect(),
        organization: entity.company.clone(),
        title: entity.title.clone(),
        notes,
        address: existing.and_then(|c| c.address.clone()),
        updated_at: entity.updated_at,
    }
}

fn prefer_non_empty(external: Option<&str>, internal: Option<&str>) -> Option<String> {
    match external {
        Some(v) if !v.trim().is_empty() => Some(v.to_string()),
        _ => internal
            .filter(|v| !v.trim().is_empty())
            .map(|v| v.to_string()),
    }
}

fn union_values(primary: Option<&str>, extra: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut keys: std::collections::HashSet<String> = std::collections::HashSet::new();
    for value in primary.into_iter().map(str::to_string).chain(extra.iter().cloned()) {
        let key = value.trim().to_lowercase();
        if !key.is_empty() && keys.insert(key) {
            seen.push(value);
        }
    }
    seen
}

/// Field-level merge producing both sides
pub fn merge_pair(entity: &Entity, contact: &ExternalContact) -> (Entity, ExternalContact) {
    let mut merged_entity = entity.clone();

    // name and address: the user likely edited these in the contacts app
    if !contact.name.trim().is_empty() {
        merged_entity.name = contact.name.clone();
    }
    if let Some(ref address) = contact.address {
        merged_entity
            .metadata
            .insert(META_ADDRESS.to_string(), serde_json::json!(address));
    }

    // emails and phones: union of unique values; the entity keeps its
    // primary value and the rest land in metadata
    let emails = union_values(entity.email.as_deref(), &contact.emails);
    if merged_entity.email.is_none() {
        merged_entity.email = emails.first().cloned();
    }
    if emails.len() > 1 {
        merged_entity.metadata.insert(
            META_ALT_EMAILS.to_string(),
            serde_json::json!(emails[1..].to_vec()),
        );
    }

    let phones = union_values(entity.phone.as_deref(), &contact.phones);
    if merged_entity.phone.is_none() {
        merged_entity.phone = phones.first().cloned();
    }
    if phones.len() > 1 {
        merged_entity.metadata.insert(
            META_ALT_PHONES.to_string(),
            serde_json::json!(phones[1..].to_vec()),
        );
    }

    // organization and title: prefer non-empty
    merged_entity.company =
        prefer_non_empty(contact.organization.as_deref(), entity.company.as_deref());
    merged_entity.title = prefer_non_empty(contact.title.as_deref(), entity.title.as_deref());

    // notes: concatenate when distinct
    let contact_notes = contact.notes.as_deref().unwrap_or("").trim();
    match merged_entity.notes.as_deref().map(str::trim) {
        Some(existing) if !contact_notes.is_empty() && existing != contact_notes => {
            merged_entity.notes = Some(format!("{}\n{}", existing, contact_notes));
        }
        None | Some("") if !contact_notes.is_empty() => {
            merged_entity.notes = Some(contact_notes.to_string());
        }
        _ => {}
    }

    // importance, tags and the rest of metadata are internal-only: retained
    stamp_external_ref(&mut merged_entity, &contact.uid, &contact.etag);
    merged_entity.updated_at = Utc::now();

    let merged_contact = ExternalContact {
        uid: contact.uid.clone(),
        etag: contact.etag.clone(),
        name: merged_entity.name.clone(),
        emails,
        phones,
        organization: merged_entity.company.clone(),
        title: merged_entity.title.clone(),
        notes: contact.notes.clone(),
        address: contact.address.clone(),
        updated_at: Utc::now(),
    };

    (merged_entity, merged_contact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityType, Importance};
    use chrono::Duration;
    use std::collections::HashMap;

    fn entity(name: &str, email: Option<&str>) -> Entity {
        let now = Utc::now();
        Entity {
            id: "e1".to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            entity_type: EntityType::Person,
            description: None,
            company: None,
            title: None,
            email: email.map(String::from),
            phone: None,
            website: None,
            importance: Importance::High,
            tags: vec!["vip".to_string()],
            notes: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn contact(name: &str, emails: &[&str]) -> ExternalContact {
        ExternalContact {
            uid: "ext-1".to_string(),
            etag: "v2".to_string(),
            name: name.to_string(),
            emails: emails.iter().map(|s| s.to_string()).collect(),
            updated_at: Utc::now(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_conflict_when_identical() {
        let mut e = entity("John Smith", Some("john@acme.com"));
        let c = contact("John Smith", &["john@acme.com"]);
        assert!(conflicting_fields(&e, &c).is_empty());

        // identical fields but missing etag metadata still triggers a refresh
        match resolve_pair(&e, &c, ConflictStrategy::Newest) {
            PairResolution::UpdateEntity(updated) => {
                assert_eq!(updated.external_etag(), Some("v2"));
                e = *updated;
            }
            other => panic!("expected refresh, got {:?}", other),
        }

        // with the refreshed metadata the pair is terminal
        assert!(matches!(
            resolve_pair(&e, &c, ConflictStrategy::Newest),
            PairResolution::Identical
        ));
    }

    #[test]
    fn test_newest_wins_external_newer() {
        let mut e = entity("John Smith", Some("john@acme.com"));
        e.updated_at = Utc::now() - Duration::days(10);
        let c = contact("John Smith", &["john.smith@acme.com"]);

        match resolve_pair(&e, &c, ConflictStrategy::Newest) {
            PairResolution::UpdateEntity(updated) => {
                assert_eq!(updated.email.as_deref(), Some("john.smith@acme.com"));
                assert_eq!(updated.external_etag(), Some("v2"));
            }
            other => panic!("expected entity update, got {:?}", other),
        }
    }

    #[test]
    fn test_newest_wins_internal_newer() {
        let e = entity("John Smith", Some("john@acme.com"));
        let mut c = contact("John Smith", &["old@acme.com"]);
        c.updated_at = Utc::now() - Duration::days(10);

        match resolve_pair(&e, &c, ConflictStrategy::Newest) {
            PairResolution::UpdateExternal(pushed) => {
                assert_eq!(pushed.emails, vec!["john@acme.com"]);
                assert_eq!(pushed.uid, "ext-1");
                assert_eq!(pushed.etag, "v2");
            }
            other => panic!("expected external update, got {:?}", other),
        }
    }

    #[test]
    fn test_oldest_wins_is_symmetric() {
        let mut e = entity("John Smith", Some("john@acme.com"));
        e.updated_at = Utc::now() - Duration::days(10);
        let c = contact("John Smith", &["newer@acme.com"]);

        // entity is older, so it wins under oldest
        assert!(matches!(
            resolve_pair(&e, &c, ConflictStrategy::Oldest),
            PairResolution::UpdateExternal(_)
        ));
    }

    #[test]
    fn test_merge_unions_emails_and_keeps_internal_fields() {
        let e = entity("John Smith", Some("john@acme.com"));
        let mut c = contact("J. Smith", &["jsmith@acme.com"]);
        c.organization = Some("Acme Corporation".to_string());

        match resolve_pair(&e, &c, ConflictStrategy::Merge) {
            PairResolution::UpdateBoth { entity, contact } => {
                // external name preferred
                assert_eq!(entity.name, "J. Smith");
                // primary email retained, alternate recorded
                assert_eq!(entity.email.as_deref(), Some("john@acme.com"));
                assert_eq!(
                    entity.metadata.get(META_ALT_EMAILS),
                    Some(&serde_json::json!(["jsmith@acme.com"]))
                );
                // internal-only fields retained
                assert_eq!(entity.importance, Importance::High);
                assert_eq!(entity.tags, vec!["vip".to_string()]);
                // contact side carries the union
                assert_eq!(contact.emails.len(), 2);
                assert_eq!(contact.organization.as_deref(), Some("Acme Corporation"));
            }
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_concatenates_distinct_notes() {
        let mut e = entity("N", None);
        e.notes = Some("internal note".to_string());
        let mut c = contact("N", &[]);
        c.notes = Some("external note".to_string());

        let (merged, _) = merge_pair(&e, &c);
        assert_eq!(merged.notes.as_deref(), Some("internal note\nexternal note"));

        // identical notes are not duplicated
        let mut c2 = contact("N", &[]);
        c2.notes = Some("internal note".to_string());
        let (merged2, _) = merge_pair(&e, &c2);
        assert_eq!(merged2.notes.as_deref(), Some("internal note"));
    }

    #[test]
    fn test_export_embeds_internal_marker() {
        let e = entity("Fresh", Some("fresh@acme.com"));
        let exported = contact_from_entity(&e, None);
        assert!(exported
            .notes
            .as_deref()
            .unwrap()
            .contains(&format!("{}e1", INTERNAL_ID_MARKER)));
        assert!(exported.uid.is_empty());
    }
}
