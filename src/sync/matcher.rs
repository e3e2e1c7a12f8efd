//! Contact matching cascade
//!
//! Pairs internal person-entities with external contacts by a four-level
//! cascade: UID, then email, then phone, then name. A given entity or
//! contact participates in at most one match; the first level to claim it
//! wins.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::source::ExternalContact;
use crate::types::Entity;

/// Which cascade level produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchLevel {
    Uid,
    Email,
    Phone,
    Name,
}

impl MatchLevel {
    /// Confidence annotation for the level
    pub fn confidence(&self) -> f32 {
        match self {
            MatchLevel::Uid => 1.0,
            MatchLevel::Email => 0.95,
            MatchLevel::Phone => 0.90,
            MatchLevel::Name => 0.70,
        }
    }
}

/// A matched entity/contact pair
#[derive(Debug, Clone)]
pub struct MatchPair {
    pub entity: Entity,
    pub contact: ExternalContact,
    pub level: MatchLevel,
    pub confidence: f32,
}

/// Result of the matching phase
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub pairs: Vec<MatchPair>,
    pub unmatched_entities: Vec<Entity>,
    pub unmatched_contacts: Vec<ExternalContact>,
}

/// Lowercased, trimmed email for comparison
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Digits-only phone for comparison
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Lowercased name with collapsed whitespace
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn entity_matches(level: MatchLevel, entity: &Entity, contact: &ExternalContact) -> bool {
    match level {
        MatchLevel::Uid => match entity.external_uid() {
            Some(uid) => uid == contact.uid,
            // fall back to the internal-id marker a previous export embedded
            None => contact.embedded_internal_id() == Some(entity.id.as_str()),
        },
        MatchLevel::Email => match entity.email.as_deref() {
            Some(email) if !email.trim().is_empty() => {
                let normalized = normalize_email(email);
                contact.emails.iter().any(|e| normalize_email(e) == normalized)
            }
            _ => false,
        },
        MatchLevel::Phone => match entity.phone.as_deref() {
            Some(phone) => {
                let normalized = normalize_phone(phone);
                !normalized.is_empty()
                    && contact.phones.iter().any(|p| normalize_phone(p) == normalized)
            }
            None => false,
        },
        MatchLevel::Name => {
            let normalized = normalize_name(&entity.name);
            !normalized.is_empty() && normalize_name(&contact.name) == normalized
        }
    }
}

/// Run the cascade over all entities and contacts
pub fn match_contacts(entities: Vec<Entity>, contacts: Vec<ExternalContact>) -> MatchOutcome {
    let mut pairs = Vec::new();
    let mut matched_entities: HashSet<usize> = HashSet::new();
    let mut matched_contacts: HashSet<usize> = HashSet::new();

    for level in [
        MatchLevel::Uid,
        MatchLevel::Email,
        MatchLevel::Phone,
        MatchLevel::Name,
    ] {
        for (ei, entity) in entities.iter().enumerate() {
            if matched_entities.contains(&ei) {
                continue;
            }
            let hit = contacts.iter().enumerate().find(|&(ci, contact)| {
                !matched_contacts.contains(&ci) && entity_matches(level, entity, contact)
            });
            if let Some((ci, contact)) = hit {
                matched_entities.insert(ei);
                matched_contacts.insert(ci);
                pairs.push(MatchPair {
                    entity: entity.clone(),
                    contact: contact.clone(),
                    level,
                    confidence: level.confidence(),
                });
            }
        }
    }

    let unmatched_entities = entities
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !matched_entities.contains(i))
        .map(|(_, e)| e)
        .collect();
    let unmatched_contacts = contacts
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !matched_contacts.contains(i))
        .map(|(_, c)| c)
        .collect();

    MatchOutcome {
        pairs,
        unmatched_entities,
        unmatched_contacts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityType, Importance, META_EXTERNAL_UID};
    use chrono::Utc;
    use std::collections::HashMap;

    fn entity(name: &str, email: Option<&str>, phone: Option<&str>) -> Entity {
        let now = Utc::now();
        Entity {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "u1".to_string(),
            name: name.to_string(),
            entity_type: EntityType::Person,
            description: None,
            company: None,
            title: None,
            email: email.map(String::from),
            phone: phone.map(String::from),
            website: None,
            importance: Importance::Medium,
            tags: vec![],
            notes: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn contact(uid: &str, name: &str, emails: &[&str], phones: &[&str]) -> ExternalContact {
        ExternalContact {
            uid: uid.to_string(),
            etag: "v1".to_string(),
            name: name.to_string(),
            emails: emails.iter().map(|s| s.to_string()).collect(),
            phones: phones.iter().map(|s| s.to_string()).collect(),
            updated_at: Utc::now(),
            ..Default::default()
        }
    }

    #[test]
    fn test_uid_match_wins() {
        let mut e = entity("John Smith", Some("john@acme.com"), None);
        e.metadata
            .insert(META_EXTERNAL_UID.to_string(), serde_json::json!("ext-42"));
        // uid points at a contact with a different email; the uid level
        // claims it before the email level can see the other contact
        let c1 = contact("ext-42", "Johnny", &["johnny@acme.com"], &[]);
        let c2 = contact("ext-99", "Other", &["john@acme.com"], &[]);

        let outcome = match_contacts(vec![e], vec![c1, c2]);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].level, MatchLevel::Uid);
        assert_eq!(outcome.pairs[0].confidence, 1.0);
        assert_eq!(outcome.pairs[0].contact.uid, "ext-42");
        assert_eq!(outcome.unmatched_contacts.len(), 1);
    }

    #[test]
    fn test_email_match_case_insensitive() {
        let e = entity("J. Smith", Some("John@Acme.COM"), None);
        let c = contact("ext-1", "John Smith", &["john@acme.com"], &[]);

        let outcome = match_contacts(vec![e], vec![c]);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].level, MatchLevel::Email);
        assert!((outcome.pairs[0].confidence - 0.95).abs() < f32::EPSILON);
    }

    #[test]
    fn test_phone_match_normalized() {
        let e = entity("Someone", None, Some("(555) 123-4567"));
        let c = contact("ext-1", "Different Name", &[], &["555-123-4567"]);

        let outcome = match_contacts(vec![e], vec![c]);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].level, MatchLevel::Phone);
    }

    #[test]
    fn test_name_match_last_resort() {
        let e = entity("Jane  Doe", None, None);
        let c = contact("ext-1", "jane doe", &[], &[]);

        let outcome = match_contacts(vec![e], vec![c]);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].level, MatchLevel::Name);
        assert!((outcome.pairs[0].confidence - 0.70).abs() < f32::EPSILON);
    }

    #[test]
    fn test_at_most_one_match_per_side() {
        // two entities with the same email; only one can claim the contact
        let e1 = entity("A", Some("shared@acme.com"), None);
        let e2 = entity("B", Some("shared@acme.com"), None);
        let c = contact("ext-1", "Shared", &["shared@acme.com"], &[]);

        let outcome = match_contacts(vec![e1, e2], vec![c]);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.unmatched_entities.len(), 1);
        assert!(outcome.unmatched_contacts.is_empty());
    }

    #[test]
    fn test_exported_marker_matches_as_uid() {
        let e = entity("Exported", None, None);
        let mut c = contact("ext-7", "Renamed In App", &[], &[]);
        c.notes = Some(format!("{}{}", super::super::source::INTERNAL_ID_MARKER, e.id));

        let outcome = match_contacts(vec![e], vec![c]);
        assert_eq!(outcome.pairs.len(), 1);
        assert_eq!(outcome.pairs[0].level, MatchLevel::Uid);
    }

    #[test]
    fn test_unmatched_carried_forward() {
        let e = entity("Nobody", None, None);
        let c = contact("ext-1", "Stranger", &[], &[]);

        let outcome = match_contacts(vec![e], vec![c]);
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.unmatched_entities.len(), 1);
        assert_eq!(outcome.unmatched_contacts.len(), 1);
    }
}
