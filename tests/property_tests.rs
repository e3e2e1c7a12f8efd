//! Property-based tests
//!
//! Invariants that must hold for all inputs: parsers never panic,
//! normalizers are idempotent, scores stay in range, ranking is monotonic.
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;

// ============================================================================
// QUERY PARSING
// ============================================================================

mod query_parsing {
    use super::*;
    use mnemo::search::{parse_query, ParsedQuery};

    proptest! {
        /// parse_query never panics on any string input
        #[test]
        fn never_panics(s in ".*") {
            let _ = parse_query(&s);
        }

        /// Whitespace-only input is always the empty query
        #[test]
        fn blank_is_empty(s in "[ \t\r\n]*") {
            prop_assert_eq!(parse_query(&s), ParsedQuery::Empty);
        }

        /// A well-formed field:value token always parses as metadata
        #[test]
        fn field_value_is_metadata(
            field in "[A-Za-z_][A-Za-z0-9_]{0,20}",
            value in "[a-zA-Z0-9.-]{1,20}",
        ) {
            let query = format!("{}:{}", field, value);
            match parse_query(&query) {
                ParsedQuery::Metadata { value: parsed, .. } => prop_assert_eq!(parsed, value),
                other => prop_assert!(false, "expected metadata, got {:?}", other),
            }
        }

        /// Queries containing spaces never parse as metadata
        #[test]
        fn spaced_text_stays_text(a in "[a-z]{1,10}", b in "[a-z]{1,10}") {
            let query = format!("{} {}", a, b);
            prop_assert_eq!(parse_query(&query), ParsedQuery::Text(query.clone()));
        }
    }
}

// ============================================================================
// IMPORTANCE NORMALIZATION
// ============================================================================

mod importance {
    use super::*;
    use mnemo::types::Importance;

    proptest! {
        /// Any finite float normalizes into 1..=4
        #[test]
        fn always_in_range(v in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
            let level = Importance::from_f64(v).as_int();
            prop_assert!((1..=4).contains(&level));
        }

        /// Normalization is idempotent over the integer representation
        #[test]
        fn idempotent(v in -1000i64..1000) {
            let once = Importance::from_int(v);
            let twice = Importance::from_int(once.as_int());
            prop_assert_eq!(once, twice);
        }

        /// The legacy 0..1 scale is monotonic
        #[test]
        fn legacy_scale_monotonic(a in 0.0f64..1.0, b in 0.0f64..1.0) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(Importance::from_f64(lo) <= Importance::from_f64(hi));
        }
    }
}

// ============================================================================
// SIMILARITY AND RANKING
// ============================================================================

mod similarity {
    use super::*;
    use mnemo::embedding::{cosine_similarity, rank_by_similarity};

    proptest! {
        /// Cosine similarity stays within [-1, 1] (plus float slack)
        #[test]
        fn bounded(v in proptest::collection::vec(-100.0f32..100.0, 1..64)) {
            let w: Vec<f32> = v.iter().rev().cloned().collect();
            let sim = cosine_similarity(&v, &w);
            prop_assert!((-1.0001..=1.0001).contains(&sim));
        }

        /// A vector is maximally similar to itself (when non-zero)
        #[test]
        fn self_similarity(v in proptest::collection::vec(-100.0f32..100.0, 1..64)) {
            prop_assume!(v.iter().any(|&x| x != 0.0));
            let sim = cosine_similarity(&v, &v);
            prop_assert!((sim - 1.0).abs() < 0.001);
        }

        /// Ranked output is sorted descending and respects the threshold
        #[test]
        fn ranked_sorted_and_filtered(
            vectors in proptest::collection::vec(
                proptest::collection::vec(-1.0f32..1.0, 8),
                0..20,
            ),
            threshold in 0.0f32..1.0,
        ) {
            let query = vec![1.0f32, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
            let candidates: Vec<(usize, Vec<f32>)> =
                vectors.into_iter().enumerate().collect();
            let ranked = rank_by_similarity(&query, candidates, threshold, 50);

            for window in ranked.windows(2) {
                prop_assert!(window[0].0 >= window[1].0);
            }
            for (similarity, _) in &ranked {
                prop_assert!(*similarity >= threshold);
            }
        }

        /// Truncation honors the limit
        #[test]
        fn limit_honored(
            count in 0usize..30,
            limit in 0usize..10,
        ) {
            let query = vec![1.0f32, 0.0];
            let candidates: Vec<(usize, Vec<f32>)> =
                (0..count).map(|i| (i, vec![1.0, i as f32 * 0.01])).collect();
            let ranked = rank_by_similarity(&query, candidates, 0.0, limit);
            prop_assert!(ranked.len() <= limit);
        }
    }
}

// ============================================================================
// TEMPORAL DECAY
// ============================================================================

mod decay {
    use super::*;
    use mnemo::search::temporal_decay;

    proptest! {
        /// Decay stays within [0.1, 1.0] for any age
        #[test]
        fn bounded(age in 0.0f64..1.0e9) {
            let d = temporal_decay(age);
            prop_assert!((0.1..=1.0).contains(&d));
        }

        /// Decay is monotonically non-increasing
        #[test]
        fn monotonic(a in 0.0f64..1.0e6, b in 0.0f64..1.0e6) {
            let (young, old) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(temporal_decay(young) >= temporal_decay(old));
        }

        /// Negative ages clamp rather than blow up
        #[test]
        fn negative_age_clamps(age in -1.0e6f64..0.0) {
            prop_assert_eq!(temporal_decay(age), 1.0);
        }
    }
}

// ============================================================================
// CONTACT NORMALIZATION AND DEDUP SCORING
// ============================================================================

mod contact_matching {
    use super::*;
    use chrono::Utc;
    use mnemo::sync::dedup::{parse_verdict, preliminary_score};
    use mnemo::sync::matcher::{normalize_email, normalize_name, normalize_phone};
    use mnemo::sync::source::ExternalContact;
    use mnemo::types::{Entity, EntityType, Importance};
    use std::collections::HashMap;

    fn entity(name: &str, email: Option<String>, phone: Option<String>) -> Entity {
        let now = Utc::now();
        Entity {
            id: "e".to_string(),
            user_id: "u".to_string(),
            name: name.to_string(),
            entity_type: EntityType::Person,
            description: None,
            company: None,
            title: None,
            email,
            phone,
            website: None,
            importance: Importance::Medium,
            tags: vec![],
            notes: None,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    proptest! {
        /// Phone normalization keeps digits only and is idempotent
        #[test]
        fn phone_digits_only(s in "\\PC{0,30}") {
            let normalized = normalize_phone(&s);
            prop_assert!(normalized.chars().all(|c| c.is_ascii_digit()));
            prop_assert_eq!(normalize_phone(&normalized), normalized);
        }

        /// Email normalization is idempotent and case-collapsing
        #[test]
        fn email_idempotent(s in "[ -~]{0,40}") {
            let once = normalize_email(&s);
            prop_assert_eq!(normalize_email(&once), once.clone());
            prop_assert_eq!(normalize_email(&s.to_uppercase()), once);
        }

        /// Name normalization collapses interior whitespace
        #[test]
        fn name_no_double_spaces(s in "\\PC{0,40}") {
            let normalized = normalize_name(&s);
            prop_assert!(!normalized.contains("  "));
            prop_assert_eq!(normalize_name(&normalized), normalized);
        }

        /// Scoring never panics on arbitrary field contents
        #[test]
        fn score_never_panics(
            name_a in "\\PC{0,30}",
            name_b in "\\PC{0,30}",
            email in proptest::option::of("[a-z]{1,8}@[a-z]{1,8}\\.[a-z]{2,3}"),
            phone in proptest::option::of("[0-9 ()-]{0,15}"),
        ) {
            let e = entity(&name_a, email, phone);
            let c = ExternalContact {
                uid: "c".to_string(),
                etag: "v".to_string(),
                name: name_b,
                updated_at: Utc::now(),
                ..Default::default()
            };
            let _ = preliminary_score(&e, &c);
        }

        /// An identical, fully-populated record always clears the LLM gate
        #[test]
        fn identical_records_clear_gate(
            name in "[A-Z][a-z]{2,8} [A-Z][a-z]{2,8}",
            local in "[a-z]{2,8}",
            domain in "[a-z]{2,8}\\.com",
            digits in "[0-9]{10}",
        ) {
            let email = format!("{}@{}", local, domain);
            let e = entity(&name, Some(email.clone()), Some(digits.clone()));
            let c = ExternalContact {
                uid: "c".to_string(),
                etag: "v".to_string(),
                name,
                emails: vec![email],
                phones: vec![digits],
                updated_at: Utc::now(),
                ..Default::default()
            };
            prop_assert!(preliminary_score(&e, &c) > mnemo::sync::dedup::PRELIMINARY_SCORE_GATE);
        }

        /// Verdict parsing never panics and any accepted confidence is 0..=100
        #[test]
        fn verdict_parse_total(s in "\\PC{0,200}") {
            if let Ok(verdict) = parse_verdict(&s) {
                prop_assert!(verdict.confidence <= 100);
            }
        }
    }
}

// ============================================================================
// FIELD-ALIAS LAYER
// ============================================================================

mod alias_layer {
    use super::*;
    use mnemo::storage::canonicalize_memory_fields;
    use std::collections::HashMap;

    proptest! {
        /// Canonicalization removes the legacy keys for any metadata contents
        #[test]
        fn legacy_keys_always_removed(
            title in "\\PC{0,20}",
            legacy_title in "\\PC{0,20}",
            other_key in "[a-z]{1,10}",
        ) {
            let mut t = title;
            let mut c = String::new();
            let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
            metadata.insert("description".to_string(), serde_json::json!(legacy_title));
            metadata.insert(other_key.clone(), serde_json::json!("kept"));

            canonicalize_memory_fields(&mut t, &mut c, &mut metadata);

            prop_assert!(!metadata.contains_key("description"));
            prop_assert!(!metadata.contains_key("details"));
            if other_key != "description" && other_key != "details" {
                prop_assert!(metadata.contains_key(&other_key));
            }
        }
    }
}
