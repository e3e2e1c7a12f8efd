//! Bidirectional contact sync and deduplication
//!
//! Reconciles the internal person-entity store with an external contact
//! source in six phases: load, match, sync matched pairs, LLM dedup,
//! import new, export new. Each phase is idempotent; a full re-run against
//! unchanged data produces no writes.

pub mod dedup;
pub mod matcher;
pub mod merge;
pub mod source;

pub use dedup::{DuplicateJudge, DuplicateVerdict, OpenAiJudge};
pub use matcher::{MatchLevel, MatchOutcome, MatchPair};
pub use merge::PairResolution;
pub use source::{ContactPage, ContactSource, ExternalContact};

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::embedding::estimate_tokens;
use crate::error::{MnemoError, Result};
use crate::ledger::UsageLedger;
use crate::storage::{entity_queries, users, Storage};
use crate::types::{
    CreateEntityInput, Entity, EntityType, Provider, SyncConfig, UsageRecord, META_EXTERNAL_ETAG,
    META_EXTERNAL_UID, META_LAST_SYNC_AT, META_SYNC_TOKEN,
};

/// Tag applied to entities created from external contacts
pub const IMPORTED_TAG: &str = "imported-from-external";

/// Expected page size used to scale the list-call timeout
const EXPECTED_PAGE_SIZE: usize = 100;

/// Per-pair state, as reported after a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PairState {
    /// Fields agree on both sides; nothing written
    Identical,
    /// Conflict resolved and written
    Resolved,
    /// Resolution failed; see the error list
    Error,
    /// LLM-confirmed duplicate, merged
    Merged,
    /// Duplicate candidate left for human review
    Review,
    /// Judged not a duplicate
    Rejected,
}

/// One per-pair failure; the phase carries on past it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairError {
    pub entity_id: Option<String>,
    pub contact_uid: Option<String>,
    pub message: String,
}

/// A duplicate candidate that was not auto-merged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewCandidate {
    pub entity_id: String,
    pub contact_uid: String,
    pub preliminary_score: u32,
    pub confidence: Option<u8>,
    pub reasoning: Option<String>,
}

/// Outcome of one matched or candidate pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairOutcome {
    pub entity_id: String,
    pub contact_uid: String,
    pub state: PairState,
}

/// Report for one sync run. Always carries the per-pair error list so
/// callers see partial success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    pub matched: i64,
    pub identical: i64,
    pub updated_internal: i64,
    pub updated_external: i64,
    pub created_internal: i64,
    pub created_external: i64,
    pub duplicates_found: i64,
    pub merged: i64,
    pub review: Vec<ReviewCandidate>,
    pub errors: Vec<PairError>,
    pub outcomes: Vec<PairOutcome>,
    pub dry_run: bool,
    pub cancelled: bool,
    pub incremental: bool,
    pub next_sync_token: Option<String>,
}

impl SyncReport {
    /// True when the run wrote (or would write) nothing
    pub fn is_clean(&self) -> bool {
        self.updated_internal == 0
            && self.updated_external == 0
            && self.created_internal == 0
            && self.created_external == 0
            && self.merged == 0
    }
}

/// Options for one sync run
#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Compute intent only; issue no writes
    pub dry_run: bool,
    /// Cooperative cancellation: the engine finishes the current pair,
    /// then stops with a partial report
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SyncOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// The sync engine
pub struct ContactSyncEngine {
    storage: Storage,
    source: Arc<dyn ContactSource>,
    judge: Option<Arc<dyn DuplicateJudge>>,
    ledger: UsageLedger,
    config: SyncConfig,
}

impl ContactSyncEngine {
    pub fn new(
        storage: Storage,
        contact_source: Arc<dyn ContactSource>,
        judge: Option<Arc<dyn DuplicateJudge>>,
        config: SyncConfig,
    ) -> Self {
        let ledger = UsageLedger::new(storage.clone());
        Self {
            storage,
            source: contact_source,
            judge,
            ledger,
            config,
        }
    }

    /// Run a full sync pass for one user
    pub async fn run(&self, user_id: &str, options: &SyncOptions) -> Result<SyncReport> {
        let user = self
            .storage
            .with_connection(|conn| users::get_user_by_id(conn, user_id))?
            .ok_or_else(|| MnemoError::NotFound(format!("user {}", user_id)))?;

        let stored_token = user
            .metadata
            .get(META_SYNC_TOKEN)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let mut report = SyncReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        // Phase 1: load both sides
        let entities = self.storage.with_connection(|conn| {
            entity_queries::list_entities(conn, user_id, Some(EntityType::Person), -1)
        })?;

        let (page, incremental) = self.list_contacts(stored_token.as_deref()).await?;
        report.incremental = incremental;
        report.next_sync_token = page.next_sync_token.clone();
        tracing::info!(
            user_id,
            entities = entities.len(),
            contacts = page.contacts.len(),
            incremental,
            "sync load phase complete"
        );

        // Phase 2: match cascade
        let outcome = matcher::match_contacts(entities, page.contacts);
        report.matched = outcome.pairs.len() as i64;

        // Phase 3: sync matched pairs
        for pair in &outcome.pairs {
            if options.cancelled() {
                report.cancelled = true;
                return Ok(report);
            }
            self.sync_pair(user_id, pair, options, &mut report).await;
        }

        // An incremental page only carries changed contacts, so the absence
        // of a match says nothing about the full address book. Dedup,
        // import and export only run on full passes.
        if !incremental {
            let (leftover_entities, leftover_contacts) = self
                .dedup_phase(
                    user_id,
                    outcome.unmatched_entities,
                    outcome.unmatched_contacts,
                    options,
                    &mut report,
                )
                .await;

            if report.cancelled {
                return Ok(report);
            }

            self.import_phase(user_id, leftover_contacts, options, &mut report);
            self.export_phase(user_id, leftover_entities, options, &mut report)
                .await;
        }

        // Persist progress for the next incremental pass
        if !options.dry_run {
            if let Some(ref token) = report.next_sync_token {
                self.storage.with_connection(|conn| {
                    users::set_user_metadata(conn, user_id, META_SYNC_TOKEN, serde_json::json!(token))
                })?;
            }
            self.storage.with_connection(|conn| {
                users::set_user_metadata(
                    conn,
                    user_id,
                    META_LAST_SYNC_AT,
                    serde_json::json!(chrono::Utc::now().to_rfc3339()),
                )
            })?;
        }

        tracing::info!(
            user_id,
            matched = report.matched,
            updated_internal = report.updated_internal,
            updated_external = report.updated_external,
            created_internal = report.created_internal,
            created_external = report.created_external,
            merged = report.merged,
            errors = report.errors.len(),
            dry_run = report.dry_run,
            "sync run complete"
        );

        Ok(report)
    }

    /// List contacts, falling back to a full list when the stored sync
    /// token has expired
    async fn list_contacts(&self, token: Option<&str>) -> Result<(ContactPage, bool)> {
        let timeout = source::list_timeout(EXPECTED_PAGE_SIZE);

        if let Some(token) = token {
            match tokio::time::timeout(timeout, self.source.list(Some(token)))
                .await
                .map_err(|_| MnemoError::Timeout("contact source list".to_string()))?
            {
                Ok(page) => return Ok((page, true)),
                Err(MnemoError::SyncTokenExpired) => {
                    tracing::warn!("sync token expired, falling back to full list");
                }
                Err(e) => return Err(e),
            }
        }

        let page = tokio::time::timeout(timeout, self.source.list(None))
            .await
            .map_err(|_| MnemoError::Timeout("contact source list".to_string()))??;
        Ok((page, false))
    }

    /// Phase 3 for one pair: detect conflict, resolve, write
    async fn sync_pair(
        &self,
        user_id: &str,
        pair: &MatchPair,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) {
        let resolution = merge::resolve_pair(&pair.entity, &pair.contact, self.config.conflict_strategy);

        let state = match resolution {
            PairResolution::Identical => {
                report.identical += 1;
                PairState::Identical
            }
            PairResolution::UpdateEntity(updated) => {
                report.updated_internal += 1;
                if options.dry_run {
                    PairState::Resolved
                } else {
                    match self
                        .storage
                        .with_connection(|conn| entity_queries::persist_entity(conn, &updated))
                    {
                        Ok(()) => PairState::Resolved,
                        Err(e) => {
                            report.updated_internal -= 1;
                            report.errors.push(PairError {
                                entity_id: Some(pair.entity.id.clone()),
                                contact_uid: Some(pair.contact.uid.clone()),
                                message: e.to_string(),
                            });
                            PairState::Error
                        }
                    }
                }
            }
            PairResolution::UpdateExternal(contact) => {
                report.updated_external += 1;
                if options.dry_run {
                    PairState::Resolved
                } else {
                    match self.push_external(user_id, &pair.entity, &contact).await {
                        Ok(()) => PairState::Resolved,
                        Err(e) => {
                            report.updated_external -= 1;
                            report.errors.push(PairError {
                                entity_id: Some(pair.entity.id.clone()),
                                contact_uid: Some(pair.contact.uid.clone()),
                                message: e.to_string(),
                            });
                            PairState::Error
                        }
                    }
                }
            }
            PairResolution::UpdateBoth { entity, contact } => {
                report.updated_internal += 1;
                report.updated_external += 1;
                if options.dry_run {
                    PairState::Resolved
                } else {
                    let internal = self
                        .storage
                        .with_connection(|conn| entity_queries::persist_entity(conn, &entity));
                    let external = self.push_external(user_id, &entity, &contact).await;
                    match (internal, external) {
                        (Ok(()), Ok(())) => PairState::Resolved,
                        (internal, external) => {
                            if internal.is_err() {
                                report.updated_internal -= 1;
                            }
                            if external.is_err() {
                                report.updated_external -= 1;
                            }
                            let message = internal
                                .err()
                                .map(|e| e.to_string())
                                .into_iter()
                                .chain(external.err().map(|e| e.to_string()))
                                .collect::<Vec<_>>()
                                .join("; ");
                            report.errors.push(PairError {
                                entity_id: Some(pair.entity.id.clone()),
                                contact_uid: Some(pair.contact.uid.clone()),
                                message,
                            });
                            PairState::Error
                        }
                    }
                }
            }
        };

        report.outcomes.push(PairOutcome {
            entity_id: pair.entity.id.clone(),
            contact_uid: pair.contact.uid.clone(),
            state,
        });
    }

    /// Update the external record with etag discipline: on a tag mismatch,
    /// re-read, refresh the tag, retry exactly once. The fresh etag is
    /// written back to the entity's metadata.
    async fn push_external(
        &self,
        user_id: &str,
        entity: &Entity,
        contact: &ExternalContact,
    ) -> Result<()> {
        let new_etag = match self
            .source
            .update(&contact.uid, contact, &contact.etag)
            .await
        {
            Ok(etag) => etag,
            Err(MnemoError::ExternalConflict(_)) => {
                let fresh = self
                    .source
                    .get(&contact.uid)
                    .await?
                    .ok_or_else(|| MnemoError::NotFound(format!("contact {}", contact.uid)))?;
                tracing::warn!(user_id, uid = %contact.uid, "etag conflict, retrying with fresh tag");
                self.source.update(&contact.uid, contact, &fresh.etag).await?
            }
            Err(e) => return Err(e),
        };

        let mut updated = entity.clone();
        updated
            .metadata
            .insert(META_EXTERNAL_UID.to_string(), serde_json::json!(contact.uid));
        updated
            .metadata
            .insert(META_EXTERNAL_ETAG.to_string(), serde_json::json!(new_etag));
        self.storage
            .with_connection(|conn| entity_queries::persist_entity(conn, &updated))
    }

    /// Phase 4: rule-gate cross pairs, ask the LLM, merge or queue for
    /// review. Returns the entities and contacts still unconsumed.
    async fn dedup_phase(
        &self,
        user_id: &str,
        entities: Vec<Entity>,
        contacts: Vec<ExternalContact>,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) -> (Vec<Entity>, Vec<ExternalContact>) {
        use std::collections::HashSet;

        let mut candidates: Vec<(usize, usize, u32)> = Vec::new();
        for (ei, entity) in entities.iter().enumerate() {
            for (ci, contact) in contacts.iter().enumerate() {
                let score = dedup::preliminary_score(entity, contact);
                if score > dedup::PRELIMINARY_SCORE_GATE {
                    candidates.push((ei, ci, score));
                }
            }
        }
        // strongest candidates first, so a contact is consumed by its best pair
        candidates.sort_by(|a, b| b.2.cmp(&a.2));

        let mut consumed_entities: HashSet<usize> = HashSet::new();
        let mut consumed_contacts: HashSet<usize> = HashSet::new();
        let mut llm_down = false;

        for (ei, ci, score) in candidates {
            if options.cancelled() {
                report.cancelled = true;
                break;
            }
            if consumed_entities.contains(&ei) || consumed_contacts.contains(&ci) {
                continue;
            }
            let entity = &entities[ei];
            let contact = &contacts[ci];

            let verdict = if self.config.enable_llm && !llm_down {
                match self.judge.as_deref() {
                    Some(judge) => {
                        tokio::time::sleep(Duration::from_millis(self.config.llm_call_delay_ms))
                            .await;
                        match self.judge_pair(user_id, judge, entity, contact).await {
                            Ok(v) => Some(v),
                            Err(e) => {
                                tracing::error!(
                                    error = %e,
                                    "duplicate judge unavailable, degrading to rule-only"
                                );
                                llm_down = true;
                                None
                            }
                        }
                    }
                    None => None,
                }
            } else {
                None
            };

            let state = match verdict {
                Some(v) if v.confidence as u16 >= self.config.dedup_threshold as u16 && v.is_duplicate => {
                    report.duplicates_found += 1;
                    if self.config.auto_merge {
                        let (merged, merged_contact) = merge::merge_pair(entity, contact);
                        report.merged += 1;
                        report.updated_internal += 1;
                        if !options.dry_run {
                            let write = match self
                                .storage
                                .with_connection(|conn| entity_queries::persist_entity(conn, &merged))
                            {
                                Ok(()) => self.push_external(user_id, &merged, &merged_contact).await,
                                Err(e) => Err(e),
                            };
                            if let Err(e) = write {
                                report.merged -= 1;
                                report.updated_internal -= 1;
                                report.errors.push(PairError {
                                    entity_id: Some(entity.id.clone()),
                                    contact_uid: Some(contact.uid.clone()),
                                    message: e.to_string(),
                                });
                                report.outcomes.push(PairOutcome {
                                    entity_id: entity.id.clone(),
                                    contact_uid: contact.uid.clone(),
                                    state: PairState::Error,
                                });
                                continue;
                            }
                        }
                        consumed_entities.insert(ei);
                        consumed_contacts.insert(ci);
                        PairState::Merged
                    } else {
                        report.review.push(ReviewCandidate {
                            entity_id: entity.id.clone(),
                            contact_uid: contact.uid.clone(),
                            preliminary_score: score,
                            confidence: Some(v.confidence),
                            reasoning: Some(v.reasoning),
                        });
                        // held back from import/export until reviewed
                        consumed_entities.insert(ei);
                        consumed_contacts.insert(ci);
                        PairState::Review
                    }
                }
                Some(v) if v.is_duplicate => {
                    // below threshold: never auto-merged, reported only
                    report.duplicates_found += 1;
                    report.review.push(ReviewCandidate {
                        entity_id: entity.id.clone(),
                        contact_uid: contact.uid.clone(),
                        preliminary_score: score,
                        confidence: Some(v.confidence),
                        reasoning: Some(v.reasoning),
                    });
                    consumed_entities.insert(ei);
                    consumed_contacts.insert(ci);
                    PairState::Review
                }
                Some(_) => PairState::Rejected,
                None => {
                    // rule-only mode: report, never merge
                    report.review.push(ReviewCandidate {
                        entity_id: entity.id.clone(),
                        contact_uid: contact.uid.clone(),
                        preliminary_score: score,
                        confidence: None,
                        reasoning: None,
                    });
                    consumed_entities.insert(ei);
                    consumed_contacts.insert(ci);
                    PairState::Review
                }
            };

            report.outcomes.push(PairOutcome {
                entity_id: entity.id.clone(),
                contact_uid: contact.uid.clone(),
                state,
            });
        }

        let leftover_entities = entities
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !consumed_entities.contains(i))
            .map(|(_, e)| e)
            .collect();
        let leftover_contacts = contacts
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !consumed_contacts.contains(i))
            .map(|(_, c)| c)
            .collect();

        (leftover_entities, leftover_contacts)
    }

    async fn judge_pair(
        &self,
        user_id: &str,
        judge: &dyn DuplicateJudge,
        entity: &Entity,
        contact: &ExternalContact,
    ) -> Result<DuplicateVerdict> {
        let left = serde_json::json!({
            "name": entity.name,
            "email": entity.email,
            "phone": entity.phone,
            "organization": entity.company,
            "title": entity.title,
        });
        let right = serde_json::json!({
            "name": contact.name,
            "emails": contact.emails,
            "phones": contact.phones,
            "organization": contact.organization,
            "title": contact.title,
        });

        let verdict = dedup::judge_with_retry(
            judge,
            &left,
            &right,
            self.config.max_retries,
            Duration::from_millis(self.config.retry_delay_ms),
        )
        .await?;

        let prompt_tokens =
            estimate_tokens(&format!("{}{}{}", dedup::JUDGE_SYSTEM_PROMPT, left, right)) as i64;
        self.ledger.append_best_effort(&UsageRecord::new(
            user_id,
            Provider::Llm,
            judge.model_name(),
            prompt_tokens,
            0.0,
            "dedup",
        ));

        Ok(verdict)
    }

    /// Phase 5: unmatched external contacts become new entities
    fn import_phase(
        &self,
        user_id: &str,
        contacts: Vec<ExternalContact>,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) {
        for contact in contacts {
            report.created_internal += 1;
            if options.dry_run {
                continue;
            }

            let mut metadata = std::collections::HashMap::new();
            metadata.insert(META_EXTERNAL_UID.to_string(), serde_json::json!(contact.uid));
            metadata.insert(
                META_EXTERNAL_ETAG.to_string(),
                serde_json::json!(contact.etag),
            );
            if let Some(ref address) = contact.address {
                metadata.insert(
                    merge::META_ADDRESS.to_string(),
                    serde_json::json!(address),
                );
            }

            let input = CreateEntityInput {
                name: contact.name.clone(),
                entity_type: EntityType::Person,
                email: contact.emails.first().cloned(),
                phone: contact.phones.first().cloned(),
                company: contact.organization.clone(),
                title: contact.title.clone(),
                notes: contact.notes.clone(),
                tags: vec![IMPORTED_TAG.to_string()],
                metadata,
                ..Default::default()
            };

            if let Err(e) = self
                .storage
                .with_connection(|conn| entity_queries::create_entity(conn, user_id, &input))
            {
                report.created_internal -= 1;
                report.errors.push(PairError {
                    entity_id: None,
                    contact_uid: Some(contact.uid.clone()),
                    message: e.to_string(),
                });
            }
        }
    }

    /// Phase 6: unmatched entities become new external records, with the
    /// created uid/etag written back to the entity
    async fn export_phase(
        &self,
        user_id: &str,
        entities: Vec<Entity>,
        options: &SyncOptions,
        report: &mut SyncReport,
    ) {
        tracing::debug!(user_id, count = entities.len(), "export phase");
        for entity in entities {
            if options.cancelled() {
                report.cancelled = true;
                return;
            }
            report.created_external += 1;
            if options.dry_run {
                continue;
            }

            let contact = merge::contact_from_entity(&entity, None);
            match self.source.create(&contact).await {
                Ok((uid, etag)) => {
                    let mut updated = entity.clone();
                    updated
                        .metadata
                        .insert(META_EXTERNAL_UID.to_string(), serde_json::json!(uid));
                    updated
                        .metadata
                        .insert(META_EXTERNAL_ETAG.to_string(), serde_json::json!(etag));
                    if let Err(e) = self
                        .storage
                        .with_connection(|conn| entity_queries::persist_entity(conn, &updated))
                    {
                        report.errors.push(PairError {
                            entity_id: Some(entity.id.clone()),
                            contact_uid: Some(uid),
                            message: e.to_string(),
                        });
                    }
                }
                Err(e) => {
                    report.created_external -= 1;
                    report.errors.push(PairError {
                        entity_id: Some(entity.id.clone()),
                        contact_uid: None,
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}
