//! Memory Core: the user-facing API surface
//!
//! Every method takes an authenticated `user_id` and forwards it down. The
//! write path embeds best-effort: a provider failure never fails the write,
//! the memory is persisted without an embedding and the repair pass picks
//! it up later.

use std::sync::Arc;
use std::time::Duration;

use crate::embedding::EmbeddingService;
use crate::error::{MnemoError, Result};
use crate::ledger::UsageLedger;
use crate::search::RetrievalEngine;
use crate::storage::{entity_queries, interaction_queries, queries, Storage};
use crate::types::*;

/// Coverage below which statistics carry a repair recommendation
const HEALTHY_COVERAGE_PERCENT: f32 = 90.0;

/// The core service wrapping storage, embeddings and the usage ledger
pub struct MemoryCore {
    storage: Storage,
    embedding: Arc<EmbeddingService>,
    retrieval: RetrievalEngine,
    ledger: UsageLedger,
}

impl MemoryCore {
    pub fn new(storage: Storage, embedding: Arc<EmbeddingService>, config: &MnemoConfig) -> Self {
        let retrieval = RetrievalEngine::new(
            storage.clone(),
            embedding.clone(),
            config.search.clone(),
        );
        let ledger = UsageLedger::new(storage.clone());

        Self {
            storage,
            embedding,
            retrieval,
            ledger,
        }
    }

    /// Underlying storage handle (shared by the sync engine)
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // ------------------------------------------------------------------
    // Memories
    // ------------------------------------------------------------------

    /// Store a memory, embedding it best-effort
    pub async fn store_memory(&self, user_id: &str, input: &CreateMemoryInput) -> Result<Memory> {
        if input.title.trim().is_empty() && input.content.trim().is_empty() {
            return Err(MnemoError::InvalidArgument(
                "memory needs a title or content".to_string(),
            ));
        }

        let mut memory = self
            .storage
            .with_connection(|conn| queries::create_memory(conn, user_id, input))?;

        memory.has_embedding = self.embed_best_effort(&memory).await;
        tracing::info!(user_id, memory_id = %memory.id, embedded = memory.has_embedding, "memory stored");

        Ok(memory)
    }

    /// Update a memory; text changes invalidate and regenerate the embedding
    pub async fn update_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        patch: &MemoryPatch,
    ) -> Result<Memory> {
        let mut memory = self
            .storage
            .with_connection(|conn| queries::update_memory(conn, user_id, memory_id, patch))?;

        if patch.touches_embedded_text() {
            self.storage
                .with_connection(|conn| queries::clear_embedding(conn, memory_id))?;
            memory.has_embedding = self.embed_best_effort(&memory).await;
        }

        Ok(memory)
    }

    /// Hard-delete a memory
    pub fn delete_memory(&self, user_id: &str, memory_id: &str) -> Result<()> {
        self.storage
            .with_connection(|conn| queries::delete_memory(conn, user_id, memory_id))
    }

    /// Get a memory; cross-tenant ids resolve to `None`
    pub fn get_memory(&self, user_id: &str, memory_id: &str) -> Result<Option<Memory>> {
        self.storage
            .with_connection(|conn| queries::get_memory(conn, user_id, memory_id))
    }

    /// Hybrid search over the user's memories
    pub async fn search_memories(
        &self,
        user_id: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        self.retrieval.search(user_id, query, options).await
    }

    /// Search memories, entities and interactions together
    pub async fn unified_search(
        &self,
        user_id: &str,
        query: &str,
        options: &SearchOptions,
        entity_types: Option<&[EntityType]>,
    ) -> Result<UnifiedSearchResponse> {
        self.retrieval
            .unified_search(user_id, query, options, entity_types)
            .await
    }

    async fn embed_best_effort(&self, memory: &Memory) -> bool {
        let text = memory.embedding_text();
        match self.embedding.embed(&text, &memory.user_id).await {
            Ok(outcome) => {
                let stored = self.storage.with_connection(|conn| {
                    queries::put_embedding(
                        conn,
                        &memory.id,
                        &outcome.vector,
                        self.embedding.model_name(),
                    )
                });
                match stored {
                    Ok(()) => true,
                    Err(e) => {
                        // the vector is discarded; repair regenerates it
                        tracing::warn!(memory_id = %memory.id, error = %e, "embedding store failed");
                        false
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    memory_id = %memory.id,
                    error = %e,
                    "embedding failed, memory persisted without vector"
                );
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Entities
    // ------------------------------------------------------------------

    pub fn store_entity(&self, user_id: &str, input: &CreateEntityInput) -> Result<Entity> {
        self.storage
            .with_connection(|conn| entity_queries::create_entity(conn, user_id, input))
    }

    pub fn update_entity(
        &self,
        user_id: &str,
        entity_id: &str,
        patch: &EntityPatch,
    ) -> Result<Entity> {
        self.storage
            .with_connection(|conn| entity_queries::update_entity(conn, user_id, entity_id, patch))
    }

    pub fn delete_entity(&self, user_id: &str, entity_id: &str) -> Result<()> {
        self.storage
            .with_connection(|conn| entity_queries::delete_entity(conn, user_id, entity_id))
    }

    pub fn get_entity(&self, user_id: &str, entity_id: &str) -> Result<Option<Entity>> {
        self.storage
            .with_connection(|conn| entity_queries::get_entity(conn, user_id, entity_id))
    }

    pub fn search_entities(&self, user_id: &str, query: &str, limit: i64) -> Result<Vec<Entity>> {
        self.storage.with_connection(|conn| {
            entity_queries::search_entities_by_text(conn, user_id, query, limit)
        })
    }

    pub fn list_entities(
        &self,
        user_id: &str,
        entity_type: Option<EntityType>,
        limit: i64,
    ) -> Result<Vec<Entity>> {
        self.storage
            .with_connection(|conn| entity_queries::list_entities(conn, user_id, entity_type, limit))
    }

    /// Resolve a memory's entity references, skipping dangling ids
    pub fn resolve_entities(&self, user_id: &str, memory: &Memory) -> Result<Vec<Entity>> {
        self.storage.with_connection(|conn| {
            let mut entities = Vec::new();
            for entity_id in &memory.entity_ids {
                if let Some(entity) = entity_queries::get_entity(conn, user_id, entity_id)? {
                    entities.push(entity);
                }
            }
            Ok(entities)
        })
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    pub fn log_interaction(
        &self,
        user_id: &str,
        agent_name: &str,
        content: &str,
        context: Option<&str>,
        metadata: &std::collections::HashMap<String, serde_json::Value>,
    ) -> Result<Interaction> {
        self.storage.with_connection(|conn| {
            interaction_queries::create_interaction(
                conn, user_id, agent_name, content, context, metadata,
            )
        })
    }

    pub fn recent_interactions(&self, user_id: &str, limit: i64) -> Result<Vec<Interaction>> {
        self.storage
            .with_connection(|conn| interaction_queries::list_recent_interactions(conn, user_id, limit))
    }

    // ------------------------------------------------------------------
    // Statistics and embedding lifecycle
    // ------------------------------------------------------------------

    /// Per-user counts plus vector-search health
    pub fn get_statistics(&self, user_id: &str) -> Result<Statistics> {
        self.storage.with_connection(|conn| {
            let memory_count = queries::count_memories(conn, user_id)?;
            let with_embedding = queries::count_memories_with_embedding(conn, user_id)?;
            let entity_count = entity_queries::count_entities(conn, user_id)?;
            let interaction_count = interaction_queries::count_interactions(conn, user_id)?;
            let type_counts = queries::memory_type_counts(conn, user_id)?;

            let coverage_percent = if memory_count == 0 {
                100.0
            } else {
                with_embedding as f32 * 100.0 / memory_count as f32
            };

            let recommendation = (coverage_percent < HEALTHY_COVERAGE_PERCENT).then(|| {
                format!(
                    "{} of {} memories lack embeddings; run update_missing_embeddings",
                    memory_count - with_embedding,
                    memory_count
                )
            });

            Ok(Statistics {
                memory_count,
                entity_count,
                interaction_count,
                type_counts,
                vector_search_health: VectorSearchHealth {
                    memories_with_embedding: with_embedding,
                    coverage_percent,
                    recommendation,
                },
            })
        })
    }

    /// Embed memories that are missing vectors, bounded by `batch_size`
    pub async fn repair_missing_embeddings(
        &self,
        user_id: &str,
        batch_size: i64,
    ) -> Result<RepairReport> {
        let batch = self.storage.with_connection(|conn| {
            queries::get_memories_missing_embedding(conn, user_id, batch_size.max(1))
        })?;

        let mut report = RepairReport {
            scanned: batch.len() as i64,
            ..Default::default()
        };

        for memory in batch {
            if self.embed_best_effort(&memory).await {
                report.updated += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.scanned > 0 {
            tracing::info!(
                user_id,
                scanned = report.scanned,
                updated = report.updated,
                failed = report.failed,
                "embedding repair pass finished"
            );
        }

        Ok(report)
    }

    /// Run the repair pass for one user on an interval
    pub fn spawn_repair_worker(
        self: &Arc<Self>,
        user_id: String,
        every: Duration,
        batch_size: i64,
    ) -> tokio::task::JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = core.repair_missing_embeddings(&user_id, batch_size).await {
                    tracing::error!(user_id = %user_id, error = %e, "repair worker pass failed");
                }
            }
        })
    }

    // ------------------------------------------------------------------
    // Cost reporting
    // ------------------------------------------------------------------

    pub fn daily_costs(&self, user_id: &str, date: &str) -> Result<UsageReport> {
        self.ledger.daily_report(user_id, date)
    }

    pub fn range_costs(&self, user_id: &str, from: &str, to: &str) -> Result<UsageReport> {
        self.ledger.range_report(user_id, from, to)
    }
}
