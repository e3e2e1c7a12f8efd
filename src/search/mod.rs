//! Hybrid retrieval over a user's memories
//!
//! Two passes: a vector pass over every embedded candidate, then a lexical
//! fallback that fills the remainder of the limit. Metadata-grammar queries
//! bypass both and hit the store directly.

mod query;
pub mod ranking;

pub use query::{parse_query, ParsedQuery};
pub use ranking::temporal_decay;

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use crate::embedding::{rank_by_similarity, EmbeddingService};
use crate::error::Result;
use crate::storage::{entity_queries, interaction_queries, queries, Storage};
use crate::types::{
    Entity, EntityType, Memory, RankStrategy, RecallResult, SearchConfig, SearchMethod,
    SearchOptions, SearchResponse, UnifiedSearchResponse,
};

/// Hybrid retrieval engine
pub struct RetrievalEngine {
    storage: Storage,
    embedding: Arc<EmbeddingService>,
    config: SearchConfig,
}

impl RetrievalEngine {
    pub fn new(storage: Storage, embedding: Arc<EmbeddingService>, config: SearchConfig) -> Self {
        Self {
            storage,
            embedding,
            config,
        }
    }

    /// Search a user's memories
    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<SearchResponse> {
        let limit = options.limit.unwrap_or(self.config.default_limit).max(1);

        match parse_query(query) {
            ParsedQuery::Empty => {
                // most recent memories, no embedding call
                let memories = self
                    .storage
                    .with_connection(|conn| queries::list_active_memories(conn, user_id, limit))?;
                let mut results: Vec<RecallResult> = memories
                    .into_iter()
                    .filter(|m| type_allowed(m, options))
                    .map(|memory| RecallResult {
                        memory,
                        similarity: None,
                        score: 0.0,
                    })
                    .collect();
                ranking::apply_strategy(&mut results, RankStrategy::Recency, Utc::now());
                Ok(SearchResponse {
                    results,
                    method: SearchMethod::Text,
                })
            }
            ParsedQuery::Metadata { field, value } => {
                let memories = self.storage.with_connection(|conn| {
                    queries::search_memories_by_metadata(conn, user_id, &field, &value, limit)
                })?;
                let results = memories
                    .into_iter()
                    .filter(|m| type_allowed(m, options))
                    .map(|memory| RecallResult {
                        memory,
                        similarity: None,
                        score: 1.0,
                    })
                    .collect();
                Ok(SearchResponse {
                    results,
                    method: SearchMethod::Metadata,
                })
            }
            ParsedQuery::Text(text) => self.free_text_search(user_id, &text, options, limit).await,
        }
    }

    async fn free_text_search(
        &self,
        user_id: &str,
        text: &str,
        options: &SearchOptions,
        limit: i64,
    ) -> Result<SearchResponse> {
        let threshold = options.threshold.unwrap_or(self.config.default_threshold);
        // a zero threshold disables the similarity filter entirely
        let threshold = if threshold <= 0.0 { -1.0 } else { threshold };

        // Vector pass. A provider failure degrades to lexical-only search
        // instead of failing the read.
        let vector_hits = match self.embedding.embed(text, user_id).await {
            Ok(outcome) => {
                let candidates = self.storage.with_connection(|conn| {
                    queries::get_memories_with_embedding(
                        conn,
                        user_id,
                        self.embedding.dimensions(),
                        -1,
                    )
                })?;
                let candidates: Vec<(Memory, Vec<f32>)> = candidates
                    .into_iter()
                    .filter(|(m, _)| type_allowed(m, options))
                    .collect();
                rank_by_similarity(&outcome.vector, candidates, threshold, limit as usize)
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "query embedding failed, lexical-only search");
                Vec::new()
            }
        };

        let mut seen: HashSet<String> = vector_hits.iter().map(|(_, m)| m.id.clone()).collect();
        let vector_count = vector_hits.len();

        let mut results: Vec<RecallResult> = vector_hits
            .into_iter()
            .map(|(similarity, memory)| RecallResult {
                memory,
                similarity: Some(similarity),
                score: similarity,
            })
            .collect();

        // Lexical fallback fills whatever the vector pass left open;
        // vector hits win on id collisions.
        let mut lexical_added = 0usize;
        if (results.len() as i64) < limit {
            let remaining = limit - results.len() as i64;
            let lexical = self.storage.with_connection(|conn| {
                queries::search_memories_lexical(conn, user_id, text, limit)
            })?;
            for memory in lexical {
                if lexical_added as i64 >= remaining {
                    break;
                }
                if !type_allowed(&memory, options) || !seen.insert(memory.id.clone()) {
                    continue;
                }
                results.push(RecallResult {
                    memory,
                    similarity: None,
                    score: 0.0,
                });
                lexical_added += 1;
            }
        }

        let method = if vector_count > 0 && lexical_added > 0 {
            SearchMethod::Hybrid
        } else if vector_count > 0 {
            SearchMethod::Semantic
        } else {
            SearchMethod::Text
        };

        let strategy = options.strategy.unwrap_or(self.config.default_strategy);
        ranking::apply_strategy(&mut results, strategy, Utc::now());

        Ok(SearchResponse { results, method })
    }

    /// Search memories, entities and interactions with the same parsing and
    /// ranking rules, capped at `limit` per category
    pub async fn unified_search(
        &self,
        user_id: &str,
        query: &str,
        options: &SearchOptions,
        entity_types: Option<&[EntityType]>,
    ) -> Result<UnifiedSearchResponse> {
        let limit = options.limit.unwrap_or(self.config.default_limit).max(1);

        let memories = self.search(user_id, query, options).await?;

        let (entities, interactions) = if query.trim().is_empty() {
            (Vec::new(), Vec::new())
        } else {
            let entities: Vec<Entity> = self
                .storage
                .with_connection(|conn| {
                    entity_queries::search_entities_by_text(conn, user_id, query, limit)
                })?
                .into_iter()
                .filter(|e| {
                    entity_types
                        .map(|types| types.contains(&e.entity_type))
                        .unwrap_or(true)
                })
                .collect();
            let interactions = self.storage.with_connection(|conn| {
                interaction_queries::search_interactions(conn, user_id, query, limit)
            })?;
            (entities, interactions)
        };

        Ok(UnifiedSearchResponse {
            memories: memories.results,
            entities,
            interactions,
        })
    }
}

fn type_allowed(memory: &Memory, options: &SearchOptions) -> bool {
    match &options.memory_types {
        Some(types) if !types.is_empty() => types.contains(&memory.memory_type),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryType;

    #[test]
    fn test_type_allowed() {
        let memory = Memory {
            id: "m".to_string(),
            user_id: "u".to_string(),
            title: String::new(),
            content: String::new(),
            memory_type: MemoryType::Technical,
            importance: Default::default(),
            tags: vec![],
            entity_ids: vec![],
            metadata: Default::default(),
            has_embedding: false,
            embedding: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            expires_at: None,
            is_archived: false,
        };

        let all = SearchOptions::default();
        assert!(type_allowed(&memory, &all));

        let matching = SearchOptions {
            memory_types: Some(vec![MemoryType::Technical]),
            ..Default::default()
        };
        assert!(type_allowed(&memory, &matching));

        let other = SearchOptions {
            memory_types: Some(vec![MemoryType::Personal]),
            ..Default::default()
        };
        assert!(!type_allowed(&memory, &other));
    }
}
