//! Core types for Mnemo
//!
//! Every durable record carries an opaque string id and a `user_id` tenant
//! key. The storage layer refuses operations that omit the tenant key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;

/// Unique identifier for a memory
pub type MemoryId = String;

/// Unique identifier for an entity
pub type EntityId = String;

/// Unique identifier for a user (the tenant key)
pub type UserId = String;

/// A user account. `metadata` holds provider OAuth tokens, sync tokens and
/// last-sync timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Create a new active user with a random id
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.into(),
            name: name.into(),
            metadata: HashMap::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A memory entry owned by one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// Opaque, globally unique identifier
    pub id: MemoryId,
    /// Owning tenant
    pub user_id: UserId,
    pub title: String,
    /// Content may be empty but is discouraged
    pub content: String,
    #[serde(rename = "type")]
    pub memory_type: MemoryType,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub tags: Vec<String>,
    /// One-way references into the entity store; dangling ids are tolerated
    #[serde(default)]
    pub entity_ids: Vec<EntityId>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Whether a vector of the configured dimension is stored for this row
    #[serde(default)]
    pub has_embedding: bool,
    /// Populated on demand; absent embeddings are repaired in the background
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Archived memories stay on disk but leave default search
    #[serde(default)]
    pub is_archived: bool,
}

impl Memory {
    /// True once `expires_at` has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }

    /// The text that gets embedded for this memory
    pub fn embedding_text(&self) -> String {
        let mut text = format!("{}\n{}", self.title, self.content);
        if !self.tags.is_empty() {
            text.push('\n');
            text.push_str(&self.tags.join(" "));
        }
        text
    }
}

/// Memory type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    System,
    Learned,
    #[default]
    Memory,
    Biographical,
    Professional,
    Personal,
    Technical,
    Project,
    Interaction,
    Preference,
    Semantic,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryType::System => "system",
            MemoryType::Learned => "learned",
            MemoryType::Memory => "memory",
            MemoryType::Biographical => "biographical",
            MemoryType::Professional => "professional",
            MemoryType::Personal => "personal",
            MemoryType::Technical => "technical",
            MemoryType::Project => "project",
            MemoryType::Interaction => "interaction",
            MemoryType::Preference => "preference",
            MemoryType::Semantic => "semantic",
        }
    }

    pub fn all() -> &'static [MemoryType] {
        &[
            MemoryType::System,
            MemoryType::Learned,
            MemoryType::Memory,
            MemoryType::Biographical,
            MemoryType::Professional,
            MemoryType::Personal,
            MemoryType::Technical,
            MemoryType::Project,
            MemoryType::Interaction,
            MemoryType::Preference,
            MemoryType::Semantic,
        ]
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MemoryType::System),
            "learned" => Ok(MemoryType::Learned),
            "memory" => Ok(MemoryType::Memory),
            "biographical" => Ok(MemoryType::Biographical),
            "professional" => Ok(MemoryType::Professional),
            "personal" => Ok(MemoryType::Personal),
            "technical" => Ok(MemoryType::Technical),
            "project" => Ok(MemoryType::Project),
            "interaction" => Ok(MemoryType::Interaction),
            "preference" => Ok(MemoryType::Preference),
            "semantic" => Ok(MemoryType::Semantic),
            _ => Err(format!("Unknown memory type: {}", s)),
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Importance level, 1 (low) to 4 (critical)
///
/// Serialized as an integer. Deserialization also accepts the legacy 0..1
/// float scale and rounds it into the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Importance {
    Low = 1,
    #[default]
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Importance {
    pub fn as_int(&self) -> i64 {
        *self as i64
    }

    /// Clamp an integer level into the enum
    pub fn from_int(v: i64) -> Self {
        match v {
            i64::MIN..=1 => Importance::Low,
            2 => Importance::Medium,
            3 => Importance::High,
            _ => Importance::Critical,
        }
    }

    /// Normalize any numeric representation: integers 1..4 map directly,
    /// floats in [0, 1] are the legacy scale and are rounded up into 1..4.
    pub fn from_f64(v: f64) -> Self {
        if !v.is_finite() {
            return Importance::default();
        }
        if v < 1.0 {
            // legacy 0..1 scale
            return Importance::from_int(((v * 4.0).round() as i64).max(1));
        }
        Importance::from_int(v.round() as i64)
    }

    /// Normalize a loose JSON value into the enum
    pub fn from_value(v: &serde_json::Value) -> Option<Self> {
        match v {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(Importance::from_f64(i as f64))
                } else {
                    n.as_f64().map(Importance::from_f64)
                }
            }
            _ => None,
        }
    }
}

impl Serialize for Importance {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_int())
    }
}

impl<'de> Deserialize<'de> for Importance {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = f64::deserialize(deserializer)?;
        Ok(Importance::from_f64(v))
    }
}

/// A structured record (person, organization, ...) owned by one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub user_id: UserId,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub description: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
    /// Holds the external source uid and optimistic-concurrency tag once synced
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    /// External-source record uid, if this entity has been synced
    pub fn external_uid(&self) -> Option<&str> {
        self.metadata.get(META_EXTERNAL_UID).and_then(|v| v.as_str())
    }

    /// External-source optimistic-concurrency tag, if present
    pub fn external_etag(&self) -> Option<&str> {
        self.metadata.get(META_EXTERNAL_ETAG).and_then(|v| v.as_str())
    }
}

/// Entity metadata key: external source uid
pub const META_EXTERNAL_UID: &str = "externalUid";
/// Entity metadata key: external source etag
pub const META_EXTERNAL_ETAG: &str = "externalEtag";
/// User metadata key: incremental sync token from the contact source
pub const META_SYNC_TOKEN: &str = "contactSyncToken";
/// User metadata key: timestamp of the last successful contact sync
pub const META_LAST_SYNC_AT: &str = "lastContactSyncAt";

/// Entity type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    #[default]
    Person,
    Organization,
    Project,
    Concept,
    Location,
    Event,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Organization => "organization",
            EntityType::Project => "project",
            EntityType::Concept => "concept",
            EntityType::Location => "location",
            EntityType::Event => "event",
        }
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" => Ok(EntityType::Person),
            "organization" => Ok(EntityType::Organization),
            "project" => Ok(EntityType::Project),
            "concept" => Ok(EntityType::Concept),
            "location" => Ok(EntityType::Location),
            "event" => Ok(EntityType::Event),
            _ => Err(format!("Unknown entity type: {}", s)),
        }
    }
}

/// A conversation log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub user_id: UserId,
    pub agent_name: String,
    pub content: String,
    pub context: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Which external provider a usage record bills against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Embedding,
    Llm,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Embedding => "embedding",
            Provider::Llm => "llm",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "embedding" => Ok(Provider::Embedding),
            "llm" => Ok(Provider::Llm),
            _ => Err(format!("Unknown provider: {}", s)),
        }
    }
}

/// Append-only record of one billable provider call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub id: String,
    pub user_id: UserId,
    pub provider: Provider,
    pub model: String,
    pub tokens: i64,
    pub cost_usd: f64,
    pub operation_type: String,
    pub timestamp: DateTime<Utc>,
    /// YYYY-MM-DD bucket, derived from `timestamp`
    pub date: String,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl UsageRecord {
    /// Create a record stamped with the current time
    pub fn new(
        user_id: impl Into<String>,
        provider: Provider,
        model: impl Into<String>,
        tokens: i64,
        cost_usd: f64,
        operation_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            provider,
            model: model.into(),
            tokens,
            cost_usd,
            operation_type: operation_type.into(),
            timestamp: now,
            date: now.format("%Y-%m-%d").to_string(),
            metadata: HashMap::new(),
        }
    }
}

/// Filter for usage aggregation queries
#[derive(Debug, Clone)]
pub struct UsageFilter {
    pub user_id: UserId,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub provider: Option<Provider>,
}

/// Per-provider usage sums
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderUsage {
    pub tokens: i64,
    pub cost_usd: f64,
    pub request_count: i64,
}

/// Aggregated usage report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageReport {
    pub per_provider: HashMap<String, ProviderUsage>,
    pub total: ProviderUsage,
}

/// Input for creating a new memory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateMemoryInput {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, rename = "type", alias = "memory_type")]
    pub memory_type: MemoryType,
    pub importance: Option<Importance>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, alias = "entity_ids")]
    pub entity_ids: Vec<EntityId>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Patch for updating a memory; `None` fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryPatch {
    pub title: Option<String>,
    pub content: Option<String>,
    #[serde(rename = "type", alias = "memory_type")]
    pub memory_type: Option<MemoryType>,
    pub importance: Option<Importance>,
    pub tags: Option<Vec<String>>,
    pub entity_ids: Option<Vec<EntityId>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    pub expires_at: Option<Option<DateTime<Utc>>>,
    pub is_archived: Option<bool>,
}

impl MemoryPatch {
    /// Whether the patch invalidates the stored embedding
    pub fn touches_embedded_text(&self) -> bool {
        self.title.is_some() || self.content.is_some() || self.tags.is_some()
    }
}

/// Input for creating a new entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEntityInput {
    pub name: String,
    #[serde(default, rename = "type", alias = "entity_type")]
    pub entity_type: EntityType,
    pub description: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub importance: Option<Importance>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub notes: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Patch for updating an entity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityPatch {
    pub name: Option<String>,
    #[serde(rename = "type", alias = "entity_type")]
    pub entity_type: Option<EntityType>,
    pub description: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub importance: Option<Importance>,
    pub tags: Option<Vec<String>>,
    pub notes: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// Ranking strategy for search results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RankStrategy {
    Similarity,
    Recency,
    Importance,
    /// No first-class access counter exists; uses importance as a proxy
    Frequency,
    #[default]
    Composite,
}

impl std::str::FromStr for RankStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "similarity" => Ok(RankStrategy::Similarity),
            "recency" => Ok(RankStrategy::Recency),
            "importance" => Ok(RankStrategy::Importance),
            "frequency" => Ok(RankStrategy::Frequency),
            "composite" => Ok(RankStrategy::Composite),
            _ => Err(format!("Unknown ranking strategy: {}", s)),
        }
    }
}

/// How a search resolved its results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMethod {
    Semantic,
    Text,
    Hybrid,
    Metadata,
}

impl SearchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMethod::Semantic => "semantic",
            SearchMethod::Text => "text",
            SearchMethod::Hybrid => "hybrid",
            SearchMethod::Metadata => "metadata",
        }
    }
}

/// Options for memory search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: Option<i64>,
    /// Vector similarity floor; 0 disables the filter
    pub threshold: Option<f32>,
    pub strategy: Option<RankStrategy>,
    pub memory_types: Option<Vec<MemoryType>>,
}

/// One scored search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResult {
    pub memory: Memory,
    /// Raw cosine similarity, when the vector pass produced this hit
    pub similarity: Option<f32>,
    /// Final score under the selected ranking strategy
    pub score: f32,
}

/// Search response with the method that produced it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<RecallResult>,
    pub method: SearchMethod,
}

/// Unified search across memories, entities and interactions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedSearchResponse {
    pub memories: Vec<RecallResult>,
    pub entities: Vec<Entity>,
    pub interactions: Vec<Interaction>,
}

/// Health of the vector search index for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSearchHealth {
    pub memories_with_embedding: i64,
    pub coverage_percent: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Per-user statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statistics {
    pub memory_count: i64,
    pub entity_count: i64,
    pub interaction_count: i64,
    pub type_counts: HashMap<String, i64>,
    pub vector_search_health: VectorSearchHealth,
}

/// Result of a missing-embedding repair pass
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepairReport {
    pub scanned: i64,
    pub updated: i64,
    pub failed: i64,
}

/// Conflict resolution strategy for the contact sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConflictStrategy {
    /// Side with the more recent `updated_at` wins
    #[default]
    Newest,
    /// Side with the older `updated_at` wins
    Oldest,
    /// Field-level union
    Merge,
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "newest" | "newest-wins" => Ok(ConflictStrategy::Newest),
            "oldest" | "oldest-wins" => Ok(ConflictStrategy::Oldest),
            "merge" => Ok(ConflictStrategy::Merge),
            _ => Err(format!("Unknown conflict strategy: {}", s)),
        }
    }
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider model name (e.g., "text-embedding-3-small")
    pub model: String,
    /// Vector length D; stored embeddings of any other length are treated as absent
    pub dimension: usize,
    pub price_per_million_tokens: f64,
    /// Tokenizer used for deterministic token estimation
    #[serde(default = "default_tokenizer")]
    pub tokenizer_model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

fn default_tokenizer() -> String {
    "cl100k_base".to_string()
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            price_per_million_tokens: 0.02,
            tokenizer_model: default_tokenizer(),
            api_key: None,
            base_url: None,
        }
    }
}

/// Search defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
    #[serde(default)]
    pub default_strategy: RankStrategy,
    #[serde(default = "default_limit")]
    pub default_limit: i64,
}

fn default_threshold() -> f32 {
    0.6
}

fn default_limit() -> i64 {
    10
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            default_strategy: RankStrategy::default(),
            default_limit: default_limit(),
        }
    }
}

/// Contact sync configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// LLM confidence (0..100) required for auto-merge
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: u8,
    #[serde(default = "default_true")]
    pub enable_llm: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
    /// Fixed delay between sequential LLM calls
    #[serde(default = "default_llm_delay")]
    pub llm_call_delay_ms: u64,
    #[serde(default)]
    pub conflict_strategy: ConflictStrategy,
    #[serde(default)]
    pub auto_merge: bool,
}

fn default_dedup_threshold() -> u8 {
    90
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_llm_delay() -> u64 {
    200
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            dedup_threshold: default_dedup_threshold(),
            enable_llm: true,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay(),
            llm_call_delay_ms: default_llm_delay(),
            conflict_strategy: ConflictStrategy::default(),
            auto_merge: false,
        }
    }
}

/// Inbound request rate limiting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate")]
    pub per_minute: u32,
}

fn default_rate() -> u32 {
    100
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_minute: default_rate(),
        }
    }
}

/// Aggregate service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnemoConfig {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_minutes: u64,
}

fn default_session_timeout() -> u64 {
    60
}

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            sync: SyncConfig::default(),
            rate_limit: RateLimitConfig::default(),
            session_timeout_minutes: default_session_timeout(),
        }
    }
}

/// Identity resolved by the (external) identity provider for one request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: UserId,
    pub email: String,
}
