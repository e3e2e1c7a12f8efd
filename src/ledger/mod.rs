//! Usage ledger and cost reporting
//!
//! Append-only per-user record of billable provider calls, plus the daily
//! and range aggregation queries built on top of it.

use crate::error::Result;
use crate::storage::{usage_queries, Storage};
use crate::types::{UsageFilter, UsageRecord, UsageReport};

/// Usage ledger over the storage layer
pub struct UsageLedger {
    storage: Storage,
}

impl UsageLedger {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Append a record. Idempotent by record id.
    pub fn append(&self, record: &UsageRecord) -> Result<()> {
        self.storage
            .with_connection(|conn| usage_queries::append_usage_record(conn, record))
    }

    /// Append a record, swallowing failures. Cost accounting must never
    /// fail the originating operation.
    pub fn append_best_effort(&self, record: &UsageRecord) {
        if let Err(e) = self.append(record) {
            tracing::warn!(
                user_id = %record.user_id,
                provider = record.provider.as_str(),
                error = %e,
                "usage ledger write failed"
            );
        }
    }

    /// Aggregate usage matching the filter
    pub fn aggregate(&self, filter: &UsageFilter) -> Result<UsageReport> {
        self.storage
            .with_connection(|conn| usage_queries::aggregate_usage(conn, filter))
    }

    /// Per-provider sums for a single day (YYYY-MM-DD)
    pub fn daily_report(&self, user_id: &str, date: &str) -> Result<UsageReport> {
        self.aggregate(&UsageFilter {
            user_id: user_id.to_string(),
            date_from: Some(date.to_string()),
            date_to: Some(date.to_string()),
            provider: None,
        })
    }

    /// Per-provider sums over an inclusive date range
    pub fn range_report(&self, user_id: &str, from: &str, to: &str) -> Result<UsageReport> {
        self.aggregate(&UsageFilter {
            user_id: user_id.to_string(),
            date_from: Some(from.to_string()),
            date_to: Some(to.to_string()),
            provider: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::users::create_user;
    use crate::types::{Provider, User};
    use chrono::Utc;

    fn setup() -> (UsageLedger, String) {
        let storage = Storage::open_in_memory().unwrap();
        let user = User::new("ledger@example.com", "Ledger");
        storage
            .with_connection(|conn| create_user(conn, &user))
            .unwrap();
        (UsageLedger::new(storage), user.id)
    }

    #[test]
    fn test_daily_report() {
        let (ledger, user_id) = setup();
        let today = Utc::now().format("%Y-%m-%d").to_string();

        // 15 calls totaling 4532 tokens at $0.02/M
        let per_call = 4532 / 15;
        let remainder = 4532 - per_call * 14;
        for i in 0..15 {
            let tokens = if i == 14 { remainder } else { per_call };
            let cost = tokens as f64 * 0.02 / 1_000_000.0;
            ledger
                .append(&UsageRecord::new(
                    &user_id,
                    Provider::Embedding,
                    "text-embedding-3-small",
                    tokens,
                    cost,
                    "embedding",
                ))
                .unwrap();
        }

        let report = ledger.daily_report(&user_id, &today).unwrap();
        let embedding = &report.per_provider["embedding"];
        assert_eq!(embedding.tokens, 4532);
        assert_eq!(embedding.request_count, 15);
        assert!((embedding.cost_usd - 0.0000906).abs() < 1e-7);
        assert_eq!(report.total.tokens, 4532);
        assert_eq!(report.total.request_count, 15);
    }

    #[test]
    fn test_range_report() {
        let (ledger, user_id) = setup();

        let mut jan = UsageRecord::new(&user_id, Provider::Llm, "m", 100, 0.01, "dedup");
        jan.date = "2026-01-15".to_string();
        let mut feb = UsageRecord::new(&user_id, Provider::Llm, "m", 200, 0.02, "dedup");
        feb.date = "2026-02-15".to_string();
        let mut mar = UsageRecord::new(&user_id, Provider::Llm, "m", 400, 0.04, "dedup");
        mar.date = "2026-03-15".to_string();

        for record in [&jan, &feb, &mar] {
            ledger.append(record).unwrap();
        }

        let report = ledger
            .range_report(&user_id, "2026-01-01", "2026-02-28")
            .unwrap();
        assert_eq!(report.total.tokens, 300);
        assert_eq!(report.total.request_count, 2);
    }

    #[test]
    fn test_best_effort_swallows_failure() {
        let (ledger, _) = setup();
        // empty user_id would fail a plain append; best-effort just logs
        let record = UsageRecord::new("", Provider::Embedding, "m", 1, 0.0, "embedding");
        assert!(ledger.append(&record).is_err());
        ledger.append_best_effort(&record);
    }
}
