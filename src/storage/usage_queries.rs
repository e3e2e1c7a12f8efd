//! Append-only usage ledger queries
//!
//! Records are never updated or deleted; aggregation reads are the only
//! consumer.

use rusqlite::{params, Connection};
use std::collections::HashMap;

use super::connection::ensure_user_scope;
use crate::error::Result;
use crate::types::{Provider, ProviderUsage, UsageFilter, UsageRecord, UsageReport};

/// Append a usage record. Idempotent by id: replaying the same record is a
/// no-op rather than a double-count.
pub fn append_usage_record(conn: &Connection, record: &UsageRecord) -> Result<()> {
    ensure_user_scope(&record.user_id)?;

    conn.execute(
        "INSERT OR IGNORE INTO usage_records
             (id, user_id, provider, model, tokens, cost_usd, operation_type,
              timestamp, date, metadata)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            record.id,
            record.user_id,
            record.provider.as_str(),
            record.model,
            record.tokens,
            record.cost_usd,
            record.operation_type,
            record.timestamp.to_rfc3339(),
            record.date,
            serde_json::to_string(&record.metadata)?,
        ],
    )?;

    Ok(())
}

/// Aggregate usage per provider, plus grand totals
pub fn aggregate_usage(conn: &Connection, filter: &UsageFilter) -> Result<UsageReport> {
    ensure_user_scope(&filter.user_id)?;

    let mut sql = String::from(
        "SELECT provider, COALESCE(SUM(tokens), 0), COALESCE(SUM(cost_usd), 0), COUNT(*)
         FROM usage_records
         WHERE user_id = ?",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(filter.user_id.clone())];

    if let Some(ref from) = filter.date_from {
        sql.push_str(" AND date >= ?");
        params.push(Box::new(from.clone()));
    }
    if let Some(ref to) = filter.date_to {
        sql.push_str(" AND date <= ?");
        params.push(Box::new(to.clone()));
    }
    if let Some(provider) = filter.provider {
        sql.push_str(" AND provider = ?");
        params.push(Box::new(provider.as_str().to_string()));
    }

    sql.push_str(" GROUP BY provider");

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();

    let rows: Vec<(String, i64, f64, i64)> = stmt
        .query_map(param_refs.as_slice(), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut per_provider: HashMap<String, ProviderUsage> = HashMap::new();
    let mut total = ProviderUsage::default();

    for (provider, tokens, cost_usd, request_count) in rows {
        per_provider.insert(
            provider,
            ProviderUsage {
                tokens,
                cost_usd,
                request_count,
            },
        );
        total.tokens += tokens;
        total.cost_usd += cost_usd;
        total.request_count += request_count;
    }

    Ok(UsageReport {
        per_provider,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use chrono::Utc;

    fn seed_user(conn: &Connection, id: &str) {
        conn.execute(
            "INSERT INTO users (id, email, name, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                id,
                format!("{}@example.com", id),
                id,
                Utc::now().to_rfc3339(),
                Utc::now().to_rfc3339()
            ],
        )
        .unwrap();
    }

    #[test]
    fn test_append_is_idempotent_by_id() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                seed_user(conn, "u1");
                let record = UsageRecord::new("u1", Provider::Embedding, "m", 100, 0.002, "embed");

                append_usage_record(conn, &record)?;
                append_usage_record(conn, &record)?;

                let report = aggregate_usage(
                    conn,
                    &UsageFilter {
                        user_id: "u1".to_string(),
                        date_from: None,
                        date_to: None,
                        provider: None,
                    },
                )?;
                assert_eq!(report.total.request_count, 1);
                assert_eq!(report.total.tokens, 100);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_aggregate_per_provider() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                seed_user(conn, "u1");
                for _ in 0..3 {
                    append_usage_record(
                        conn,
                        &UsageRecord::new("u1", Provider::Embedding, "m", 100, 0.001, "embed"),
                    )?;
                }
                append_usage_record(
                    conn,
                    &UsageRecord::new("u1", Provider::Llm, "m2", 500, 0.01, "dedup"),
                )?;

                let report = aggregate_usage(
                    conn,
                    &UsageFilter {
                        user_id: "u1".to_string(),
                        date_from: None,
                        date_to: None,
                        provider: None,
                    },
                )?;
                assert_eq!(report.per_provider["embedding"].request_count, 3);
                assert_eq!(report.per_provider["embedding"].tokens, 300);
                assert_eq!(report.per_provider["llm"].request_count, 1);
                assert_eq!(report.total.tokens, 800);
                assert_eq!(report.total.request_count, 4);

                // provider filter
                let report = aggregate_usage(
                    conn,
                    &UsageFilter {
                        user_id: "u1".to_string(),
                        date_from: None,
                        date_to: None,
                        provider: Some(Provider::Llm),
                    },
                )?;
                assert_eq!(report.total.request_count, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_aggregate_is_user_scoped() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                seed_user(conn, "u1");
                seed_user(conn, "u2");
                append_usage_record(
                    conn,
                    &UsageRecord::new("u1", Provider::Embedding, "m", 100, 0.001, "embed"),
                )?;

                let report = aggregate_usage(
                    conn,
                    &UsageFilter {
                        user_id: "u2".to_string(),
                        date_from: None,
                        date_to: None,
                        provider: None,
                    },
                )?;
                assert_eq!(report.total.request_count, 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_date_range_filter() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                seed_user(conn, "u1");
                let mut old = UsageRecord::new("u1", Provider::Embedding, "m", 10, 0.0001, "embed");
                old.date = "2020-01-01".to_string();
                append_usage_record(conn, &old)?;
                append_usage_record(
                    conn,
                    &UsageRecord::new("u1", Provider::Embedding, "m", 20, 0.0002, "embed"),
                )?;

                let report = aggregate_usage(
                    conn,
                    &UsageFilter {
                        user_id: "u1".to_string(),
                        date_from: Some("2021-01-01".to_string()),
                        date_to: None,
                        provider: None,
                    },
                )?;
                assert_eq!(report.total.tokens, 20);
                Ok(())
            })
            .unwrap();
    }
}
