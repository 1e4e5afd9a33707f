//! # Statistics Provider Interface
//!
//! The planner consults statistics read-only through the [`StatsProvider`] trait. The trait is
//! behind a trait object so that different backends (a metadata service, a test fixture, the
//! statistics attached to a service request) can supply numbers.
//!
//! Statistics are advisory. A missing table, an empty result or a provider failure never fails
//! planning: [`resolve_row_count`] logs the degradation and substitutes the configured default.

use crate::stats::{ColumnStatistics, Statistics};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("no statistics for {database}.{table}")]
    Missing { database: String, table: String },
    #[error("statistics provider failed: {0}")]
    Provider(String),
}

/// Read-only access to table statistics.
pub trait StatsProvider: Send + Sync {
    fn table_stats(&self, database: &str, table: &str) -> Result<Statistics, StatsError>;

    fn column_stats(&self, database: &str, table: &str, column: &str) -> Option<ColumnStatistics> {
        self.table_stats(database, table)
            .ok()
            .and_then(|s| s.column_stats.get(column).cloned())
    }
}

/// Row count for `(database, table)`, or `default` when statistics are missing or empty.
pub fn resolve_row_count(provider: &dyn StatsProvider, database: &str, table: &str, default: f64) -> f64 {
    match provider.table_stats(database, table) {
        Ok(stats) if stats.row_count > 0.0 => stats.row_count,
        Ok(_) => {
            debug!(database, table, default, "empty statistics, using default row count");
            default
        }
        Err(StatsError::Missing { .. }) => {
            debug!(database, table, default, "no statistics, using default row count");
            default
        }
        Err(err) => {
            warn!(database, table, default, error = %err, "statistics lookup failed, using default row count");
            default
        }
    }
}

/// In-memory provider for tests, fixtures and service requests that carry their own numbers.
///
/// Tables are keyed by `database.table`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStats {
    pub tables: HashMap<String, Statistics>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, database: &str, table: &str, stats: Statistics) {
        self.tables.insert(Self::key(database, table), stats);
    }

    /// Builder form of [`add_table`](Self::add_table) for row counts only.
    pub fn with_rows(mut self, database: &str, table: &str, rows: f64) -> Self {
        self.add_table(database, table, Statistics::new(rows));
        self
    }

    fn key(database: &str, table: &str) -> String {
        format!("{database}.{table}")
    }
}

impl StatsProvider for InMemoryStats {
    fn table_stats(&self, database: &str, table: &str) -> Result<Statistics, StatsError> {
        self.tables
            .get(&Self::key(database, table))
            .cloned()
            .ok_or_else(|| StatsError::Missing {
                database: database.to_string(),
                table: table.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingProvider;

    impl StatsProvider for FailingProvider {
        fn table_stats(&self, _: &str, _: &str) -> Result<Statistics, StatsError> {
            Err(StatsError::Provider("connection reset".into()))
        }
    }

    #[test]
    fn test_row_count_degrades_to_default() {
        let stats = InMemoryStats::new()
            .with_rows("db", "big", 1_000_000.0)
            .with_rows("db", "empty", 0.0);
        assert_eq!(resolve_row_count(&stats, "db", "big", 1000.0), 1_000_000.0);
        assert_eq!(resolve_row_count(&stats, "db", "empty", 1000.0), 1000.0);
        assert_eq!(resolve_row_count(&stats, "db", "unknown", 42.0), 42.0);
        assert_eq!(resolve_row_count(&FailingProvider, "db", "big", 7.0), 7.0);
    }

    #[test]
    fn test_column_stats_lookup() {
        let mut stats = InMemoryStats::new();
        stats.add_table(
            "db",
            "t",
            Statistics::new(100.0).with_column("x", ColumnStatistics::new(10.0, 0.0)),
        );
        assert_eq!(stats.column_stats("db", "t", "x").map(|c| c.distinct_count), Some(10.0));
        assert!(stats.column_stats("db", "t", "y").is_none());
    }
}
