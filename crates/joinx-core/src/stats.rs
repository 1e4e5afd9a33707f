//! # Statistics and Cardinality Estimation
//!
//! Table statistics come from a [`StatsProvider`](crate::catalog::StatsProvider); everything above
//! the leaves is derived here. The formulas are deliberately simple and, more importantly,
//! deterministic: every alternative in a memo group shares the estimate computed once when the group
//! was created.
//!
//! ## Derivation Formulas
//!
//! - **Filter**: `rows * Π sel(conjunct)`. Equality with a constant is `1 / NDV` (or 0.1 without
//!   column statistics), ranges are 1/3, everything else 0.1.
//! - **Join**: `|L| * |R| * Π sel(equality)` with `sel = 1 / max(NDV_l, NDV_r)`. When the equalities
//!   bind a key of one side the join cannot multiply rows of the other side, so the result is the
//!   other side's cardinality times the residual selectivity.
//! - **Distinct**: product of the output columns' NDVs, capped by the input rows.
//!
//! Missing NDVs fall back to the owning table's row count (every value distinct), which is the
//! conservative choice for equi-join selectivity.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default filter selectivity when we can't determine it.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.1;

/// Selectivity of a range comparison (`<`, `<=`, `>`, `>=`, BETWEEN).
pub const RANGE_SELECTIVITY: f64 = 1.0 / 3.0;

/// Row count substituted when the statistics provider has nothing for a table.
pub const DEFAULT_ROW_COUNT: f64 = 1000.0;

/// Statistics for a base relation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub row_count: f64,
    #[serde(default)]
    pub column_stats: HashMap<String, ColumnStatistics>,
}

impl Statistics {
    pub fn new(row_count: f64) -> Self {
        Self {
            row_count,
            column_stats: HashMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, stats: ColumnStatistics) -> Self {
        self.column_stats.insert(name.into(), stats);
        self
    }
}

/// Per-column statistics used for selectivity estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnStatistics {
    /// Number of distinct values (NDV).
    pub distinct_count: f64,
    /// Fraction of rows that are NULL [0.0, 1.0].
    #[serde(default)]
    pub null_fraction: f64,
}

impl ColumnStatistics {
    pub fn new(distinct_count: f64, null_fraction: f64) -> Self {
        Self {
            distinct_count,
            null_fraction,
        }
    }
}

/// Selectivity of `col = <constant>`: `1 / NDV`, or the default without statistics.
pub fn equality_selectivity(ndv: Option<f64>) -> f64 {
    ndv.map(|d| 1.0 / d.max(1.0)).unwrap_or(DEFAULT_FILTER_SELECTIVITY)
}

/// Selectivity of an equi-join predicate `l = r`.
///
/// Uses max(NDV) as the denominator: the standard containment assumption (the smaller domain is
/// fully contained in the larger one).
pub fn join_equality_selectivity(left_ndv: f64, right_ndv: f64) -> f64 {
    1.0 / left_ndv.max(right_ndv).max(1.0)
}

/// Cardinality of an inner join from its inputs and the combined predicate selectivity.
pub fn inner_join_rows(left_rows: f64, right_rows: f64, selectivity: f64) -> f64 {
    (left_rows * right_rows * selectivity).max(0.0)
}

/// LEFT JOIN preserves every left row at least once.
pub fn left_join_rows(left_rows: f64, inner_rows: f64) -> f64 {
    inner_rows.max(left_rows)
}

/// FULL OUTER JOIN preserves every row of both sides at least once.
pub fn full_join_rows(left_rows: f64, right_rows: f64, inner_rows: f64) -> f64 {
    inner_rows.max(left_rows).max(right_rows)
}

/// SEMI JOIN never returns more rows than its left input.
pub fn semi_join_rows(left_rows: f64, inner_rows: f64) -> f64 {
    inner_rows.min(left_rows)
}

/// ANTI JOIN returns the left rows a semi join would drop, floored at the default selectivity.
pub fn anti_join_rows(left_rows: f64, inner_rows: f64) -> f64 {
    let matched = semi_join_rows(left_rows, inner_rows);
    (left_rows - matched).max(left_rows * DEFAULT_FILTER_SELECTIVITY)
}

/// Number of distinct rows over columns with the given NDVs.
///
/// The product of NDVs represents the worst case where every combination exists; it is capped by
/// the input row count.
pub fn distinct_rows(input_rows: f64, ndvs: &[f64]) -> f64 {
    let product = ndvs.iter().fold(1.0_f64, |acc, n| acc * n.max(1.0));
    product.min(input_rows).max(0.0)
}
