//! # Cost Model
//!
//! The coster prices one memo expression from its operator and the already-derived cardinalities
//! of its input groups. It never re-derives cardinality; the costing pass adds the children's
//! accumulated costs on top.
//!
//! ## Constants
//!
//! ```text
//! sequential I/O   1.0     per row read in order
//! random I/O       1.3     per index probe
//! CPU              0.01    per row processed
//! memory           2.0     multiplier on CPU for rows held in a hash table
//! concat           0.75    discount per disjunct of a concat (OR) lookup
//! degenerate       2.0     penalty on cross products
//! ```
//!
//! ## Join Families
//!
//! ```text
//! hash        (l + r)·seq + r·cpu·mem + out·cpu
//! lookup      l·seq + out·rand (halved when injective) + out·cpu
//! concat      Σ lookup · concat
//! merge       (l + r)·seq + out·cpu
//! range heap  (l + r)·seq + l·log2(r)·cpu + out·cpu
//! nested loop l·r·cpu + l·seq + out·cpu
//! cross       nested loop · degenerate
//! ```
//!
//! Every formula is non-decreasing in `l` and `r`, so a cheaper child never makes its parent more
//! expensive.
//!
//! ## Biased Costers
//!
//! [`BiasedCoster`] subtracts a large constant from one [`JoinFamily`], forcing that family to win
//! wherever it is applicable. Tests use it to pin plan shapes without a second model.

use crate::memo::Memo;
use crate::rel::{GroupId, MemoExpr, RelExpr};
use serde::{Deserialize, Serialize};

pub const SEQ_IO_COST: f64 = 1.0;
pub const RAND_IO_COST: f64 = 1.3;
pub const CPU_COST: f64 = 0.01;
pub const MEMORY_COST: f64 = 2.0;
pub const CONCAT_FACTOR: f64 = 0.75;
pub const DEGENERATE_PENALTY: f64 = 2.0;
pub const BIAS: f64 = 1e5;

/// Pluggable per-node cost model.
pub trait CostModel: Send + Sync {
    fn name(&self) -> &str;

    /// Cost of `expr` alone, excluding the cost of producing its inputs.
    fn compute_cost(&self, memo: &Memo, expr: &MemoExpr) -> f64;

    /// Added cost of a hash DISTINCT over `rows` rows.
    fn hash_distinct_cost(&self, rows: f64) -> f64 {
        rows * CPU_COST * MEMORY_COST
    }
}

/// Physical join families a biased coster can favor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinFamily {
    Hash,
    Lookup,
    Concat,
    Merge,
    RangeHeap,
    NestedLoop,
    Cross,
}

impl JoinFamily {
    pub fn of(rel: &RelExpr) -> Option<JoinFamily> {
        match rel {
            RelExpr::HashJoin { .. } => Some(JoinFamily::Hash),
            RelExpr::LookupJoin { .. } => Some(JoinFamily::Lookup),
            RelExpr::ConcatJoin { .. } => Some(JoinFamily::Concat),
            RelExpr::MergeJoin { .. } => Some(JoinFamily::Merge),
            RelExpr::RangeHeapJoin { .. } => Some(JoinFamily::RangeHeap),
            RelExpr::Join(j) if j.join_type == crate::expr::JoinType::Cross => Some(JoinFamily::Cross),
            RelExpr::Join(_) => Some(JoinFamily::NestedLoop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCoster;

impl DefaultCoster {
    fn rows(memo: &Memo, group: GroupId) -> f64 {
        memo.group(group).props.row_count
    }

    fn lookup_cost(left: f64, out: f64, injective: bool) -> f64 {
        let probe = if injective { RAND_IO_COST / 2.0 } else { RAND_IO_COST };
        left * SEQ_IO_COST + out * probe + out * CPU_COST
    }

    fn nested_loop_cost(left: f64, right: f64, out: f64) -> f64 {
        left * right * CPU_COST + left * SEQ_IO_COST + out * CPU_COST
    }
}

impl CostModel for DefaultCoster {
    fn name(&self) -> &str {
        "default"
    }

    fn compute_cost(&self, memo: &Memo, expr: &MemoExpr) -> f64 {
        let out = memo.estimated_rows(expr.id);
        match &expr.rel {
            RelExpr::TableScan { vertex }
            | RelExpr::SubqueryAlias { vertex }
            | RelExpr::Values { vertex }
            | RelExpr::RecursiveTable { vertex }
            | RelExpr::RecursiveCte { vertex }
            | RelExpr::TableFunc { vertex }
            | RelExpr::JsonTable { vertex }
            | RelExpr::SetOp { vertex }
            | RelExpr::EmptyTable { vertex } => memo.table(*vertex).row_count * SEQ_IO_COST,
            RelExpr::IndexScan(_) => out * (RAND_IO_COST + CPU_COST),

            RelExpr::Project { child, .. } | RelExpr::Filter { child, .. } | RelExpr::Max1Row { child } => {
                Self::rows(memo, *child) * CPU_COST
            }
            RelExpr::Distinct { child } => self.hash_distinct_cost(Self::rows(memo, *child)),

            RelExpr::Join(join) => {
                let (l, r) = (Self::rows(memo, join.left), Self::rows(memo, join.right));
                let nl = Self::nested_loop_cost(l, r, out);
                if join.join_type == crate::expr::JoinType::Cross {
                    nl * DEGENERATE_PENALTY
                } else {
                    nl
                }
            }
            RelExpr::HashJoin { join, .. } => {
                let (l, r) = (Self::rows(memo, join.left), Self::rows(memo, join.right));
                (l + r) * SEQ_IO_COST + r * CPU_COST * MEMORY_COST + out * CPU_COST
            }
            RelExpr::LookupJoin { join, lookup } => {
                Self::lookup_cost(Self::rows(memo, join.left), out, lookup.injective)
            }
            RelExpr::ConcatJoin { join, lookups } => {
                let l = Self::rows(memo, join.left);
                lookups
                    .iter()
                    .map(|lk| Self::lookup_cost(l, out, lk.injective))
                    .sum::<f64>()
                    * CONCAT_FACTOR
            }
            RelExpr::MergeJoin { join, .. } => {
                let (l, r) = (Self::rows(memo, join.left), Self::rows(memo, join.right));
                (l + r) * SEQ_IO_COST + out * CPU_COST
            }
            RelExpr::RangeHeapJoin { join, .. } => {
                let (l, r) = (Self::rows(memo, join.left), Self::rows(memo, join.right));
                (l + r) * SEQ_IO_COST + l * r.max(1.0).log2() * CPU_COST + out * CPU_COST
            }
        }
    }
}

/// A coster that makes one join family look free.
#[derive(Debug, Clone, Copy)]
pub struct BiasedCoster {
    pub family: JoinFamily,
    inner: DefaultCoster,
}

impl BiasedCoster {
    pub fn new(family: JoinFamily) -> Self {
        Self {
            family,
            inner: DefaultCoster,
        }
    }
}

impl CostModel for BiasedCoster {
    fn name(&self) -> &str {
        match self.family {
            JoinFamily::Hash => "hash-biased",
            JoinFamily::Lookup => "lookup-biased",
            JoinFamily::Concat => "concat-biased",
            JoinFamily::Merge => "merge-biased",
            JoinFamily::RangeHeap => "range-heap-biased",
            JoinFamily::NestedLoop => "nested-loop-biased",
            JoinFamily::Cross => "cross-biased",
        }
    }

    fn compute_cost(&self, memo: &Memo, expr: &MemoExpr) -> f64 {
        let cost = self.inner.compute_cost(memo, expr);
        if JoinFamily::of(&expr.rel) == Some(self.family) {
            cost - BIAS
        } else {
            cost
        }
    }
}
