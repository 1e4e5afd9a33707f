//! # Relational Expressions
//!
//! [`RelExpr`] is the closed set of plan alternatives a memo group can hold. Source relations are
//! leaves identified by their vertex ordinal; composite relations reference child *groups* by
//! [`GroupId`], never other expressions, so the group graph is acyclic by construction.
//!
//! The two exceptions are the physical joins that pin an access path on their inner side:
//! [`RelExpr::LookupJoin`], [`RelExpr::ConcatJoin`] and [`RelExpr::MergeJoin`] refer to index-scan
//! expressions by [`ExprId`]. Those scans are registered in the child group but are not competing
//! alternatives there; the conflict-repair pass installs them as the child's best plan when the
//! parent join wins.
//!
//! Every `match` over `RelExpr` in the coster and the exec builder is exhaustive, so adding a variant
//! forces both to handle it.

use crate::expr::{ColumnRef, Expr, JoinType};
use crate::properties::DistinctOp;
use serde::Serialize;
use std::fmt;

/// Identifier of an expression group in the memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GroupId(pub u32);

/// Identifier of an expression in the memo arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ExprId(pub u32);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A logical join between two groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinExpr {
    pub join_type: JoinType,
    pub left: GroupId,
    pub right: GroupId,
    pub filters: Vec<Expr>,
}

impl JoinExpr {
    pub fn new(join_type: JoinType, left: GroupId, right: GroupId, filters: Vec<Expr>) -> Self {
        Self {
            join_type,
            left,
            right,
            filters,
        }
    }
}

/// An index access on one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexScan {
    pub vertex: usize,
    /// Position in the table's index list.
    pub index: usize,
    /// Conjuncts answered by the index range.
    pub ranges: Vec<Expr>,
    /// Conjuncts evaluated on the scanned rows.
    pub residual: Vec<Expr>,
}

/// One index probe of a lookup join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lookup {
    /// Index scan on the right side, registered in the right group.
    pub scan: ExprId,
    /// Left-side expressions bound to the index key prefix, in key order.
    pub key_exprs: Vec<Expr>,
    /// Unique index fully bound: at most one row per probe.
    pub injective: bool,
}

/// One plan alternative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RelExpr {
    TableScan { vertex: usize },
    IndexScan(IndexScan),
    SubqueryAlias { vertex: usize },
    Values { vertex: usize },
    RecursiveTable { vertex: usize },
    RecursiveCte { vertex: usize },
    TableFunc { vertex: usize },
    JsonTable { vertex: usize },
    SetOp { vertex: usize },
    EmptyTable { vertex: usize },

    Project { child: GroupId, columns: Vec<ColumnRef> },
    Filter { child: GroupId, filters: Vec<Expr> },
    Distinct { child: GroupId },
    Max1Row { child: GroupId },

    /// Logical join (CROSS, INNER, LEFT, FULL, SEMI, ANTI, LATERAL), executed as a nested loop.
    Join(JoinExpr),
    HashJoin {
        join: JoinExpr,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
    },
    LookupJoin { join: JoinExpr, lookup: Lookup },
    /// Union of lookups, one per disjunct of an OR filter.
    ConcatJoin { join: JoinExpr, lookups: Vec<Lookup> },
    MergeJoin {
        join: JoinExpr,
        left_scan: ExprId,
        right_scan: ExprId,
        left_key: Expr,
        right_key: Expr,
    },
    /// `value` from the left side probes `[min, max]` ranges from the right side.
    RangeHeapJoin {
        join: JoinExpr,
        value: Expr,
        min: Expr,
        max: Expr,
        closed_min: bool,
        closed_max: bool,
    },
}

/// Coarse discriminant used for rule dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RelKind {
    Source,
    IndexScan,
    Project,
    Filter,
    Distinct,
    Max1Row,
    Join,
    HashJoin,
    LookupJoin,
    ConcatJoin,
    MergeJoin,
    RangeHeapJoin,
}

impl RelExpr {
    pub fn kind(&self) -> RelKind {
        match self {
            RelExpr::TableScan { .. }
            | RelExpr::SubqueryAlias { .. }
            | RelExpr::Values { .. }
            | RelExpr::RecursiveTable { .. }
            | RelExpr::RecursiveCte { .. }
            | RelExpr::TableFunc { .. }
            | RelExpr::JsonTable { .. }
            | RelExpr::SetOp { .. }
            | RelExpr::EmptyTable { .. } => RelKind::Source,
            RelExpr::IndexScan(_) => RelKind::IndexScan,
            RelExpr::Project { .. } => RelKind::Project,
            RelExpr::Filter { .. } => RelKind::Filter,
            RelExpr::Distinct { .. } => RelKind::Distinct,
            RelExpr::Max1Row { .. } => RelKind::Max1Row,
            RelExpr::Join(_) => RelKind::Join,
            RelExpr::HashJoin { .. } => RelKind::HashJoin,
            RelExpr::LookupJoin { .. } => RelKind::LookupJoin,
            RelExpr::ConcatJoin { .. } => RelKind::ConcatJoin,
            RelExpr::MergeJoin { .. } => RelKind::MergeJoin,
            RelExpr::RangeHeapJoin { .. } => RelKind::RangeHeapJoin,
        }
    }

    /// Vertex of a source relation.
    pub fn source_vertex(&self) -> Option<usize> {
        match self {
            RelExpr::TableScan { vertex }
            | RelExpr::SubqueryAlias { vertex }
            | RelExpr::Values { vertex }
            | RelExpr::RecursiveTable { vertex }
            | RelExpr::RecursiveCte { vertex }
            | RelExpr::TableFunc { vertex }
            | RelExpr::JsonTable { vertex }
            | RelExpr::SetOp { vertex }
            | RelExpr::EmptyTable { vertex } => Some(*vertex),
            RelExpr::IndexScan(scan) => Some(scan.vertex),
            _ => None,
        }
    }

    /// The logical join every join-family variant carries.
    pub fn join(&self) -> Option<&JoinExpr> {
        match self {
            RelExpr::Join(j)
            | RelExpr::HashJoin { join: j, .. }
            | RelExpr::LookupJoin { join: j, .. }
            | RelExpr::ConcatJoin { join: j, .. }
            | RelExpr::MergeJoin { join: j, .. }
            | RelExpr::RangeHeapJoin { join: j, .. } => Some(j),
            _ => None,
        }
    }

    /// Child groups, left to right.
    pub fn children(&self) -> Vec<GroupId> {
        match self {
            RelExpr::Project { child, .. }
            | RelExpr::Filter { child, .. }
            | RelExpr::Distinct { child }
            | RelExpr::Max1Row { child } => vec![*child],
            other => other.join().map(|j| vec![j.left, j.right]).unwrap_or_default(),
        }
    }

    /// Short operator label for logs.
    pub fn name(&self) -> String {
        match self {
            RelExpr::TableScan { .. } => "TableScan".into(),
            RelExpr::IndexScan(_) => "IndexScan".into(),
            RelExpr::SubqueryAlias { .. } => "SubqueryAlias".into(),
            RelExpr::Values { .. } => "Values".into(),
            RelExpr::RecursiveTable { .. } => "RecursiveTable".into(),
            RelExpr::RecursiveCte { .. } => "RecursiveCte".into(),
            RelExpr::TableFunc { .. } => "TableFunc".into(),
            RelExpr::JsonTable { .. } => "JsonTable".into(),
            RelExpr::SetOp { .. } => "SetOp".into(),
            RelExpr::EmptyTable { .. } => "EmptyTable".into(),
            RelExpr::Project { .. } => "Project".into(),
            RelExpr::Filter { .. } => "Filter".into(),
            RelExpr::Distinct { .. } => "Distinct".into(),
            RelExpr::Max1Row { .. } => "Max1Row".into(),
            RelExpr::Join(j) => format!("{}Join", j.join_type),
            RelExpr::HashJoin { join, .. } => format!("Hash{}Join", join.join_type),
            RelExpr::LookupJoin { join, .. } => format!("Lookup{}Join", join.join_type),
            RelExpr::ConcatJoin { join, .. } => format!("Concat{}Join", join.join_type),
            RelExpr::MergeJoin { join, .. } => format!("Merge{}Join", join.join_type),
            RelExpr::RangeHeapJoin { join, .. } => format!("RangeHeap{}Join", join.join_type),
        }
    }
}

/// An expression in the memo arena.
#[derive(Debug, Clone, Serialize)]
pub struct MemoExpr {
    pub id: ExprId,
    pub group: GroupId,
    pub rel: RelExpr,
    /// Total cost including children, set by the costing pass.
    pub cost: f64,
    /// How the group's pending DISTINCT is applied over this alternative.
    pub distinct: DistinctOp,
}
