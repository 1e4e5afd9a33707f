//! # Access-Path Helpers
//!
//! Shared analysis for the rules that replace a full scan with an index access: finding the table
//! behind a join input, and binding index key columns to expressions through equality filters.

use joinx_core::bitset::VertexSet;
use joinx_core::expr::{BinaryOp, ColumnId, Expr, TableId};
use joinx_core::memo::Memo;
use joinx_core::rel::{GroupId, RelExpr};

/// A join input that reads a single base table, optionally through a filter.
#[derive(Debug, Clone)]
pub struct LookupCandidate {
    pub vertex: usize,
    pub table: TableId,
    /// Conjuncts of the Filter sitting on the table, if any.
    pub filters: Vec<Expr>,
}

/// The table behind `group` when the group is a TableScan or a Filter over one.
///
/// Groups carrying a pending LIMIT are excluded; an index probe would bypass it.
pub fn lookup_candidate(memo: &Memo, group: GroupId) -> Option<LookupCandidate> {
    let g = memo.group(group);
    if g.props.limit.is_some() {
        return None;
    }
    match &memo.expr(g.original()?).rel {
        RelExpr::TableScan { vertex } => Some(candidate(memo, *vertex, Vec::new())),
        RelExpr::Filter { child, filters } => {
            let inner = memo.group(*child);
            if inner.props.limit.is_some() {
                return None;
            }
            match memo.expr(inner.original()?).rel {
                RelExpr::TableScan { vertex } => Some(candidate(memo, vertex, filters.clone())),
                _ => None,
            }
        }
        _ => None,
    }
}

fn candidate(memo: &Memo, vertex: usize, filters: Vec<Expr>) -> LookupCandidate {
    LookupCandidate {
        vertex,
        table: memo.table(vertex).source.id,
        filters,
    }
}

/// An index column bound by an equality filter.
#[derive(Debug, Clone, Copy)]
pub struct KeyBinding<'a> {
    /// The expression on the other side of the equality.
    pub key: &'a Expr,
    /// The filter the binding came from.
    pub filter: &'a Expr,
    /// Bound through `<=>`, so NULL keys match NULL rows.
    pub null_safe: bool,
}

/// Find an equality in `filters` binding `column` of `table` to an expression that does not read
/// `table` itself.
pub fn key_for_column<'a>(column: ColumnId, table: TableId, filters: &'a [Expr]) -> Option<KeyBinding<'a>> {
    filters.iter().find_map(|filter| {
        let Expr::BinaryOp { op, left, right } = filter else {
            return None;
        };
        if !matches!(op, BinaryOp::Eq | BinaryOp::NullSafeEq) {
            return None;
        }
        let key = match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), other) if c.table == table && c.column == column => other,
            (other, Expr::Column(c)) if c.table == table && c.column == column => other,
            _ => return None,
        };
        if key.columns().iter().any(|c| c.table == table) {
            return None;
        }
        Some(KeyBinding {
            key,
            filter,
            null_safe: *op == BinaryOp::NullSafeEq,
        })
    })
}

/// Bind the longest prefix of `columns` through `filters`, in index order.
///
/// Stops at the first column without a binding; an empty result means the index is unusable.
pub fn key_bindings<'a>(columns: &[ColumnId], table: TableId, filters: &'a [Expr]) -> Vec<KeyBinding<'a>> {
    columns
        .iter()
        .map_while(|c| key_for_column(*c, table, filters))
        .collect()
}

/// Filters of `all` not used by any binding.
pub fn unmatched(all: &[Expr], bindings: &[KeyBinding<'_>]) -> Vec<Expr> {
    all.iter()
        .filter(|f| !bindings.iter().any(|b| b.filter == *f))
        .cloned()
        .collect()
}

/// True when every column of `expr` belongs to a vertex in `tables`.
pub fn refs_only(memo: &Memo, expr: &Expr, tables: VertexSet) -> bool {
    memo.expr_vertices(expr).is_subset_of(tables)
        && expr.columns().iter().all(|c| memo.vertex_of_table(c.table).is_some())
}
