//! # Semi and Anti Join Rewrites
//!
//! Semi and anti joins only have a nested-loop implementation of their own. These rules rewrite
//! them into inner and left joins, which the later rules can then implement as lookup, hash or
//! merge joins.
//!
//! ## Semi → Inner
//!
//! ```text
//! SEMI(L, R, f)  ⇒  Project[L.*]( INNER(L, Distinct(Project[R cols of f](R)), f) )
//! ```
//!
//! Deduplicating the right side on the columns the filter reads guarantees each left row joins
//! at most once, provided `f` pins every one of those columns to a single value per left row. So
//! `f` must be a conjunction of equalities between columns and literals in which each right column
//! is equated to a left column, a literal, or an already pinned right column. Ranges, `OR` and
//! arithmetic are left as semi joins. The inner join is registered with its commuted alternative, so the small side can
//! drive.
//!
//! ## Anti → Left
//!
//! ```text
//! ANTI(L, R, f)  ⇒  Project[L.*]( Filter[r IS NULL ...]( LEFT(L, Project[R cols of f](R), f) ) )
//! ```
//!
//! Valid only when `f` null-rejects every right column it reads: a left row with a match then has a
//! non-NULL value in at least one of them.

use std::collections::BTreeSet;

use joinx_core::error::OptResult;
use joinx_core::expr::{ColumnRef, Expr, JoinType, TableId};
use joinx_core::memo::Memo;
use joinx_core::rel::{ExprId, GroupId, JoinExpr, RelExpr, RelKind};
use joinx_core::rule::Rule;
use tracing::trace;

/// Rewrite a semi join as an inner join against the deduplicated right side.
pub struct SemiToInnerRule;

impl Rule for SemiToInnerRule {
    fn name(&self) -> &str {
        "SemiToInner"
    }

    fn kinds(&self) -> &[RelKind] {
        &[RelKind::Join]
    }

    fn apply(&self, memo: &mut Memo, expr: ExprId) -> OptResult<usize> {
        let group = memo.expr(expr).group;
        let RelExpr::Join(join) = &memo.expr(expr).rel else {
            return Ok(0);
        };
        if join.join_type != JoinType::Semi || join.filters.is_empty() {
            return Ok(0);
        }
        let join = join.clone();
        let right_cols = side_columns(memo, &join.filters, join.right);
        if right_cols.is_empty() || !pins_columns(&join.filters, &right_cols) {
            return Ok(0);
        }

        let projected = memo.memoize_project(join.right, right_cols)?;
        let distinct = memo.memoize_distinct(projected)?;
        let inner = memo.memoize_join(JoinExpr::new(JoinType::Inner, join.left, distinct, join.filters.clone()))?;
        memo.add_alternative(
            inner,
            RelExpr::Join(JoinExpr::new(JoinType::Inner, distinct, join.left, join.filters)),
        );

        let columns = output_columns(memo, join.left);
        let added = memo.add_alternative(group, RelExpr::Project { child: inner, columns });
        trace!(group = %group, inner = %inner, "semi join rewritten as inner join");
        Ok(usize::from(added.is_some()))
    }
}

/// Rewrite an anti join as a left join keeping only the unmatched rows.
pub struct AntiToLeftRule;

impl Rule for AntiToLeftRule {
    fn name(&self) -> &str {
        "AntiToLeft"
    }

    fn kinds(&self) -> &[RelKind] {
        &[RelKind::Join]
    }

    fn apply(&self, memo: &mut Memo, expr: ExprId) -> OptResult<usize> {
        let group = memo.expr(expr).group;
        let RelExpr::Join(join) = &memo.expr(expr).rel else {
            return Ok(0);
        };
        if join.join_type != JoinType::Anti || join.filters.is_empty() {
            return Ok(0);
        }
        let join = join.clone();
        let right_cols = side_columns(memo, &join.filters, join.right);
        let rejected: BTreeSet<TableId> = join.filters.iter().flat_map(Expr::null_rejected_tables).collect();
        if right_cols.is_empty() || !right_cols.iter().all(|c| rejected.contains(&c.table)) {
            return Ok(0);
        }

        let nulls: Vec<Expr> = right_cols.iter().map(|c| Expr::is_null(Expr::column(c))).collect();
        let projected = memo.memoize_project(join.right, right_cols)?;
        let left = memo.memoize_join(JoinExpr::new(JoinType::Left, join.left, projected, join.filters))?;
        let unmatched = memo.memoize_filter(left, nulls)?;

        let columns = output_columns(memo, join.left);
        let added = memo.add_alternative(group, RelExpr::Project { child: unmatched, columns });
        trace!(group = %group, left = %left, "anti join rewritten as left join");
        Ok(usize::from(added.is_some()))
    }
}

/// Distinct columns of `filters` produced by `side`, in first-seen order.
fn side_columns(memo: &Memo, filters: &[Expr], side: GroupId) -> Vec<ColumnRef> {
    let cols = &memo.group(side).props.output_cols;
    let mut out: Vec<ColumnRef> = Vec::new();
    for c in filters.iter().flat_map(Expr::columns) {
        if cols.contains(c.column) && !out.contains(c) {
            out.push(c.clone());
        }
    }
    out
}

/// Whether `filters` are equalities over columns and literals that fix every column of `right` once
/// the other side's columns are known.
fn pins_columns(filters: &[Expr], right: &[ColumnRef]) -> bool {
    let mut pairs = Vec::new();
    for conjunct in filters.iter().flat_map(Expr::conjuncts) {
        let Some((a, b)) = conjunct.as_equality() else {
            return false;
        };
        let plain = |e: &Expr| matches!(e, Expr::Column(_) | Expr::Literal(_));
        if !plain(a) || !plain(b) {
            return false;
        }
        pairs.push((a, b));
    }

    let mut pinned: Vec<&ColumnRef> = Vec::with_capacity(right.len());
    loop {
        let before = pinned.len();
        for &(a, b) in &pairs {
            for (x, y) in [(a, b), (b, a)] {
                let Expr::Column(c) = x else { continue };
                if !right.contains(c) || pinned.contains(&c) {
                    continue;
                }
                let fixed = match y {
                    Expr::Column(d) => !right.contains(d) || pinned.contains(&d),
                    _ => true,
                };
                if fixed {
                    pinned.push(c);
                }
            }
        }
        if pinned.len() == before {
            return pinned.len() == right.len();
        }
    }
}

fn output_columns(memo: &Memo, group: GroupId) -> Vec<ColumnRef> {
    memo.group(group)
        .props
        .output_cols
        .iter()
        .filter_map(|c| memo.column_ref(c).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinx_core::catalog::InMemoryStats;
    use joinx_core::expr::{BinaryOp, ScalarValue};
    use joinx_core::plan::SourceTable;

    fn memo_with(join_type: JoinType, filter: fn(&ColumnRef, &ColumnRef) -> Expr) -> (Memo, ExprId) {
        let a = SourceTable::new(1, "db", "a").with_column(10, "x");
        let b = SourceTable::new(2, "db", "b").with_column(20, "x").with_column(21, "y");
        let cond = filter(&a.column_ref("x").unwrap(), &b.column_ref("x").unwrap());
        let mut memo = Memo::new();
        let stats = InMemoryStats::new();
        let va = memo.add_table(a, &stats, 1000.0);
        let vb = memo.add_table(b, &stats, 1000.0);
        let ga = memo.memoize_source(va).unwrap();
        let gb = memo.memoize_source(vb).unwrap();
        let g = memo.memoize_join(JoinExpr::new(join_type, ga, gb, vec![cond])).unwrap();
        let id = memo.group(g).original().unwrap();
        (memo, id)
    }

    #[test]
    fn test_semi_join_gains_projected_inner_join() {
        let (mut memo, id) = memo_with(JoinType::Semi, Expr::col_eq);
        assert_eq!(SemiToInnerRule.apply(&mut memo, id).unwrap(), 1);

        let group = memo.expr(id).group;
        let RelExpr::Project { child, columns } = &memo.alternatives(group).next().unwrap().rel else {
            panic!("expected a projection");
        };
        assert_eq!(columns.len(), 1);
        assert_eq!(columns[0].name, "x");
        let inner: Vec<_> = memo.alternatives(*child).collect();
        assert_eq!(inner.len(), 2);
        assert!(inner.iter().all(|e| e.rel.join().is_some_and(|j| j.join_type == JoinType::Inner)));
        // The projection keeps only the left side's columns.
        assert_eq!(memo.group(group).props.output_cols.len(), 1);
    }

    #[test]
    fn test_semi_join_with_range_filter_is_left_alone() {
        let (mut memo, id) = memo_with(JoinType::Semi, |l, r| {
            Expr::binary(BinaryOp::Lt, Expr::column(l), Expr::column(r))
        });
        assert_eq!(SemiToInnerRule.apply(&mut memo, id).unwrap(), 0);
        assert_eq!(memo.alternatives(memo.expr(id).group).count(), 1);
    }

    #[test]
    fn test_semi_join_with_or_filter_is_left_alone() {
        let (mut memo, id) = memo_with(JoinType::Semi, |l, r| {
            Expr::Or(vec![
                Expr::col_eq(l, r),
                Expr::binary(BinaryOp::Eq, Expr::column(r), Expr::Literal(ScalarValue::Int64(1))),
            ])
        });
        assert_eq!(SemiToInnerRule.apply(&mut memo, id).unwrap(), 0);
    }

    #[test]
    fn test_pins_columns_follows_equality_chains() {
        let a = SourceTable::new(1, "db", "a").with_column(10, "x");
        let b = SourceTable::new(2, "db", "b").with_column(20, "x").with_column(21, "y");
        let (ax, bx, by) = (a.column_ref("x").unwrap(), b.column_ref("x").unwrap(), b.column_ref("y").unwrap());
        let right = vec![bx.clone(), by.clone()];

        // b.y = b.x = a.x pins both right columns.
        assert!(pins_columns(&[Expr::col_eq(&ax, &bx), Expr::col_eq(&by, &bx)], &right));
        // b.x = b.y alone leaves both free.
        assert!(!pins_columns(&[Expr::col_eq(&bx, &by)], &right));
        // Arithmetic over right columns can match several distinct tuples.
        let sum = Expr::binary(BinaryOp::Add, Expr::column(&bx), Expr::column(&by));
        assert!(!pins_columns(&[Expr::binary(BinaryOp::Eq, Expr::column(&ax), sum)], &right));
    }

    #[test]
    fn test_anti_join_gains_left_join_with_null_filter() {
        let (mut memo, id) = memo_with(JoinType::Anti, Expr::col_eq);
        assert_eq!(AntiToLeftRule.apply(&mut memo, id).unwrap(), 1);

        let group = memo.expr(id).group;
        let RelExpr::Project { child, .. } = &memo.alternatives(group).next().unwrap().rel else {
            panic!("expected a projection");
        };
        let RelExpr::Filter { child, filters } = &memo.alternatives(*child).next().unwrap().rel else {
            panic!("expected an IS NULL filter");
        };
        assert!(filters[0].to_string().contains("IS NULL"));
        assert!(memo
            .alternatives(*child)
            .all(|e| e.rel.join().is_some_and(|j| j.join_type == JoinType::Left)));
    }

    #[test]
    fn test_anti_join_with_null_safe_filter_is_left_alone() {
        let (mut memo, id) = memo_with(JoinType::Anti, |l, r| {
            Expr::binary(BinaryOp::NullSafeEq, Expr::column(l), Expr::column(r))
        });
        assert_eq!(AntiToLeftRule.apply(&mut memo, id).unwrap(), 0);
    }
}
