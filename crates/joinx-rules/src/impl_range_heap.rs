//! # Range Heap Join Rule
//!
//! Joins each left value to the right rows whose `[min, max]` interval contains it.
//!
//! Both inputs are consumed in order (left by value, right by `min`); right rows enter a min-heap
//! keyed on `max` once their `min` is reached and leave it once `max` falls behind the current
//! value, so each left row is compared only against the intervals that are open at that point.
//!
//! A range predicate is either `l.v BETWEEN r.lo AND r.hi` or a pair of bounds on the same value:
//!
//! ```text
//! r.lo <= l.v AND l.v < r.hi     ⇒   value=l.v  min=r.lo (closed)  max=r.hi (open)
//! ```
//!
//! The value must be a left column and both bounds right columns; the right input must be a base
//! table or subquery.

use joinx_core::error::OptResult;
use joinx_core::expr::{BinaryOp, Expr, JoinType};
use joinx_core::memo::Memo;
use joinx_core::rel::{ExprId, RelExpr, RelKind};
use joinx_core::rule::Rule;

use crate::access::refs_only;

/// Implement an interval-containment join with a sorted sweep and a heap.
pub struct RangeHeapJoinRule;

impl Rule for RangeHeapJoinRule {
    fn name(&self) -> &str {
        "RangeHeapJoin"
    }

    fn kinds(&self) -> &[RelKind] {
        &[RelKind::Join]
    }

    fn apply(&self, memo: &mut Memo, expr: ExprId) -> OptResult<usize> {
        let group = memo.expr(expr).group;
        let RelExpr::Join(join) = &memo.expr(expr).rel else {
            return Ok(0);
        };
        if !matches!(join.join_type, JoinType::Inner | JoinType::Left) || join.filters.is_empty() {
            return Ok(0);
        }
        let right_is_source = memo
            .group(join.right)
            .original()
            .is_some_and(|id| matches!(memo.expr(id).rel, RelExpr::TableScan { .. } | RelExpr::SubqueryAlias { .. }));
        if !right_is_source {
            return Ok(0);
        }

        let left = memo.group(join.left).props.output_tables;
        let right = memo.group(join.right).props.output_tables;
        let is_col_of = |e: &Expr, side| matches!(e, Expr::Column(_)) && refs_only(memo, e, side);
        let alternatives: Vec<RelExpr> = range_filters(&join.filters)
            .into_iter()
            .filter(|r| is_col_of(&r.value, left) && is_col_of(&r.min, right) && is_col_of(&r.max, right))
            .map(|r| RelExpr::RangeHeapJoin {
                join: join.clone(),
                value: r.value,
                min: r.min,
                max: r.max,
                closed_min: r.closed_min,
                closed_max: r.closed_max,
            })
            .collect();

        Ok(alternatives
            .into_iter()
            .filter_map(|rel| memo.add_alternative(group, rel))
            .count())
    }
}

/// `min <(=) value <(=) max`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub value: Expr,
    pub min: Expr,
    pub max: Expr,
    pub closed_min: bool,
    pub closed_max: bool,
}

/// Every range predicate `filters` express: BETWEEN conjuncts, and each value with both a lower and
/// an upper bound among the comparisons.
pub fn range_filters(filters: &[Expr]) -> Vec<RangeFilter> {
    let mut out = Vec::new();
    // (value, bound, closed)
    let mut lower: Vec<(&Expr, &Expr, bool)> = Vec::new();
    let mut upper: Vec<(&Expr, &Expr, bool)> = Vec::new();
    for filter in filters {
        match filter {
            Expr::Between { expr, low, high } => out.push(RangeFilter {
                value: expr.as_ref().clone(),
                min: low.as_ref().clone(),
                max: high.as_ref().clone(),
                closed_min: true,
                closed_max: true,
            }),
            Expr::BinaryOp { op, left, right } => {
                // `a < b`: b bounds a from above and a bounds b from below.
                let (small, big, closed) = match op {
                    BinaryOp::Lt => (left, right, false),
                    BinaryOp::LtEq => (left, right, true),
                    BinaryOp::Gt => (right, left, false),
                    BinaryOp::GtEq => (right, left, true),
                    _ => continue,
                };
                upper.push((small.as_ref(), big.as_ref(), closed));
                lower.push((big.as_ref(), small.as_ref(), closed));
            }
            _ => {}
        }
    }
    for (value, min, closed_min) in &lower {
        for (_, max, closed_max) in upper.iter().filter(|(v, ..)| v == value) {
            out.push(RangeFilter {
                value: (*value).clone(),
                min: (*min).clone(),
                max: (*max).clone(),
                closed_min: *closed_min,
                closed_max: *closed_max,
            });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinx_core::catalog::InMemoryStats;
    use joinx_core::plan::SourceTable;
    use joinx_core::rel::JoinExpr;

    fn tables() -> (SourceTable, SourceTable) {
        let a = SourceTable::new(1, "db", "a").with_column(10, "v");
        let b = SourceTable::new(2, "db", "b").with_column(20, "lo").with_column(21, "hi");
        (a, b)
    }

    fn col(t: &SourceTable, name: &str) -> Expr {
        Expr::column(&t.column_ref(name).unwrap())
    }

    #[test]
    fn test_paired_bounds_form_a_range() {
        let (a, b) = tables();
        let filters = vec![
            Expr::binary(BinaryOp::LtEq, col(&b, "lo"), col(&a, "v")),
            Expr::binary(BinaryOp::Lt, col(&a, "v"), col(&b, "hi")),
        ];
        let ranges = range_filters(&filters);
        let r = ranges.iter().find(|r| r.value == col(&a, "v")).unwrap();
        assert_eq!(r.min, col(&b, "lo"));
        assert_eq!(r.max, col(&b, "hi"));
        assert!(r.closed_min);
        assert!(!r.closed_max);
    }

    #[test]
    fn test_between_over_source_gains_range_heap_join() {
        let (a, b) = tables();
        let between = Expr::Between {
            expr: Box::new(col(&a, "v")),
            low: Box::new(col(&b, "lo")),
            high: Box::new(col(&b, "hi")),
        };
        let stats = InMemoryStats::new();
        let mut memo = Memo::new();
        let va = memo.add_table(a, &stats, 1000.0);
        let vb = memo.add_table(b, &stats, 1000.0);
        let ga = memo.memoize_source(va).unwrap();
        let gb = memo.memoize_source(vb).unwrap();
        let g = memo.memoize_join(JoinExpr::new(JoinType::Inner, ga, gb, vec![between.clone()])).unwrap();
        let id = memo.group(g).original().unwrap();
        assert_eq!(RangeHeapJoinRule.apply(&mut memo, id).unwrap(), 1);

        // The mirrored orientation (value on the right) is not a range heap join.
        let mirrored = memo
            .add_alternative(g, RelExpr::Join(JoinExpr::new(JoinType::Inner, gb, ga, vec![between])))
            .unwrap();
        assert_eq!(RangeHeapJoinRule.apply(&mut memo, mirrored).unwrap(), 0);
    }
}
