//! # Index Scan Rule
//!
//! Pushes the filter conjuncts sitting on a base table into an index access.
//!
//! For `Filter(TableScan(t))`, each index of `t` is matched against the conjuncts:
//!
//! ```text
//! index (a, b, c)        filters: a = 1, b > 5, d < 3
//!   a = 1   binds key column a (equality)
//!   b > 5   ranges over the next column b
//!   c       unused; every later column is skipped once a range appears
//!   d < 3   residual, evaluated on the fetched rows
//! ```
//!
//! The group gains `IndexScan(t.index, ranges=[a = 1, b > 5], residual=[d < 3])`. Hash indexes
//! (unordered) only serve full-key equality.
//!
//! The rule is disabled by `NO_ICP`.

use joinx_core::error::OptResult;
use joinx_core::expr::{BinaryOp, ColumnId, Expr, TableId};
use joinx_core::hint::JoinHints;
use joinx_core::memo::{constant_binding, Memo};
use joinx_core::rel::{ExprId, IndexScan, RelExpr, RelKind};
use joinx_core::rule::Rule;

/// Replace `Filter(TableScan)` with an index scan over the constrained key prefix.
pub struct IndexScanRule;

impl Rule for IndexScanRule {
    fn name(&self) -> &str {
        "IndexScan"
    }

    fn kinds(&self) -> &[RelKind] {
        &[RelKind::Filter]
    }

    fn enabled(&self, hints: &JoinHints) -> bool {
        !hints.no_icp
    }

    fn apply(&self, memo: &mut Memo, expr: ExprId) -> OptResult<usize> {
        let group = memo.expr(expr).group;
        let RelExpr::Filter { child, filters } = &memo.expr(expr).rel else {
            return Ok(0);
        };
        let child = memo.group(*child);
        if child.props.limit.is_some() {
            return Ok(0);
        }
        let Some(vertex) = child
            .original()
            .and_then(|id| match memo.expr(id).rel {
                RelExpr::TableScan { vertex } => Some(vertex),
                _ => None,
            })
        else {
            return Ok(0);
        };

        let table = memo.table(vertex);
        let scans: Vec<IndexScan> = table
            .indexes
            .iter()
            .enumerate()
            .filter_map(|(i, index)| {
                let ranges = index_ranges(&index.columns, index.ordered, table.source.id, filters);
                if ranges.is_empty() {
                    return None;
                }
                let residual = filters.iter().filter(|f| !ranges.contains(f)).cloned().collect();
                Some(IndexScan {
                    vertex,
                    index: i,
                    ranges,
                    residual,
                })
            })
            .collect();

        Ok(scans
            .into_iter()
            .filter_map(|scan| memo.add_alternative(group, RelExpr::IndexScan(scan)))
            .count())
    }
}

/// Conjuncts an index on `columns` can answer: equalities on a key prefix, then ranges on the
/// following column of an ordered index.
pub fn index_ranges(columns: &[ColumnId], ordered: bool, table: TableId, filters: &[Expr]) -> Vec<Expr> {
    let mut ranges = Vec::new();
    let mut bound = 0;
    for col in columns {
        let before = ranges.len();
        ranges.extend(
            filters
                .iter()
                .filter(|f| constant_binding(f).is_some_and(|c| c.table == table && c.column == *col))
                .cloned(),
        );
        if ranges.len() == before {
            break;
        }
        bound += 1;
    }

    if !ordered {
        return if bound == columns.len() { ranges } else { Vec::new() };
    }
    if let Some(next) = columns.get(bound) {
        ranges.extend(filters.iter().filter(|f| is_range_on(f, table, *next)).cloned());
    }
    ranges
}

/// `col < const`, `const >= col`, `col BETWEEN const AND const` and the like.
fn is_range_on(filter: &Expr, table: TableId, column: ColumnId) -> bool {
    let is_col = |e: &Expr| matches!(e, Expr::Column(c) if c.table == table && c.column == column);
    match filter {
        Expr::BinaryOp { op, left, right }
            if matches!(op, BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq) =>
        {
            (is_col(left) && right.is_constant()) || (is_col(right) && left.is_constant())
        }
        Expr::Between { expr, low, high } => is_col(expr) && low.is_constant() && high.is_constant(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinx_core::catalog::InMemoryStats;
    use joinx_core::expr::ScalarValue;
    use joinx_core::plan::SourceTable;

    fn lit(v: i64) -> Expr {
        Expr::Literal(ScalarValue::Int64(v))
    }

    fn filtered_memo(filters: Vec<Expr>, t: SourceTable) -> (Memo, ExprId) {
        let mut memo = Memo::new();
        let v = memo.add_table(t, &InMemoryStats::new(), 1000.0);
        let scan = memo.memoize_source(v).unwrap();
        let g = memo.memoize_filter(scan, filters).unwrap();
        let id = memo.group(g).original().unwrap();
        (memo, id)
    }

    fn table() -> SourceTable {
        SourceTable::new(1, "db", "t")
            .with_column(10, "a")
            .with_column(11, "b")
            .with_column(12, "d")
            .with_index("ab", &["a", "b"], false)
    }

    #[test]
    fn test_prefix_equality_and_range_are_pushed() {
        let t = table();
        let a = t.column_ref("a").unwrap();
        let b = t.column_ref("b").unwrap();
        let d = t.column_ref("d").unwrap();
        let filters = vec![
            Expr::binary(BinaryOp::Eq, Expr::column(&a), lit(1)),
            Expr::binary(BinaryOp::Gt, Expr::column(&b), lit(5)),
            Expr::binary(BinaryOp::Lt, Expr::column(&d), lit(3)),
        ];
        let (mut memo, id) = filtered_memo(filters.clone(), t);
        assert_eq!(IndexScanRule.apply(&mut memo, id).unwrap(), 1);

        let group = memo.expr(id).group;
        let RelExpr::IndexScan(scan) = &memo.alternatives(group).next().unwrap().rel else {
            panic!("expected an index scan alternative");
        };
        assert_eq!(scan.ranges, filters[..2].to_vec());
        assert_eq!(scan.residual, filters[2..].to_vec());
    }

    #[test]
    fn test_range_on_non_leading_column_is_not_pushed() {
        let t = table();
        let b = t.column_ref("b").unwrap();
        let (mut memo, id) = filtered_memo(vec![Expr::binary(BinaryOp::Gt, Expr::column(&b), lit(5))], t);
        assert_eq!(IndexScanRule.apply(&mut memo, id).unwrap(), 0);
    }

    #[test]
    fn test_no_icp_disables_rule() {
        let hints = JoinHints {
            no_icp: true,
            ..Default::default()
        };
        assert!(!IndexScanRule.enabled(&hints));
    }
}
