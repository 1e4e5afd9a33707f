//! # Merge Join Rule
//!
//! Merges two inputs that are both read in key order from ordered indexes.
//!
//! ## Applicability
//!
//! - The join is INNER or LEFT.
//! - Both inputs read one base table (`TableScan` or `Filter(TableScan)`).
//! - A filter `l.a = r.b` pairs a column of each side, where `l.a` is the first key column of an
//!   ordered index on the left table and `r.b` the first of an ordered index on the right table.
//!   Leading key columns pinned to a constant by the input's own filters are skipped, so
//!   `index (kind, a)` with `kind = 'x'` still yields rows ordered on `a`.
//!
//! The join keeps all of its filters; the merge key is evaluated by the merge itself and the
//! rest are checked on each matched pair. Both index scans are registered as detached expressions of
//! their input groups and pinned by conflict repair when the merge join wins.
//!
//! Disabled by `NO_MERGE_JOIN`.

use joinx_core::error::OptResult;
use joinx_core::expr::{ColumnId, ColumnRef, Expr, JoinType, TableId};
use joinx_core::hint::JoinHints;
use joinx_core::index::Index;
use joinx_core::memo::{constant_binding, Memo};
use joinx_core::rel::{ExprId, IndexScan, RelExpr, RelKind};
use joinx_core::rule::Rule;

use crate::access::{lookup_candidate, LookupCandidate};

/// Implement an equi-join as a merge of two ordered index scans.
pub struct MergeJoinRule;

impl Rule for MergeJoinRule {
    fn name(&self) -> &str {
        "MergeJoin"
    }

    fn kinds(&self) -> &[RelKind] {
        &[RelKind::Join]
    }

    fn enabled(&self, hints: &JoinHints) -> bool {
        !hints.no_merge_join
    }

    fn apply(&self, memo: &mut Memo, expr: ExprId) -> OptResult<usize> {
        let group = memo.expr(expr).group;
        let RelExpr::Join(join) = &memo.expr(expr).rel else {
            return Ok(0);
        };
        if !matches!(join.join_type, JoinType::Inner | JoinType::Left) || join.filters.is_empty() {
            return Ok(0);
        }
        let join = join.clone();
        let (Some(lc), Some(rc)) = (lookup_candidate(memo, join.left), lookup_candidate(memo, join.right)) else {
            return Ok(0);
        };

        let pairs: Vec<(ColumnRef, ColumnRef)> = join
            .filters
            .iter()
            .filter(|f| f.is_simple_equality())
            .filter_map(|f| f.as_column_equality())
            .filter_map(|(a, b)| {
                if a.table == lc.table && b.table == rc.table {
                    Some((a.clone(), b.clone()))
                } else if b.table == lc.table && a.table == rc.table {
                    Some((b.clone(), a.clone()))
                } else {
                    None
                }
            })
            .collect();
        if pairs.is_empty() {
            return Ok(0);
        }

        let mut merges = Vec::new();
        for (li, lidx) in memo.table(lc.vertex).indexes.iter().enumerate() {
            let Some((lkey, lranges)) = ordered_key(lidx, &lc) else {
                continue;
            };
            let Some((lcol, rcol)) = pairs.iter().find(|(l, _)| l.column == lkey) else {
                continue;
            };
            for (ri, ridx) in memo.table(rc.vertex).indexes.iter().enumerate() {
                let Some((rkey, rranges)) = ordered_key(ridx, &rc) else {
                    continue;
                };
                if rkey != rcol.column {
                    continue;
                }
                merges.push((
                    scan(&lc, li, lranges.clone()),
                    scan(&rc, ri, rranges),
                    Expr::column(lcol),
                    Expr::column(rcol),
                ));
            }
        }

        let mut added = 0;
        for (left_scan, right_scan, left_key, right_key) in merges {
            let left_scan = memo.add_detached(join.left, RelExpr::IndexScan(left_scan));
            let right_scan = memo.add_detached(join.right, RelExpr::IndexScan(right_scan));
            let rel = RelExpr::MergeJoin {
                join: join.clone(),
                left_scan,
                right_scan,
                left_key,
                right_key,
            };
            if memo.add_alternative(group, rel).is_some() {
                added += 1;
            }
        }
        Ok(added)
    }
}

/// The first key column of an ordered index not pinned to a constant by the input's filters, with
/// the filters pinning the columns before it.
fn ordered_key(index: &Index, input: &LookupCandidate) -> Option<(ColumnId, Vec<Expr>)> {
    if !index.ordered {
        return None;
    }
    let mut ranges = Vec::new();
    for col in &index.columns {
        match pinned(*col, input.table, &input.filters) {
            Some(filter) => ranges.push(filter.clone()),
            None => return Some((*col, ranges)),
        }
    }
    None
}

fn pinned(col: ColumnId, table: TableId, filters: &[Expr]) -> Option<&Expr> {
    filters
        .iter()
        .find(|f| constant_binding(f).is_some_and(|c| c.table == table && c.column == col))
}

fn scan(input: &LookupCandidate, index: usize, ranges: Vec<Expr>) -> IndexScan {
    let residual = input.filters.iter().filter(|f| !ranges.contains(f)).cloned().collect();
    IndexScan {
        vertex: input.vertex,
        index,
        ranges,
        residual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinx_core::catalog::InMemoryStats;
    use joinx_core::expr::{BinaryOp, ScalarValue};
    use joinx_core::plan::SourceTable;
    use joinx_core::rel::JoinExpr;

    fn setup(right_filter: bool) -> (Memo, ExprId) {
        let a = SourceTable::new(1, "db", "a").with_column(10, "x").with_index("ax", &["x"], false);
        let b = SourceTable::new(2, "db", "b")
            .with_column(20, "kind")
            .with_column(21, "x")
            .with_index("kind_x", &["kind", "x"], false);
        let cond = Expr::col_eq(&a.column_ref("x").unwrap(), &b.column_ref("x").unwrap());
        let kind = Expr::binary(
            BinaryOp::Eq,
            Expr::column(&b.column_ref("kind").unwrap()),
            Expr::Literal(ScalarValue::Utf8("t".into())),
        );
        let stats = InMemoryStats::new();
        let mut memo = Memo::new();
        let va = memo.add_table(a, &stats, 1000.0);
        let vb = memo.add_table(b, &stats, 1000.0);
        let ga = memo.memoize_source(va).unwrap();
        let mut gb = memo.memoize_source(vb).unwrap();
        if right_filter {
            gb = memo.memoize_filter(gb, vec![kind]).unwrap();
        }
        let g = memo.memoize_join(JoinExpr::new(JoinType::Inner, ga, gb, vec![cond])).unwrap();
        let id = memo.group(g).original().unwrap();
        (memo, id)
    }

    #[test]
    fn test_constant_prefix_is_skipped() {
        let (mut memo, id) = setup(true);
        assert_eq!(MergeJoinRule.apply(&mut memo, id).unwrap(), 1);
        let group = memo.expr(id).group;
        let RelExpr::MergeJoin { right_scan, .. } = &memo.alternatives(group).next().unwrap().rel else {
            panic!("expected a merge join");
        };
        let RelExpr::IndexScan(scan) = &memo.expr(*right_scan).rel else {
            panic!("expected an index scan");
        };
        assert_eq!(scan.ranges.len(), 1);
        assert!(scan.residual.is_empty());
    }

    #[test]
    fn test_unpinned_prefix_blocks_merge() {
        let (mut memo, id) = setup(false);
        assert_eq!(MergeJoinRule.apply(&mut memo, id).unwrap(), 0);
    }
}
