//! # Lookup Join Rule
//!
//! A lookup join probes an index on its right input once per left row instead of reading the
//! right input in full.
//!
//! ## Applicability
//!
//! - The join is INNER, LEFT or SEMI and has filters.
//! - The right group reads one base table: `TableScan(t)` or `Filter(TableScan(t))`.
//! - Some index on `t` has a key prefix bound by equalities (`t.k = <expr>`, `t.k <=> <expr>`)
//!   whose other side does not read `t`. Filters on `t` itself count, so `t.k = 5` binds too.
//!
//! Each usable index yields one `LookupJoin`. The index scan it probes is registered in the right
//! group as a detached expression; if the lookup join wins, conflict repair installs that scan as
//! the right group's best plan. Matched filters move into the probe key; the rest stay on the join.
//!
//! A lookup is *injective* when the index is unique, fully bound and bound without `<=>`: each probe
//! returns at most one row.
//!
//! ## Concat Lookups
//!
//! When the only join filter is a disjunction and every disjunct binds some index, the join gains a
//! `ConcatJoin`: one lookup per disjunct, results concatenated.

use joinx_core::error::OptResult;
use joinx_core::expr::{Expr, JoinType};
use joinx_core::memo::Memo;
use joinx_core::rel::{ExprId, GroupId, IndexScan, JoinExpr, Lookup, RelExpr, RelKind};
use joinx_core::rule::Rule;

use crate::access::{key_bindings, lookup_candidate, unmatched, LookupCandidate};

/// Implement a join as index probes into its right input.
pub struct LookupJoinRule;

impl Rule for LookupJoinRule {
    fn name(&self) -> &str {
        "LookupJoin"
    }

    fn kinds(&self) -> &[RelKind] {
        &[RelKind::Join]
    }

    fn apply(&self, memo: &mut Memo, expr: ExprId) -> OptResult<usize> {
        let group = memo.expr(expr).group;
        let RelExpr::Join(join) = &memo.expr(expr).rel else {
            return Ok(0);
        };
        if !matches!(join.join_type, JoinType::Inner | JoinType::Left | JoinType::Semi) || join.filters.is_empty() {
            return Ok(0);
        }
        let join = join.clone();
        let Some(candidate) = lookup_candidate(memo, join.right) else {
            return Ok(0);
        };

        if let [Expr::Or(disjuncts)] = join.filters.as_slice() {
            return Ok(add_concat_join(memo, group, &join, &candidate, disjuncts).into());
        }

        let mut conditions = join.filters.clone();
        conditions.extend(candidate.filters.iter().cloned());
        let table = memo.table(candidate.vertex);
        let probes: Vec<(IndexScan, Vec<Expr>, bool, Vec<Expr>)> = table
            .indexes
            .iter()
            .enumerate()
            .filter_map(|(i, index)| {
                let bindings = key_bindings(&index.columns, candidate.table, &conditions);
                let full = bindings.len() == index.columns.len();
                if bindings.is_empty() || (!index.ordered && !full) {
                    return None;
                }
                let injective = index.unique && full && bindings.iter().all(|b| !b.null_safe);
                let scan = IndexScan {
                    vertex: candidate.vertex,
                    index: i,
                    ranges: bindings.iter().map(|b| b.filter.clone()).collect(),
                    residual: unmatched(&candidate.filters, &bindings),
                };
                let keys = bindings.iter().map(|b| b.key.clone()).collect();
                Some((scan, keys, injective, unmatched(&join.filters, &bindings)))
            })
            .collect();

        let mut added = 0;
        for (scan, key_exprs, injective, remaining) in probes {
            let scan = memo.add_detached(join.right, RelExpr::IndexScan(scan));
            let rel = RelExpr::LookupJoin {
                join: JoinExpr::new(join.join_type, join.left, join.right, remaining),
                lookup: Lookup {
                    scan,
                    key_exprs,
                    injective,
                },
            };
            if memo.add_alternative(group, rel).is_some() {
                added += 1;
            }
        }
        Ok(added)
    }
}

/// One lookup per disjunct, or nothing when some disjunct binds no index.
fn add_concat_join(
    memo: &mut Memo,
    group: GroupId,
    join: &JoinExpr,
    candidate: &LookupCandidate,
    disjuncts: &[Expr],
) -> bool {
    let table = memo.table(candidate.vertex);
    let mut scans = Vec::with_capacity(disjuncts.len());
    for disjunct in disjuncts {
        let mut conditions: Vec<Expr> = disjunct.conjuncts().into_iter().cloned().collect();
        conditions.extend(candidate.filters.iter().cloned());
        let found = table.indexes.iter().enumerate().find_map(|(i, index)| {
            let bindings = key_bindings(&index.columns, candidate.table, &conditions);
            if bindings.is_empty() || (!index.ordered && bindings.len() < index.columns.len()) {
                return None;
            }
            let injective = index.unique && bindings.len() == index.columns.len() && bindings.iter().all(|b| !b.null_safe);
            let scan = IndexScan {
                vertex: candidate.vertex,
                index: i,
                ranges: bindings.iter().map(|b| b.filter.clone()).collect(),
                residual: unmatched(&conditions, &bindings),
            };
            Some((scan, bindings.iter().map(|b| b.key.clone()).collect::<Vec<_>>(), injective))
        });
        match found {
            Some(probe) => scans.push(probe),
            None => return false,
        }
    }

    let lookups = scans
        .into_iter()
        .map(|(scan, key_exprs, injective)| Lookup {
            scan: memo.add_detached(join.right, RelExpr::IndexScan(scan)),
            key_exprs,
            injective,
        })
        .collect();
    memo.add_alternative(
        group,
        RelExpr::ConcatJoin {
            join: join.clone(),
            lookups,
        },
    )
    .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinx_core::catalog::InMemoryStats;
    use joinx_core::plan::SourceTable;

    struct Fixture {
        memo: Memo,
        join: ExprId,
        right: GroupId,
    }

    fn fixture(join_type: JoinType, unique: bool, filter: impl Fn(&SourceTable, &SourceTable) -> Expr) -> Fixture {
        let a = SourceTable::new(1, "db", "a").with_column(10, "x").with_column(11, "y");
        let b = SourceTable::new(2, "db", "b")
            .with_column(20, "id")
            .with_column(21, "z")
            .with_index("pk", &["id"], unique)
            .with_index("z_idx", &["z"], false);
        let cond = filter(&a, &b);
        let stats = InMemoryStats::new().with_rows("db", "a", 10.0).with_rows("db", "b", 10_000.0);
        let mut memo = Memo::new();
        let va = memo.add_table(a, &stats, 1000.0);
        let vb = memo.add_table(b, &stats, 1000.0);
        let ga = memo.memoize_source(va).unwrap();
        let gb = memo.memoize_source(vb).unwrap();
        let g = memo.memoize_join(JoinExpr::new(join_type, ga, gb, vec![cond])).unwrap();
        let join = memo.group(g).original().unwrap();
        Fixture { memo, join, right: gb }
    }

    fn eq(a: &SourceTable, ac: &str, b: &SourceTable, bc: &str) -> Expr {
        Expr::col_eq(&a.column_ref(ac).unwrap(), &b.column_ref(bc).unwrap())
    }

    #[test]
    fn test_unique_fully_bound_index_is_injective() {
        let mut f = fixture(JoinType::Inner, true, |a, b| eq(a, "x", b, "id"));
        assert_eq!(LookupJoinRule.apply(&mut f.memo, f.join).unwrap(), 1);

        let group = f.memo.expr(f.join).group;
        let best = f.memo.alternatives(group).next().unwrap().id;
        let RelExpr::LookupJoin { join, lookup } = &f.memo.expr(best).rel else {
            panic!("expected a lookup join");
        };
        assert!(lookup.injective);
        assert!(join.filters.is_empty());
        assert_eq!(f.memo.expr(lookup.scan).group, f.right);
        // The probe scan does not compete with the right group's own alternatives.
        assert_eq!(f.memo.group(f.right).exprs.len(), 1);
        assert_eq!(f.memo.estimated_rows(best), 10.0);
    }

    #[test]
    fn test_or_filter_becomes_concat_join() {
        let mut f = fixture(JoinType::Inner, false, |a, b| {
            Expr::Or(vec![eq(a, "x", b, "id"), eq(a, "y", b, "z")])
        });
        assert_eq!(LookupJoinRule.apply(&mut f.memo, f.join).unwrap(), 1);
        let group = f.memo.expr(f.join).group;
        let RelExpr::ConcatJoin { lookups, .. } = &f.memo.alternatives(group).next().unwrap().rel else {
            panic!("expected a concat join");
        };
        assert_eq!(lookups.len(), 2);
        assert!(lookups.iter().all(|l| !l.injective));
    }

    #[test]
    fn test_anti_join_is_not_implemented_as_lookup() {
        let mut f = fixture(JoinType::Anti, true, |a, b| eq(a, "x", b, "id"));
        assert_eq!(LookupJoinRule.apply(&mut f.memo, f.join).unwrap(), 0);
    }
}
