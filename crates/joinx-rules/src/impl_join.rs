//! # Hash Join Rule
//!
//! Builds a hash table on the right input and probes it with the left one.
//!
//! ## Equi Hash Join
//!
//! An INNER or LEFT join whose filters are *all* equalities with one side reading only the left
//! input and the other only the right input:
//!
//! ```text
//! INNER(L, R, l.a = r.b AND l.c + 1 = r.d)
//!   ⇒ HashJoin(L, R, left_keys=[l.a, l.c + 1], right_keys=[r.b, r.d])
//! ```
//!
//! **Requires**: every filter is such an equality, and the right input is not the working table of
//! a recursive CTE (its contents change between iterations, so it cannot be built once).
//! **Cost**: both inputs read once, the right side held in memory.
//!
//! ## Cross Hash Join
//!
//! A CROSS join with no filters whose inputs include a subquery gains a keyless hash join: the
//! subquery is materialized once into the hash table instead of being re-evaluated per left row.

use joinx_core::bitset::VertexSet;
use joinx_core::error::OptResult;
use joinx_core::expr::{BinaryOp, Expr, JoinType};
use joinx_core::memo::Memo;
use joinx_core::plan::SourceKind;
use joinx_core::rel::{ExprId, JoinExpr, RelExpr, RelKind};
use joinx_core::rule::Rule;

use crate::access::refs_only;

/// Implement a join as a hash join.
pub struct HashJoinRule;

impl Rule for HashJoinRule {
    fn name(&self) -> &str {
        "HashJoin"
    }

    fn kinds(&self) -> &[RelKind] {
        &[RelKind::Join]
    }

    fn apply(&self, memo: &mut Memo, expr: ExprId) -> OptResult<usize> {
        let group = memo.expr(expr).group;
        let RelExpr::Join(join) = &memo.expr(expr).rel else {
            return Ok(0);
        };
        let rel = match join.join_type {
            JoinType::Cross if join.filters.is_empty() => {
                let inputs = memo.group(group).props.input_tables;
                if !inputs.iter().any(|v| memo.table(v).source.kind == SourceKind::Subquery) {
                    return Ok(0);
                }
                RelExpr::HashJoin {
                    join: join.clone(),
                    left_keys: Vec::new(),
                    right_keys: Vec::new(),
                }
            }
            JoinType::Inner | JoinType::Left if !join.filters.is_empty() => {
                if is_recursive_table(memo, join) {
                    return Ok(0);
                }
                let left = memo.group(join.left).props.output_tables;
                let right = memo.group(join.right).props.output_tables;
                let Some((left_keys, right_keys)) = equi_keys(memo, &join.filters, left, right) else {
                    return Ok(0);
                };
                RelExpr::HashJoin {
                    join: join.clone(),
                    left_keys,
                    right_keys,
                }
            }
            _ => return Ok(0),
        };
        Ok(usize::from(memo.add_alternative(group, rel).is_some()))
    }
}

fn is_recursive_table(memo: &Memo, join: &JoinExpr) -> bool {
    memo.group(join.right)
        .original()
        .is_some_and(|id| matches!(memo.expr(id).rel, RelExpr::RecursiveTable { .. }))
}

/// Split every filter into a `(left key, right key)` pair, or `None` if some filter is not an
/// equality between the two sides.
fn equi_keys(memo: &Memo, filters: &[Expr], left: VertexSet, right: VertexSet) -> Option<(Vec<Expr>, Vec<Expr>)> {
    let mut left_keys = Vec::with_capacity(filters.len());
    let mut right_keys = Vec::with_capacity(filters.len());
    for filter in filters {
        let Expr::BinaryOp {
            op: BinaryOp::Eq,
            left: a,
            right: b,
        } = filter
        else {
            return None;
        };
        let reads = |e: &Expr, side: VertexSet| !memo.expr_vertices(e).is_empty() && refs_only(memo, e, side);
        if reads(a, left) && reads(b, right) {
            left_keys.push(a.as_ref().clone());
            right_keys.push(b.as_ref().clone());
        } else if reads(b, left) && reads(a, right) {
            left_keys.push(b.as_ref().clone());
            right_keys.push(a.as_ref().clone());
        } else {
            return None;
        }
    }
    Some((left_keys, right_keys))
}
