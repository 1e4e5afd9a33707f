//! # Memo Search
//!
//! Once the enumerator has filled the memo with every valid join order, the search runs two
//! phases over it:
//!
//! 1. **Explore** ([`MemoSearch::explore`]): apply the exploration rules of a [`RuleRegistry`], one
//!    rule at a time, to every matching group alternative. Rules add physical alternatives (index
//!    scans, lookup/merge/hash/range-heap joins) next to the logical ones.
//!
//! 2. **Optimize** ([`MemoSearch::optimize`]): a bottom-up costing pass from the root. Each group is
//!    solved once, post-order, behind its `done` flag:
//!
//! ```text
//! optimize_group(G):
//!     if G.done: return
//!     for alt in G.exprs:
//!         optimize_group(child) for each child
//!         alt.cost = coster(alt) + Σ cost(streamed children) [+ hash distinct]
//!     update_best(G)
//!     G.done = true
//! ```
//!
//! ## Hints
//!
//! `update_best` prefers the cheapest alternative that satisfies every active hint and whose child
//! groups did too. When no alternative qualifies, it falls back to the unconstrained minimum; hints
//! never block optimization.
//!
//! ## Conflict Repair
//!
//! Lookup and merge joins pin an index scan on their inner input. Costing each group independently
//! may pick a cheaper full scan there, so after the root is solved [`MemoSearch::fix_conflicts`]
//! walks the chosen tree and installs the pinned scans as the inputs' best plans.

use crate::bitset::VertexSet;
use crate::cost::CostModel;
use crate::error::{OptResult, OptimizeError};
use crate::memo::Memo;
use crate::properties::{ColSet, DistinctOp};
use crate::rel::{ExprId, GroupId, MemoExpr, RelExpr};
use crate::rule::RuleRegistry;
use tracing::{debug, trace};

/// Runs exploration and costing over one memo.
pub struct MemoSearch<'a> {
    memo: &'a mut Memo,
    cost_model: &'a dyn CostModel,
    /// Total rule applications that added at least one alternative.
    rules_fired: usize,
}

impl<'a> MemoSearch<'a> {
    pub fn new(memo: &'a mut Memo, cost_model: &'a dyn CostModel) -> Self {
        Self {
            memo,
            cost_model,
            rules_fired: 0,
        }
    }

    pub fn rules_fired(&self) -> usize {
        self.rules_fired
    }

    /// Apply every rule enabled by the memo's hints, in registry order.
    pub fn explore(&mut self, registry: &RuleRegistry) -> OptResult<()> {
        for rule in registry.active_rules(&self.memo.hints) {
            let candidates: Vec<ExprId> = self
                .memo
                .groups()
                .iter()
                .flat_map(|g| g.exprs.iter().copied())
                .filter(|id| rule.kinds().contains(&self.memo.expr(*id).rel.kind()))
                .collect();
            let mut added = 0;
            for id in &candidates {
                let n = rule.apply(self.memo, *id)?;
                if n > 0 {
                    trace!(rule = rule.name(), expr = %id, added = n, "rule fired");
                    self.rules_fired += 1;
                }
                added += n;
            }
            debug!(rule = rule.name(), candidates = candidates.len(), added, "applied exploration rule");
        }
        Ok(())
    }

    /// Cost the memo from the root, repair pinned access paths and return the root cost.
    pub fn optimize(&mut self) -> OptResult<f64> {
        let root = self
            .memo
            .root
            .ok_or_else(|| OptimizeError::invariant("optimize called on an empty memo"))?;
        self.optimize_group(root)?;
        self.fix_conflicts(root)?;
        let group = self.memo.group(root);
        if self.memo.hints.is_active() && !group.hint_ok {
            debug!("no plan satisfies every hint, using the cheapest plan");
        }
        debug!(
            root = %root,
            cost = group.cost,
            groups = self.memo.num_groups(),
            exprs = self.memo.num_exprs(),
            "optimization complete"
        );
        Ok(group.cost)
    }

    fn optimize_group(&mut self, group: GroupId) -> OptResult<()> {
        if self.memo.group(group).done {
            return Ok(());
        }
        let exprs = self.memo.group(group).exprs.clone();
        for id in exprs {
            let rel = self.memo.expr(id).rel.clone();
            for child in rel.children() {
                self.optimize_group(child)?;
            }
            let mut cost = self.cost_model.compute_cost(self.memo, self.memo.expr(id));
            cost += streamed_children(&rel)
                .into_iter()
                .map(|c| self.memo.group(c).cost)
                .sum::<f64>();

            let props = &self.memo.group(group).props;
            let distinct = if !props.pending_distinct {
                DistinctOp::None
            } else if self
                .sorted_columns(&rel)
                .is_some_and(|sorted| props.output_cols.is_subset_of(&sorted))
            {
                DistinctOp::Sorted
            } else {
                cost += self.cost_model.hash_distinct_cost(props.row_count);
                DistinctOp::Hash
            };

            let expr = self.memo.expr_mut(id);
            expr.cost = cost;
            expr.distinct = distinct;
        }
        self.update_best(group)?;
        self.memo.group_mut(group).done = true;
        Ok(())
    }

    /// Columns the output of `rel` is sorted on, when it is sorted on a known set.
    fn sorted_columns(&self, rel: &RelExpr) -> Option<ColSet> {
        match rel {
            RelExpr::IndexScan(scan) => {
                let index = self.memo.table(scan.vertex).indexes.get(scan.index)?;
                index.ordered.then(|| index.col_set.clone())
            }
            _ => None,
        }
    }

    fn hint_ok(&self, expr: &MemoExpr) -> bool {
        let children_ok = expr.rel.children().iter().all(|c| self.memo.group(*c).hint_ok);
        let (left, right) = expr
            .rel
            .join()
            .map(|j| {
                (
                    self.memo.group(j.left).props.input_tables,
                    self.memo.group(j.right).props.input_tables,
                )
            })
            .unwrap_or((VertexSet::EMPTY, VertexSet::EMPTY));
        children_ok && self.memo.hints.satisfied_by(&expr.rel, left, right)
    }

    fn update_best(&mut self, group: GroupId) -> OptResult<()> {
        let hints_active = self.memo.hints.is_active();
        let mut cheapest: Option<(ExprId, f64)> = None;
        let mut hinted: Option<(ExprId, f64)> = None;
        for expr in self.memo.alternatives(group) {
            if cheapest.map_or(true, |(_, c)| expr.cost < c) {
                cheapest = Some((expr.id, expr.cost));
            }
            if hints_active && self.hint_ok(expr) && hinted.map_or(true, |(_, c)| expr.cost < c) {
                hinted = Some((expr.id, expr.cost));
            }
        }
        let ((best, cost), hint_ok) = match (hinted, cheapest) {
            (Some(h), _) => (h, true),
            (None, Some(c)) => (c, !hints_active),
            (None, None) => return Err(OptimizeError::invariant(format!("group {group} has no alternatives"))),
        };
        trace!(group = %group, best = %best, cost, hint_ok, "group solved");
        let g = self.memo.group_mut(group);
        g.best = Some(best);
        g.cost = cost;
        g.hint_ok = hint_ok;
        Ok(())
    }

    /// Walk the chosen tree from `group` and install the index scans that lookup and merge joins
    /// depend on as their inputs' best plans.
    pub fn fix_conflicts(&mut self, group: GroupId) -> OptResult<()> {
        let best = self
            .memo
            .group(group)
            .best
            .ok_or_else(|| OptimizeError::invariant(format!("group {group} was not optimized")))?;
        match self.memo.expr(best).rel.clone() {
            RelExpr::MergeJoin {
                join,
                left_scan,
                right_scan,
                ..
            } => {
                self.pin(join.left, left_scan);
                self.pin(join.right, right_scan);
            }
            RelExpr::LookupJoin { join, lookup } => {
                self.pin(join.right, lookup.scan);
                self.fix_conflicts(join.left)?;
            }
            RelExpr::ConcatJoin { join, .. } => self.fix_conflicts(join.left)?,
            rel => {
                for child in rel.children() {
                    self.fix_conflicts(child)?;
                }
            }
        }
        Ok(())
    }

    fn pin(&mut self, group: GroupId, scan: ExprId) {
        if self.memo.group(group).best == Some(scan) {
            return;
        }
        let cost = self.cost_model.compute_cost(self.memo, self.memo.expr(scan));
        self.memo.expr_mut(scan).cost = cost;
        trace!(group = %group, scan = %scan, "pinned index scan");
        let g = self.memo.group_mut(group);
        g.best = Some(scan);
        g.cost = cost;
    }
}

/// Children whose full output the operator consumes. Lookup joins read their right input through
/// the pinned index and merge joins read both inputs that way.
fn streamed_children(rel: &RelExpr) -> Vec<GroupId> {
    match rel {
        RelExpr::LookupJoin { join, .. } | RelExpr::ConcatJoin { join, .. } => vec![join.left],
        RelExpr::MergeJoin { .. } => Vec::new(),
        other => other.children(),
    }
}
