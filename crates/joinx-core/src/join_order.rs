//! # Join-Order Builder
//!
//! [`JoinOrderBuilder`] turns a resolved join tree into a join hypergraph and enumerates the valid
//! join orders over it, memoizing every discovered join in the [`Memo`].
//!
//! ## Population
//!
//! The tree is walked once, bottom-up:
//!
//! - Every base relation becomes a **vertex** with a singleton group.
//! - Every join becomes one or more **edges**. Inner join conditions are split into one edge per
//!   conjunct so each predicate can be placed independently; a filterless inner or cross join gets
//!   a single filterless edge. Non-inner joins get one edge over their whole condition.
//! - Filter, Having, Project and Max1Row wrap the group of their input and replace it in the plan
//!   map, so later joins over that vertex set join the wrapper. Sort, Limit and Distinct are
//!   recorded as pending requirements on the group they sit on.
//! - The original tree is memoized as-is; it is always one of the alternatives of the root.
//!
//! ## Enumeration
//!
//! ```text
//! for subset in 1..2^n (non-singletons, ascending):
//!     for s1 ⊂ subset with s1 <= subset/2:
//!         s2 = subset - s1
//!         if plans[s1] and plans[s2] exist: add_plans(s1, s2)
//! ```
//!
//! Ascending numeric order guarantees both halves of a split are solved before the split is tried.
//! `add_plans` collects the applicable inner edges; an applicable non-inner edge (in either
//! orientation) takes priority and produces a join of its own type. Commutative joins register
//! their mirrored alternative in the same group. Groups are keyed by vertex set, so a vertex set is
//! memoized at most once no matter how many splits reach it.
//!
//! ## Fast Path
//!
//! Above the vertex threshold (or with a cross join present) and without an ordering hint, the
//! builder first tries to chain single-column equalities outward from the relation holding the
//! root's strict key, building one left-deep sequence of inner joins. The fast path never errors;
//! when its narrow preconditions fail it declines and the caller keeps the other alternatives.

use crate::bitset::{EdgeSet, VertexSet, MAX_SET_SIZE};
use crate::catalog::StatsProvider;
use crate::edge::{Edge, JoinOperator};
use crate::error::{OptResult, OptimizeError};
use crate::expr::{ColumnId, Expr, JoinType};
use crate::memo::Memo;
use crate::plan::LogicalPlan;
use crate::planner::PlannerConfig;
use crate::rel::{GroupId, JoinExpr, RelExpr};
use std::collections::HashMap;
use tracing::{debug, trace};

pub struct JoinOrderBuilder {
    pub memo: Memo,
    config: PlannerConfig,
    /// Vertex set → group joining exactly those vertices.
    plans: HashMap<VertexSet, GroupId>,
    edges: Vec<Edge>,
    inner_edges: EdgeSet,
    non_inner_edges: EdgeSet,
    vertex_groups: Vec<GroupId>,
    has_cross_join: bool,
}

impl JoinOrderBuilder {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            memo: Memo::new(),
            config,
            plans: HashMap::new(),
            edges: Vec::new(),
            inner_edges: EdgeSet::EMPTY,
            non_inner_edges: EdgeSet::EMPTY,
            vertex_groups: Vec::new(),
            has_cross_join: false,
        }
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn num_vertices(&self) -> usize {
        self.vertex_groups.len()
    }

    pub fn has_cross_join(&self) -> bool {
        self.has_cross_join
    }

    /// The group joining exactly `set`, if one was memoized.
    pub fn plan_for(&self, set: VertexSet) -> Option<GroupId> {
        self.plans.get(&set).copied()
    }

    /// Every memoized vertex set.
    pub fn planned_sets(&self) -> impl Iterator<Item = VertexSet> + '_ {
        self.plans.keys().copied()
    }

    pub fn all_vertices(&self) -> VertexSet {
        VertexSet::first_n(self.vertex_groups.len())
    }

    fn all_edges(&self) -> EdgeSet {
        EdgeSet::first_n(self.edges.len())
    }

    // ------------------------------------------------------------------
    // Population
    // ------------------------------------------------------------------

    /// Build vertices, edges and the initial memo from `plan`. Returns the root group.
    pub fn populate(&mut self, plan: &LogicalPlan, stats: &dyn StatsProvider) -> OptResult<GroupId> {
        let relations = plan.sources().len();
        if relations > MAX_SET_SIZE {
            return Err(OptimizeError::Capacity {
                what: "relations",
                count: relations,
                max: MAX_SET_SIZE,
            });
        }
        let (_, _, root) = self.populate_subgraph(plan, stats, false)?;
        self.memo.root = Some(root);
        debug!(
            vertices = self.num_vertices(),
            edges = self.edges.len(),
            groups = self.memo.num_groups(),
            root = %root,
            "populated join graph"
        );
        for (i, e) in self.edges.iter().enumerate() {
            trace!(edge = i, "{e}");
        }
        Ok(root)
    }

    fn populate_subgraph(
        &mut self,
        plan: &LogicalPlan,
        stats: &dyn StatsProvider,
        under_join: bool,
    ) -> OptResult<(VertexSet, EdgeSet, GroupId)> {
        let start_v = self.all_vertices();
        let start_e = self.all_edges();
        let group = match plan {
            LogicalPlan::Source(table) => {
                let vertex = self.memo.add_table(table.clone(), stats, self.config.default_row_count);
                let group = self.memo.memoize_source(vertex)?;
                self.plans.insert(VertexSet::single(vertex), group);
                self.vertex_groups.push(group);
                group
            }
            LogicalPlan::Filter { predicate, input } | LogicalPlan::Having { predicate, input } => {
                let (v, e, child) = self.populate_subgraph(input, stats, under_join)?;
                check_wrapper(plan, v, under_join)?;
                let group = self.memo.memoize_filter(child, Expr::split_conjuncts(Some(predicate)))?;
                self.plans.insert(v, group);
                return Ok((v, e, group));
            }
            LogicalPlan::Project { columns, input } => {
                let (v, e, child) = self.populate_subgraph(input, stats, under_join)?;
                check_wrapper(plan, v, under_join)?;
                let group = self.memo.memoize_project(child, columns.clone())?;
                self.plans.insert(v, group);
                return Ok((v, e, group));
            }
            LogicalPlan::Max1Row { input } => {
                let (v, e, child) = self.populate_subgraph(input, stats, under_join)?;
                check_wrapper(plan, v, under_join)?;
                let group = self.memo.memoize_max1row(child)?;
                self.plans.insert(v, group);
                return Ok((v, e, group));
            }
            LogicalPlan::Sort { keys, input } => {
                let (v, _, group) = self.populate_subgraph(input, stats, under_join)?;
                check_wrapper(plan, v, under_join)?;
                self.memo.group_mut(group).props.sort = keys.clone();
                group
            }
            LogicalPlan::Limit { count, input } => {
                let (v, _, group) = self.populate_subgraph(input, stats, under_join)?;
                check_wrapper(plan, v, under_join)?;
                let props = &mut self.memo.group_mut(group).props;
                props.limit = Some(*count);
                props.row_count = props.row_count.min(*count as f64);
                group
            }
            LogicalPlan::Distinct { input } => {
                let (v, _, group) = self.populate_subgraph(input, stats, under_join)?;
                check_wrapper(plan, v, under_join)?;
                self.memo.group_mut(group).props.pending_distinct = true;
                group
            }
            LogicalPlan::Join {
                join_type,
                condition,
                left,
                right,
            } => {
                // A RIGHT JOIN B is B LEFT JOIN A.
                let (jt, left, right) = match join_type {
                    JoinType::Right => (JoinType::Left, right, left),
                    jt => (*jt, left, right),
                };
                if jt == JoinType::Cross {
                    self.has_cross_join = true;
                }
                self.build_join_op(jt, condition.as_ref(), left, right, stats)?
            }
            LogicalPlan::Opaque { kind, .. } => {
                return Err(OptimizeError::Unsupported(kind.clone()));
            }
        };
        Ok((self.all_vertices() - start_v, self.all_edges() - start_e, group))
    }

    fn build_join_op(
        &mut self,
        join_type: JoinType,
        condition: Option<&Expr>,
        left: &LogicalPlan,
        right: &LogicalPlan,
        stats: &dyn StatsProvider,
    ) -> OptResult<GroupId> {
        let (left_vertices, left_edges, _) = self.populate_subgraph(left, stats, true)?;
        let (right_vertices, right_edges, _) = self.populate_subgraph(right, stats, true)?;
        let op = JoinOperator {
            join_type,
            left_vertices,
            right_vertices,
            left_edges,
            right_edges,
        };
        let filters = Expr::split_conjuncts(condition);
        let union = left_vertices | right_vertices;
        let group = match self.plans.get(&union) {
            Some(g) => *g,
            None => {
                let l = self.plan_or_err(left_vertices)?;
                let r = self.plan_or_err(right_vertices)?;
                let g = self
                    .memo
                    .memoize_join(JoinExpr::new(join_type, l, r, filters.clone()))?;
                self.plans.insert(union, g);
                g
            }
        };

        if join_type.is_inner() {
            if filters.is_empty() {
                self.make_edge(op, Vec::new())?;
            } else {
                for f in filters {
                    self.make_edge(op, vec![f])?;
                }
            }
        } else {
            self.make_edge(op, filters)?;
        }
        Ok(group)
    }

    fn plan_or_err(&self, set: VertexSet) -> OptResult<GroupId> {
        self.plan_for(set)
            .ok_or_else(|| OptimizeError::invariant(format!("no plan for vertex set {set}")))
    }

    fn make_edge(&mut self, op: JoinOperator, filters: Vec<Expr>) -> OptResult<()> {
        if self.edges.len() >= MAX_SET_SIZE {
            return Err(OptimizeError::Capacity {
                what: "join predicates",
                count: self.edges.len() + 1,
                max: MAX_SET_SIZE,
            });
        }
        let ses = filters
            .iter()
            .fold(VertexSet::EMPTY, |acc, f| acc | self.memo.expr_vertices(f));
        let null_rejected = filters
            .iter()
            .flat_map(|f| f.null_rejected_tables())
            .filter_map(|t| self.memo.vertex_of_table(t))
            .collect();
        let mut edge = Edge::new(op, filters, ses, null_rejected);
        edge.calc_tes(&self.edges);
        let idx = self.edges.len();
        if edge.is_inner() {
            self.inner_edges.insert(idx);
        } else {
            self.non_inner_edges.insert(idx);
        }
        self.edges.push(edge);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reordering
    // ------------------------------------------------------------------

    fn use_fast_reorder(&self) -> bool {
        if self.memo.hints.has_order() {
            return false;
        }
        self.config.force_fast_path || self.num_vertices() > self.config.fast_path_threshold
    }

    /// Enumerate join orders for the populated graph. Hints must already be attached to the memo.
    pub fn reorder(&mut self) -> OptResult<()> {
        let root = self
            .memo
            .root
            .ok_or_else(|| OptimizeError::invariant("reorder called before populate"))?;
        if self.use_fast_reorder() {
            let built = self.build_single_lookup_plan()?;
            debug!(built, vertices = self.num_vertices(), "fast-path join ordering");
            return Ok(());
        }
        if self.has_cross_join && !self.memo.hints.has_order() && self.build_single_lookup_plan()? {
            debug!("cross join resolved by lookup chain");
            return Ok(());
        }
        self.ensure_closure(root)?;
        self.enumerate()
    }

    /// DPsube subset enumeration.
    pub fn enumerate(&mut self) -> OptResult<()> {
        let all = self.all_vertices();
        let before = self.memo.num_groups();
        for subset in all.subsets() {
            if subset.is_singleton() {
                continue;
            }
            let half = subset.bits() / 2;
            for s1 in subset.subsets() {
                if s1.bits() > half {
                    break;
                }
                self.add_plans(s1, subset - s1)?;
            }
        }
        debug!(
            new_groups = self.memo.num_groups() - before,
            exprs = self.memo.num_exprs(),
            "enumerated join orders"
        );
        Ok(())
    }

    fn add_plans(&mut self, s1: VertexSet, s2: VertexSet) -> OptResult<()> {
        if !self.plans.contains_key(&s1) || !self.plans.contains_key(&s2) {
            return Ok(());
        }

        let mut inner_filters = Vec::new();
        let mut add_inner = false;
        let mut redundant = false;
        for i in self.inner_edges.iter() {
            let e = &self.edges[i];
            if e.applicable(s1, s2) {
                inner_filters.extend(e.filters.iter().cloned());
                redundant |= e.is_redundant(s1, s2);
                add_inner = true;
            }
        }

        for i in self.non_inner_edges.iter() {
            let e = &self.edges[i];
            let oriented = if e.applicable(s1, s2) {
                Some((s1, s2))
            } else if e.applicable(s2, s1) {
                Some((s2, s1))
            } else {
                None
            };
            if let Some((l, r)) = oriented {
                if !inner_filters.is_empty() {
                    // An inner predicate spanning this split would be dropped by the outer join.
                    return Ok(());
                }
                let (jt, filters, redundant) = (e.op.join_type, e.filters.clone(), e.is_redundant(l, r));
                return self.add_join(jt, l, r, filters, redundant);
            }
        }

        if add_inner {
            let jt = if inner_filters.is_empty() {
                JoinType::Cross
            } else {
                JoinType::Inner
            };
            self.add_join(jt, s1, s2, inner_filters, redundant)?;
        }
        Ok(())
    }

    fn add_join(&mut self, jt: JoinType, s1: VertexSet, s2: VertexSet, filters: Vec<Expr>, redundant: bool) -> OptResult<()> {
        if s1.intersects(s2) {
            return Err(OptimizeError::invariant(format!("join inputs {s1} and {s2} are not disjoint")));
        }
        let union = s1 | s2;
        let left = self.plan_or_err(s1)?;
        let right = self.plan_or_err(s2)?;

        let mut group = self.plan_for(union);
        if !redundant {
            match group {
                None => {
                    let g = self
                        .memo
                        .memoize_join(JoinExpr::new(jt, left, right, filters.clone()))?;
                    trace!(set = %union, group = %g, "memoized join");
                    self.plans.insert(union, g);
                    group = Some(g);
                }
                Some(g) => self.add_join_to_group(jt, left, right, filters.clone(), g),
            }
        }
        if jt.is_commutative() {
            if let Some(g) = group {
                self.add_join_to_group(jt, right, left, filters, g);
            }
        }
        Ok(())
    }

    fn add_join_to_group(&mut self, jt: JoinType, left: GroupId, right: GroupId, filters: Vec<Expr>, group: GroupId) {
        let target = self.memo.join_group_of(group);
        self.memo
            .add_alternative(target, RelExpr::Join(JoinExpr::new(jt, left, right, filters)));
    }

    // ------------------------------------------------------------------
    // Transitive closure
    // ------------------------------------------------------------------

    /// Add an inner edge for every pair of equivalent columns of `group` without an explicit
    /// equality, so orders connected only through transitivity become reachable.
    pub fn ensure_closure(&mut self, group: GroupId) -> OptResult<()> {
        let equivs = self.memo.group(group).props.fds.equivs.clone();
        for class in equivs {
            let cols: Vec<ColumnId> = class.iter().collect();
            for (i, &a) in cols.iter().enumerate() {
                for &b in &cols[i + 1..] {
                    if !self.has_eq_edge(a, b) {
                        self.make_transitive_edge(a, b)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn has_eq_edge(&self, a: ColumnId, b: ColumnId) -> bool {
        self.inner_edges.iter().any(|i| {
            self.edges[i].filters.iter().any(|f| {
                f.as_column_equality().is_some_and(|(l, r)| {
                    (l.column == a && r.column == b) || (l.column == b && r.column == a)
                })
            })
        })
    }

    fn make_transitive_edge(&mut self, a: ColumnId, b: ColumnId) -> OptResult<()> {
        let (Some(ca), Some(cb)) = (self.memo.column_ref(a).cloned(), self.memo.column_ref(b).cloned()) else {
            return Ok(());
        };
        let (Some(va), Some(vb)) = (self.memo.vertex_of_table(ca.table), self.memo.vertex_of_table(cb.table)) else {
            return Ok(());
        };
        let vert = VertexSet::single(va) | VertexSet::single(vb);

        // The innermost operator that has the two vertices on opposite sides.
        let op = self.edges.iter().map(|e| e.op).find(|op| {
            vert.is_subset_of(op.left_vertices | op.right_vertices)
                && !vert.is_subset_of(op.left_vertices)
                && !vert.is_subset_of(op.right_vertices)
        });
        let Some(op) = op.filter(|op| op.join_type.is_inner()) else {
            return Ok(());
        };
        trace!(left = %ca, right = %cb, "synthesized transitive edge");
        self.make_edge(op, vec![Expr::col_eq(&ca, &cb)])
    }

    // ------------------------------------------------------------------
    // Fast path
    // ------------------------------------------------------------------

    /// Build one left-deep chain of inner joins by following single-column equalities from the
    /// relation holding the root's strict key. Returns whether the chain covers every vertex.
    pub fn build_single_lookup_plan(&mut self) -> OptResult<bool> {
        let Some(root) = self.memo.root else {
            return Ok(false);
        };
        let Some(key) = self.memo.group(root).props.fds.strict_key().cloned() else {
            return Ok(false);
        };
        if key.len() != 1 || self.edges.iter().any(|e| !e.is_inner()) {
            return Ok(false);
        }
        let Some(key_col) = key.first() else {
            return Ok(false);
        };
        let Some(start) = self
            .memo
            .tables()
            .iter()
            .position(|t| t.source.columns.iter().any(|c| c.id == key_col))
        else {
            return Ok(false);
        };

        let all = self.all_vertices();
        let mut joined = VertexSet::single(start);
        let mut used = EdgeSet::EMPTY;
        let mut success = false;
        while joined != all {
            let mut candidates = Vec::new();
            for (i, edge) in self.edges.iter().enumerate() {
                if used.contains(i) || edge.filters.is_empty() {
                    continue;
                }
                let [filter] = edge.filters.as_slice() else {
                    return Err(OptimizeError::invariant("inner edge with more than one filter"));
                };
                let tables = self.memo.expr_vertices(filter);
                if tables.len() != 2 || !filter.is_simple_equality() {
                    return Ok(false);
                }
                let next = tables - joined;
                if next.is_singleton() && tables.intersects(joined) {
                    candidates.push((i, next));
                }
            }

            match candidates.as_slice() {
                [] => {
                    for v in (all - joined).iter() {
                        let next = VertexSet::single(v);
                        self.add_join(JoinType::Cross, joined, next, Vec::new(), false)?;
                        joined = joined | next;
                    }
                    return Ok(false);
                }
                [(i, next)] => {
                    let (i, next) = (*i, *next);
                    let redundant = self.edges[i].is_redundant(joined, next);
                    let filters = self.edges[i].filters.clone();
                    self.add_join(JoinType::Inner, joined, next, filters, redundant)?;
                    joined = joined | next;
                    used.insert(i);
                    success = true;
                }
                _ => return Ok(false),
            }
        }
        Ok(success)
    }
}

/// Wrappers over a multi-relation join input cannot be reordered across.
fn check_wrapper(plan: &LogicalPlan, vertices: VertexSet, under_join: bool) -> OptResult<()> {
    if under_join && vertices.len() > 1 {
        return Err(OptimizeError::Unsupported(format!(
            "{} over a join inside another join",
            plan.kind_name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryStats;
    use crate::plan::SourceTable;

    fn table(id: u32, name: &str) -> SourceTable {
        SourceTable::new(id, "db", name)
            .with_column(id * 10, "id")
            .with_column(id * 10 + 1, "x")
            .with_index("PRIMARY", &["id"], true)
    }

    fn eq(a: &SourceTable, ac: &str, b: &SourceTable, bc: &str) -> Expr {
        Expr::col_eq(&a.column_ref(ac).unwrap(), &b.column_ref(bc).unwrap())
    }

    fn builder() -> JoinOrderBuilder {
        JoinOrderBuilder::new(PlannerConfig::default())
    }

    #[test]
    fn test_inner_conjuncts_become_separate_edges() {
        let (a, b) = (table(1, "a"), table(2, "b"));
        let cond = Expr::And(vec![eq(&a, "id", &b, "id"), eq(&a, "x", &b, "x")]);
        let plan = LogicalPlan::inner(LogicalPlan::source(a), LogicalPlan::source(b), cond);
        let mut jb = builder();
        jb.populate(&plan, &InMemoryStats::new()).unwrap();
        assert_eq!(jb.num_vertices(), 2);
        assert_eq!(jb.edges().len(), 2);
        assert!(jb.edges().iter().all(|e| e.filters.len() == 1));
    }

    #[test]
    fn test_right_join_normalized_to_left() {
        let (a, b) = (table(1, "a"), table(2, "b"));
        let cond = eq(&a, "id", &b, "id");
        let plan = LogicalPlan::join(JoinType::Right, LogicalPlan::source(a), LogicalPlan::source(b), Some(cond));
        let mut jb = builder();
        jb.populate(&plan, &InMemoryStats::new()).unwrap();
        let e = &jb.edges()[0];
        assert_eq!(e.op.join_type, JoinType::Left);
        assert_eq!(e.op.left_vertices, VertexSet::single(1));
        assert_eq!(e.op.right_vertices, VertexSet::single(0));
    }

    #[test]
    fn test_opaque_node_is_unsupported() {
        let a = table(1, "a");
        let plan = LogicalPlan::Opaque {
            kind: "Window".into(),
            input: Some(Box::new(LogicalPlan::source(a))),
        };
        let err = builder().populate(&plan, &InMemoryStats::new()).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_filter_over_nested_join_is_unsupported() {
        let (a, b, c) = (table(1, "a"), table(2, "b"), table(3, "c"));
        let ab = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "id", &b, "id"))
            .filter(eq(&a, "x", &b, "x"));
        let plan = LogicalPlan::inner(ab, LogicalPlan::source(c.clone()), eq(&b, "x", &c, "x"));
        let err = builder().populate(&plan, &InMemoryStats::new()).unwrap_err();
        assert!(matches!(err, OptimizeError::Unsupported(_)));
    }

    #[test]
    fn test_closure_synthesizes_transitive_edge() {
        // a.x = b.x AND b.x = c.x implies a.x = c.x.
        let (a, b, c) = (table(1, "a"), table(2, "b"), table(3, "c"));
        let ab = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "x", &b, "x"));
        let plan = LogicalPlan::inner(ab, LogicalPlan::source(c.clone()), eq(&b, "x", &c, "x"));
        let mut jb = builder();
        jb.populate(&plan, &InMemoryStats::new()).unwrap();
        jb.reorder().unwrap();
        assert_eq!(jb.edges().len(), 3);
        let ac = VertexSet::single(0) | VertexSet::single(2);
        assert!(jb.plan_for(ac).is_some());
    }
}
