//! End-to-end join ordering tests.
//!
//! These tests populate small join graphs (chains, stars, outer joins), run the enumerator and the
//! full planner, and check the structural guarantees of the memo:
//!
//! - Chain A–B–C: groups {A,B} and {B,C} exist, {A,C} never does, and {A,B,C} is one group.
//! - `(A LEFT JOIN B) INNER JOIN C ON c.x = b.y`: the inner edge's TES includes A.
//! - Non-inner joins never receive a mirrored alternative.
//! - Every join's children cover disjoint vertex sets whose union is the group's set.
//! - Enumeration is idempotent.
//! - `JOIN_ORDER` is honored when satisfiable and falls back otherwise.
//! - An injective lookup join estimates exactly the left input's rows.
//! - Plan cost grows with child cardinality.
//! - Large equality chains and comma joins take the single lookup chain; other predicates keep the
//!   original tree.
//! - A winning lookup or merge join reads its index scans.

use std::sync::Arc;

use joinx_core::bitset::VertexSet;
use joinx_core::catalog::InMemoryStats;
use joinx_core::cost::{BiasedCoster, JoinFamily};
use joinx_core::exec::ExecNode;
use joinx_core::expr::{BinaryOp, Expr, JoinType};
use joinx_core::join_order::JoinOrderBuilder;
use joinx_core::memo::Memo;
use joinx_core::plan::{LogicalPlan, SourceTable};
use joinx_core::rel::RelExpr;
use joinx_core::rule::RuleRegistry;
use joinx_core::search::MemoSearch;
use joinx_core::{JoinPlanner, PlannerConfig};
use joinx_rules::default_rule_registry;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A table with columns `id`, `fk`, `x`, `y` and a unique index on `id`.
fn table(id: u32, name: &str) -> SourceTable {
    SourceTable::new(id, "db", name)
        .with_column(id * 10, "id")
        .with_column(id * 10 + 1, "fk")
        .with_column(id * 10 + 2, "x")
        .with_column(id * 10 + 3, "y")
        .with_index("pk", &["id"], true)
}

fn eq(a: &SourceTable, ac: &str, b: &SourceTable, bc: &str) -> Expr {
    Expr::col_eq(&a.column_ref(ac).unwrap(), &b.column_ref(bc).unwrap())
}

fn set(vertices: &[usize]) -> VertexSet {
    vertices.iter().copied().collect()
}

fn stats(rows: &[(&str, f64)]) -> InMemoryStats {
    rows.iter()
        .fold(InMemoryStats::new(), |s, (name, n)| s.with_rows("db", name, *n))
}

/// `a ⋈ b ON a.fk = b.id ⋈ c ON b.fk = c.id`
fn chain() -> LogicalPlan {
    let (a, b, c) = (table(1, "a"), table(2, "b"), table(3, "c"));
    let ab = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "fk", &b, "id"));
    LogicalPlan::inner(ab, LogicalPlan::source(c.clone()), eq(&b, "fk", &c, "id"))
}

fn reordered(plan: &LogicalPlan, stats: &InMemoryStats) -> JoinOrderBuilder {
    let mut builder = JoinOrderBuilder::new(PlannerConfig::default());
    builder.populate(plan, stats).unwrap();
    builder.reorder().unwrap();
    builder
}

fn planner(stats: InMemoryStats, rules: RuleRegistry) -> JoinPlanner {
    JoinPlanner::new(PlannerConfig::default(), Arc::new(stats), Arc::new(rules))
}

fn join_groups(memo: &Memo, vertices: VertexSet) -> usize {
    memo.groups()
        .iter()
        .filter(|g| g.props.input_tables == vertices)
        .filter(|g| g.original().is_some_and(|e| memo.expr(e).rel.join().is_some()))
        .count()
}

// ---------------------------------------------------------------------------
// Enumeration
// ---------------------------------------------------------------------------

#[test]
fn test_chain_enumerates_connected_subsets_only() {
    let builder = reordered(&chain(), &InMemoryStats::new());
    let planned: Vec<VertexSet> = builder.planned_sets().collect();

    assert!(planned.contains(&set(&[0, 1])));
    assert!(planned.contains(&set(&[1, 2])));
    assert!(!planned.contains(&set(&[0, 2])), "A and C share no predicate");
    assert_eq!(join_groups(&builder.memo, set(&[0, 1, 2])), 1);

    // Both decompositions of {A,B,C} land in the same group.
    let root = builder.plan_for(set(&[0, 1, 2])).unwrap();
    let splits: Vec<(VertexSet, VertexSet)> = builder
        .memo
        .alternatives(root)
        .filter_map(|e| e.rel.join())
        .map(|j| {
            (
                builder.memo.group(j.left).props.input_tables,
                builder.memo.group(j.right).props.input_tables,
            )
        })
        .collect();
    assert!(splits.contains(&(set(&[0, 1]), set(&[2]))));
    assert!(splits.contains(&(set(&[0]), set(&[1, 2]))));
}

#[test]
fn test_left_join_extends_inner_edge_tes() {
    let (a, b, c) = (table(1, "a"), table(2, "b"), table(3, "c"));
    let ab = LogicalPlan::join(
        JoinType::Left,
        LogicalPlan::source(a.clone()),
        LogicalPlan::source(b.clone()),
        Some(eq(&a, "id", &b, "fk")),
    );
    let plan = LogicalPlan::inner(ab, LogicalPlan::source(c.clone()), eq(&c, "x", &b, "y"));
    let builder = reordered(&plan, &InMemoryStats::new());

    let inner = builder
        .edges()
        .iter()
        .find(|e| e.op.join_type == JoinType::Inner)
        .expect("inner edge");
    assert!(inner.tes.contains(0), "TES {} must include A", inner.tes);
    assert!(builder.plan_for(set(&[1, 2])).is_none());
}

#[test]
fn test_non_inner_joins_are_never_mirrored() {
    let (a, b, c) = (table(1, "a"), table(2, "b"), table(3, "c"));
    let ab = LogicalPlan::join(
        JoinType::Left,
        LogicalPlan::source(a.clone()),
        LogicalPlan::source(b.clone()),
        Some(eq(&a, "id", &b, "fk")),
    );
    let plan = LogicalPlan::join(JoinType::Semi, ab, LogicalPlan::source(c.clone()), Some(eq(&a, "x", &c, "x")));
    let builder = reordered(&plan, &InMemoryStats::new());
    let memo = &builder.memo;

    for group in memo.groups() {
        for expr in memo.alternatives(group.id) {
            let Some(join) = expr.rel.join() else { continue };
            if join.join_type.is_commutative() {
                continue;
            }
            let left = memo.group(join.left).props.input_tables;
            let mirrored = memo.alternatives(group.id).filter_map(|e| e.rel.join()).any(|j| {
                j.join_type == join.join_type && memo.group(j.right).props.input_tables == left
            });
            assert!(!mirrored, "{} was mirrored in {}", expr.rel.name(), group.id);
            assert!(left.contains(0), "A stays on the preserved side");
        }
    }
}

#[test]
fn test_join_children_partition_group_vertices() {
    let (f, d1, d2, d3) = (table(1, "f"), table(2, "d1"), table(3, "d2"), table(4, "d3"));
    let mut plan = LogicalPlan::source(f.clone());
    for d in [&d1, &d2] {
        plan = LogicalPlan::inner(plan, LogicalPlan::source(d.clone()), eq(&f, "fk", d, "id"));
    }
    plan = LogicalPlan::join(JoinType::Left, plan, LogicalPlan::source(d3.clone()), Some(eq(&f, "x", &d3, "id")));
    let builder = reordered(&plan, &InMemoryStats::new());
    let memo = &builder.memo;

    for group in memo.groups() {
        for expr in memo.alternatives(group.id) {
            if let Some(join) = expr.rel.join() {
                let l = memo.group(join.left).props.input_tables;
                let r = memo.group(join.right).props.input_tables;
                assert!(!l.intersects(r));
                assert_eq!(l | r, group.props.input_tables);
            }
        }
    }
    assert!(builder.plan_for(set(&[0, 1, 2, 3])).is_some());
}

#[test]
fn test_enumeration_is_idempotent() {
    let mut builder = reordered(&chain(), &InMemoryStats::new());
    let (groups, exprs) = (builder.memo.num_groups(), builder.memo.num_exprs());
    builder.enumerate().unwrap();
    assert_eq!(builder.memo.num_groups(), groups);
    assert_eq!(builder.memo.num_exprs(), exprs);
}

fn chain_table(i: u32) -> SourceTable {
    table(i + 1, &format!("t{i}"))
}

/// `t0 ⋈ t1 ⋈ ... ⋈ t19`, joined on `fk = id`; `extra` adds a conjunct to the `t0`–`t1` edge.
fn long_chain(mut extra: Option<Expr>) -> LogicalPlan {
    let tables: Vec<SourceTable> = (0..20).map(chain_table).collect();
    let mut plan = LogicalPlan::source(tables[0].clone());
    for w in tables.windows(2) {
        let mut cond = eq(&w[0], "fk", &w[1], "id");
        if let Some(extra) = extra.take() {
            cond = Expr::And(vec![cond, extra]);
        }
        plan = LogicalPlan::inner(plan, LogicalPlan::source(w[1].clone()), cond);
    }
    plan
}

fn populated(plan: &LogicalPlan) -> JoinOrderBuilder {
    let mut builder = JoinOrderBuilder::new(PlannerConfig::default());
    builder.populate(plan, &InMemoryStats::new()).unwrap();
    builder
}

#[test]
fn test_large_chain_takes_fast_path() {
    let plan = long_chain(None);
    let mut builder = populated(&plan);
    assert!(builder.build_single_lookup_plan().unwrap());
    assert!(builder.plan_for(builder.all_vertices()).is_some());

    let outcome = planner(InMemoryStats::new(), default_rule_registry()).plan(&plan, &[]).unwrap();
    let optimized = outcome.optimized().expect("planned");
    assert_eq!(optimized.exec.leaf_tables().len(), 20);
    // DP over 20 relations would create far more groups than the single lookup chain.
    assert!(optimized.groups < 200);
}

#[test]
fn test_fast_path_declines_on_range_predicate() {
    let (t0, t1) = (chain_table(0), chain_table(1));
    let plan = long_chain(Some(Expr::binary(
        BinaryOp::Lt,
        Expr::column(&t0.column_ref("x").unwrap()),
        Expr::column(&t1.column_ref("x").unwrap()),
    )));
    let mut builder = populated(&plan);
    let groups = builder.memo.num_groups();
    assert!(!builder.build_single_lookup_plan().unwrap());
    assert_eq!(builder.memo.num_groups(), groups);

    // Above the threshold a declined fast path leaves the original tree in place.
    builder.reorder().unwrap();
    assert!(builder.plan_for(set(&[0, 1])).is_some());
    assert!(builder.plan_for(set(&[1, 2])).is_none());

    let outcome = planner(InMemoryStats::new(), default_rule_registry()).plan(&plan, &[]).unwrap();
    let optimized = outcome.optimized().expect("planned");
    let expected: Vec<String> = (0..20).map(|i| format!("t{i}")).collect();
    assert_eq!(optimized.exec.leaf_tables(), expected);
}

#[test]
fn test_fast_path_declines_on_multi_table_predicate() {
    let (a, b, c) = (table(1, "a"), table(2, "b"), table(3, "c"));
    let col = |t: &SourceTable, name: &str| Expr::column(&t.column_ref(name).unwrap());
    let three_way = Expr::binary(BinaryOp::Eq, col(&a, "x"), Expr::binary(BinaryOp::Add, col(&b, "x"), col(&c, "x")));
    let ab = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "fk", &b, "id"));
    let plan = LogicalPlan::inner(
        ab,
        LogicalPlan::source(c.clone()),
        Expr::And(vec![eq(&b, "fk", &c, "id"), three_way]),
    );

    let mut builder = populated(&plan);
    assert!(!builder.build_single_lookup_plan().unwrap());

    let config = PlannerConfig {
        force_fast_path: true,
        ..PlannerConfig::default()
    };
    let outcome = JoinPlanner::new(config, Arc::new(InMemoryStats::new()), Arc::new(default_rule_registry()))
        .plan(&plan, &[])
        .unwrap();
    let optimized = outcome.optimized().expect("planned");
    assert_eq!(optimized.exec.leaf_tables(), vec!["a", "b", "c"]);
}

#[test]
fn test_cross_join_resolved_by_lookup_chain() {
    let (a, b, c) = (table(1, "a"), table(2, "b"), table(3, "c"));
    let ab = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "fk", &b, "id"));
    let plan = LogicalPlan::join(JoinType::Cross, ab, LogicalPlan::source(c.clone()), Some(eq(&b, "fk", &c, "id")));

    let builder = reordered(&plan, &InMemoryStats::new());
    assert!(builder.has_cross_join());
    assert!(builder.plan_for(set(&[0, 1, 2])).is_some());
    // DP would have planned {b, c}; the lookup chain only extends from a.
    assert!(builder.plan_for(set(&[1, 2])).is_none());
}

// ---------------------------------------------------------------------------
// Hints
// ---------------------------------------------------------------------------

#[test]
fn test_join_order_hint_is_preferred() {
    let stats = stats(&[("a", 10.0), ("b", 1000.0), ("c", 100_000.0)]);
    let outcome = planner(stats, default_rule_registry())
        .plan_with_comment(&chain(), "/*+ JOIN_ORDER(b, a, c) */")
        .unwrap();
    let optimized = outcome.optimized().unwrap();
    assert!(optimized.hints_satisfied);
    assert_eq!(optimized.exec.leaf_tables(), vec!["b", "a", "c"]);
}

#[test]
fn test_unsatisfiable_join_order_falls_back() {
    let (a, b) = (table(1, "a"), table(2, "b"));
    let plan = LogicalPlan::join(
        JoinType::Left,
        LogicalPlan::source(a.clone()),
        LogicalPlan::source(b.clone()),
        Some(eq(&a, "fk", &b, "id")),
    );
    let outcome = planner(InMemoryStats::new(), default_rule_registry())
        .plan_with_comment(&plan, "/*+ JOIN_ORDER(b, a) */")
        .unwrap();
    let optimized = outcome.optimized().unwrap();
    assert!(!optimized.hints_satisfied);
    assert_eq!(optimized.exec.leaf_tables(), vec!["a", "b"]);
}

#[test]
fn test_lookup_join_hint_selects_lookup() {
    let stats = stats(&[("a", 100_000.0), ("b", 10.0)]);
    let (a, b) = (table(1, "a"), table(2, "b"));
    let plan = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "fk", &b, "id"));
    let outcome = planner(stats, default_rule_registry())
        .plan_with_comment(&plan, "/*+ LOOKUP_JOIN(a, b) */")
        .unwrap();
    let optimized = outcome.optimized().unwrap();
    assert!(optimized.hints_satisfied);
    assert!(optimized.exec.label().starts_with("LookupINNERJoin"), "{}", optimized.exec.explain());
}

// ---------------------------------------------------------------------------
// Cardinality and cost
// ---------------------------------------------------------------------------

#[test]
fn test_injective_lookup_estimates_left_rows() {
    let stats = stats(&[("a", 10.0), ("b", 10_000.0)]);
    let (a, b) = (table(1, "a"), table(2, "b"));
    let plan = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "fk", &b, "id"));
    let mut builder = reordered(&plan, &stats);
    MemoSearch::new(&mut builder.memo, &joinx_core::cost::DefaultCoster)
        .explore(&default_rule_registry())
        .unwrap();

    let memo = &builder.memo;
    let a_rows = memo.group(builder.plan_for(set(&[0])).unwrap()).props.row_count;
    let lookup = memo
        .groups()
        .iter()
        .flat_map(|g| memo.alternatives(g.id))
        .find(|e| matches!(&e.rel, RelExpr::LookupJoin { lookup, join } if lookup.injective && memo.group(join.left).props.input_tables == set(&[0])))
        .expect("injective lookup from a into b");
    assert_eq!(memo.estimated_rows(lookup.id), a_rows);
    assert_eq!(a_rows, 10.0);
}

#[test]
fn test_cost_grows_with_child_cardinality() {
    let cost_for = |b_rows: f64| {
        let stats = stats(&[("a", 100.0), ("b", b_rows)]);
        let (a, b) = (table(1, "a"), table(2, "b"));
        let plan = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "x", &b, "x"));
        planner(stats, RuleRegistry::new())
            .plan(&plan, &[])
            .unwrap()
            .optimized()
            .unwrap()
            .cost
    };
    let costs: Vec<f64> = [10.0, 1_000.0, 100_000.0].into_iter().map(cost_for).collect();
    assert!(costs.windows(2).all(|w| w[0] < w[1]), "{costs:?}");
}

#[test]
fn test_biased_coster_forces_join_family() {
    let (a, b) = (table(1, "a"), table(2, "b"));
    let plan = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "fk", &b, "id"));
    let planner = JoinPlanner::new(
        PlannerConfig::default(),
        Arc::new(stats(&[("a", 10.0), ("b", 10_000.0)])),
        Arc::new(default_rule_registry()),
    )
    .with_cost_model(Arc::new(BiasedCoster::new(JoinFamily::Hash)));
    let outcome = planner.plan(&plan, &[]).unwrap();
    let exec = &outcome.optimized().unwrap().exec;
    assert!(exec.label().starts_with("Hash"), "{}", exec.explain());
}

// ---------------------------------------------------------------------------
// Index scans under physical joins
// ---------------------------------------------------------------------------

fn index_scan_on(node: &ExecNode, table: &str) -> bool {
    matches!(node, ExecNode::IndexScan { table: t, index, .. } if t == table && index == "pk")
}

#[test]
fn test_lookup_join_reads_index_scan() {
    let stats = stats(&[("a", 100_000.0), ("b", 10.0)]);
    let (a, b) = (table(1, "a"), table(2, "b"));
    let plan = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "fk", &b, "id"));
    let outcome = planner(stats, default_rule_registry())
        .plan_with_comment(&plan, "/*+ LOOKUP_JOIN(a, b) */")
        .unwrap();
    let exec = &outcome.optimized().unwrap().exec;
    let ExecNode::LookupJoin { right, .. } = exec else {
        panic!("expected a lookup join:\n{}", exec.explain());
    };
    assert!(index_scan_on(right, "b"), "{}", exec.explain());
}

#[test]
fn test_merge_join_reads_index_scans() {
    let stats = stats(&[("a", 1_000.0), ("b", 1_000.0)]);
    let (a, b) = (table(1, "a"), table(2, "b"));
    let plan = LogicalPlan::inner(LogicalPlan::source(a.clone()), LogicalPlan::source(b.clone()), eq(&a, "id", &b, "id"));
    let outcome = planner(stats, default_rule_registry())
        .plan_with_comment(&plan, "/*+ MERGE_JOIN(a, b) */")
        .unwrap();
    let exec = &outcome.optimized().unwrap().exec;
    let ExecNode::MergeJoin { left, right, .. } = exec else {
        panic!("expected a merge join:\n{}", exec.explain());
    };
    assert!(index_scan_on(left, "a"), "{}", exec.explain());
    assert!(index_scan_on(right, "b"), "{}", exec.explain());
}

// ---------------------------------------------------------------------------
// Semi joins
// ---------------------------------------------------------------------------

#[test]
fn test_semi_join_on_range_stays_semi() {
    let (a, b) = (table(1, "a"), table(2, "b"));
    let cond = Expr::binary(
        BinaryOp::Lt,
        Expr::column(&a.column_ref("x").unwrap()),
        Expr::column(&b.column_ref("x").unwrap()),
    );
    let plan = LogicalPlan::join(JoinType::Semi, LogicalPlan::source(a), LogicalPlan::source(b), Some(cond));
    let outcome = planner(stats(&[("a", 10.0), ("b", 10_000.0)]), default_rule_registry())
        .plan(&plan, &[])
        .unwrap();
    let exec = &outcome.optimized().unwrap().exec;
    assert!(exec.label().contains("SEMI"), "{}", exec.explain());
    assert!(!exec.explain().contains("Distinct"), "{}", exec.explain());
}
