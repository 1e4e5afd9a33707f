//! # Join Planner
//!
//! [`JoinPlanner`] runs the whole pipeline over one input tree:
//!
//! ```text
//! populate → resolve hints → closure + enumerate (or fast path) → explore rules
//!          → optimize (cost, pick best, repair conflicts) → build exec tree
//! ```
//!
//! Each stage is also available on its own ([`JoinOrderBuilder`], [`MemoSearch`], [`ExecBuilder`])
//! for callers that need to inspect the memo between stages.
//!
//! `plan` is the single error boundary. Input the planner cannot reorder becomes
//! [`PlanOutcome::Skipped`] and the caller keeps its own tree; capacity and invariant errors
//! propagate.

use crate::catalog::StatsProvider;
use crate::cost::{CostModel, DefaultCoster};
use crate::error::OptResult;
use crate::exec::{ExecBuilder, ExecNode};
use crate::hint::{parse_hints, Hint, JoinHints};
use crate::join_order::JoinOrderBuilder;
use crate::plan::{LogicalPlan, SourceTable};
use crate::rule::RuleRegistry;
use crate::search::MemoSearch;
use crate::stats::DEFAULT_ROW_COUNT;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, debug_span};

/// Planner tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlannerConfig {
    /// Above this many relations the DP enumeration is replaced by the lookup-chain fast path.
    pub fast_path_threshold: usize,
    /// Row count assumed when statistics are missing or unusable.
    pub default_row_count: f64,
    /// Use the fast path regardless of the relation count.
    pub force_fast_path: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            fast_path_threshold: 15,
            default_row_count: DEFAULT_ROW_COUNT,
            force_fast_path: false,
        }
    }
}

/// A successfully planned tree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedPlan {
    pub exec: ExecNode,
    pub cost: f64,
    /// Memo size, for diagnostics.
    pub groups: usize,
    pub exprs: usize,
    /// Whether every active hint was honored.
    pub hints_satisfied: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum PlanOutcome {
    Optimized(OptimizedPlan),
    /// The input cannot be reordered; the caller keeps its own plan.
    Skipped { reason: String },
}

impl PlanOutcome {
    pub fn optimized(&self) -> Option<&OptimizedPlan> {
        match self {
            PlanOutcome::Optimized(p) => Some(p),
            PlanOutcome::Skipped { .. } => None,
        }
    }
}

/// Shared, thread-safe entry point. One memo is built and dropped per call.
pub struct JoinPlanner {
    config: PlannerConfig,
    stats: Arc<dyn StatsProvider>,
    rules: Arc<RuleRegistry>,
    cost_model: Arc<dyn CostModel>,
}

impl JoinPlanner {
    pub fn new(config: PlannerConfig, stats: Arc<dyn StatsProvider>, rules: Arc<RuleRegistry>) -> Self {
        Self {
            config,
            stats,
            rules,
            cost_model: Arc::new(DefaultCoster),
        }
    }

    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.rules
    }

    /// Plan with hints taken from a query comment (`/*+ ... */`).
    pub fn plan_with_comment(&self, plan: &LogicalPlan, comment: &str) -> OptResult<PlanOutcome> {
        self.plan(plan, &parse_hints(comment))
    }

    pub fn plan(&self, plan: &LogicalPlan, hints: &[Hint]) -> OptResult<PlanOutcome> {
        let _span = debug_span!("plan", cost_model = self.cost_model.name()).entered();
        match self.run(plan, hints) {
            Ok(optimized) => Ok(PlanOutcome::Optimized(optimized)),
            Err(err) if err.is_recoverable() => {
                debug!(reason = %err, "join reordering skipped");
                Ok(PlanOutcome::Skipped {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    fn run(&self, plan: &LogicalPlan, hints: &[Hint]) -> OptResult<OptimizedPlan> {
        let mut builder = JoinOrderBuilder::new(self.config.clone());
        builder.populate(plan, self.stats.as_ref())?;

        let resolved = {
            let sources: Vec<&SourceTable> = builder.memo.tables().iter().map(|t| &t.source).collect();
            JoinHints::resolve(hints, &sources)
        };
        builder.memo.hints = resolved;
        builder.reorder()?;

        let mut memo = builder.memo;
        let mut search = MemoSearch::new(&mut memo, self.cost_model.as_ref());
        search.explore(&self.rules)?;
        let cost = search.optimize()?;

        let exec = ExecBuilder::new(&memo).build()?;
        let hints_satisfied = memo
            .root
            .map(|r| !memo.hints.is_active() || memo.group(r).hint_ok)
            .unwrap_or(true);
        Ok(OptimizedPlan {
            exec,
            cost,
            groups: memo.num_groups(),
            exprs: memo.num_exprs(),
            hints_satisfied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryStats;
    use crate::error::OptimizeError;
    use crate::expr::Expr;

    fn planner() -> JoinPlanner {
        JoinPlanner::new(
            PlannerConfig::default(),
            Arc::new(InMemoryStats::new()),
            Arc::new(RuleRegistry::new()),
        )
    }

    #[test]
    fn test_config_defaults_and_partial_json() {
        let cfg: PlannerConfig = serde_json::from_str(r#"{"fastPathThreshold": 8}"#).unwrap();
        assert_eq!(cfg.fast_path_threshold, 8);
        assert_eq!(cfg.default_row_count, 1000.0);
        assert!(!cfg.force_fast_path);
    }

    #[test]
    fn test_opaque_input_is_skipped() {
        let plan = LogicalPlan::Opaque {
            kind: "GroupBy".into(),
            input: Some(Box::new(LogicalPlan::source(SourceTable::new(1, "db", "a")))),
        };
        let outcome = planner().plan(&plan, &[]).unwrap();
        assert!(matches!(outcome, PlanOutcome::Skipped { reason } if reason.contains("GroupBy")));
    }

    #[test]
    fn test_too_many_relations_is_an_error() {
        let mut plan = LogicalPlan::source(SourceTable::new(0, "db", "t0"));
        for i in 1..65 {
            plan = LogicalPlan::join(
                crate::expr::JoinType::Cross,
                plan,
                LogicalPlan::source(SourceTable::new(i, "db", format!("t{i}"))),
                None,
            );
        }
        let err = planner().plan(&plan, &[]).unwrap_err();
        assert!(matches!(err, OptimizeError::Capacity { count: 65, .. }));
    }

    #[test]
    fn test_two_table_join_is_planned() {
        let a = SourceTable::new(1, "db", "a").with_column(10, "x");
        let b = SourceTable::new(2, "db", "b").with_column(20, "x");
        let cond = Expr::col_eq(&a.column_ref("x").unwrap(), &b.column_ref("x").unwrap());
        let plan = LogicalPlan::inner(LogicalPlan::source(a), LogicalPlan::source(b), cond);
        let outcome = planner().plan_with_comment(&plan, "").unwrap();
        let optimized = outcome.optimized().unwrap();
        let mut leaves = optimized.exec.leaf_tables();
        leaves.sort();
        assert_eq!(leaves, vec!["a", "b"]);
        assert!(optimized.hints_satisfied);
    }
}
