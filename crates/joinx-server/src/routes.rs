//! # HTTP Route Handlers
//!
//! ## Optimization Pipeline
//!
//! `POST /optimize` carries a resolved logical plan, the query's hint comment and per-table
//! statistics:
//!
//! 1. **Statistics**: build an in-memory provider from the request.
//! 2. **Hints**: parse the comment; unknown hints are ignored.
//! 3. **Plan**: enumerate, explore, cost and build the executable tree.
//!
//! ## Error Handling
//!
//! - 200 with `"outcome": "skipped"`: the plan contains a node the planner cannot reorder around;
//!   the caller keeps its own tree.
//! - 422 Unprocessable Entity: the join graph exceeds the planner's capacity.
//! - 500 Internal Server Error: an internal invariant was violated.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use joinx_core::catalog::InMemoryStats;
use joinx_core::hint::JoinHints;
use joinx_core::plan::LogicalPlan;
use joinx_core::stats::Statistics;
use joinx_core::{OptimizeError, PlanOutcome};

use crate::state::AppState;

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /rules: list registered rules in application order.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let defaults = JoinHints::default();
    let rules: Vec<RuleInfo> = state
        .rule_registry
        .rules()
        .map(|r| RuleInfo {
            name: r.name().to_string(),
            kinds: r.kinds().iter().map(|k| format!("{k:?}")).collect(),
            enabled_by_default: r.enabled(&defaults),
        })
        .collect();

    Json(RulesResponse { rules })
}

#[derive(Serialize)]
pub struct RulesResponse {
    pub rules: Vec<RuleInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub name: String,
    /// Expression kinds the rule matches.
    pub kinds: Vec<String>,
    pub enabled_by_default: bool,
}

/// Request body for `POST /optimize`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeRequest {
    pub plan: LogicalPlan,
    /// Hint comment as written in the query, e.g. `/*+ JOIN_ORDER(a, b) */`.
    #[serde(default)]
    pub hints: String,
    /// Table statistics keyed by `database.table`.
    #[serde(default)]
    pub stats: HashMap<String, Statistics>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResponse {
    #[serde(flatten)]
    pub outcome: PlanOutcome,
    /// Indented plan rendering, present when the plan was optimized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<String>,
}

/// POST /optimize: plan the joins of a logical tree.
pub async fn optimize(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>, (StatusCode, String)> {
    let planner = state.planner(InMemoryStats { tables: req.stats });
    let outcome = planner.plan_with_comment(&req.plan, &req.hints).map_err(error_response)?;
    if let PlanOutcome::Skipped { reason } = &outcome {
        tracing::info!(%reason, "join reordering skipped");
    }
    let explain = outcome.optimized().map(|p| p.exec.explain());
    Ok(Json(OptimizeResponse { outcome, explain }))
}

/// Map a planner error to an HTTP status and message.
pub fn error_response(err: OptimizeError) -> (StatusCode, String) {
    let status = match &err {
        OptimizeError::Unsupported(_) => StatusCode::BAD_REQUEST,
        OptimizeError::Capacity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        OptimizeError::Invariant(_) => {
            tracing::error!(error = %err, "planner invariant violated");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinx_core::expr::{Expr, JoinType};
    use joinx_core::plan::SourceTable;
    use joinx_core::PlannerConfig;

    fn request_json() -> String {
        let a = SourceTable::new(1, "db", "a").with_column(10, "x");
        let b = SourceTable::new(2, "db", "b").with_column(20, "x");
        let cond = Expr::col_eq(&a.column_ref("x").unwrap(), &b.column_ref("x").unwrap());
        let plan = LogicalPlan::join(JoinType::Inner, LogicalPlan::source(a), LogicalPlan::source(b), Some(cond));
        serde_json::json!({
            "plan": plan,
            "hints": "/*+ JOIN_ORDER(b, a) */",
            "stats": {
                "db.a": { "rowCount": 10.0 },
                "db.b": { "rowCount": 1000.0 }
            }
        })
        .to_string()
    }

    #[test]
    fn test_optimize_request_from_json() {
        let req: OptimizeRequest = serde_json::from_str(&request_json()).unwrap();
        assert_eq!(req.plan.sources().len(), 2);
        assert_eq!(req.stats["db.b"].row_count, 1000.0);
        assert!(req.hints.contains("JOIN_ORDER"));
    }

    #[tokio::test]
    async fn test_optimize_honors_join_order_hint() {
        let state = Arc::new(AppState::new(PlannerConfig::default()));
        let req: OptimizeRequest = serde_json::from_str(&request_json()).unwrap();
        let Json(resp) = optimize(State(state), Json(req)).await.unwrap();
        let plan = resp.outcome.optimized().unwrap();
        assert!(plan.hints_satisfied);
        assert_eq!(plan.exec.leaf_tables(), vec!["b", "a"]);

        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["outcome"], "optimized");
        assert!(body["explain"].as_str().unwrap().contains("Join"));
    }

    #[tokio::test]
    async fn test_unsupported_plan_is_skipped() {
        let state = Arc::new(AppState::new(PlannerConfig::default()));
        let req = OptimizeRequest {
            plan: LogicalPlan::Opaque {
                kind: "Window".into(),
                input: None,
            },
            hints: String::new(),
            stats: HashMap::new(),
        };
        let Json(resp) = optimize(State(state), Json(req)).await.unwrap();
        let body = serde_json::to_value(&resp).unwrap();
        assert_eq!(body["outcome"], "skipped");
        assert!(body.get("explain").is_none());
    }

    #[test]
    fn test_error_status_codes() {
        let capacity = OptimizeError::Capacity {
            what: "tables",
            count: 70,
            max: 64,
        };
        assert_eq!(error_response(capacity).0, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            error_response(OptimizeError::invariant("bad memo")).0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
