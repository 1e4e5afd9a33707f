//! # Join-Graph Optimization Endpoint
//!
//! A simplified protocol for callers that only need a join order: instead of a full logical plan,
//! the request lists tables (with statistics and indexes) and join edges (single-column equalities
//! between pairs of tables).
//!
//! ## Wire Protocol
//!
//! - Request: `POST /optimize/join-graph` with a JSON body ([`JoinGraphRequest`])
//! - Response: JSON body ([`JoinGraphResponse`]) with the chosen join tree
//!
//! ## Plan Construction
//!
//! Edges are folded into a left-deep tree in request order. An edge whose tables are both already
//! in the tree becomes an extra conjunct of the topmost inner join; a table reached by no edge is
//! cross-joined at the end. Tables are aliased by their request ids, so hints name tables by id:
//!
//! ```text
//! /*+ JOIN_ORDER(t2, t0, t1) */
//! ```

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use joinx_core::catalog::InMemoryStats;
use joinx_core::exec::ExecNode;
use joinx_core::expr::{BinaryOp, Expr, JoinType};
use joinx_core::plan::{LogicalPlan, SourceTable};
use joinx_core::stats::{ColumnStatistics, Statistics};
use joinx_core::PlanOutcome;

use crate::routes::error_response;
use crate::state::AppState;

type ApiError = (StatusCode, String);

// ---------------------------------------------------------------------------
// JSON wire-protocol types
// ---------------------------------------------------------------------------

/// Request body for `POST /optimize/join-graph`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGraphRequest {
    pub tables: Vec<TableInfo>,
    pub joins: Vec<JoinEdge>,
    /// Optional hint comment.
    #[serde(default)]
    pub hints: String,
}

/// A table in the join graph with its statistics.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    /// Identifier within the request (e.g. "t0"); also the table's alias.
    pub id: String,
    pub schema: String,
    pub name: String,
    pub row_count: f64,
    #[serde(default)]
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    pub name: String,
    /// Number of distinct values.
    pub ndv: f64,
    #[serde(default)]
    pub null_fraction: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

/// `left_table.left_column = right_table.right_column`, joined with `join_type`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinEdge {
    pub left_table_id: String,
    pub right_table_id: String,
    /// INNER, LEFT, RIGHT, FULL, SEMI, ANTI or CROSS.
    #[serde(default = "default_join_type")]
    pub join_type: String,
    pub left_column: String,
    pub right_column: String,
}

fn default_join_type() -> String {
    "INNER".to_string()
}

/// Response body from the join-graph optimization endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGraphResponse {
    pub tree: JoinTreeNode,
    /// Estimated cost of the chosen plan.
    pub cost: f64,
    /// Whether every hint in the request was honored.
    pub hints_satisfied: bool,
    pub explain: String,
}

/// A node in the chosen join tree: a table leaf or a join of two subtrees.
#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum JoinTreeNode {
    Leaf {
        #[serde(rename = "tableId")]
        table_id: String,
        /// Index read instead of the base table.
        #[serde(skip_serializing_if = "Option::is_none")]
        index: Option<String>,
    },
    Join {
        #[serde(rename = "joinType")]
        join_type: String,
        /// Physical operator, e.g. `HashJoin` or `LookupJoin`.
        operator: String,
        #[serde(rename = "leftColumn", skip_serializing_if = "Option::is_none")]
        left_column: Option<String>,
        #[serde(rename = "rightColumn", skip_serializing_if = "Option::is_none")]
        right_column: Option<String>,
        left: Box<JoinTreeNode>,
        right: Box<JoinTreeNode>,
    },
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// POST /optimize/join-graph: choose a join order for a graph of tables.
pub async fn optimize_join_graph(
    State(state): State<Arc<AppState>>,
    Json(req): Json<JoinGraphRequest>,
) -> Result<Json<JoinGraphResponse>, ApiError> {
    if req.tables.len() < 2 || req.joins.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "request must contain at least two tables and one join".to_string(),
        ));
    }

    let sources = build_sources(&req);
    let plan = build_plan(&req, &sources)?;
    tracing::debug!(tables = sources.len(), edges = req.joins.len(), "join graph built");

    let planner = state.planner(build_stats(&req));
    let optimized = match planner.plan_with_comment(&plan, &req.hints).map_err(error_response)? {
        PlanOutcome::Optimized(p) => p,
        PlanOutcome::Skipped { reason } => return Err((StatusCode::UNPROCESSABLE_ENTITY, reason)),
    };

    Ok(Json(JoinGraphResponse {
        tree: exec_to_tree(&optimized.exec)?,
        cost: optimized.cost,
        hints_satisfied: optimized.hints_satisfied,
        explain: optimized.exec.explain(),
    }))
}

// ---------------------------------------------------------------------------
// Plan construction from the join graph
// ---------------------------------------------------------------------------

/// One source per table, keyed by request id. Columns named only by join edges or indexes are
/// added without statistics.
fn build_sources(req: &JoinGraphRequest) -> HashMap<&str, SourceTable> {
    let mut next_column = 0u32;
    let mut sources = HashMap::with_capacity(req.tables.len());
    for (i, info) in req.tables.iter().enumerate() {
        let mut source = SourceTable::new(i as u32 + 1, info.schema.clone(), info.name.clone()).with_alias(info.id.clone());
        let mut seen = HashSet::new();
        let mut add = |source: SourceTable, name: &str, nullable: bool| {
            if !seen.insert(name.to_string()) {
                return source;
            }
            next_column += 1;
            if nullable {
                source.with_nullable_column(next_column, name)
            } else {
                source.with_column(next_column, name)
            }
        };
        for col in &info.columns {
            source = add(source, &col.name, col.null_fraction > 0.0);
        }
        let edge_columns = req.joins.iter().flat_map(|j| {
            let left = (j.left_table_id == info.id).then_some(j.left_column.as_str());
            let right = (j.right_table_id == info.id).then_some(j.right_column.as_str());
            left.into_iter().chain(right)
        });
        let index_columns = info.indexes.iter().flat_map(|ix| ix.columns.iter().map(String::as_str));
        for name in edge_columns.chain(index_columns) {
            source = add(source, name, false);
        }
        for ix in &info.indexes {
            let cols: Vec<&str> = ix.columns.iter().map(String::as_str).collect();
            source = source.with_index(ix.name.clone(), &cols, ix.unique);
        }
        sources.insert(info.id.as_str(), source);
    }
    sources
}

fn build_stats(req: &JoinGraphRequest) -> InMemoryStats {
    let mut stats = InMemoryStats::new();
    for info in &req.tables {
        let table = info.columns.iter().fold(Statistics::new(info.row_count), |s, c| {
            s.with_column(c.name.clone(), ColumnStatistics::new(c.ndv, c.null_fraction))
        });
        stats.add_table(&info.schema, &info.name, table);
    }
    stats
}

/// Fold the edges into a left-deep tree, in request order as far as connectivity allows.
fn build_plan(req: &JoinGraphRequest, sources: &HashMap<&str, SourceTable>) -> Result<LogicalPlan, ApiError> {
    let source = |id: &str| {
        sources
            .get(id)
            .cloned()
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown table id: {id}")))
    };

    let mut pending: Vec<&JoinEdge> = req.joins.iter().collect();
    let start = req.joins[0].left_table_id.as_str();
    let mut plan = LogicalPlan::source(source(start)?);
    let mut joined: HashSet<&str> = HashSet::from([start]);

    while !pending.is_empty() {
        let touches = |e: &&JoinEdge| joined.contains(e.left_table_id.as_str()) || joined.contains(e.right_table_id.as_str());
        let Some(pos) = pending.iter().position(touches) else {
            // Disconnected component: start it with a cross join.
            let next: &JoinEdge = pending[0];
            let next = next.left_table_id.as_str();
            plan = LogicalPlan::join(JoinType::Cross, plan, LogicalPlan::source(source(next)?), None);
            joined.insert(next);
            continue;
        };
        let edge = pending.remove(pos);
        let join_type = parse_join_type(&edge.join_type)?;
        let predicate = edge_predicate(edge, sources)?;
        let left_in = joined.contains(edge.left_table_id.as_str());
        let right_in = joined.contains(edge.right_table_id.as_str());

        plan = match (left_in, right_in) {
            (true, true) => add_conjunct(plan, join_type, predicate)?,
            (true, false) => {
                joined.insert(edge.right_table_id.as_str());
                let right = LogicalPlan::source(source(&edge.right_table_id)?);
                LogicalPlan::join(join_type, plan, right, predicate)
            }
            _ => {
                // The edge's left table is the new one, so the join runs mirrored.
                let mirrored = match join_type {
                    JoinType::Left => JoinType::Right,
                    JoinType::Right => JoinType::Left,
                    JoinType::Inner | JoinType::Cross | JoinType::FullOuter => join_type,
                    other => {
                        return Err((
                            StatusCode::BAD_REQUEST,
                            format!("{other} join from {} must follow its right table", edge.left_table_id),
                        ))
                    }
                };
                joined.insert(edge.left_table_id.as_str());
                let right = LogicalPlan::source(source(&edge.left_table_id)?);
                LogicalPlan::join(mirrored, plan, right, predicate)
            }
        };
    }

    for info in &req.tables {
        if joined.insert(info.id.as_str()) {
            plan = LogicalPlan::join(JoinType::Cross, plan, LogicalPlan::source(source(&info.id)?), None);
        }
    }
    Ok(plan)
}

fn edge_predicate(edge: &JoinEdge, sources: &HashMap<&str, SourceTable>) -> Result<Option<Expr>, ApiError> {
    let column = |table: &str, column: &str| {
        sources
            .get(table)
            .and_then(|s| s.column_ref(column))
            .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("unknown column {table}.{column}")))
    };
    if parse_join_type(&edge.join_type)? == JoinType::Cross {
        return Ok(None);
    }
    let left = column(&edge.left_table_id, &edge.left_column)?;
    let right = column(&edge.right_table_id, &edge.right_column)?;
    Ok(Some(Expr::col_eq(&left, &right)))
}

/// AND an edge between two already joined tables onto the topmost join, which must be inner.
fn add_conjunct(plan: LogicalPlan, join_type: JoinType, predicate: Option<Expr>) -> Result<LogicalPlan, ApiError> {
    let cycle_error = || {
        (
            StatusCode::BAD_REQUEST,
            "an edge between already joined tables must be an inner join over inner joins".to_string(),
        )
    };
    if !matches!(join_type, JoinType::Inner | JoinType::Cross) {
        return Err(cycle_error());
    }
    match plan {
        LogicalPlan::Join {
            join_type: JoinType::Inner | JoinType::Cross,
            condition,
            left,
            right,
        } => {
            let mut conjuncts = Expr::split_conjuncts(condition.as_ref());
            conjuncts.extend(predicate);
            let join_type = if conjuncts.is_empty() { JoinType::Cross } else { JoinType::Inner };
            Ok(LogicalPlan::Join {
                join_type,
                condition: Expr::and_all(conjuncts),
                left,
                right,
            })
        }
        _ => Err(cycle_error()),
    }
}

/// Parse a join type name; `OUTER` is optional.
fn parse_join_type(s: &str) -> Result<JoinType, ApiError> {
    match s.to_uppercase().trim_end_matches(" OUTER") {
        "INNER" => Ok(JoinType::Inner),
        "LEFT" => Ok(JoinType::Left),
        "RIGHT" => Ok(JoinType::Right),
        "FULL" => Ok(JoinType::FullOuter),
        "SEMI" => Ok(JoinType::Semi),
        "ANTI" => Ok(JoinType::Anti),
        "CROSS" => Ok(JoinType::Cross),
        other => Err((StatusCode::BAD_REQUEST, format!("unsupported join type: {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Exec tree → response conversion
// ---------------------------------------------------------------------------

/// Reduce an executable tree to its joins and leaves. Projections, filters, sorts and other
/// single-input nodes are skipped.
fn exec_to_tree(node: &ExecNode) -> Result<JoinTreeNode, ApiError> {
    match node {
        ExecNode::TableScan { table } => Ok(JoinTreeNode::Leaf {
            table_id: table.clone(),
            index: None,
        }),
        ExecNode::IndexScan { table, index, .. } => Ok(JoinTreeNode::Leaf {
            table_id: table.clone(),
            index: Some(index.clone()),
        }),
        ExecNode::Source { name, .. } => Ok(JoinTreeNode::Leaf {
            table_id: name.clone(),
            index: None,
        }),
        ExecNode::Project { input, .. }
        | ExecNode::Filter { input, .. }
        | ExecNode::Distinct { input, .. }
        | ExecNode::Max1Row { input }
        | ExecNode::Sort { input, .. }
        | ExecNode::Limit { input, .. } => exec_to_tree(input),
        ExecNode::NestedLoopJoin {
            join_type,
            filters,
            left,
            right,
        } => join_node(join_type, "NestedLoopJoin", filters.iter().collect(), left, right),
        ExecNode::HashJoin {
            join_type,
            left_keys,
            right_keys,
            filters,
            left,
            right,
        } => {
            let keys: Vec<Expr> = left_keys
                .iter()
                .zip(right_keys)
                .map(|(l, r)| Expr::binary(BinaryOp::Eq, l.clone(), r.clone()))
                .collect();
            join_node(join_type, "HashJoin", keys.iter().chain(filters).collect(), left, right)
        }
        ExecNode::LookupJoin {
            join_type,
            filters,
            left,
            right,
            ..
        } => join_node(join_type, "LookupJoin", filters.iter().chain(index_ranges(right)).collect(), left, right),
        ExecNode::MergeJoin {
            join_type,
            filters,
            left,
            right,
            ..
        } => join_node(join_type, "MergeJoin", filters.iter().collect(), left, right),
        ExecNode::RangeHeapJoin {
            join_type,
            filters,
            left,
            right,
            ..
        } => join_node(join_type, "RangeHeapJoin", filters.iter().collect(), left, right),
        ExecNode::ConcatJoin {
            join_type,
            filters,
            left,
            lookups,
        } => {
            let first = lookups.first().ok_or_else(|| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "concat join without lookups".to_string(),
                )
            })?;
            let eqs = filters.iter().chain(index_ranges(&first.scan)).collect();
            join_node(join_type, "ConcatJoin", eqs, left, &first.scan)
        }
    }
}

fn join_node(
    join_type: &JoinType,
    operator: &str,
    eqs: Vec<&Expr>,
    left: &ExecNode,
    right: &ExecNode,
) -> Result<JoinTreeNode, ApiError> {
    let (left_column, right_column) = match join_columns(&eqs, &left.leaf_tables()) {
        Some((l, r)) => (Some(l), Some(r)),
        None => (None, None),
    };
    Ok(JoinTreeNode::Join {
        join_type: join_type.to_string(),
        operator: operator.to_string(),
        left_column,
        right_column,
        left: Box::new(exec_to_tree(left)?),
        right: Box::new(exec_to_tree(right)?),
    })
}

/// Range predicates of the index scan under a lookup join, where its key equalities live.
fn index_ranges(node: &ExecNode) -> &[Expr] {
    match node {
        ExecNode::IndexScan { ranges, .. } => ranges,
        ExecNode::Filter { input, .. } | ExecNode::Project { input, .. } => index_ranges(input),
        _ => &[],
    }
}

/// First column equality with one side from `left_ids`, as (left column, right column).
fn join_columns(exprs: &[&Expr], left_ids: &[&str]) -> Option<(String, String)> {
    exprs.iter().flat_map(|e| e.conjuncts()).find_map(|e| {
        let (a, b) = e.as_column_equality()?;
        let a_left = left_ids.contains(&a.table_name.as_str());
        let b_left = left_ids.contains(&b.table_name.as_str());
        match (a_left, b_left) {
            (true, false) => Some((a.name.clone(), b.name.clone())),
            (false, true) => Some((b.name.clone(), a.name.clone())),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use joinx_core::PlannerConfig;
    use serde_json::json;

    fn request(body: serde_json::Value) -> JoinGraphRequest {
        serde_json::from_value(body).unwrap()
    }

    fn three_tables() -> serde_json::Value {
        json!({
            "tables": [
                { "id": "t0", "schema": "tpch", "name": "customer", "rowCount": 150000.0,
                  "columns": [{ "name": "c_custkey", "ndv": 150000.0 }],
                  "indexes": [{ "name": "pk", "columns": ["c_custkey"], "unique": true }] },
                { "id": "t1", "schema": "tpch", "name": "orders", "rowCount": 1500000.0,
                  "columns": [{ "name": "o_custkey", "ndv": 150000.0 },
                              { "name": "o_orderkey", "ndv": 1500000.0 }] },
                { "id": "t2", "schema": "tpch", "name": "lineitem", "rowCount": 6000000.0,
                  "columns": [{ "name": "l_orderkey", "ndv": 1500000.0 }] }
            ],
            "joins": [
                { "leftTableId": "t0", "rightTableId": "t1", "leftColumn": "c_custkey", "rightColumn": "o_custkey" },
                { "leftTableId": "t1", "rightTableId": "t2", "leftColumn": "o_orderkey", "rightColumn": "l_orderkey" }
            ]
        })
    }

    fn leaves(tree: &JoinTreeNode) -> Vec<&str> {
        match tree {
            JoinTreeNode::Leaf { table_id, .. } => vec![table_id.as_str()],
            JoinTreeNode::Join { left, right, .. } => {
                let mut out = leaves(left);
                out.extend(leaves(right));
                out
            }
        }
    }

    #[test]
    fn test_parse_join_type() {
        assert_eq!(parse_join_type("INNER").unwrap(), JoinType::Inner);
        assert_eq!(parse_join_type("inner").unwrap(), JoinType::Inner);
        assert_eq!(parse_join_type("LEFT OUTER").unwrap(), JoinType::Left);
        assert_eq!(parse_join_type("FULL").unwrap(), JoinType::FullOuter);
        assert_eq!(parse_join_type("bogus").unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_request_defaults() {
        let req = request(three_tables());
        assert_eq!(req.joins[0].join_type, "INNER");
        assert!(req.hints.is_empty());
        assert!(req.tables[0].indexes[0].unique);
        assert_eq!(req.tables[1].columns[0].null_fraction, 0.0);
    }

    #[test]
    fn test_build_stats() {
        let stats = build_stats(&request(three_tables()));
        let customer = &stats.tables["tpch.customer"];
        assert_eq!(customer.row_count, 150000.0);
        assert!(customer.column_stats.contains_key("c_custkey"));
    }

    #[test]
    fn test_build_plan_is_left_deep_in_edge_order() {
        let req = request(three_tables());
        let sources = build_sources(&req);
        let plan = build_plan(&req, &sources).unwrap();
        let names: Vec<&str> = plan.sources().iter().map(|s| s.display_name()).collect();
        assert_eq!(names, vec!["t0", "t1", "t2"]);
        assert_eq!(sources["t0"].indexes.len(), 1);
    }

    #[test]
    fn test_cycle_edge_joins_top_condition() {
        let mut body = three_tables();
        body["joins"].as_array_mut().unwrap().push(json!({
            "leftTableId": "t0", "rightTableId": "t2", "leftColumn": "c_custkey", "rightColumn": "l_orderkey"
        }));
        let req = request(body);
        let plan = build_plan(&req, &build_sources(&req)).unwrap();
        let LogicalPlan::Join { condition: Some(cond), .. } = plan else {
            panic!("expected a join at the root");
        };
        assert_eq!(cond.conjuncts().len(), 2);
    }

    #[test]
    fn test_unknown_table_is_rejected() {
        let mut body = three_tables();
        body["joins"][1]["rightTableId"] = json!("t9");
        let req = request(body);
        let err = build_plan(&req, &build_sources(&req)).unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_tree_serializes_untagged() {
        let tree = JoinTreeNode::Join {
            join_type: "INNER".into(),
            operator: "HashJoin".into(),
            left_column: Some("a".into()),
            right_column: Some("b".into()),
            left: Box::new(JoinTreeNode::Leaf {
                table_id: "t0".into(),
                index: None,
            }),
            right: Box::new(JoinTreeNode::Leaf {
                table_id: "t1".into(),
                index: Some("pk".into()),
            }),
        };
        assert_eq!(
            serde_json::to_value(&tree).unwrap(),
            json!({
                "joinType": "INNER",
                "operator": "HashJoin",
                "leftColumn": "a",
                "rightColumn": "b",
                "left": { "tableId": "t0" },
                "right": { "tableId": "t1", "index": "pk" }
            })
        );
    }

    #[tokio::test]
    async fn test_optimize_join_graph_end_to_end() {
        let state = Arc::new(AppState::new(PlannerConfig::default()));
        let mut body = three_tables();
        body["hints"] = json!("/*+ JOIN_ORDER(t2, t1, t0) */");
        let Json(resp) = optimize_join_graph(State(state), Json(request(body))).await.unwrap();
        assert!(resp.hints_satisfied);
        assert_eq!(leaves(&resp.tree), vec!["t2", "t1", "t0"]);
        assert!(resp.cost > 0.0);
        let JoinTreeNode::Join { left_column, right_column, .. } = &resp.tree else {
            panic!("expected a join at the root");
        };
        assert_eq!(left_column.as_deref(), Some("o_custkey"));
        assert_eq!(right_column.as_deref(), Some("c_custkey"));
    }

    #[tokio::test]
    async fn test_single_table_is_rejected() {
        let state = Arc::new(AppState::new(PlannerConfig::default()));
        let req = request(json!({
            "tables": [{ "id": "t0", "schema": "s", "name": "a", "rowCount": 1.0 }],
            "joins": []
        }));
        let err = optimize_join_graph(State(state), Json(req)).await.unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }
}
