//! # joinx-server: HTTP Service for the Join Planner
//!
//! Exposes the join planner as a network service so a query engine can hand over a resolved plan
//! and get back a reordered, physically implemented join tree.
//!
//! ## Architecture
//!
//! ```text
//! query engine
//!   |
//!   | HTTP POST /optimize (logical plan + hint comment + statistics, JSON)
//!   v
//! joinx-server (this binary)
//!   |
//!   +-> hypergraph + conflict detection
//!   +-> join enumeration (DP or fast path)
//!   +-> exploration rules + costing
//!   |
//!   | HTTP response (executable plan, JSON)
//!   v
//! query engine
//! ```
//!
//! ## Endpoints
//!
//! - `GET  /health`                - Health check
//! - `GET  /rules`                 - List registered exploration rules
//! - `POST /optimize`              - Plan the joins of a logical tree
//! - `POST /optimize/join-graph`   - Choose a join order via the join-graph JSON protocol
//!
//! ## Configuration
//!
//! - `JOINX_ADDR`: listen address, `0.0.0.0:3000` by default.
//! - `JOINX_CONFIG`: path of a JSON planner config (see `PlannerConfig`).
//! - `RUST_LOG`: log filter, `joinx=debug` by default.

mod join_graph;
mod routes;
mod state;

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("joinx=debug")))
        .init();

    let state = Arc::new(state::AppState::from_env());

    let app = Router::new()
        .route("/health", get(routes::health))
        .route("/rules", get(routes::list_rules))
        .route("/optimize", post(routes::optimize))
        .route("/optimize/join-graph", post(join_graph::optimize_join_graph))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = std::env::var("JOINX_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("joinx-server listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}
