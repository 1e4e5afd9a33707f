//! # joinx-core: Join-Order Enumeration Core
//!
//! This crate implements a cost-based join-order enumeration and selection engine. Given a
//! name-resolved join tree it enumerates the semantically valid join orders (respecting the
//! reordering limits of LEFT, FULL, SEMI and ANTI joins), adds physical join alternatives, costs
//! them, and extracts the cheapest (or hint-compliant) executable plan.
//!
//! ## Module Overview
//!
//! - **`bitset`**: 64-element vertex and edge sets.
//! - **`expr`**, **`plan`**: scalar expressions, join types and the input join tree.
//! - **`edge`**: hypergraph edges with conflict detection (SES/TES and conflict rules).
//! - **`join_order`**: graph population, DP subset enumeration, transitive closure, fast path.
//! - **`memo`**, **`rel`**, **`properties`**, **`index`**: the memo arena, its relational
//!   expressions, functional dependencies and cardinality model.
//! - **`rule`**: the exploration rule trait and registry (rules live in `joinx-rules`).
//! - **`search`**: rule exploration, bottom-up costing, hint-aware best selection, conflict repair.
//! - **`cost`**: cost model trait, the default coster and biased costers.
//! - **`hint`**: the `/*+ ... */` hint language.
//! - **`exec`**: translation of the chosen plan into executable nodes.
//! - **`catalog`**, **`stats`**: statistics provider interface and estimation formulas.
//! - **`planner`**: the end-to-end pipeline and its configuration.

pub mod bitset;
pub mod catalog;
pub mod cost;
pub mod edge;
pub mod error;
pub mod exec;
pub mod expr;
pub mod hint;
pub mod index;
pub mod join_order;
pub mod memo;
pub mod plan;
pub mod planner;
pub mod properties;
pub mod rel;
pub mod rule;
pub mod search;
pub mod stats;

pub use error::{OptResult, OptimizeError};
pub use planner::{JoinPlanner, OptimizedPlan, PlanOutcome, PlannerConfig};
