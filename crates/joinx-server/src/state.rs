//! # Application State
//!
//! Shared state available to every request handler, created once at startup and shared via `Arc`.
//!
//! - **Rule Registry**: the built-in exploration rules. Rules are stateless, so one registry
//!   serves all requests.
//! - **Planner Config**: fast-path threshold and default row count, read from the JSON file named
//!   by `JOINX_CONFIG` when set.
//!
//! Statistics arrive with each request, so a [`JoinPlanner`] is assembled per request around the
//! shared registry.

use joinx_core::catalog::InMemoryStats;
use joinx_core::rule::RuleRegistry;
use joinx_core::{JoinPlanner, PlannerConfig};
use std::path::Path;
use std::sync::Arc;

/// Environment variable naming the planner config file.
pub const CONFIG_ENV: &str = "JOINX_CONFIG";

pub struct AppState {
    pub rule_registry: Arc<RuleRegistry>,
    pub config: PlannerConfig,
}

impl AppState {
    pub fn new(config: PlannerConfig) -> Self {
        Self {
            rule_registry: Arc::new(joinx_rules::default_rule_registry()),
            config,
        }
    }

    /// State configured from `JOINX_CONFIG`, or the defaults when it is unset or unreadable.
    pub fn from_env() -> Self {
        let config = match std::env::var(CONFIG_ENV) {
            Ok(path) => load_config(Path::new(&path)).unwrap_or_else(|e| {
                tracing::warn!(%path, error = %e, "failed to load planner config, using defaults");
                PlannerConfig::default()
            }),
            Err(_) => PlannerConfig::default(),
        };
        tracing::debug!(?config, "planner config");
        Self::new(config)
    }

    /// A planner over the request's statistics.
    pub fn planner(&self, stats: InMemoryStats) -> JoinPlanner {
        JoinPlanner::new(self.config.clone(), Arc::new(stats), self.rule_registry.clone())
    }
}

/// Read a [`PlannerConfig`] from a JSON file. Missing fields take their defaults.
pub fn load_config(path: &Path) -> std::io::Result<PlannerConfig> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: PlannerConfig = serde_json::from_str(r#"{"fastPathThreshold": 4}"#).unwrap();
        assert_eq!(config.fast_path_threshold, 4);
        assert_eq!(config.default_row_count, PlannerConfig::default().default_row_count);
        assert!(!config.force_fast_path);
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config(Path::new("/nonexistent/joinx.json")).is_err());
    }

    #[test]
    fn test_state_registers_builtin_rules() {
        let state = AppState::new(PlannerConfig::default());
        assert_eq!(state.rule_registry.len(), 7);
    }
}
