//! # Rule System
//!
//! Exploration rules add physical alternatives to a populated memo: index scans, lookup, merge,
//! hash and range-heap joins, and the semi/anti rewrites that open those up. Join *ordering* is not
//! a rule; the enumerator has already produced every valid order before rules run.
//!
//! ## Dispatch
//!
//! Each rule declares the [`RelKind`]s it inspects. The search applies rules one at a time, in
//! registry order, to every group alternative of a matching kind, so a rule sees the alternatives
//! added by the rules before it (a semi join rewritten to an inner join is then eligible for a
//! lookup or hash implementation).
//!
//! ## Hints
//!
//! A rule can be switched off by global hints (`NO_ICP`, `NO_MERGE_JOIN`) through
//! [`Rule::enabled`].

use crate::error::OptResult;
use crate::hint::JoinHints;
use crate::memo::Memo;
use crate::rel::{ExprId, RelKind};
use std::hash::{Hash, Hasher};

/// An exploration rule.
pub trait Rule: Send + Sync {
    /// Unique name of this rule.
    fn name(&self) -> &str;

    /// Expression kinds this rule inspects.
    fn kinds(&self) -> &[RelKind];

    /// Whether global hints leave this rule active.
    fn enabled(&self, _hints: &JoinHints) -> bool {
        true
    }

    /// Inspect `expr` and register any alternatives in its group. Returns how many were added.
    fn apply(&self, memo: &mut Memo, expr: ExprId) -> OptResult<usize>;

    /// Hash for fingerprinting.
    fn rule_hash(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.name().hash(&mut hasher);
        hasher.finish()
    }
}

/// Ordered collection of exploration rules.
#[derive(Default)]
pub struct RuleRegistry {
    rules: Vec<Box<dyn Rule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rules(&self) -> impl Iterator<Item = &dyn Rule> {
        self.rules.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules left enabled by `hints`, in application order.
    pub fn active_rules(&self, hints: &JoinHints) -> Vec<&dyn Rule> {
        self.rules().filter(|r| r.enabled(hints)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, bool);

    impl Rule for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn kinds(&self) -> &[RelKind] {
            &[RelKind::Join]
        }
        fn enabled(&self, hints: &JoinHints) -> bool {
            !(self.1 && hints.no_merge_join)
        }
        fn apply(&self, _memo: &mut Memo, _expr: ExprId) -> OptResult<usize> {
            Ok(0)
        }
    }

    #[test]
    fn test_active_rules_respect_hints() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(Box::new(Named("a", false)));
        registry.add_rule(Box::new(Named("merge", true)));
        let hints = JoinHints {
            no_merge_join: true,
            ..Default::default()
        };
        let active: Vec<_> = registry.active_rules(&hints).iter().map(|r| r.name().to_string()).collect();
        assert_eq!(active, vec!["a"]);
        assert_eq!(registry.active_rules(&JoinHints::default()).len(), 2);
        assert_ne!(registry.rules[0].rule_hash(), registry.rules[1].rule_hash());
    }
}
