//! # Built-in Exploration Rules
//!
//! The default set of exploration rules run over a populated memo. Join ordering itself is done by
//! the enumerator in `joinx-core`; these rules only add physical alternatives to the groups it
//! produced.
//!
//! ## Rewrites
//!
//! - **`SemiToInnerRule`**: `SEMI(L, R)` as an inner join against the deduplicated right side.
//! - **`AntiToLeftRule`**: `ANTI(L, R)` as a left join keeping rows without a match.
//!
//! ## Access Paths
//!
//! - **`IndexScanRule`**: a filtered table read through an index (disabled by `NO_ICP`).
//!
//! ## Join Implementations
//!
//! - **`LookupJoinRule`**: index probes into the right input, and concatenated probes for OR filters.
//! - **`MergeJoinRule`**: merge of two ordered index scans (disabled by `NO_MERGE_JOIN`).
//! - **`HashJoinRule`**: hash joins on equality keys, and keyless hash joins over subqueries.
//! - **`RangeHeapJoinRule`**: interval containment joins.
//!
//! A join with no applicable rule keeps its nested-loop implementation.

pub mod access;
pub mod impl_join;
pub mod impl_lookup;
pub mod impl_merge;
pub mod impl_range_heap;
pub mod impl_scan;
pub mod semi_anti;

use joinx_core::rule::RuleRegistry;

/// Create a registry with all built-in rules, in application order.
///
/// Index scans run first so lookup candidates see them; the semi/anti rewrites run before the join
/// implementations so the joins they introduce are implemented too.
pub fn default_rule_registry() -> RuleRegistry {
    let mut registry = RuleRegistry::new();

    registry.add_rule(Box::new(impl_scan::IndexScanRule));

    registry.add_rule(Box::new(semi_anti::SemiToInnerRule));
    registry.add_rule(Box::new(semi_anti::AntiToLeftRule));

    registry.add_rule(Box::new(impl_lookup::LookupJoinRule));
    registry.add_rule(Box::new(impl_merge::MergeJoinRule));
    registry.add_rule(Box::new(impl_join::HashJoinRule));
    registry.add_rule(Box::new(impl_range_heap::RangeHeapJoinRule));

    registry
}
