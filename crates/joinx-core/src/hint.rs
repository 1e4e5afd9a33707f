//! # Join Hints
//!
//! Hints arrive as a comment attached to the query (`/*+ JOIN_ORDER(a, b, c) LOOKUP_JOIN(a, b) */`).
//! They are parsed into typed [`Hint`] values, validated for arity, resolved against the vertex list
//! and then applied as *soft* constraints during costing:
//!
//! | Hint | Constraint on a join with inputs `L`, `R` |
//! |------|--------------------------------------------|
//! | `JOIN_ORDER(t1, ..)` | `L` and `R` are contiguous runs of the order and `L` precedes `R` |
//! | `JOIN_FIXED_ORDER` | `JOIN_ORDER` over the original leaf order |
//! | `LEFT_DEEP` | `R` is a single base relation |
//! | `LOOKUP_JOIN(a, b)` | the join separating `a` from `b` is a lookup join probing `b` from `a` |
//! | `MERGE_JOIN` / `HASH_JOIN` / `INNER_JOIN` / `SEMI_JOIN` / `ANTI_JOIN` `(a, b)` | the join separating `a` and `b` uses that operator |
//! | `NO_MERGE_JOIN` | merge-join alternatives are not generated |
//! | `NO_ICP` | index-scan alternatives for filters are not generated |
//!
//! A group's best plan is the cheapest alternative that satisfies every hint (with hint-satisfied
//! children). When no alternative does, selection falls back to the plain minimum; a hint never
//! makes planning fail. Malformed hints are logged and dropped.

use crate::bitset::VertexSet;
use crate::expr::JoinType;
use crate::plan::SourceTable;
use crate::rel::RelExpr;
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HintKind {
    JoinOrder,
    JoinFixedOrder,
    LeftDeep,
    LookupJoin,
    MergeJoin,
    HashJoin,
    InnerJoin,
    SemiJoin,
    AntiJoin,
    NoMergeJoin,
    NoIcp,
}

impl HintKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "JOIN_ORDER" => HintKind::JoinOrder,
            "JOIN_FIXED_ORDER" => HintKind::JoinFixedOrder,
            "LEFT_DEEP" => HintKind::LeftDeep,
            "LOOKUP_JOIN" => HintKind::LookupJoin,
            "MERGE_JOIN" => HintKind::MergeJoin,
            "HASH_JOIN" => HintKind::HashJoin,
            "INNER_JOIN" => HintKind::InnerJoin,
            "SEMI_JOIN" => HintKind::SemiJoin,
            "ANTI_JOIN" => HintKind::AntiJoin,
            "NO_MERGE_JOIN" => HintKind::NoMergeJoin,
            "NO_ICP" => HintKind::NoIcp,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            HintKind::JoinOrder => "JOIN_ORDER",
            HintKind::JoinFixedOrder => "JOIN_FIXED_ORDER",
            HintKind::LeftDeep => "LEFT_DEEP",
            HintKind::LookupJoin => "LOOKUP_JOIN",
            HintKind::MergeJoin => "MERGE_JOIN",
            HintKind::HashJoin => "HASH_JOIN",
            HintKind::InnerJoin => "INNER_JOIN",
            HintKind::SemiJoin => "SEMI_JOIN",
            HintKind::AntiJoin => "ANTI_JOIN",
            HintKind::NoMergeJoin => "NO_MERGE_JOIN",
            HintKind::NoIcp => "NO_ICP",
        }
    }

    fn is_operator(self) -> bool {
        matches!(
            self,
            HintKind::LookupJoin
                | HintKind::MergeJoin
                | HintKind::HashJoin
                | HintKind::InnerJoin
                | HintKind::SemiJoin
                | HintKind::AntiJoin
        )
    }

    fn check_arity(self, found: usize) -> Result<(), HintError> {
        let (ok, expected) = match self {
            HintKind::JoinOrder => (found >= 1, "at least 1"),
            k if k.is_operator() => (found == 2, "exactly 2"),
            _ => (found == 0, "no"),
        };
        if ok {
            Ok(())
        } else {
            Err(HintError::Arity {
                hint: self.name(),
                expected,
                found,
            })
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum HintError {
    #[error("unknown hint {0}")]
    Unknown(String),
    #[error("{hint} takes {expected} arguments, found {found}")]
    Arity {
        hint: &'static str,
        expected: &'static str,
        found: usize,
    },
    #[error("hint references unknown table {0}")]
    UnknownTable(String),
    #[error("JOIN_ORDER must name every table exactly once")]
    IncompleteOrder,
}

/// A parsed, arity-checked hint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hint {
    pub kind: HintKind,
    pub args: Vec<String>,
}

impl Hint {
    pub fn new(name: &str, args: Vec<String>) -> Result<Self, HintError> {
        let kind = HintKind::from_name(name).ok_or_else(|| HintError::Unknown(name.to_string()))?;
        kind.check_arity(args.len())?;
        Ok(Self { kind, args })
    }
}

const HINT_PATTERN: &str = r"([A-Za-z_][A-Za-z0-9_]*)\s*(?:\(([^)]*)\))?";

/// Compiled once; a failed compile is logged once and every later comment parses to no hints.
fn hint_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(HINT_PATTERN) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(error = %err, "hint pattern failed to compile, hints are ignored");
            None
        }
    })
    .as_ref()
}

/// Parse every hint in a query comment. Invalid hints are logged and skipped.
pub fn parse_hints(comment: &str) -> Vec<Hint> {
    let body = comment
        .trim()
        .trim_start_matches("/*+")
        .trim_start_matches("/*")
        .trim_end_matches("*/");
    let mut hints = Vec::new();
    let Some(re) = hint_regex() else {
        return hints;
    };
    for cap in re.captures_iter(body) {
        let name = &cap[1];
        let args: Vec<String> = cap
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        match Hint::new(name, args) {
            Ok(h) => hints.push(h),
            Err(err) => warn!(hint = name, error = %err, "dropping invalid hint"),
        }
    }
    hints
}

/// Per-pair operator constraint, resolved to vertices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinOpHint {
    pub kind: HintKind,
    pub left: usize,
    pub right: usize,
}

/// Hints resolved against the vertex list of one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JoinHints {
    /// Position of each vertex in the requested order.
    pub order: Option<Vec<usize>>,
    pub ops: Vec<JoinOpHint>,
    pub left_deep: bool,
    pub no_merge_join: bool,
    pub no_icp: bool,
}

impl JoinHints {
    /// Resolve parsed hints against the sources in vertex order. Hints naming unknown tables are
    /// logged and dropped.
    pub fn resolve(hints: &[Hint], sources: &[&SourceTable]) -> Self {
        let mut out = JoinHints::default();
        for hint in hints {
            if let Err(err) = out.apply(hint, sources) {
                warn!(hint = hint.kind.name(), error = %err, "ignoring hint");
            }
        }
        debug!(?out, "resolved join hints");
        out
    }

    fn apply(&mut self, hint: &Hint, sources: &[&SourceTable]) -> Result<(), HintError> {
        match hint.kind {
            HintKind::JoinOrder => {
                let mut positions = vec![usize::MAX; sources.len()];
                for (pos, name) in hint.args.iter().enumerate() {
                    let v = find_vertex(name, sources)?;
                    if positions[v] != usize::MAX {
                        return Err(HintError::IncompleteOrder);
                    }
                    positions[v] = pos;
                }
                if positions.contains(&usize::MAX) {
                    return Err(HintError::IncompleteOrder);
                }
                self.order = Some(positions);
            }
            HintKind::JoinFixedOrder => self.order = Some((0..sources.len()).collect()),
            HintKind::LeftDeep => self.left_deep = true,
            HintKind::NoMergeJoin => self.no_merge_join = true,
            HintKind::NoIcp => self.no_icp = true,
            kind => {
                let left = find_vertex(&hint.args[0], sources)?;
                let right = find_vertex(&hint.args[1], sources)?;
                self.ops.push(JoinOpHint { kind, left, right });
            }
        }
        Ok(())
    }

    pub fn has_order(&self) -> bool {
        self.order.is_some()
    }

    /// True when any hint constrains plan selection.
    pub fn is_active(&self) -> bool {
        self.order.is_some() || self.left_deep || !self.ops.is_empty()
    }

    /// Whether a join alternative with input vertex sets `left`, `right` satisfies every hint.
    /// Non-join alternatives always do.
    pub fn satisfied_by(&self, rel: &RelExpr, left: VertexSet, right: VertexSet) -> bool {
        let Some(join) = rel.join() else {
            return true;
        };
        if self.left_deep && !right.is_singleton() {
            return false;
        }
        if let Some(order) = &self.order {
            if !ordered_runs(order, left, right) {
                return false;
            }
        }
        self.ops.iter().all(|h| {
            let forward = left.contains(h.left) && right.contains(h.right);
            let backward = left.contains(h.right) && right.contains(h.left);
            if !forward && !backward {
                return true;
            }
            match h.kind {
                HintKind::LookupJoin => {
                    forward && matches!(rel, RelExpr::LookupJoin { .. } | RelExpr::ConcatJoin { .. })
                }
                HintKind::MergeJoin => matches!(rel, RelExpr::MergeJoin { .. }),
                HintKind::HashJoin => matches!(rel, RelExpr::HashJoin { .. }),
                HintKind::InnerJoin => matches!(rel, RelExpr::Join(_)) && join.join_type.is_inner(),
                HintKind::SemiJoin => join.join_type == JoinType::Semi,
                HintKind::AntiJoin => join.join_type == JoinType::Anti,
                _ => true,
            }
        })
    }
}

fn find_vertex(name: &str, sources: &[&SourceTable]) -> Result<usize, HintError> {
    sources
        .iter()
        .position(|s| {
            s.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name)) || s.name.eq_ignore_ascii_case(name)
        })
        .ok_or_else(|| HintError::UnknownTable(name.to_string()))
}

/// `left` and `right` each occupy a contiguous run of positions and `left` comes first.
fn ordered_runs(order: &[usize], left: VertexSet, right: VertexSet) -> bool {
    let run = |set: VertexSet| -> Option<(usize, usize)> {
        let positions: Vec<usize> = set.iter().filter_map(|v| order.get(v).copied()).collect();
        let lo = *positions.iter().min()?;
        let hi = *positions.iter().max()?;
        (hi - lo + 1 == positions.len()).then_some((lo, hi))
    };
    match (run(left), run(right)) {
        (Some((_, lhi)), Some((rlo, _))) => lhi < rlo,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rel::{GroupId, JoinExpr};

    fn sources() -> Vec<SourceTable> {
        vec![
            SourceTable::new(1, "db", "a"),
            SourceTable::new(2, "db", "b").with_alias("bee"),
            SourceTable::new(3, "db", "c"),
        ]
    }

    fn join(jt: JoinType) -> RelExpr {
        RelExpr::Join(JoinExpr::new(jt, GroupId(0), GroupId(1), vec![]))
    }

    #[test]
    fn test_parse_validates_arity() {
        let hints = parse_hints("/*+ JOIN_ORDER(a, b,c) lookup_join(a) HASH_JOIN(a,b) LEFT_DEEP(x) NO_ICP BOGUS */");
        let kinds: Vec<_> = hints.iter().map(|h| h.kind).collect();
        assert_eq!(kinds, vec![HintKind::JoinOrder, HintKind::HashJoin, HintKind::NoIcp]);
        assert_eq!(hints[0].args, vec!["a", "b", "c"]);
        assert!(matches!(Hint::new("JOIN_ORDER", vec![]), Err(HintError::Arity { .. })));
        assert_eq!(Hint::new("NOPE", vec![]), Err(HintError::Unknown("NOPE".into())));
    }

    #[test]
    fn test_hint_pattern_compiles_once() {
        let first = hint_regex().expect("hint pattern compiles");
        assert!(std::ptr::eq(first, hint_regex().unwrap()));
        assert_eq!(parse_hints("/*+ NO_ICP */").len(), 1);
    }

    #[test]
    fn test_resolve_by_alias_and_reject_partial_order() {
        let srcs = sources();
        let refs: Vec<&SourceTable> = srcs.iter().collect();
        let hints = JoinHints::resolve(&parse_hints("JOIN_ORDER(BEE, a, c) MERGE_JOIN(a, zzz)"), &refs);
        assert_eq!(hints.order, Some(vec![1, 0, 2]));
        assert!(hints.ops.is_empty());

        let partial = JoinHints::resolve(&parse_hints("JOIN_ORDER(a, c)"), &refs);
        assert!(!partial.has_order());
    }

    #[test]
    fn test_order_satisfaction() {
        let srcs = sources();
        let refs: Vec<&SourceTable> = srcs.iter().collect();
        let hints = JoinHints::resolve(&parse_hints("JOIN_ORDER(b, a, c)"), &refs);
        let a = VertexSet::single(0);
        let b = VertexSet::single(1);
        let c = VertexSet::single(2);
        let rel = join(JoinType::Inner);
        assert!(hints.satisfied_by(&rel, b, a));
        assert!(!hints.satisfied_by(&rel, a, b));
        assert!(hints.satisfied_by(&rel, a | b, c));
        // {b, c} is not a contiguous run of the order.
        assert!(!hints.satisfied_by(&rel, b | c, a));
        assert!(hints.satisfied_by(&RelExpr::TableScan { vertex: 0 }, a, b));
    }

    #[test]
    fn test_operator_hint_orientation() {
        let srcs = sources();
        let refs: Vec<&SourceTable> = srcs.iter().collect();
        let hints = JoinHints::resolve(&parse_hints("INNER_JOIN(a, c) LEFT_DEEP"), &refs);
        let a = VertexSet::single(0);
        let b = VertexSet::single(1);
        let c = VertexSet::single(2);
        assert!(hints.satisfied_by(&join(JoinType::Inner), c, a));
        assert!(!hints.satisfied_by(&join(JoinType::Inner), a, b | c));
        // The pair is not separated by this join.
        assert!(hints.satisfied_by(&join(JoinType::Left), a, b));
    }
}
