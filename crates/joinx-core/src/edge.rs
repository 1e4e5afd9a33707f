//! # Hypergraph Edges and Conflict Detection
//!
//! Every join predicate of the input tree becomes an [`Edge`] of the join hypergraph. An edge
//! remembers the [`JoinOperator`] it came from (join type plus the vertices and edges of the
//! operator's original left and right inputs) and carries two eligibility sets:
//!
//! - **SES** (syntactic eligibility set): the vertices the edge's filters reference.
//! - **TES** (total eligibility set): the SES widened by the CD-C conflict detector so that a join
//!   using this edge can never be formed over inputs that would change the query's semantics.
//!
//! Some restrictions cannot be expressed by widening the TES alone. Those are kept as
//! [`ConflictRule`]s (`from → to`): a candidate join whose inputs intersect `from` must contain all
//! of `to`. Rules are checked locally for every candidate pair during enumeration.
//!
//! ## Reordering Properties
//!
//! For a child edge `A` under a parent edge `B` the detector asks three questions, answered by
//! lookup tables keyed by the two join types:
//!
//! ```text
//! assoc:        (e1 A e2) B e3  =>  e1 A (e2 B e3)
//! left-asscom:  (e1 A e2) B e3  =>  (e1 B e3) A e2
//! right-asscom: e1 B (e2 A e3)  =>  e2 A (e1 B e3)
//! ```
//!
//! Table entries are *never*, *always*, or conditional on the filters null-rejecting a particular
//! input. A property that does not hold adds a conflict rule pinning the child's inputs together.
//!
//! Moerkotte, Fender, Eich: "On the correct and complete enumeration of the core search space",
//! SIGMOD 2013.

use crate::bitset::{EdgeSet, VertexSet};
use crate::expr::{Expr, JoinType};
use serde::Serialize;
use std::fmt;

/// The original join node an edge was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct JoinOperator {
    pub join_type: JoinType,
    pub left_vertices: VertexSet,
    pub right_vertices: VertexSet,
    pub left_edges: EdgeSet,
    pub right_edges: EdgeSet,
}

/// If a candidate join's inputs intersect `from`, they must include all of `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConflictRule {
    pub from: VertexSet,
    pub to: VertexSet,
}

#[derive(Debug, Clone, Serialize)]
pub struct Edge {
    pub op: JoinOperator,
    /// Join conjuncts; empty for a filterless inner or cross join.
    pub filters: Vec<Expr>,
    pub ses: VertexSet,
    pub tes: VertexSet,
    pub rules: Vec<ConflictRule>,
    /// Vertices for which the filters never evaluate to TRUE when all columns are NULL.
    pub null_rejected: VertexSet,
}

impl Edge {
    pub fn new(op: JoinOperator, filters: Vec<Expr>, ses: VertexSet, null_rejected: VertexSet) -> Self {
        Self {
            op,
            filters,
            ses,
            tes: ses,
            rules: Vec::new(),
            null_rejected,
        }
    }

    /// Inner and cross edges may be used in either orientation.
    pub fn is_inner(&self) -> bool {
        self.op.join_type.is_inner()
    }

    /// Compute the TES and conflict rules. `edges` holds every edge created before this one, which
    /// includes all edges of the operator's subtrees.
    pub fn calc_tes(&mut self, edges: &[Edge]) {
        self.tes = self.ses;

        // Degenerate predicates (cross joins, filters over one side only) stay anchored to the
        // original subtrees.
        if !self.tes.intersects(self.op.left_vertices) {
            self.tes = self.tes | self.op.left_vertices;
        }
        if !self.tes.intersects(self.op.right_vertices) {
            self.tes = self.tes | self.op.right_vertices;
        }
        // The preserved side of a LEFT join never moves independently.
        if self.op.join_type == JoinType::Left {
            self.tes = self.tes | self.op.left_vertices;
        }

        for idx in self.op.left_edges.iter() {
            if self.op.left_vertices.is_subset_of(self.tes) {
                break;
            }
            let Some(child) = edges.get(idx) else { continue };
            if !assoc(child, self) {
                self.add_rule(ConflictRule {
                    from: child.op.right_vertices,
                    to: narrowed(child.op.left_vertices, child.ses),
                });
            }
            if !left_asscom(child, self) {
                self.add_rule(ConflictRule {
                    from: child.op.left_vertices,
                    to: narrowed(child.op.right_vertices, child.ses),
                });
            }
        }

        for idx in self.op.right_edges.iter() {
            if self.op.right_vertices.is_subset_of(self.tes) {
                break;
            }
            let Some(child) = edges.get(idx) else { continue };
            if !assoc(self, child) {
                self.add_rule(ConflictRule {
                    from: child.op.left_vertices,
                    to: narrowed(child.op.right_vertices, child.ses),
                });
            }
            if !right_asscom(self, child) {
                self.add_rule(ConflictRule {
                    from: child.op.right_vertices,
                    to: narrowed(child.op.left_vertices, child.ses),
                });
            }
        }
    }

    fn add_rule(&mut self, rule: ConflictRule) {
        if rule.from.intersects(self.tes) {
            // Always triggered.
            self.tes = self.tes | rule.to;
        } else if !rule.to.is_subset_of(self.tes) {
            self.rules.push(rule);
        }
    }

    /// Whether this edge can join `s1` (left) with `s2` (right).
    pub fn applicable(&self, s1: VertexSet, s2: VertexSet) -> bool {
        if !self.check_rules(s1, s2) {
            return false;
        }
        let connects = self.tes.intersects(s1) && self.tes.intersects(s2);
        if self.is_inner() {
            self.tes.is_subset_of(s1 | s2) && connects
        } else {
            (self.tes & self.op.left_vertices).is_subset_of(s1)
                && (self.tes & self.op.right_vertices).is_subset_of(s2)
                && connects
        }
    }

    pub fn check_rules(&self, s1: VertexSet, s2: VertexSet) -> bool {
        let s = s1 | s2;
        self.rules.iter().all(|r| !r.from.intersects(s) || r.to.is_subset_of(s))
    }

    /// The join `s1 ⋈ s2` is the operator's original split, memoized during population.
    pub fn is_redundant(&self, s1: VertexSet, s2: VertexSet) -> bool {
        self.op.left_vertices == s1 && self.op.right_vertices == s2
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ses={} tes={}", self.op.join_type, self.ses, self.tes)?;
        if !self.rules.is_empty() {
            write!(f, " rules=[")?;
            for (i, r) in self.rules.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}->{}", r.from, r.to)?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// `side ∩ ses` when non-empty (a weaker rule), otherwise the whole side.
fn narrowed(side: VertexSet, ses: VertexSet) -> VertexSet {
    if side.intersects(ses) {
        side & ses
    } else {
        side
    }
}

// ----------------------------------------------------------------------
// Lookup tables
// ----------------------------------------------------------------------

type Entry = u8;

const NEVER: Entry = 0;
const ALWAYS: Entry = 1;
const FILTER_A: Entry = 1 << 1;
const FILTER_B: Entry = 1 << 2;
const REJECTS_LEFT_A: Entry = 1 << 3;
const REJECTS_RIGHT_A: Entry = 1 << 4;
const REJECTS_RIGHT_B: Entry = 1 << 5;

/// B's filters reject nulls on A's right input.
const T2N1: Entry = FILTER_B | REJECTS_RIGHT_A;
/// A's and B's filters reject nulls on A's right input.
const T2N2: Entry = FILTER_A | FILTER_B | REJECTS_RIGHT_A;
/// A's filters reject nulls on A's left input.
const T3N1: Entry = FILTER_A | REJECTS_LEFT_A;
/// B's filters reject nulls on B's right input.
const T3N2: Entry = FILTER_B | REJECTS_RIGHT_B;
const T3N3: Entry = FILTER_A | FILTER_B | REJECTS_LEFT_A;
const T3N4: Entry = FILTER_A | FILTER_B | REJECTS_RIGHT_B;

const N: Entry = NEVER;
const A: Entry = ALWAYS;

// Rows are A's join type, columns B's, both in `JoinType::table_index` order:
// cross, inner, semi, anti, left, full, lateral.

const ASSOC: [[Entry; 7]; 7] = [
    [A, A, A, A, A, N, N],
    [A, A, A, A, A, N, N],
    [N, N, N, N, N, N, N],
    [N, N, N, N, N, N, N],
    [N, N, N, N, T2N1, N, N],
    [N, N, N, N, T2N1, T2N2, N],
    [N, N, N, N, N, N, N],
];

const LEFT_ASSCOM: [[Entry; 7]; 7] = [
    [A, A, A, A, A, N, N],
    [A, A, A, A, A, N, N],
    [A, A, A, A, A, N, N],
    [A, A, A, A, A, N, N],
    [A, A, A, A, A, T3N1, N],
    [N, N, N, N, T3N2, T3N3, N],
    [N, N, N, N, N, N, N],
];

const RIGHT_ASSCOM: [[Entry; 7]; 7] = [
    [A, A, N, N, N, N, N],
    [A, A, N, N, N, N, N],
    [N, N, N, N, N, N, N],
    [N, N, N, N, N, N, N],
    [N, N, N, N, N, N, N],
    [N, N, N, N, N, T3N4, N],
    [N, N, N, N, N, N, N],
];

/// `(e1 A e2) B e3 => e1 A (e2 B e3)`.
pub fn assoc(a: &Edge, b: &Edge) -> bool {
    if b.ses.intersects(a.op.left_vertices) || a.ses.intersects(b.op.right_vertices) {
        return false;
    }
    check_property(&ASSOC, a, b)
}

/// `(e1 A e2) B e3 => (e1 B e3) A e2`.
pub fn left_asscom(a: &Edge, b: &Edge) -> bool {
    if b.ses.intersects(a.op.right_vertices) || a.ses.intersects(b.op.right_vertices) {
        return false;
    }
    check_property(&LEFT_ASSCOM, a, b)
}

/// `e1 B (e2 A e3) => e2 A (e1 B e3)`.
pub fn right_asscom(a: &Edge, b: &Edge) -> bool {
    if b.ses.intersects(a.op.left_vertices) || a.ses.intersects(b.op.left_vertices) {
        return false;
    }
    check_property(&RIGHT_ASSCOM, a, b)
}

fn check_property(table: &[[Entry; 7]; 7], a: &Edge, b: &Edge) -> bool {
    let entry = table[a.op.join_type.table_index()][b.op.join_type.table_index()];
    if entry == NEVER {
        return false;
    }
    if entry == ALWAYS {
        return true;
    }
    let candidates = if entry & REJECTS_LEFT_A != 0 {
        a.op.left_vertices
    } else if entry & REJECTS_RIGHT_A != 0 {
        a.op.right_vertices
    } else if entry & REJECTS_RIGHT_B != 0 {
        b.op.right_vertices
    } else {
        VertexSet::EMPTY
    };
    if entry & FILTER_A != 0 && !a.null_rejected.intersects(candidates) {
        return false;
    }
    if entry & FILTER_B != 0 && !b.null_rejected.intersects(candidates) {
        return false;
    }
    true
}
