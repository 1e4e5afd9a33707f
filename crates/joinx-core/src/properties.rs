//! # Relational Properties
//!
//! Properties describe the *what* of a group: which columns it produces, which base relations it
//! covers, which functional dependencies hold over its rows and how many rows it is estimated to
//! return. They are derived once, when the group is created, and shared by every alternative in the
//! group. That sharing is what makes alternatives comparable: two join orders over the same vertex
//! set are costed against the same cardinality.
//!
//! ## Functional Dependencies
//!
//! [`FuncDeps`] tracks three facts:
//!
//! - **Equivalence classes**: columns proven equal by inner-join or filter equalities. The closure
//!   step synthesizes join edges from these classes.
//! - **Constants**: columns bound to a literal by a filter.
//! - **Keys**: column sets that uniquely identify a row. A key is *strict* when none of its columns
//!   can be NULL; only strict keys make a lookup injective.
//!
//! Keys propagate through joins the usual way: if the join equalities determine a key of the right
//! side, every left row matches at most one right row and the left side's keys survive.
//!
//! ## Pending Requirements
//!
//! Sort, limit and distinct nodes above a join do not become groups of their own. They are recorded
//! on the group they sit on and re-applied by the exec builder around whichever alternative wins.

use crate::bitset::VertexSet;
use crate::expr::{ColumnId, SortKey};
use crate::plan::{ColumnDef, IndexDef};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// An ordered set of column ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ColSet(BTreeSet<ColumnId>);

impl ColSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(col: ColumnId) -> Self {
        Self(BTreeSet::from([col]))
    }

    pub fn insert(&mut self, col: ColumnId) {
        self.0.insert(col);
    }

    pub fn contains(&self, col: ColumnId) -> bool {
        self.0.contains(&col)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_subset_of(&self, other: &ColSet) -> bool {
        self.0.is_subset(&other.0)
    }

    pub fn intersects(&self, other: &ColSet) -> bool {
        !self.0.is_disjoint(&other.0)
    }

    pub fn union(&self, other: &ColSet) -> ColSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn intersection(&self, other: &ColSet) -> ColSet {
        Self(self.0.intersection(&other.0).copied().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = ColumnId> + '_ {
        self.0.iter().copied()
    }

    pub fn first(&self) -> Option<ColumnId> {
        self.0.iter().next().copied()
    }
}

impl FromIterator<ColumnId> for ColSet {
    fn from_iter<I: IntoIterator<Item = ColumnId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for ColSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// A set of columns that uniquely identifies a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Key {
    pub cols: ColSet,
    /// No key column can be NULL.
    pub strict: bool,
}

/// Functional dependencies over a group's output.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FuncDeps {
    pub equivs: Vec<ColSet>,
    pub constants: ColSet,
    pub keys: Vec<Key>,
}

impl FuncDeps {
    /// Dependencies of a base relation: one key per unique index.
    pub fn for_source(columns: &[ColumnDef], indexes: &[IndexDef]) -> Self {
        let mut fds = FuncDeps::default();
        for idx in indexes.iter().filter(|i| i.unique && !i.columns.is_empty()) {
            let strict = idx
                .columns
                .iter()
                .all(|c| columns.iter().any(|d| d.id == *c && !d.nullable));
            fds.add_key(idx.columns.iter().copied().collect(), strict);
        }
        fds
    }

    pub fn add_key(&mut self, cols: ColSet, strict: bool) {
        if let Some(existing) = self.keys.iter_mut().find(|k| k.cols == cols) {
            existing.strict |= strict;
            return;
        }
        self.keys.push(Key { cols, strict });
        // Shortest (then strict) key first so `strict_key` and `key` stay stable.
        self.keys
            .sort_by(|a, b| a.cols.len().cmp(&b.cols.len()).then(b.strict.cmp(&a.strict)));
    }

    /// Record `a = b`, merging their equivalence classes.
    pub fn add_equivalence(&mut self, a: ColumnId, b: ColumnId) {
        if a == b {
            return;
        }
        let ia = self.equivs.iter().position(|s| s.contains(a));
        let ib = self.equivs.iter().position(|s| s.contains(b));
        match (ia, ib) {
            (Some(i), Some(j)) if i == j => {}
            (Some(i), Some(j)) => {
                let (lo, hi) = if i < j { (i, j) } else { (j, i) };
                let merged = self.equivs.remove(hi);
                self.equivs[lo] = self.equivs[lo].union(&merged);
            }
            (Some(i), None) => self.equivs[i].insert(b),
            (None, Some(j)) => self.equivs[j].insert(a),
            (None, None) => self.equivs.push([a, b].into_iter().collect()),
        }
    }

    pub fn add_constant(&mut self, col: ColumnId) {
        self.constants.insert(col);
    }

    /// Equivalence class containing `col`, if it has any other member.
    pub fn equiv_class(&self, col: ColumnId) -> Option<&ColSet> {
        self.equivs.iter().find(|s| s.contains(col))
    }

    pub fn are_equivalent(&self, a: ColumnId, b: ColumnId) -> bool {
        a == b || self.equiv_class(a).is_some_and(|s| s.contains(b))
    }

    /// Columns determined by `cols`: their equivalents plus every constant.
    pub fn closure(&self, cols: &ColSet) -> ColSet {
        let mut out = cols.union(&self.constants);
        for class in &self.equivs {
            if class.intersects(&out) {
                out = out.union(class);
            }
        }
        out
    }

    /// True when `cols` functionally determine some key.
    pub fn determines_key(&self, cols: &ColSet) -> bool {
        let closed = self.closure(cols);
        self.keys.iter().any(|k| k.cols.is_subset_of(&closed))
    }

    /// True when `cols` determine a strict key.
    pub fn determines_strict_key(&self, cols: &ColSet) -> bool {
        let closed = self.closure(cols);
        self.keys.iter().any(|k| k.strict && k.cols.is_subset_of(&closed))
    }

    /// The shortest strict key, if any.
    pub fn strict_key(&self) -> Option<&ColSet> {
        self.keys.iter().find(|k| k.strict).map(|k| &k.cols)
    }

    fn merged(left: &FuncDeps, right: &FuncDeps, equalities: &[(ColumnId, ColumnId)]) -> FuncDeps {
        let mut out = FuncDeps {
            equivs: left.equivs.clone(),
            constants: left.constants.union(&right.constants),
            keys: Vec::new(),
        };
        for class in &right.equivs {
            let cols: Vec<ColumnId> = class.iter().collect();
            for pair in cols.windows(2) {
                out.add_equivalence(pair[0], pair[1]);
            }
        }
        for &(a, b) in equalities {
            out.add_equivalence(a, b);
        }
        out
    }

    /// Dependencies of `left INNER JOIN right` with the given column equalities.
    pub fn inner_join(
        left: &FuncDeps,
        left_cols: &ColSet,
        right: &FuncDeps,
        right_cols: &ColSet,
        equalities: &[(ColumnId, ColumnId)],
    ) -> FuncDeps {
        let mut out = Self::merged(left, right, equalities);
        let right_bound = right.keys.iter().any(|k| k.cols.is_subset_of(&out.closure(left_cols)));
        let left_bound = left.keys.iter().any(|k| k.cols.is_subset_of(&out.closure(right_cols)));
        if right_bound {
            out.keys = left.keys.clone();
        } else if left_bound {
            out.keys = right.keys.clone();
        } else if let (Some(lk), Some(rk)) = (left.keys.first(), right.keys.first()) {
            out.add_key(lk.cols.union(&rk.cols), lk.strict && rk.strict);
        }
        out
    }

    /// Dependencies of `left LEFT JOIN right`. Right-side equivalences do not survive
    /// null-extension, so only the left side's classes are kept.
    pub fn left_join(
        left: &FuncDeps,
        left_cols: &ColSet,
        right: &FuncDeps,
        equalities: &[(ColumnId, ColumnId)],
    ) -> FuncDeps {
        let joined = Self::merged(left, right, equalities);
        let mut out = FuncDeps {
            equivs: left.equivs.clone(),
            constants: left.constants.clone(),
            keys: Vec::new(),
        };
        let right_bound = right
            .keys
            .iter()
            .any(|k| k.cols.is_subset_of(&joined.closure(left_cols)));
        if right_bound {
            out.keys = left.keys.clone();
        } else if let (Some(lk), Some(rk)) = (left.keys.first(), right.keys.first()) {
            out.add_key(lk.cols.union(&rk.cols), false);
        }
        out
    }

    /// Restrict to a projected column set.
    pub fn project(&self, cols: &ColSet) -> FuncDeps {
        FuncDeps {
            equivs: self
                .equivs
                .iter()
                .map(|c| c.intersection(cols))
                .filter(|c| c.len() > 1)
                .collect(),
            constants: self.constants.intersection(cols),
            keys: self
                .keys
                .iter()
                .filter(|k| k.cols.is_subset_of(cols))
                .cloned()
                .collect(),
        }
    }
}

/// How a group's pending DISTINCT was resolved for one alternative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DistinctOp {
    #[default]
    None,
    /// Input already sorted on every output column.
    Sorted,
    Hash,
}

/// Per-group relational properties.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RelProps {
    pub output_cols: ColSet,
    /// Vertices whose rows feed this group.
    pub input_tables: VertexSet,
    /// Vertices whose columns appear in the output (semi/anti joins drop the right side).
    pub output_tables: VertexSet,
    pub fds: FuncDeps,
    pub row_count: f64,
    /// A DISTINCT must be applied to this group's output.
    pub pending_distinct: bool,
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(ids: &[u32]) -> ColSet {
        ids.iter().map(|&i| ColumnId(i)).collect()
    }

    fn keyed(key: &[u32]) -> FuncDeps {
        let mut fds = FuncDeps::default();
        fds.add_key(cols(key), true);
        fds
    }

    #[test]
    fn test_equivalence_merge_and_closure() {
        let mut fds = FuncDeps::default();
        fds.add_equivalence(ColumnId(1), ColumnId(2));
        fds.add_equivalence(ColumnId(3), ColumnId(4));
        fds.add_equivalence(ColumnId(2), ColumnId(3));
        assert_eq!(fds.equivs.len(), 1);
        assert!(fds.are_equivalent(ColumnId(1), ColumnId(4)));
        fds.add_constant(ColumnId(9));
        assert_eq!(fds.closure(&cols(&[1])), cols(&[1, 2, 3, 4, 9]));
    }

    #[test]
    fn test_inner_join_keeps_left_key_when_right_key_bound() {
        // a(1 key) JOIN b(2 key) ON a.1 = b.2: each a row matches one b row.
        let joined = FuncDeps::inner_join(&keyed(&[1]), &cols(&[1, 5]), &keyed(&[2]), &cols(&[2, 6]), &[(ColumnId(1), ColumnId(2))]);
        assert_eq!(joined.strict_key(), Some(&cols(&[1])));

        // a.5 = b.6 binds neither key: the key is the union.
        let cross = FuncDeps::inner_join(&keyed(&[1]), &cols(&[1, 5]), &keyed(&[2]), &cols(&[2, 6]), &[(ColumnId(5), ColumnId(6))]);
        assert_eq!(cross.strict_key(), Some(&cols(&[1, 2])));
    }

    #[test]
    fn test_left_join_drops_right_equivalences() {
        let mut right = keyed(&[2]);
        right.add_equivalence(ColumnId(2), ColumnId(3));
        let joined = FuncDeps::left_join(&keyed(&[1]), &cols(&[1]), &right, &[(ColumnId(1), ColumnId(2))]);
        assert!(joined.equivs.is_empty());
        assert_eq!(joined.strict_key(), Some(&cols(&[1])));
    }

    #[test]
    fn test_source_keys_from_unique_indexes() {
        let columns = vec![
            ColumnDef { id: ColumnId(1), name: "id".into(), nullable: false },
            ColumnDef { id: ColumnId(2), name: "email".into(), nullable: true },
        ];
        let indexes = vec![
            IndexDef { name: "PRIMARY".into(), columns: vec![ColumnId(1)], unique: true, ordered: true },
            IndexDef { name: "by_email".into(), columns: vec![ColumnId(2)], unique: true, ordered: true },
        ];
        let fds = FuncDeps::for_source(&columns, &indexes);
        assert_eq!(fds.keys.len(), 2);
        assert_eq!(fds.strict_key(), Some(&cols(&[1])));
        assert!(fds.determines_key(&cols(&[2])));
        assert!(!fds.determines_strict_key(&cols(&[2])));
        assert_eq!(fds.project(&cols(&[2])).keys.len(), 1);
    }
}
