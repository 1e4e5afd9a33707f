//! Normalized index descriptors.
//!
//! Storage exposes indexes as capability records on each source ([`IndexDef`]). The memo keeps a
//! normalized copy per table so lookup, merge and index-scan alternatives can reason about key
//! prefixes without going back to the input tree.

use crate::expr::{ColumnId, TableId};
use crate::plan::IndexDef;
use crate::properties::ColSet;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Index {
    pub name: String,
    pub table: TableId,
    /// Key columns in index order.
    pub columns: Vec<ColumnId>,
    pub col_set: ColSet,
    pub unique: bool,
    pub ordered: bool,
}

impl Index {
    pub fn from_def(table: TableId, def: &IndexDef) -> Self {
        Self {
            name: def.name.clone(),
            table,
            columns: def.columns.clone(),
            col_set: def.columns.iter().copied().collect(),
            unique: def.unique,
            ordered: def.ordered,
        }
    }

    /// Number of leading key columns contained in `bound`.
    pub fn prefix_len(&self, bound: &ColSet) -> usize {
        self.columns.iter().take_while(|c| bound.contains(**c)).count()
    }

    /// Every key column is bound, so a probe returns at most one row of a unique index.
    pub fn is_fully_bound(&self, bound: &ColSet) -> bool {
        !self.columns.is_empty() && self.prefix_len(bound) == self.columns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matching() {
        let idx = Index::from_def(
            TableId(1),
            &IndexDef { name: "ab".into(), columns: vec![ColumnId(1), ColumnId(2)], unique: true, ordered: true },
        );
        let only_b: ColSet = [ColumnId(2)].into_iter().collect();
        let both: ColSet = [ColumnId(1), ColumnId(2)].into_iter().collect();
        assert_eq!(idx.prefix_len(&only_b), 0);
        assert_eq!(idx.prefix_len(&ColSet::single(ColumnId(1))), 1);
        assert!(idx.is_fully_bound(&both));
        assert!(!idx.is_fully_bound(&only_b));
    }
}
