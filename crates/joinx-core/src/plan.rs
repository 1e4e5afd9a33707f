//! # Input Join Tree
//!
//! The planner consumes a name-resolved, type-checked relational tree. Everything the planner needs
//! to know about a base relation travels on its [`SourceTable`] leaf: identity, columns and the
//! index capability records used to build lookup, merge and index-scan alternatives.
//!
//! Node kinds the planner does not understand (aggregations, windows, ...) are represented by
//! [`LogicalPlan::Opaque`]; encountering one aborts reordering and the caller keeps its own tree.

use crate::expr::{ColumnId, ColumnRef, Expr, JoinType, SortKey, TableId};
use serde::{Deserialize, Serialize};

/// Kind of base relation behind a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    #[default]
    Table,
    Subquery,
    Values,
    RecursiveTable,
    RecursiveCte,
    TableFunction,
    JsonTable,
    SetOp,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDef {
    pub id: ColumnId,
    pub name: String,
    #[serde(default)]
    pub nullable: bool,
}

/// Index capability record as exposed by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDef {
    pub name: String,
    /// Indexed columns in key order.
    pub columns: Vec<ColumnId>,
    #[serde(default)]
    pub unique: bool,
    /// Whether a scan returns rows in key order.
    #[serde(default = "default_true")]
    pub ordered: bool,
}

fn default_true() -> bool {
    true
}

/// A base relation leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceTable {
    pub id: TableId,
    #[serde(default)]
    pub kind: SourceKind,
    #[serde(default)]
    pub database: String,
    pub name: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
    /// Row estimate for relations the statistics provider cannot know about (subqueries, values
    /// lists, table functions).
    #[serde(default)]
    pub row_estimate: Option<f64>,
}

impl SourceTable {
    pub fn new(id: u32, database: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TableId(id),
            kind: SourceKind::Table,
            database: database.into(),
            name: name.into(),
            alias: None,
            columns: Vec::new(),
            indexes: Vec::new(),
            row_estimate: None,
        }
    }

    pub fn with_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn with_column(mut self, id: u32, name: impl Into<String>) -> Self {
        self.columns.push(ColumnDef {
            id: ColumnId(id),
            name: name.into(),
            nullable: false,
        });
        self
    }

    pub fn with_nullable_column(mut self, id: u32, name: impl Into<String>) -> Self {
        self.columns.push(ColumnDef {
            id: ColumnId(id),
            name: name.into(),
            nullable: true,
        });
        self
    }

    /// Add an index over the named columns. Unknown names are ignored.
    pub fn with_index(mut self, name: impl Into<String>, columns: &[&str], unique: bool) -> Self {
        let cols = columns
            .iter()
            .filter_map(|c| self.columns.iter().find(|d| d.name == *c).map(|d| d.id))
            .collect();
        self.indexes.push(IndexDef {
            name: name.into(),
            columns: cols,
            unique,
            ordered: true,
        });
        self
    }

    pub fn with_row_estimate(mut self, rows: f64) -> Self {
        self.row_estimate = Some(rows);
        self
    }

    /// Name used to refer to this relation in the query (alias if present).
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    pub fn column_ref(&self, name: &str) -> Option<ColumnRef> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| ColumnRef::new(self.id, c.id, self.display_name(), c.name.clone()))
    }
}

/// Resolved relational tree handed to the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LogicalPlan {
    Source(SourceTable),
    Filter {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    Having {
        predicate: Expr,
        input: Box<LogicalPlan>,
    },
    /// Column-pruning projection.
    Project {
        columns: Vec<ColumnRef>,
        input: Box<LogicalPlan>,
    },
    Sort {
        keys: Vec<SortKey>,
        input: Box<LogicalPlan>,
    },
    Limit {
        count: u64,
        input: Box<LogicalPlan>,
    },
    Distinct {
        input: Box<LogicalPlan>,
    },
    Max1Row {
        input: Box<LogicalPlan>,
    },
    Join {
        join_type: JoinType,
        #[serde(default)]
        condition: Option<Expr>,
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
    },
    /// A node outside the join planner's vocabulary.
    Opaque {
        kind: String,
        #[serde(default)]
        input: Option<Box<LogicalPlan>>,
    },
}

impl LogicalPlan {
    pub fn source(table: SourceTable) -> Self {
        LogicalPlan::Source(table)
    }

    pub fn join(join_type: JoinType, left: LogicalPlan, right: LogicalPlan, condition: Option<Expr>) -> Self {
        LogicalPlan::Join {
            join_type,
            condition,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn inner(left: LogicalPlan, right: LogicalPlan, condition: Expr) -> Self {
        Self::join(JoinType::Inner, left, right, Some(condition))
    }

    pub fn filter(self, predicate: Expr) -> Self {
        LogicalPlan::Filter {
            predicate,
            input: Box::new(self),
        }
    }

    pub fn project(self, columns: Vec<ColumnRef>) -> Self {
        LogicalPlan::Project {
            columns,
            input: Box::new(self),
        }
    }

    pub fn sort(self, keys: Vec<SortKey>) -> Self {
        LogicalPlan::Sort {
            keys,
            input: Box::new(self),
        }
    }

    pub fn limit(self, count: u64) -> Self {
        LogicalPlan::Limit {
            count,
            input: Box::new(self),
        }
    }

    pub fn distinct(self) -> Self {
        LogicalPlan::Distinct { input: Box::new(self) }
    }

    /// Short label for logs and error messages.
    pub fn kind_name(&self) -> &str {
        match self {
            LogicalPlan::Source(_) => "Source",
            LogicalPlan::Filter { .. } => "Filter",
            LogicalPlan::Having { .. } => "Having",
            LogicalPlan::Project { .. } => "Project",
            LogicalPlan::Sort { .. } => "Sort",
            LogicalPlan::Limit { .. } => "Limit",
            LogicalPlan::Distinct { .. } => "Distinct",
            LogicalPlan::Max1Row { .. } => "Max1Row",
            LogicalPlan::Join { .. } => "Join",
            LogicalPlan::Opaque { kind, .. } => kind,
        }
    }

    /// Base relations in left-to-right leaf order.
    pub fn sources(&self) -> Vec<&SourceTable> {
        let mut out = Vec::new();
        self.collect_sources(&mut out);
        out
    }

    fn collect_sources<'a>(&'a self, out: &mut Vec<&'a SourceTable>) {
        match self {
            LogicalPlan::Source(t) => out.push(t),
            LogicalPlan::Filter { input, .. }
            | LogicalPlan::Having { input, .. }
            | LogicalPlan::Project { input, .. }
            | LogicalPlan::Sort { input, .. }
            | LogicalPlan::Limit { input, .. }
            | LogicalPlan::Distinct { input }
            | LogicalPlan::Max1Row { input } => input.collect_sources(out),
            LogicalPlan::Join { left, right, .. } => {
                left.collect_sources(out);
                right.collect_sources(out);
            }
            LogicalPlan::Opaque { input, .. } => {
                if let Some(i) = input {
                    i.collect_sources(out);
                }
            }
        }
    }
}
