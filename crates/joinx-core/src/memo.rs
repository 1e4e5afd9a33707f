//! # Memo
//!
//! The memo is the central data structure of the join planner. It stores every plan alternative
//! discovered during enumeration and exploration, grouped into equivalence classes.
//!
//! ## Structure
//!
//! ```text
//! Memo
//!  ├── ExprGroup G0  {a}        props: rows=1000
//!  │     └── E0: TableScan(a)
//!  ├── ExprGroup G1  {b}        props: rows=50
//!  │     ├── E1: TableScan(b)
//!  │     └── E5: IndexScan(b.PRIMARY)        (detached, owned by E4)
//!  └── ExprGroup G2  {a,b}      props: rows=1000
//!        ├── E4: LookupINNERJoin(G0, G1)     (newest first)
//!        ├── E3: INNERJoin(G1, G0)
//!        └── E2: INNERJoin(G0, G1)           (original)
//! ```
//!
//! Expressions live in one arena ([`Memo::expr`]) addressed by [`ExprId`]; a group holds the list of
//! its competing alternatives, newest first. Composite expressions reference child groups, never
//! expressions, so there are no back-pointers to maintain.
//!
//! ## Properties Are Fixed at Creation
//!
//! A group's [`RelProps`] (including its row estimate) are derived from the first expression that
//! creates it. Later alternatives share them, so a three-way join's cardinality does not depend on
//! which binary decomposition reached the group first.
//!
//! ## Tables
//!
//! Base relations are registered once per statement with their normalized indexes and resolved
//! statistics. The vertex ordinal of a table is its position in [`Memo::tables`].

use crate::bitset::VertexSet;
use crate::catalog::{resolve_row_count, StatsProvider};
use crate::error::{OptResult, OptimizeError};
use crate::expr::{BinaryOp, ColumnId, ColumnRef, Expr, JoinType, ScalarValue, TableId, UnaryOp};
use crate::hint::JoinHints;
use crate::index::Index;
use crate::plan::{SourceKind, SourceTable};
use crate::properties::{ColSet, FuncDeps, RelProps};
use crate::rel::{ExprId, GroupId, JoinExpr, MemoExpr, RelExpr};
use crate::stats::{
    anti_join_rows, distinct_rows, equality_selectivity, full_join_rows, inner_join_rows, join_equality_selectivity,
    left_join_rows, semi_join_rows, DEFAULT_FILTER_SELECTIVITY, RANGE_SELECTIVITY,
};
use std::collections::HashMap;
use tracing::trace;

/// A base relation registered with the memo.
#[derive(Debug, Clone)]
pub struct TableMeta {
    pub source: SourceTable,
    pub vertex: usize,
    pub indexes: Vec<Index>,
    pub row_count: f64,
    /// Distinct counts reported by the statistics provider.
    pub ndv: HashMap<ColumnId, f64>,
}

/// An equivalence class of plans producing the same result.
#[derive(Debug, Clone)]
pub struct ExprGroup {
    pub id: GroupId,
    /// Competing alternatives, newest first.
    pub exprs: Vec<ExprId>,
    pub props: RelProps,
    pub best: Option<ExprId>,
    pub cost: f64,
    pub done: bool,
    /// `best` satisfies every active hint (transitively).
    pub hint_ok: bool,
}

impl ExprGroup {
    /// The expression that created the group.
    pub fn original(&self) -> Option<ExprId> {
        self.exprs.last().copied()
    }
}

#[derive(Debug, Default)]
pub struct Memo {
    groups: Vec<ExprGroup>,
    exprs: Vec<MemoExpr>,
    tables: Vec<TableMeta>,
    table_vertex: HashMap<TableId, usize>,
    columns: HashMap<ColumnId, ColumnRef>,
    pub root: Option<GroupId>,
    pub hints: JoinHints,
}

impl Memo {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Tables and columns
    // ------------------------------------------------------------------

    /// Register a base relation and resolve its statistics. Returns the vertex ordinal.
    pub fn add_table(&mut self, source: SourceTable, stats: &dyn StatsProvider, default_rows: f64) -> usize {
        let vertex = self.tables.len();
        let row_count = match source.kind {
            SourceKind::Table => resolve_row_count(stats, &source.database, &source.name, default_rows),
            SourceKind::Empty => 0.0,
            _ => source.row_estimate.unwrap_or(default_rows),
        };
        let mut ndv = HashMap::new();
        if source.kind == SourceKind::Table {
            for col in &source.columns {
                if let Some(cs) = stats.column_stats(&source.database, &source.name, &col.name) {
                    ndv.insert(col.id, cs.distinct_count);
                }
            }
        }
        for col in &source.columns {
            self.columns.insert(
                col.id,
                ColumnRef::new(source.id, col.id, source.display_name(), col.name.clone()),
            );
        }
        let indexes = source.indexes.iter().map(|d| Index::from_def(source.id, d)).collect();
        self.table_vertex.insert(source.id, vertex);
        trace!(vertex, table = %source.display_name(), row_count, "registered table");
        self.tables.push(TableMeta {
            source,
            vertex,
            indexes,
            row_count,
            ndv,
        });
        vertex
    }

    pub fn tables(&self) -> &[TableMeta] {
        &self.tables
    }

    pub fn table(&self, vertex: usize) -> &TableMeta {
        &self.tables[vertex]
    }

    pub fn vertex_of_table(&self, table: TableId) -> Option<usize> {
        self.table_vertex.get(&table).copied()
    }

    pub fn column_ref(&self, col: ColumnId) -> Option<&ColumnRef> {
        self.columns.get(&col)
    }

    /// Vertices referenced by an expression.
    pub fn expr_vertices(&self, expr: &Expr) -> VertexSet {
        expr.tables()
            .into_iter()
            .filter_map(|t| self.vertex_of_table(t))
            .collect()
    }

    /// Distinct count of a column, falling back to the table's row count.
    pub fn ndv(&self, col: &ColumnRef) -> f64 {
        self.vertex_of_table(col.table)
            .map(|v| {
                let t = &self.tables[v];
                t.ndv.get(&col.column).copied().unwrap_or(t.row_count)
            })
            .unwrap_or(1.0)
            .max(1.0)
    }

    fn reported_ndv(&self, col: &ColumnRef) -> Option<f64> {
        let v = self.vertex_of_table(col.table)?;
        self.tables[v].ndv.get(&col.column).copied()
    }

    // ------------------------------------------------------------------
    // Groups and expressions
    // ------------------------------------------------------------------

    pub fn group(&self, id: GroupId) -> &ExprGroup {
        &self.groups[id.0 as usize]
    }

    pub fn group_mut(&mut self, id: GroupId) -> &mut ExprGroup {
        &mut self.groups[id.0 as usize]
    }

    pub fn groups(&self) -> &[ExprGroup] {
        &self.groups
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn expr(&self, id: ExprId) -> &MemoExpr {
        &self.exprs[id.0 as usize]
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut MemoExpr {
        &mut self.exprs[id.0 as usize]
    }

    pub fn num_exprs(&self) -> usize {
        self.exprs.len()
    }

    /// Competing alternatives of a group, newest first.
    pub fn alternatives(&self, group: GroupId) -> impl Iterator<Item = &MemoExpr> + '_ {
        self.group(group).exprs.iter().map(move |id| self.expr(*id))
    }

    fn push_expr(&mut self, group: GroupId, rel: RelExpr) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(MemoExpr {
            id,
            group,
            rel,
            cost: 0.0,
            distinct: Default::default(),
        });
        id
    }

    /// Create a group whose properties are derived from `rel`.
    pub fn new_group(&mut self, rel: RelExpr) -> OptResult<GroupId> {
        let props = self.derive_props(&rel)?;
        let id = GroupId(self.groups.len() as u32);
        trace!(group = %id, expr = %rel.name(), rows = props.row_count, "new group");
        self.groups.push(ExprGroup {
            id,
            exprs: Vec::new(),
            props,
            best: None,
            cost: 0.0,
            done: false,
            hint_ok: false,
        });
        let expr = self.push_expr(id, rel);
        self.group_mut(id).exprs.push(expr);
        Ok(id)
    }

    /// Prepend an alternative to a group. Returns `None` when an identical alternative exists.
    pub fn add_alternative(&mut self, group: GroupId, rel: RelExpr) -> Option<ExprId> {
        if self.alternatives(group).any(|e| e.rel == rel) {
            return None;
        }
        let id = self.push_expr(group, rel);
        self.group_mut(group).exprs.insert(0, id);
        Some(id)
    }

    /// Register an expression owned by `group` that does not compete with its alternatives.
    ///
    /// Used for the index scans a lookup or merge join pins on its inputs.
    pub fn add_detached(&mut self, group: GroupId, rel: RelExpr) -> ExprId {
        if let Some(existing) = self.exprs.iter().find(|e| e.group == group && e.rel == rel) {
            return existing.id;
        }
        self.push_expr(group, rel)
    }

    /// The source expression for a vertex.
    pub fn source_rel(&self, vertex: usize) -> RelExpr {
        match self.tables[vertex].source.kind {
            SourceKind::Table => RelExpr::TableScan { vertex },
            SourceKind::Subquery => RelExpr::SubqueryAlias { vertex },
            SourceKind::Values => RelExpr::Values { vertex },
            SourceKind::RecursiveTable => RelExpr::RecursiveTable { vertex },
            SourceKind::RecursiveCte => RelExpr::RecursiveCte { vertex },
            SourceKind::TableFunction => RelExpr::TableFunc { vertex },
            SourceKind::JsonTable => RelExpr::JsonTable { vertex },
            SourceKind::SetOp => RelExpr::SetOp { vertex },
            SourceKind::Empty => RelExpr::EmptyTable { vertex },
        }
    }

    pub fn memoize_source(&mut self, vertex: usize) -> OptResult<GroupId> {
        self.new_group(self.source_rel(vertex))
    }

    pub fn memoize_filter(&mut self, child: GroupId, filters: Vec<Expr>) -> OptResult<GroupId> {
        self.new_group(RelExpr::Filter { child, filters })
    }

    pub fn memoize_project(&mut self, child: GroupId, columns: Vec<ColumnRef>) -> OptResult<GroupId> {
        self.new_group(RelExpr::Project { child, columns })
    }

    pub fn memoize_distinct(&mut self, child: GroupId) -> OptResult<GroupId> {
        self.new_group(RelExpr::Distinct { child })
    }

    pub fn memoize_max1row(&mut self, child: GroupId) -> OptResult<GroupId> {
        self.new_group(RelExpr::Max1Row { child })
    }

    pub fn memoize_join(&mut self, join: JoinExpr) -> OptResult<GroupId> {
        self.new_group(RelExpr::Join(join))
    }

    /// The group holding the join alternatives for `group`, looking through the wrappers
    /// (Filter, Project, Distinct, Max1Row) population stacked on top of it.
    pub fn join_group_of(&self, mut group: GroupId) -> GroupId {
        while let Some(orig) = self.group(group).original() {
            match &self.expr(orig).rel {
                RelExpr::Filter { child, .. }
                | RelExpr::Project { child, .. }
                | RelExpr::Distinct { child }
                | RelExpr::Max1Row { child } => group = *child,
                _ => break,
            }
        }
        group
    }

    /// Row estimate of one alternative.
    ///
    /// An injective lookup returns at most one row per left row, so its estimate is the left
    /// input's cardinality; every other alternative uses the group estimate.
    pub fn estimated_rows(&self, expr: ExprId) -> f64 {
        let e = self.expr(expr);
        match &e.rel {
            RelExpr::LookupJoin { join, lookup } if lookup.injective && join.join_type == JoinType::Inner => {
                self.group(join.left).props.row_count
            }
            _ => self.group(e.group).props.row_count,
        }
    }

    // ------------------------------------------------------------------
    // Property derivation
    // ------------------------------------------------------------------

    fn child_props(&self, id: GroupId) -> OptResult<&RelProps> {
        self.groups
            .get(id.0 as usize)
            .map(|g| &g.props)
            .ok_or_else(|| OptimizeError::invariant(format!("reference to unknown group {id}")))
    }

    /// Derive the properties of the group `rel` would create.
    pub fn derive_props(&self, rel: &RelExpr) -> OptResult<RelProps> {
        if let Some(vertex) = rel.source_vertex() {
            let table = self
                .tables
                .get(vertex)
                .ok_or_else(|| OptimizeError::invariant(format!("unknown vertex {vertex}")))?;
            let mut rows = table.row_count;
            if let RelExpr::IndexScan(scan) = rel {
                rows *= self.selectivity(scan.ranges.iter().chain(&scan.residual));
            }
            return Ok(RelProps {
                output_cols: table.source.columns.iter().map(|c| c.id).collect(),
                input_tables: VertexSet::single(vertex),
                output_tables: VertexSet::single(vertex),
                fds: FuncDeps::for_source(&table.source.columns, &table.source.indexes),
                row_count: rows,
                ..Default::default()
            });
        }
        match rel {
            RelExpr::Filter { child, filters } => {
                let mut props = self.child_props(*child)?.clone();
                for f in filters {
                    if let Some((l, r)) = f.as_column_equality() {
                        props.fds.add_equivalence(l.column, r.column);
                    } else if let Some(c) = constant_binding(f) {
                        props.fds.add_constant(c.column);
                    }
                }
                props.row_count *= self.selectivity(filters.iter());
                if props.fds.determines_key(&ColSet::new()) {
                    props.row_count = props.row_count.min(1.0);
                }
                Ok(props)
            }
            RelExpr::Project { child, columns } => {
                let child = self.child_props(*child)?;
                let output_cols: ColSet = columns.iter().map(|c| c.column).collect();
                Ok(RelProps {
                    fds: child.fds.project(&output_cols),
                    output_cols,
                    input_tables: child.input_tables,
                    output_tables: child.output_tables,
                    row_count: child.row_count,
                    ..Default::default()
                })
            }
            RelExpr::Distinct { child } => {
                let child = self.child_props(*child)?;
                let ndvs: Vec<f64> = child
                    .output_cols
                    .iter()
                    .filter_map(|c| self.column_ref(c))
                    .map(|c| self.ndv(c))
                    .collect();
                let mut fds = child.fds.clone();
                fds.add_key(child.output_cols.clone(), false);
                Ok(RelProps {
                    output_cols: child.output_cols.clone(),
                    input_tables: child.input_tables,
                    output_tables: child.output_tables,
                    fds,
                    row_count: distinct_rows(child.row_count, &ndvs),
                    ..Default::default()
                })
            }
            RelExpr::Max1Row { child } => {
                let child = self.child_props(*child)?;
                Ok(RelProps {
                    output_cols: child.output_cols.clone(),
                    input_tables: child.input_tables,
                    output_tables: child.output_tables,
                    fds: child.fds.clone(),
                    row_count: child.row_count.min(1.0),
                    ..Default::default()
                })
            }
            other => match other.join() {
                Some(join) => self.derive_join_props(join),
                None => Err(OptimizeError::invariant(format!("cannot derive properties of {}", other.name()))),
            },
        }
    }

    fn derive_join_props(&self, join: &JoinExpr) -> OptResult<RelProps> {
        let left = self.child_props(join.left)?;
        let right = self.child_props(join.right)?;
        if left.input_tables.intersects(right.input_tables) {
            return Err(OptimizeError::invariant(format!(
                "join inputs overlap: {} and {}",
                left.input_tables, right.input_tables
            )));
        }
        let equalities = cross_equalities(&join.filters, &left.output_cols, &right.output_cols);
        let eq_pairs: Vec<(ColumnId, ColumnId)> = equalities.iter().map(|(l, r)| (l.column, r.column)).collect();
        let left_bound: ColSet = equalities.iter().map(|(l, _)| l.column).collect();
        let right_bound: ColSet = equalities.iter().map(|(_, r)| r.column).collect();

        let residual = self.selectivity(join.filters.iter().filter(|f| !is_cross_equality(f, &equalities)));
        let inner = if !equalities.is_empty() && right.fds.determines_key(&right_bound) {
            left.row_count * residual
        } else if !equalities.is_empty() && left.fds.determines_key(&left_bound) {
            right.row_count * residual
        } else {
            let eq_sel: f64 = equalities
                .iter()
                .map(|(l, r)| join_equality_selectivity(self.ndv(l), self.ndv(r)))
                .product();
            inner_join_rows(left.row_count, right.row_count, eq_sel * residual)
        };

        let (row_count, fds, output_cols, output_tables) = match join.join_type {
            JoinType::Inner | JoinType::Cross | JoinType::Lateral => (
                inner,
                FuncDeps::inner_join(&left.fds, &left.output_cols, &right.fds, &right.output_cols, &eq_pairs),
                left.output_cols.union(&right.output_cols),
                left.output_tables | right.output_tables,
            ),
            JoinType::Left | JoinType::Right => (
                left_join_rows(left.row_count, inner),
                FuncDeps::left_join(&left.fds, &left.output_cols, &right.fds, &eq_pairs),
                left.output_cols.union(&right.output_cols),
                left.output_tables | right.output_tables,
            ),
            JoinType::FullOuter => (
                full_join_rows(left.row_count, right.row_count, inner),
                FuncDeps::default(),
                left.output_cols.union(&right.output_cols),
                left.output_tables | right.output_tables,
            ),
            JoinType::Semi => (
                semi_join_rows(left.row_count, inner),
                left.fds.clone(),
                left.output_cols.clone(),
                left.output_tables,
            ),
            JoinType::Anti => (
                anti_join_rows(left.row_count, inner),
                left.fds.clone(),
                left.output_cols.clone(),
                left.output_tables,
            ),
        };
        Ok(RelProps {
            output_cols,
            input_tables: left.input_tables | right.input_tables,
            output_tables,
            fds,
            row_count,
            ..Default::default()
        })
    }

    /// Combined selectivity of a list of conjuncts.
    pub fn selectivity<'a>(&self, filters: impl Iterator<Item = &'a Expr>) -> f64 {
        filters.map(|f| self.conjunct_selectivity(f)).product()
    }

    fn conjunct_selectivity(&self, expr: &Expr) -> f64 {
        if let Some((l, r)) = expr.as_column_equality() {
            return join_equality_selectivity(self.ndv(l), self.ndv(r));
        }
        if let Some(col) = constant_binding(expr) {
            return equality_selectivity(self.reported_ndv(col));
        }
        match expr {
            Expr::BinaryOp { op, .. } if matches!(op, BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq) => {
                RANGE_SELECTIVITY
            }
            Expr::Between { .. } => RANGE_SELECTIVITY,
            Expr::Literal(ScalarValue::Bool(true)) => 1.0,
            Expr::Or(disjuncts) => disjuncts
                .iter()
                .map(|d| self.conjunct_selectivity(d))
                .sum::<f64>()
                .min(1.0),
            Expr::And(conjuncts) => self.selectivity(conjuncts.iter()),
            Expr::UnaryOp { op: UnaryOp::IsNotNull, .. } => 1.0,
            _ => DEFAULT_FILTER_SELECTIVITY,
        }
    }
}

/// `col = <constant>` (either side), returning the column.
pub fn constant_binding(expr: &Expr) -> Option<&ColumnRef> {
    match expr {
        Expr::BinaryOp {
            op: BinaryOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Column(c), other) | (other, Expr::Column(c)) if other.is_constant() => Some(c),
            _ => None,
        },
        _ => None,
    }
}

/// Column equalities of `filters` with one side in `left` and the other in `right`, oriented
/// `(left, right)`.
pub fn cross_equalities<'a>(filters: &'a [Expr], left: &ColSet, right: &ColSet) -> Vec<(&'a ColumnRef, &'a ColumnRef)> {
    filters
        .iter()
        .filter_map(|f| f.as_column_equality())
        .filter_map(|(a, b)| {
            if left.contains(a.column) && right.contains(b.column) {
                Some((a, b))
            } else if left.contains(b.column) && right.contains(a.column) {
                Some((b, a))
            } else {
                None
            }
        })
        .collect()
}

fn is_cross_equality(filter: &Expr, equalities: &[(&ColumnRef, &ColumnRef)]) -> bool {
    filter
        .as_column_equality()
        .is_some_and(|(a, b)| equalities.iter().any(|(l, r)| (*l == a && *r == b) || (*l == b && *r == a)))
}
