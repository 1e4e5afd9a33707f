//! # Exec Builder
//!
//! Translates the solved memo into an [`ExecNode`] tree, following each group's `best` expression
//! from the root. The translation is pure: it reads the memo and never changes it.
//!
//! Pending requirements recorded on a group during population are re-threaded around the concrete
//! alternative chosen for it, innermost first:
//!
//! ```text
//! Limit(Sort(Distinct(<best alternative>)))
//! ```
//!
//! Pinned index scans under lookup and merge joins are the inputs' best plans after conflict
//! repair, so they are rendered like any other child.

use crate::error::{OptResult, OptimizeError};
use crate::expr::{ColumnRef, Expr, JoinType, SortKey};
use crate::memo::Memo;
use crate::plan::SourceKind;
use crate::properties::DistinctOp;
use crate::rel::{ExprId, GroupId, JoinExpr, Lookup, RelExpr};
use serde::Serialize;
use std::fmt::{self, Write};

/// Executable plan node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ExecNode {
    TableScan {
        table: String,
    },
    IndexScan {
        table: String,
        index: String,
        ranges: Vec<Expr>,
        residual: Vec<Expr>,
    },
    /// Non-table relation (subquery, values list, table function, ...).
    Source {
        kind: SourceKind,
        name: String,
    },
    Project {
        columns: Vec<ColumnRef>,
        input: Box<ExecNode>,
    },
    Filter {
        predicates: Vec<Expr>,
        input: Box<ExecNode>,
    },
    Distinct {
        /// Input is sorted on every output column.
        ordered: bool,
        input: Box<ExecNode>,
    },
    Max1Row {
        input: Box<ExecNode>,
    },
    Sort {
        keys: Vec<SortKey>,
        input: Box<ExecNode>,
    },
    Limit {
        count: u64,
        input: Box<ExecNode>,
    },
    NestedLoopJoin {
        join_type: JoinType,
        filters: Vec<Expr>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
    },
    HashJoin {
        join_type: JoinType,
        left_keys: Vec<Expr>,
        right_keys: Vec<Expr>,
        filters: Vec<Expr>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
    },
    LookupJoin {
        join_type: JoinType,
        key_exprs: Vec<Expr>,
        injective: bool,
        filters: Vec<Expr>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
    },
    ConcatJoin {
        join_type: JoinType,
        filters: Vec<Expr>,
        left: Box<ExecNode>,
        lookups: Vec<ExecLookup>,
    },
    MergeJoin {
        join_type: JoinType,
        left_key: Expr,
        right_key: Expr,
        filters: Vec<Expr>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
    },
    RangeHeapJoin {
        join_type: JoinType,
        value: Expr,
        min: Expr,
        max: Expr,
        closed_min: bool,
        closed_max: bool,
        filters: Vec<Expr>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
    },
}

/// One index probe of a concat join.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecLookup {
    pub key_exprs: Vec<Expr>,
    pub injective: bool,
    pub scan: ExecNode,
}

impl ExecNode {
    /// Direct inputs, left to right.
    pub fn children(&self) -> Vec<&ExecNode> {
        match self {
            ExecNode::TableScan { .. } | ExecNode::IndexScan { .. } | ExecNode::Source { .. } => vec![],
            ExecNode::Project { input, .. }
            | ExecNode::Filter { input, .. }
            | ExecNode::Distinct { input, .. }
            | ExecNode::Max1Row { input }
            | ExecNode::Sort { input, .. }
            | ExecNode::Limit { input, .. } => vec![input.as_ref()],
            ExecNode::ConcatJoin { left, lookups, .. } => {
                std::iter::once(left.as_ref()).chain(lookups.iter().map(|l| &l.scan)).collect()
            }
            ExecNode::NestedLoopJoin { left, right, .. }
            | ExecNode::HashJoin { left, right, .. }
            | ExecNode::LookupJoin { left, right, .. }
            | ExecNode::MergeJoin { left, right, .. }
            | ExecNode::RangeHeapJoin { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        }
    }

    /// Relation names at the leaves, left to right.
    pub fn leaf_tables(&self) -> Vec<&str> {
        match self {
            ExecNode::TableScan { table } | ExecNode::IndexScan { table, .. } => vec![table.as_str()],
            ExecNode::Source { name, .. } => vec![name.as_str()],
            ExecNode::ConcatJoin { left, lookups, .. } => {
                let mut out = left.leaf_tables();
                if let Some(first) = lookups.first() {
                    out.extend(first.scan.leaf_tables());
                }
                out
            }
            other => other.children().into_iter().flat_map(|c| c.leaf_tables()).collect(),
        }
    }

    /// Operator label used by [`ExecNode::explain`].
    pub fn label(&self) -> String {
        match self {
            ExecNode::TableScan { table } => format!("TableScan {table}"),
            ExecNode::IndexScan {
                table,
                index,
                ranges,
                residual,
            } => {
                let mut s = format!("IndexScan {table}.{index}");
                if !ranges.is_empty() {
                    let _ = write!(s, " range={}", join_exprs(ranges));
                }
                if !residual.is_empty() {
                    let _ = write!(s, " residual={}", join_exprs(residual));
                }
                s
            }
            ExecNode::Source { kind, name } => format!("{kind:?} {name}"),
            ExecNode::Project { columns, .. } => {
                let cols: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
                format!("Project [{}]", cols.join(", "))
            }
            ExecNode::Filter { predicates, .. } => format!("Filter {}", join_exprs(predicates)),
            ExecNode::Distinct { ordered, .. } => {
                if *ordered {
                    "OrderedDistinct".into()
                } else {
                    "HashDistinct".into()
                }
            }
            ExecNode::Max1Row { .. } => "Max1Row".into(),
            ExecNode::Sort { keys, .. } => {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                format!("Sort [{}]", keys.join(", "))
            }
            ExecNode::Limit { count, .. } => format!("Limit {count}"),
            ExecNode::NestedLoopJoin { join_type, filters, .. } => {
                with_filters(format!("NestedLoop{join_type}Join"), filters)
            }
            ExecNode::HashJoin {
                join_type,
                left_keys,
                right_keys,
                filters,
                ..
            } => with_filters(
                format!(
                    "Hash{join_type}Join keys=({}) = ({})",
                    join_exprs(left_keys),
                    join_exprs(right_keys)
                ),
                filters,
            ),
            ExecNode::LookupJoin {
                join_type,
                key_exprs,
                injective,
                filters,
                ..
            } => with_filters(
                format!(
                    "Lookup{join_type}Join keys=({}){}",
                    join_exprs(key_exprs),
                    if *injective { " injective" } else { "" }
                ),
                filters,
            ),
            ExecNode::ConcatJoin {
                join_type,
                filters,
                lookups,
                ..
            } => with_filters(format!("Concat{join_type}Join lookups={}", lookups.len()), filters),
            ExecNode::MergeJoin {
                join_type,
                left_key,
                right_key,
                filters,
                ..
            } => with_filters(format!("Merge{join_type}Join {left_key} = {right_key}"), filters),
            ExecNode::RangeHeapJoin {
                join_type,
                value,
                min,
                max,
                closed_min,
                closed_max,
                filters,
                ..
            } => with_filters(
                format!(
                    "RangeHeap{join_type}Join {value} in {}{min}, {max}{}",
                    if *closed_min { "[" } else { "(" },
                    if *closed_max { "]" } else { ")" }
                ),
                filters,
            ),
        }
    }

    /// Render the tree as indented text, one operator per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        self.explain_into(&mut out, 0);
        out
    }

    fn explain_into(&self, out: &mut String, depth: usize) {
        let _ = writeln!(out, "{:indent$}{}", "", self.label(), indent = depth * 2);
        for child in self.children() {
            child.explain_into(out, depth + 1);
        }
    }
}

impl fmt::Display for ExecNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.explain())
    }
}

fn join_exprs(exprs: &[Expr]) -> String {
    let parts: Vec<String> = exprs.iter().map(|e| e.to_string()).collect();
    parts.join(" AND ")
}

fn with_filters(mut label: String, filters: &[Expr]) -> String {
    if !filters.is_empty() {
        let _ = write!(label, " on {}", join_exprs(filters));
    }
    label
}

/// Builds the executable tree for a solved memo.
pub struct ExecBuilder<'a> {
    memo: &'a Memo,
}

impl<'a> ExecBuilder<'a> {
    pub fn new(memo: &'a Memo) -> Self {
        Self { memo }
    }

    /// Build from the memo root.
    pub fn build(&self) -> OptResult<ExecNode> {
        let root = self
            .memo
            .root
            .ok_or_else(|| OptimizeError::invariant("memo has no root"))?;
        self.build_group(root)
    }

    pub fn build_group(&self, group: GroupId) -> OptResult<ExecNode> {
        let g = self.memo.group(group);
        if !g.done {
            return Err(OptimizeError::invariant(format!("group {group} was not optimized")));
        }
        let best = g
            .best
            .ok_or_else(|| OptimizeError::invariant(format!("group {group} has no best plan")))?;
        let mut node = self.build_expr(best)?;

        let props = &g.props;
        if props.pending_distinct {
            node = ExecNode::Distinct {
                ordered: self.memo.expr(best).distinct == DistinctOp::Sorted,
                input: Box::new(node),
            };
        }
        if !props.sort.is_empty() {
            node = ExecNode::Sort {
                keys: props.sort.clone(),
                input: Box::new(node),
            };
        }
        if let Some(count) = props.limit {
            node = ExecNode::Limit {
                count,
                input: Box::new(node),
            };
        }
        Ok(node)
    }

    fn child(&self, group: GroupId) -> OptResult<Box<ExecNode>> {
        self.build_group(group).map(Box::new)
    }

    fn build_expr(&self, id: ExprId) -> OptResult<ExecNode> {
        let expr = self.memo.expr(id);
        Ok(match &expr.rel {
            RelExpr::TableScan { vertex } => ExecNode::TableScan {
                table: self.memo.table(*vertex).source.display_name().to_string(),
            },
            RelExpr::IndexScan(scan) => {
                let table = self.memo.table(scan.vertex);
                let index = table.indexes.get(scan.index).ok_or_else(|| {
                    OptimizeError::invariant(format!("index {} missing on {}", scan.index, table.source.display_name()))
                })?;
                ExecNode::IndexScan {
                    table: table.source.display_name().to_string(),
                    index: index.name.clone(),
                    ranges: scan.ranges.clone(),
                    residual: scan.residual.clone(),
                }
            }
            RelExpr::SubqueryAlias { vertex }
            | RelExpr::Values { vertex }
            | RelExpr::RecursiveTable { vertex }
            | RelExpr::RecursiveCte { vertex }
            | RelExpr::TableFunc { vertex }
            | RelExpr::JsonTable { vertex }
            | RelExpr::SetOp { vertex }
            | RelExpr::EmptyTable { vertex } => {
                let source = &self.memo.table(*vertex).source;
                ExecNode::Source {
                    kind: source.kind,
                    name: source.display_name().to_string(),
                }
            }
            RelExpr::Project { child, columns } => ExecNode::Project {
                columns: columns.clone(),
                input: self.child(*child)?,
            },
            RelExpr::Filter { child, filters } => ExecNode::Filter {
                predicates: filters.clone(),
                input: self.child(*child)?,
            },
            RelExpr::Distinct { child } => ExecNode::Distinct {
                ordered: false,
                input: self.child(*child)?,
            },
            RelExpr::Max1Row { child } => ExecNode::Max1Row {
                input: self.child(*child)?,
            },
            RelExpr::Join(join) => ExecNode::NestedLoopJoin {
                join_type: join.join_type,
                filters: join.filters.clone(),
                left: self.child(join.left)?,
                right: self.child(join.right)?,
            },
            RelExpr::HashJoin {
                join,
                left_keys,
                right_keys,
            } => ExecNode::HashJoin {
                join_type: join.join_type,
                left_keys: left_keys.clone(),
                right_keys: right_keys.clone(),
                filters: join.filters.clone(),
                left: self.child(join.left)?,
                right: self.child(join.right)?,
            },
            RelExpr::LookupJoin { join, lookup } => ExecNode::LookupJoin {
                join_type: join.join_type,
                key_exprs: lookup.key_exprs.clone(),
                injective: lookup.injective,
                filters: join.filters.clone(),
                left: self.child(join.left)?,
                right: self.child(join.right)?,
            },
            RelExpr::ConcatJoin { join, lookups } => self.concat_join(join, lookups)?,
            RelExpr::MergeJoin {
                join,
                left_key,
                right_key,
                ..
            } => ExecNode::MergeJoin {
                join_type: join.join_type,
                left_key: left_key.clone(),
                right_key: right_key.clone(),
                filters: join.filters.clone(),
                left: self.child(join.left)?,
                right: self.child(join.right)?,
            },
            RelExpr::RangeHeapJoin {
                join,
                value,
                min,
                max,
                closed_min,
                closed_max,
            } => ExecNode::RangeHeapJoin {
                join_type: join.join_type,
                value: value.clone(),
                min: min.clone(),
                max: max.clone(),
                closed_min: *closed_min,
                closed_max: *closed_max,
                filters: join.filters.clone(),
                left: self.child(join.left)?,
                right: self.child(join.right)?,
            },
        })
    }

    fn concat_join(&self, join: &JoinExpr, lookups: &[Lookup]) -> OptResult<ExecNode> {
        let lookups = lookups
            .iter()
            .map(|l| {
                Ok(ExecLookup {
                    key_exprs: l.key_exprs.clone(),
                    injective: l.injective,
                    scan: self.build_expr(l.scan)?,
                })
            })
            .collect::<OptResult<Vec<_>>>()?;
        Ok(ExecNode::ConcatJoin {
            join_type: join.join_type,
            filters: join.filters.clone(),
            left: self.child(join.left)?,
            lookups,
        })
    }
}
