//! # Scalar Expressions and Join Types
//!
//! This module defines the scalar layer shared by the input tree, the memo and the exec builder:
//!
//! - **Identifiers**: [`TableId`] and [`ColumnId`] are assigned by name resolution upstream and are
//!   unique within one statement. The planner never looks columns up by name.
//! - **Expressions** ([`Expr`]): column references, literals, comparisons, arithmetic, boolean
//!   connectives and function calls. Join conditions and filters are lists of conjuncts.
//! - **Join types** ([`JoinType`]): the logical join family, including the lookup-table ordinal used
//!   by conflict detection.
//!
//! ## Predicate Analysis
//!
//! The join-order builder needs three facts about a predicate: which tables it references (its
//! syntactic eligibility), whether it is a simple column equality (closure and fast path), and which
//! tables it null-rejects (conditional reordering of outer joins). All three are derived here.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Statement-unique identifier of a base relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u32);

/// Statement-unique identifier of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// A resolved column reference.
///
/// Identity is the `(table, column)` pair; the names are carried for display only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRef {
    pub table: TableId,
    pub column: ColumnId,
    /// Table alias (or name) as written in the query.
    pub table_name: String,
    pub name: String,
}

impl ColumnRef {
    pub fn new(table: TableId, column: ColumnId, table_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table,
            column,
            table_name: table_name.into(),
            name: name.into(),
        }
    }
}

impl PartialEq for ColumnRef {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.column == other.column
    }
}

impl Eq for ColumnRef {}

impl Hash for ColumnRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.hash(state);
        self.column.hash(state);
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table_name, self.name)
    }
}

/// Scalar value for literals.
///
/// Uses `OrderedFloat` for `f64` so that literals participate in Eq/Hash (needed to de-duplicate
/// alternatives in a group).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(OrderedFloat<f64>),
    Utf8(String),
    /// Days since 1970-01-01.
    Date(i32),
}

impl PartialEq for ScalarValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::Utf8(a), Self::Utf8(b)) => a == b,
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for ScalarValue {}

impl Hash for ScalarValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int64(v) => v.hash(state),
            Self::Float64(v) => v.hash(state),
            Self::Utf8(v) => v.hash(state),
            Self::Date(v) => v.hash(state),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{}", v.0),
            Self::Utf8(v) => write!(f, "'{v}'"),
            Self::Date(v) => write!(f, "DATE({v})"),
        }
    }
}

/// Scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Column(ColumnRef),
    Literal(ScalarValue),
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `expr BETWEEN low AND high` (both bounds inclusive).
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    /// Named function call. Opaque to the planner except for column references.
    Function {
        name: String,
        args: Vec<Expr>,
    },
    /// Conjunction, stored flat.
    And(Vec<Expr>),
    /// Disjunction, stored flat.
    Or(Vec<Expr>),
}

impl Expr {
    pub fn column(col: &ColumnRef) -> Expr {
        Expr::Column(col.clone())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `left = right` over two columns.
    pub fn col_eq(left: &ColumnRef, right: &ColumnRef) -> Expr {
        Expr::binary(BinaryOp::Eq, Expr::column(left), Expr::column(right))
    }

    pub fn is_null(operand: Expr) -> Expr {
        Expr::UnaryOp {
            op: UnaryOp::IsNull,
            operand: Box::new(operand),
        }
    }

    /// Join a list of conjuncts back into one predicate.
    pub fn and_all(mut conjuncts: Vec<Expr>) -> Option<Expr> {
        match conjuncts.len() {
            0 => None,
            1 => conjuncts.pop(),
            _ => Some(Expr::And(conjuncts)),
        }
    }

    /// Return all column references in this expression.
    pub fn columns(&self) -> Vec<&ColumnRef> {
        let mut cols = Vec::new();
        self.collect_columns(&mut cols);
        cols
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a ColumnRef>) {
        match self {
            Expr::Column(c) => out.push(c),
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_columns(out),
            Expr::Between { expr, low, high } => {
                expr.collect_columns(out);
                low.collect_columns(out);
                high.collect_columns(out);
            }
            Expr::Function { args, .. } => {
                for a in args {
                    a.collect_columns(out);
                }
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                for e in exprs {
                    e.collect_columns(out);
                }
            }
        }
    }

    /// Tables referenced anywhere in the expression.
    pub fn tables(&self) -> BTreeSet<TableId> {
        self.columns().into_iter().map(|c| c.table).collect()
    }

    /// Flatten AND-chains: (A AND (B AND C)) → [A, B, C].
    pub fn conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.conjuncts()).collect(),
            other => vec![other],
        }
    }

    /// Owned conjuncts of an optional condition. `TRUE` literals are dropped.
    pub fn split_conjuncts(condition: Option<&Expr>) -> Vec<Expr> {
        condition
            .map(|c| {
                c.conjuncts()
                    .into_iter()
                    .filter(|e| !matches!(e, Expr::Literal(ScalarValue::Bool(true))))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// `Some((l, r))` when this is `l = r` or `l <=> r`.
    pub fn as_equality(&self) -> Option<(&Expr, &Expr)> {
        match self {
            Expr::BinaryOp {
                op: BinaryOp::Eq | BinaryOp::NullSafeEq,
                left,
                right,
            } => Some((left, right)),
            _ => None,
        }
    }

    /// `Some((l, r))` when this is an equality between two plain columns.
    pub fn as_column_equality(&self) -> Option<(&ColumnRef, &ColumnRef)> {
        match self.as_equality()? {
            (Expr::Column(l), Expr::Column(r)) => Some((l, r)),
            _ => None,
        }
    }

    /// A simple equality compares two plain columns with `=`.
    pub fn is_simple_equality(&self) -> bool {
        matches!(
            self,
            Expr::BinaryOp { op: BinaryOp::Eq, left, right }
                if matches!(**left, Expr::Column(_)) && matches!(**right, Expr::Column(_))
        )
    }

    pub fn is_constant(&self) -> bool {
        self.columns().is_empty() && !matches!(self, Expr::Function { .. })
    }

    /// Tables for which this predicate can never evaluate to TRUE when all of the table's columns
    /// are NULL.
    ///
    /// Comparisons (other than `<=>`) reject every table they reference through plain columns or
    /// arithmetic; `IS NOT NULL` rejects its operand's tables. AND unions, OR intersects.
    pub fn null_rejected_tables(&self) -> BTreeSet<TableId> {
        match self {
            Expr::BinaryOp { op, left, right } if op.is_comparison() && *op != BinaryOp::NullSafeEq => {
                let mut out = left.strict_tables();
                out.extend(right.strict_tables());
                out
            }
            Expr::Between { expr, low, high } => {
                let mut out = expr.strict_tables();
                out.extend(low.strict_tables());
                out.extend(high.strict_tables());
                out
            }
            Expr::UnaryOp {
                op: UnaryOp::IsNotNull,
                operand,
            } => operand.strict_tables(),
            Expr::And(exprs) => exprs.iter().flat_map(|e| e.null_rejected_tables()).collect(),
            Expr::Or(exprs) => {
                let mut iter = exprs.iter().map(|e| e.null_rejected_tables());
                let Some(first) = iter.next() else {
                    return BTreeSet::new();
                };
                iter.fold(first, |acc, s| acc.intersection(&s).cloned().collect())
            }
            _ => BTreeSet::new(),
        }
    }

    /// Tables whose NULL columns force this scalar to NULL.
    fn strict_tables(&self) -> BTreeSet<TableId> {
        match self {
            Expr::Column(c) => BTreeSet::from([c.table]),
            Expr::BinaryOp { op, left, right } if op.is_arithmetic() => {
                let mut out = left.strict_tables();
                out.extend(right.strict_tables());
                out
            }
            Expr::UnaryOp { op: UnaryOp::Neg, operand } => operand.strict_tables(),
            _ => BTreeSet::new(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(c) => write!(f, "{c}"),
            Expr::Literal(v) => write!(f, "{v}"),
            Expr::BinaryOp { op, left, right } => write!(f, "({left} {op} {right})"),
            Expr::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "NOT {operand}"),
                UnaryOp::Neg => write!(f, "-{operand}"),
                UnaryOp::IsNull => write!(f, "{operand} IS NULL"),
                UnaryOp::IsNotNull => write!(f, "{operand} IS NOT NULL"),
            },
            Expr::Between { expr, low, high } => write!(f, "({expr} BETWEEN {low} AND {high})"),
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{a}")?;
                }
                write!(f, ")")
            }
            Expr::And(exprs) | Expr::Or(exprs) => {
                let sep = if matches!(self, Expr::And(_)) { " AND " } else { " OR " };
                write!(f, "(")?;
                for (i, e) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, "{sep}")?;
                    }
                    write!(f, "{e}")?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Binary operators for comparison and arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Eq,
    /// Null-safe equality (`<=>`); TRUE when both sides are NULL.
    NullSafeEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        !self.is_arithmetic()
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Eq => "=",
            BinaryOp::NullSafeEq => "<=>",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// SQL join types.
///
/// Only `Inner` and `Cross` are commutative. `Right` exists only in the input tree: population
/// rewrites `A RIGHT JOIN B` into `B LEFT JOIN A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    Cross,
    Inner,
    Semi,
    Anti,
    Left,
    Right,
    #[serde(alias = "FULL")]
    FullOuter,
    Lateral,
}

impl JoinType {
    /// Inner-like joins have no preserved side.
    pub fn is_inner(self) -> bool {
        matches!(self, JoinType::Inner | JoinType::Cross)
    }

    pub fn is_commutative(self) -> bool {
        self.is_inner()
    }

    /// Row index into the conflict-detection lookup tables.
    pub fn table_index(self) -> usize {
        match self {
            JoinType::Cross => 0,
            JoinType::Inner => 1,
            JoinType::Semi => 2,
            JoinType::Anti => 3,
            JoinType::Left | JoinType::Right => 4,
            JoinType::FullOuter => 5,
            JoinType::Lateral => 6,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JoinType::Cross => "CROSS",
            JoinType::Inner => "INNER",
            JoinType::Semi => "SEMI",
            JoinType::Anti => "ANTI",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::FullOuter => "FULL",
            JoinType::Lateral => "LATERAL",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort key carried by a pending ORDER BY requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    pub expr: Expr,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.expr, if self.ascending { "ASC" } else { "DESC" })
    }
}
