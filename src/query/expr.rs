//! Query expression tree: field proxies with comparison methods, boolean
//! algebra through operator overloads (`&`, `|`, `!`), KNN and geo leaves,
//! and a normalization pass. Field names are validated against the compiled
//! schema when the tree is lowered, not while it is being built.

use std::fmt::Write as _;
use std::ops::{BitAnd, BitOr, Not};

use chrono::{DateTime, NaiveDate, Utc};

use crate::value::{date_to_epoch, datetime_to_epoch};

/// A literal in a comparison leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Datetimes compare as their epoch-seconds encoding.
    Epoch(f64),
}

impl QueryValue {
    /// Numeric rendering for range clauses.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            QueryValue::Int(i) => Some(*i as f64),
            QueryValue::Float(f) | QueryValue::Epoch(f) => Some(*f),
            QueryValue::Bool(_) | QueryValue::Str(_) => None,
        }
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::Str(v.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::Str(v)
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::Int(v)
    }
}

impl From<i32> for QueryValue {
    fn from(v: i32) -> Self {
        QueryValue::Int(v.into())
    }
}

impl From<f64> for QueryValue {
    fn from(v: f64) -> Self {
        QueryValue::Float(v)
    }
}

impl From<bool> for QueryValue {
    fn from(v: bool) -> Self {
        QueryValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for QueryValue {
    fn from(v: DateTime<Utc>) -> Self {
        QueryValue::Epoch(datetime_to_epoch(&v))
    }
}

impl From<NaiveDate> for QueryValue {
    fn from(v: NaiveDate) -> Self {
        QueryValue::Epoch(date_to_epoch(v))
    }
}

/// Distance unit for geo-radius leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoUnit {
    Meters,
    Kilometers,
    Miles,
    Feet,
}

impl GeoUnit {
    pub fn wire_name(&self) -> &'static str {
        match self {
            GeoUnit::Meters => "m",
            GeoUnit::Kilometers => "km",
            GeoUnit::Miles => "mi",
            GeoUnit::Feet => "ft",
        }
    }
}

/// Comparison operator of a leaf node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Stemmed full-text match (`%`).
    Matches,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Matches => "%",
        }
    }
}

/// The expression tree. `And`/`Or` are n-ary; normalization flattens
/// nesting so associativity never changes the canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Match everything (`*`).
    All,
    Compare {
        field: String,
        op: CompareOp,
        value: QueryValue,
    },
    /// Containment: the field list holds any of the values (`<<`).
    ContainsAny { field: String, values: Vec<String> },
    /// Non-containment: the field list holds none of the values (`>>`).
    ExcludesAll { field: String, values: Vec<String> },
    Knn {
        field: String,
        k: usize,
        vector: Vec<f64>,
    },
    GeoWithin {
        field: String,
        lon: f64,
        lat: f64,
        radius: f64,
        unit: GeoUnit,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Not(Box<Expr>),
}

/// Field proxy: entry point of the query DSL. `field("age").gt(30)`.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
}

pub fn field(name: impl Into<String>) -> Field {
    Field { name: name.into() }
}

impl Field {
    pub fn eq(&self, value: impl Into<QueryValue>) -> Expr {
        self.compare(CompareOp::Eq, value)
    }

    pub fn ne(&self, value: impl Into<QueryValue>) -> Expr {
        self.compare(CompareOp::Ne, value)
    }

    pub fn gt(&self, value: impl Into<QueryValue>) -> Expr {
        self.compare(CompareOp::Gt, value)
    }

    pub fn ge(&self, value: impl Into<QueryValue>) -> Expr {
        self.compare(CompareOp::Ge, value)
    }

    pub fn lt(&self, value: impl Into<QueryValue>) -> Expr {
        self.compare(CompareOp::Lt, value)
    }

    pub fn le(&self, value: impl Into<QueryValue>) -> Expr {
        self.compare(CompareOp::Le, value)
    }

    /// Stemmed full-text match; only valid on full-text fields.
    pub fn matches(&self, value: impl Into<String>) -> Expr {
        Expr::Compare {
            field: self.name.clone(),
            op: CompareOp::Matches,
            value: QueryValue::Str(value.into()),
        }
    }

    /// The field list contains this value.
    pub fn contains(&self, value: impl Into<String>) -> Expr {
        Expr::ContainsAny { field: self.name.clone(), values: vec![value.into()] }
    }

    /// The field list contains at least one of these values.
    pub fn contains_any<I, S>(&self, values: I) -> Expr
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::ContainsAny {
            field: self.name.clone(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// The field list contains none of these values.
    pub fn excludes<I, S>(&self, values: I) -> Expr
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expr::ExcludesAll {
            field: self.name.clone(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// K-nearest-neighbors leaf for vector fields.
    pub fn knn(&self, k: usize, vector: impl Into<Vec<f64>>) -> Expr {
        Expr::Knn { field: self.name.clone(), k, vector: vector.into() }
    }

    /// Geo-radius leaf.
    pub fn within(&self, lon: f64, lat: f64, radius: f64, unit: GeoUnit) -> Expr {
        Expr::GeoWithin { field: self.name.clone(), lon, lat, radius, unit }
    }

    fn compare(&self, op: CompareOp, value: impl Into<QueryValue>) -> Expr {
        Expr::Compare { field: self.name.clone(), op, value: value.into() }
    }
}

impl Expr {
    /// Conjoin a set of expressions, the implicit AND of `find(a, b, c)`.
    pub fn and_all(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        let mut items: Vec<Expr> = exprs.into_iter().collect();
        match items.len() {
            0 => Expr::All,
            1 => items.remove(0),
            _ => Expr::And(items),
        }
    }

    /// Normalize the tree: flatten nested AND/OR (associativity), drop
    /// wildcard members of conjunctions, and collapse double negation.
    /// Negation is never pushed through TEXT-bearing subtrees here; the
    /// compiler emits `-(...)` clauses instead.
    pub fn normalize(self) -> Expr {
        match self {
            Expr::And(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match item.normalize() {
                        Expr::And(children) => flat.extend(children),
                        Expr::All => {}
                        other => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => Expr::All,
                    1 => flat.remove(0),
                    _ => Expr::And(flat),
                }
            }
            Expr::Or(items) => {
                let mut flat = Vec::with_capacity(items.len());
                for item in items {
                    match item.normalize() {
                        Expr::Or(children) => flat.extend(children),
                        other => flat.push(other),
                    }
                }
                match flat.len() {
                    0 => Expr::All,
                    1 => flat.remove(0),
                    _ => Expr::Or(flat),
                }
            }
            Expr::Not(inner) => match inner.normalize() {
                Expr::Not(child) => *child,
                other => Expr::Not(Box::new(other)),
            },
            leaf => leaf,
        }
    }

    /// Deterministic ASCII rendering for diagnostics.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, "", "");
        out
    }

    fn label(&self) -> String {
        match self {
            Expr::All => "ALL".to_string(),
            Expr::Compare { field, op, value } => {
                format!("{} {} {:?}", field, op.symbol(), value)
            }
            Expr::ContainsAny { field, values } => format!("{field} << {values:?}"),
            Expr::ExcludesAll { field, values } => format!("{field} >> {values:?}"),
            Expr::Knn { field, k, vector } => {
                format!("KNN {field} k={k} dim={}", vector.len())
            }
            Expr::GeoWithin { field, lon, lat, radius, unit } => {
                format!("GEO {field} ({lon},{lat}) r={radius}{}", unit.wire_name())
            }
            Expr::And(_) => "AND".to_string(),
            Expr::Or(_) => "OR".to_string(),
            Expr::Not(_) => "NOT".to_string(),
        }
    }

    fn render_into(&self, out: &mut String, prefix: &str, child_prefix: &str) {
        let _ = writeln!(out, "{prefix}{}", self.label());
        let children: Vec<&Expr> = match self {
            Expr::And(items) | Expr::Or(items) => items.iter().collect(),
            Expr::Not(inner) => vec![inner.as_ref()],
            _ => Vec::new(),
        };
        for (i, child) in children.iter().enumerate() {
            let last = i + 1 == children.len();
            let branch = if last { "└─ " } else { "├─ " };
            let cont = if last { "   " } else { "│  " };
            child.render_into(
                out,
                &format!("{child_prefix}{branch}"),
                &format!("{child_prefix}{cont}"),
            );
        }
    }
}

impl BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        match (self, rhs) {
            (Expr::And(mut left), Expr::And(right)) => {
                left.extend(right);
                Expr::And(left)
            }
            (Expr::And(mut left), rhs) => {
                left.push(rhs);
                Expr::And(left)
            }
            (lhs, Expr::And(mut right)) => {
                right.insert(0, lhs);
                Expr::And(right)
            }
            (lhs, rhs) => Expr::And(vec![lhs, rhs]),
        }
    }
}

impl BitOr for Expr {
    type Output = Expr;

    fn bitor(self, rhs: Expr) -> Expr {
        match (self, rhs) {
            (Expr::Or(mut left), Expr::Or(right)) => {
                left.extend(right);
                Expr::Or(left)
            }
            (Expr::Or(mut left), rhs) => {
                left.push(rhs);
                Expr::Or(left)
            }
            (lhs, Expr::Or(mut right)) => {
                right.insert(0, lhs);
                Expr::Or(right)
            }
            (lhs, rhs) => Expr::Or(vec![lhs, rhs]),
        }
    }
}

impl Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}
