//! Literal predicates (FilterSpecs) keyed by base column.
//!
//! Range predicates stay symbolic here; turning them into concrete values is
//! left to the synthesizers so that bulk population and the witness solver
//! read one representation.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use sqlparser::ast::{BinaryOperator, DateTimeField, Expr, Select, Statement, UnaryOperator, Value};
use tracing::debug;

use crate::ast::{column_parts_through_casts, select_predicates};
use crate::schema::SchemaSet;
use crate::scope::{walk_statement, ColumnRef, ColumnResolver, Scope, SelectVisitor, WalkFlags};

/// A SQL literal as written (after constant folding).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Number(String),
    String(String),
    Boolean(bool),
}

impl Literal {
    pub fn number(value: f64) -> Self {
        Literal::Number(format_number(value))
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => n.parse().ok(),
            Literal::String(s) => s.trim().parse().ok(),
            Literal::Boolean(b) => Some(f64::from(u8::from(*b))),
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Literal::String(s) => parse_date_prefix(s),
            _ => None,
        }
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, Literal::Number(n) if !n.contains(['.', 'e', 'E']))
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => f.write_str(n),
            Literal::String(s) => f.write_str(s),
            Literal::Boolean(b) => write!(f, "{b}"),
        }
    }
}

/// Render a float the way a SQL literal would spell it.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// `YYYY-MM-DD` at the start of a string (timestamps included).
pub fn parse_date_prefix(s: &str) -> Option<NaiveDate> {
    let head = s.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    Gt,
    GtEq,
    Lt,
    LtEq,
    NotEq,
}

impl CmpOp {
    fn from_operator(op: &BinaryOperator) -> Option<Self> {
        match op {
            BinaryOperator::Gt => Some(CmpOp::Gt),
            BinaryOperator::GtEq => Some(CmpOp::GtEq),
            BinaryOperator::Lt => Some(CmpOp::Lt),
            BinaryOperator::LtEq => Some(CmpOp::LtEq),
            BinaryOperator::NotEq => Some(CmpOp::NotEq),
            _ => None,
        }
    }

    /// The operator with its operands swapped (`5 < c` is `c > 5`).
    pub fn flipped(self) -> Self {
        match self {
            CmpOp::Gt => CmpOp::Lt,
            CmpOp::GtEq => CmpOp::LtEq,
            CmpOp::Lt => CmpOp::Gt,
            CmpOp::LtEq => CmpOp::GtEq,
            CmpOp::NotEq => CmpOp::NotEq,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Gt => ">",
            CmpOp::GtEq => ">=",
            CmpOp::Lt => "<",
            CmpOp::LtEq => "<=",
            CmpOp::NotEq => "<>",
        }
    }
}

/// One literal constraint on a column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterValue {
    Eq { value: Literal },
    In { values: Vec<Literal> },
    Between { low: Literal, high: Literal },
    Cmp { op: CmpOp, value: Literal },
    Like { pattern: String },
}

impl FilterValue {
    /// Literals this filter admits directly, without range expansion.
    pub fn point_values(&self) -> Vec<&Literal> {
        match self {
            FilterValue::Eq { value } => vec![value],
            FilterValue::In { values } => values.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn literals(&self) -> Vec<&Literal> {
        match self {
            FilterValue::Eq { value } | FilterValue::Cmp { value, .. } => vec![value],
            FilterValue::In { values } => values.iter().collect(),
            FilterValue::Between { low, high } => vec![low, high],
            FilterValue::Like { .. } => Vec::new(),
        }
    }
}

/// Tagged text form: `v`, `IN:a,b`, `BETWEEN:lo:hi`, `>=:v`, `LIKE:p`.
impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterValue::Eq { value } => write!(f, "{value}"),
            FilterValue::In { values } => {
                let joined: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "IN:{}", joined.join(","))
            }
            FilterValue::Between { low, high } => write!(f, "BETWEEN:{low}:{high}"),
            FilterValue::Cmp { op, value } => write!(f, "{}:{value}", op.symbol()),
            FilterValue::Like { pattern } => write!(f, "LIKE:{pattern}"),
        }
    }
}

/// Filters per base column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSet(BTreeMap<ColumnRef, BTreeSet<FilterValue>>);

impl FilterSet {
    pub fn insert(&mut self, column: ColumnRef, filter: FilterValue) -> bool {
        self.0.entry(column).or_default().insert(filter)
    }

    pub fn get(&self, column: &ColumnRef) -> Option<&BTreeSet<FilterValue>> {
        self.0.get(column)
    }

    pub fn extend(&mut self, other: &FilterSet) {
        for (column, filters) in &other.0 {
            self.0
                .entry(column.clone())
                .or_default()
                .extend(filters.iter().cloned());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ColumnRef, &BTreeSet<FilterValue>)> {
        self.0.iter()
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnRef> {
        self.0.keys()
    }

    /// Filtered columns of one table.
    pub fn for_table<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = (&'a ColumnRef, &'a BTreeSet<FilterValue>)> + 'a {
        self.0.iter().filter(move |(c, _)| c.table == table)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Collect every literal predicate of a statement, resolved to base columns.
///
/// Predicates under NOT, inside negated subqueries or on the right of EXCEPT
/// describe rows the query must *not* see and are skipped. Columns the
/// resolution chain cannot place are dropped.
pub fn extract_filter_values(stmt: &Statement, schemas: &SchemaSet) -> FilterSet {
    let mut collector = FilterCollector {
        schemas,
        filters: FilterSet::default(),
    };
    walk_statement(stmt, &mut collector);
    collector.filters
}

struct FilterCollector<'a> {
    schemas: &'a SchemaSet,
    filters: FilterSet,
}

impl SelectVisitor for FilterCollector<'_> {
    fn visit_select(&mut self, select: &Select, scope: &Scope, flags: WalkFlags) {
        if flags.negated {
            return;
        }
        let resolver = ColumnResolver::new(scope, Some(self.schemas));
        for predicate in select_predicates(select) {
            collect_filters(predicate, &resolver, &mut self.filters);
        }
    }
}

pub(crate) fn collect_filters(expr: &Expr, resolver: &ColumnResolver<'_>, out: &mut FilterSet) {
    if let Some((qualifier, column, filter)) = filter_shape(expr) {
        match resolver.resolve(qualifier.as_deref(), &column) {
            Some(resolved) => {
                out.insert(resolved, filter);
            }
            None => debug!(%column, "filter column has no owner; dropped"),
        }
        return;
    }
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And | BinaryOperator::Or,
            right,
        } => {
            collect_filters(left, resolver, out);
            collect_filters(right, resolver, out);
        }
        Expr::Nested(inner) => collect_filters(inner, resolver, out),
        _ => {}
    }
}

type FilterShape = (Option<String>, String, FilterValue);

/// Match `column <op> literal` shapes.
pub fn filter_shape(expr: &Expr) -> Option<FilterShape> {
    match expr {
        Expr::BinaryOp { left, op, right } => {
            let (column, literal, flipped) = match (
                column_parts_through_casts(left),
                column_parts_through_casts(right),
            ) {
                (Some(c), None) => (c, fold_literal(right)?, false),
                (None, Some(c)) => (c, fold_literal(left)?, true),
                _ => return None,
            };
            let filter = if matches!(op, BinaryOperator::Eq) {
                FilterValue::Eq { value: literal }
            } else {
                let op = CmpOp::from_operator(op)?;
                FilterValue::Cmp {
                    op: if flipped { op.flipped() } else { op },
                    value: literal,
                }
            };
            Some((column.0, column.1, filter))
        }
        Expr::InList {
            expr,
            list,
            negated: false,
        } => {
            let (qualifier, column) = column_parts_through_casts(expr)?;
            let values = list.iter().map(fold_literal).collect::<Option<Vec<_>>>()?;
            Some((qualifier, column, FilterValue::In { values }))
        }
        Expr::Between {
            expr,
            negated: false,
            low,
            high,
        } => {
            let (qualifier, column) = column_parts_through_casts(expr)?;
            let filter = FilterValue::Between {
                low: fold_literal(low)?,
                high: fold_literal(high)?,
            };
            Some((qualifier, column, filter))
        }
        Expr::Like {
            negated: false,
            expr,
            pattern,
            ..
        } => {
            let (qualifier, column) = column_parts_through_casts(expr)?;
            let Literal::String(pattern) = fold_literal(pattern)? else {
                return None;
            };
            Some((qualifier, column, FilterValue::Like { pattern }))
        }
        Expr::Nested(inner) => filter_shape(inner),
        _ => None,
    }
}

/// Evaluate an expression built only from literals.
///
/// Handles unary minus, `+ - * /` on numbers, typed strings (`DATE '…'`),
/// casts, and date ± interval arithmetic.
pub fn fold_literal(expr: &Expr) -> Option<Literal> {
    match expr {
        Expr::Value(value) => match value {
            Value::Number(n, _) => Some(Literal::Number(n.clone())),
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
                Some(Literal::String(s.clone()))
            }
            Value::Boolean(b) => Some(Literal::Boolean(*b)),
            _ => None,
        },
        Expr::TypedString { value, .. } => Some(Literal::String(value.clone())),
        Expr::Cast { expr, .. } | Expr::Nested(expr) => fold_literal(expr),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => Some(Literal::number(-fold_literal(expr)?.as_f64()?)),
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        } => fold_literal(expr),
        Expr::BinaryOp { left, op, right } => {
            if let Expr::Interval(interval) = right.as_ref() {
                let date = fold_literal(left)?.as_date()?;
                let sign = match op {
                    BinaryOperator::Plus => 1,
                    BinaryOperator::Minus => -1,
                    _ => return None,
                };
                let (amount, unit) = interval_parts(interval)?;
                return shift_date(date, sign * amount, &unit)
                    .map(|d| Literal::String(d.format("%Y-%m-%d").to_string()));
            }
            let l = fold_literal(left)?;
            let r = fold_literal(right)?;
            if !matches!(l, Literal::Number(_)) || !matches!(r, Literal::Number(_)) {
                return None;
            }
            let (a, b) = (l.as_f64()?, r.as_f64()?);
            let value = match op {
                BinaryOperator::Plus => a + b,
                BinaryOperator::Minus => a - b,
                BinaryOperator::Multiply => a * b,
                BinaryOperator::Divide if b != 0.0 => a / b,
                _ => return None,
            };
            Some(Literal::number(value))
        }
        _ => None,
    }
}

/// `(amount, unit)` of an INTERVAL literal; the unit is lowercase and singular or plural as written.
pub fn interval_parts(interval: &sqlparser::ast::Interval) -> Option<(i64, String)> {
    let text = fold_literal(&interval.value)?.to_string();
    let mut words = text.split_whitespace();
    let amount = words.next()?.parse::<f64>().ok()? as i64;
    let unit = match &interval.leading_field {
        Some(DateTimeField::Year) => "year".to_string(),
        Some(DateTimeField::Month) => "month".to_string(),
        Some(DateTimeField::Day) => "day".to_string(),
        Some(other) => other.to_string().to_ascii_lowercase(),
        None => words.next().unwrap_or("day").to_ascii_lowercase(),
    };
    Some((amount, unit))
}

fn shift_date(date: NaiveDate, amount: i64, unit: &str) -> Option<NaiveDate> {
    let unit = unit.trim_end_matches('s');
    let months = |n: i64| -> Option<NaiveDate> {
        let m = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
        if n >= 0 {
            date.checked_add_months(m)
        } else {
            date.checked_sub_months(m)
        }
    };
    match unit {
        "day" => date.checked_add_signed(chrono::Duration::days(amount)),
        "week" => date.checked_add_signed(chrono::Duration::days(amount * 7)),
        "month" => months(amount),
        "quarter" => months(amount * 3),
        "year" => months(amount * 12),
        _ => None,
    }
}
