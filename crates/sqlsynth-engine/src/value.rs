//! Concrete SQL values and type-driven defaults.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDate};
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::{Deserialize, Serialize};
use sqlsynth_schema::filters::{format_number, parse_date_prefix};
use sqlsynth_schema::names::{is_key_like, tokenize};
use sqlsynth_schema::{fit_decimal, CanonicalType, Literal};

use crate::config::SynthConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            SqlValue::Text(s) => parse_date_prefix(s),
            _ => None,
        }
    }

    /// Coerce a predicate literal into the storage form of `ty`.
    pub fn from_literal(literal: &Literal, ty: CanonicalType) -> Self {
        if let Literal::Boolean(b) = literal {
            return SqlValue::Integer(i64::from(*b));
        }
        match ty {
            CanonicalType::Integer | CanonicalType::BigInt => match literal.as_f64() {
                Some(f) => SqlValue::Integer(f.round() as i64),
                None => SqlValue::Text(literal.to_string()),
            },
            CanonicalType::Decimal { precision, scale } => match literal.as_f64() {
                Some(f) => SqlValue::Real(fit_decimal(f, precision, scale)),
                None => SqlValue::Text(literal.to_string()),
            },
            CanonicalType::Date => match literal.as_date() {
                Some(d) => SqlValue::Text(format_date(d)),
                None => SqlValue::Text(literal.to_string()),
            },
            CanonicalType::Timestamp | CanonicalType::Varchar { .. } => {
                SqlValue::Text(literal.to_string())
            }
        }
    }

    /// Coerce a JSON template value into the storage form of `ty`.
    pub fn from_json(value: &serde_json::Value, ty: CanonicalType) -> Self {
        match value {
            serde_json::Value::Null => SqlValue::Null,
            serde_json::Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            serde_json::Value::Number(n) => {
                let literal = Literal::Number(n.to_string());
                SqlValue::from_literal(&literal, ty)
            }
            serde_json::Value::String(s) => SqlValue::from_literal(&Literal::String(s.clone()), ty),
            other => SqlValue::Text(other.to_string()),
        }
    }

    /// A value of the same type moved `steps` units away: numbers by `steps`,
    /// dates by `steps` days, text by a suffix.
    pub fn shifted(&self, steps: i64) -> Self {
        match self {
            SqlValue::Integer(i) => SqlValue::Integer(i.saturating_add(steps)),
            SqlValue::Real(f) => SqlValue::Real(f + steps as f64),
            SqlValue::Text(s) => match parse_date_prefix(s) {
                Some(d) if s.len() == 10 => d
                    .checked_add_signed(Duration::days(steps))
                    .map(|d| SqlValue::Text(format_date(d)))
                    .unwrap_or_else(|| SqlValue::Text(format!("{s}_{steps}"))),
                _ => SqlValue::Text(format!("{s}_{steps}")),
            },
            SqlValue::Null => SqlValue::Null,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(i) => write!(f, "{i}"),
            SqlValue::Real(r) => f.write_str(&format_number(*r)),
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(i) => ToSqlOutput::Owned(Value::Integer(*i)),
            SqlValue::Real(r) => ToSqlOutput::Owned(Value::Real(*r)),
            SqlValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Integer(i) => SqlValue::Integer(i),
            Value::Real(r) => SqlValue::Real(r),
            Value::Text(s) => SqlValue::Text(s),
            Value::Blob(b) => SqlValue::Text(String::from_utf8_lossy(&b).into_owned()),
        }
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Calendar-shaped ranges for integer columns named like date parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegerShape {
    Year,
    Month,
    DayOfMonth,
    Quarter,
    Key,
    Plain,
}

impl IntegerShape {
    pub fn of(column: &str) -> Self {
        if is_key_like(column) {
            return IntegerShape::Key;
        }
        let last = tokenize(column).pop().unwrap_or_default();
        match last.as_str() {
            "year" | "yr" => IntegerShape::Year,
            "month" | "moy" => IntegerShape::Month,
            "dom" | "day" => IntegerShape::DayOfMonth,
            "qoy" | "quarter" => IntegerShape::Quarter,
            _ => IntegerShape::Plain,
        }
    }
}

/// A type-driven value for `column`, chosen by `draw`.
///
/// `key_domain` bounds surrogate-key-like columns so that unrelated key
/// columns still collide often enough to join.
pub fn default_value(
    column: &str,
    ty: CanonicalType,
    draw: u64,
    key_domain: u64,
    config: &SynthConfig,
) -> SqlValue {
    match ty {
        CanonicalType::Integer | CanonicalType::BigInt => {
            let v = match IntegerShape::of(column) {
                IntegerShape::Year => {
                    i64::from(config.calendar_start.year())
                        + (draw % u64::from(config.calendar_years.max(1))) as i64
                }
                IntegerShape::Month => 1 + (draw % 12) as i64,
                IntegerShape::DayOfMonth => 1 + (draw % 28) as i64,
                IntegerShape::Quarter => 1 + (draw % 4) as i64,
                IntegerShape::Key => 1 + (draw % key_domain.max(1)) as i64,
                IntegerShape::Plain => 1 + (draw % 1000) as i64,
            };
            SqlValue::Integer(v)
        }
        CanonicalType::Decimal { precision, scale } => {
            let raw = (draw % 100_000) as f64 / 100.0;
            SqlValue::Real(fit_decimal(raw, precision, scale))
        }
        CanonicalType::Date => SqlValue::Text(format_date(calendar_day(draw, config))),
        CanonicalType::Timestamp => {
            let day = calendar_day(draw, config);
            let seconds = (draw / 7) % 86_400;
            SqlValue::Text(format!(
                "{} {:02}:{:02}:{:02}",
                format_date(day),
                seconds / 3600,
                (seconds / 60) % 60,
                seconds % 60
            ))
        }
        CanonicalType::Varchar { length } => {
            let stem = tokenize(column).pop().unwrap_or_else(|| "v".to_string());
            let text = format!("{stem}_{}", draw % 10_000);
            SqlValue::Text(text.chars().take(length.max(1) as usize).collect())
        }
    }
}

fn calendar_day(draw: u64, config: &SynthConfig) -> NaiveDate {
    let offset = (draw % config.calendar_days() as u64) as i64;
    config
        .calendar_start
        .checked_add_signed(Duration::days(offset))
        .unwrap_or(config.calendar_start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literals_follow_column_types() {
        let num = Literal::Number("12.346".into());
        assert_eq!(
            SqlValue::from_literal(&num, CanonicalType::Decimal { precision: 7, scale: 2 }),
            SqlValue::Real(12.35)
        );
        assert_eq!(SqlValue::from_literal(&num, CanonicalType::Integer), SqlValue::Integer(12));
        assert_eq!(
            SqlValue::from_literal(&Literal::String("2000-01-02".into()), CanonicalType::Date),
            SqlValue::Text("2000-01-02".into())
        );
        assert_eq!(
            SqlValue::from_literal(&Literal::Number("94110".into()), CanonicalType::varchar(10)),
            SqlValue::Text("94110".into())
        );
    }

    #[test]
    fn shifting_respects_type() {
        assert_eq!(SqlValue::Integer(4).shifted(1), SqlValue::Integer(5));
        assert_eq!(
            SqlValue::Text("2000-02-28".into()).shifted(2),
            SqlValue::Text("2000-03-01".into())
        );
        assert_eq!(SqlValue::Text("WA".into()).shifted(1), SqlValue::Text("WA_1".into()));
    }

    #[test]
    fn integer_defaults_are_domain_shaped() {
        let cfg = SynthConfig::default();
        for draw in 0..200u64 {
            let SqlValue::Integer(y) = default_value("d_year", CanonicalType::Integer, draw, 10, &cfg) else {
                panic!("year must be an integer");
            };
            assert!((1990..2015).contains(&y));
            let SqlValue::Integer(m) = default_value("d_moy", CanonicalType::Integer, draw, 10, &cfg) else {
                panic!("month must be an integer");
            };
            assert!((1..=12).contains(&m));
            let SqlValue::Integer(k) = default_value("ss_item_sk", CanonicalType::Integer, draw, 10, &cfg) else {
                panic!("key must be an integer");
            };
            assert!((1..=10).contains(&k));
        }
    }

    #[test]
    fn text_defaults_fit_declared_length() {
        let cfg = SynthConfig::default();
        let SqlValue::Text(s) = default_value("c_last_name", CanonicalType::varchar(4), 1234, 1, &cfg) else {
            panic!("varchar default must be text");
        };
        assert_eq!(s.chars().count(), 4);
    }
}
