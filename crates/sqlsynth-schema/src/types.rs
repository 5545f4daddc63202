//! Canonical synthesis types.
//!
//! Every column the resolver discovers is mapped onto one of a small, fixed set
//! of type classes. The synthesizers only ever reason about these classes, never
//! about dialect-specific declared types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A synthesis-relevant type class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CanonicalType {
    Integer,
    BigInt,
    Decimal { precision: u8, scale: u8 },
    Date,
    Timestamp,
    Varchar { length: u32 },
}

impl CanonicalType {
    pub const DEFAULT_DECIMAL: CanonicalType = CanonicalType::Decimal {
        precision: 18,
        scale: 2,
    };

    pub fn varchar(length: u32) -> Self {
        CanonicalType::Varchar { length }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, CanonicalType::Integer | CanonicalType::BigInt)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            CanonicalType::Integer | CanonicalType::BigInt | CanonicalType::Decimal { .. }
        )
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, CanonicalType::Date | CanonicalType::Timestamp)
    }

    /// Map a declared (DDL / catalog) type name onto a canonical class.
    ///
    /// Unknown declarations become `VARCHAR(255)`: text is the one class every
    /// engine can compare against any literal.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.trim().to_ascii_uppercase();
        let (head, args) = split_type_args(&upper);
        let head = head.trim();

        if head.starts_with("BIGINT") || head == "INT8" || head == "LONG" || head == "BIGSERIAL" {
            return CanonicalType::BigInt;
        }
        if matches!(
            head,
            "INT" | "INTEGER" | "SMALLINT" | "TINYINT" | "MEDIUMINT" | "INT2" | "INT4"
                | "SERIAL" | "BOOL" | "BOOLEAN"
        ) || head.starts_with("INT ")
        {
            return CanonicalType::Integer;
        }
        if head.starts_with("DECIMAL") || head.starts_with("NUMERIC") || head.starts_with("NUMBER")
        {
            let precision = args.first().copied().unwrap_or(18).clamp(1, 38) as u8;
            let scale = match args.get(1) {
                Some(s) => (*s).min(u32::from(precision)) as u8,
                None if args.is_empty() => 2,
                None => 0,
            };
            return CanonicalType::Decimal { precision, scale };
        }
        if head.starts_with("REAL") || head.starts_with("DOUBLE") || head.starts_with("FLOAT") {
            return CanonicalType::Decimal {
                precision: 18,
                scale: 4,
            };
        }
        if head.starts_with("DATETIME") || head.starts_with("TIMESTAMP") {
            return CanonicalType::Timestamp;
        }
        if head == "DATE" {
            return CanonicalType::Date;
        }
        if head.contains("CHAR") || head == "TEXT" || head == "STRING" || head == "CLOB" {
            let length = args.first().copied().unwrap_or(255).max(1);
            return CanonicalType::varchar(length);
        }
        CanonicalType::varchar(255)
    }
}

impl fmt::Display for CanonicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanonicalType::Integer => write!(f, "INTEGER"),
            CanonicalType::BigInt => write!(f, "BIGINT"),
            CanonicalType::Decimal { precision, scale } => write!(f, "DECIMAL({precision},{scale})"),
            CanonicalType::Date => write!(f, "DATE"),
            CanonicalType::Timestamp => write!(f, "TIMESTAMP"),
            CanonicalType::Varchar { length } => write!(f, "VARCHAR({length})"),
        }
    }
}

fn split_type_args(declared: &str) -> (&str, Vec<u32>) {
    let Some(open) = declared.find('(') else {
        return (declared, Vec::new());
    };
    let close = declared[open..].find(')').map(|i| open + i).unwrap_or(declared.len());
    let args = declared[open + 1..close]
        .split(',')
        .filter_map(|a| a.trim().parse::<u32>().ok())
        .collect();
    (&declared[..open], args)
}

/// Fit a numeric literal into `DECIMAL(precision, scale)`: round to `scale`
/// digits, then clamp to `±(10^(p−s) − 10^−s)`.
pub fn fit_decimal(value: f64, precision: u8, scale: u8) -> f64 {
    let scale = i32::from(scale.min(precision));
    let factor = 10f64.powi(scale);
    let rounded = (value * factor).round() / factor;
    let bound = 10f64.powi(i32::from(precision) - scale) - 10f64.powi(-scale);
    rounded.clamp(-bound, bound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_map_onto_canonical_classes() {
        assert_eq!(CanonicalType::from_declared("integer"), CanonicalType::Integer);
        assert_eq!(CanonicalType::from_declared("BIGINT"), CanonicalType::BigInt);
        assert_eq!(
            CanonicalType::from_declared("decimal(7,2)"),
            CanonicalType::Decimal {
                precision: 7,
                scale: 2
            }
        );
        assert_eq!(CanonicalType::from_declared("DATE"), CanonicalType::Date);
        assert_eq!(CanonicalType::from_declared("datetime"), CanonicalType::Timestamp);
        assert_eq!(CanonicalType::from_declared("char(1)"), CanonicalType::varchar(1));
        assert_eq!(CanonicalType::from_declared("TEXT"), CanonicalType::varchar(255));
        assert_eq!(CanonicalType::from_declared("blob"), CanonicalType::varchar(255));
    }

    #[test]
    fn decimals_round_then_clamp() {
        assert_eq!(fit_decimal(12.346, 7, 2), 12.35);
        assert_eq!(fit_decimal(123_456.0, 5, 2), 999.99);
        assert_eq!(fit_decimal(-123_456.0, 5, 2), -999.99);
        assert_eq!(fit_decimal(3.0, 4, 0), 3.0);
    }

    #[test]
    fn display_matches_sql_spelling() {
        assert_eq!(CanonicalType::DEFAULT_DECIMAL.to_string(), "DECIMAL(18,2)");
        assert_eq!(CanonicalType::varchar(100).to_string(), "VARCHAR(100)");
    }
}
