//! Column type inference from identifier names.
//!
//! The cascade is:
//! 1. suffix / substring rules (`_sk` → INTEGER, `_date` → DATE, `price` → DECIMAL, ...);
//! 2. a lexical similarity score against four prototype vocabularies;
//! 3. a `VARCHAR(50)` fallback.
//!
//! All rule tables live in [`Heuristics`], which is built once and passed by
//! reference to every resolver call.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::names::tokenize;
use crate::types::CanonicalType;

/// Thresholds for accepting a lexical type guess.
///
/// The defaults are starting values, not measured ones. Whether they suit a
/// given corpus is open, so every threshold is configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeInferenceConfig {
    /// Minimum weighted score the best prototype must reach.
    pub min_score: f64,
    /// Minimum lead of the best prototype over the runner-up.
    pub min_margin: f64,
    pub overlap_weight: f64,
    pub cosine_weight: f64,
}

impl Default for TypeInferenceConfig {
    fn default() -> Self {
        Self {
            min_score: 0.28,
            min_margin: 0.02,
            overlap_weight: 0.6,
            cosine_weight: 0.4,
        }
    }
}

/// How a column's type was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeOrigin {
    NameRule,
    Lexical,
    Fallback,
    Literal,
    Reference,
    Surrogate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prototype {
    pub data_type: CanonicalType,
    pub tokens: BTreeSet<String>,
}

impl Prototype {
    fn new(data_type: CanonicalType, tokens: &[&str]) -> Self {
        Self {
            data_type,
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Immutable heuristic tables for type inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Heuristics {
    pub inference: TypeInferenceConfig,
    pub decimal_markers: Vec<String>,
    pub varchar_markers: Vec<String>,
    pub timestamp_suffixes: Vec<String>,
    pub prototypes: Vec<Prototype>,
    pub fallback: CanonicalType,
}

impl Default for Heuristics {
    fn default() -> Self {
        let strings = |xs: &[&str]| xs.iter().map(|x| x.to_string()).collect::<Vec<_>>();
        Self {
            inference: TypeInferenceConfig::default(),
            decimal_markers: strings(&[
                "amt", "amount", "price", "cost", "fee", "tax", "discount", "profit", "sales",
                "revenue",
            ]),
            varchar_markers: strings(&[
                "name", "desc", "type", "category", "state", "city", "email", "status", "gender",
                "country",
            ]),
            timestamp_suffixes: strings(&["_ts", "_timestamp", "_at"]),
            prototypes: vec![
                Prototype::new(
                    CanonicalType::Integer,
                    &[
                        "id", "sk", "key", "num", "number", "count", "cnt", "qty", "quantity",
                        "seq", "no", "nbr", "year", "month", "hour", "minute", "rank", "level",
                        "age", "index", "idx", "version", "size", "days",
                    ],
                ),
                Prototype::new(
                    CanonicalType::DEFAULT_DECIMAL,
                    &[
                        "amt", "amount", "price", "cost", "fee", "tax", "discount", "profit",
                        "sales", "revenue", "rate", "ratio", "pct", "percent", "balance", "total",
                        "sum", "avg", "margin", "weight", "score", "net", "gross", "paid",
                        "wholesale", "coupon", "credit", "charge",
                    ],
                ),
                Prototype::new(
                    CanonicalType::Date,
                    &[
                        "date", "dt", "day", "created", "updated", "modified", "start", "end",
                        "ship", "sold", "returned", "expiry", "expires", "since", "until",
                    ],
                ),
                Prototype::new(
                    CanonicalType::varchar(100),
                    &[
                        "name", "desc", "description", "type", "category", "state", "city",
                        "email", "status", "gender", "country", "street", "address", "zip",
                        "code", "text", "label", "title", "comment", "note", "phone", "flag",
                        "class", "brand", "color", "url", "manager", "mode", "channel",
                    ],
                ),
            ],
            fallback: CanonicalType::varchar(50),
        }
    }
}

impl Heuristics {
    /// Infer a canonical type for a bare column name.
    pub fn infer_type(&self, column: &str) -> (CanonicalType, TypeOrigin) {
        if let Some(t) = self.rule_type(column) {
            return (t, TypeOrigin::NameRule);
        }
        if let Some(t) = self.lexical_type(column) {
            return (t, TypeOrigin::Lexical);
        }
        (self.fallback, TypeOrigin::Fallback)
    }

    /// Suffix and substring rules, checked in priority order.
    pub fn rule_type(&self, column: &str) -> Option<CanonicalType> {
        let name = column.to_ascii_lowercase();
        if crate::names::is_key_like(&name) {
            return Some(CanonicalType::Integer);
        }
        if name.ends_with("_date") || name.ends_with("_dt") || name == "date" || name == "d_date" {
            return Some(CanonicalType::Date);
        }
        if name == "timestamp" || self.timestamp_suffixes.iter().any(|s| name.ends_with(s.as_str()))
        {
            return Some(CanonicalType::Timestamp);
        }
        if self.decimal_markers.iter().any(|m| name.contains(m.as_str())) {
            return Some(CanonicalType::DEFAULT_DECIMAL);
        }
        if self.varchar_markers.iter().any(|m| name.contains(m.as_str())) {
            return Some(CanonicalType::varchar(100));
        }
        None
    }

    /// Weighted token-overlap / cosine score of `column` against each prototype.
    pub fn lexical_scores(&self, column: &str) -> Vec<(CanonicalType, f64)> {
        let tokens = tokenize(column);
        if tokens.is_empty() {
            return Vec::new();
        }
        let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
        for t in &tokens {
            *counts.entry(t.as_str()).or_default() += 1.0;
        }
        let norm = counts.values().map(|c| c * c).sum::<f64>().sqrt();
        let distinct = counts.len() as f64;

        self.prototypes
            .iter()
            .map(|proto| {
                let shared: Vec<f64> = counts
                    .iter()
                    .filter(|(t, _)| proto.tokens.contains(**t))
                    .map(|(_, c)| *c)
                    .collect();
                let overlap = shared.len() as f64 / distinct;
                let cosine = if proto.tokens.is_empty() || norm == 0.0 {
                    0.0
                } else {
                    shared.iter().sum::<f64>() / (norm * (proto.tokens.len() as f64).sqrt())
                };
                let score = self.inference.overlap_weight * overlap
                    + self.inference.cosine_weight * cosine;
                (proto.data_type, score)
            })
            .collect()
    }

    /// The best lexical guess, if it clears both the score and margin thresholds.
    pub fn lexical_type(&self, column: &str) -> Option<CanonicalType> {
        let mut scores = self.lexical_scores(column);
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));
        let (best_type, best) = *scores.first()?;
        let runner_up = scores.get(1).map(|s| s.1).unwrap_or(0.0);
        (best >= self.inference.min_score && best - runner_up >= self.inference.min_margin)
            .then_some(best_type)
    }
}
