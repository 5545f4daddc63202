//! Per-query verdicts and the batch summary.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Step of the repair loop that produced the first passing probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStage {
    Initial,
    TopUp,
    ForceSeed,
    Recipe,
    LocalSearch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryReport {
    pub query: String,
    pub success: bool,
    pub rows: u64,
    pub min_rows_required: u64,
    pub preferred_rows_met: bool,
    pub unsat_expected: bool,
    pub topup_attempts: usize,
    pub forced_seed_attempts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<RepairStage>,
    #[serde(default)]
    pub local_search_trials: usize,
    #[serde(default)]
    pub recipe_applied: bool,
    pub error: Option<String>,
}

impl QueryReport {
    pub fn new(query: impl Into<String>, min_rows_required: u64) -> Self {
        Self {
            query: query.into(),
            success: false,
            rows: 0,
            min_rows_required,
            preferred_rows_met: false,
            unsat_expected: false,
            topup_attempts: 0,
            forced_seed_attempts: 0,
            resolved_by: None,
            local_search_trials: 0,
            recipe_applied: false,
            error: None,
        }
    }

    /// A query that never reached synthesis.
    pub fn failed(query: impl Into<String>, min_rows_required: u64, error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::new(query, min_rows_required)
        }
    }

    /// Resolved, or known to be empty.
    pub fn is_settled(&self) -> bool {
        self.success || self.unsat_expected
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub resolved: usize,
    pub unsat_expected: usize,
    pub unresolved: usize,
    pub preferred_rows_met: usize,
    pub topup_attempts: usize,
    pub forced_seed_attempts: usize,
    pub unresolved_queries: Vec<String>,
}

impl BatchSummary {
    pub fn from_reports(reports: &[QueryReport]) -> Self {
        let mut summary = Self {
            total: reports.len(),
            ..Self::default()
        };
        for r in reports {
            if r.success {
                summary.resolved += 1;
            } else if r.unsat_expected {
                summary.unsat_expected += 1;
            } else {
                summary.unresolved += 1;
                summary.unresolved_queries.push(r.query.clone());
            }
            summary.preferred_rows_met += usize::from(r.preferred_rows_met);
            summary.topup_attempts += r.topup_attempts;
            summary.forced_seed_attempts += r.forced_seed_attempts;
        }
        summary
    }

    pub fn all_settled(&self) -> bool {
        self.unresolved == 0
    }
}

/// Write `<out>/reports/<query>.json` per query and `<out>/summary.json`.
pub fn write_reports(out: &Path, reports: &[QueryReport]) -> Result<BatchSummary> {
    let dir = out.join("reports");
    fs::create_dir_all(&dir)?;
    for report in reports {
        let path = dir.join(format!("{}.json", file_stem(&report.query)));
        fs::write(path, serde_json::to_string_pretty(report)?)?;
    }
    let summary = BatchSummary::from_reports(reports);
    fs::write(out.join("summary.json"), serde_json::to_string_pretty(&summary)?)?;
    Ok(summary)
}

fn file_stem(query: &str) -> String {
    let stem: String = query
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.is_empty() {
        "query".to_string()
    } else {
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_verdict_once() -> anyhow::Result<()> {
        let mut ok = QueryReport::new("q1", 1);
        ok.success = true;
        ok.rows = 12;
        ok.preferred_rows_met = true;
        ok.topup_attempts = 1;
        let mut unsat = QueryReport::new("q2", 1);
        unsat.unsat_expected = true;
        let broken = QueryReport::failed("q3/bad", 1, "parse error");

        let dir = tempfile::tempdir()?;
        let summary = write_reports(dir.path(), &[ok, unsat, broken])?;
        assert_eq!((summary.resolved, summary.unsat_expected, summary.unresolved), (1, 1, 1));
        assert_eq!(summary.unresolved_queries, vec!["q3/bad".to_string()]);
        assert!(!summary.all_settled());

        let written: QueryReport =
            serde_json::from_str(&fs::read_to_string(dir.path().join("reports/q3_bad.json"))?)?;
        assert_eq!(written.error.as_deref(), Some("parse error"));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.path().join("reports/q1.json"))?)?;
        for field in [
            "query",
            "success",
            "rows",
            "min_rows_required",
            "preferred_rows_met",
            "unsat_expected",
            "topup_attempts",
            "forced_seed_attempts",
            "error",
        ] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
        assert!(dir.path().join("summary.json").exists());
        Ok(())
    }
}
