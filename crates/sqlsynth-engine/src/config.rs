//! Synthesis budgets and retry ceilings.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Rows per table that owns at least one foreign key.
    pub fact_rows: usize,
    /// Rows per pure dimension table.
    pub dimension_rows: usize,
    /// Bounds on the stable FK anchor subset for non-temporal parents.
    pub anchor_min: usize,
    pub anchor_max: usize,
    pub min_rows_required: u64,
    pub preferred_rows: u64,
    pub probe_timeout_ms: u64,
    pub topup_multipliers: Vec<usize>,
    pub force_seed_attempts: usize,
    pub local_search_trials: usize,
    pub seed: u64,
    pub calendar_start: NaiveDate,
    pub calendar_years: u32,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            fact_rows: 200,
            dimension_rows: 50,
            anchor_min: 8,
            anchor_max: 64,
            min_rows_required: 1,
            preferred_rows: 10,
            probe_timeout_ms: 5_000,
            topup_multipliers: vec![3, 10, 30],
            force_seed_attempts: 3,
            local_search_trials: 4,
            seed: 0x5eed_da7a,
            calendar_start: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or_default(),
            calendar_years: 25,
        }
    }
}

impl SynthConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn calendar_days(&self) -> i64 {
        i64::from(self.calendar_years.max(1)) * 365
    }
}
