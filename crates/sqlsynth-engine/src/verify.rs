//! Verify and repair: probe each query, escalate until it returns rows.
//!
//! Per query: probe, then (after a first failure) check for a provable
//! contradiction, then top up the corpus database, force-seed witness rows,
//! apply the recipe if one was asked for, and finally try a bounded local
//! search over multipliers and seed variants. The first passing probe ends
//! the query; a failing or timed-out probe only ends the attempt.

use sqlsynth_schema::{CorpusAnalysis, QueryAnalysis, SchemaSet, SqlDialect};
use tracing::{debug, info, warn};

use crate::compat::to_sqlite_sql;
use crate::config::SynthConfig;
use crate::db::Database;
use crate::error::{Result, SynthError};
use crate::populate::{enforce_scalar_uniqueness, Populator};
use crate::qualify::repair_ambiguous;
use crate::recipe::WitnessRecipe;
use crate::report::{QueryReport, RepairStage};
use crate::template::EdgeTemplate;
use crate::unsat::find_contradiction;
use crate::witness::{Manifest, WitnessSolver};

/// Variants used by local search start here so they never repeat a
/// force-seed variant.
const LOCAL_SEARCH_VARIANT_BASE: u64 = 1_000;

pub struct Verifier<'a> {
    db: &'a Database,
    corpus: &'a CorpusAnalysis,
    config: &'a SynthConfig,
    dialect: SqlDialect,
    template: Option<&'a EdgeTemplate>,
    recipe: Option<&'a dyn WitnessRecipe>,
}

impl<'a> Verifier<'a> {
    pub fn new(
        db: &'a Database,
        corpus: &'a CorpusAnalysis,
        config: &'a SynthConfig,
        dialect: SqlDialect,
    ) -> Self {
        Self {
            db,
            corpus,
            config,
            dialect,
            template: None,
            recipe: None,
        }
    }

    pub fn with_template(mut self, template: Option<&'a EdgeTemplate>) -> Self {
        self.template = template;
        self
    }

    pub fn with_recipe(mut self, recipe: Option<&'a dyn WitnessRecipe>) -> Self {
        self.recipe = recipe;
        self
    }

    /// Every query of the corpus, one at a time.
    pub fn verify_all(&self) -> Vec<QueryReport> {
        self.corpus.queries.iter().map(|q| self.verify(q)).collect()
    }

    pub fn verify(&self, query: &QueryAnalysis) -> QueryReport {
        let mut report = QueryReport::new(query.name.clone(), self.config.min_rows_required);
        let mut sql = match to_sqlite_sql(&query.sql, self.dialect) {
            Ok(sql) => sql,
            Err(e) => {
                report.error = Some(SynthError::from(e).to_string());
                return report;
            }
        };

        let mut last_error = None;
        if self.attempt(&mut sql, &mut report, &mut last_error) {
            return self.settle(report, RepairStage::Initial);
        }

        if let Some(reason) = find_contradiction(query) {
            info!(query = %query.name, %reason, "declared unsatisfiable");
            report.unsat_expected = true;
            report.error = Some(SynthError::ConstraintUnsatisfiable(reason).to_string());
            return report;
        }

        let populator = self.populator();
        for &multiplier in &self.config.topup_multipliers {
            report.topup_attempts += 1;
            populator.populate(multiplier);
            if self.attempt(&mut sql, &mut report, &mut last_error) {
                return self.settle(report, RepairStage::TopUp);
            }
        }

        for variant in 1..=self.config.force_seed_attempts as u64 {
            report.forced_seed_attempts += 1;
            if let Err(e) = self.force_seed(query, variant) {
                warn!(query = %query.name, variant, error = %e, "force-seed failed");
                last_error = Some(e.to_string());
                continue;
            }
            if self.attempt(&mut sql, &mut report, &mut last_error) {
                return self.settle(report, RepairStage::ForceSeed);
            }
        }

        if let Some(recipe) = self.recipe {
            match recipe.apply_recipe(self.db, query, &self.corpus.schemas) {
                Ok(applied) => {
                    report.recipe_applied = applied;
                    if applied && self.attempt(&mut sql, &mut report, &mut last_error) {
                        return self.settle(report, RepairStage::Recipe);
                    }
                }
                Err(e) => {
                    warn!(query = %query.name, recipe = recipe.name(), error = %e, "recipe failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let top = self.config.topup_multipliers.iter().copied().max().unwrap_or(1);
        for trial in 0..self.config.local_search_trials {
            report.local_search_trials += 1;
            populator.populate(top + trial + 1);
            if let Err(e) = self.force_seed(query, LOCAL_SEARCH_VARIANT_BASE + trial as u64) {
                last_error = Some(e.to_string());
                continue;
            }
            if self.attempt(&mut sql, &mut report, &mut last_error) {
                return self.settle(report, RepairStage::LocalSearch);
            }
        }

        warn!(
            query = %query.name,
            topups = report.topup_attempts,
            seeds = report.forced_seed_attempts,
            "query unresolved"
        );
        report.error = Some(last_error.unwrap_or_else(|| {
            format!(
                "fewer than {} rows after every repair attempt",
                self.config.min_rows_required
            )
        }));
        report
    }

    fn populator(&self) -> Populator<'a> {
        let populator = Populator::new(self.db, self.corpus, self.config);
        match self.template {
            Some(template) => populator.with_template(template),
            None => populator,
        }
    }

    /// Insert witness rows for `variant`, skipping tables the query only
    /// reads inside NOT EXISTS / NOT IN / EXCEPT.
    fn force_seed(&self, query: &QueryAnalysis, variant: u64) -> Result<usize> {
        let solver = WitnessSolver::new(&self.corpus.schemas, self.dialect, self.config)
            .skip_tables(query.negated_only_tables());
        let manifest = solver.solve(&query.name, &query.sql, variant)?;
        let inserted = manifest.insert_into(self.db, &self.corpus.schemas)?;
        for table in manifest.tables.keys() {
            if let Some(schema) = self.corpus.schemas.get(table) {
                enforce_scalar_uniqueness(self.db, schema, &self.corpus.scalar_keys);
            }
        }
        debug!(query = %query.name, variant, inserted, "witness rows seeded");
        Ok(inserted)
    }

    /// One probe; records the row count and whether it passed.
    fn attempt(&self, sql: &mut String, report: &mut QueryReport, last_error: &mut Option<String>) -> bool {
        match probe_with_repair(self.db, sql, &self.corpus.schemas, self.config) {
            Ok(rows) => {
                report.rows = rows;
                report.preferred_rows_met = rows >= self.config.preferred_rows;
                rows >= self.config.min_rows_required.max(1)
            }
            Err(e) => {
                debug!(query = %report.query, error = %e, "probe failed");
                *last_error = Some(e.to_string());
                false
            }
        }
    }

    fn settle(&self, mut report: QueryReport, stage: RepairStage) -> QueryReport {
        report.success = true;
        report.resolved_by = Some(stage);
        report.error = None;
        info!(query = %report.query, rows = report.rows, stage = ?stage, "query resolved");
        report
    }
}

/// Probe `sql`; an ambiguous-column error gets one mechanical repair and one
/// retry. A successful repair replaces `sql` for later probes.
pub fn probe_with_repair(db: &Database, sql: &mut String, schemas: &SchemaSet, config: &SynthConfig) -> Result<u64> {
    let limit = config.preferred_rows.max(config.min_rows_required).max(1);
    match db.probe(sql, limit, config.probe_timeout()) {
        Err(SynthError::Execution(message)) => {
            let Some(repaired) = repair_ambiguous(sql, &message, SqlDialect::Sqlite, schemas) else {
                return Err(SynthError::Execution(message));
            };
            info!(%message, "retrying with qualified column");
            let rows = db.probe(&repaired, limit, config.probe_timeout())?;
            *sql = repaired;
            Ok(rows)
        }
        other => other,
    }
}

/// The minimal-witness path on its own: fresh tables for the query, one
/// manifest, one probe. Success means at least one row came back.
pub fn verify_witness(
    db: &Database,
    query: &QueryAnalysis,
    dialect: SqlDialect,
    config: &SynthConfig,
    variant: u64,
) -> Result<(Manifest, u64)> {
    db.create_tables(&query.schemas)?;
    let manifest = WitnessSolver::new(&query.schemas, dialect, config)
        .skip_tables(query.negated_only_tables())
        .solve(&query.name, &query.sql, variant)?;
    manifest.insert_into(db, &query.schemas)?;
    let mut sql = to_sqlite_sql(&query.sql, dialect)?;
    let rows = probe_with_repair(db, &mut sql, &query.schemas, config)?;
    info!(query = %query.name, variant, rows, "witness verified");
    Ok((manifest, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsynth_schema::Heuristics;

    fn analyze(name: &str, sql: &str) -> anyhow::Result<QueryAnalysis> {
        Ok(QueryAnalysis::analyze(name, sql, SqlDialect::Generic, &Heuristics::default(), None)?)
    }

    #[test]
    fn contradictions_are_declared_without_seeding() -> anyhow::Result<()> {
        let q = analyze("q1", "SELECT * FROM t WHERE t.a = 5 AND t.b = 5 AND t.a <> t.b")?;
        let corpus = CorpusAnalysis::new(vec![q], None);
        let db = Database::in_memory()?;
        let config = SynthConfig::default();
        Populator::new(&db, &corpus, &config).build()?;
        let reports = Verifier::new(&db, &corpus, &config, SqlDialect::Generic).verify_all();
        assert_eq!(reports.len(), 1);
        let r = &reports[0];
        assert!(!r.success);
        assert!(r.unsat_expected);
        assert_eq!((r.topup_attempts, r.forced_seed_attempts), (0, 0));
        Ok(())
    }

    #[test]
    fn force_seed_resolves_what_population_misses() -> anyhow::Result<()> {
        // Empty budgets leave the witness as the only source of rows.
        let q = analyze(
            "q1",
            "SELECT * FROM a JOIN b ON a.val = b.val WHERE a.val = 777 AND b.tag = 'z'",
        )?;
        let corpus = CorpusAnalysis::new(vec![q], None);
        let db = Database::in_memory()?;
        let config = SynthConfig {
            fact_rows: 0,
            dimension_rows: 0,
            ..SynthConfig::default()
        };
        Populator::new(&db, &corpus, &config).build()?;
        let report = Verifier::new(&db, &corpus, &config, SqlDialect::Generic).verify(&corpus.queries[0]);
        assert!(report.success, "{report:?}");
        assert_eq!(report.resolved_by, Some(RepairStage::ForceSeed));
        assert_eq!(report.topup_attempts, config.topup_multipliers.len());
        assert_eq!(report.forced_seed_attempts, 1);
        Ok(())
    }

    #[test]
    fn witness_path_returns_rows() -> anyhow::Result<()> {
        let q = analyze(
            "scenario_a",
            "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id \
             WHERE c.state = 'WA' AND o.total > 100",
        )?;
        let db = Database::in_memory()?;
        let (manifest, rows) = verify_witness(&db, &q, SqlDialect::Generic, &SynthConfig::default(), 0)?;
        assert_eq!(manifest.row_count(), 2);
        assert!(rows >= 1);
        Ok(())
    }

    #[test]
    fn ambiguous_columns_are_repaired_once() -> anyhow::Result<()> {
        let q = analyze("q", "SELECT o.id FROM orders o JOIN customers c ON o.customer_id = c.id")?;
        let db = Database::in_memory()?;
        db.create_tables(&q.schemas)?;
        let mut sql = "SELECT id FROM orders o JOIN customers c ON o.customer_id = c.id".to_string();
        let rows = probe_with_repair(&db, &mut sql, &q.schemas, &SynthConfig::default())?;
        assert_eq!(rows, 0);
        assert!(sql.contains("o.id"));
        Ok(())
    }
}
