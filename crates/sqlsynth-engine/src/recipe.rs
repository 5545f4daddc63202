//! Dataset-specific witness recipes.
//!
//! The generic solver never special-cases a dataset; anything that only
//! makes sense for one benchmark lives behind [`WitnessRecipe`] and runs only
//! when asked for by name.

use std::collections::BTreeMap;
use std::path::Path;

use sqlsynth_schema::{QueryAnalysis, SchemaSet};
use tracing::{debug, info};

use crate::config::SynthConfig;
use crate::db::Database;
use crate::error::{Result, SynthError};
use crate::rng::fnv1a64;
use crate::value::{default_value, SqlValue};

pub trait WitnessRecipe {
    fn name(&self) -> &str;

    /// Insert whatever rows this recipe knows for the query. Returns whether
    /// anything was inserted.
    fn apply_recipe(&self, db: &Database, query: &QueryAnalysis, schemas: &SchemaSet) -> Result<bool>;
}

type PackRows = BTreeMap<String, Vec<BTreeMap<String, serde_json::Value>>>;

/// Rows keyed by query name, then table:
///
/// ```json
/// { "q07": { "item": [{ "i_item_sk": 1, "i_category": "Books" }] } }
/// ```
///
/// Columns the pack leaves out get type defaults; unknown tables and columns
/// are ignored.
#[derive(Debug, Clone, Default)]
pub struct JsonPackRecipe {
    packs: BTreeMap<String, PackRows>,
    config: SynthConfig,
}

impl JsonPackRecipe {
    pub const NAME: &'static str = "json-pack";

    pub fn load(path: &Path, config: &SynthConfig) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text, config)
    }

    pub fn from_json(text: &str, config: &SynthConfig) -> Result<Self> {
        Ok(Self {
            packs: serde_json::from_str(text)?,
            config: config.clone(),
        })
    }

    pub fn covers(&self, query: &str) -> bool {
        self.packs.contains_key(query)
    }
}

impl WitnessRecipe for JsonPackRecipe {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply_recipe(&self, db: &Database, query: &QueryAnalysis, schemas: &SchemaSet) -> Result<bool> {
        let Some(pack) = self.packs.get(&query.name) else {
            debug!(query = %query.name, "no recipe rows for query");
            return Ok(false);
        };
        let mut inserted = 0;
        for (table, rows) in pack {
            let Some(schema) = schemas.get(&table.to_ascii_lowercase()) else {
                continue;
            };
            let columns: Vec<String> = schema.column_names().map(str::to_string).collect();
            let values: Vec<Vec<SqlValue>> = rows
                .iter()
                .enumerate()
                .map(|(i, row)| {
                    let row: BTreeMap<String, &serde_json::Value> =
                        row.iter().map(|(k, v)| (k.to_ascii_lowercase(), v)).collect();
                    schema
                        .columns
                        .iter()
                        .map(|spec| match row.get(&spec.name) {
                            Some(v) if !v.is_null() || spec.nullable => SqlValue::from_json(v, spec.data_type),
                            _ => {
                                let label = format!("{}:{}.{}#{i}", query.name, schema.name, spec.name);
                                default_value(
                                    &spec.name,
                                    spec.data_type,
                                    fnv1a64(label.as_bytes()),
                                    self.config.fact_rows.max(1) as u64,
                                    &self.config,
                                )
                            }
                        })
                        .collect()
                })
                .collect();
            inserted += db.insert_rows(&schema.name, &columns, &values)?;
        }
        info!(query = %query.name, recipe = Self::NAME, rows = inserted, "recipe applied");
        Ok(inserted > 0)
    }
}

/// Look a recipe up by name. Only `json-pack` is built in.
pub fn load_recipe(name: &str, path: &Path, config: &SynthConfig) -> Result<Box<dyn WitnessRecipe>> {
    match name {
        JsonPackRecipe::NAME => Ok(Box::new(JsonPackRecipe::load(path, config)?)),
        other => Err(SynthError::UnknownRecipe(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsynth_schema::{Heuristics, SqlDialect};

    #[test]
    fn pack_rows_fill_missing_columns() -> anyhow::Result<()> {
        let sql = "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id WHERE c.state = 'WA'";
        let query = QueryAnalysis::analyze("q1", sql, SqlDialect::Generic, &Heuristics::default(), None)?;
        let db = Database::in_memory()?;
        db.create_tables(&query.schemas)?;
        let recipe = JsonPackRecipe::from_json(
            r#"{"q1": {"customers": [{"ID": 7, "state": "WA"}], "orders": [{"customer_id": 7}]}}"#,
            &SynthConfig::default(),
        )?;
        assert!(recipe.covers("q1"));
        assert!(recipe.apply_recipe(&db, &query, &query.schemas)?);
        assert_eq!(
            db.column_values("SELECT COUNT(*) FROM orders o JOIN customers c ON o.customer_id = c.id")?,
            vec![SqlValue::Integer(1)]
        );

        let other = QueryAnalysis::analyze("q2", sql, SqlDialect::Generic, &Heuristics::default(), None)?;
        assert!(!recipe.apply_recipe(&db, &other, &other.schemas)?);
        Ok(())
    }

    #[test]
    fn unknown_recipe_names_are_rejected() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pack.json");
        std::fs::write(&path, "{}")?;
        assert!(load_recipe("tpcds-hacks", &path, &SynthConfig::default()).is_err());
        assert_eq!(load_recipe("json-pack", &path, &SynthConfig::default())?.name(), "json-pack");
        Ok(())
    }
}
