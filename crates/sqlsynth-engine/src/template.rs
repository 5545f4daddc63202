//! Declarative edge cases consumed by bulk population.
//!
//! ```json
//! {
//!   "type_edges":   { "DATE": ["2000-02-29"] },
//!   "table_rows":   { "customers": [{ "id": 1, "state": "CA" }] },
//!   "column_edges": { "orders": { "status": ["", "RETURNED"] } }
//! }
//! ```
//!
//! `type_edges` keys are canonical type names; `DECIMAL` and `VARCHAR` match
//! every precision and length. Any other top-level key is shorthand for a
//! `table_rows` entry, so `{"customers": [{"id": 1}]}` is a valid template.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sqlsynth_schema::{CanonicalType, TableSchema};

use crate::error::Result;
use crate::value::SqlValue;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeTemplate {
    pub type_edges: BTreeMap<String, Vec<serde_json::Value>>,
    pub table_rows: BTreeMap<String, Vec<BTreeMap<String, serde_json::Value>>>,
    pub column_edges: BTreeMap<String, BTreeMap<String, Vec<serde_json::Value>>>,
    #[serde(flatten)]
    pub tables: BTreeMap<String, Vec<BTreeMap<String, serde_json::Value>>>,
}

impl EdgeTemplate {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn is_empty(&self) -> bool {
        self.type_edges.is_empty()
            && self.table_rows.is_empty()
            && self.column_edges.is_empty()
            && self.tables.is_empty()
    }

    /// Edge values for one column: column edges first, then type edges.
    pub fn edges_for(&self, table: &str, column: &str, ty: CanonicalType) -> Vec<SqlValue> {
        let by_column = self
            .column_edges
            .get(table)
            .and_then(|columns| columns.get(column))
            .into_iter()
            .flatten();
        let by_type = self
            .type_edges
            .iter()
            .filter(|(name, _)| type_matches(name, ty))
            .flat_map(|(_, values)| values);
        by_column
            .chain(by_type)
            .map(|v| SqlValue::from_json(v, ty))
            .collect()
    }

    /// Literal rows for `schema`. Columns the schema does not know are dropped.
    pub fn rows_for(&self, schema: &TableSchema) -> Vec<BTreeMap<String, SqlValue>> {
        self.table_rows
            .get(&schema.name)
            .into_iter()
            .chain(self.tables.get(&schema.name))
            .flatten()
            .map(|row| {
                row.iter()
                    .filter_map(|(name, value)| {
                        let spec = schema.column(&name.to_ascii_lowercase())?;
                        Some((spec.name.clone(), SqlValue::from_json(value, spec.data_type)))
                    })
                    .collect()
            })
            .collect()
    }
}

fn type_matches(name: &str, ty: CanonicalType) -> bool {
    let name = name.trim().to_ascii_uppercase();
    let rendered = ty.to_string();
    if name == rendered {
        return true;
    }
    let family = rendered.split('(').next().unwrap_or_default();
    !name.contains('(') && name == family
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsynth_schema::{ColumnSpec, Heuristics};

    fn template() -> anyhow::Result<EdgeTemplate> {
        Ok(serde_json::from_str(
            r#"{
                "type_edges": {"DECIMAL": [0, -1.5], "DATE": ["2000-02-29"]},
                "table_rows": {"customers": [{"ID": 1, "state": "CA", "bogus": 3}]},
                "column_edges": {"orders": {"total": [999999]}}
            }"#,
        )?)
    }

    #[test]
    fn column_edges_precede_type_edges() -> anyhow::Result<()> {
        let t = template()?;
        let ty = CanonicalType::Decimal { precision: 18, scale: 2 };
        assert_eq!(
            t.edges_for("orders", "total", ty),
            vec![SqlValue::Real(999999.0), SqlValue::Real(0.0), SqlValue::Real(-1.5)]
        );
        assert!(t.edges_for("orders", "note", CanonicalType::varchar(10)).is_empty());
        assert_eq!(
            t.edges_for("x", "d", CanonicalType::Date),
            vec![SqlValue::Text("2000-02-29".into())]
        );
        Ok(())
    }

    #[test]
    fn table_rows_keep_known_columns() -> anyhow::Result<()> {
        let h = Heuristics::default();
        let mut schema = TableSchema::new("customers");
        schema.push_column(ColumnSpec::inferred("id", &h));
        schema.push_column(ColumnSpec::inferred("state", &h));
        let rows = template()?.rows_for(&schema);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&SqlValue::Integer(1)));
        assert_eq!(rows[0].get("state"), Some(&SqlValue::Text("CA".into())));
        assert!(!rows[0].contains_key("bogus"));
        Ok(())
    }

    #[test]
    fn bare_table_keys_are_row_shorthand() -> anyhow::Result<()> {
        let h = Heuristics::default();
        let mut schema = TableSchema::new("customers");
        schema.push_column(ColumnSpec::inferred("id", &h));
        schema.push_column(ColumnSpec::inferred("state", &h));
        let t: EdgeTemplate = serde_json::from_str(r#"{"customers": [{"id": 1, "state": "CA"}]}"#)?;
        assert!(t.table_rows.is_empty());
        let rows = t.rows_for(&schema);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("state"), Some(&SqlValue::Text("CA".into())));
        Ok(())
    }

    #[test]
    fn missing_sections_default_empty() -> anyhow::Result<()> {
        let t: EdgeTemplate = serde_json::from_str(r#"{"table_rows": {}}"#)?;
        assert!(t.is_empty());
        Ok(())
    }
}
