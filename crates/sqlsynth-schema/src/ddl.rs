//! Authoritative table shapes from a reference source.
//!
//! A catalog is consulted only for column lists and declared types; when it
//! knows a table, its columns replace the inferred ones wholesale.

use std::collections::BTreeMap;

use sqlparser::ast::{ColumnOption, Statement};
use sqlparser::parser::Parser;

use crate::ast::{normalize_ident, object_base_name};
use crate::dialect::SqlDialect;
use crate::heuristics::TypeOrigin;
use crate::schema::ColumnSpec;
use crate::types::CanonicalType;
use crate::SchemaError;

pub trait ReferenceCatalog {
    /// Columns of `table`, or `None` when the catalog does not know it.
    fn table_columns(&self, table: &str) -> Option<Vec<ColumnSpec>>;
}

/// A catalog built from `CREATE TABLE` statements.
#[derive(Debug, Clone, Default)]
pub struct DdlCatalog {
    tables: BTreeMap<String, Vec<ColumnSpec>>,
}

impl DdlCatalog {
    pub fn parse(sql: &str, dialect: SqlDialect) -> Result<Self, SchemaError> {
        let statements = Parser::parse_sql(dialect.parser_dialect().as_ref(), sql)
            .map_err(|e| SchemaError::Parse(e.to_string()))?;

        let mut catalog = Self::default();
        for stmt in statements {
            let Statement::CreateTable { name, columns, .. } = stmt else {
                continue;
            };
            let specs = columns
                .iter()
                .map(|col| {
                    let not_null = col.options.iter().any(|opt| {
                        matches!(
                            opt.option,
                            ColumnOption::NotNull | ColumnOption::Unique { is_primary: true, .. }
                        )
                    });
                    ColumnSpec {
                        name: normalize_ident(&col.name),
                        data_type: CanonicalType::from_declared(&col.data_type.to_string()),
                        nullable: !not_null,
                        origin: TypeOrigin::Reference,
                    }
                })
                .collect();
            catalog.tables.insert(object_base_name(&name), specs);
        }
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl ReferenceCatalog for DdlCatalog {
    fn table_columns(&self, table: &str) -> Option<Vec<ColumnSpec>> {
        self.tables.get(table).cloned()
    }
}
