//! Table shapes inferred from query text.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sqlparser::ast::{Select, SelectItem, Statement};
use tracing::debug;

use crate::ast::{column_refs, normalize_ident, select_exprs};
use crate::ddl::ReferenceCatalog;
use crate::heuristics::{Heuristics, TypeOrigin};
use crate::names::is_key_like;
use crate::scope::{walk_statement, ColumnRef, ColumnResolver, Scope, SelectVisitor, WalkFlags};
use crate::types::CanonicalType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: CanonicalType,
    pub nullable: bool,
    pub origin: TypeOrigin,
}

impl ColumnSpec {
    pub fn inferred(name: &str, heuristics: &Heuristics) -> Self {
        let (data_type, origin) = heuristics.infer_type(name);
        Self {
            name: name.to_string(),
            data_type,
            nullable: !is_key_like(name),
            origin,
        }
    }
}

/// One base table. Column order is first-seen order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnSpec> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Add a column unless one of that name already exists.
    pub fn push_column(&mut self, column: ColumnSpec) {
        match self.column_mut(&column.name) {
            Some(existing) => {
                if existing.origin == TypeOrigin::Fallback && column.origin != TypeOrigin::Fallback {
                    *existing = column;
                }
            }
            None => self.columns.push(column),
        }
    }

    /// Name of the surrogate key given to tables no query column was found for.
    pub fn surrogate_key_name(&self) -> String {
        format!("{}_sk", self.name)
    }

    pub(crate) fn ensure_surrogate_key(&mut self) {
        if self.columns.is_empty() {
            let name = self.surrogate_key_name();
            self.columns.push(ColumnSpec {
                name,
                data_type: CanonicalType::Integer,
                nullable: false,
                origin: TypeOrigin::Surrogate,
            });
        }
    }
}

/// Base tables keyed by name, remembering first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaSet {
    tables: BTreeMap<String, TableSchema>,
    order: Vec<String>,
}

impl SchemaSet {
    pub fn get(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    pub fn get_mut(&mut self, table: &str) -> Option<&mut TableSchema> {
        self.tables.get_mut(table)
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Get or create a table entry.
    pub fn table_entry(&mut self, table: &str) -> &mut TableSchema {
        if !self.tables.contains_key(table) {
            self.order.push(table.to_string());
        }
        self.tables
            .entry(table.to_string())
            .or_insert_with(|| TableSchema::new(table))
    }

    pub fn insert(&mut self, schema: TableSchema) {
        if !self.tables.contains_key(&schema.name) {
            self.order.push(schema.name.clone());
        }
        self.tables.insert(schema.name.clone(), schema);
    }

    /// Tables in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &TableSchema> {
        self.order.iter().filter_map(|name| self.tables.get(name))
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Tables that have a column called `column`.
    pub fn owners_of<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.iter()
            .filter(move |t| t.has_column(column))
            .map(|t| t.name.as_str())
    }

    pub fn column_type(&self, column: &ColumnRef) -> Option<CanonicalType> {
        self.get(&column.table)?
            .column(&column.column)
            .map(|c| c.data_type)
    }

    /// Fold another set into this one. Existing tables gain new columns; a
    /// fallback-typed column is upgraded when the other side knows better.
    pub fn merge(&mut self, other: &SchemaSet) {
        for table in other.iter() {
            let entry = self.table_entry(&table.name);
            if entry.columns.len() == 1 && entry.columns[0].origin == TypeOrigin::Surrogate {
                if table.columns.iter().any(|c| c.origin != TypeOrigin::Surrogate) {
                    entry.columns.clear();
                }
            }
            for column in &table.columns {
                if column.origin == TypeOrigin::Surrogate && !entry.columns.is_empty() {
                    continue;
                }
                entry.push_column(column.clone());
            }
        }
    }

    /// Catalog columns replace the inferred ones wholesale for every table
    /// the catalog knows. Tables it does not know keep their inferred shape.
    pub fn apply_reference(&mut self, catalog: &dyn ReferenceCatalog) {
        for name in self.order.clone() {
            let Some(columns) = catalog.table_columns(&name).filter(|c| !c.is_empty()) else {
                continue;
            };
            let Some(table) = self.tables.get_mut(&name) else {
                continue;
            };
            debug!(table = %name, columns = columns.len(), "reference schema overrides inferred columns");
            table.columns = columns;
        }
    }
}

/// Infer the base tables referenced by a statement and the columns the
/// statement touches on each.
///
/// CTE names and derived-table aliases never become tables. Bare column names
/// that cannot be pinned to one table are dropped.
pub fn extract_schema(stmt: &Statement, heuristics: &Heuristics) -> SchemaSet {
    let mut collector = SchemaCollector::default();
    walk_statement(stmt, &mut collector);

    let mut schemas = SchemaSet::default();
    for table in &collector.tables {
        schemas.table_entry(table);
    }
    for column in &collector.resolved {
        schemas
            .table_entry(&column.table)
            .push_column(ColumnSpec::inferred(&column.column, heuristics));
    }

    for table in schemas.tables.values_mut() {
        table.ensure_surrogate_key();
    }
    schemas
}

#[derive(Default)]
struct SchemaCollector {
    tables: Vec<String>,
    resolved: Vec<ColumnRef>,
}

impl SelectVisitor for SchemaCollector {
    fn visit_select(&mut self, select: &Select, scope: &Scope, _flags: WalkFlags) {
        for (_, table) in scope.own_base_tables() {
            if !self.tables.iter().any(|t| t == table) {
                self.tables.push(table.to_string());
            }
        }

        let aliases: BTreeSet<String> = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::ExprWithAlias { alias, .. } => Some(normalize_ident(alias)),
                _ => None,
            })
            .collect();

        let resolver = ColumnResolver::new(scope, None);
        for expr in select_exprs(select) {
            for (qualifier, column) in column_refs(expr) {
                if qualifier.is_none() && aliases.contains(&column) {
                    continue;
                }
                match resolver.resolve(qualifier.as_deref(), &column) {
                    Some(resolved) => {
                        if !self.resolved.contains(&resolved) {
                            self.resolved.push(resolved);
                        }
                    }
                    None => {
                        debug!(qualifier = ?qualifier, %column, "dropping unowned column");
                    }
                }
            }
        }
    }
}
