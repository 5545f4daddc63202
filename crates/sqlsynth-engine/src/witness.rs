//! Minimal-witness manifests: one row per table instance of a query.
//!
//! The query is flattened (CTEs inlined, aliases unique, columns qualified),
//! then every `(alias, column)` the query proves equal is grouped in one
//! class. Each class resolves to a single value: the first literal domain
//! that constrains it, else a hash-derived anchor. Rows are read off the
//! classes for each base FROM item outside negated branches.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sqlparser::ast::{BinaryOperator, Expr, JoinConstraint, Query, Select, SelectItem, SetExpr, SetOperator, TableFactor};
use sqlsynth_schema::ast::{
    column_parts, column_parts_through_casts, conjuncts, factor_alias, join_constraint,
    normalize_ident, object_base_name, select_predicates, table_factors,
};
use sqlsynth_schema::filters::filter_shape;
use sqlsynth_schema::joins::column_equality;
use sqlsynth_schema::scope::{build_scope, walk_statement, Scope, ScopeEntry, SelectVisitor, Source, WalkFlags};
use sqlsynth_schema::{CanonicalType, ColumnRef, FilterValue, SchemaSet, SqlDialect};
use tracing::debug;

use crate::config::SynthConfig;
use crate::db::Database;
use crate::domain::Domain;
use crate::error::{Result, SynthError};
use crate::inline::{flatten, AliasMap};
use crate::rng::fnv1a64;
use crate::unionfind::DisjointSet;
use crate::value::{default_value, SqlValue};

/// Key range for hash-derived surrogate-key anchors.
const ANCHOR_KEY_DOMAIN: u64 = 1_000_000;

type Key = (String, String);

pub type WitnessRow = BTreeMap<String, SqlValue>;

/// Rows to insert, grouped by base table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub query: String,
    pub variant: u64,
    pub tables: BTreeMap<String, Vec<WitnessRow>>,
}

impl Manifest {
    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Insert every row, columns in schema order.
    pub fn insert_into(&self, db: &Database, schemas: &SchemaSet) -> Result<usize> {
        let mut inserted = 0;
        for (table, rows) in &self.tables {
            let Some(schema) = schemas.get(table) else {
                continue;
            };
            let columns: Vec<String> = schema.column_names().map(str::to_string).collect();
            let values: Vec<Vec<SqlValue>> = rows
                .iter()
                .map(|row| {
                    columns
                        .iter()
                        .map(|c| row.get(c).cloned().unwrap_or(SqlValue::Null))
                        .collect()
                })
                .collect();
            inserted += db.insert_rows(table, &columns, &values)?;
        }
        Ok(inserted)
    }
}

/// An equivalence class and the value it resolved to.
#[derive(Debug, Clone)]
pub struct WitnessClass {
    pub members: Vec<(String, String)>,
    pub data_type: CanonicalType,
    pub value: SqlValue,
    domain: Domain,
}

pub struct WitnessSolver<'a> {
    schemas: &'a SchemaSet,
    dialect: SqlDialect,
    config: &'a SynthConfig,
    skip_tables: BTreeSet<String>,
}

impl<'a> WitnessSolver<'a> {
    pub fn new(schemas: &'a SchemaSet, dialect: SqlDialect, config: &'a SynthConfig) -> Self {
        Self {
            schemas,
            dialect,
            config,
            skip_tables: BTreeSet::new(),
        }
    }

    /// Tables that never receive witness rows.
    pub fn skip_tables(mut self, tables: impl IntoIterator<Item = String>) -> Self {
        self.skip_tables.extend(tables);
        self
    }

    pub fn solve(&self, name: &str, sql: &str, variant: u64) -> Result<Manifest> {
        let (manifest, _) = self.solve_with_classes(name, sql, variant)?;
        Ok(manifest)
    }

    pub fn solve_with_classes(
        &self,
        name: &str,
        sql: &str,
        variant: u64,
    ) -> Result<(Manifest, Vec<WitnessClass>)> {
        let mut stmt = flatten(sql, self.dialect, self.schemas)?;
        let aliases = AliasMap::build(&mut stmt, self.schemas);
        let mut walker = FactWalker {
            schemas: self.schemas,
            facts: Facts::default(),
        };
        walk_statement(&stmt, &mut walker);
        let facts = walker.facts;

        let mut set = DisjointSet::new();
        for (a, b) in &facts.unions {
            set.union(a, b);
        }
        for (key, _) in &facts.filters {
            set.add(key);
        }
        for (a, b) in &facts.not_equal {
            set.add(a);
            set.add(b);
        }

        let mut classes = Vec::new();
        let mut class_of: BTreeMap<Key, usize> = BTreeMap::new();
        for members in set.classes() {
            for m in &members {
                class_of.insert(m.clone(), classes.len());
            }
            classes.push(self.resolve_class(members, &facts, &aliases, variant));
        }
        resolve_not_equal(&mut classes, &class_of, &facts.not_equal);

        let mut manifest = Manifest {
            query: name.to_string(),
            variant,
            tables: BTreeMap::new(),
        };
        for (alias, table) in &facts.instances {
            if self.skip_tables.contains(table) {
                continue;
            }
            let Some(schema) = self.schemas.get(table) else {
                continue;
            };
            let mut row = WitnessRow::new();
            for column in &schema.columns {
                let key = (alias.clone(), column.name.clone());
                let value = match class_of.get(&key) {
                    Some(i) => classes[*i].value.clone(),
                    None => self.anchor(
                        &column.name,
                        column.data_type,
                        &format!("{table}.{}", column.name),
                        variant,
                    ),
                };
                row.insert(column.name.clone(), value);
            }
            manifest.tables.entry(table.clone()).or_default().push(row);
        }
        debug!(
            query = name,
            variant,
            classes = classes.len(),
            rows = manifest.row_count(),
            "witness solved"
        );
        Ok((manifest, classes))
    }

    fn resolve_class(&self, members: Vec<Key>, facts: &Facts, aliases: &AliasMap, variant: u64) -> WitnessClass {
        let based: Vec<ColumnRef> = members
            .iter()
            .filter_map(|(alias, column)| {
                let base = aliases.base_of(alias)?;
                self.schemas
                    .get(base)?
                    .has_column(column)
                    .then(|| ColumnRef::new(base, column.as_str()))
            })
            .collect();
        let data_type = based
            .first()
            .and_then(|c| self.schemas.column_type(c))
            .unwrap_or(CanonicalType::varchar(50));

        let filters = facts
            .filters
            .iter()
            .filter(|(key, _)| members.contains(key))
            .map(|(_, f)| f);
        let domain = Domain::from_filters(filters, data_type);

        let anchor_ref = based.iter().min().cloned().unwrap_or_else(|| {
            let (alias, column) = &members[0];
            ColumnRef::new(alias.as_str(), column.as_str())
        });
        let mut value = domain.first_value(data_type, variant).unwrap_or_else(|| {
            self.anchor(&anchor_ref.column, data_type, &anchor_ref.to_string(), variant)
        });
        let mut step = 1;
        while domain.excludes(&value, data_type) && step <= domain.excluded.len() as i64 + 1 {
            value = value.shifted(step);
            step += 1;
        }
        WitnessClass {
            members,
            data_type,
            value,
            domain,
        }
    }

    fn anchor(&self, column: &str, ty: CanonicalType, class_key: &str, variant: u64) -> SqlValue {
        let draw = fnv1a64(format!("{class_key}#{variant}").as_bytes());
        default_value(column, ty, draw, ANCHOR_KEY_DOMAIN, self.config)
    }
}

/// Two distinct classes that must differ but resolved alike: take another
/// allowed point of the second class, else move it by one step.
fn resolve_not_equal(classes: &mut [WitnessClass], class_of: &BTreeMap<Key, usize>, pairs: &[(Key, Key)]) {
    for (a, b) in pairs {
        let (Some(&ca), Some(&cb)) = (class_of.get(a), class_of.get(b)) else {
            continue;
        };
        if ca == cb || classes[ca].value != classes[cb].value {
            continue;
        }
        let taken = classes[ca].value.clone();
        let target = &mut classes[cb];
        let alternative = target
            .domain
            .alternatives(target.data_type, &target.value)
            .into_iter()
            .find(|v| *v != taken);
        target.value = alternative.unwrap_or_else(|| target.value.shifted(1));
    }
}

#[derive(Debug, Default)]
struct Facts {
    /// `(alias, base table)` per base FROM item outside negated branches.
    instances: Vec<(String, String)>,
    unions: Vec<(Key, Key)>,
    filters: Vec<(Key, FilterValue)>,
    not_equal: Vec<(Key, Key)>,
}

struct FactWalker<'a> {
    schemas: &'a SchemaSet,
    facts: Facts,
}

impl SelectVisitor for FactWalker<'_> {
    fn visit_select(&mut self, select: &Select, scope: &Scope, flags: WalkFlags) {
        if flags.negated {
            return;
        }
        for entry in scope.own() {
            if let Source::Base { table } = &entry.source {
                if !self.facts.instances.iter().any(|(a, _)| *a == entry.alias) {
                    self.facts.instances.push((entry.alias.clone(), table.clone()));
                }
            }
        }

        for twj in &select.from {
            for factor in table_factors(twj) {
                if let TableFactor::Derived {
                    subquery,
                    alias: Some(alias),
                    ..
                } = factor
                {
                    let outer = normalize_ident(&alias.name);
                    for (name, inner) in projection_keys(subquery, self.schemas) {
                        if name.is_empty() {
                            continue;
                        }
                        for key in inner {
                            self.facts.unions.push(((outer.clone(), name.clone()), key));
                        }
                    }
                }
            }
            let mut previous = factor_alias(&twj.relation);
            for join in &twj.joins {
                let current = factor_alias(&join.relation);
                if let (Some(JoinConstraint::Using(columns)), Some(left), Some(right)) =
                    (join_constraint(&join.join_operator), &previous, &current)
                {
                    for column in columns {
                        let column = normalize_ident(column);
                        self.facts
                            .unions
                            .push(((left.clone(), column.clone()), (right.clone(), column)));
                    }
                }
                previous = current;
            }
        }

        let resolver = KeyResolver {
            scope,
            schemas: self.schemas,
        };
        for predicate in select_predicates(select) {
            for conjunct in chosen_conjuncts(predicate) {
                self.conjunct(conjunct, &resolver);
            }
        }
    }
}

impl FactWalker<'_> {
    fn conjunct(&mut self, expr: &Expr, resolver: &KeyResolver<'_>) {
        if let Some((a, b)) = column_equality(expr) {
            if let (Some(ka), Some(kb)) = (resolver.key(a.0.as_deref(), &a.1), resolver.key(b.0.as_deref(), &b.1)) {
                self.facts.unions.push((ka, kb));
            }
            return;
        }
        if let Expr::BinaryOp {
            left,
            op: BinaryOperator::NotEq,
            right,
        } = expr
        {
            if let (Some(a), Some(b)) = (column_parts_through_casts(left), column_parts_through_casts(right)) {
                if let (Some(ka), Some(kb)) = (resolver.key(a.0.as_deref(), &a.1), resolver.key(b.0.as_deref(), &b.1)) {
                    self.facts.not_equal.push((ka, kb));
                }
                return;
            }
        }
        if let Expr::InSubquery {
            expr: lhs,
            subquery,
            negated: false,
        } = expr
        {
            let outer = column_parts_through_casts(lhs).and_then(|(q, c)| resolver.key(q.as_deref(), &c));
            if let (Some(outer), Some((_, inner))) = (outer, projection_keys(subquery, self.schemas).into_iter().next()) {
                for key in inner {
                    self.facts.unions.push((outer.clone(), key));
                }
            }
            return;
        }
        if let Some((qualifier, column, filter)) = filter_shape(expr) {
            match resolver.key(qualifier.as_deref(), &column) {
                Some(key) => self.facts.filters.push((key, filter)),
                None => {
                    let gap = SynthError::SchemaInferenceGap { column };
                    debug!(error = %gap, filter = %filter, "constraint dropped");
                }
            }
        }
    }
}

/// Conjuncts to satisfy; of a disjunction only the leftmost branch is taken.
fn chosen_conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    for c in conjuncts(expr) {
        match c {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                ..
            } => out.extend(chosen_conjuncts(left)),
            other => out.push(other),
        }
    }
    out
}

struct KeyResolver<'a> {
    scope: &'a Scope,
    schemas: &'a SchemaSet,
}

impl KeyResolver<'_> {
    fn key(&self, qualifier: Option<&str>, column: &str) -> Option<Key> {
        if let Some(q) = qualifier {
            return Some((q.to_string(), column.to_string()));
        }
        let own = self.scope.own();
        let exposes = |e: &&ScopeEntry| match &e.source {
            Source::Base { table } => self.schemas.get(table).is_some_and(|t| t.has_column(column)),
            Source::Cte { lineage, .. } | Source::Derived { lineage } => lineage.has_column(column),
        };
        for entries in [own, &self.scope.all()[own.len()..]] {
            let owners: Vec<&ScopeEntry> = entries.iter().filter(exposes).collect();
            if let [one] = owners.as_slice() {
                return Some((one.alias.clone(), column.to_string()));
            }
        }
        match own {
            [only] => Some((only.alias.clone(), column.to_string())),
            _ => None,
        }
    }
}

/// Output columns of `query` and the `(alias, column)` keys feeding each, by
/// position across the branches of a set operation. EXCEPT contributes only
/// its left side.
fn projection_keys(query: &Query, schemas: &SchemaSet) -> Vec<(String, Vec<Key>)> {
    let mut branches = Vec::new();
    collect_branches(&query.body, &mut branches);

    let mut out: Vec<(String, Vec<Key>)> = Vec::new();
    for (branch, select) in branches.into_iter().enumerate() {
        let scope = build_scope(select, &[], &[]);
        let resolver = KeyResolver {
            scope: &scope,
            schemas,
        };
        let mut position = 0;
        for item in &select.projection {
            match item {
                SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } => {
                    let name = match item {
                        SelectItem::ExprWithAlias { alias, .. } => normalize_ident(alias),
                        _ => column_parts(expr).map(|(_, c)| c).unwrap_or_default(),
                    };
                    let key = column_parts_through_casts(expr)
                        .and_then(|(q, c)| resolver.key(q.as_deref(), &c));
                    if branch == 0 {
                        out.push((name, key.into_iter().collect()));
                    } else if let Some(slot) = out.get_mut(position) {
                        slot.1.extend(key);
                    }
                    position += 1;
                }
                SelectItem::Wildcard(_) if branch == 0 => {
                    for entry in scope.own() {
                        out.extend(wildcard_keys(entry, schemas));
                    }
                }
                SelectItem::QualifiedWildcard(name, _) if branch == 0 => {
                    let alias = object_base_name(name);
                    if let Some(entry) = scope.own().iter().find(|e| e.alias == alias) {
                        out.extend(wildcard_keys(entry, schemas));
                    }
                }
                _ => {}
            }
        }
    }
    out
}

fn wildcard_keys(entry: &ScopeEntry, schemas: &SchemaSet) -> Vec<(String, Vec<Key>)> {
    let Source::Base { table } = &entry.source else {
        return Vec::new();
    };
    schemas
        .get(table)
        .map(|t| {
            t.column_names()
                .map(|c| (c.to_string(), vec![(entry.alias.clone(), c.to_string())]))
                .collect()
        })
        .unwrap_or_default()
}

fn collect_branches<'q>(body: &'q SetExpr, out: &mut Vec<&'q Select>) {
    match body {
        SetExpr::Select(select) => out.push(select),
        SetExpr::Query(q) => collect_branches(&q.body, out),
        SetExpr::SetOperation { op, left, right, .. } => {
            collect_branches(left, out);
            if !matches!(op, SetOperator::Except) {
                collect_branches(right, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsynth_schema::{Heuristics, QueryAnalysis};
    use std::time::Duration;

    fn run(sql: &str, variant: u64) -> anyhow::Result<(Manifest, u64)> {
        let analysis = QueryAnalysis::analyze("q", sql, SqlDialect::Generic, &Heuristics::default(), None)?;
        let config = SynthConfig::default();
        let db = Database::in_memory()?;
        db.create_tables(&analysis.schemas)?;
        let solver = WitnessSolver::new(&analysis.schemas, SqlDialect::Generic, &config);
        let manifest = solver.solve("q", sql, variant)?;
        manifest.insert_into(&db, &analysis.schemas)?;
        let rows = db.probe(sql, 10, Duration::from_secs(5))?;
        Ok((manifest, rows))
    }

    #[test]
    fn join_and_literals_share_one_value() -> anyhow::Result<()> {
        let (manifest, rows) = run(
            "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id \
             WHERE c.state = 'WA' AND o.total > 100",
            0,
        )?;
        assert!(rows > 0);
        let customer = &manifest.tables["customers"][0];
        let order = &manifest.tables["orders"][0];
        assert_eq!(customer["id"], order["customer_id"]);
        assert_eq!(customer["state"], SqlValue::Text("WA".into()));
        assert!(order["total"].as_f64().unwrap_or_default() > 100.0);
        Ok(())
    }

    #[test]
    fn ctes_and_derived_tables_pass_values_through() -> anyhow::Result<()> {
        let (_, rows) = run(
            "WITH big AS (SELECT customer_id, total FROM orders WHERE total > 100) \
             SELECT c.state FROM big b JOIN customers c ON b.customer_id = c.id \
             WHERE c.state = 'WA' AND b.total < 500",
            0,
        )?;
        assert!(rows > 0);
        Ok(())
    }

    #[test]
    fn negated_branches_get_no_rows() -> anyhow::Result<()> {
        let (manifest, rows) = run(
            "SELECT * FROM orders o WHERE NOT EXISTS \
             (SELECT 1 FROM returns r WHERE r.order_id = o.id)",
            0,
        )?;
        assert!(rows > 0);
        assert!(!manifest.tables.contains_key("returns"));
        Ok(())
    }

    #[test]
    fn inequality_between_equal_anchors_is_resolved() -> anyhow::Result<()> {
        let (manifest, rows) = run(
            "SELECT * FROM item a JOIN item b ON a.i_brand_id = b.i_brand_id \
             WHERE a.i_item_sk <> b.i_item_sk",
            0,
        )?;
        assert!(rows > 0);
        assert_eq!(manifest.tables["item"].len(), 2);
        Ok(())
    }

    #[test]
    fn in_subquery_links_both_sides() -> anyhow::Result<()> {
        let (_, rows) = run(
            "SELECT * FROM customers c WHERE c.id IN \
             (SELECT o.customer_id FROM orders o WHERE o.total BETWEEN 10 AND 20)",
            0,
        )?;
        assert!(rows > 0);
        Ok(())
    }

    #[test]
    fn same_query_and_variant_give_identical_manifests() -> anyhow::Result<()> {
        let sql = "SELECT * FROM store_sales ss JOIN date_dim d ON ss.ss_sold_date_sk = d.d_date_sk \
                   WHERE d.d_year = 2000";
        let (a, _) = run(sql, 3)?;
        let (b, _) = run(sql, 3)?;
        assert_eq!(a.to_json()?, b.to_json()?);
        let (c, _) = run(sql, 4)?;
        assert_ne!(a.to_json()?, c.to_json()?);
        Ok(())
    }
}
