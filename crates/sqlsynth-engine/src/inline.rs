//! Flattening a query for the witness solver.
//!
//! Non-recursive CTEs are inlined as derived tables, every base table pulled
//! in through a CTE gets a scope-unique alias (`<base>_<cte>_<scope_id>`),
//! and any remaining alias that appears twice in the statement is renamed so
//! each alias names exactly one FROM item.

use std::collections::{BTreeMap, BTreeSet};

use sqlparser::ast::{
    Expr, Ident, Query, Select, SelectItem, SetExpr, Statement, TableAlias, TableFactor,
};
use sqlsynth_schema::ast::{
    child_exprs_mut, factor_alias, normalize_ident, object_base_name, select_exprs_mut,
    subqueries_mut, table_factors, table_factors_mut,
};
use sqlsynth_schema::{SchemaSet, SqlDialect};
use tracing::debug;

use crate::error::Result;
use crate::qualify::qualify_columns;

/// Parse, inline CTEs, make aliases unique and qualify bare columns.
pub fn flatten(sql: &str, dialect: SqlDialect, schemas: &SchemaSet) -> Result<Statement> {
    let mut stmt = dialect.parse_first_statement(sql)?;
    let inlined = inline_ctes(&mut stmt);
    let renamed = make_aliases_unique(&mut stmt);
    let qualified = qualify_columns(&mut stmt, schemas);
    debug!(inlined, renamed, qualified, "flattened query");
    Ok(stmt)
}

/// Replace every reference to a non-recursive CTE by a copy of its body.
pub fn inline_ctes(stmt: &mut Statement) -> usize {
    let Statement::Query(query) = stmt else {
        return 0;
    };
    let mut inliner = Inliner::default();
    inliner.query(query, &[]);
    inliner.inlined
}

#[derive(Clone)]
struct CteDef {
    name: String,
    body: Query,
    columns: Vec<Ident>,
}

#[derive(Default)]
struct Inliner {
    next_scope: usize,
    inlined: usize,
}

impl Inliner {
    fn query(&mut self, query: &mut Query, visible: &[CteDef]) {
        let mut scope = visible.to_vec();
        if let Some(with) = query.with.take() {
            if with.recursive {
                let shadowed: BTreeSet<String> =
                    with.cte_tables.iter().map(|c| normalize_ident(&c.alias.name)).collect();
                scope.retain(|d| !shadowed.contains(&d.name));
                query.with = Some(with);
            } else {
                for cte in with.cte_tables {
                    let name = normalize_ident(&cte.alias.name);
                    let mut body = *cte.query;
                    self.query(&mut body, &scope);
                    scope.retain(|d| d.name != name);
                    scope.push(CteDef {
                        name,
                        body,
                        columns: cte.alias.columns,
                    });
                }
            }
        }
        self.set_expr(&mut query.body, &scope);
        for order in &mut query.order_by {
            for q in subqueries_mut(&mut order.expr) {
                self.query(q, &scope);
            }
        }
    }

    fn set_expr(&mut self, body: &mut SetExpr, scope: &[CteDef]) {
        match body {
            SetExpr::Select(select) => self.select(select, scope),
            SetExpr::Query(q) => self.query(q, scope),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left, scope);
                self.set_expr(right, scope);
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &mut Select, scope: &[CteDef]) {
        for twj in &mut select.from {
            for factor in table_factors_mut(twj) {
                if let Some(replacement) = self.inlined_factor(factor, scope) {
                    *factor = replacement;
                    self.inlined += 1;
                } else if let TableFactor::Derived { subquery, .. } = factor {
                    self.query(subquery, scope);
                }
            }
        }
        for expr in select_exprs_mut(select) {
            for q in subqueries_mut(expr) {
                self.query(q, scope);
            }
        }
    }

    fn inlined_factor(&mut self, factor: &TableFactor, scope: &[CteDef]) -> Option<TableFactor> {
        let TableFactor::Table { name, alias, .. } = factor else {
            return None;
        };
        if name.0.len() != 1 {
            return None;
        }
        let cte_name = object_base_name(name);
        let def = scope.iter().rev().find(|d| d.name == cte_name)?;

        let mut body = def.body.clone();
        let next_scope = &mut self.next_scope;
        rename_factors(&mut body, &mut |factor, _| match factor {
            TableFactor::Table { name, .. } => {
                let id = *next_scope;
                *next_scope += 1;
                Some(format!("{}_{}_{id}", object_base_name(name), def.name))
            }
            _ => None,
        });

        let (alias_name, alias_columns) = match alias {
            Some(a) => (a.name.clone(), a.columns.clone()),
            None => (Ident::new(&def.name), Vec::new()),
        };
        let columns = if alias_columns.is_empty() {
            def.columns.clone()
        } else {
            alias_columns
        };
        apply_column_names(&mut body, &columns);
        Some(TableFactor::Derived {
            lateral: false,
            subquery: Box::new(body),
            alias: Some(TableAlias {
                name: alias_name,
                columns: Vec::new(),
            }),
        })
    }
}

/// Name the output columns of `query` positionally, through the leftmost
/// branch of a set operation.
fn apply_column_names(query: &mut Query, names: &[Ident]) {
    if names.is_empty() {
        return;
    }
    let Some(select) = leftmost_select(&mut query.body) else {
        return;
    };
    for (item, name) in select.projection.iter_mut().zip(names) {
        let expr = match item {
            SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => e.clone(),
            _ => return,
        };
        *item = SelectItem::ExprWithAlias {
            expr,
            alias: name.clone(),
        };
    }
}

fn leftmost_select(body: &mut SetExpr) -> Option<&mut Select> {
    match body {
        SetExpr::Select(select) => Some(select.as_mut()),
        SetExpr::SetOperation { left, .. } => leftmost_select(left),
        SetExpr::Query(q) => leftmost_select(&mut q.body),
        _ => None,
    }
}

/// Give each FROM item that appears again later in the statement a fresh
/// alias. Returns the number of renamed items.
pub fn make_aliases_unique(stmt: &mut Statement) -> usize {
    let Statement::Query(query) = stmt else {
        return 0;
    };
    let mut taken = BTreeSet::new();
    rename_factors(query, &mut |_, alias| {
        taken.insert(alias.to_string());
        None
    });

    let mut seen = BTreeSet::new();
    let mut renamed = 0;
    let mut counter = 1usize;
    rename_factors(query, &mut |factor, alias| {
        if seen.insert(alias.to_string()) {
            return None;
        }
        let stem = match factor {
            TableFactor::Table { name, .. } => object_base_name(name),
            _ => alias.to_string(),
        };
        let fresh = loop {
            let candidate = format!("{stem}_{counter}");
            counter += 1;
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(fresh.clone());
        seen.insert(fresh.clone());
        renamed += 1;
        Some(fresh)
    });
    renamed
}

type Decide<'a> = dyn FnMut(&TableFactor, &str) -> Option<String> + 'a;

/// Pre-order walk over every FROM item; `decide` may return a new alias,
/// which is applied together with every qualified reference to the old one.
fn rename_factors(query: &mut Query, decide: &mut Decide<'_>) {
    if let Some(with) = query.with.as_mut() {
        for cte in &mut with.cte_tables {
            rename_factors(&mut cte.query, decide);
        }
    }
    let map = rename_in_set_expr(&mut query.body, decide);
    if !map.is_empty() {
        for order in &mut query.order_by {
            requalify(&mut order.expr, &map);
        }
    }
}

fn rename_in_set_expr(body: &mut SetExpr, decide: &mut Decide<'_>) -> BTreeMap<String, String> {
    match body {
        SetExpr::Select(select) => rename_in_select(select, decide),
        SetExpr::Query(q) => {
            rename_factors(q, decide);
            BTreeMap::new()
        }
        SetExpr::SetOperation { left, right, .. } => {
            rename_in_set_expr(left, decide);
            rename_in_set_expr(right, decide);
            BTreeMap::new()
        }
        _ => BTreeMap::new(),
    }
}

fn rename_in_select(select: &mut Select, decide: &mut Decide<'_>) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for twj in &mut select.from {
        for factor in table_factors_mut(twj) {
            let Some(old) = factor_alias(factor) else {
                continue;
            };
            if let Some(new) = decide(factor, &old) {
                set_factor_alias(factor, &new);
                map.insert(old, new);
            }
        }
    }
    if !map.is_empty() {
        for item in &mut select.projection {
            if let SelectItem::QualifiedWildcard(name, _) = item {
                if let Some(last) = name.0.last_mut() {
                    if let Some(new) = map.get(&normalize_ident(last)) {
                        *last = Ident::new(new);
                    }
                }
            }
        }
        for expr in select_exprs_mut(select) {
            requalify(expr, &map);
        }
    }
    for twj in &mut select.from {
        for factor in table_factors_mut(twj) {
            if let TableFactor::Derived { subquery, .. } = factor {
                rename_factors(subquery, decide);
            }
        }
    }
    for expr in select_exprs_mut(select) {
        for q in subqueries_mut(expr) {
            rename_factors(q, decide);
        }
    }
    map
}

fn set_factor_alias(factor: &mut TableFactor, new: &str) {
    match factor {
        TableFactor::Table { alias, .. } | TableFactor::Derived { alias, .. } => {
            let columns = alias.take().map(|a| a.columns).unwrap_or_default();
            *alias = Some(TableAlias {
                name: Ident::new(new),
                columns,
            });
        }
        _ => {}
    }
}

fn requalify(expr: &mut Expr, map: &BTreeMap<String, String>) {
    match expr {
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let i = parts.len() - 2;
            if let Some(new) = map.get(&normalize_ident(&parts[i])) {
                parts[i] = Ident::new(new);
            }
        }
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
            requalify_correlated(subquery, map);
        }
        Expr::InSubquery {
            expr: lhs,
            subquery,
            ..
        } => {
            requalify(lhs, map);
            requalify_correlated(subquery, map);
        }
        other => {
            for child in child_exprs_mut(other) {
                requalify(child, map);
            }
        }
    }
}

/// Outer references inside a subquery, skipping aliases it redefines.
fn requalify_correlated(query: &mut Query, map: &BTreeMap<String, String>) {
    fn in_set_expr(body: &mut SetExpr, map: &BTreeMap<String, String>) {
        match body {
            SetExpr::Select(select) => {
                let own: BTreeSet<String> = select
                    .from
                    .iter()
                    .flat_map(table_factors)
                    .filter_map(factor_alias)
                    .collect();
                let visible: BTreeMap<String, String> = map
                    .iter()
                    .filter(|(old, _)| !own.contains(*old))
                    .map(|(a, b)| (a.clone(), b.clone()))
                    .collect();
                if visible.is_empty() {
                    return;
                }
                for expr in select_exprs_mut(select) {
                    requalify(expr, &visible);
                }
            }
            SetExpr::Query(q) => in_set_expr(&mut q.body, map),
            SetExpr::SetOperation { left, right, .. } => {
                in_set_expr(left, map);
                in_set_expr(right, map);
            }
            _ => {}
        }
    }
    in_set_expr(&mut query.body, map);
}

/// Alias → base table for every base FROM item of a flattened statement.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    aliases: BTreeMap<String, String>,
    tables: BTreeSet<String>,
}

impl AliasMap {
    pub fn build(stmt: &mut Statement, schemas: &SchemaSet) -> Self {
        let mut map = AliasMap {
            aliases: BTreeMap::new(),
            tables: schemas.table_names().map(str::to_string).collect(),
        };
        if let Statement::Query(query) = stmt {
            rename_factors(query, &mut |factor, alias| {
                if let TableFactor::Table { name, .. } = factor {
                    map.aliases.insert(alias.to_string(), object_base_name(name));
                }
                None
            });
        }
        map
    }

    /// Base table behind `alias`: the recorded FROM item, else the longest
    /// known table name the alias starts with.
    pub fn base_of(&self, alias: &str) -> Option<&str> {
        if let Some(base) = self.aliases.get(alias) {
            return Some(base);
        }
        self.tables
            .iter()
            .filter(|t| alias.starts_with(t.as_str()))
            .max_by_key(|t| t.len())
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(a, t)| (a.as_str(), t.as_str()))
    }
}
