//! Alias scopes, CTE / derived-table lineage and column resolution.
//!
//! Every SELECT in a statement is visited exactly once with the [`Scope`] its
//! expressions resolve against: its own FROM items first, then the enclosing
//! scopes (for correlated references). FROM items are classified as base
//! tables, CTE references or derived tables; the latter two carry a
//! [`Lineage`] mapping output columns back to base columns when the output is
//! a direct pass-through.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sqlparser::ast::{
    Ident, Query, Select, SelectItem, SetExpr, SetOperator, Statement, TableFactor,
};

use crate::ast::{
    column_parts, factor_alias, normalize_ident, object_base_name, select_exprs, subqueries,
    table_factors, SubqueryKind,
};
use crate::names::{name_variants, tokenize};
use crate::schema::SchemaSet;

/// A column of a base table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.column)
    }
}

/// Output columns of a CTE or derived table, traced to base columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Lineage {
    /// Output column name → base column, when the output is a bare column.
    pub columns: Vec<(String, Option<ColumnRef>)>,
    /// Base tables exposed through `SELECT *`.
    pub passthrough: Vec<String>,
}

impl Lineage {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(name, _)| name == column)
    }

    pub fn resolve(&self, column: &str) -> Option<ColumnRef> {
        if let Some((_, base)) = self.columns.iter().find(|(name, _)| name == column) {
            return base.clone();
        }
        match self.passthrough.as_slice() {
            [table] => Some(ColumnRef::new(table.clone(), column)),
            _ => None,
        }
    }

    /// Apply a `name(c1, c2, …)` column list positionally.
    pub fn renamed(mut self, names: &[Ident]) -> Self {
        for (slot, name) in self.columns.iter_mut().zip(names) {
            slot.0 = normalize_ident(name);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Base { table: String },
    Cte { name: String, lineage: Lineage },
    Derived { lineage: Lineage },
}

impl Source {
    pub fn base_table(&self) -> Option<&str> {
        match self {
            Source::Base { table } => Some(table),
            _ => None,
        }
    }

    pub fn lineage(&self) -> Option<&Lineage> {
        match self {
            Source::Cte { lineage, .. } | Source::Derived { lineage } => Some(lineage),
            Source::Base { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry {
    pub alias: String,
    pub source: Source,
}

/// The FROM items visible to one SELECT.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    entries: Vec<ScopeEntry>,
    own: usize,
}

impl Scope {
    /// FROM items of the SELECT itself.
    pub fn own(&self) -> &[ScopeEntry] {
        &self.entries[..self.own]
    }

    /// Own entries followed by inherited (outer) entries.
    pub fn all(&self) -> &[ScopeEntry] {
        &self.entries
    }

    pub fn lookup(&self, alias: &str) -> Option<&ScopeEntry> {
        self.entries.iter().find(|e| e.alias == alias)
    }

    /// Base tables referenced directly by this SELECT.
    pub fn own_base_tables(&self) -> impl Iterator<Item = (&str, &str)> {
        self.own()
            .iter()
            .filter_map(|e| e.source.base_table().map(|t| (e.alias.as_str(), t)))
    }
}

/// Context flags for the SELECT being visited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkFlags {
    /// Inside a NOT EXISTS / NOT IN subquery or on the right of EXCEPT.
    pub negated: bool,
    /// The SELECT is the body of a scalar subquery.
    pub scalar: bool,
    /// Nesting depth (0 for the outermost SELECT).
    pub depth: usize,
}

impl WalkFlags {
    fn nested(self) -> Self {
        Self {
            negated: self.negated,
            scalar: false,
            depth: self.depth + 1,
        }
    }

    fn for_subquery(self, kind: SubqueryKind) -> Self {
        let nested = self.nested();
        match kind {
            SubqueryKind::Exists { negated } | SubqueryKind::In { negated } => Self {
                negated: nested.negated || negated,
                ..nested
            },
            SubqueryKind::Scalar => Self {
                scalar: true,
                ..nested
            },
        }
    }
}

pub trait SelectVisitor {
    fn visit_select(&mut self, select: &Select, scope: &Scope, flags: WalkFlags);
}

/// Visit every SELECT in a statement. Non-query statements visit nothing.
pub fn walk_statement(stmt: &Statement, visitor: &mut dyn SelectVisitor) {
    if let Statement::Query(q) = stmt {
        walk_query(q, visitor);
    }
}

pub fn walk_query(query: &Query, visitor: &mut dyn SelectVisitor) {
    let mut walker = Walker {
        ctes: Vec::new(),
        visitor,
    };
    walker.query(query, &[], WalkFlags::default());
}

struct Walker<'v> {
    ctes: Vec<(String, Lineage)>,
    visitor: &'v mut dyn SelectVisitor,
}

impl Walker<'_> {
    fn query(&mut self, query: &Query, outer: &[ScopeEntry], flags: WalkFlags) {
        let mark = self.ctes.len();
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                let name = normalize_ident(&cte.alias.name);
                let slot = self.ctes.len();
                if with.recursive {
                    self.ctes.push((name.clone(), Lineage::default()));
                }
                self.query(&cte.query, &[], flags.nested());
                let lineage = lineage_of_query(&cte.query, &self.ctes).renamed(&cte.alias.columns);
                if with.recursive {
                    self.ctes[slot].1 = lineage;
                } else {
                    self.ctes.push((name, lineage));
                }
            }
        }
        self.set_expr(&query.body, outer, flags);
        self.ctes.truncate(mark);
    }

    fn set_expr(&mut self, body: &SetExpr, outer: &[ScopeEntry], flags: WalkFlags) {
        match body {
            SetExpr::Select(select) => self.select(select, outer, flags),
            SetExpr::Query(q) => self.query(q, outer, flags),
            SetExpr::SetOperation {
                op, left, right, ..
            } => {
                self.set_expr(left, outer, flags);
                let right_flags = if matches!(op, SetOperator::Except) {
                    WalkFlags {
                        negated: true,
                        ..flags
                    }
                } else {
                    flags
                };
                self.set_expr(right, outer, right_flags);
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &Select, outer: &[ScopeEntry], flags: WalkFlags) {
        for twj in &select.from {
            for factor in table_factors(twj) {
                if let TableFactor::Derived { subquery, .. } = factor {
                    self.query(subquery, &[], flags.nested());
                }
            }
        }

        let scope = build_scope(select, &self.ctes, outer);
        self.visitor.visit_select(select, &scope, flags);

        for expr in select_exprs(select) {
            for (subquery, kind) in subqueries(expr) {
                self.query(subquery, scope.all(), flags.for_subquery(kind));
            }
        }
    }
}

/// Build the scope of one SELECT given the CTEs in force and the outer scope.
pub fn build_scope(select: &Select, ctes: &[(String, Lineage)], outer: &[ScopeEntry]) -> Scope {
    let mut entries = Vec::new();
    for twj in &select.from {
        for factor in table_factors(twj) {
            let Some(alias) = factor_alias(factor) else {
                continue;
            };
            let source = match factor {
                TableFactor::Table { name, .. } => {
                    let table = object_base_name(name);
                    let cte = (name.0.len() == 1)
                        .then(|| ctes.iter().rev().find(|(n, _)| *n == table))
                        .flatten();
                    match cte {
                        Some((n, lineage)) => Source::Cte {
                            name: n.clone(),
                            lineage: lineage.clone(),
                        },
                        None => Source::Base { table },
                    }
                }
                TableFactor::Derived {
                    subquery,
                    alias: table_alias,
                    ..
                } => {
                    let names = table_alias
                        .as_ref()
                        .map(|a| a.columns.as_slice())
                        .unwrap_or(&[]);
                    Source::Derived {
                        lineage: lineage_of_query(subquery, ctes).renamed(names),
                    }
                }
                _ => continue,
            };
            entries.push(ScopeEntry { alias, source });
        }
    }
    let own = entries.len();
    entries.extend(outer.iter().cloned());
    Scope { entries, own }
}

/// Trace the output columns of a query back to base columns.
pub fn lineage_of_query(query: &Query, ctes: &[(String, Lineage)]) -> Lineage {
    let mut local = ctes.to_vec();
    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            let lineage = lineage_of_query(&cte.query, &local).renamed(&cte.alias.columns);
            local.push((normalize_ident(&cte.alias.name), lineage));
        }
    }
    lineage_of_set_expr(&query.body, &local)
}

fn lineage_of_set_expr(body: &SetExpr, ctes: &[(String, Lineage)]) -> Lineage {
    match body {
        SetExpr::Select(select) => lineage_of_select(select, ctes),
        SetExpr::Query(q) => lineage_of_query(q, ctes),
        SetExpr::SetOperation { left, .. } => lineage_of_set_expr(left, ctes),
        _ => Lineage::default(),
    }
}

fn lineage_of_select(select: &Select, ctes: &[(String, Lineage)]) -> Lineage {
    let scope = build_scope(select, ctes, &[]);
    let resolver = ColumnResolver::new(&scope, None);
    let mut lineage = Lineage::default();

    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                if let Some((qualifier, column)) = column_parts(expr) {
                    let base = resolver.resolve(qualifier.as_deref(), &column);
                    lineage.columns.push((column, base));
                }
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                let base = column_parts(expr)
                    .and_then(|(qualifier, column)| resolver.resolve(qualifier.as_deref(), &column));
                lineage.columns.push((normalize_ident(alias), base));
            }
            SelectItem::Wildcard(_) => {
                for entry in scope.own() {
                    extend_with_source(&mut lineage, &entry.source);
                }
            }
            SelectItem::QualifiedWildcard(name, _) => {
                let alias = object_base_name(name);
                if let Some(entry) = scope.own().iter().find(|e| e.alias == alias) {
                    extend_with_source(&mut lineage, &entry.source);
                }
            }
        }
    }
    lineage
}

fn extend_with_source(lineage: &mut Lineage, source: &Source) {
    match source {
        Source::Base { table } => lineage.passthrough.push(table.clone()),
        Source::Cte { lineage: inner, .. } | Source::Derived { lineage: inner } => {
            lineage.columns.extend(inner.columns.iter().cloned());
            lineage.passthrough.extend(inner.passthrough.iter().cloned());
        }
    }
}

/// One link of the column-resolution chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// The qualifier (or the only FROM item) is a base table.
    ExactOwner,
    /// The qualifier is a CTE / derived table whose output passes a base column through.
    CteLineage,
    /// A single known table owns the name, or the column prefix names one.
    NamingHeuristic,
}

/// Resolves `qualifier.column` references within one scope.
///
/// Strategies are tried in the fixed order of [`ColumnResolver::CHAIN`]; an
/// unresolvable reference yields `None` rather than a guess.
pub struct ColumnResolver<'a> {
    scope: &'a Scope,
    schemas: Option<&'a SchemaSet>,
}

impl<'a> ColumnResolver<'a> {
    pub const CHAIN: [Strategy; 3] = [
        Strategy::ExactOwner,
        Strategy::CteLineage,
        Strategy::NamingHeuristic,
    ];

    pub fn new(scope: &'a Scope, schemas: Option<&'a SchemaSet>) -> Self {
        Self { scope, schemas }
    }

    pub fn resolve(&self, qualifier: Option<&str>, column: &str) -> Option<ColumnRef> {
        self.resolve_with_strategy(qualifier, column).map(|(r, _)| r)
    }

    pub fn resolve_with_strategy(
        &self,
        qualifier: Option<&str>,
        column: &str,
    ) -> Option<(ColumnRef, Strategy)> {
        Self::CHAIN.iter().find_map(|strategy| {
            self.apply(*strategy, qualifier, column)
                .map(|resolved| (resolved, *strategy))
        })
    }

    fn apply(&self, strategy: Strategy, qualifier: Option<&str>, column: &str) -> Option<ColumnRef> {
        match strategy {
            Strategy::ExactOwner => self.exact_owner(qualifier, column),
            Strategy::CteLineage => self.cte_lineage(qualifier, column),
            Strategy::NamingHeuristic => self.naming_heuristic(qualifier, column),
        }
    }

    fn exact_owner(&self, qualifier: Option<&str>, column: &str) -> Option<ColumnRef> {
        if let Some(q) = qualifier {
            let table = self.scope.lookup(q)?.source.base_table()?;
            return Some(ColumnRef::new(table, column));
        }
        let own = self.scope.own();
        if let [only] = own {
            return only
                .source
                .base_table()
                .map(|table| ColumnRef::new(table, column));
        }
        let schemas = self.schemas?;
        let mut owners = self
            .scope
            .own_base_tables()
            .map(|(_, table)| table)
            .filter(|table| schemas.get(table).is_some_and(|s| s.has_column(column)))
            .collect::<BTreeSet<_>>()
            .into_iter();
        match (owners.next(), owners.next()) {
            (Some(table), None) => Some(ColumnRef::new(table, column)),
            _ => None,
        }
    }

    fn cte_lineage(&self, qualifier: Option<&str>, column: &str) -> Option<ColumnRef> {
        if let Some(q) = qualifier {
            return self.scope.lookup(q)?.source.lineage()?.resolve(column);
        }
        let own = self.scope.own();
        if let [only] = own {
            return only.source.lineage()?.resolve(column);
        }
        let mut candidates = own
            .iter()
            .filter_map(|e| e.source.lineage())
            .filter(|l| l.has_column(column));
        match (candidates.next(), candidates.next()) {
            (Some(lineage), None) => lineage.resolve(column),
            _ => None,
        }
    }

    fn naming_heuristic(&self, qualifier: Option<&str>, column: &str) -> Option<ColumnRef> {
        if qualifier.is_some() {
            return None;
        }
        if let Some(schemas) = self.schemas {
            let mut owners = schemas.owners_of(column);
            if let (Some(table), None) = (owners.next(), owners.next()) {
                return Some(ColumnRef::new(table, column));
            }
        }

        let prefix = tokenize(column).into_iter().next()?;
        let mut matches = self
            .scope
            .all()
            .iter()
            .filter_map(|e| e.source.base_table())
            .filter(|table| name_variants(table).contains(&prefix))
            .collect::<BTreeSet<_>>()
            .into_iter();
        match (matches.next(), matches.next()) {
            (Some(table), None) => Some(ColumnRef::new(table, column)),
            _ => None,
        }
    }
}
