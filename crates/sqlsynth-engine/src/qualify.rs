//! Column qualification.
//!
//! Bare column references become `alias.column` whenever exactly one FROM
//! item of their own SELECT exposes the column. Correlated references and
//! projection aliases are left alone.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use sqlparser::ast::{Expr, Ident, Query, Select, SelectItem, SetExpr, Statement, TableFactor};
use sqlsynth_schema::ast::{child_exprs_mut, normalize_ident, select_exprs_mut, table_factors_mut};
use sqlsynth_schema::scope::{build_scope, lineage_of_query, Lineage, Scope, ScopeEntry, Source};
use sqlsynth_schema::{SchemaSet, SqlDialect};
use tracing::debug;

/// Qualify every unambiguous bare column. Returns the number rewritten.
pub fn qualify_columns(stmt: &mut Statement, schemas: &SchemaSet) -> usize {
    run(stmt, schemas, None)
}

/// Qualify one column name everywhere, taking the first owning FROM item
/// when several expose it.
pub fn qualify_column(stmt: &mut Statement, schemas: &SchemaSet, column: &str) -> usize {
    run(stmt, schemas, Some(column))
}

fn run(stmt: &mut Statement, schemas: &SchemaSet, only: Option<&str>) -> usize {
    let Statement::Query(query) = stmt else {
        return 0;
    };
    let mut qualifier = Qualifier {
        schemas,
        only,
        ctes: Vec::new(),
        rewritten: 0,
    };
    qualifier.query(query, &[]);
    qualifier.rewritten
}

/// Column named by an engine "ambiguous column" error, if any.
pub fn ambiguous_column_hint(message: &str) -> Option<String> {
    static HINT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = HINT
        .get_or_init(|| Regex::new(r#"(?i)ambiguous column(?: name)?:?\s*"?([A-Za-z0-9_.]+)"?"#).ok())
        .as_ref()?;
    let raw = re.captures(message)?.get(1)?.as_str();
    raw.rsplit('.').next().map(str::to_ascii_lowercase)
}

/// Rewrite `sql` so the column an ambiguity error names is qualified.
/// `None` when the message carries no hint or nothing changed.
pub fn repair_ambiguous(
    sql: &str,
    message: &str,
    dialect: SqlDialect,
    schemas: &SchemaSet,
) -> Option<String> {
    let column = ambiguous_column_hint(message)?;
    let mut stmt = dialect.parse_first_statement(sql).ok()?;
    let changed = qualify_column(&mut stmt, schemas, &column);
    debug!(column = %column, changed, "ambiguous column repair");
    (changed > 0).then(|| stmt.to_string())
}

struct Qualifier<'a> {
    schemas: &'a SchemaSet,
    only: Option<&'a str>,
    ctes: Vec<(String, Lineage)>,
    rewritten: usize,
}

impl Qualifier<'_> {
    fn query(&mut self, query: &mut Query, outer: &[ScopeEntry]) {
        let mark = self.ctes.len();
        if let Some(with) = query.with.as_mut() {
            let recursive = with.recursive;
            for cte in &mut with.cte_tables {
                let name = normalize_ident(&cte.alias.name);
                if recursive {
                    self.ctes.push((name.clone(), Lineage::default()));
                }
                self.query(&mut cte.query, &[]);
                let lineage = lineage_of_query(&cte.query, &self.ctes).renamed(&cte.alias.columns);
                match self.ctes.iter_mut().rev().find(|(n, _)| *n == name) {
                    Some(slot) if recursive => slot.1 = lineage,
                    _ => self.ctes.push((name, lineage)),
                }
            }
        }
        self.set_expr(&mut query.body, outer);
        self.ctes.truncate(mark);
    }

    fn set_expr(&mut self, body: &mut SetExpr, outer: &[ScopeEntry]) {
        match body {
            SetExpr::Select(select) => self.select(select, outer),
            SetExpr::Query(q) => self.query(q, outer),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left, outer);
                self.set_expr(right, outer);
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &mut Select, outer: &[ScopeEntry]) {
        for twj in &mut select.from {
            for factor in table_factors_mut(twj) {
                if let TableFactor::Derived { subquery, .. } = factor {
                    self.query(subquery, &[]);
                }
            }
        }
        let scope = build_scope(select, &self.ctes, outer);
        let aliases: BTreeSet<String> = select
            .projection
            .iter()
            .filter_map(|item| match item {
                SelectItem::ExprWithAlias { alias, .. } => Some(normalize_ident(alias)),
                _ => None,
            })
            .collect();
        for expr in select_exprs_mut(select) {
            self.expr(expr, &scope, &aliases);
        }
    }

    fn expr(&mut self, expr: &mut Expr, scope: &Scope, aliases: &BTreeSet<String>) {
        if let Expr::Identifier(id) = expr {
            let id = id.clone();
            if let Some(alias) = self.owner(scope, &normalize_ident(&id), aliases) {
                *expr = Expr::CompoundIdentifier(vec![Ident::new(alias), id]);
                self.rewritten += 1;
            }
            return;
        }
        match expr {
            Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
                self.query(subquery, scope.all());
            }
            Expr::InSubquery {
                expr: lhs,
                subquery,
                ..
            } => {
                self.expr(lhs, scope, aliases);
                self.query(subquery, scope.all());
            }
            other => {
                for child in child_exprs_mut(other) {
                    self.expr(child, scope, aliases);
                }
            }
        }
    }

    fn owner(&self, scope: &Scope, column: &str, aliases: &BTreeSet<String>) -> Option<String> {
        match self.only {
            Some(only) if only != column => return None,
            None if aliases.contains(column) => return None,
            _ => {}
        }
        let candidates: Vec<&ScopeEntry> = scope
            .own()
            .iter()
            .filter(|e| self.exposes(&e.source, column))
            .collect();
        match candidates.as_slice() {
            [one] => Some(one.alias.clone()),
            [first, ..] if self.only.is_some() => Some(first.alias.clone()),
            _ => None,
        }
    }

    fn exposes(&self, source: &Source, column: &str) -> bool {
        let table_has = |table: &str| self.schemas.get(table).is_some_and(|t| t.has_column(column));
        match source {
            Source::Base { table } => table_has(table),
            Source::Cte { lineage, .. } | Source::Derived { lineage } => {
                lineage.has_column(column) || lineage.passthrough.iter().any(|t| table_has(t))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsynth_schema::{ColumnSpec, Heuristics};

    fn schemas() -> SchemaSet {
        let h = Heuristics::default();
        let mut s = SchemaSet::default();
        for (table, cols) in [
            ("orders", &["id", "customer_id", "total"][..]),
            ("customers", &["id", "state"][..]),
        ] {
            let t = s.table_entry(table);
            for c in cols {
                t.push_column(ColumnSpec::inferred(c, &h));
            }
        }
        s
    }

    #[test]
    fn unambiguous_columns_gain_their_alias() -> anyhow::Result<()> {
        let mut stmt = SqlDialect::Generic.parse_first_statement(
            "SELECT state, total AS t FROM orders o JOIN customers c ON customer_id = c.id \
             WHERE state = 'WA' ORDER BY t",
        )?;
        let n = qualify_columns(&mut stmt, &schemas());
        assert_eq!(n, 4);
        let text = stmt.to_string();
        assert!(text.contains("c.state = 'WA'"), "{text}");
        assert!(text.contains("o.customer_id = c.id"), "{text}");
        Ok(())
    }

    #[test]
    fn ambiguity_hint_drives_one_repair() {
        assert_eq!(
            ambiguous_column_hint("ambiguous column name: id"),
            Some("id".to_string())
        );
        assert_eq!(ambiguous_column_hint("no such table: x"), None);
        let repaired = repair_ambiguous(
            "SELECT id FROM orders o JOIN customers c ON o.customer_id = c.id",
            "ambiguous column name: id",
            SqlDialect::Generic,
            &schemas(),
        );
        assert_eq!(
            repaired.as_deref(),
            Some("SELECT o.id FROM orders AS o JOIN customers AS c ON o.customer_id = c.id")
        );
    }
}
