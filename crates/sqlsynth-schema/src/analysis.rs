//! Per-query and per-corpus analysis: everything the synthesizers need from
//! the SQL text, computed once.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sqlparser::ast::{BinaryOperator, Expr, GroupByExpr, Select, SelectItem, Statement};
use tracing::debug;

use crate::ast::{
    child_exprs, column_parts, column_parts_through_casts, conjuncts, is_aggregate_call,
    normalize_ident, object_base_name, select_predicates,
};
use crate::ddl::ReferenceCatalog;
use crate::dialect::SqlDialect;
use crate::filters::{extract_filter_values, fold_literal, FilterSet, Literal};
use crate::fk::KeyModel;
use crate::heuristics::{Heuristics, TypeOrigin};
use crate::joins::{column_equality, extract_join_edges, JoinEdge};
use crate::schema::{extract_schema, SchemaSet};
use crate::scope::{walk_statement, ColumnRef, ColumnResolver, Scope, SelectVisitor, WalkFlags};
use crate::types::CanonicalType;
use crate::SchemaError;

/// Columns a scalar subquery selects by; rows must be unique on them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScalarKey {
    pub table: String,
    pub columns: Vec<String>,
}

/// A lower bound on `stddev(x) / avg(x)` required by the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateBound {
    pub column: ColumnRef,
    pub min_cv: f64,
}

/// Facts about one query.
#[derive(Debug, Clone)]
pub struct QueryAnalysis {
    pub name: String,
    pub sql: String,
    pub statement: Statement,
    pub schemas: SchemaSet,
    pub filters: FilterSet,
    /// Equalities from non-negated branches.
    pub joins: Vec<JoinEdge>,
    /// Equalities from every branch; used for key inference.
    pub all_joins: Vec<JoinEdge>,
    pub scalar_keys: Vec<ScalarKey>,
    /// Tables referenced from NOT EXISTS / NOT IN / EXCEPT branches.
    pub negated_tables: BTreeSet<String>,
    /// Tables referenced from non-negated branches.
    pub positive_tables: BTreeSet<String>,
    /// `a <> b` between two base columns.
    pub not_equal: Vec<(ColumnRef, ColumnRef)>,
    pub aggregate_bounds: Vec<AggregateBound>,
}

impl QueryAnalysis {
    pub fn analyze(
        name: impl Into<String>,
        sql: &str,
        dialect: SqlDialect,
        heuristics: &Heuristics,
        reference: Option<&dyn ReferenceCatalog>,
    ) -> Result<Self, SchemaError> {
        let statement = dialect.parse_first_statement(sql)?;
        if !matches!(statement, Statement::Query(_)) {
            return Err(SchemaError::UnsupportedStatement(statement.to_string()));
        }

        let mut schemas = extract_schema(&statement, heuristics);
        if let Some(catalog) = reference {
            schemas.apply_reference(catalog);
        }
        let filters = extract_filter_values(&statement, &schemas);
        refine_types_from_literals(&mut schemas, &filters);

        let joins = extract_join_edges(&statement, Some(&schemas), false);
        let all_joins = extract_join_edges(&statement, Some(&schemas), true);

        let mut facts = FactCollector {
            schemas: &schemas,
            facts: Facts::default(),
        };
        walk_statement(&statement, &mut facts);
        let facts = facts.facts;

        Ok(Self {
            name: name.into(),
            sql: sql.to_string(),
            statement,
            schemas,
            filters,
            joins,
            all_joins,
            scalar_keys: facts.scalar_keys,
            negated_tables: facts.negated_tables,
            positive_tables: facts.positive_tables,
            not_equal: facts.not_equal,
            aggregate_bounds: facts.aggregate_bounds,
        })
    }

    /// Tables that only ever appear inside negated branches.
    pub fn negated_only_tables(&self) -> BTreeSet<String> {
        self.negated_tables
            .difference(&self.positive_tables)
            .cloned()
            .collect()
    }

    pub fn keys(&self) -> KeyModel {
        KeyModel::build(&self.schemas, &self.all_joins)
    }
}

/// A corpus sharing one database: merged schemas, filters and keys.
#[derive(Debug, Clone, Default)]
pub struct CorpusAnalysis {
    pub queries: Vec<QueryAnalysis>,
    pub schemas: SchemaSet,
    pub filters: FilterSet,
    pub joins: Vec<JoinEdge>,
    pub keys: KeyModel,
    pub scalar_keys: Vec<ScalarKey>,
}

impl CorpusAnalysis {
    pub fn new(queries: Vec<QueryAnalysis>, reference: Option<&dyn ReferenceCatalog>) -> Self {
        let mut schemas = SchemaSet::default();
        let mut filters = FilterSet::default();
        let mut joins: Vec<JoinEdge> = Vec::new();
        let mut all_joins: Vec<JoinEdge> = Vec::new();
        let mut scalar_keys: Vec<ScalarKey> = Vec::new();

        for q in &queries {
            schemas.merge(&q.schemas);
            filters.extend(&q.filters);
            for edge in &q.joins {
                if !joins.contains(edge) {
                    joins.push(edge.clone());
                }
            }
            for edge in &q.all_joins {
                if !all_joins.contains(edge) {
                    all_joins.push(edge.clone());
                }
            }
            for key in &q.scalar_keys {
                if !scalar_keys.contains(key) {
                    scalar_keys.push(key.clone());
                }
            }
        }
        if let Some(catalog) = reference {
            schemas.apply_reference(catalog);
        }
        let keys = KeyModel::build(&schemas, &all_joins);
        debug!(
            tables = schemas.len(),
            fks = keys.foreign_keys.len(),
            "corpus schema merged"
        );
        Self {
            queries,
            schemas,
            filters,
            joins,
            keys,
            scalar_keys,
        }
    }
}

/// Columns that fell back to the default text type but are compared against
/// numeric or ISO-date literals take the literal's type. An inferred integer
/// compared only against fractional numbers widens to the default decimal.
pub fn refine_types_from_literals(schemas: &mut SchemaSet, filters: &FilterSet) {
    for (column, values) in filters.iter() {
        let literals: Vec<&Literal> = values.iter().flat_map(|f| f.literals()).collect();
        if literals.is_empty() {
            continue;
        }
        let refined = if literals.iter().all(|l| matches!(l, Literal::Number(_))) {
            if literals.iter().all(|l| l.is_integral()) {
                CanonicalType::Integer
            } else {
                CanonicalType::DEFAULT_DECIMAL
            }
        } else if literals.iter().all(|l| l.as_date().is_some()) {
            CanonicalType::Date
        } else {
            continue;
        };
        let Some(spec) = schemas
            .get_mut(&column.table)
            .and_then(|t| t.column_mut(&column.column))
        else {
            continue;
        };
        let widens = refined == CanonicalType::DEFAULT_DECIMAL
            && matches!(spec.data_type, CanonicalType::Integer | CanonicalType::BigInt)
            && spec.origin != TypeOrigin::Reference;
        if spec.origin == TypeOrigin::Fallback || widens {
            debug!(%column, %refined, "type refined from literal");
            spec.data_type = refined;
            spec.origin = TypeOrigin::Literal;
        }
    }
}

#[derive(Default)]
struct Facts {
    scalar_keys: Vec<ScalarKey>,
    negated_tables: BTreeSet<String>,
    positive_tables: BTreeSet<String>,
    not_equal: Vec<(ColumnRef, ColumnRef)>,
    aggregate_bounds: Vec<AggregateBound>,
    /// Output names of `stddev(x)/avg(x)` projections, by alias.
    cv_aliases: BTreeMap<String, ColumnRef>,
}

struct FactCollector<'a> {
    schemas: &'a SchemaSet,
    facts: Facts,
}

impl SelectVisitor for FactCollector<'_> {
    fn visit_select(&mut self, select: &Select, scope: &Scope, flags: WalkFlags) {
        let tables = if flags.negated {
            &mut self.facts.negated_tables
        } else {
            &mut self.facts.positive_tables
        };
        for (_, table) in scope.own_base_tables() {
            tables.insert(table.to_string());
        }
        if flags.negated {
            return;
        }

        let resolver = ColumnResolver::new(scope, Some(self.schemas));

        for item in &select.projection {
            if let SelectItem::ExprWithAlias { expr, alias } = item {
                if let Some((q, c)) = cv_argument(expr) {
                    if let Some(column) = resolver.resolve(q.as_deref(), &c) {
                        self.facts.cv_aliases.insert(normalize_ident(alias), column);
                    }
                }
            }
        }

        for predicate in select_predicates(select) {
            for conjunct in conjuncts(predicate) {
                self.not_equal(conjunct, &resolver);
                self.aggregate_bound(conjunct, &resolver);
            }
        }

        if flags.scalar {
            if let Some(key) = scalar_key(select, scope, &resolver) {
                if !self.facts.scalar_keys.contains(&key) {
                    self.facts.scalar_keys.push(key);
                }
            }
        }
    }
}

impl FactCollector<'_> {
    fn not_equal(&mut self, expr: &Expr, resolver: &ColumnResolver<'_>) {
        let Expr::BinaryOp {
            left,
            op: BinaryOperator::NotEq,
            right,
        } = expr
        else {
            return;
        };
        let (Some(l), Some(r)) = (
            column_parts_through_casts(left),
            column_parts_through_casts(right),
        ) else {
            return;
        };
        if let (Some(a), Some(b)) = (
            resolver.resolve(l.0.as_deref(), &l.1),
            resolver.resolve(r.0.as_deref(), &r.1),
        ) {
            self.facts.not_equal.push((a, b));
        }
    }

    fn aggregate_bound(&mut self, expr: &Expr, resolver: &ColumnResolver<'_>) {
        let Expr::BinaryOp { left, op, right } = expr else {
            return;
        };
        if !matches!(op, BinaryOperator::Gt | BinaryOperator::GtEq) {
            return;
        }
        let Some(min_cv) = fold_literal(right).and_then(|l| l.as_f64()) else {
            return;
        };
        let column = match cv_argument(left) {
            Some((q, c)) => resolver.resolve(q.as_deref(), &c),
            None => column_parts(left).and_then(|(_, c)| self.facts.cv_aliases.get(&c).cloned()),
        };
        if let Some(column) = column {
            self.facts.aggregate_bounds.push(AggregateBound { column, min_cv });
        }
    }
}

/// The column `x` of a `stddev(x) / avg(x)` expression, looking through
/// CASE branches and parentheses.
fn cv_argument(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Nested(inner) => cv_argument(inner),
        Expr::Case {
            results,
            else_result,
            ..
        } => results
            .iter()
            .chain(else_result.as_deref())
            .find_map(cv_argument),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Divide,
            right,
        } => {
            let num = aggregate_argument(left, &["stddev", "stddev_samp", "stddev_pop"])?;
            let den = aggregate_argument(right, &["avg"])?;
            (num.1 == den.1).then_some(num)
        }
        _ => None,
    }
}

fn aggregate_argument(expr: &Expr, names: &[&str]) -> Option<(Option<String>, String)> {
    let expr = match expr {
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => inner,
        other => other,
    };
    let Expr::Function(f) = expr else {
        return None;
    };
    if !names.contains(&object_base_name(&f.name).as_str()) {
        return None;
    }
    child_exprs(expr)
        .into_iter()
        .next()
        .and_then(column_parts_through_casts)
}

/// Key columns of a scalar subquery over a single base table: its GROUP BY
/// columns plus every column it equates to a literal or an outer column.
/// Aggregates without GROUP BY already return one row.
fn scalar_key(select: &Select, scope: &Scope, resolver: &ColumnResolver<'_>) -> Option<ScalarKey> {
    let mut own = scope.own_base_tables();
    let (_, table) = own.next()?;
    if own.next().is_some() || scope.own().len() != 1 {
        return None;
    }
    let aggregated = select.projection.iter().any(|item| match item {
        SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => {
            is_aggregate_call(e)
        }
        _ => false,
    });
    let group_by: Vec<&Expr> = match &select.group_by {
        GroupByExpr::Expressions(exprs) => exprs.iter().collect(),
        _ => Vec::new(),
    };
    if aggregated && group_by.is_empty() {
        return None;
    }

    let mut columns: Vec<String> = Vec::new();
    let mut add = |c: Option<ColumnRef>| {
        if let Some(c) = c {
            if c.table == table && !columns.contains(&c.column) {
                columns.push(c.column);
            }
        }
    };
    for expr in group_by {
        if let Some((q, c)) = column_parts_through_casts(expr) {
            add(resolver.resolve(q.as_deref(), &c));
        }
    }
    if let Some(selection) = &select.selection {
        for conjunct in conjuncts(selection) {
            if let Some((l, r)) = column_equality(conjunct) {
                for (q, c) in [l, r] {
                    let local = match q.as_deref() {
                        Some(alias) => scope.own().iter().any(|e| e.alias == alias),
                        None => true,
                    };
                    if local {
                        add(resolver.resolve(q.as_deref(), &c));
                    }
                }
            } else if let Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } = conjunct
            {
                let side = column_parts_through_casts(left)
                    .filter(|_| fold_literal(right).is_some())
                    .or_else(|| {
                        column_parts_through_casts(right).filter(|_| fold_literal(left).is_some())
                    });
                if let Some((q, c)) = side {
                    add(resolver.resolve(q.as_deref(), &c));
                }
            }
        }
    }
    (!columns.is_empty()).then(|| ScalarKey {
        table: table.to_string(),
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(sql: &str) -> anyhow::Result<QueryAnalysis> {
        Ok(QueryAnalysis::analyze(
            "q",
            sql,
            SqlDialect::Generic,
            &Heuristics::default(),
            None,
        )?)
    }

    #[test]
    fn rejects_non_queries() {
        assert!(matches!(
            analyze("CREATE TABLE t (a INT)").map_err(|e| e.downcast::<SchemaError>().ok()),
            Err(Some(SchemaError::UnsupportedStatement(_)))
        ));
    }

    #[test]
    fn scalar_subquery_keys() -> anyhow::Result<()> {
        let q = analyze(
            "SELECT * FROM store_sales ss WHERE ss.ss_sold_date_sk = \
             (SELECT d_date_sk FROM date_dim WHERE d_date = '2000-01-03')",
        )?;
        assert_eq!(
            q.scalar_keys,
            vec![ScalarKey {
                table: "date_dim".into(),
                columns: vec!["d_date".into()]
            }]
        );
        Ok(())
    }

    #[test]
    fn aggregate_scalar_without_group_by_has_no_key() -> anyhow::Result<()> {
        let q = analyze("SELECT * FROM t WHERE t.v > (SELECT avg(v) FROM t WHERE k = 3)")?;
        assert!(q.scalar_keys.is_empty());
        Ok(())
    }

    #[test]
    fn negated_tables_and_not_equal() -> anyhow::Result<()> {
        let q = analyze(
            "SELECT * FROM a WHERE a.x <> a.y AND NOT EXISTS (SELECT 1 FROM b WHERE b.k = a.k)",
        )?;
        assert_eq!(q.negated_only_tables(), BTreeSet::from(["b".to_string()]));
        assert_eq!(
            q.not_equal,
            vec![(ColumnRef::new("a", "x"), ColumnRef::new("a", "y"))]
        );
        Ok(())
    }

    #[test]
    fn coefficient_of_variation_bound_through_cte() -> anyhow::Result<()> {
        let q = analyze(
            "WITH inv AS (SELECT w_warehouse_sk, stddev_samp(inv_quantity_on_hand) / avg(inv_quantity_on_hand) AS cov \
             FROM inventory GROUP BY w_warehouse_sk) SELECT * FROM inv WHERE cov > 1.5",
        )?;
        assert_eq!(
            q.aggregate_bounds,
            vec![AggregateBound {
                column: ColumnRef::new("inventory", "inv_quantity_on_hand"),
                min_cv: 1.5
            }]
        );
        Ok(())
    }

    #[test]
    fn fallback_columns_take_literal_types() -> anyhow::Result<()> {
        let q = analyze("SELECT * FROM t WHERE t.zzyzx = 42 AND t.qqv = 3.5 AND t.wwx > '2001-02-03'")?;
        let ty = |c: &str| q.schemas.get("t").and_then(|t| t.column(c)).map(|c| c.data_type);
        assert_eq!(ty("zzyzx"), Some(CanonicalType::Integer));
        assert_eq!(ty("qqv"), Some(CanonicalType::DEFAULT_DECIMAL));
        assert_eq!(ty("wwx"), Some(CanonicalType::Date));
        Ok(())
    }

    #[test]
    fn inferred_integers_widen_for_fractional_literals() -> anyhow::Result<()> {
        assert_eq!(
            Heuristics::default().infer_type("qty"),
            (CanonicalType::Integer, TypeOrigin::Lexical)
        );
        let q = analyze("SELECT * FROM t WHERE t.qty = 2.5")?;
        let spec = |c: &str| q.schemas.get("t").and_then(|t| t.column(c)).cloned();
        let qty = spec("qty").ok_or_else(|| anyhow::anyhow!("qty missing"))?;
        assert_eq!(qty.data_type, CanonicalType::DEFAULT_DECIMAL);
        assert_eq!(qty.origin, TypeOrigin::Literal);
        Ok(())
    }

    #[test]
    fn reference_integers_are_not_widened() -> anyhow::Result<()> {
        let catalog = crate::ddl::DdlCatalog::parse("CREATE TABLE t (qty INTEGER);", SqlDialect::Generic)?;
        let q = QueryAnalysis::analyze(
            "q",
            "SELECT * FROM t WHERE t.qty = 2.5",
            SqlDialect::Generic,
            &Heuristics::default(),
            Some(&catalog),
        )?;
        let ty = q.schemas.get("t").and_then(|t| t.column("qty")).map(|c| c.data_type);
        assert_eq!(ty, Some(CanonicalType::Integer));
        Ok(())
    }

    #[test]
    fn corpus_merges_tables_and_keys() -> anyhow::Result<()> {
        let a = analyze("SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id WHERE c.state = 'WA'")?;
        let b = analyze("SELECT * FROM customers WHERE state = 'CA'")?;
        let corpus = CorpusAnalysis::new(vec![a, b], None);
        assert_eq!(corpus.keys.order, vec!["customers", "orders"]);
        assert_eq!(
            corpus
                .filters
                .get(&ColumnRef::new("customers", "state"))
                .map(|f| f.len()),
            Some(2)
        );
        Ok(())
    }
}
