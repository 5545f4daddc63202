//! Rewrites that let analytical SQL run on the SQLite synthetic database.
//!
//! Dates are stored as ISO text, so typed literals and date casts collapse to
//! plain strings and date arithmetic becomes SQLite's `date()` modifiers.

use sqlparser::ast::{
    BinaryOperator, DataType, DateTimeField, Expr, Query, Select, SetExpr, Statement, TableFactor,
    Value,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use sqlsynth_schema::ast::{child_exprs_mut, select_exprs_mut, table_factors_mut};
use sqlsynth_schema::filters::interval_parts;
use sqlsynth_schema::{fold_literal, Literal, SchemaError, SqlDialect};

/// Rewrite `stmt` in place for SQLite. Returns the number of rewrites.
pub fn sqlite_compatible(stmt: &mut Statement) -> usize {
    let mut count = 0;
    if let Statement::Query(query) = stmt {
        visit_query_exprs_mut(query, &mut |expr| {
            if let Some(rewritten) = rewrite(expr) {
                *expr = rewritten;
                count += 1;
            }
        });
    }
    count
}

/// Parse `sql` in `dialect` and print it back in a form SQLite accepts.
pub fn to_sqlite_sql(sql: &str, dialect: SqlDialect) -> Result<String, SchemaError> {
    let mut stmt = dialect.parse_first_statement(sql)?;
    sqlite_compatible(&mut stmt);
    Ok(stmt.to_string())
}

/// Post-order visit of every expression in a query, subqueries, CTE bodies
/// and derived tables included.
pub(crate) fn visit_query_exprs_mut(query: &mut Query, f: &mut dyn FnMut(&mut Expr)) {
    if let Some(with) = query.with.as_mut() {
        for cte in &mut with.cte_tables {
            visit_query_exprs_mut(&mut cte.query, f);
        }
    }
    visit_set_expr(&mut query.body, f);
    for order in &mut query.order_by {
        visit_expr(&mut order.expr, f);
    }
}

fn visit_set_expr(body: &mut SetExpr, f: &mut dyn FnMut(&mut Expr)) {
    match body {
        SetExpr::Select(select) => visit_select(select, f),
        SetExpr::Query(q) => visit_query_exprs_mut(q, f),
        SetExpr::SetOperation { left, right, .. } => {
            visit_set_expr(left, f);
            visit_set_expr(right, f);
        }
        _ => {}
    }
}

fn visit_select(select: &mut Select, f: &mut dyn FnMut(&mut Expr)) {
    for twj in &mut select.from {
        for factor in table_factors_mut(twj) {
            if let TableFactor::Derived { subquery, .. } = factor {
                visit_query_exprs_mut(subquery, f);
            }
        }
    }
    for expr in select_exprs_mut(select) {
        visit_expr(expr, f);
    }
}

fn visit_expr(expr: &mut Expr, f: &mut dyn FnMut(&mut Expr)) {
    match expr {
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => {
            visit_query_exprs_mut(subquery, f)
        }
        Expr::InSubquery { subquery, .. } => visit_query_exprs_mut(subquery, f),
        _ => {}
    }
    for child in child_exprs_mut(expr) {
        visit_expr(child, f);
    }
    f(expr);
}

fn parse_expr(text: &str) -> Option<Expr> {
    Parser::new(&GenericDialect {})
        .try_with_sql(text)
        .ok()?
        .parse_expr()
        .ok()
}

fn literal_expr(literal: Literal) -> Expr {
    match literal {
        Literal::Number(n) => Expr::Value(Value::Number(n, false)),
        Literal::String(s) => Expr::Value(Value::SingleQuotedString(s)),
        Literal::Boolean(b) => Expr::Value(Value::Boolean(b)),
    }
}

fn rewrite(expr: &Expr) -> Option<Expr> {
    match expr {
        Expr::TypedString { value, .. } => Some(Expr::Value(Value::SingleQuotedString(value.clone()))),
        Expr::Cast {
            expr: inner,
            data_type: DataType::Date | DataType::Timestamp(..) | DataType::Datetime(_),
            ..
        } => Some(inner.as_ref().clone()),
        Expr::BinaryOp { left, op, right } => {
            if matches!(
                op,
                BinaryOperator::Plus | BinaryOperator::Minus | BinaryOperator::Multiply | BinaryOperator::Divide
            ) {
                if let Some(folded) = fold_literal(expr) {
                    return Some(literal_expr(folded));
                }
            }
            let Expr::Interval(interval) = right.as_ref() else {
                return None;
            };
            let sign = match op {
                BinaryOperator::Plus => "+",
                BinaryOperator::Minus => "-",
                _ => return None,
            };
            let (amount, unit) = interval_parts(interval)?;
            let unit = unit.trim_end_matches('s');
            let (func, amount, unit) = match unit {
                "week" => ("date", amount * 7, "day"),
                "quarter" => ("date", amount * 3, "month"),
                "hour" | "minute" | "second" => ("datetime", amount, unit),
                other => ("date", amount, other),
            };
            parse_expr(&format!("{func}({left}, '{sign}{amount} {unit}s')"))
        }
        Expr::Extract { field, expr: inner } => {
            let text = match field {
                DateTimeField::Year => format!("CAST(strftime('%Y', {inner}) AS INTEGER)"),
                DateTimeField::Month => format!("CAST(strftime('%m', {inner}) AS INTEGER)"),
                DateTimeField::Day => format!("CAST(strftime('%d', {inner}) AS INTEGER)"),
                DateTimeField::Quarter => {
                    format!("((CAST(strftime('%m', {inner}) AS INTEGER) + 2) / 3)")
                }
                DateTimeField::Hour => format!("CAST(strftime('%H', {inner}) AS INTEGER)"),
                DateTimeField::Minute => format!("CAST(strftime('%M', {inner}) AS INTEGER)"),
                DateTimeField::Dow => format!("CAST(strftime('%w', {inner}) AS INTEGER)"),
                DateTimeField::Doy => format!("CAST(strftime('%j', {inner}) AS INTEGER)"),
                _ => return None,
            };
            parse_expr(&text)
        }
        Expr::ILike {
            negated,
            expr: inner,
            pattern,
            escape_char,
        } => Some(Expr::Like {
            negated: *negated,
            expr: inner.clone(),
            pattern: pattern.clone(),
            escape_char: *escape_char,
        }),
        Expr::Substring {
            expr: inner,
            substring_from,
            substring_for,
            ..
        } => {
            let from = substring_from
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "1".to_string());
            let text = match substring_for {
                Some(len) => format!("substr({inner}, {from}, {len})"),
                None => format!("substr({inner}, {from})"),
            };
            parse_expr(&text)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[test]
    fn date_literals_fold_to_iso_text() -> anyhow::Result<()> {
        let sql = to_sqlite_sql(
            "SELECT * FROM t WHERE d >= DATE '2000-01-01' \
             AND d < CAST('2000-01-01' AS DATE) + INTERVAL '30' DAY",
            SqlDialect::Generic,
        )?;
        assert!(sql.contains("d >= '2000-01-01'"), "{sql}");
        assert!(sql.contains("d < '2000-01-31'"), "{sql}");
        Ok(())
    }

    #[test]
    fn functions_map_onto_sqlite_builtins() -> anyhow::Result<()> {
        let sql = to_sqlite_sql(
            "SELECT EXTRACT(YEAR FROM d), SUBSTRING(name FROM 1 FOR 3) FROM t \
             WHERE name ILIKE 'a%' AND ship_date > d + INTERVAL '5' DAY",
            SqlDialect::Postgres,
        )?;
        assert!(sql.contains("CAST(strftime('%Y', d) AS INTEGER)"), "{sql}");
        assert!(sql.contains("substr(name, 1, 3)"), "{sql}");
        assert!(sql.contains("name LIKE 'a%'"), "{sql}");
        assert!(sql.contains("date(d, '+5 days')"), "{sql}");

        let db = Database::in_memory()?;
        db.execute_batch(
            "CREATE TABLE t (d DATE, name VARCHAR(10), ship_date DATE);\
             INSERT INTO t VALUES ('2000-01-01', 'abc', '2000-01-09');",
        )?;
        let rows = db.query_values(&sql)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], crate::value::SqlValue::Integer(2000));
        Ok(())
    }
}
