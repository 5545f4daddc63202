//! Small traversal helpers over `sqlparser` ASTs.
//!
//! `sqlparser` exposes a very wide `Expr` enum. The helpers here cover the
//! shapes that can carry column references, literals or subqueries in
//! analytical SELECT statements; everything else is treated as opaque.

use sqlparser::ast::{
    BinaryOperator, Expr, FunctionArg, FunctionArgExpr, GroupByExpr, Ident, JoinConstraint,
    JoinOperator, ObjectName, Query, Select, SelectItem, TableFactor, TableWithJoins,
    UnaryOperator,
};

/// How a subquery is embedded in its parent expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubqueryKind {
    Exists { negated: bool },
    In { negated: bool },
    Scalar,
}

pub fn normalize_ident(ident: &Ident) -> String {
    ident.value.to_ascii_lowercase()
}

/// Last component of a (possibly schema-qualified) object name, lowercased.
pub fn object_base_name(name: &ObjectName) -> String {
    name.0.last().map(normalize_ident).unwrap_or_default()
}

/// `(qualifier, column)` for a bare or qualified column reference.
pub fn column_parts(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Identifier(id) => Some((None, normalize_ident(id))),
        Expr::CompoundIdentifier(parts) if parts.len() >= 2 => {
            let column = normalize_ident(&parts[parts.len() - 1]);
            let qualifier = normalize_ident(&parts[parts.len() - 2]);
            Some((Some(qualifier), column))
        }
        Expr::Nested(inner) => column_parts(inner),
        _ => None,
    }
}

/// Like [`column_parts`] but also looks through casts, so `CAST(c AS DATE)`
/// still names column `c`.
pub fn column_parts_through_casts(expr: &Expr) -> Option<(Option<String>, String)> {
    match expr {
        Expr::Cast { expr, .. } => column_parts_through_casts(expr),
        Expr::Nested(inner) => column_parts_through_casts(inner),
        other => column_parts(other),
    }
}

/// Split a predicate into its top-level AND conjuncts.
pub fn conjuncts(expr: &Expr) -> Vec<&Expr> {
    let mut out = Vec::new();
    push_conjuncts(expr, &mut out);
    out
}

fn push_conjuncts<'a>(expr: &'a Expr, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            push_conjuncts(left, out);
            push_conjuncts(right, out);
        }
        Expr::Nested(inner) => push_conjuncts(inner, out),
        other => out.push(other),
    }
}

/// Direct child expressions, not descending into subqueries.
pub fn child_exprs(expr: &Expr) -> Vec<&Expr> {
    match expr {
        Expr::BinaryOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsNotTrue(expr)
        | Expr::IsFalse(expr)
        | Expr::IsNotFalse(expr)
        | Expr::Cast { expr, .. }
        | Expr::Extract { expr, .. }
        | Expr::Collate { expr, .. }
        | Expr::InSubquery { expr, .. } => vec![expr.as_ref()],
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => vec![a.as_ref(), b.as_ref()],
        Expr::InList { expr, list, .. } => {
            let mut v = vec![expr.as_ref()];
            v.extend(list.iter());
            v
        }
        Expr::Between {
            expr, low, high, ..
        } => vec![expr.as_ref(), low.as_ref(), high.as_ref()],
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            vec![expr.as_ref(), pattern.as_ref()]
        }
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            let mut v = vec![expr.as_ref()];
            v.extend(substring_from.as_deref());
            v.extend(substring_for.as_deref());
            v
        }
        Expr::Trim { expr, .. } => vec![expr.as_ref()],
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let mut v: Vec<&Expr> = Vec::new();
            v.extend(operand.as_deref());
            v.extend(conditions.iter());
            v.extend(results.iter());
            v.extend(else_result.as_deref());
            v
        }
        Expr::Function(f) => f
            .args
            .iter()
            .filter_map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                | FunctionArg::Named {
                    arg: FunctionArgExpr::Expr(e),
                    ..
                } => Some(e),
                _ => None,
            })
            .collect(),
        Expr::Tuple(items) => items.iter().collect(),
        Expr::Interval(interval) => vec![interval.value.as_ref()],
        _ => Vec::new(),
    }
}

/// Mutable counterpart of [`child_exprs`].
pub fn child_exprs_mut(expr: &mut Expr) -> Vec<&mut Expr> {
    match expr {
        Expr::BinaryOp { left, right, .. } => vec![left.as_mut(), right.as_mut()],
        Expr::UnaryOp { expr, .. }
        | Expr::Nested(expr)
        | Expr::IsNull(expr)
        | Expr::IsNotNull(expr)
        | Expr::IsTrue(expr)
        | Expr::IsNotTrue(expr)
        | Expr::IsFalse(expr)
        | Expr::IsNotFalse(expr)
        | Expr::Cast { expr, .. }
        | Expr::Extract { expr, .. }
        | Expr::Collate { expr, .. }
        | Expr::InSubquery { expr, .. } => vec![expr.as_mut()],
        Expr::IsDistinctFrom(a, b) | Expr::IsNotDistinctFrom(a, b) => vec![a.as_mut(), b.as_mut()],
        Expr::InList { expr, list, .. } => {
            let mut v = vec![expr.as_mut()];
            v.extend(list.iter_mut());
            v
        }
        Expr::Between {
            expr, low, high, ..
        } => vec![expr.as_mut(), low.as_mut(), high.as_mut()],
        Expr::Like { expr, pattern, .. } | Expr::ILike { expr, pattern, .. } => {
            vec![expr.as_mut(), pattern.as_mut()]
        }
        Expr::Substring {
            expr,
            substring_from,
            substring_for,
            ..
        } => {
            let mut v = vec![expr.as_mut()];
            v.extend(substring_from.as_deref_mut());
            v.extend(substring_for.as_deref_mut());
            v
        }
        Expr::Trim { expr, .. } => vec![expr.as_mut()],
        Expr::Case {
            operand,
            conditions,
            results,
            else_result,
        } => {
            let mut v: Vec<&mut Expr> = Vec::new();
            v.extend(operand.as_deref_mut());
            v.extend(conditions.iter_mut());
            v.extend(results.iter_mut());
            v.extend(else_result.as_deref_mut());
            v
        }
        Expr::Function(f) => f
            .args
            .iter_mut()
            .filter_map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                | FunctionArg::Named {
                    arg: FunctionArgExpr::Expr(e),
                    ..
                } => Some(e),
                _ => None,
            })
            .collect(),
        Expr::Tuple(items) => items.iter_mut().collect(),
        Expr::Interval(interval) => vec![interval.value.as_mut()],
        _ => Vec::new(),
    }
}

/// Every subquery reachable from `expr` without crossing another subquery.
///
/// `NOT (...)` wrappers flip the negation of the subqueries beneath them.
pub fn subqueries(expr: &Expr) -> Vec<(&Query, SubqueryKind)> {
    let mut out = Vec::new();
    push_subqueries(expr, false, &mut out);
    out
}

fn push_subqueries<'a>(expr: &'a Expr, negated: bool, out: &mut Vec<(&'a Query, SubqueryKind)>) {
    match expr {
        Expr::Exists {
            subquery,
            negated: n,
        } => out.push((
            subquery.as_ref(),
            SubqueryKind::Exists {
                negated: negated ^ *n,
            },
        )),
        Expr::InSubquery {
            expr: lhs,
            subquery,
            negated: n,
        } => {
            push_subqueries(lhs, negated, out);
            out.push((
                subquery.as_ref(),
                SubqueryKind::In {
                    negated: negated ^ *n,
                },
            ));
        }
        Expr::Subquery(q) => out.push((q.as_ref(), SubqueryKind::Scalar)),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr: inner,
        } => push_subqueries(inner, !negated, out),
        other => {
            for child in child_exprs(other) {
                push_subqueries(child, negated, out);
            }
        }
    }
}

/// Mutable access to every subquery reachable from `expr`.
pub fn subqueries_mut(expr: &mut Expr) -> Vec<&mut Query> {
    let mut out = Vec::new();
    push_subqueries_mut(expr, &mut out);
    out
}

fn push_subqueries_mut<'a>(expr: &'a mut Expr, out: &mut Vec<&'a mut Query>) {
    match expr {
        Expr::Exists { subquery, .. } | Expr::Subquery(subquery) => out.push(subquery.as_mut()),
        Expr::InSubquery {
            expr: lhs,
            subquery,
            ..
        } => {
            push_subqueries_mut(lhs, out);
            out.push(subquery.as_mut());
        }
        other => {
            for child in child_exprs_mut(other) {
                push_subqueries_mut(child, out);
            }
        }
    }
}

pub fn join_constraint(op: &JoinOperator) -> Option<&JoinConstraint> {
    match op {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c) => Some(c),
        _ => None,
    }
}

pub fn join_constraint_mut(op: &mut JoinOperator) -> Option<&mut JoinConstraint> {
    match op {
        JoinOperator::Inner(c)
        | JoinOperator::LeftOuter(c)
        | JoinOperator::RightOuter(c)
        | JoinOperator::FullOuter(c)
        | JoinOperator::LeftSemi(c)
        | JoinOperator::RightSemi(c)
        | JoinOperator::LeftAnti(c)
        | JoinOperator::RightAnti(c) => Some(c),
        _ => None,
    }
}

/// Every table factor in a FROM item, flattening nested joins.
pub fn table_factors(twj: &TableWithJoins) -> Vec<&TableFactor> {
    let mut out = Vec::new();
    push_factor(&twj.relation, &mut out);
    for join in &twj.joins {
        push_factor(&join.relation, &mut out);
    }
    out
}

fn push_factor<'a>(factor: &'a TableFactor, out: &mut Vec<&'a TableFactor>) {
    match factor {
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => out.extend(table_factors(table_with_joins)),
        other => out.push(other),
    }
}

/// Mutable counterpart of [`table_factors`].
pub fn table_factors_mut(twj: &mut TableWithJoins) -> Vec<&mut TableFactor> {
    let mut out = Vec::new();
    push_factor_mut(&mut twj.relation, &mut out);
    for join in &mut twj.joins {
        push_factor_mut(&mut join.relation, &mut out);
    }
    out
}

fn push_factor_mut<'a>(factor: &'a mut TableFactor, out: &mut Vec<&'a mut TableFactor>) {
    match factor {
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => out.extend(table_factors_mut(table_with_joins)),
        other => out.push(other),
    }
}

/// The name a table factor is referenced by inside its SELECT.
pub fn factor_alias(factor: &TableFactor) -> Option<String> {
    match factor {
        TableFactor::Table { name, alias, .. } => Some(
            alias
                .as_ref()
                .map(|a| normalize_ident(&a.name))
                .unwrap_or_else(|| object_base_name(name)),
        ),
        TableFactor::Derived { alias, .. } => alias.as_ref().map(|a| normalize_ident(&a.name)),
        _ => None,
    }
}

/// Join-ON predicates of every join in a FROM item (nested joins included).
pub fn join_predicates(twj: &TableWithJoins) -> Vec<&Expr> {
    let mut out = Vec::new();
    push_join_predicates(twj, &mut out);
    out
}

fn push_join_predicates<'a>(twj: &'a TableWithJoins, out: &mut Vec<&'a Expr>) {
    if let TableFactor::NestedJoin {
        table_with_joins, ..
    } = &twj.relation
    {
        push_join_predicates(table_with_joins, out);
    }
    for join in &twj.joins {
        if let TableFactor::NestedJoin {
            table_with_joins, ..
        } = &join.relation
        {
            push_join_predicates(table_with_joins, out);
        }
        if let Some(JoinConstraint::On(e)) = join_constraint(&join.join_operator) {
            out.push(e);
        }
    }
}

fn push_join_predicates_mut<'a>(twj: &'a mut TableWithJoins, out: &mut Vec<&'a mut Expr>) {
    if let TableFactor::NestedJoin {
        table_with_joins, ..
    } = &mut twj.relation
    {
        push_join_predicates_mut(table_with_joins, out);
    }
    for join in &mut twj.joins {
        if let TableFactor::NestedJoin {
            table_with_joins, ..
        } = &mut join.relation
        {
            push_join_predicates_mut(table_with_joins, out);
        }
        if let Some(JoinConstraint::On(e)) = join_constraint_mut(&mut join.join_operator) {
            out.push(e);
        }
    }
}

/// Predicates that constrain rows of a SELECT: WHERE, every join ON, HAVING.
pub fn select_predicates(select: &Select) -> Vec<&Expr> {
    let mut out = Vec::new();
    out.extend(select.selection.as_ref());
    for twj in &select.from {
        out.extend(join_predicates(twj));
    }
    out.extend(select.having.as_ref());
    out
}

/// Every top-level expression of a SELECT: projection, predicates, GROUP BY.
pub fn select_exprs(select: &Select) -> Vec<&Expr> {
    let mut out = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => out.push(e),
            _ => {}
        }
    }
    out.extend(select_predicates(select));
    if let GroupByExpr::Expressions(exprs) = &select.group_by {
        out.extend(exprs.iter());
    }
    out
}

/// Mutable counterpart of [`select_exprs`].
pub fn select_exprs_mut(select: &mut Select) -> Vec<&mut Expr> {
    let mut out = Vec::new();
    for item in &mut select.projection {
        match item {
            SelectItem::UnnamedExpr(e) | SelectItem::ExprWithAlias { expr: e, .. } => out.push(e),
            _ => {}
        }
    }
    out.extend(select.selection.as_mut());
    for twj in &mut select.from {
        push_join_predicates_mut(twj, &mut out);
    }
    out.extend(select.having.as_mut());
    if let GroupByExpr::Expressions(exprs) = &mut select.group_by {
        out.extend(exprs.iter_mut());
    }
    out
}

/// Column references in `expr`, not descending into subqueries.
pub fn column_refs(expr: &Expr) -> Vec<(Option<String>, String)> {
    let mut out = Vec::new();
    push_column_refs(expr, &mut out);
    out
}

fn push_column_refs(expr: &Expr, out: &mut Vec<(Option<String>, String)>) {
    if let Some(parts) = column_parts(expr) {
        out.push(parts);
        return;
    }
    for child in child_exprs(expr) {
        push_column_refs(child, out);
    }
}

/// Names of aggregate functions the analyzers recognise.
pub fn is_aggregate_call(expr: &Expr) -> bool {
    let Expr::Function(f) = expr else {
        return false;
    };
    let name = object_base_name(&f.name);
    f.over.is_none()
        && matches!(
            name.as_str(),
            "count"
                | "sum"
                | "avg"
                | "min"
                | "max"
                | "stddev"
                | "stddev_samp"
                | "stddev_pop"
                | "variance"
                | "var_samp"
                | "var_pop"
        )
}
