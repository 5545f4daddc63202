//! Equi-join edges between base columns.

use serde::{Deserialize, Serialize};
use sqlparser::ast::{BinaryOperator, Expr, JoinConstraint, Select, Statement, TableWithJoins};

use crate::ast::{
    column_parts_through_casts, conjuncts, factor_alias, join_constraint, normalize_ident,
    select_predicates,
};
use crate::schema::SchemaSet;
use crate::scope::{walk_statement, ColumnRef, ColumnResolver, Scope, SelectVisitor, WalkFlags};

/// An undirected `a = b` between two distinct base columns, stored with
/// `left <= right`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JoinEdge {
    pub left: ColumnRef,
    pub right: ColumnRef,
}

impl JoinEdge {
    pub fn new(a: ColumnRef, b: ColumnRef) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { left: a, right: b }),
            std::cmp::Ordering::Greater => Some(Self { left: b, right: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    pub fn crosses_tables(&self) -> bool {
        self.left.table != self.right.table
    }
}

/// Every `col = col` conjunct of WHERE / ON / HAVING plus every `USING`
/// column, resolved to base columns. Negated branches are included only when
/// `include_negated` is set.
pub fn extract_join_edges(
    stmt: &Statement,
    schemas: Option<&SchemaSet>,
    include_negated: bool,
) -> Vec<JoinEdge> {
    let mut collector = JoinCollector {
        schemas,
        include_negated,
        edges: Vec::new(),
    };
    walk_statement(stmt, &mut collector);
    collector.edges
}

struct JoinCollector<'a> {
    schemas: Option<&'a SchemaSet>,
    include_negated: bool,
    edges: Vec<JoinEdge>,
}

impl JoinCollector<'_> {
    fn push(&mut self, a: Option<ColumnRef>, b: Option<ColumnRef>) {
        if let (Some(a), Some(b)) = (a, b) {
            if let Some(edge) = JoinEdge::new(a, b) {
                if !self.edges.contains(&edge) {
                    self.edges.push(edge);
                }
            }
        }
    }
}

impl SelectVisitor for JoinCollector<'_> {
    fn visit_select(&mut self, select: &Select, scope: &Scope, flags: WalkFlags) {
        if flags.negated && !self.include_negated {
            return;
        }
        let resolver = ColumnResolver::new(scope, self.schemas);
        for predicate in select_predicates(select) {
            for conjunct in conjuncts(predicate) {
                if let Some((l, r)) = column_equality(conjunct) {
                    let a = resolver.resolve(l.0.as_deref(), &l.1);
                    let b = resolver.resolve(r.0.as_deref(), &r.1);
                    self.push(a, b);
                }
            }
        }
        for twj in &select.from {
            for (left_alias, right_alias, column) in using_columns(twj) {
                let a = resolver.resolve(Some(&left_alias), &column);
                let b = resolver.resolve(Some(&right_alias), &column);
                self.push(a, b);
            }
        }
    }
}

type ColumnParts = (Option<String>, String);

/// `(left, right)` column parts of a `col = col` predicate.
pub fn column_equality(expr: &Expr) -> Option<(ColumnParts, ColumnParts)> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => Some((
            column_parts_through_casts(left)?,
            column_parts_through_casts(right)?,
        )),
        Expr::Nested(inner) => column_equality(inner),
        _ => None,
    }
}

/// `(left alias, right alias, column)` for each `JOIN … USING (column)`.
/// The left side is the FROM item immediately before the join.
fn using_columns(twj: &TableWithJoins) -> Vec<(String, String, String)> {
    let mut out = Vec::new();
    let mut previous = factor_alias(&twj.relation);
    for join in &twj.joins {
        let current = factor_alias(&join.relation);
        if let (Some(JoinConstraint::Using(columns)), Some(left), Some(right)) =
            (join_constraint(&join.join_operator), &previous, &current)
        {
            for column in columns {
                out.push((left.clone(), right.clone(), normalize_ident(column)));
            }
        }
        previous = current;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::SqlDialect;

    fn edges(sql: &str, include_negated: bool) -> anyhow::Result<Vec<JoinEdge>> {
        let stmt = SqlDialect::Generic.parse_first_statement(sql)?;
        Ok(extract_join_edges(&stmt, None, include_negated))
    }

    #[test]
    fn on_where_and_using_edges() -> anyhow::Result<()> {
        let found = edges(
            "SELECT * FROM store_sales ss JOIN item i ON ss.ss_item_sk = i.i_item_sk \
             JOIN store s USING (s_store_sk) WHERE ss.ss_sold_date_sk = d.d_date_sk OR 1 = 1",
            false,
        )?;
        assert_eq!(found.len(), 2);
        assert!(found.contains(&JoinEdge {
            left: ColumnRef::new("item", "i_item_sk"),
            right: ColumnRef::new("store_sales", "ss_item_sk"),
        }));
        assert!(found.contains(&JoinEdge {
            left: ColumnRef::new("item", "s_store_sk"),
            right: ColumnRef::new("store", "s_store_sk"),
        }));
        Ok(())
    }

    #[test]
    fn negated_edges_are_opt_in() -> anyhow::Result<()> {
        let sql = "SELECT * FROM a WHERE NOT EXISTS (SELECT 1 FROM b WHERE b.a_id = a.id)";
        assert!(edges(sql, false)?.is_empty());
        assert_eq!(edges(sql, true)?.len(), 1);
        Ok(())
    }
}
