//! Deterministic contradiction detection.
//!
//! A query is declared expected-empty only when its conjunctive predicates
//! are arithmetically impossible; anything short of proof leaves it to the
//! repair loop.

use std::collections::{BTreeMap, BTreeSet};

use sqlparser::ast::Select;
use sqlsynth_schema::ast::{conjuncts, select_predicates};
use sqlsynth_schema::filters::filter_shape;
use sqlsynth_schema::scope::{walk_statement, Scope, SelectVisitor, WalkFlags};
use sqlsynth_schema::{ColumnRef, ColumnResolver, FilterValue, Literal, QueryAnalysis, SchemaSet};

use crate::unionfind::DisjointSet;

/// Literal facts that hold for every result row.
#[derive(Debug, Default)]
struct Pinned {
    equal: BTreeMap<ColumnRef, BTreeSet<Literal>>,
    between: BTreeMap<ColumnRef, Vec<(f64, f64)>>,
}

struct PinCollector<'a> {
    schemas: &'a SchemaSet,
    pinned: Pinned,
}

impl SelectVisitor for PinCollector<'_> {
    fn visit_select(&mut self, select: &Select, scope: &Scope, flags: WalkFlags) {
        // Only the outermost SELECT's conjuncts constrain every result row.
        if flags.negated || flags.depth > 0 {
            return;
        }
        let resolver = ColumnResolver::new(scope, Some(self.schemas));
        for predicate in select_predicates(select) {
            for conjunct in conjuncts(predicate) {
                let Some((qualifier, column, filter)) = filter_shape(conjunct) else {
                    continue;
                };
                let Some(column) = resolver.resolve(qualifier.as_deref(), &column) else {
                    continue;
                };
                match filter {
                    FilterValue::Eq { value } => {
                        self.pinned.equal.entry(column).or_default().insert(value);
                    }
                    FilterValue::Between { low, high } => {
                        if let (Some(lo), Some(hi)) = (low.as_f64(), high.as_f64()) {
                            self.pinned.between.entry(column).or_default().push((lo, hi));
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

/// Reason the query can never return a row, if one can be proven.
pub fn find_contradiction(analysis: &QueryAnalysis) -> Option<String> {
    let mut collector = PinCollector {
        schemas: &analysis.schemas,
        pinned: Pinned::default(),
    };
    walk_statement(&analysis.statement, &mut collector);
    let pinned = collector.pinned;

    let mut classes = DisjointSet::new();
    for edge in &analysis.joins {
        classes.union(&edge.left, &edge.right);
    }
    let mut class_pins: BTreeMap<ColumnRef, BTreeSet<Literal>> = BTreeMap::new();
    for (column, values) in &pinned.equal {
        let root = classes.find(column).unwrap_or_else(|| column.clone());
        class_pins.entry(root).or_default().extend(values.iter().cloned());
    }

    for (a, b) in &analysis.not_equal {
        if a == b || classes.same(a, b) {
            return Some(format!("{a} <> {b} but both sides are joined as equal"));
        }
        let mut pin = |c: &ColumnRef| {
            let root = classes.find(c).unwrap_or_else(|| c.clone());
            class_pins.get(&root).cloned().unwrap_or_default()
        };
        let (pa, pb) = (pin(a), pin(b));
        if pa.len() == 1 && pa == pb {
            let value = pa.iter().next().map(ToString::to_string).unwrap_or_default();
            return Some(format!("{a} <> {b} but both are pinned to {value}"));
        }
    }

    for bound in &analysis.aggregate_bounds {
        let Some(ranges) = pinned.between.get(&bound.column) else {
            continue;
        };
        let lo = ranges.iter().map(|r| r.0).fold(f64::MIN, f64::max);
        let hi = ranges.iter().map(|r| r.1).fold(f64::MAX, f64::min);
        if lo <= 0.0 || hi < lo {
            continue;
        }
        let max_cv = max_coefficient_of_variation(lo, hi);
        if max_cv <= bound.min_cv {
            return Some(format!(
                "stddev/avg of {} is at most {max_cv:.4} within [{lo}, {hi}] but must exceed {}",
                bound.column, bound.min_cv
            ));
        }
    }
    None
}

/// Largest sample coefficient of variation any multiset drawn from
/// `[lo, hi]` (with `lo > 0`) can reach.
pub fn max_coefficient_of_variation(lo: f64, hi: f64) -> f64 {
    (hi - lo) / (2.0 * lo * hi).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlsynth_schema::{Heuristics, SqlDialect};

    fn verdict(sql: &str) -> anyhow::Result<Option<String>> {
        let analysis = QueryAnalysis::analyze("q", sql, SqlDialect::Generic, &Heuristics::default(), None)?;
        Ok(find_contradiction(&analysis))
    }

    #[test]
    fn inequality_between_pinned_columns_is_unsat() -> anyhow::Result<()> {
        assert!(verdict("SELECT * FROM t WHERE t.a = 5 AND t.b = 5 AND t.a <> t.b")?.is_some());
        assert!(verdict("SELECT * FROM t WHERE t.a = 5 AND t.b = 6 AND t.a <> t.b")?.is_none());
        Ok(())
    }

    #[test]
    fn inequality_inside_one_join_class_is_unsat() -> anyhow::Result<()> {
        assert!(verdict("SELECT * FROM x JOIN y ON x.k = y.k WHERE x.k <> y.k")?.is_some());
        assert!(verdict("SELECT * FROM x JOIN y ON x.k = y.k WHERE x.v <> y.v")?.is_none());
        Ok(())
    }

    #[test]
    fn coefficient_of_variation_bound_needs_room() -> anyhow::Result<()> {
        let tight = "SELECT i.i_item_sk FROM inventory i \
                     WHERE i.inv_quantity_on_hand BETWEEN 100 AND 110 \
                     GROUP BY i.i_item_sk \
                     HAVING STDDEV_SAMP(i.inv_quantity_on_hand) / AVG(i.inv_quantity_on_hand) > 1";
        assert!(verdict(tight)?.is_some());
        let wide = tight.replace("BETWEEN 100 AND 110", "BETWEEN 1 AND 500");
        assert!(verdict(&wide)?.is_none());
        assert!(max_coefficient_of_variation(1.0, 500.0) > 1.0);
        Ok(())
    }
}
