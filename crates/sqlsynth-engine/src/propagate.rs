//! Pushing literal filters across join equivalence classes.

use sqlsynth_schema::{ColumnRef, FilterSet, JoinEdge};
use tracing::debug;

use crate::unionfind::DisjointSet;

/// Join-equivalence classes over base columns.
pub fn join_classes(joins: &[JoinEdge]) -> Vec<Vec<ColumnRef>> {
    let mut set = DisjointSet::new();
    for edge in joins {
        set.union(&edge.left, &edge.right);
    }
    set.classes()
}

/// Every filter known for any member of a join class is attached to every
/// member. Applying this twice gives the same result as applying it once.
pub fn propagate(filters: &FilterSet, joins: &[JoinEdge]) -> FilterSet {
    let mut out = filters.clone();
    for class in join_classes(joins) {
        let mut merged = FilterSet::default();
        for member in &class {
            if let Some(values) = filters.get(member) {
                for v in values {
                    merged.insert(class[0].clone(), v.clone());
                }
            }
        }
        let Some(values) = merged.get(&class[0]) else {
            continue;
        };
        for member in &class {
            for v in values {
                if out.insert(member.clone(), v.clone()) && filters.get(member).is_none() {
                    debug!(column = %member, filter = %v, "propagated filter");
                }
            }
        }
    }
    out
}
