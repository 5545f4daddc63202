//! Foreign-key inference, primary-key discovery and generation order.
//!
//! Ambiguity is an answer here: a tied primary-key score or a tied join edge
//! yields no key rather than a guess.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::joins::JoinEdge;
use crate::names::{is_key_like, key_stem, last_name_token, name_variants, tokenize};
use crate::schema::SchemaSet;
use crate::scope::ColumnRef;

/// Score at or above which a key column is the table's natural key.
pub const NATURAL_KEY_SCORE: u32 = 60;

/// `owner.column → target.column`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FkEdge {
    pub owner: ColumnRef,
    pub target: ColumnRef,
}

/// Score a column as the primary key of `table`; `None` for non-key columns.
pub fn primary_key_score(table: &str, column: &str) -> Option<u32> {
    if !is_key_like(column) {
        return None;
    }
    if column == "id" {
        return Some(80);
    }
    let stem = key_stem(column);
    let variants = name_variants(table);
    if variants.contains(stem) {
        return Some(100);
    }
    if variants
        .iter()
        .filter(|v| v.len() > 1)
        .any(|v| stem.ends_with(&format!("_{v}")))
    {
        return Some(90);
    }
    if let Some(last) = last_name_token(table) {
        if stem.ends_with(&last) {
            return Some(60);
        }
    }
    if tokenize(stem)
        .first()
        .is_some_and(|first| variants.contains(first))
    {
        return Some(40);
    }
    Some(10)
}

/// The single best-scoring key column, or `None` when there is none or the
/// top score is shared.
pub fn find_primary_key_column<'a, I>(table: &str, columns: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(u32, &str)> = None;
    let mut tied = false;
    for column in columns {
        let Some(score) = primary_key_score(table, column) else {
            continue;
        };
        match best {
            Some((top, _)) if score < top => {}
            Some((top, _)) if score == top => tied = true,
            _ => {
                best = Some((score, column));
                tied = false;
            }
        }
    }
    match best {
        Some((_, column)) if !tied => Some(column.to_string()),
        _ => None,
    }
}

fn key_like_count(schemas: &SchemaSet, table: &str) -> usize {
    schemas
        .get(table)
        .map(|t| t.column_names().filter(|c| is_key_like(c)).count())
        .unwrap_or(0)
}

fn is_natural_key(schemas: &SchemaSet, column: &ColumnRef) -> bool {
    let Some(table) = schemas.get(&column.table) else {
        return false;
    };
    primary_key_score(&column.table, &column.column).is_some_and(|s| s >= NATURAL_KEY_SCORE)
        && find_primary_key_column(&column.table, table.column_names()).as_deref()
            == Some(column.column.as_str())
}

/// Direction of one cross-table equality, or `None` when undecidable.
fn orient(schemas: &SchemaSet, edge: &JoinEdge) -> Option<FkEdge> {
    let (a, b) = (&edge.left, &edge.right);
    if !edge.crosses_tables() || !(is_key_like(&a.column) || is_key_like(&b.column)) {
        return None;
    }
    let directed = |owner: &ColumnRef, target: &ColumnRef| FkEdge {
        owner: owner.clone(),
        target: target.clone(),
    };

    let (ka, kb) = (key_like_count(schemas, &a.table), key_like_count(schemas, &b.table));
    if ka > kb {
        return Some(directed(a, b));
    }
    if kb > ka {
        return Some(directed(b, a));
    }
    match (is_natural_key(schemas, a), is_natural_key(schemas, b)) {
        (false, true) => return Some(directed(a, b)),
        (true, false) => return Some(directed(b, a)),
        _ => {}
    }
    match a.column.len().cmp(&b.column.len()) {
        std::cmp::Ordering::Greater => Some(directed(a, b)),
        std::cmp::Ordering::Less => Some(directed(b, a)),
        std::cmp::Ordering::Equal => {
            debug!(%a, %b, "join edge direction is ambiguous; no foreign key");
            None
        }
    }
}

/// Infer FK edges from join equalities, then from naming conventions for key
/// columns the joins said nothing about.
pub fn infer_foreign_keys(schemas: &SchemaSet, joins: &[JoinEdge]) -> Vec<FkEdge> {
    let mut edges: Vec<FkEdge> = Vec::new();
    let mut owners: BTreeSet<ColumnRef> = BTreeSet::new();
    for edge in joins {
        if let Some(fk) = orient(schemas, edge) {
            if owners.insert(fk.owner.clone()) {
                edges.push(fk);
            }
        }
    }

    for table in schemas.iter() {
        let own_pk = find_primary_key_column(&table.name, table.column_names());
        for column in table.column_names().filter(|c| is_key_like(c)) {
            let owner = ColumnRef::new(table.name.clone(), column);
            // A best-scoring key only counts as the table's own when its stem
            // names the table; `orders.customer_id` still points outward.
            let own_key = own_pk.as_deref() == Some(column) && stem_names_table(column, &table.name);
            if owners.contains(&owner) || own_key {
                continue;
            }
            if let Some(target) = heuristic_target(schemas, &table.name, column) {
                owners.insert(owner.clone());
                edges.push(FkEdge { owner, target });
            }
        }
    }
    edges
}

fn stem_names_table(column: &str, table: &str) -> bool {
    let tokens = tokenize(key_stem(column));
    let variants = name_variants(table);
    (1..=tokens.len()).any(|width| tokens.windows(width).any(|w| variants.contains(&w.join("_"))))
}

/// Match contiguous runs of the column's tokens against other tables' name
/// variants, longest run first.
fn heuristic_target(schemas: &SchemaSet, owner_table: &str, column: &str) -> Option<ColumnRef> {
    let tokens = tokenize(key_stem(column));
    for width in (1..=tokens.len()).rev() {
        let mut hits: BTreeSet<&str> = BTreeSet::new();
        for window in tokens.windows(width) {
            let candidate = window.join("_");
            if width == 1 && candidate.len() < 2 {
                continue;
            }
            for table in schemas.table_names().filter(|t| *t != owner_table) {
                if name_variants(table).contains(&candidate) {
                    hits.insert(table);
                }
            }
        }
        match hits.len() {
            0 => continue,
            1 => {
                let table = hits.into_iter().next()?;
                let schema = schemas.get(table)?;
                if schema.has_column(column) {
                    return Some(ColumnRef::new(table, column));
                }
                return find_primary_key_column(table, schema.column_names())
                    .map(|pk| ColumnRef::new(table, pk));
            }
            _ => return None,
        }
    }
    None
}

/// Primary key used for generation: the best key column that is not itself
/// an FK owner.
pub fn generation_primary_keys(schemas: &SchemaSet, fks: &[FkEdge]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for table in schemas.iter() {
        let candidates = table.column_names().filter(|c| {
            !fks.iter()
                .any(|fk| fk.owner.table == table.name && fk.owner.column == *c)
        });
        if let Some(pk) = find_primary_key_column(&table.name, candidates) {
            out.insert(table.name.clone(), pk);
        }
    }
    out
}

/// Topological order, FK targets before owners. Cycles are broken by taking
/// the first remaining table in first-seen order.
pub fn generation_order(schemas: &SchemaSet, fks: &[FkEdge]) -> Vec<String> {
    let mut remaining: Vec<&str> = schemas.table_names().collect();
    let mut parents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for fk in fks {
        if fk.owner.table != fk.target.table && schemas.contains(&fk.target.table) {
            parents
                .entry(fk.owner.table.as_str())
                .or_default()
                .insert(fk.target.table.as_str());
        }
    }

    let mut order: Vec<String> = Vec::with_capacity(remaining.len());
    while !remaining.is_empty() {
        let ready = remaining.iter().position(|t| {
            parents
                .get(t)
                .map_or(true, |ps| ps.iter().all(|p| order.iter().any(|o| o == p)))
        });
        let index = ready.unwrap_or_else(|| {
            debug!(table = remaining[0], "breaking foreign-key cycle");
            0
        });
        order.push(remaining.remove(index).to_string());
    }
    order
}

/// Keys and order for one schema set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyModel {
    pub foreign_keys: Vec<FkEdge>,
    pub primary_keys: BTreeMap<String, String>,
    pub order: Vec<String>,
}

impl KeyModel {
    pub fn build(schemas: &SchemaSet, joins: &[JoinEdge]) -> Self {
        let foreign_keys = infer_foreign_keys(schemas, joins);
        let primary_keys = generation_primary_keys(schemas, &foreign_keys);
        let order = generation_order(schemas, &foreign_keys);
        Self {
            foreign_keys,
            primary_keys,
            order,
        }
    }

    pub fn primary_key(&self, table: &str) -> Option<&str> {
        self.primary_keys.get(table).map(String::as_str)
    }

    /// FK edges owned by `table`.
    pub fn parents_of<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a FkEdge> + 'a {
        self.foreign_keys.iter().filter(move |fk| fk.owner.table == table)
    }

    pub fn fk_of(&self, column: &ColumnRef) -> Option<&FkEdge> {
        self.foreign_keys.iter().find(|fk| &fk.owner == column)
    }

    /// Tables owning at least one FK.
    pub fn is_fact_like(&self, table: &str) -> bool {
        self.parents_of(table).next().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::Heuristics;
    use crate::schema::ColumnSpec;

    fn schemas(tables: &[(&str, &[&str])]) -> SchemaSet {
        let h = Heuristics::default();
        let mut set = SchemaSet::default();
        for (name, cols) in tables {
            let t = set.table_entry(name);
            for c in *cols {
                t.push_column(ColumnSpec::inferred(c, &h));
            }
        }
        set
    }

    fn edge(a: (&str, &str), b: (&str, &str)) -> JoinEdge {
        JoinEdge::new(ColumnRef::new(a.0, a.1), ColumnRef::new(b.0, b.1))
            .unwrap_or_else(|| panic!("identical columns"))
    }

    #[test]
    fn primary_key_scoring() {
        assert_eq!(
            find_primary_key_column("customer", ["c_customer_sk", "c_current_addr_sk"]),
            Some("c_customer_sk".to_string())
        );
        assert_eq!(
            find_primary_key_column("date_dim", ["d_date_sk", "d_year"]),
            Some("d_date_sk".to_string())
        );
        assert_eq!(
            find_primary_key_column("customers", ["id", "state"]),
            Some("id".to_string())
        );
        assert_eq!(
            find_primary_key_column("store_sales", ["ss_item_sk", "ss_customer_sk"]),
            None
        );
    }

    #[test]
    fn fact_table_owns_the_edge() {
        let s = schemas(&[
            ("store_sales", &["ss_item_sk", "ss_customer_sk", "ss_net_profit"]),
            ("item", &["i_item_sk", "i_category"]),
        ]);
        let fks = infer_foreign_keys(&s, &[edge(("store_sales", "ss_item_sk"), ("item", "i_item_sk"))]);
        assert!(fks.contains(&FkEdge {
            owner: ColumnRef::new("store_sales", "ss_item_sk"),
            target: ColumnRef::new("item", "i_item_sk"),
        }));
    }

    #[test]
    fn key_count_tie_prefers_natural_key_target() {
        let s = schemas(&[("orders", &["customer_id", "total"]), ("customers", &["id", "state"])]);
        let fks = infer_foreign_keys(&s, &[edge(("orders", "customer_id"), ("customers", "id"))]);
        assert_eq!(
            fks,
            vec![FkEdge {
                owner: ColumnRef::new("orders", "customer_id"),
                target: ColumnRef::new("customers", "id"),
            }]
        );
        let model = KeyModel::build(&s, &[edge(("orders", "customer_id"), ("customers", "id"))]);
        assert_eq!(model.order, vec!["customers", "orders"]);
        assert_eq!(model.primary_key("customers"), Some("id"));
        assert_eq!(model.primary_key("orders"), None);
    }

    #[test]
    fn equal_length_tie_yields_no_edge() {
        let s = schemas(&[("a", &["x_id"]), ("b", &["y_id"])]);
        assert!(infer_foreign_keys(&s, &[edge(("a", "x_id"), ("b", "y_id"))]).is_empty());
    }

    #[test]
    fn naming_heuristic_finds_dimension() {
        let s = schemas(&[
            ("store_sales", &["ss_sold_date_sk", "ss_item_sk"]),
            ("date_dim", &["d_date_sk", "d_year"]),
            ("item", &["i_item_sk"]),
        ]);
        let fks = infer_foreign_keys(&s, &[]);
        assert!(fks.contains(&FkEdge {
            owner: ColumnRef::new("store_sales", "ss_sold_date_sk"),
            target: ColumnRef::new("date_dim", "d_date_sk"),
        }));
        assert!(fks.contains(&FkEdge {
            owner: ColumnRef::new("store_sales", "ss_item_sk"),
            target: ColumnRef::new("item", "i_item_sk"),
        }));
        let order = generation_order(&s, &fks);
        assert_eq!(order.last().map(String::as_str), Some("store_sales"));
    }

    #[test]
    fn lone_foreign_key_is_not_taken_for_the_owner_key() {
        let s = schemas(&[("orders", &["customer_id"]), ("customer", &["customer_id", "name"])]);
        let fks = infer_foreign_keys(&s, &[]);
        assert_eq!(
            fks,
            vec![FkEdge {
                owner: ColumnRef::new("orders", "customer_id"),
                target: ColumnRef::new("customer", "customer_id"),
            }]
        );
    }

    #[test]
    fn cycles_keep_first_seen_order() {
        let s = schemas(&[("a", &["b_id", "id"]), ("b", &["a_id", "id"])]);
        let fks = vec![
            FkEdge {
                owner: ColumnRef::new("a", "b_id"),
                target: ColumnRef::new("b", "id"),
            },
            FkEdge {
                owner: ColumnRef::new("b", "a_id"),
                target: ColumnRef::new("a", "id"),
            },
        ];
        assert_eq!(generation_order(&s, &fks), vec!["a", "b"]);
    }
}
