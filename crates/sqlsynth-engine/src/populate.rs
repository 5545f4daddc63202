//! Bulk population of a corpus database.
//!
//! Tables are filled in generation order so every FK target is fully
//! materialized before its owners. Per column the rules are tried in order:
//!
//! 1. primary keys: filter-matching values first, then sequential values
//! 2. FK wiring: the target's filter-matched keys, else a small anchor subset
//!    (temporal targets draw from every key)
//! 3. filter cycling: row `i` takes matching slot `i % (k + 1)`; the last
//!    slot is left free so non-matching rows exist too
//! 4. template edge values, then type-shaped defaults
//!
//! A failing table is logged and skipped; the pass always completes.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use sqlsynth_schema::names::tokenize;
use sqlsynth_schema::{
    CanonicalType, ColumnRef, ColumnSpec, CorpusAnalysis, FilterSet, FilterValue, FkEdge, Literal,
    ScalarKey, TableSchema,
};
use tracing::{debug, info, warn};

use crate::config::SynthConfig;
use crate::db::{quote_ident, Database};
use crate::domain::Domain;
use crate::error::Result;
use crate::propagate::propagate;
use crate::rng::XorShift64;
use crate::template::EdgeTemplate;
use crate::value::{default_value, SqlValue};

/// Outcome of one population pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PopulationSummary {
    pub multiplier: usize,
    /// Rows inserted per table by this pass.
    pub inserted: BTreeMap<String, usize>,
    pub failed_tables: Vec<String>,
    /// Rows removed to keep scalar-subquery keys unique.
    pub deduplicated: u64,
}

impl PopulationSummary {
    pub fn total_rows(&self) -> usize {
        self.inserted.values().sum()
    }
}

/// Key values of materialized FK targets.
#[derive(Debug, Default)]
struct KeyPools {
    all: BTreeMap<ColumnRef, Vec<SqlValue>>,
    matched: BTreeMap<ColumnRef, Vec<SqlValue>>,
}

pub struct Populator<'a> {
    db: &'a Database,
    corpus: &'a CorpusAnalysis,
    config: &'a SynthConfig,
    template: Option<&'a EdgeTemplate>,
    filters: FilterSet,
}

impl<'a> Populator<'a> {
    pub fn new(db: &'a Database, corpus: &'a CorpusAnalysis, config: &'a SynthConfig) -> Self {
        let filters = propagate(&corpus.filters, &corpus.joins);
        Self {
            db,
            corpus,
            config,
            template: None,
            filters,
        }
    }

    pub fn with_template(mut self, template: &'a EdgeTemplate) -> Self {
        self.template = Some(template);
        self
    }

    /// Filters after join-equivalence propagation.
    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Create every table and fill it at the base budget.
    pub fn build(&self) -> Result<PopulationSummary> {
        self.db.create_tables(&self.corpus.schemas)?;
        Ok(self.populate(1))
    }

    /// Grow every table to `multiplier` times its base budget. Existing rows
    /// are kept, so repeated top-ups only add what is missing.
    pub fn populate(&self, multiplier: usize) -> PopulationSummary {
        let mut summary = PopulationSummary {
            multiplier,
            ..PopulationSummary::default()
        };
        let mut pools = KeyPools::default();
        for table in self.table_order() {
            let Some(schema) = self.corpus.schemas.get(&table) else {
                continue;
            };
            match self.populate_table(schema, multiplier, &pools) {
                Ok(inserted) => {
                    debug!(table = %table, inserted, "table populated");
                    summary.inserted.insert(table.clone(), inserted);
                }
                Err(e) => {
                    warn!(table = %table, error = %e, "table population failed; continuing");
                    summary.failed_tables.push(table.clone());
                }
            }
            summary.deduplicated +=
                enforce_scalar_uniqueness(self.db, schema, &self.corpus.scalar_keys);
            self.collect_pools(schema, &mut pools);
            self.reverse_propagate(schema, &mut pools);
        }
        info!(
            multiplier,
            rows = summary.total_rows(),
            failed = summary.failed_tables.len(),
            "population pass finished"
        );
        summary
    }

    fn table_order(&self) -> Vec<String> {
        let mut order = self.corpus.keys.order.clone();
        for name in self.corpus.schemas.table_names() {
            if !order.iter().any(|t| t == name) {
                order.push(name.to_string());
            }
        }
        order
    }

    fn budget(&self, table: &str, multiplier: usize) -> usize {
        let base = if self.corpus.keys.is_fact_like(table) {
            self.config.fact_rows
        } else {
            self.config.dimension_rows
        };
        base.saturating_mul(multiplier.max(1))
    }

    fn populate_table(&self, schema: &TableSchema, multiplier: usize, pools: &KeyPools) -> Result<usize> {
        let table = schema.name.as_str();
        let existing = self.db.row_count(table)? as usize;
        let target = self.budget(table, multiplier);

        let template_rows = match self.template {
            Some(template) if existing == 0 => template.rows_for(schema),
            _ => Vec::new(),
        };
        let fresh = target.saturating_sub(existing + template_rows.len());
        if fresh == 0 && template_rows.is_empty() {
            return Ok(0);
        }

        let mut plans = Vec::with_capacity(schema.columns.len());
        for spec in &schema.columns {
            plans.push(self.plan_column(schema, spec, existing, target, pools)?);
        }

        let mut rows = Vec::with_capacity(template_rows.len() + fresh);
        for (offset, literal) in template_rows.iter().enumerate() {
            let index = existing + offset;
            let row = plans
                .iter_mut()
                .map(|plan| match literal.get(&plan.spec.name) {
                    Some(value) if !value.is_null() || plan.spec.nullable => {
                        plan.claim(value);
                        value.clone()
                    }
                    _ => plan.value(index, self.config),
                })
                .collect();
            rows.push(row);
        }
        for offset in 0..fresh {
            let index = existing + template_rows.len() + offset;
            rows.push(plans.iter_mut().map(|plan| plan.value(index, self.config)).collect());
        }

        let columns: Vec<String> = schema.columns.iter().map(|c| c.name.clone()).collect();
        self.db.insert_rows(table, &columns, &rows)
    }

    fn plan_column<'s>(
        &self,
        schema: &'s TableSchema,
        spec: &'s ColumnSpec,
        existing: usize,
        target: usize,
        pools: &KeyPools,
    ) -> Result<ColumnPlan<'s>> {
        let table = schema.name.as_str();
        let column = ColumnRef::new(table, spec.name.clone());
        let ty = spec.data_type;
        let domain = Domain::from_filters(self.filters.get(&column).into_iter().flatten(), ty);
        let edges = self
            .template
            .map(|t| t.edges_for(table, &spec.name, ty))
            .unwrap_or_default();
        let rng = XorShift64::derived(
            self.config.seed.wrapping_add(existing as u64),
            &format!("{table}.{}", spec.name),
        );

        let rule = if self.corpus.keys.primary_key(table) == Some(spec.name.as_str()) {
            let select = format!("SELECT {} FROM {}", quote_ident(&spec.name), quote_ident(table));
            let used = self.db.column_values(&select)?.iter().map(ToString::to_string).collect();
            let candidates = (0..domain.slot_count(ty))
                .filter_map(|slot| domain.matching_value(ty, slot, 0))
                .collect();
            ColumnRule::PrimaryKey(KeySequence {
                candidates,
                used,
                next: 1,
            })
        } else if let Some(rule) = self
            .corpus
            .keys
            .fk_of(&column)
            .and_then(|fk| self.fk_rule(fk, pools, &domain, ty))
        {
            rule
        } else if !domain.is_unconstrained() && domain.slot_count(ty) > 0 {
            ColumnRule::Filtered(domain)
        } else {
            ColumnRule::Free
        };

        Ok(ColumnPlan {
            spec,
            rule,
            edges,
            rng,
            key_domain: target.max(1) as u64,
        })
    }

    /// Parent keys for an FK column. When the column carries its own filter,
    /// only parent keys the filter admits count as matched; with none, the
    /// column falls through to plain filter cycling.
    fn fk_rule(&self, fk: &FkEdge, pools: &KeyPools, domain: &Domain, ty: CanonicalType) -> Option<ColumnRule> {
        let all = pools.all.get(&fk.target).filter(|p| !p.is_empty())?;
        let mut matched = pools.matched.get(&fk.target).cloned().unwrap_or_default();
        if !domain.is_unconstrained() {
            let admitted = |pool: &[SqlValue]| -> Vec<SqlValue> {
                pool.iter().filter(|v| domain.admits(v, ty)).cloned().collect()
            };
            matched = match admitted(&matched) {
                keys if keys.is_empty() => admitted(all),
                keys => keys,
            };
            if matched.is_empty() {
                debug!(column = %fk.owner, parent = %fk.target, "no parent key satisfies the column filter");
                return None;
            }
        }
        if self.is_temporal_table(&fk.target.table) {
            return Some(ColumnRule::ForeignKey {
                matched,
                fallback: all.clone(),
            });
        }
        let width = (all.len() / 4)
            .clamp(self.config.anchor_min.max(1), self.config.anchor_max.max(1))
            .min(all.len());
        Some(ColumnRule::ForeignKey {
            matched,
            fallback: all[..width].to_vec(),
        })
    }

    /// Date and time dimensions keep broad calendar coverage.
    fn is_temporal_table(&self, table: &str) -> bool {
        let by_name = tokenize(table)
            .iter()
            .any(|t| matches!(t.as_str(), "date" | "time" | "calendar"));
        let by_key = self
            .corpus
            .keys
            .primary_key(table)
            .and_then(|pk| self.corpus.schemas.column_type(&ColumnRef::new(table, pk)))
            .is_some_and(|ty| ty.is_temporal());
        by_name || by_key
    }

    fn collect_pools(&self, schema: &TableSchema, pools: &mut KeyPools) {
        let targets: BTreeSet<&ColumnRef> = self
            .corpus
            .keys
            .foreign_keys
            .iter()
            .map(|fk| &fk.target)
            .filter(|t| t.table == schema.name && schema.has_column(&t.column))
            .collect();
        for target in targets {
            let select = format!(
                "SELECT {c} FROM {t} WHERE {c} IS NOT NULL GROUP BY {c} ORDER BY MIN(rowid)",
                c = quote_ident(&target.column),
                t = quote_ident(&schema.name)
            );
            match self.db.column_values(&select) {
                Ok(values) => {
                    pools.all.insert(target.clone(), values);
                }
                Err(e) => warn!(column = %target, error = %e, "could not read key pool"),
            }
            match matching_values(self.db, &self.filters, schema, &target.column) {
                Ok(values) => {
                    debug!(column = %target, matched = values.len(), "filter-matched key pool");
                    pools.matched.insert(target.clone(), values);
                }
                Err(e) => warn!(column = %target, error = %e, "could not narrow key pool"),
            }
        }
    }

    /// FK values used by this table's own filter-matching rows narrow the
    /// parent's matched pool; a narrowing that would empty it is ignored.
    fn reverse_propagate(&self, schema: &TableSchema, pools: &mut KeyPools) {
        if self.filters.for_table(&schema.name).next().is_none() {
            return;
        }
        for fk in self.corpus.keys.parents_of(&schema.name) {
            let used = match matching_values(self.db, &self.filters, schema, &fk.owner.column) {
                Ok(values) if !values.is_empty() => values,
                Ok(_) => continue,
                Err(e) => {
                    warn!(column = %fk.owner, error = %e, "reverse propagation skipped");
                    continue;
                }
            };
            let used: BTreeSet<String> = used.iter().map(ToString::to_string).collect();
            let base = match pools.matched.get(&fk.target) {
                Some(m) if !m.is_empty() => m,
                _ => match pools.all.get(&fk.target) {
                    Some(all) => all,
                    None => continue,
                },
            };
            let narrowed: Vec<SqlValue> = base
                .iter()
                .filter(|v| used.contains(&v.to_string()))
                .cloned()
                .collect();
            if !narrowed.is_empty() {
                debug!(parent = %fk.target, keys = narrowed.len(), "parent pool narrowed by child filters");
                pools.matched.insert(fk.target.clone(), narrowed);
            }
        }
    }
}

enum ColumnRule {
    PrimaryKey(KeySequence),
    ForeignKey {
        matched: Vec<SqlValue>,
        fallback: Vec<SqlValue>,
    },
    Filtered(Domain),
    Free,
}

struct ColumnPlan<'s> {
    spec: &'s ColumnSpec,
    rule: ColumnRule,
    edges: Vec<SqlValue>,
    rng: XorShift64,
    key_domain: u64,
}

impl ColumnPlan<'_> {
    fn value(&mut self, index: usize, config: &SynthConfig) -> SqlValue {
        let ty = self.spec.data_type;
        match &mut self.rule {
            ColumnRule::PrimaryKey(keys) => return keys.next_value(&self.spec.name, ty, config),
            ColumnRule::ForeignKey { matched, fallback } => {
                // Even rows cycle through filtered parents, odd rows spread out.
                if !matched.is_empty() && (index % 2 == 0 || fallback.is_empty()) {
                    return matched[(index / 2) % matched.len()].clone();
                }
                if !fallback.is_empty() {
                    return fallback[self.rng.gen_range_usize(fallback.len())].clone();
                }
            }
            ColumnRule::Filtered(domain) => {
                let k = domain.slot_count(ty);
                let slot = index % (k + 1);
                if slot < k {
                    if let Some(v) = domain.matching_value(ty, slot, (index / (k + 1)) as u64) {
                        return v;
                    }
                }
            }
            ColumnRule::Free => {}
        }
        self.free_value(index, config)
    }

    fn free_value(&mut self, index: usize, config: &SynthConfig) -> SqlValue {
        let cycle = self.edges.len() + 1;
        if !self.edges.is_empty() && index % cycle < self.edges.len() {
            let edge = &self.edges[index % cycle];
            if !edge.is_null() || self.spec.nullable {
                return edge.clone();
            }
        }
        let draw = self.rng.next_u64();
        default_value(&self.spec.name, self.spec.data_type, draw, self.key_domain, config)
    }

    fn claim(&mut self, value: &SqlValue) {
        if let ColumnRule::PrimaryKey(keys) = &mut self.rule {
            keys.used.insert(value.to_string());
        }
    }
}

/// Unique key values: filter-matching candidates, then a running sequence.
struct KeySequence {
    candidates: VecDeque<SqlValue>,
    used: BTreeSet<String>,
    next: i64,
}

impl KeySequence {
    const MAX_PROBES: i64 = 100_000;

    fn next_value(&mut self, column: &str, ty: CanonicalType, config: &SynthConfig) -> SqlValue {
        while let Some(candidate) = self.candidates.pop_front() {
            if self.used.insert(candidate.to_string()) {
                return candidate;
            }
        }
        let start = self.next;
        loop {
            let n = self.next;
            self.next += 1;
            let value = match ty {
                CanonicalType::Integer | CanonicalType::BigInt => SqlValue::Integer(n),
                CanonicalType::Decimal { .. } => SqlValue::Real(n as f64),
                _ if n - start < Self::MAX_PROBES => default_value(column, ty, n as u64, u64::MAX, config),
                _ => SqlValue::Text(format!("{column}_{n}")),
            };
            if self.used.insert(value.to_string()) {
                return value;
            }
        }
    }
}

/// SQL predicate for one filter, with literals rendered as stored values.
pub fn filter_predicate(column: &str, filter: &FilterValue, ty: CanonicalType) -> String {
    let col = quote_ident(column);
    let lit = |l: &Literal| SqlValue::from_literal(l, ty).to_string();
    match filter {
        FilterValue::Eq { value } => format!("{col} = {}", lit(value)),
        FilterValue::In { values } if values.is_empty() => "0 = 1".to_string(),
        FilterValue::In { values } => {
            let list: Vec<String> = values.iter().map(lit).collect();
            format!("{col} IN ({})", list.join(", "))
        }
        FilterValue::Between { low, high } => {
            format!("{col} BETWEEN {} AND {}", lit(low), lit(high))
        }
        FilterValue::Cmp { op, value } => format!("{col} {} {}", op.symbol(), lit(value)),
        FilterValue::Like { pattern } => format!("{col} LIKE {}", SqlValue::Text(pattern.clone())),
    }
}

/// Distinct `column` values of rows matching the table's filters, oldest
/// first. Filters on one column are OR-ed; columns are AND-ed, falling back
/// to OR when no row satisfies all of them.
pub fn matching_values(
    db: &Database,
    filters: &FilterSet,
    schema: &TableSchema,
    column: &str,
) -> Result<Vec<SqlValue>> {
    let predicates: Vec<String> = filters
        .for_table(&schema.name)
        .filter_map(|(c, values)| {
            let ty = schema.column(&c.column)?.data_type;
            let parts: Vec<String> = values.iter().map(|f| filter_predicate(&c.column, f, ty)).collect();
            Some(format!("({})", parts.join(" OR ")))
        })
        .collect();
    if predicates.is_empty() {
        return Ok(Vec::new());
    }
    let select = |predicate: String| {
        format!(
            "SELECT {c} FROM {t} WHERE {c} IS NOT NULL AND ({predicate}) GROUP BY {c} ORDER BY MIN(rowid)",
            c = quote_ident(column),
            t = quote_ident(&schema.name)
        )
    };
    let strict = db.column_values(&select(predicates.join(" AND ")))?;
    if !strict.is_empty() || predicates.len() == 1 {
        return Ok(strict);
    }
    debug!(table = %schema.name, "no row matches every filter; narrowing with any filter");
    db.column_values(&select(predicates.join(" OR ")))
}

/// Keep the first row per scalar-subquery key so those subqueries return at
/// most one row. Returns the number of rows removed.
pub fn enforce_scalar_uniqueness(db: &Database, schema: &TableSchema, keys: &[ScalarKey]) -> u64 {
    let table = quote_ident(&schema.name);
    let mut removed = 0;
    for key in keys.iter().filter(|k| k.table == schema.name) {
        if key.columns.is_empty() || !key.columns.iter().all(|c| schema.has_column(c)) {
            continue;
        }
        let group: Vec<String> = key.columns.iter().map(|c| quote_ident(c)).collect();
        let sql = format!(
            "DELETE FROM {table} WHERE rowid NOT IN (SELECT MIN(rowid) FROM {table} GROUP BY {})",
            group.join(", ")
        );
        let before = db.row_count(&schema.name).unwrap_or(0);
        match db.execute_batch(&sql) {
            Ok(()) => {
                let after = db.row_count(&schema.name).unwrap_or(before);
                removed += before.saturating_sub(after);
            }
            Err(e) => warn!(table = %schema.name, error = %e, "scalar key deduplication failed"),
        }
    }
    if removed > 0 {
        debug!(table = %schema.name, removed, "deduplicated scalar-subquery keys");
    }
    removed
}
