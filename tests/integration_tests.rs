//! Integration tests for the complete sqlsynth pipeline
//!
//! These tests run a query directory end to end:
//! - query files → corpus analysis → SQLite database file
//! - verify/repair → per-query reports and `summary.json`
//! - reference catalogs (DDL text and an existing database) → schema overrides
//!
//! Run with: cargo test --test integration_tests

use std::fs;
use std::path::Path;

use sqlsynth_engine::{
    load_corpus, read_query_files, write_reports, Database, JsonPackRecipe, Populator, QueryReport,
    SqliteCatalog, SynthConfig, Verifier,
};
use sqlsynth_schema::{CanonicalType, ColumnRef, DdlCatalog, Heuristics, SqlDialect};
use tempfile::tempdir;

fn write_queries(dir: &Path, queries: &[(&str, &str)]) -> anyhow::Result<()> {
    fs::create_dir_all(dir)?;
    for (name, sql) in queries {
        fs::write(dir.join(format!("{name}.sql")), sql)?;
    }
    Ok(())
}

const CORPUS: &[(&str, &str)] = &[
    (
        "q01_orders",
        "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id \
         WHERE c.state = 'WA' AND o.total > 100;",
    ),
    (
        "q02_quarter",
        "-- first quarter revenue\n\
         SELECT d.d_year, SUM(s.amount) FROM sales s \
         JOIN date_dim d ON s.sold_date_sk = d.d_date_sk \
         WHERE d.d_date BETWEEN DATE '2000-01-01' AND DATE '2000-03-31' \
         GROUP BY d.d_year",
    ),
    (
        "q03_never",
        "SELECT * FROM orders o WHERE o.status = 'A' AND o.priority = 'A' AND o.status <> o.priority",
    ),
    ("q04_broken", "SELEC * FORM nowhere"),
];

// ============================================================================
// Corpus directory → database + reports
// ============================================================================

#[test]
fn test_corpus_directory_builds_database_and_reports() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let queries = dir.path().join("queries");
    write_queries(&queries, CORPUS)?;

    let files = read_query_files(&queries)?;
    assert_eq!(files.len(), 4);
    let config = SynthConfig::default();
    let loaded = load_corpus(&files, SqlDialect::Generic, &Heuristics::default(), None, 1);
    assert_eq!(loaded.failures.len(), 1);
    assert_eq!(loaded.failures[0].query, "q04_broken");

    let db_path = dir.path().join("synth.db");
    let db = Database::open(&db_path)?;
    let population = Populator::new(&db, &loaded.analysis, &config).build()?;
    assert!(population.failed_tables.is_empty());
    assert!(population.total_rows() > 0);

    let mut reports: Vec<QueryReport> = loaded.failures.clone();
    reports.extend(Verifier::new(&db, &loaded.analysis, &config, SqlDialect::Generic).verify_all());

    let out = dir.path().join("out");
    let summary = write_reports(&out, &reports)?;
    assert_eq!(summary.total, 4);
    assert_eq!(summary.resolved, 2);
    assert_eq!(summary.unsat_expected, 1);
    assert_eq!(summary.unresolved_queries, vec!["q04_broken".to_string()]);
    assert!(!summary.all_settled());

    for (name, _) in CORPUS {
        assert!(out.join("reports").join(format!("{name}.json")).exists(), "{name}");
    }
    let written: serde_json::Value = serde_json::from_str(&fs::read_to_string(out.join("summary.json"))?)?;
    assert_eq!(written["resolved"], 2);

    drop(db);
    assert!(db_path.exists());
    let reopened = Database::open(&db_path)?;
    assert!(reopened.row_count("orders")? >= config.fact_rows as u64);
    Ok(())
}

#[test]
fn test_rebuilding_is_deterministic() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let queries = dir.path().join("queries");
    write_queries(&queries, &CORPUS[..2])?;
    let files = read_query_files(&queries)?;
    let config = SynthConfig::default();

    let mut snapshots = Vec::new();
    for name in ["first.db", "second.db"] {
        let loaded = load_corpus(&files, SqlDialect::Generic, &Heuristics::default(), None, 1);
        let db = Database::open(&dir.path().join(name))?;
        Populator::new(&db, &loaded.analysis, &config).build()?;
        snapshots.push(db.query_values("SELECT * FROM orders ORDER BY rowid")?);
    }
    assert_eq!(snapshots[0], snapshots[1]);
    Ok(())
}

// ============================================================================
// Recipes
// ============================================================================

#[test]
fn test_json_pack_recipe_resolves_after_generic_repair() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let queries = dir.path().join("queries");
    // A function-wrapped column yields no filter for the generic solver.
    write_queries(
        &queries,
        &[(
            "q_pack",
            "SELECT * FROM item i WHERE UPPER(i.category) = 'BOOKS' AND i.price > 10",
        )],
    )?;
    let pack = dir.path().join("pack.json");
    fs::write(
        &pack,
        r#"{"q_pack": {"item": [{"category": "books", "price": 25.5}]}}"#,
    )?;

    let files = read_query_files(&queries)?;
    let config = SynthConfig {
        force_seed_attempts: 1,
        local_search_trials: 0,
        topup_multipliers: vec![2],
        ..SynthConfig::default()
    };
    let loaded = load_corpus(&files, SqlDialect::Generic, &Heuristics::default(), None, 1);
    let db = Database::in_memory()?;
    Populator::new(&db, &loaded.analysis, &config).build()?;
    let recipe = JsonPackRecipe::load(&pack, &config)?;

    let reports = Verifier::new(&db, &loaded.analysis, &config, SqlDialect::Generic)
        .with_recipe(Some(&recipe))
        .verify_all();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].success, "{:?}", reports[0]);
    assert!(reports[0].recipe_applied);
    Ok(())
}

// ============================================================================
// Reference catalogs
// ============================================================================

#[test]
fn test_ddl_reference_replaces_columns_and_types() -> anyhow::Result<()> {
    let ddl = DdlCatalog::parse(
        "CREATE TABLE customers (id INTEGER PRIMARY KEY, state CHAR(2) NOT NULL, joined DATE);",
        SqlDialect::Generic,
    )?;
    let dir = tempdir()?;
    let queries = dir.path().join("queries");
    write_queries(&queries, &CORPUS[..1])?;
    let files = read_query_files(&queries)?;
    let loaded = load_corpus(&files, SqlDialect::Generic, &Heuristics::default(), Some(&ddl), 1);

    let customers = loaded
        .analysis
        .schemas
        .get("customers")
        .ok_or_else(|| anyhow::anyhow!("customers missing"))?;
    assert!(customers.has_column("joined"));
    assert_eq!(
        loaded.analysis.schemas.column_type(&ColumnRef::new("customers", "joined")),
        Some(CanonicalType::Date)
    );
    Ok(())
}

#[test]
fn test_existing_database_serves_as_reference() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let reference_path = dir.path().join("reference.db");
    {
        let reference = Database::open(&reference_path)?;
        reference.execute_batch(
            "CREATE TABLE customers (id INTEGER NOT NULL, state TEXT, loyalty_tier INTEGER);",
        )?;
    }
    let catalog = SqliteCatalog::open(&reference_path)?;

    let queries = dir.path().join("queries");
    write_queries(&queries, &CORPUS[..1])?;
    let files = read_query_files(&queries)?;
    let loaded = load_corpus(&files, SqlDialect::Generic, &Heuristics::default(), Some(&catalog), 1);
    let customers = loaded
        .analysis
        .schemas
        .get("customers")
        .ok_or_else(|| anyhow::anyhow!("customers missing"))?;
    assert!(customers.has_column("loyalty_tier"));
    assert!(customers.has_column("state"));
    assert!(loaded.analysis.schemas.get("orders").is_some());

    let db = Database::in_memory()?;
    let config = SynthConfig::default();
    Populator::new(&db, &loaded.analysis, &config).build()?;
    let report = Verifier::new(&db, &loaded.analysis, &config, SqlDialect::Generic)
        .verify(&loaded.analysis.queries[0]);
    assert!(report.success, "{report:?}");
    Ok(())
}
