//! End-to-end synthesis scenarios on real SQLite databases.

use sqlsynth_engine::{
    verify_witness, Database, EdgeTemplate, Populator, RepairStage, SqlValue, SynthConfig, Verifier,
};
use sqlsynth_schema::{CorpusAnalysis, Heuristics, QueryAnalysis, SqlDialect};

fn corpus(sqls: &[(&str, &str)]) -> anyhow::Result<CorpusAnalysis> {
    let h = Heuristics::default();
    let queries = sqls
        .iter()
        .map(|(name, sql)| QueryAnalysis::analyze(*name, sql, SqlDialect::Generic, &h, None))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CorpusAnalysis::new(queries, None))
}

const SCENARIO_A: &str = "SELECT * FROM orders o JOIN customers c ON o.customer_id = c.id \
                          WHERE c.state = 'WA' AND o.total > 100";

#[test]
fn scenario_a_bulk_rows_join_on_a_matching_customer() -> anyhow::Result<()> {
    let corpus = corpus(&[("scenario_a", SCENARIO_A)])?;
    let db = Database::in_memory()?;
    let config = SynthConfig::default();
    Populator::new(&db, &corpus, &config).build()?;

    let rows = db.query_values(
        "SELECT o.customer_id, c.id, c.state FROM orders o JOIN customers c ON o.customer_id = c.id \
         WHERE c.state = 'WA' AND o.total > 100",
    )?;
    assert!(!rows.is_empty());
    for row in &rows {
        assert_eq!(row[0], row[1]);
        assert_eq!(row[2], SqlValue::Text("WA".into()));
    }

    let report = Verifier::new(&db, &corpus, &config, SqlDialect::Generic).verify(&corpus.queries[0]);
    assert!(report.success, "{report:?}");
    assert_eq!(report.resolved_by, Some(RepairStage::Initial));
    Ok(())
}

#[test]
fn scenario_a_witness_shares_one_key_value() -> anyhow::Result<()> {
    let query = QueryAnalysis::analyze(
        "scenario_a",
        SCENARIO_A,
        SqlDialect::Generic,
        &Heuristics::default(),
        None,
    )?;
    let db = Database::in_memory()?;
    let (manifest, rows) = verify_witness(&db, &query, SqlDialect::Generic, &SynthConfig::default(), 0)?;
    assert!(rows >= 1);
    let customer = &manifest.tables["customers"][0];
    let order = &manifest.tables["orders"][0];
    assert_eq!(customer["id"], order["customer_id"]);
    assert_eq!(customer["state"], SqlValue::Text("WA".into()));
    Ok(())
}

#[test]
fn scenario_b_template_customer_is_linked_from_results() -> anyhow::Result<()> {
    let sql = "SELECT o.customer_id, c.state FROM orders o JOIN customers c ON o.customer_id = c.id \
               WHERE c.state = 'CA'";
    let corpus = corpus(&[("scenario_b", sql)])?;
    let template: EdgeTemplate = serde_json::from_str(r#"{"customers":[{"id":1,"state":"CA"}]}"#)?;
    let db = Database::in_memory()?;
    let config = SynthConfig::default();
    Populator::new(&db, &corpus, &config).with_template(&template).build()?;

    let rows = db.query_values(sql)?;
    assert!(rows
        .iter()
        .any(|row| row[0] == SqlValue::Integer(1) && row[1] == SqlValue::Text("CA".into())));
    Ok(())
}

#[test]
fn scenario_c_one_top_up_reaches_the_having_threshold() -> anyhow::Result<()> {
    let sql = "SELECT i.id FROM sales s JOIN item i ON s.item_id = i.id \
               WHERE i.color = 'red' GROUP BY i.id HAVING COUNT(*) >= 3";
    let corpus = corpus(&[("scenario_c", sql)])?;
    let db = Database::in_memory()?;
    let config = SynthConfig {
        fact_rows: 2,
        dimension_rows: 1,
        ..SynthConfig::default()
    };
    Populator::new(&db, &corpus, &config).build()?;
    assert!(db.query_values(sql)?.is_empty());

    let report = Verifier::new(&db, &corpus, &config, SqlDialect::Generic).verify(&corpus.queries[0]);
    assert!(report.success, "{report:?}");
    assert_eq!(report.resolved_by, Some(RepairStage::TopUp));
    assert_eq!(report.topup_attempts, 1);
    assert_eq!(report.forced_seed_attempts, 0);
    assert!(!db.query_values(sql)?.is_empty());
    Ok(())
}

#[test]
fn pinned_inequality_is_declared_without_seeding() -> anyhow::Result<()> {
    let sql = "SELECT * FROM x JOIN y ON x.k = y.k WHERE x.k = 7 AND x.k <> y.k";
    let corpus = corpus(&[("never", sql)])?;
    let db = Database::in_memory()?;
    let config = SynthConfig::default();
    Populator::new(&db, &corpus, &config).build()?;

    let reports = Verifier::new(&db, &corpus, &config, SqlDialect::Generic).verify_all();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].unsat_expected);
    assert!(!reports[0].success);
    assert_eq!(reports[0].topup_attempts + reports[0].forced_seed_attempts, 0);
    assert!(reports[0].is_settled());
    Ok(())
}

#[test]
fn shared_database_serves_every_query() -> anyhow::Result<()> {
    let corpus = corpus(&[
        ("a", SCENARIO_A),
        (
            "b",
            "SELECT c.state, COUNT(*) FROM orders o JOIN customers c ON o.customer_id = c.id \
             WHERE c.state IN ('CA', 'NY') GROUP BY c.state",
        ),
        (
            "c",
            "WITH big AS (SELECT customer_id, total FROM orders WHERE total BETWEEN 500 AND 900) \
             SELECT b.total FROM big b JOIN customers c ON b.customer_id = c.id",
        ),
    ])?;
    let db = Database::in_memory()?;
    let config = SynthConfig::default();
    Populator::new(&db, &corpus, &config).build()?;
    let reports = Verifier::new(&db, &corpus, &config, SqlDialect::Generic).verify_all();
    for report in &reports {
        assert!(report.success, "{report:?}");
    }
    Ok(())
}
