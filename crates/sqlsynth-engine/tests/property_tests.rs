use proptest::prelude::*;
use sqlsynth_engine::{propagate, Database, Populator, SqlValue, SynthConfig, WitnessSolver};
use sqlsynth_schema::{
    ColumnRef, CorpusAnalysis, FilterSet, FilterValue, Heuristics, JoinEdge, Literal, QueryAnalysis,
    SqlDialect,
};

const TABLES: [&str; 4] = ["a", "b", "c", "d"];
const COLUMNS: [&str; 3] = ["k", "m", "v"];

const STAR: &str = "SELECT * FROM sales s \
                    JOIN customers c ON s.customer_id = c.id \
                    JOIN date_dim d ON s.sold_date_sk = d.d_date_sk \
                    WHERE c.state = 'WA' AND d.d_year = 2001 AND s.amount > 50";

fn column_strategy() -> impl Strategy<Value = ColumnRef> {
    (0..TABLES.len(), 0..COLUMNS.len()).prop_map(|(t, c)| ColumnRef::new(TABLES[t], COLUMNS[c]))
}

fn joins_strategy() -> impl Strategy<Value = Vec<JoinEdge>> {
    prop::collection::vec((column_strategy(), column_strategy()), 0..8)
        .prop_map(|pairs| pairs.into_iter().filter_map(|(a, b)| JoinEdge::new(a, b)).collect())
}

fn filters_strategy() -> impl Strategy<Value = FilterSet> {
    prop::collection::vec((column_strategy(), 0..5i64, any::<bool>()), 0..6).prop_map(|entries| {
        let mut filters = FilterSet::default();
        for (column, n, ranged) in entries {
            let value = Literal::Number(n.to_string());
            let filter = if ranged {
                FilterValue::Between {
                    low: value,
                    high: Literal::Number((n + 10).to_string()),
                }
            } else {
                FilterValue::Eq { value }
            };
            filters.insert(column, filter);
        }
        filters
    })
}

fn corpus(sql: &str) -> CorpusAnalysis {
    let query = QueryAnalysis::analyze("star", sql, SqlDialect::Generic, &Heuristics::default(), None)
        .expect("analyze star query");
    CorpusAnalysis::new(vec![query], None)
}

fn count(db: &Database, sql: &str) -> i64 {
    match db.column_values(sql).expect("count query").first() {
        Some(SqlValue::Integer(n)) => *n,
        other => panic!("unexpected count {other:?}"),
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn propagation_is_a_fixed_point(filters in filters_strategy(), joins in joins_strategy()) {
        let once = propagate(&filters, &joins);
        let twice = propagate(&once, &joins);
        prop_assert_eq!(&twice, &once);
        for column in filters.columns() {
            prop_assert!(once.get(column).is_some());
        }
    }

    #[test]
    fn witness_manifests_are_deterministic(year in 1990u32..2015, quantity in 0u32..500, variant in 0u64..64) {
        let sql = format!(
            "SELECT * FROM store_sales ss JOIN date_dim d ON ss.ss_sold_date_sk = d.d_date_sk \
             WHERE d.d_year = {year} AND ss.ss_quantity > {quantity}"
        );
        let analysis = QueryAnalysis::analyze("q", &sql, SqlDialect::Generic, &Heuristics::default(), None)
            .expect("analyze");
        let config = SynthConfig::default();
        let solver = WitnessSolver::new(&analysis.schemas, SqlDialect::Generic, &config);
        let first = solver.solve("q", &sql, variant).expect("solve").to_json().expect("json");
        let second = solver.solve("q", &sql, variant).expect("solve").to_json().expect("json");
        prop_assert_eq!(first, second);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 16,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn bulk_population_keeps_keys_and_not_null(
        fact_rows in 1usize..60,
        dimension_rows in 1usize..20,
        multiplier in 1usize..4,
        seed in any::<u64>(),
    ) {
        let corpus = corpus(STAR);
        let db = Database::in_memory().expect("db");
        let config = SynthConfig {
            fact_rows,
            dimension_rows,
            seed,
            ..SynthConfig::default()
        };
        let populator = Populator::new(&db, &corpus, &config);
        let summary = populator.build().expect("build");
        prop_assert!(summary.failed_tables.is_empty());
        populator.populate(multiplier);

        for fk in &corpus.keys.foreign_keys {
            let orphans = format!(
                "SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" NOT IN (SELECT \"{}\" FROM \"{}\")",
                fk.owner.table, fk.owner.column, fk.target.column, fk.target.table
            );
            prop_assert_eq!(count(&db, &orphans), 0, "{} -> {}", fk.owner, fk.target);
        }
        for table in corpus.schemas.iter() {
            for column in table.columns.iter().filter(|c| !c.nullable) {
                let nulls = format!(
                    "SELECT COUNT(*) FROM \"{}\" WHERE \"{}\" IS NULL",
                    table.name, column.name
                );
                prop_assert_eq!(count(&db, &nulls), 0, "{}.{}", table.name, column.name);
            }
        }
    }

    #[test]
    fn witness_rows_fill_every_not_null_column(variant in 0u64..1_000) {
        let corpus = corpus(STAR);
        let config = SynthConfig::default();
        let manifest = WitnessSolver::new(&corpus.schemas, SqlDialect::Generic, &config)
            .solve("star", STAR, variant)
            .expect("solve");
        for (table, rows) in &manifest.tables {
            let schema = corpus.schemas.get(table).expect("known table");
            for row in rows {
                for column in schema.columns.iter().filter(|c| !c.nullable) {
                    prop_assert!(row.get(&column.name).is_some_and(|v| !v.is_null()));
                }
            }
        }
    }

    #[test]
    fn single_equality_filters_match_after_population(
        (column, literal) in prop_oneof![
            ("(status|region|category)", "[a-z]{1,8}").prop_map(|(c, v)| (c, format!("'{v}'"))),
            ("(qty|quantity|units)", 0i64..10_000).prop_map(|(c, v)| (c, v.to_string())),
        ],
    ) {
        let sql = format!("SELECT * FROM t WHERE t.{column} = {literal}");
        let corpus = corpus(&sql);
        let db = Database::in_memory().expect("db");
        let config = SynthConfig::default();
        Populator::new(&db, &corpus, &config).build().expect("build");
        let hits = count(&db, &sql.replacen('*', "COUNT(*)", 1));
        prop_assert!(hits >= 1, "{sql}");
    }
}
