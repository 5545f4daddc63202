//! sqlsynth CLI
//!
//! - `build`: one synthetic SQLite database for a directory of queries, verified query by query
//! - `witness`: minimal witness rows for a single query, exported as a manifest
//! - `schema`: the inferred tables, keys and propagated filters as JSON

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use sqlsynth_engine::{
    load_corpus, load_recipe, propagate, read_query_files, verify_witness, write_reports,
    Database, EdgeTemplate, Populator, QueryFile, QueryReport, SqliteCatalog, SynthConfig,
    Verifier,
};
use sqlsynth_schema::{
    DdlCatalog, FilterValue, Heuristics, KeyModel, QueryAnalysis, ReferenceCatalog, SchemaSet,
    SqlDialect,
};

const DEFAULT_LOG_FILTER: &str = "warn,sqlsynth=info";

#[derive(Parser)]
#[command(name = "sqlsynth")]
#[command(
    author,
    version,
    about = "sqlsynth: query-directed synthetic databases for SQL corpora"
)]
struct Cli {
    /// Log at debug level (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build one database for every `*.sql` file under a directory, then
    /// probe each query and repair until it returns rows.
    ///
    /// Exits with status 1 when any query is still unresolved.
    Build {
        /// Directory of query files
        queries: PathBuf,

        /// SQLite database to write
        #[arg(long)]
        db: PathBuf,

        /// Directory for `reports/*.json` and `summary.json`
        #[arg(short, long, default_value = "sqlsynth-out")]
        out: PathBuf,

        /// Edge-case template (JSON) seeding values and rows before generation
        #[arg(long)]
        template: Option<PathBuf>,

        /// Witness recipe to run after force-seeding (only `json-pack` is built in)
        #[arg(long, requires = "recipe_file")]
        recipe: Option<String>,

        /// Data file for the recipe
        #[arg(long)]
        recipe_file: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Solve minimal witness rows for one query and check they return a row.
    Witness {
        /// Query file
        query: PathBuf,

        /// SQLite database to write (in-memory when omitted)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Seed variant; the same variant always yields the same rows
        #[arg(long, default_value_t = 0)]
        variant: u64,

        /// Write the manifest here instead of stdout
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Print inferred schemas, keys, generation order and propagated filters.
    Schema {
        /// A query file or a directory of them
        input: PathBuf,

        /// Write JSON here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,

        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct CommonArgs {
    /// Synthesis budgets (JSON, missing fields take defaults)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Type inference tables (JSON, missing fields take defaults)
    #[arg(long)]
    heuristics: Option<PathBuf>,

    /// Parsing dialect: generic, ansi, postgres, duckdb, sqlite, mysql, snowflake, bigquery, hive
    #[arg(short, long, default_value = "generic")]
    dialect: SqlDialect,

    /// Reference schema: a `.sql` file of CREATE TABLE statements or a SQLite database
    #[arg(short, long)]
    reference: Option<PathBuf>,
}

impl CommonArgs {
    fn config(&self) -> Result<SynthConfig> {
        match &self.config {
            Some(path) => SynthConfig::load(path)
                .with_context(|| format!("loading config {}", path.display())),
            None => Ok(SynthConfig::default()),
        }
    }

    fn heuristics(&self) -> Result<Heuristics> {
        match &self.heuristics {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("reading heuristics {}", path.display()))?;
                Ok(serde_json::from_str(&text)?)
            }
            None => Ok(Heuristics::default()),
        }
    }

    fn reference(&self) -> Result<Option<Box<dyn ReferenceCatalog>>> {
        self.reference
            .as_deref()
            .map(|path| load_reference(path, self.dialect))
            .transpose()
    }
}

fn load_reference(path: &Path, dialect: SqlDialect) -> Result<Box<dyn ReferenceCatalog>> {
    let is_ddl = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("sql"));
    if is_ddl {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading reference DDL {}", path.display()))?;
        let catalog = DdlCatalog::parse(&text, dialect)?;
        tracing::info!(tables = catalog.len(), path = %path.display(), "reference DDL loaded");
        Ok(Box::new(catalog))
    } else {
        let catalog = SqliteCatalog::open(path)
            .with_context(|| format!("opening reference database {}", path.display()))?;
        Ok(Box::new(catalog))
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("info,sqlsynth=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Build {
            queries,
            db,
            out,
            template,
            recipe,
            recipe_file,
            common,
        } => cmd_build(
            &common,
            &queries,
            &db,
            &out,
            template.as_deref(),
            recipe.as_deref().zip(recipe_file.as_deref()),
        ),
        Commands::Witness {
            query,
            db,
            variant,
            manifest,
            common,
        } => cmd_witness(&common, &query, db.as_deref(), variant, manifest.as_deref()),
        Commands::Schema { input, out, common } => {
            cmd_schema(&common, &input, out.as_deref())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn cmd_build(
    common: &CommonArgs,
    queries: &Path,
    db_path: &Path,
    out: &Path,
    template: Option<&Path>,
    recipe: Option<(&str, &Path)>,
) -> Result<ExitCode> {
    println!("{} {}", "Analysing".green().bold(), queries.display());

    let config = common.config()?;
    let heuristics = common.heuristics()?;
    let reference = common.reference()?;
    let files = read_query_files(queries)
        .with_context(|| format!("reading queries from {}", queries.display()))?;
    if files.is_empty() {
        return Err(anyhow!("no .sql files under {}", queries.display()));
    }
    let loaded = load_corpus(
        &files,
        common.dialect,
        &heuristics,
        reference.as_deref(),
        config.min_rows_required,
    );
    let corpus = &loaded.analysis;

    let template = template
        .map(|path| {
            EdgeTemplate::load(path).with_context(|| format!("loading template {}", path.display()))
        })
        .transpose()?;
    let recipe = recipe
        .map(|(name, path)| {
            load_recipe(name, path, &config).with_context(|| format!("loading recipe {name}"))
        })
        .transpose()?;

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let db = Database::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;

    println!(
        "{} {} tables for {} queries",
        "Populating".green().bold(),
        corpus.schemas.len(),
        corpus.queries.len()
    );
    let mut populator = Populator::new(&db, corpus, &config);
    if let Some(template) = &template {
        populator = populator.with_template(template);
    }
    let population = populator.build()?;
    println!(
        "  {} rows, {} duplicates removed, {} tables failed",
        population.total_rows(),
        population.deduplicated,
        population.failed_tables.len()
    );

    println!("{} queries", "Verifying".green().bold());
    let verified = Verifier::new(&db, corpus, &config, common.dialect)
        .with_template(template.as_ref())
        .with_recipe(recipe.as_deref())
        .verify_all();
    let mut reports = loaded.failures;
    reports.extend(verified);
    reports.sort_by(|a, b| a.query.cmp(&b.query));

    for report in &reports {
        print_report(report);
    }
    let summary = write_reports(out, &reports)
        .with_context(|| format!("writing reports to {}", out.display()))?;

    println!(
        "{} {} resolved, {} expected-empty, {} unresolved (of {}); {} met the preferred row count",
        "Summary".bold(),
        summary.resolved.to_string().green(),
        summary.unsat_expected.to_string().yellow(),
        summary.unresolved.to_string().red(),
        summary.total,
        summary.preferred_rows_met
    );
    println!("{} {}", "wrote".green().bold(), db_path.display());
    println!("{} {}", "wrote".green().bold(), out.join("summary.json").display());

    Ok(if summary.all_settled() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_report(report: &QueryReport) {
    let status = if report.success {
        "ok".green().bold()
    } else if report.unsat_expected {
        "unsat".yellow().bold()
    } else {
        "FAIL".red().bold()
    };
    let stage = report
        .resolved_by
        .map(|s| format!(" via {s:?}"))
        .unwrap_or_default();
    println!("  {:>5} {} ({} rows{stage})", status, report.query, report.rows);
    if let Some(error) = report.error.as_deref().filter(|_| !report.success) {
        println!("        {}", error.dimmed());
    }
}

fn cmd_witness(
    common: &CommonArgs,
    query_path: &Path,
    db_path: Option<&Path>,
    variant: u64,
    manifest_out: Option<&Path>,
) -> Result<ExitCode> {
    let config = common.config()?;
    let heuristics = common.heuristics()?;
    let reference = common.reference()?;
    let sql = fs::read_to_string(query_path)
        .with_context(|| format!("reading {}", query_path.display()))?;
    let name = query_name(query_path);
    let query = QueryAnalysis::analyze(name, &sql, common.dialect, &heuristics, reference.as_deref())
        .with_context(|| format!("analysing {}", query_path.display()))?;

    let db = match db_path {
        Some(path) => Database::open(path)?,
        None => Database::in_memory()?,
    };
    let (manifest, rows) = verify_witness(&db, &query, common.dialect, &config, variant)?;

    let json = manifest.to_json()?;
    match manifest_out {
        Some(path) => {
            fs::write(path, &json)?;
            println!("{} {}", "wrote".green().bold(), path.display());
        }
        None => println!("{json}"),
    }

    if rows >= 1 {
        eprintln!(
            "{} {} witness rows, query returned {rows}",
            "ok".green().bold(),
            manifest.row_count()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("{} witness rows did not satisfy {}", "FAIL".red().bold(), query.name);
        Ok(ExitCode::from(1))
    }
}

#[derive(Serialize)]
struct SchemaDump<'a> {
    tables: &'a SchemaSet,
    keys: &'a KeyModel,
    /// Keyed by `table.column`; JSON object keys must be strings.
    filters: BTreeMap<String, BTreeSet<FilterValue>>,
    skipped: Vec<&'a str>,
}

fn cmd_schema(common: &CommonArgs, input: &Path, out: Option<&Path>) -> Result<()> {
    let config = common.config()?;
    let heuristics = common.heuristics()?;
    let reference = common.reference()?;
    let files = if input.is_dir() {
        read_query_files(input)?
    } else {
        vec![QueryFile {
            name: query_name(input),
            path: input.to_path_buf(),
            sql: fs::read_to_string(input)
                .with_context(|| format!("reading {}", input.display()))?,
        }]
    };
    let loaded = load_corpus(
        &files,
        common.dialect,
        &heuristics,
        reference.as_deref(),
        config.min_rows_required,
    );
    let corpus = &loaded.analysis;
    let dump = SchemaDump {
        tables: &corpus.schemas,
        keys: &corpus.keys,
        filters: propagate(&corpus.filters, &corpus.joins)
            .iter()
            .map(|(column, values)| (column.to_string(), values.clone()))
            .collect(),
        skipped: loaded.failures.iter().map(|r| r.query.as_str()).collect(),
    };
    let json = serde_json::to_string_pretty(&dump)?;
    match out {
        Some(path) => {
            fs::write(path, json)?;
            println!("{} {}", "wrote".green().bold(), path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn query_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "query".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_arguments_parse() -> Result<()> {
        let cli = Cli::try_parse_from([
            "sqlsynth", "build", "queries", "--db", "out.db", "--dialect", "postgres",
            "--recipe", "json-pack", "--recipe-file", "pack.json",
        ])?;
        let Commands::Build { db, recipe, common, .. } = cli.command else {
            panic!("expected build");
        };
        assert_eq!(db, PathBuf::from("out.db"));
        assert_eq!(recipe.as_deref(), Some("json-pack"));
        assert_eq!(common.dialect, SqlDialect::Postgres);
        Ok(())
    }

    #[test]
    fn recipe_without_data_file_is_rejected() {
        let parsed = Cli::try_parse_from([
            "sqlsynth", "build", "queries", "--db", "out.db", "--recipe", "json-pack",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn sql_reference_files_are_read_as_ddl() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("schema.sql");
        fs::write(&path, "CREATE TABLE item (id INTEGER PRIMARY KEY, color VARCHAR(10));")?;
        let catalog = load_reference(&path, SqlDialect::Generic)?;
        let columns = catalog.table_columns("item").unwrap_or_default();
        assert_eq!(columns.len(), 2);
        Ok(())
    }
}
