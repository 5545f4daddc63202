//! Reading a directory of SQL files into one analysed corpus.

use std::path::{Path, PathBuf};

use sqlsynth_schema::{CorpusAnalysis, Heuristics, QueryAnalysis, ReferenceCatalog, SqlDialect};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::report::QueryReport;

#[derive(Debug, Clone)]
pub struct QueryFile {
    /// File stem, used as the query name in reports and recipes.
    pub name: String,
    pub path: PathBuf,
    pub sql: String,
}

/// Every `*.sql` file under `dir`, sorted by path.
pub fn read_query_files(dir: &Path) -> Result<Vec<QueryFile>> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|s| s.eq_ignore_ascii_case("sql")))
        .collect();
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        let sql = std::fs::read_to_string(&path)?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push(QueryFile { name, path, sql });
    }
    Ok(files)
}

/// Analysed corpus plus a failed report for every file that did not parse.
#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub analysis: CorpusAnalysis,
    pub failures: Vec<QueryReport>,
}

pub fn load_corpus(
    files: &[QueryFile],
    dialect: SqlDialect,
    heuristics: &Heuristics,
    reference: Option<&dyn ReferenceCatalog>,
    min_rows_required: u64,
) -> LoadedCorpus {
    let mut queries = Vec::with_capacity(files.len());
    let mut failures = Vec::new();
    for file in files {
        match QueryAnalysis::analyze(file.name.clone(), &file.sql, dialect, heuristics, reference) {
            Ok(q) => queries.push(q),
            Err(e) => {
                warn!(query = %file.name, path = %file.path.display(), error = %e, "query skipped");
                failures.push(QueryReport::failed(file.name.clone(), min_rows_required, e));
            }
        }
    }
    let analysis = CorpusAnalysis::new(queries, reference);
    info!(
        queries = analysis.queries.len(),
        failed = failures.len(),
        tables = analysis.schemas.len(),
        "corpus loaded"
    );
    LoadedCorpus { analysis, failures }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_files_load_in_order_and_bad_ones_are_reported() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("nested"))?;
        std::fs::write(dir.path().join("b.sql"), "SELECT * FROM t WHERE t.k = 1")?;
        std::fs::write(dir.path().join("nested/a.SQL"), "-- note\nSELECT s.x FROM s")?;
        std::fs::write(dir.path().join("c.sql"), "SELEC broken")?;
        std::fs::write(dir.path().join("readme.txt"), "ignored")?;

        let files = read_query_files(dir.path())?;
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);

        let loaded = load_corpus(&files, SqlDialect::Generic, &Heuristics::default(), None, 1);
        assert_eq!(loaded.analysis.queries.len(), 2);
        assert_eq!(loaded.failures.len(), 1);
        assert_eq!(loaded.failures[0].query, "c");
        assert!(loaded.analysis.schemas.contains("t"));
        Ok(())
    }
}
