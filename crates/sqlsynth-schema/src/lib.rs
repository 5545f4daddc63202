//! Query-directed schema discovery for sqlsynth
//!
//! Reads analytical SQL and recovers what a synthesizer needs to know:
//! - Tables and typed columns (CTE and derived-table names excluded)
//! - Join equalities and inferred foreign keys
//! - Literal predicates per base column, through CTE lineage
//! - Scalar-subquery keys, negated branches and contradiction hints
//!
//! Nothing here touches a database; DDL and live catalogs only override
//! inferred column lists.

pub mod analysis;
pub mod ast;
pub mod ddl;
pub mod dialect;
pub mod filters;
pub mod fk;
pub mod heuristics;
pub mod joins;
pub mod names;
pub mod schema;
pub mod scope;
pub mod types;

pub use analysis::{AggregateBound, CorpusAnalysis, QueryAnalysis, ScalarKey};
pub use ddl::{DdlCatalog, ReferenceCatalog};
pub use dialect::SqlDialect;
pub use filters::{extract_filter_values, fold_literal, CmpOp, FilterSet, FilterValue, Literal};
pub use fk::{find_primary_key_column, generation_order, infer_foreign_keys, FkEdge, KeyModel};
pub use heuristics::{Heuristics, TypeInferenceConfig, TypeOrigin};
pub use joins::{extract_join_edges, JoinEdge};
pub use schema::{extract_schema, ColumnSpec, SchemaSet, TableSchema};
pub use scope::{ColumnRef, ColumnResolver, Strategy};
pub use types::{fit_decimal, CanonicalType};

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("SQL parse error: {0}")]
    Parse(String),
    #[error("no SQL statement found")]
    EmptyInput,
    #[error("unsupported statement (expected a query): {0}")]
    UnsupportedStatement(String),
    #[error("unknown SQL dialect: {0}")]
    UnknownDialect(String),
}
