//! Synthetic databases for query corpora.
//!
//! Given queries analysed by `sqlsynth-schema`, this crate builds a SQLite
//! database on which every satisfiable query returns rows:
//! - bulk population in FK order with join-propagated filters
//! - minimal-witness manifests (one row per table instance)
//! - a verify/repair loop with probe timeouts and contradiction detection

pub mod compat;
pub mod config;
pub mod corpus;
pub mod db;
pub mod domain;
pub mod error;
pub mod inline;
pub mod populate;
pub mod propagate;
pub mod qualify;
pub mod recipe;
pub mod report;
pub mod rng;
pub mod template;
pub mod unionfind;
pub mod unsat;
pub mod value;
pub mod verify;
pub mod witness;

pub use config::SynthConfig;
pub use corpus::{load_corpus, read_query_files, LoadedCorpus, QueryFile};
pub use db::{Database, SqliteCatalog};
pub use error::{Result, SynthError};
pub use populate::{PopulationSummary, Populator};
pub use propagate::propagate;
pub use recipe::{load_recipe, JsonPackRecipe, WitnessRecipe};
pub use report::{write_reports, BatchSummary, QueryReport, RepairStage};
pub use template::EdgeTemplate;
pub use unsat::find_contradiction;
pub use value::SqlValue;
pub use verify::{verify_witness, Verifier};
pub use witness::{Manifest, WitnessSolver};
