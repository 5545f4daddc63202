use std::time::Duration;

use sqlsynth_schema::SchemaError;

/// Failure taxonomy for synthesis and verification.
///
/// Only `Io` and `Json` are fatal for a batch; the rest are recorded against
/// the query that produced them.
#[derive(Debug, thiserror::Error)]
pub enum SynthError {
    #[error("parse error: {0}")]
    Parse(#[from] SchemaError),

    #[error("no base table owns column `{column}`")]
    SchemaInferenceGap { column: String },

    #[error("constraints are unsatisfiable: {0}")]
    ConstraintUnsatisfiable(String),

    #[error("query did not finish within {0:?}")]
    ExecutionTimeout(Duration),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("unknown witness recipe: {0}")]
    UnknownRecipe(String),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SynthError {
    /// Errors worth another attempt with different data.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SynthError::ExecutionTimeout(_) | SynthError::Execution(_) | SynthError::Sqlite(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SynthError>;
