//! Error taxonomy for the schema-linking pipeline.
//!
//! Workflows and adapters return [`anyhow::Result`]; the core operations
//! whose failure mode matters to the caller (assembly, sampling, timed
//! extraction) return [`PipelineError`] so the caller can tell a fatal
//! metadata bug from a recoverable retrieval miss.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Stable numeric codes attached to every [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    IllegalParam = 2001,
    RetrieveService = 4004,
    ExecutionService = 4006,
    ExecutionTimeout = 4007,
    Internal = 9997,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The rendered DDL lost a column. Always a metadata or assembly bug.
    #[error("assembled schema for '{db_id}' is missing column '{column}'")]
    AssemblyInvariant { db_id: String, column: String },

    #[error("invalid metadata for '{db_id}': {reason}")]
    Metadata { db_id: String, reason: String },

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },
}

impl PipelineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PipelineError::AssemblyInvariant { .. } => ErrorCode::Internal,
            PipelineError::Metadata { .. } => ErrorCode::IllegalParam,
            PipelineError::Retrieval(_) => ErrorCode::RetrieveService,
            PipelineError::Execution(_) => ErrorCode::ExecutionService,
            PipelineError::Timeout { .. } => ErrorCode::ExecutionTimeout,
        }
    }

    /// Whether a caller-side retry policy may re-run the operation.
    ///
    /// The pipeline itself never retries; this only classifies.
    pub fn retryable(&self) -> bool {
        matches!(self, PipelineError::Timeout { .. })
    }

    /// Fatal errors must abort the current database instead of degrading it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::AssemblyInvariant { .. } | PipelineError::Metadata { .. }
        )
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Execution(e.to_string())
    }
}
