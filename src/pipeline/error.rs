//! Error types for the pipeline.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::extract::ExtractError;
use crate::fetch::FetchError;
use crate::resolve::ResolveError;
use crate::retry::{Classify, FailureType};

use super::{MAX_WORKERS, MIN_WORKERS};

/// Start-up failures; the only errors fatal to a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Worker count outside the allowed range.
    #[error("invalid worker count {value}: must be between {MIN_WORKERS} and {MAX_WORKERS}")]
    InvalidWorkers {
        /// The rejected value.
        value: usize,
    },

    /// Queue capacity of zero.
    #[error("invalid queue capacity 0: must be at least 1")]
    InvalidQueueCapacity,

    /// A fetch session could not be opened.
    #[error("failed to open fetch session: {0}")]
    Session(#[source] FetchError),

    /// The listing plan is inconsistent.
    #[error("invalid listing plan for scope '{scope}': {message}")]
    InvalidPlan {
        /// Scope name.
        scope: String,
        /// What is wrong.
        message: String,
    },
}

/// Per-item stage failure, caught at the worker boundary.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// Page fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Page could not be interpreted.
    #[error(transparent)]
    Extract(#[from] ExtractError),

    /// Resolution failed.
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// Link batch failed.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl Classify for StageError {
    fn failure_type(&self) -> FailureType {
        match self {
            Self::Fetch(error) => error.failure_type(),
            Self::Extract(error) => error.failure_type(),
            Self::Resolve(error) => error.failure_type(),
            Self::Catalog(error) => error.failure_type(),
        }
    }
}
