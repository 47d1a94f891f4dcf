use thiserror::Error;

/// Failures of a learning run
#[derive(Debug, Error)]
pub enum SvbError {
    /// inconsistent DAG, prior or options; the run never starts
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("record {record} of batch {batch} is inconsistent with the DAG: {detail}")]
    InconsistentRecord {
        batch: usize,
        record: usize,
        detail: String,
    },

    /// NaN, overflow or a degenerate distribution
    #[error("numeric failure in round {round}{}: {detail}", batch_suffix(.batch))]
    NumericFailure {
        round: usize,
        batch: Option<usize>,
        detail: String,
    },

    #[error("learning cancelled at round {round}")]
    Cancelled { round: usize },

    #[error("failed to (de)serialize updater state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

fn batch_suffix(batch: &Option<usize>) -> String {
    match batch {
        Some(b) => format!(", batch {}", b),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, SvbError>;

pub(crate) fn configuration(err: impl std::fmt::Display) -> SvbError {
    SvbError::Configuration(err.to_string())
}
