//! Streaming and parallel variational Bayes for the parameters of
//! Bayesian networks.
//!
//! A round applies the single-batch updater to every batch of the data
//! (sequentially, on a thread pool or over serialized partitions),
//! reduces the batch contributions at a barrier and checks the ELBO for
//! convergence before the merged posterior is committed.

/// Batch contributions and their reduction
pub mod aggregate;

/// ELBO based stopping rule
pub mod convergence;

/// Updater snapshots, round broadcasts and partition workers
pub mod distributed;

pub mod errors;

mod init;

/// Learning options and execution modes
pub mod options;

/// Outer iteration controller
pub mod parallel_vb;

mod plate;

/// Batch scheduling over the execution modes
pub mod scheduler;

/// Streaming single-pass learning
pub mod streaming;

/// Single-batch variational updater
pub mod svb;

pub use aggregate::{reduce, BatchOutput};
pub use convergence::{ConvergenceCriterion, ConvergenceElbo};
pub use distributed::{Broadcast, UpdaterSnapshot};
pub use errors::{Result, SvbError};
pub use options::{ExecutionMode, SvbOptions};
pub use parallel_vb::{
    CancelToken, LearningOutcome, LearningState, ParallelVb, RoundSummary, Termination,
};
pub use plate::DataPosterior;
pub use scheduler::BatchScheduler;
pub use streaming::StreamingVb;
pub use svb::{BatchContext, Svb};
