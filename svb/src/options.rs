use crate::errors::{Result, SvbError};
use natural_param::Hyperparameters;
use serde::{Deserialize, Serialize};

/// Where the batches of a round are processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// one batch after another on the calling thread
    Sequential,
    /// a rayon pool of `num_threads` workers, one updater clone each
    ThreadPool,
    /// contiguous partitions of batches, each worker restoring the
    /// updater from a serialized snapshot and the round prior from a
    /// broadcast payload
    Distributed { partitions: usize },
}

/// Options for parallel streaming variational Bayes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvbOptions {
    /// Records per batch. Default: 100
    pub batch_size: usize,
    /// Upper bound on the number of rounds. Default: 10
    pub max_global_iterations: usize,
    /// Stop once the round ELBO changes by at most this much. Default: 0.01
    pub global_threshold: f64,
    /// Local message passing stops below this ELBO change. Default: 1e-4
    pub local_threshold: f64,
    /// Sweeps of local message passing per batch. Default: 100
    pub max_local_iterations: usize,
    /// Worker threads. Default: number of logical cores
    pub num_threads: usize,
    /// Default: thread pool
    pub mode: ExecutionMode,
    /// Seed of the random start of latent models and of the streaming
    /// local beliefs. Default: 42
    pub seed: u64,
    /// Progress bar over the batches of each round. Default: false
    pub show_progress: bool,
    /// Initial conjugate prior
    pub hyper: Hyperparameters,
}

impl Default for SvbOptions {
    fn default() -> Self {
        SvbOptions {
            batch_size: 100,
            max_global_iterations: 10,
            global_threshold: 0.01,
            local_threshold: 1e-4,
            max_local_iterations: 100,
            num_threads: num_cpus::get(),
            mode: ExecutionMode::ThreadPool,
            seed: 42,
            show_progress: false,
            hyper: Hyperparameters::default(),
        }
    }
}

impl SvbOptions {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(SvbError::Configuration(msg));
        if self.batch_size == 0 {
            return fail("batch size must be positive".into());
        }
        if self.max_global_iterations == 0 {
            return fail("at least one global iteration is required".into());
        }
        if self.max_local_iterations == 0 {
            return fail("at least one local iteration is required".into());
        }
        let negative = |x: f64| x.is_nan() || x < 0.0;
        if negative(self.global_threshold) || negative(self.local_threshold) {
            return fail(format!(
                "thresholds must be non-negative, got {} and {}",
                self.global_threshold, self.local_threshold
            ));
        }
        if self.num_threads == 0 {
            return fail("number of threads must be positive".into());
        }
        if let ExecutionMode::Distributed { partitions: 0 } = self.mode {
            return fail("number of partitions must be positive".into());
        }
        self.hyper
            .validate()
            .map_err(|e| SvbError::Configuration(e.to_string()))
    }
}
