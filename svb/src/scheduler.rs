use crate::aggregate::BatchOutput;
use crate::distributed::{run_partition, Broadcast, UpdaterSnapshot};
use crate::errors::{Result, SvbError};
use crate::options::{ExecutionMode, SvbOptions};
use crate::svb::{BatchContext, Svb};
use bn_model::BatchedData;
use indicatif::ParallelProgressIterator;
use log::info;
use natural_param::CompoundVector;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// Applies the updater to every batch of a round.
///
/// The worker pool and, in distributed mode, the updater snapshot are
/// built once per run and reused by every round.
pub struct BatchScheduler {
    mode: ExecutionMode,
    batch_size: usize,
    show_progress: bool,
    pool: Option<ThreadPool>,
    snapshot: Option<UpdaterSnapshot>,
}

impl BatchScheduler {
    pub fn new(svb: &Svb, options: &SvbOptions) -> Result<Self> {
        let pool = match options.mode {
            ExecutionMode::Sequential => None,
            ExecutionMode::ThreadPool | ExecutionMode::Distributed { .. } => Some(
                ThreadPoolBuilder::new()
                    .num_threads(options.num_threads)
                    .build()?,
            ),
        };
        let snapshot = match options.mode {
            ExecutionMode::Distributed { .. } => {
                let snapshot = UpdaterSnapshot::of(svb)?;
                info!("updater snapshot: {} bytes", snapshot.as_bytes().len());
                Some(snapshot)
            }
            _ => None,
        };
        Ok(BatchScheduler {
            mode: options.mode,
            batch_size: options.batch_size,
            show_progress: options.show_progress,
            pool,
            snapshot,
        })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Outputs of all batches of `data` against the round posterior.
    /// Sequential and thread-pool modes return one output per batch in
    /// stream order; distributed mode returns one folded output per
    /// non-empty partition. An empty stream yields no output.
    ///
    /// Distributed workers restore the updater from the snapshot taken in
    /// [`BatchScheduler::new`], so `svb` must still serialize to that
    /// snapshot; anything else is a configuration error.
    pub fn process_all<D: BatchedData>(
        &self,
        svb: &Svb,
        data: &D,
        posterior: &CompoundVector,
        round: usize,
    ) -> Result<Vec<BatchOutput>> {
        let ctx = |batch_index: usize| BatchContext { round, batch_index };

        match (self.mode, &self.pool, &self.snapshot) {
            (ExecutionMode::Distributed { partitions }, Some(pool), Some(snapshot)) => {
                if UpdaterSnapshot::of(svb)? != *snapshot {
                    return Err(SvbError::Configuration(
                        "updater differs from the snapshot the workers restore".into(),
                    ));
                }
                let broadcast = Broadcast::new(round, posterior)?;
                let parts = data.partitions(partitions, self.batch_size);
                let outputs = pool.install(|| {
                    let jobs = parts.par_iter();
                    if self.show_progress {
                        jobs.progress_count(parts.len() as u64)
                            .map(|part| run_partition(snapshot, &broadcast, part))
                            .collect::<Result<Vec<_>>>()
                    } else {
                        jobs.map(|part| run_partition(snapshot, &broadcast, part))
                            .collect::<Result<Vec<_>>>()
                    }
                })?;
                Ok(outputs.into_iter().flatten().collect())
            }
            (ExecutionMode::ThreadPool, Some(pool), _) => {
                let batches = data.batches(self.batch_size);
                pool.install(|| {
                    let jobs = batches.par_iter().enumerate();
                    if self.show_progress {
                        jobs.progress_count(batches.len() as u64)
                            .map_init(
                                || svb.clone(),
                                |worker, (i, batch)| worker.update_on_batch(batch, posterior, ctx(i)),
                            )
                            .collect()
                    } else {
                        jobs.map_init(
                            || svb.clone(),
                            |worker, (i, batch)| worker.update_on_batch(batch, posterior, ctx(i)),
                        )
                        .collect()
                    }
                })
            }
            _ => data
                .batches(self.batch_size)
                .into_iter()
                .enumerate()
                .map(|(i, batch)| svb.update_on_batch(batch, posterior, ctx(i)))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bn_model::{DagBuilder, DataInstance, DataOnMemory};
    use natural_param::Hyperparameters;

    #[test]
    fn distributed_rounds_refuse_a_different_updater() -> anyhow::Result<()> {
        let mut b = DagBuilder::new("coin");
        b.multinomial("A", 2);
        let dag = b.build()?;
        let prior = CompoundVector::prior(&dag, &Hyperparameters::default());
        let svb = Svb::new(dag.clone(), prior.clone())?;
        let options = SvbOptions {
            batch_size: 2,
            num_threads: 2,
            mode: ExecutionMode::Distributed { partitions: 2 },
            ..Default::default()
        };
        let scheduler = BatchScheduler::new(&svb, &options)?;
        let data: DataOnMemory = (0..6)
            .map(|i| DataInstance::observed(i, &[(i % 2) as f64]))
            .collect();

        assert_eq!(scheduler.process_all(&svb, &data, &prior, 0)?.len(), 2);

        let other = svb.clone().with_seed(7);
        let res = scheduler.process_all(&other, &data, &prior, 0);
        assert!(matches!(res, Err(SvbError::Configuration(_))));
        Ok(())
    }
}
