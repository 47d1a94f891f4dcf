use crate::aggregate::{reduce, BatchOutput};
use crate::convergence::{ConvergenceCriterion, ConvergenceElbo};
use crate::errors::{configuration, Result, SvbError};
use crate::init::random_start;
use crate::options::SvbOptions;
use crate::plate::DataPosterior;
use crate::scheduler::BatchScheduler;
use crate::svb::Svb;
use bn_model::{BatchedData, BayesianNetwork, Dag};
use log::{info, warn};
use natural_param::CompoundVector;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to abort a run at the next round boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningState {
    Init,
    RoundRunning { round: usize },
    Converged { round: usize },
    /// round budget exhausted without convergence
    Done { rounds: usize },
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    Converged,
    MaxIterations,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: usize,
    /// `data_elbo - kl`
    pub elbo: f64,
    /// sum of the batch ELBOs
    pub data_elbo: f64,
    /// `KL(q(theta) || prior)` of the round posterior
    pub kl: f64,
    pub num_batches: usize,
}

/// Result of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningOutcome {
    pub network: BayesianNetwork,
    pub posterior: CompoundVector,
    /// ELBO under `posterior`, an estimate of the log marginal
    /// likelihood. When the round budget runs out the committed posterior
    /// is scored with one extra pass over the data, so this can differ
    /// from the last entry of `trace`.
    pub elbo: f64,
    pub rounds: usize,
    pub termination: Termination,
    pub trace: Vec<RoundSummary>,
}

/// A learning session: parallel (or distributed) variational Bayes over
/// the whole data set, one synchronised round at a time.
///
/// Round 0 runs against the prior, or against a seeded random start when
/// the DAG has latent variables. Each round broadcasts the current
/// parameter posterior to the batch workers, reduces their outputs at a
/// barrier and either stops (the ELBO settled) or commits
/// `prior + merged statistics` as the next posterior.
pub struct ParallelVb {
    svb: Svb,
    options: SvbOptions,
    posterior: CompoundVector,
    state: LearningState,
    outcome: Option<LearningOutcome>,
    cancel: CancelToken,
}

impl ParallelVb {
    /// Session with the conjugate prior of `options.hyper`.
    pub fn new(dag: Dag, options: SvbOptions) -> Result<Self> {
        options.validate()?;
        let prior = CompoundVector::prior(&dag, &options.hyper);
        let svb = Svb::from_options(dag, prior.clone(), &options)?;
        Ok(ParallelVb {
            svb,
            options,
            posterior: prior,
            state: LearningState::Init,
            outcome: None,
            cancel: CancelToken::default(),
        })
    }

    /// Replace the initial prior, e.g. with one built from previously
    /// learnt parameters.
    pub fn with_prior(mut self, prior: CompoundVector) -> Result<Self> {
        let dag = self.svb.dag().clone();
        self.svb = Svb::from_options(dag, prior.clone(), &self.options)?;
        self.posterior = prior;
        Ok(self)
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn state(&self) -> LearningState {
        self.state
    }

    pub fn options(&self) -> &SvbOptions {
        &self.options
    }

    pub fn dag(&self) -> &Dag {
        self.svb.dag()
    }

    /// last committed parameter posterior
    pub fn posterior(&self) -> &CompoundVector {
        &self.posterior
    }

    pub fn outcome(&self) -> Option<&LearningOutcome> {
        self.outcome.as_ref()
    }

    pub fn learnt_bayesian_network(&self) -> Option<&BayesianNetwork> {
        self.outcome.as_ref().map(|o| &o.network)
    }

    pub fn log_marginal_probability(&self) -> Option<f64> {
        self.outcome.as_ref().map(|o| o.elbo)
    }

    /// Learn the parameters from `data`, starting again from the initial
    /// prior. A failed or cancelled run leaves the committed posterior of
    /// the previous run in place.
    pub fn run_learning<D: BatchedData>(&mut self, data: &D) -> Result<&LearningOutcome> {
        self.state = LearningState::Init;
        self.outcome = None;
        match self.run_rounds(data) {
            Ok(outcome) => {
                self.state = match outcome.termination {
                    Termination::Converged => LearningState::Converged {
                        round: outcome.rounds - 1,
                    },
                    Termination::MaxIterations => LearningState::Done {
                        rounds: outcome.rounds,
                    },
                };
                self.posterior = outcome.posterior.clone();
                Ok(self.outcome.insert(outcome))
            }
            Err(err) => {
                self.state = match err {
                    SvbError::Cancelled { .. } => LearningState::Cancelled,
                    _ => LearningState::Failed,
                };
                warn!("learning stopped: {}", err);
                Err(err)
            }
        }
    }

    fn check_cancelled(&self, round: usize) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(SvbError::Cancelled { round })
        } else {
            Ok(())
        }
    }

    /// Process every batch against `posterior` and reduce; returns the
    /// merged output, the round ELBO and its KL term.
    fn score<D: BatchedData>(
        &self,
        scheduler: &BatchScheduler,
        data: &D,
        posterior: &CompoundVector,
        round: usize,
    ) -> Result<(BatchOutput, f64, f64)> {
        let outputs = scheduler.process_all(&self.svb, data, posterior, round)?;
        let merged = reduce(outputs)?.unwrap_or_else(|| BatchOutput::zero(posterior));

        let kl = posterior
            .kl_divergence(self.svb.prior())
            .map_err(|e| SvbError::NumericFailure {
                round,
                batch: None,
                detail: e.to_string(),
            })?;
        let elbo = merged.elbo - kl;
        if !elbo.is_finite() {
            return Err(SvbError::NumericFailure {
                round,
                batch: None,
                detail: "non-finite round ELBO".into(),
            });
        }
        Ok((merged, elbo, kl))
    }

    fn run_rounds<D: BatchedData>(&mut self, data: &D) -> Result<LearningOutcome> {
        let scheduler = BatchScheduler::new(&self.svb, &self.options)?;
        let prior = self.svb.prior().clone();
        let max_rounds = self.options.max_global_iterations;

        info!(
            "learning {} from {} records: batch size {}, {:?}",
            self.svb.dag().name(),
            data.num_instances(),
            self.options.batch_size,
            scheduler.mode()
        );

        let mut monitor = ConvergenceElbo::new(self.options.global_threshold);
        let mut current = random_start(
            self.svb.dag(),
            &prior,
            &self.options.hyper,
            data,
            self.options.seed,
        );
        let mut trace: Vec<RoundSummary> = vec![];
        let mut round = 0;

        let termination = loop {
            if round >= max_rounds {
                warn!("no convergence within {} rounds", max_rounds);
                break Termination::MaxIterations;
            }
            self.check_cancelled(round)?;
            self.state = LearningState::RoundRunning { round };

            let (merged, elbo, kl) = self.score(&scheduler, data, &current, round)?;
            info!(
                "round {}: ELBO {:.4} ({} batches, KL {:.4})",
                round, elbo, merged.num_batches, kl
            );
            trace.push(RoundSummary {
                round,
                elbo,
                data_elbo: merged.elbo,
                kl,
                num_batches: merged.num_batches,
            });

            // a cancelled round is discarded before anything is committed
            self.check_cancelled(round)?;

            if monitor.is_converged(round, elbo) {
                break Termination::Converged;
            }

            let mut candidate = prior.clone();
            candidate.sum(&merged.vector).map_err(configuration)?;
            if !candidate.is_proper() {
                return Err(SvbError::NumericFailure {
                    round,
                    batch: None,
                    detail: "merged posterior is not a proper distribution".into(),
                });
            }
            current = candidate;
            round += 1;
        };

        let network = current
            .to_bayesian_network(self.svb.dag())
            .map_err(|e| SvbError::NumericFailure {
                round,
                batch: None,
                detail: e.to_string(),
            })?;
        let elbo = match termination {
            Termination::Converged => trace.last().map(|r| r.elbo).unwrap_or(f64::NEG_INFINITY),
            Termination::MaxIterations => {
                self.check_cancelled(round)?;
                let (_, elbo, _) = self.score(&scheduler, data, &current, round)?;
                info!("final ELBO {:.4}", elbo);
                elbo
            }
        };

        Ok(LearningOutcome {
            network,
            posterior: current,
            elbo,
            rounds: trace.len(),
            termination,
            trace,
        })
    }

    /// Posterior over `latent` for every record of `data`, with the
    /// parameters at the committed posterior.
    pub fn posterior_over_latent_variables<D: BatchedData>(
        &self,
        data: &D,
        latent: &[usize],
    ) -> Result<Vec<DataPosterior>> {
        let mut out = Vec::with_capacity(data.num_instances());
        for (i, batch) in data.batches(self.options.batch_size).into_iter().enumerate() {
            out.extend(
                self.svb
                    .posterior_over_latent_variables(batch, &self.posterior, latent, i)?,
            );
        }
        Ok(out)
    }
}
