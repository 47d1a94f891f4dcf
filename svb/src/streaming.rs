use crate::errors::{Result, SvbError};
use crate::options::SvbOptions;
use crate::svb::Svb;
use bn_model::{BatchedData, BayesianNetwork, Dag, DataInstance};
use log::info;
use natural_param::CompoundVector;

/// Single-pass streaming variational Bayes.
///
/// Each batch is learnt with the running posterior as its prior and its
/// batch posterior becomes the prior of the next batch. The sum of the
/// batch ELBOs estimates the log marginal likelihood of everything seen.
pub struct StreamingVb {
    svb: Svb,
    posterior: CompoundVector,
    log_marginal: f64,
    batches_seen: usize,
    records_seen: usize,
}

impl StreamingVb {
    pub fn new(dag: Dag, options: &SvbOptions) -> Result<Self> {
        options.validate()?;
        let prior = CompoundVector::prior(&dag, &options.hyper);
        let svb = Svb::from_options(dag, prior.clone(), options)?;
        Ok(StreamingVb {
            svb,
            posterior: prior,
            log_marginal: 0.0,
            batches_seen: 0,
            records_seen: 0,
        })
    }

    /// Continue from `prior` instead of the conjugate prior of the
    /// options.
    pub fn with_prior(mut self, prior: CompoundVector) -> Result<Self> {
        if !prior.matches(self.svb.prior()) || !prior.is_proper() {
            return Err(SvbError::Configuration(
                "prior does not fit the streaming model".into(),
            ));
        }
        self.posterior = prior;
        Ok(self)
    }

    /// Learn from one batch and commit its posterior; returns the batch
    /// ELBO.
    pub fn update_model(&mut self, batch: &[DataInstance]) -> Result<f64> {
        let (posterior, elbo) =
            self.svb
                .learn_on_batch(batch, &self.posterior, self.batches_seen)?;
        self.posterior = posterior;
        self.log_marginal += elbo;
        self.batches_seen += 1;
        self.records_seen += batch.len();
        Ok(elbo)
    }

    /// Stream every batch of `data` in order; returns the running log
    /// marginal estimate.
    pub fn update_model_on_data<D: BatchedData>(
        &mut self,
        data: &D,
        batch_size: usize,
    ) -> Result<f64> {
        if batch_size == 0 {
            return Err(SvbError::Configuration(
                "batch size must be positive".into(),
            ));
        }
        for batch in data.batches(batch_size) {
            self.update_model(batch)?;
        }
        info!(
            "streamed {} records in {} batches, log marginal {:.4}",
            self.records_seen, self.batches_seen, self.log_marginal
        );
        Ok(self.log_marginal)
    }

    pub fn posterior(&self) -> &CompoundVector {
        &self.posterior
    }

    pub fn log_marginal_probability(&self) -> f64 {
        self.log_marginal
    }

    pub fn num_batches_seen(&self) -> usize {
        self.batches_seen
    }

    pub fn learnt_bayesian_network(&self) -> Result<BayesianNetwork> {
        self.posterior
            .to_bayesian_network(self.svb.dag())
            .map_err(|e| SvbError::NumericFailure {
                round: 0,
                batch: None,
                detail: e.to_string(),
            })
    }
}
