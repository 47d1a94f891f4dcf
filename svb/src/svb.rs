use crate::aggregate::BatchOutput;
use crate::errors::{configuration, Result, SvbError};
use crate::options::SvbOptions;
use crate::plate::{DataPosterior, Expectations, LocalPlate, PlateLayout};
use bn_model::{Dag, DataInstance};
use log::debug;
use natural_param::CompoundVector;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Position of a batch in a learning run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchContext {
    pub round: usize,
    /// global index of the batch in the stream
    pub batch_index: usize,
}

/// Single-batch variational updater.
///
/// Holds the DAG, the initial conjugate prior and the local message
/// passing tunables. Every call works on its own local beliefs, so one
/// instance can serve any number of batches; the posterior handed in is
/// only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Svb {
    dag: Dag,
    prior: CompoundVector,
    local_threshold: f64,
    max_local_iterations: usize,
    seed: u64,
    #[serde(skip)]
    layout: OnceLock<PlateLayout>,
}

impl Svb {
    pub fn new(dag: Dag, prior: CompoundVector) -> Result<Self> {
        if !prior.matches_dag(&dag) {
            return Err(SvbError::Configuration(format!(
                "prior does not match the parameters of DAG {}",
                dag.name()
            )));
        }
        if !prior.is_proper() {
            return Err(SvbError::Configuration("prior is not proper".into()));
        }
        Ok(Svb {
            dag,
            prior,
            local_threshold: 1e-4,
            max_local_iterations: 100,
            seed: 42,
            layout: OnceLock::new(),
        })
    }

    /// updater with the local tunables and seed of `options`
    pub fn from_options(dag: Dag, prior: CompoundVector, options: &SvbOptions) -> Result<Self> {
        Ok(Svb::new(dag, prior)?
            .with_local_threshold(options.local_threshold)
            .with_max_local_iterations(options.max_local_iterations)
            .with_seed(options.seed))
    }

    pub fn with_local_threshold(mut self, threshold: f64) -> Self {
        self.local_threshold = threshold;
        self
    }

    pub fn with_max_local_iterations(mut self, max_iter: usize) -> Self {
        self.max_local_iterations = max_iter;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// the initial prior every posterior is measured against
    pub fn prior(&self) -> &CompoundVector {
        &self.prior
    }

    pub fn local_threshold(&self) -> f64 {
        self.local_threshold
    }

    pub fn max_local_iterations(&self) -> usize {
        self.max_local_iterations
    }

    fn layout(&self) -> &PlateLayout {
        self.layout.get_or_init(|| PlateLayout::new(&self.dag))
    }

    fn batch_rng(&self, batch_index: usize) -> StdRng {
        StdRng::seed_from_u64(
            self.seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add(batch_index as u64),
        )
    }

    fn check_shape(&self, posterior: &CompoundVector) -> Result<()> {
        if posterior.matches(&self.prior) {
            Ok(())
        } else {
            Err(SvbError::Configuration(format!(
                "posterior does not match the parameters of DAG {}",
                self.dag.name()
            )))
        }
    }

    /// Sweep the hidden nodes until the local ELBO settles; returns the
    /// last local ELBO.
    fn local_vb(&self, plate: &mut LocalPlate, e: &Expectations) -> f64 {
        let mut elbo = plate.elbo(e);
        if !plate.has_hidden() {
            return elbo;
        }
        for _ in 0..self.max_local_iterations {
            plate.sweep(e);
            let next = plate.elbo(e);
            let delta = (next - elbo).abs();
            elbo = next;
            if !elbo.is_finite() || delta < self.local_threshold {
                break;
            }
        }
        elbo
    }

    /// Local variational message passing on one batch against the
    /// parameter posterior `posterior`.
    ///
    /// Returns the batch's expected sufficient statistics and its
    /// expected log likelihood plus the entropy of the local beliefs.
    /// Hidden nodes start uniform; any asymmetry between latent states
    /// has to come from `posterior`.
    pub fn update_on_batch(
        &self,
        batch: &[DataInstance],
        posterior: &CompoundVector,
        ctx: BatchContext,
    ) -> Result<BatchOutput> {
        self.check_shape(posterior)?;
        let e = Expectations::new(posterior);
        let mut plate = LocalPlate::new(&self.dag, self.layout(), batch, ctx.batch_index)?;

        let elbo = self.local_vb(&mut plate, &e);
        let vector = plate.sufficient_stats(posterior);

        let numeric = |detail: &str| SvbError::NumericFailure {
            round: ctx.round,
            batch: Some(ctx.batch_index),
            detail: detail.to_string(),
        };
        if !elbo.is_finite() {
            return Err(numeric("non-finite ELBO"));
        }
        if !vector.is_finite() {
            return Err(numeric("non-finite sufficient statistics"));
        }

        debug!(
            "round {} batch {}: {} records, ELBO {:.4}",
            ctx.round,
            ctx.batch_index,
            batch.len(),
            elbo
        );

        Ok(BatchOutput {
            vector,
            elbo,
            num_records: batch.len(),
            num_batches: 1,
        })
    }

    /// Variational Bayes on one batch with the parameters as part of the
    /// local plate: alternate the posterior `prior + E[stats]` with sweeps
    /// over the hidden nodes until the ELBO settles.
    ///
    /// Returns the batch posterior and `ELBO = E[ln p(batch)] + H - KL(posterior || prior)`.
    pub fn learn_on_batch(
        &self,
        batch: &[DataInstance],
        prior: &CompoundVector,
        batch_index: usize,
    ) -> Result<(CompoundVector, f64)> {
        self.check_shape(prior)?;
        let mut plate = LocalPlate::new(&self.dag, self.layout(), batch, batch_index)?;
        if plate.has_hidden() {
            plate.randomize(&mut self.batch_rng(batch_index));
        }

        let numeric = |detail: String| SvbError::NumericFailure {
            round: 0,
            batch: Some(batch_index),
            detail,
        };

        let mut previous: Option<f64> = None;
        let mut iter = 0;
        loop {
            let mut posterior = prior.clone();
            posterior
                .sum(&plate.sufficient_stats(prior))
                .map_err(configuration)?;
            if !posterior.is_finite() {
                return Err(numeric("non-finite posterior".into()));
            }
            let kl = posterior
                .kl_divergence(prior)
                .map_err(|e| numeric(e.to_string()))?;
            let e = Expectations::new(&posterior);
            let elbo = plate.elbo(&e) - kl;
            if !elbo.is_finite() {
                return Err(numeric("non-finite ELBO".into()));
            }

            let settled = previous.is_some_and(|p| (elbo - p).abs() < self.local_threshold);
            if !plate.has_hidden() || settled || iter >= self.max_local_iterations {
                debug!(
                    "batch {}: {} local iterations, ELBO {:.4}",
                    batch_index, iter, elbo
                );
                return Ok((posterior, elbo));
            }

            plate.sweep(&e);
            previous = Some(elbo);
            iter += 1;
        }
    }

    /// Posterior over the given latent (or any discrete) variables of each
    /// record, with the parameters fixed at `posterior`.
    pub fn posterior_over_latent_variables(
        &self,
        batch: &[DataInstance],
        posterior: &CompoundVector,
        latent: &[usize],
        batch_index: usize,
    ) -> Result<Vec<DataPosterior>> {
        self.check_shape(posterior)?;
        for &v in latent {
            if v >= self.dag.num_variables() || !self.dag.variable(v).is_multinomial() {
                return Err(SvbError::Configuration(format!(
                    "variable {} is not a discrete variable of {}",
                    v,
                    self.dag.name()
                )));
            }
        }
        let e = Expectations::new(posterior);
        let mut plate = LocalPlate::new(&self.dag, self.layout(), batch, batch_index)?;
        let elbo = self.local_vb(&mut plate, &e);
        if !elbo.is_finite() {
            return Err(SvbError::NumericFailure {
                round: 0,
                batch: Some(batch_index),
                detail: "non-finite ELBO".into(),
            });
        }
        Ok(plate.posteriors(latent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use bn_model::{BatchedData, BayesianNetwork, BayesianNetworkSampler, DagBuilder};
    use natural_param::Hyperparameters;

    fn ab_network() -> anyhow::Result<BayesianNetwork> {
        let mut b = DagBuilder::new("ab");
        let a = b.multinomial("A", 2);
        let c = b.multinomial("B", 2);
        b.add_parent(c, a);
        let mut bn = BayesianNetwork::new(b.build()?);
        bn.set_probabilities(a, 0, &[0.6, 0.4])?;
        bn.set_probabilities(c, 0, &[0.75, 0.25])?;
        bn.set_probabilities(c, 1, &[0.25, 0.75])?;
        Ok(bn)
    }

    #[test]
    fn fully_observed_batch_gives_counts() -> anyhow::Result<()> {
        let bn = ab_network()?;
        let data = BayesianNetworkSampler::new(&bn).sample(50)?;
        let prior = CompoundVector::prior(bn.dag(), &Hyperparameters::default());
        let svb = Svb::new(bn.dag().clone(), prior.clone())?;

        let ctx = BatchContext {
            round: 0,
            batch_index: 0,
        };
        let out = svb.update_on_batch(data.instances(), &prior, ctx)?;
        assert_eq!(out.num_records, 50);

        let again = svb.update_on_batch(data.instances(), &prior, ctx)?;
        assert_eq!(out, again);

        let (posterior, elbo) = svb.learn_on_batch(data.instances(), &prior, 0)?;
        let mut expected = prior.clone();
        expected.sum(&out.vector)?;
        assert!(posterior.max_abs_diff(&expected)? < 1e-12);
        assert!(elbo < 0.0);
        Ok(())
    }

    #[test]
    fn streaming_batches_telescope_to_one_batch() -> anyhow::Result<()> {
        let bn = ab_network()?;
        let data = BayesianNetworkSampler::new(&bn).with_seed(1).sample(60)?;
        let prior = CompoundVector::prior(bn.dag(), &Hyperparameters::default());
        let svb = Svb::new(bn.dag().clone(), prior.clone())?;

        let (_, whole) = svb.learn_on_batch(data.instances(), &prior, 0)?;
        let mut current = prior.clone();
        let mut total = 0.0;
        for (i, batch) in data.batches(7).into_iter().enumerate() {
            let (post, elbo) = svb.learn_on_batch(batch, &current, i)?;
            current = post;
            total += elbo;
        }
        assert_abs_diff_eq!(whole, total, epsilon = 1e-8);
        Ok(())
    }

    #[test]
    fn rejects_foreign_posterior() -> anyhow::Result<()> {
        let bn = ab_network()?;
        let prior = CompoundVector::prior(bn.dag(), &Hyperparameters::default());
        let svb = Svb::new(bn.dag().clone(), prior)?;

        let mut b = DagBuilder::new("other");
        b.gaussian("X");
        let other = b.build()?;
        let foreign = CompoundVector::prior(&other, &Hyperparameters::default());
        let ctx = BatchContext {
            round: 1,
            batch_index: 0,
        };
        let res = svb.update_on_batch(&[], &foreign, ctx);
        assert!(matches!(res, Err(SvbError::Configuration(_))));
        assert!(Svb::new(other, CompoundVector::prior(bn.dag(), &Hyperparameters::default())).is_err());
        Ok(())
    }
}
