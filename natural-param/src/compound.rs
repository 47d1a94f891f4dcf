use crate::dirichlet::Dirichlet;
use crate::hyper::Hyperparameters;
use crate::normal_gamma::NormalGamma;
use crate::traits::ExponentialFamily;
use anyhow::bail;
use bn_model::{BayesianNetwork, Cpd, Dag, NormalMoments, StateSpace};
use serde::{Deserialize, Serialize};

/// Parameters of one variable, one entry per parent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamBlock {
    Multinomial(Vec<Dirichlet>),
    Normal(Vec<NormalGamma>),
}

impl ParamBlock {
    pub fn num_configs(&self) -> usize {
        match self {
            ParamBlock::Multinomial(rows) => rows.len(),
            ParamBlock::Normal(rows) => rows.len(),
        }
    }

    fn zeros_like(&self) -> Self {
        match self {
            ParamBlock::Multinomial(rows) => {
                ParamBlock::Multinomial(rows.iter().map(|d| Dirichlet::zeros(d.dim())).collect())
            }
            ParamBlock::Normal(rows) => {
                ParamBlock::Normal(rows.iter().map(|_| NormalGamma::zeros()).collect())
            }
        }
    }

    fn matches(&self, other: &ParamBlock) -> bool {
        match (self, other) {
            (ParamBlock::Multinomial(a), ParamBlock::Multinomial(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.dim() == y.dim())
            }
            (ParamBlock::Normal(a), ParamBlock::Normal(b)) => a.len() == b.len(),
            _ => false,
        }
    }

    fn add(&mut self, other: &ParamBlock) {
        match (self, other) {
            (ParamBlock::Multinomial(a), ParamBlock::Multinomial(b)) => {
                a.iter_mut().zip(b).for_each(|(x, y)| x.add_natural(y));
            }
            (ParamBlock::Normal(a), ParamBlock::Normal(b)) => {
                a.iter_mut().zip(b).for_each(|(x, y)| x.add_natural(y));
            }
            _ => {}
        }
    }

    fn is_finite(&self) -> bool {
        match self {
            ParamBlock::Multinomial(rows) => rows.iter().all(|d| d.is_finite()),
            ParamBlock::Normal(rows) => rows.iter().all(|d| d.is_finite()),
        }
    }

    fn is_proper(&self) -> bool {
        match self {
            ParamBlock::Multinomial(rows) => rows.iter().all(|d| d.is_proper()),
            ParamBlock::Normal(rows) => rows.iter().all(|d| d.is_proper()),
        }
    }

    fn kl_divergence(&self, prior: &ParamBlock) -> f64 {
        match (self, prior) {
            (ParamBlock::Multinomial(q), ParamBlock::Multinomial(p)) => {
                q.iter().zip(p).map(|(x, y)| x.kl_divergence(y)).sum()
            }
            (ParamBlock::Normal(q), ParamBlock::Normal(p)) => {
                q.iter().zip(p).map(|(x, y)| x.kl_divergence(y)).sum()
            }
            _ => f64::NAN,
        }
    }

    fn max_abs_diff(&self, other: &ParamBlock) -> f64 {
        fn diff<T: ExponentialFamily>(a: &[T], b: &[T]) -> f64 {
            a.iter()
                .zip(b)
                .map(|(x, y)| (x.natural() - y.natural()).amax())
                .fold(0.0, f64::max)
        }
        match (self, other) {
            (ParamBlock::Multinomial(a), ParamBlock::Multinomial(b)) => diff(a, b),
            (ParamBlock::Normal(a), ParamBlock::Normal(b)) => diff(a, b),
            _ => f64::INFINITY,
        }
    }
}

/// The natural-parameter vector of a whole network: one block per
/// variable. Its shape is fixed by the DAG it was built from; only the
/// numbers change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundVector {
    blocks: Vec<ParamBlock>,
}

impl CompoundVector {
    /// Conjugate prior of every conditional distribution of `dag`.
    pub fn prior(dag: &Dag, hyper: &Hyperparameters) -> Self {
        let blocks = dag
            .variables()
            .iter()
            .map(|v| {
                let configs = dag.num_parent_configs(v.id);
                match v.state_space {
                    StateSpace::Multinomial(k) => {
                        ParamBlock::Multinomial(vec![Dirichlet::new(k, hyper.alpha); configs])
                    }
                    StateSpace::Real => ParamBlock::Normal(vec![
                        NormalGamma::new(
                            hyper.mean,
                            hyper.kappa,
                            hyper.shape,
                            hyper.rate
                        );
                        configs
                    ]),
                }
            })
            .collect();
        CompoundVector { blocks }
    }

    /// Prior centred on the parameters of `bn`, worth
    /// `equivalent_sample_size` observations per parent configuration on
    /// top of `hyper`.
    pub fn from_network(
        bn: &BayesianNetwork,
        equivalent_sample_size: f64,
        hyper: &Hyperparameters,
    ) -> anyhow::Result<Self> {
        if !(equivalent_sample_size.is_finite() && equivalent_sample_size >= 0.0) {
            bail!("equivalent sample size must be non-negative");
        }
        let ess = equivalent_sample_size;
        let blocks = bn
            .cpds()
            .iter()
            .map(|cpd| match cpd {
                Cpd::Multinomial { probabilities } => ParamBlock::Multinomial(
                    probabilities
                        .iter()
                        .map(|p| {
                            Dirichlet::from_vec(p.iter().map(|x| hyper.alpha + ess * x).collect())
                        })
                        .collect(),
                ),
                Cpd::Normal { moments } => ParamBlock::Normal(
                    moments
                        .iter()
                        .map(|m| {
                            NormalGamma::new(
                                m.mean,
                                hyper.kappa + ess,
                                hyper.shape + 0.5 * ess,
                                hyper.rate + 0.5 * ess * m.variance,
                            )
                        })
                        .collect(),
                ),
            })
            .collect();
        Ok(CompoundVector { blocks })
    }

    pub fn new(blocks: Vec<ParamBlock>) -> Self {
        CompoundVector { blocks }
    }

    /// same shape, every entry zero
    pub fn zeros_like(&self) -> Self {
        CompoundVector {
            blocks: self.blocks.iter().map(|b| b.zeros_like()).collect(),
        }
    }

    pub fn blocks(&self) -> &[ParamBlock] {
        &self.blocks
    }

    pub fn block(&self, var: usize) -> &ParamBlock {
        &self.blocks[var]
    }

    pub fn block_mut(&mut self, var: usize) -> &mut ParamBlock {
        &mut self.blocks[var]
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// both vectors were built for the same graph
    pub fn matches(&self, other: &CompoundVector) -> bool {
        self.blocks.len() == other.blocks.len()
            && self.blocks.iter().zip(&other.blocks).all(|(a, b)| a.matches(b))
    }

    pub fn matches_dag(&self, dag: &Dag) -> bool {
        self.matches(&CompoundVector::prior(dag, &Hyperparameters::default()))
    }

    /// In-place elementwise accumulation.
    pub fn sum(&mut self, other: &CompoundVector) -> anyhow::Result<()> {
        if !self.matches(other) {
            bail!("cannot sum natural-parameter vectors of different shapes");
        }
        self.blocks
            .iter_mut()
            .zip(&other.blocks)
            .for_each(|(a, b)| a.add(b));
        Ok(())
    }

    pub fn is_finite(&self) -> bool {
        self.blocks.iter().all(|b| b.is_finite())
    }

    pub fn is_proper(&self) -> bool {
        self.blocks.iter().all(|b| b.is_proper())
    }

    /// `KL(self || prior)` summed over all blocks
    pub fn kl_divergence(&self, prior: &CompoundVector) -> anyhow::Result<f64> {
        if !self.matches(prior) {
            bail!("cannot compare natural-parameter vectors of different shapes");
        }
        if !self.is_proper() || !prior.is_proper() {
            bail!("KL divergence needs proper distributions");
        }
        Ok(self
            .blocks
            .iter()
            .zip(&prior.blocks)
            .map(|(q, p)| q.kl_divergence(p))
            .sum())
    }

    /// largest absolute difference between matching entries
    pub fn max_abs_diff(&self, other: &CompoundVector) -> anyhow::Result<f64> {
        if !self.matches(other) {
            bail!("cannot compare natural-parameter vectors of different shapes");
        }
        Ok(self
            .blocks
            .iter()
            .zip(&other.blocks)
            .map(|(a, b)| a.max_abs_diff(b))
            .fold(0.0, f64::max))
    }

    /// Point estimates: Dirichlet means and Normal-Gamma `(m, b / a)`.
    pub fn to_bayesian_network(&self, dag: &Dag) -> anyhow::Result<BayesianNetwork> {
        if !self.matches_dag(dag) {
            bail!("parameters do not match DAG {}", dag.name());
        }
        if !self.is_proper() {
            bail!("parameters of {} are not a proper posterior", dag.name());
        }
        let cpds = self
            .blocks
            .iter()
            .map(|b| match b {
                ParamBlock::Multinomial(rows) => Cpd::Multinomial {
                    probabilities: rows.iter().map(|d| d.mean().iter().copied().collect()).collect(),
                },
                ParamBlock::Normal(rows) => Cpd::Normal {
                    moments: rows
                        .iter()
                        .map(|ng| NormalMoments {
                            mean: ng.mean(),
                            variance: ng.variance(),
                        })
                        .collect(),
                },
            })
            .collect();
        BayesianNetwork::from_cpds(dag.clone(), cpds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use bn_model::DagBuilder;

    fn ab_dag() -> anyhow::Result<Dag> {
        let mut b = DagBuilder::new("ab");
        let a = b.multinomial("A", 2);
        let c = b.multinomial("C", 3);
        let x = b.gaussian("X");
        b.add_parent(c, a).add_parent(x, a);
        b.build()
    }

    #[test]
    fn prior_follows_the_graph() -> anyhow::Result<()> {
        let dag = ab_dag()?;
        let prior = CompoundVector::prior(&dag, &Hyperparameters::default());
        assert_eq!(prior.num_blocks(), 3);
        assert_eq!(prior.block(0).num_configs(), 1);
        assert_eq!(prior.block(1).num_configs(), 2);
        assert!(matches!(prior.block(2), ParamBlock::Normal(rows) if rows.len() == 2));
        assert!(prior.is_proper());
        assert!(prior.matches_dag(&dag));
        assert_abs_diff_eq!(prior.kl_divergence(&prior)?, 0.0, epsilon = 1e-12);
        Ok(())
    }

    #[test]
    fn sum_is_shape_checked() -> anyhow::Result<()> {
        let dag = ab_dag()?;
        let prior = CompoundVector::prior(&dag, &Hyperparameters::default());

        let mut stats = prior.zeros_like();
        if let ParamBlock::Multinomial(rows) = stats.block_mut(0) {
            rows[0].add_counts(3.0, &[1.0, 0.0]);
        }
        let mut post = prior.clone();
        post.sum(&stats)?;
        assert_abs_diff_eq!(post.max_abs_diff(&prior)?, 3.0, epsilon = 1e-12);

        let mut b = DagBuilder::new("other");
        b.multinomial("A", 2);
        let other = CompoundVector::prior(&b.build()?, &Hyperparameters::default());
        assert!(post.sum(&other).is_err());
        assert!(!stats.is_proper());
        assert!(stats.kl_divergence(&prior).is_err());
        Ok(())
    }

    #[test]
    fn point_estimates_of_a_posterior() -> anyhow::Result<()> {
        let dag = ab_dag()?;
        let hyper = Hyperparameters::default();
        let mut post = CompoundVector::prior(&dag, &hyper);
        if let ParamBlock::Multinomial(rows) = post.block_mut(0) {
            rows[0].add_counts(2.0, &[1.0, 0.0]);
        }
        let bn = post.to_bayesian_network(&dag)?;
        let p = bn.probabilities(0, 0).unwrap();
        assert_abs_diff_eq!(p[0], 0.75, epsilon = 1e-12);

        let normal = bn.normal(2, 1).unwrap();
        assert_abs_diff_eq!(normal.mean, hyper.mean, epsilon = 1e-12);
        assert_abs_diff_eq!(normal.variance, hyper.rate / hyper.shape, epsilon = 1e-12);

        let centred = CompoundVector::from_network(&bn, 10.0, &hyper)?;
        assert!(centred.matches(&post));
        let again = centred.to_bayesian_network(&dag)?;
        assert!(again.probabilities(0, 0).unwrap()[0] > 0.5);

        let json = serde_json::to_string(&post)?;
        let back: CompoundVector = serde_json::from_str(&json)?;
        assert_eq!(back, post);
        Ok(())
    }
}
