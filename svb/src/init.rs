use bn_model::{BatchedData, Dag};
use natural_param::{CompoundVector, ExponentialFamily, Hyperparameters, NormalGamma, ParamBlock};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp1};

/// pseudo records behind every randomised row
const START_COUNT: f64 = 10.0;

/// Variables whose parameters are tied to a latent variable: the latent
/// variables themselves and their children.
fn latent_blocks(dag: &Dag) -> Vec<usize> {
    (0..dag.num_variables())
        .filter(|&v| {
            !dag.variable(v).observable
                || dag
                    .parents(v)
                    .iter()
                    .any(|p| !dag.variable(p.var).observable)
        })
        .collect()
}

/// mean and variance of the observed present values of `var`
fn moments<D: BatchedData>(data: &D, var: usize) -> Option<(f64, f64)> {
    let (mut n, mut sum, mut sum2) = (0.0, 0.0, 0.0);
    for x in data.instances().iter().filter_map(|r| r.value(var, false)) {
        n += 1.0;
        sum += x;
        sum2 += x * x;
    }
    if n < 2.0 {
        return None;
    }
    let mean = sum / n;
    let var = (sum2 / n - mean * mean).max(0.0);
    (mean.is_finite() && var.is_finite() && var > 0.0).then_some((mean, var))
}

/// Posterior of the first round of a model with latent variables.
///
/// Starting from the prior makes every state of a latent variable look
/// the same, so the rounds drift apart only slowly (or not at all). The
/// rows tied to a latent variable are moved to a seeded random point
/// instead: Dirichlet rows get `START_COUNT` pseudo counts drawn from a
/// flat Dirichlet, and the Gaussian rows of one variable get means
/// spread over `mean ± sqrt(3) sd` of its observed values in a random
/// order. Models without latent variables start from the prior.
pub fn random_start<D: BatchedData>(
    dag: &Dag,
    prior: &CompoundVector,
    hyper: &Hyperparameters,
    data: &D,
    seed: u64,
) -> CompoundVector {
    let mut start = prior.clone();
    let blocks = latent_blocks(dag);
    if blocks.is_empty() {
        return start;
    }
    let mut rng = StdRng::seed_from_u64(seed);

    for v in blocks {
        match start.block_mut(v) {
            ParamBlock::Multinomial(rows) => {
                for row in rows.iter_mut() {
                    // flat Dirichlet through normalised unit exponentials
                    let draws: Vec<f64> = (0..row.dim()).map(|_| Exp1.sample(&mut rng)).collect();
                    let total: f64 = draws.iter().sum();
                    let p: Vec<f64> = draws.iter().map(|x| x / total).collect();
                    row.add_counts(START_COUNT, &p);
                }
            }
            ParamBlock::Normal(rows) => {
                let (mean, var) = moments(data, v).unwrap_or((hyper.mean, 1.0));
                let sd = var.sqrt();
                let mut order: Vec<usize> = (0..rows.len()).collect();
                order.shuffle(&mut rng);
                let num_rows = rows.len() as f64;
                let shape = hyper.shape + 0.5 * START_COUNT;
                for (row, &slot) in rows.iter_mut().zip(order.iter()) {
                    let u: f64 = rng.random();
                    let z = 3f64.sqrt() * (2.0 * (slot as f64 + u) / num_rows - 1.0);
                    *row = NormalGamma::new(mean + sd * z, START_COUNT, shape, shape * var);
                }
            }
        }
    }
    start
}

#[cfg(test)]
mod tests {
    use super::*;
    use bn_model::{DagBuilder, DataInstance, DataOnMemory};

    fn mixture_data(n: usize) -> DataOnMemory {
        (0..n)
            .map(|i| {
                let x = if i % 2 == 0 { -4.0 } else { 4.0 };
                DataInstance::new_static(i, vec![None, Some(x + (i % 5) as f64 * 0.1)])
            })
            .collect()
    }

    #[test]
    fn observed_models_start_from_the_prior() -> anyhow::Result<()> {
        let mut b = DagBuilder::new("ab");
        let a = b.multinomial("A", 2);
        let x = b.gaussian("X");
        b.add_parent(x, a);
        let dag = b.build()?;
        let hyper = Hyperparameters::default();
        let prior = CompoundVector::prior(&dag, &hyper);
        let data = mixture_data(10);
        assert_eq!(random_start(&dag, &prior, &hyper, &data, 1), prior);
        Ok(())
    }

    #[test]
    fn latent_rows_are_spread_and_reproducible() -> anyhow::Result<()> {
        let mut b = DagBuilder::new("mixture");
        let h = b.latent_multinomial("H", 2);
        let x = b.gaussian("X");
        b.add_parent(x, h);
        let dag = b.build()?;
        let hyper = Hyperparameters::default();
        let prior = CompoundVector::prior(&dag, &hyper);
        let data = mixture_data(100);

        let start = random_start(&dag, &prior, &hyper, &data, 5);
        assert!(start.is_proper());
        assert_eq!(start, random_start(&dag, &prior, &hyper, &data, 5));
        assert_ne!(start, random_start(&dag, &prior, &hyper, &data, 6));

        let ParamBlock::Multinomial(weights) = start.block(h) else {
            panic!("H is multinomial");
        };
        approx::assert_abs_diff_eq!(weights[0].total(), 2.0 + START_COUNT, epsilon = 1e-9);

        let ParamBlock::Normal(rows) = start.block(x) else {
            panic!("X is normal");
        };
        let (mean, var) = moments(&data, x).ok_or_else(|| anyhow::anyhow!("no moments"))?;
        let mut means: Vec<f64> = rows.iter().map(|r| r.mean()).collect();
        means.sort_by(|a, b| a.total_cmp(b));
        // one mean on either side of the data mean
        assert!(means[0] <= mean && means[1] >= mean, "{:?}", means);
        assert!(means.iter().all(|m| (m - mean).abs() <= 3f64.sqrt() * var.sqrt() + 1e-9));
        Ok(())
    }
}
