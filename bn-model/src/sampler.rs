use crate::data::{DataInstance, DataOnMemory};
use crate::network::{BayesianNetwork, Cpd};
use anyhow::anyhow;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{weighted::WeightedIndex, Distribution, Normal};
use rayon::prelude::*;

/// Forward (ancestral) sampler.
///
/// Every record (or sequence) draws from its own generator seeded by
/// `seed + index`, so the output does not depend on the thread count.
pub struct BayesianNetworkSampler<'a> {
    bn: &'a BayesianNetwork,
    seed: u64,
    hide_latent: bool,
}

impl<'a> BayesianNetworkSampler<'a> {
    pub fn new(bn: &'a BayesianNetwork) -> Self {
        BayesianNetworkSampler {
            bn,
            seed: 0,
            hide_latent: true,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// keep the sampled values of latent variables in the output
    pub fn reveal_latent(mut self) -> Self {
        self.hide_latent = false;
        self
    }

    /// `n` independent records
    pub fn sample(&self, n: usize) -> anyhow::Result<DataOnMemory> {
        let order = self.bn.dag().topological_order();
        let tables = self.categorical_tables()?;
        let instances = (0..n)
            .into_par_iter()
            .map(|i| -> anyhow::Result<DataInstance> {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(i as u64));
                let row = self.sample_row(&order, &tables, None, &mut rng)?;
                Ok(DataInstance::new_static(i, self.hide(row)))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        info!("sampled {} records from {}", n, self.bn.dag().name());
        Ok(DataOnMemory::new(instances))
    }

    /// `num_sequences` sequences of `length` time steps
    pub fn sample_sequences(
        &self,
        num_sequences: usize,
        length: usize,
    ) -> anyhow::Result<DataOnMemory> {
        let order = self.bn.dag().topological_order();
        let tables = self.categorical_tables()?;
        let sequences = (0..num_sequences)
            .into_par_iter()
            .map(|s| -> anyhow::Result<Vec<Vec<Option<f64>>>> {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(s as u64));
                let mut rows: Vec<Vec<Option<f64>>> = Vec::with_capacity(length);
                for t in 0..length {
                    let past = if t > 0 { Some(rows[t - 1].as_slice()) } else { None };
                    let row = self.sample_row(&order, &tables, past, &mut rng)?;
                    rows.push(row);
                }
                Ok(rows.into_iter().map(|r| self.hide(r)).collect())
            })
            .collect::<anyhow::Result<Vec<Vec<Vec<Option<f64>>>>>>()?;
        Ok(DataOnMemory::from_sequences(&sequences))
    }

    /// One weighted index per multinomial row; empty for normal variables.
    fn categorical_tables(&self) -> anyhow::Result<Vec<Vec<WeightedIndex<f64>>>> {
        let dag = self.bn.dag();
        self.bn
            .cpds()
            .iter()
            .enumerate()
            .map(|(v, cpd)| match cpd {
                Cpd::Multinomial { probabilities } => probabilities
                    .iter()
                    .map(|row| {
                        WeightedIndex::new(row)
                            .map_err(|e| anyhow!("{}: {}", dag.variable(v).name, e))
                    })
                    .collect::<anyhow::Result<Vec<WeightedIndex<f64>>>>(),
                Cpd::Normal { .. } => Ok(vec![]),
            })
            .collect()
    }

    fn hide(&self, mut row: Vec<Option<f64>>) -> Vec<Option<f64>> {
        if self.hide_latent {
            for v in self.bn.dag().latent_variables() {
                row[v] = None;
            }
        }
        row
    }

    fn sample_row(
        &self,
        order: &[usize],
        tables: &[Vec<WeightedIndex<f64>>],
        past: Option<&[Option<f64>]>,
        rng: &mut StdRng,
    ) -> anyhow::Result<Vec<Option<f64>>> {
        let dag = self.bn.dag();
        let mut row: Vec<Option<f64>> = vec![None; dag.num_variables()];

        for &v in order {
            let states: Vec<usize> = dag
                .parents(v)
                .iter()
                .map(|p| {
                    let k = dag.variable(p.var).num_states();
                    let value = if p.temporal {
                        past.and_then(|r| r[p.var])
                    } else {
                        row[p.var]
                    };
                    // unknown predecessor at the first time step
                    value.map_or_else(|| rng.random_range(0..k), |x| x as usize)
                })
                .collect();
            let config = dag.parent_config_index(v, &states);

            let x = match self.bn.cpd(v) {
                Cpd::Multinomial { .. } => tables[v][config].sample(rng) as f64,
                Cpd::Normal { moments } => {
                    let m = moments[config];
                    Normal::new(m.mean, m.variance.sqrt())
                        .map_err(|e| anyhow!("{}: {}", dag.variable(v).name, e))?
                        .sample(rng)
                }
            };
            row[v] = Some(x);
        }
        Ok(row)
    }
}
