use crate::dag::{Dag, StateSpace};
use anyhow::bail;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp1, StandardNormal};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalMoments {
    pub mean: f64,
    pub variance: f64,
}

/// Conditional distribution of one variable, one row per parent
/// configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cpd {
    Multinomial { probabilities: Vec<Vec<f64>> },
    Normal { moments: Vec<NormalMoments> },
}

impl Cpd {
    pub fn num_configs(&self) -> usize {
        match self {
            Cpd::Multinomial { probabilities } => probabilities.len(),
            Cpd::Normal { moments } => moments.len(),
        }
    }
}

/// A DAG together with the parameters of every conditional distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BayesianNetwork {
    dag: Dag,
    cpds: Vec<Cpd>,
}

impl BayesianNetwork {
    /// Uniform multinomials and standard normals.
    pub fn new(dag: Dag) -> Self {
        let cpds = dag
            .variables()
            .iter()
            .map(|v| {
                let configs = dag.num_parent_configs(v.id);
                match v.state_space {
                    StateSpace::Multinomial(k) => Cpd::Multinomial {
                        probabilities: vec![vec![1.0 / k as f64; k]; configs],
                    },
                    StateSpace::Real => Cpd::Normal {
                        moments: vec![
                            NormalMoments {
                                mean: 0.0,
                                variance: 1.0,
                            };
                            configs
                        ],
                    },
                }
            })
            .collect();
        BayesianNetwork { dag, cpds }
    }

    /// Assemble from precomputed conditional distributions.
    pub fn from_cpds(dag: Dag, cpds: Vec<Cpd>) -> anyhow::Result<Self> {
        if cpds.len() != dag.num_variables() {
            bail!(
                "{} distributions for {} variables",
                cpds.len(),
                dag.num_variables()
            );
        }
        let mut bn = BayesianNetwork::new(dag);
        for (v, cpd) in cpds.into_iter().enumerate() {
            match cpd {
                Cpd::Multinomial { probabilities } => {
                    for (c, p) in probabilities.iter().enumerate() {
                        bn.set_probabilities(v, c, p)?;
                    }
                }
                Cpd::Normal { moments } => {
                    for (c, m) in moments.iter().enumerate() {
                        bn.set_normal(v, c, m.mean, m.variance)?;
                    }
                }
            }
        }
        Ok(bn)
    }

    /// Seeded random parameters: every multinomial row from a flat
    /// Dirichlet, every Gaussian row with a standard normal mean and a
    /// variance between 0.5 and 2.
    pub fn random_initialization(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        for cpd in self.cpds.iter_mut() {
            match cpd {
                Cpd::Multinomial { probabilities } => {
                    for row in probabilities.iter_mut() {
                        let draws: Vec<f64> = row.iter().map(|_| Exp1.sample(&mut rng)).collect();
                        let total: f64 = draws.iter().sum();
                        row.iter_mut().zip(draws).for_each(|(p, x)| *p = x / total);
                    }
                }
                Cpd::Normal { moments } => {
                    for m in moments.iter_mut() {
                        *m = NormalMoments {
                            mean: StandardNormal.sample(&mut rng),
                            variance: rng.random_range(0.5..2.0),
                        };
                    }
                }
            }
        }
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn cpds(&self) -> &[Cpd] {
        &self.cpds
    }

    pub fn cpd(&self, var: usize) -> &Cpd {
        &self.cpds[var]
    }

    pub fn set_probabilities(
        &mut self,
        var: usize,
        config: usize,
        probs: &[f64],
    ) -> anyhow::Result<()> {
        let name = self.dag.variable(var).name.clone();
        match &mut self.cpds[var] {
            Cpd::Multinomial { probabilities } => {
                let Some(row) = probabilities.get_mut(config) else {
                    bail!("{} has no parent configuration {}", name, config);
                };
                if row.len() != probs.len() {
                    bail!("{} expects {} probabilities", name, row.len());
                }
                let total: f64 = probs.iter().sum();
                if probs.iter().any(|&p| p < 0.0) || (total - 1.0).abs() > 1e-6 {
                    bail!("probabilities of {} must be non-negative and sum to one", name);
                }
                row.copy_from_slice(probs);
                Ok(())
            }
            Cpd::Normal { .. } => bail!("{} is not multinomial", name),
        }
    }

    pub fn set_normal(
        &mut self,
        var: usize,
        config: usize,
        mean: f64,
        variance: f64,
    ) -> anyhow::Result<()> {
        let name = self.dag.variable(var).name.clone();
        match &mut self.cpds[var] {
            Cpd::Normal { moments } => {
                let Some(m) = moments.get_mut(config) else {
                    bail!("{} has no parent configuration {}", name, config);
                };
                if !(variance.is_finite() && variance > 0.0 && mean.is_finite()) {
                    bail!("invalid normal parameters for {}", name);
                }
                *m = NormalMoments { mean, variance };
                Ok(())
            }
            Cpd::Multinomial { .. } => bail!("{} is not normal", name),
        }
    }

    pub fn probabilities(&self, var: usize, config: usize) -> Option<&[f64]> {
        match &self.cpds[var] {
            Cpd::Multinomial { probabilities } => probabilities.get(config).map(|p| p.as_slice()),
            Cpd::Normal { .. } => None,
        }
    }

    pub fn normal(&self, var: usize, config: usize) -> Option<NormalMoments> {
        match &self.cpds[var] {
            Cpd::Normal { moments } => moments.get(config).copied(),
            Cpd::Multinomial { .. } => None,
        }
    }

    /// Same structure and every parameter within `tol`.
    pub fn equal_bns(&self, other: &BayesianNetwork, tol: f64) -> bool {
        if self.cpds.len() != other.cpds.len() {
            return false;
        }
        self.cpds.iter().zip(other.cpds.iter()).all(|pair| match pair {
            (Cpd::Multinomial { probabilities: a }, Cpd::Multinomial { probabilities: b }) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| {
                        x.len() == y.len() && x.iter().zip(y).all(|(p, q)| (p - q).abs() <= tol)
                    })
            }
            (Cpd::Normal { moments: a }, Cpd::Normal { moments: b }) => {
                a.len() == b.len()
                    && a.iter().zip(b).all(|(x, y)| {
                        (x.mean - y.mean).abs() <= tol && (x.variance - y.variance).abs() <= tol
                    })
            }
            _ => false,
        })
    }
}

impl fmt::Display for BayesianNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bayesian network: {}", self.dag.name())?;
        for v in self.dag.variables() {
            let parents: Vec<String> = self
                .dag
                .parents(v.id)
                .iter()
                .map(|p| {
                    let name = &self.dag.variable(p.var).name;
                    if p.temporal {
                        format!("{}_t-1", name)
                    } else {
                        name.to_string()
                    }
                })
                .collect();
            writeln!(f, "P({} | {})", v.name, parents.join(", "))?;
            for c in 0..self.cpds[v.id].num_configs() {
                let states = self.dag.parent_config_states(v.id, c);
                match &self.cpds[v.id] {
                    Cpd::Multinomial { probabilities } => {
                        let row: Vec<String> =
                            probabilities[c].iter().map(|p| format!("{:.4}", p)).collect();
                        writeln!(f, "  {:?}: [{}]", states, row.join(", "))?;
                    }
                    Cpd::Normal { moments } => {
                        writeln!(
                            f,
                            "  {:?}: N(mean={:.4}, var={:.4})",
                            states, moments[c].mean, moments[c].variance
                        )?;
                    }
                }
            }
        }
        Ok(())
    }
}
