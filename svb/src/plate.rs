use crate::errors::{Result, SvbError};
use bn_model::{Dag, DataInstance, StateSpace};
use natural_param::{CompoundVector, NormalGammaExpectations, ParamBlock};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Parent/child wiring of the local plate, derived once per DAG.
#[derive(Debug, Clone)]
pub(crate) struct PlateLayout {
    children: Vec<Vec<(usize, usize)>>,
    strides: Vec<Vec<usize>>,
    clones: Vec<bool>,
}

impl PlateLayout {
    pub fn new(dag: &Dag) -> Self {
        let mut clones = vec![false; dag.num_variables()];
        for v in dag.referenced_temporal_clones() {
            clones[v] = true;
        }
        PlateLayout {
            children: dag.children_of_nodes(),
            strides: (0..dag.num_variables())
                .map(|v| dag.parent_strides(v))
                .collect(),
            clones,
        }
    }
}

enum RowExpectations {
    /// `E[ln theta]` per parent configuration
    Multinomial(Vec<Vec<f64>>),
    Normal(Vec<NormalGammaExpectations>),
}

/// Expectations of the parameter posterior that the local messages need.
/// Computed once per batch; the posterior itself is never touched.
pub(crate) struct Expectations {
    rows: Vec<RowExpectations>,
}

impl Expectations {
    pub fn new(posterior: &CompoundVector) -> Self {
        let rows = posterior
            .blocks()
            .iter()
            .map(|block| match block {
                ParamBlock::Multinomial(rows) => RowExpectations::Multinomial(
                    rows.iter()
                        .map(|d| d.expected_log().iter().copied().collect())
                        .collect(),
                ),
                ParamBlock::Normal(rows) => {
                    RowExpectations::Normal(rows.iter().map(|ng| ng.expectations()).collect())
                }
            })
            .collect();
        Expectations { rows }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum NodeState {
    Observed(usize),
    /// variational posterior `q(z)` of a latent discrete node
    Hidden(Vec<f64>),
    Real(f64),
    /// missing Gaussian or unreferenced temporal clone; no factor
    Absent,
}

/// Posterior over the latent variables of one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPosterior {
    pub sequence_id: usize,
    pub time_id: usize,
    /// `(variable, distribution over its states)`
    pub posteriors: Vec<(usize, Vec<f64>)>,
}

struct Factors<'a> {
    dag: &'a Dag,
    layout: &'a PlateLayout,
}

impl Factors<'_> {
    /// Weighted parent configurations of `var` under the mean-field
    /// beliefs, optionally with the parent at `fixed.0` clamped to state
    /// `fixed.1`.
    fn configs(
        &self,
        nodes: &[NodeState],
        var: usize,
        fixed: Option<(usize, usize)>,
    ) -> Vec<(usize, f64)> {
        let mut out = vec![(0usize, 1.0)];
        let parents = self.dag.parents(var);
        for (pos, (p, &stride)) in parents.iter().zip(&self.layout.strides[var]).enumerate() {
            let node = &nodes[self.dag.node_index(p)];
            let state = match (fixed, node) {
                (Some((at, s)), _) if at == pos => Some(s),
                (_, NodeState::Observed(s)) => Some(*s),
                _ => None,
            };
            if let Some(s) = state {
                let shift = stride * s;
                out.iter_mut().for_each(|e| e.0 += shift);
            } else if let NodeState::Hidden(q) = node {
                out = out
                    .iter()
                    .flat_map(|&(c, w)| {
                        q.iter()
                            .enumerate()
                            .filter(|(_, &p)| p > 0.0)
                            .map(move |(s, &p)| (c + stride * s, w * p))
                    })
                    .collect();
            }
        }
        out
    }

    /// expected log factor of `var` at one parent configuration
    fn factor_at(&self, nodes: &[NodeState], e: &Expectations, var: usize, config: usize) -> f64 {
        match (&e.rows[var], &nodes[var]) {
            (RowExpectations::Multinomial(rows), NodeState::Observed(s)) => rows[config][*s],
            (RowExpectations::Multinomial(rows), NodeState::Hidden(q)) => {
                q.iter().zip(&rows[config]).map(|(a, b)| a * b).sum()
            }
            (RowExpectations::Normal(rows), NodeState::Real(x)) => {
                rows[config].expected_log_likelihood(*x)
            }
            _ => 0.0,
        }
    }

    fn factor(
        &self,
        nodes: &[NodeState],
        e: &Expectations,
        var: usize,
        fixed: Option<(usize, usize)>,
    ) -> f64 {
        if nodes[var] == NodeState::Absent {
            return 0.0;
        }
        self.configs(nodes, var, fixed)
            .into_iter()
            .map(|(c, w)| w * self.factor_at(nodes, e, var, c))
            .sum()
    }

    /// Mean-field update of one hidden node from its own factor and the
    /// factors of its children.
    fn update_node(&self, nodes: &mut [NodeState], e: &Expectations, node: usize) {
        let k = match &nodes[node] {
            NodeState::Hidden(q) => q.len(),
            _ => return,
        };
        let mut logq = vec![0.0; k];

        if !self.dag.is_temporal_node(node) {
            if let RowExpectations::Multinomial(rows) = &e.rows[node] {
                for (c, w) in self.configs(nodes, node, None) {
                    logq.iter_mut()
                        .zip(&rows[c])
                        .for_each(|(l, r)| *l += w * r);
                }
            }
        }

        for &(child, pos) in &self.layout.children[node] {
            for (s, l) in logq.iter_mut().enumerate() {
                *l += self.factor(nodes, e, child, Some((pos, s)));
            }
        }

        nodes[node] = NodeState::Hidden(normalize_log(logq));
    }

    fn record_elbo(&self, nodes: &[NodeState], e: &Expectations) -> f64 {
        let mut elbo: f64 = (0..self.dag.num_variables())
            .map(|v| self.factor(nodes, e, v, None))
            .sum();
        for (node, state) in nodes.iter().enumerate() {
            if let NodeState::Hidden(q) = state {
                elbo += entropy(q);
                if self.dag.is_temporal_node(node) {
                    // uniform prior of a missing predecessor
                    elbo -= (q.len() as f64).ln();
                }
            }
        }
        elbo
    }

    fn accumulate(&self, nodes: &[NodeState], stats: &mut CompoundVector) {
        for var in 0..self.dag.num_variables() {
            if nodes[var] == NodeState::Absent {
                continue;
            }
            let configs = self.configs(nodes, var, None);
            match (stats.block_mut(var), &nodes[var]) {
                (ParamBlock::Multinomial(rows), NodeState::Observed(s)) => {
                    for (c, w) in configs {
                        rows[c].add_count(*s, w);
                    }
                }
                (ParamBlock::Multinomial(rows), NodeState::Hidden(q)) => {
                    for (c, w) in configs {
                        rows[c].add_counts(w, q);
                    }
                }
                (ParamBlock::Normal(rows), NodeState::Real(x)) => {
                    for (c, w) in configs {
                        rows[c].add_observation(*x, w);
                    }
                }
                _ => {}
            }
        }
    }
}

fn normalize_log(mut logq: Vec<f64>) -> Vec<f64> {
    let max = logq.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    logq.iter_mut().for_each(|l| *l = (*l - max).exp());
    let total: f64 = logq.iter().sum();
    logq.iter_mut().for_each(|l| *l /= total);
    logq
}

fn entropy(q: &[f64]) -> f64 {
    -q.iter().filter(|&&p| p > 0.0).map(|p| p * p.ln()).sum::<f64>()
}

/// Local variational beliefs of the records of one batch.
pub(crate) struct LocalPlate<'a> {
    factors: Factors<'a>,
    records: Vec<Vec<NodeState>>,
    ids: Vec<(usize, usize)>,
}

impl<'a> LocalPlate<'a> {
    /// Observed nodes take their values; missing discrete values, latent
    /// variables and missing referenced predecessors start uniform.
    pub fn new(
        dag: &'a Dag,
        layout: &'a PlateLayout,
        batch: &[DataInstance],
        batch_index: usize,
    ) -> Result<Self> {
        let records = batch
            .iter()
            .enumerate()
            .map(|(r, inst)| record_nodes(dag, layout, inst, batch_index, r))
            .collect::<Result<Vec<_>>>()?;
        Ok(LocalPlate {
            factors: Factors { dag, layout },
            records,
            ids: batch.iter().map(|x| (x.sequence_id, x.time_id)).collect(),
        })
    }

    pub fn has_hidden(&self) -> bool {
        self.records
            .iter()
            .flatten()
            .any(|n| matches!(n, NodeState::Hidden(_)))
    }

    /// random beliefs for symmetry breaking
    pub fn randomize<R: Rng>(&mut self, rng: &mut R) {
        for node in self.records.iter_mut().flatten() {
            if let NodeState::Hidden(q) = node {
                q.iter_mut()
                    .for_each(|p| *p = rng.random::<f64>() + f64::EPSILON);
                let total: f64 = q.iter().sum();
                q.iter_mut().for_each(|p| *p /= total);
            }
        }
    }

    /// one mean-field pass over every hidden node
    pub fn sweep(&mut self, e: &Expectations) {
        let LocalPlate {
            factors, records, ..
        } = self;
        for nodes in records.iter_mut() {
            for node in 0..nodes.len() {
                factors.update_node(nodes, e, node);
            }
        }
    }

    /// expected log joint plus entropy of the local beliefs
    pub fn elbo(&self, e: &Expectations) -> f64 {
        self.records
            .iter()
            .map(|nodes| self.factors.record_elbo(nodes, e))
            .sum()
    }

    /// expected sufficient statistics, shaped like `like`
    pub fn sufficient_stats(&self, like: &CompoundVector) -> CompoundVector {
        let mut stats = like.zeros_like();
        for nodes in self.records.iter() {
            self.factors.accumulate(nodes, &mut stats);
        }
        stats
    }

    pub fn posteriors(&self, latent: &[usize]) -> Vec<DataPosterior> {
        self.records
            .iter()
            .zip(&self.ids)
            .map(|(nodes, &(sequence_id, time_id))| DataPosterior {
                sequence_id,
                time_id,
                posteriors: latent
                    .iter()
                    .map(|&v| {
                        let k = self.factors.dag.variable(v).num_states();
                        let q = match &nodes[v] {
                            NodeState::Hidden(q) => q.clone(),
                            NodeState::Observed(s) => {
                                let mut q = vec![0.0; k];
                                q[*s] = 1.0;
                                q
                            }
                            _ => vec![],
                        };
                        (v, q)
                    })
                    .collect(),
            })
            .collect()
    }
}

fn record_nodes(
    dag: &Dag,
    layout: &PlateLayout,
    inst: &DataInstance,
    batch: usize,
    record: usize,
) -> Result<Vec<NodeState>> {
    let n = dag.num_variables();
    let inconsistent = |detail: String| SvbError::InconsistentRecord {
        batch,
        record,
        detail,
    };
    if inst.values.len() != n {
        return Err(inconsistent(format!(
            "{} values for {} variables",
            inst.values.len(),
            n
        )));
    }
    if let (true, Some(past)) = (dag.is_dynamic(), &inst.past) {
        if past.len() != n {
            return Err(inconsistent(format!(
                "{} past values for {} variables",
                past.len(),
                n
            )));
        }
    }

    (0..dag.num_nodes())
        .map(|node| {
            let temporal = dag.is_temporal_node(node);
            let var = dag.node_variable(node);
            if temporal && !layout.clones[var.id] {
                return Ok(NodeState::Absent);
            }
            let value = if var.observable {
                inst.value(var.id, temporal)
            } else {
                None
            };
            Ok(match (var.state_space, value) {
                (StateSpace::Multinomial(k), Some(x)) => {
                    if x.fract() != 0.0 || x < 0.0 || x >= k as f64 {
                        return Err(inconsistent(format!(
                            "{} is not a state of {}",
                            x, var.name
                        )));
                    }
                    NodeState::Observed(x as usize)
                }
                (StateSpace::Multinomial(k), None) => NodeState::Hidden(vec![1.0 / k as f64; k]),
                (StateSpace::Real, Some(x)) => NodeState::Real(x),
                (StateSpace::Real, None) => NodeState::Absent,
            })
        })
        .collect()
}
