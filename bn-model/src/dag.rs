use anyhow::bail;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

/// State space of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateSpace {
    /// finite number of states `0..k`
    Multinomial(usize),
    /// real line, Gaussian conditional distribution
    Real,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: usize,
    pub name: Box<str>,
    pub state_space: StateSpace,
    pub observable: bool,
}

impl Variable {
    pub fn is_multinomial(&self) -> bool {
        matches!(self.state_space, StateSpace::Multinomial(_))
    }

    pub fn is_normal(&self) -> bool {
        matches!(self.state_space, StateSpace::Real)
    }

    /// number of states; zero for continuous variables
    pub fn num_states(&self) -> usize {
        match self.state_space {
            StateSpace::Multinomial(k) => k,
            StateSpace::Real => 0,
        }
    }
}

/// A parent of some variable: either the variable itself at the same
/// time step, or its temporal clone (value at the previous time step).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub var: usize,
    pub temporal: bool,
}

impl ParentRef {
    pub fn present(var: usize) -> Self {
        ParentRef {
            var,
            temporal: false,
        }
    }

    pub fn past(var: usize) -> Self {
        ParentRef { var, temporal: true }
    }
}

/// Directed acyclic graph over typed variables.
///
/// Nodes are indexed `0..n` for the present-time variables and, in
/// dynamic graphs, `n..2n` for their temporal clones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dag {
    name: Box<str>,
    dynamic: bool,
    variables: Vec<Variable>,
    parents: Vec<Vec<ParentRef>>,
}

impl Dag {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable(&self, id: usize) -> &Variable {
        &self.variables[id]
    }

    pub fn variable_by_name(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name.as_ref() == name)
    }

    pub fn parents(&self, id: usize) -> &[ParentRef] {
        &self.parents[id]
    }

    pub fn latent_variables(&self) -> Vec<usize> {
        self.variables
            .iter()
            .filter(|v| !v.observable)
            .map(|v| v.id)
            .collect()
    }

    /// number of nodes in the local plate: `n` or `2n` with temporal clones
    pub fn num_nodes(&self) -> usize {
        if self.dynamic {
            2 * self.variables.len()
        } else {
            self.variables.len()
        }
    }

    pub fn node_index(&self, parent: &ParentRef) -> usize {
        if parent.temporal {
            self.variables.len() + parent.var
        } else {
            parent.var
        }
    }

    /// variable behind a node index
    pub fn node_variable(&self, node: usize) -> &Variable {
        &self.variables[node % self.variables.len()]
    }

    pub fn is_temporal_node(&self, node: usize) -> bool {
        node >= self.variables.len()
    }

    /// Mixed-radix strides of the parent set of `id`, last parent fastest.
    pub fn parent_strides(&self, id: usize) -> Vec<usize> {
        let parents = &self.parents[id];
        let mut strides = vec![1; parents.len()];
        for i in (0..parents.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * self.variables[parents[i + 1].var].num_states();
        }
        strides
    }

    pub fn num_parent_configs(&self, id: usize) -> usize {
        self.parents[id]
            .iter()
            .map(|p| self.variables[p.var].num_states())
            .product()
    }

    /// Configuration index of the given parent states (in parent order).
    pub fn parent_config_index(&self, id: usize, states: &[usize]) -> usize {
        self.parent_strides(id)
            .iter()
            .zip(states)
            .map(|(s, x)| s * x)
            .sum()
    }

    /// Decode a configuration index back into parent states.
    pub fn parent_config_states(&self, id: usize, config: usize) -> Vec<usize> {
        let strides = self.parent_strides(id);
        self.parents[id]
            .iter()
            .zip(strides)
            .map(|(p, s)| (config / s) % self.variables[p.var].num_states())
            .collect()
    }

    /// For each node, the `(child variable, parent position)` pairs of
    /// the factors it appears in as a parent.
    pub fn children_of_nodes(&self) -> Vec<Vec<(usize, usize)>> {
        let mut children = vec![vec![]; self.num_nodes()];
        for (child, pa) in self.parents.iter().enumerate() {
            for (pos, p) in pa.iter().enumerate() {
                children[self.node_index(p)].push((child, pos));
            }
        }
        children
    }

    /// temporal clones referenced by at least one parent set
    pub fn referenced_temporal_clones(&self) -> Vec<usize> {
        let mut seen: Vec<usize> = self
            .parents
            .iter()
            .flatten()
            .filter(|p| p.temporal)
            .map(|p| p.var)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        seen.sort_unstable();
        seen
    }

    /// Re-run the builder checks, e.g. on a DAG read from a file.
    pub fn validated(self) -> anyhow::Result<Dag> {
        if let Some(v) = self.variables.iter().enumerate().find(|(i, v)| v.id != *i) {
            bail!("variable {} is stored at position {}", v.1.name, v.0);
        }
        if self.parents.len() != self.variables.len() {
            bail!("{} parent sets for {} variables", self.parents.len(), self.variables.len());
        }
        DagBuilder {
            name: self.name,
            dynamic: self.dynamic,
            variables: self.variables,
            parents: self.parents,
        }
        .build()
    }

    /// Present-time topological order (parents first).
    pub fn topological_order(&self) -> Vec<usize> {
        let n = self.variables.len();
        let mut indegree = vec![0usize; n];
        let mut out = vec![vec![]; n];
        for (child, pa) in self.parents.iter().enumerate() {
            for p in pa.iter().filter(|p| !p.temporal) {
                indegree[child] += 1;
                out[p.var].push(child);
            }
        }
        let mut queue: VecDeque<usize> = (0..n).filter(|&v| indegree[v] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(v) = queue.pop_front() {
            order.push(v);
            for &c in &out[v] {
                indegree[c] -= 1;
                if indegree[c] == 0 {
                    queue.push_back(c);
                }
            }
        }
        order
    }
}

/// Incremental construction of a [`Dag`]; `build` validates it.
#[derive(Debug, Clone)]
pub struct DagBuilder {
    name: Box<str>,
    dynamic: bool,
    variables: Vec<Variable>,
    parents: Vec<Vec<ParentRef>>,
}

impl DagBuilder {
    pub fn new(name: &str) -> Self {
        DagBuilder {
            name: name.into(),
            dynamic: false,
            variables: vec![],
            parents: vec![],
        }
    }

    /// two-slice network whose parent sets may refer to temporal clones
    pub fn dynamic(name: &str) -> Self {
        DagBuilder {
            dynamic: true,
            ..DagBuilder::new(name)
        }
    }

    fn add_variable(&mut self, name: &str, state_space: StateSpace, observable: bool) -> usize {
        let id = self.variables.len();
        self.variables.push(Variable {
            id,
            name: name.into(),
            state_space,
            observable,
        });
        self.parents.push(vec![]);
        id
    }

    pub fn multinomial(&mut self, name: &str, num_states: usize) -> usize {
        self.add_variable(name, StateSpace::Multinomial(num_states), true)
    }

    pub fn latent_multinomial(&mut self, name: &str, num_states: usize) -> usize {
        self.add_variable(name, StateSpace::Multinomial(num_states), false)
    }

    pub fn gaussian(&mut self, name: &str) -> usize {
        self.add_variable(name, StateSpace::Real, true)
    }

    pub fn add_parent(&mut self, child: usize, parent: usize) -> &mut Self {
        self.parents[child].push(ParentRef::present(parent));
        self
    }

    pub fn add_temporal_parent(&mut self, child: usize, parent: usize) -> &mut Self {
        self.parents[child].push(ParentRef::past(parent));
        self
    }

    pub fn build(self) -> anyhow::Result<Dag> {
        let n = self.variables.len();
        if n == 0 {
            bail!("DAG {} has no variables", self.name);
        }

        let mut names = HashSet::new();
        for v in self.variables.iter() {
            if !names.insert(v.name.clone()) {
                bail!("duplicate variable name {}", v.name);
            }
            match v.state_space {
                StateSpace::Multinomial(0) => {
                    bail!("multinomial variable {} needs at least one state", v.name)
                }
                StateSpace::Real if !v.observable => {
                    bail!("latent continuous variable {} is not supported", v.name)
                }
                _ => {}
            }
        }

        for (child, pa) in self.parents.iter().enumerate() {
            let cname = &self.variables[child].name;
            let mut seen = HashSet::new();
            for p in pa.iter() {
                if p.var >= n {
                    bail!("unknown parent {} of {}", p.var, cname);
                }
                if !seen.insert(*p) {
                    bail!("duplicate parent {} of {}", self.variables[p.var].name, cname);
                }
                if p.temporal && !self.dynamic {
                    bail!("temporal parent of {} in static DAG {}", cname, self.name);
                }
                if !p.temporal && p.var == child {
                    bail!("self loop on {}", cname);
                }
                if self.variables[p.var].is_normal() {
                    bail!(
                        "{} has a continuous parent {}; only multinomial parents are supported",
                        cname,
                        self.variables[p.var].name
                    );
                }
            }
        }

        let dag = Dag {
            name: self.name,
            dynamic: self.dynamic,
            variables: self.variables,
            parents: self.parents,
        };

        if dag.topological_order().len() != n {
            bail!("DAG {} contains a directed cycle", dag.name);
        }

        Ok(dag)
    }
}
