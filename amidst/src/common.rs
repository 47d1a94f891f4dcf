pub use log::{info, warn};

use bn_model::BayesianNetwork;
use clap::ValueEnum;
use serde::Serialize;
use svb::ExecutionMode;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum ModeArg {
    Sequential,
    Parallel,
    Distributed,
}

impl ModeArg {
    pub fn execution_mode(self, partitions: usize) -> ExecutionMode {
        match self {
            ModeArg::Sequential => ExecutionMode::Sequential,
            ModeArg::Parallel => ExecutionMode::ThreadPool,
            ModeArg::Distributed => ExecutionMode::Distributed { partitions },
        }
    }
}

/// Read a parameterised network from a JSON file and re-check its
/// structure and distributions.
pub fn read_network(file: &str) -> anyhow::Result<BayesianNetwork> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {}", file, e))?;
    let bn: BayesianNetwork = serde_json::from_str(&text)?;
    let dag = bn.dag().clone().validated()?;

    if bn.cpds().len() != dag.num_variables() {
        anyhow::bail!(
            "{} distributions for {} variables",
            bn.cpds().len(),
            dag.num_variables()
        );
    }

    for (v, cpd) in bn.cpds().iter().enumerate() {
        let expected = dag.num_parent_configs(v);
        if cpd.num_configs() != expected {
            anyhow::bail!(
                "{}: {} rows for {} parent configurations",
                dag.variable(v).name,
                cpd.num_configs(),
                expected
            );
        }
    }

    BayesianNetwork::from_cpds(dag, bn.cpds().to_vec())
}

pub fn write_json<T: Serialize>(value: &T, file: &str) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(file, text).map_err(|e| anyhow::anyhow!("failed to write {}: {}", file, e))?;
    info!("wrote {}", file);
    Ok(())
}
