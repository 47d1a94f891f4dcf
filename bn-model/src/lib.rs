//! Bayesian network structure, data records and forward sampling.
//!
//! The graph here is the read-only model description consumed by the
//! learning crates: variable types, parent sets (including temporal
//! predecessors of two-slice dynamic networks) and the enumeration of
//! parent configurations.

pub mod dag; // variables, parent sets, builder and validation
pub mod data; // records, in-memory streams, batches and partitions
pub mod network; // conditional distributions of a parameterised network
pub mod sampler; // forward sampling of static and dynamic networks

pub use dag::{Dag, DagBuilder, ParentRef, StateSpace, Variable};
pub use data::{BatchedData, DataInstance, DataOnMemory};
pub use network::{BayesianNetwork, Cpd, NormalMoments};
pub use sampler::BayesianNetworkSampler;
