//! Natural-parameter algebra for conjugate Bayesian network learning.
//!
//! Every conditional distribution of a network gets a conjugate prior
//! stored in natural-parameter space: a Dirichlet per multinomial row and a
//! Normal-Gamma per Gaussian row. A [`CompoundVector`] collects one block
//! of those per variable; contributions of data batches are added to it
//! elementwise.

pub mod compound;
pub mod dirichlet;
pub mod hyper;
pub mod normal_gamma;
pub mod traits;

pub use compound::{CompoundVector, ParamBlock};
pub use dirichlet::Dirichlet;
pub use hyper::Hyperparameters;
pub use normal_gamma::{NormalGamma, NormalGammaExpectations};
pub use traits::ExponentialFamily;
