use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Hyperparameters of the initial conjugate prior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Dirichlet concentration per state
    pub alpha: f64,
    /// prior mean of every Gaussian
    pub mean: f64,
    /// pseudo count of the prior mean
    pub kappa: f64,
    /// Gamma shape of the precision
    pub shape: f64,
    /// Gamma rate of the precision
    pub rate: f64,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Hyperparameters {
            alpha: 1.0,
            mean: 0.0,
            kappa: 0.01,
            shape: 1.0,
            rate: 1.0,
        }
    }
}

impl Hyperparameters {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.mean.is_finite() {
            bail!("prior mean must be finite");
        }
        for (name, x) in [
            ("alpha", self.alpha),
            ("kappa", self.kappa),
            ("shape", self.shape),
            ("rate", self.rate),
        ] {
            if !(x.is_finite() && x > 0.0) {
                bail!("hyperparameter {} must be positive, got {}", name, x);
            }
        }
        Ok(())
    }
}
