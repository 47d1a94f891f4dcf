use crate::traits::ExponentialFamily;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use special::Gamma;

/// Dirichlet over the probabilities of one multinomial row. The natural
/// parameters are the concentrations themselves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dirichlet {
    alpha: DVector<f64>,
}

impl Dirichlet {
    /// symmetric prior with concentration `alpha0` on each of `k` states
    pub fn new(k: usize, alpha0: f64) -> Self {
        Dirichlet {
            alpha: DVector::from_element(k, alpha0),
        }
    }

    pub fn zeros(k: usize) -> Self {
        Dirichlet {
            alpha: DVector::zeros(k),
        }
    }

    pub fn from_vec(alpha: Vec<f64>) -> Self {
        Dirichlet {
            alpha: DVector::from_vec(alpha),
        }
    }

    pub fn alpha(&self) -> &DVector<f64> {
        &self.alpha
    }

    pub fn total(&self) -> f64 {
        self.alpha.sum()
    }

    pub fn mean(&self) -> DVector<f64> {
        &self.alpha / self.total()
    }

    /// `E[ln theta_i] = psi(alpha_i) - psi(sum alpha)`
    pub fn expected_log(&self) -> DVector<f64> {
        let psi_total = self.total().digamma();
        self.alpha.map(|a| a.digamma() - psi_total)
    }

    pub fn add_count(&mut self, state: usize, weight: f64) {
        self.alpha[state] += weight;
    }

    /// add `weight * q[s]` pseudo counts to every state `s`
    pub fn add_counts(&mut self, weight: f64, q: &[f64]) {
        for (a, p) in self.alpha.iter_mut().zip(q) {
            *a += weight * p;
        }
    }
}

impl ExponentialFamily for Dirichlet {
    fn natural(&self) -> &DVector<f64> {
        &self.alpha
    }

    fn natural_mut(&mut self) -> &mut DVector<f64> {
        &mut self.alpha
    }

    fn log_normalizer(&self) -> f64 {
        self.alpha.iter().map(|a| a.ln_gamma().0).sum::<f64>() - self.total().ln_gamma().0
    }

    fn expected_sufficient_stats(&self) -> DVector<f64> {
        self.expected_log()
    }

    fn is_proper(&self) -> bool {
        self.alpha.iter().all(|a| a.is_finite() && *a > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn beta_against_uniform() {
        let q = Dirichlet::from_vec(vec![2.0, 1.0]);
        let p = Dirichlet::new(2, 1.0);

        assert_abs_diff_eq!(q.log_normalizer(), -(2.0f64).ln(), epsilon = 1e-10);
        assert_abs_diff_eq!(q.expected_log()[0], -0.5, epsilon = 1e-10);
        assert_abs_diff_eq!(q.kl_divergence(&p), (2.0f64).ln() - 0.5, epsilon = 1e-10);
        assert_abs_diff_eq!(p.kl_divergence(&p), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn counts_shift_the_mean() {
        let mut d = Dirichlet::new(2, 1.0);
        d.add_counts(4.0, &[0.5, 0.5]);
        d.add_counts(2.0, &[1.0, 0.0]);
        assert_abs_diff_eq!(d.mean()[0], 5.0 / 8.0, epsilon = 1e-12);
        assert!(d.is_proper());
        assert!(!Dirichlet::zeros(3).is_proper());
    }
}
