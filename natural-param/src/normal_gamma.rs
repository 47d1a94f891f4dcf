use crate::traits::ExponentialFamily;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use special::Gamma;
use std::f64::consts::PI;

/// Largest `(2b + kappa m^2) / 2b` for which the rate recovered from the
/// natural parameters keeps about six significant digits.
const MAX_RATE_CANCELLATION: f64 = 1e10;

/// Normal-Gamma over the mean `mu` and precision `tau` of one Gaussian
/// row.
///
/// With `mu | tau ~ N(m, 1/(kappa tau))` and `tau ~ Gamma(a, b)` the
/// natural parameters are `[kappa m, kappa, 2b + kappa m^2, 2a - 1]`
/// against the statistic `(tau mu, -tau mu^2 / 2, -tau / 2, ln(tau) / 2)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalGamma {
    eta: DVector<f64>,
}

/// Posterior expectations needed by the Gaussian log likelihood
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalGammaExpectations {
    pub tau: f64,
    pub log_tau: f64,
    pub tau_mu: f64,
    pub tau_mu2: f64,
}

impl NormalGammaExpectations {
    /// `E[ln N(x | mu, 1/tau)]`
    pub fn expected_log_likelihood(&self, x: f64) -> f64 {
        0.5 * self.log_tau
            - 0.5 * (2.0 * PI).ln()
            - 0.5 * (self.tau * x * x - 2.0 * self.tau_mu * x + self.tau_mu2)
    }
}

impl NormalGamma {
    pub fn new(mean: f64, kappa: f64, shape: f64, rate: f64) -> Self {
        NormalGamma {
            eta: DVector::from_vec(vec![
                kappa * mean,
                kappa,
                2.0 * rate + kappa * mean * mean,
                2.0 * shape - 1.0,
            ]),
        }
    }

    pub fn zeros() -> Self {
        NormalGamma {
            eta: DVector::zeros(4),
        }
    }

    pub fn kappa(&self) -> f64 {
        self.eta[1]
    }

    pub fn mean(&self) -> f64 {
        self.eta[0] / self.eta[1]
    }

    pub fn shape(&self) -> f64 {
        (self.eta[3] + 1.0) / 2.0
    }

    pub fn rate(&self) -> f64 {
        (self.eta[2] - self.eta[0] * self.eta[0] / self.eta[1]) / 2.0
    }

    /// The rate is recovered as `(eta_2 - eta_0^2 / eta_1) / 2`, which
    /// cancels catastrophically when the data sit far from zero relative
    /// to their spread.
    pub fn is_well_conditioned(&self) -> bool {
        let rate = self.rate();
        rate > 0.0 && self.eta[2] <= MAX_RATE_CANCELLATION * 2.0 * rate
    }

    /// point estimate of the variance, `b / a`
    pub fn variance(&self) -> f64 {
        self.rate() / self.shape()
    }

    pub fn expectations(&self) -> NormalGammaExpectations {
        let (m, kappa, a, b) = (self.mean(), self.kappa(), self.shape(), self.rate());
        let tau = a / b;
        NormalGammaExpectations {
            tau,
            log_tau: a.digamma() - b.ln(),
            tau_mu: m * tau,
            tau_mu2: m * m * tau + 1.0 / kappa,
        }
    }

    /// sufficient statistics `[x, 1, x^2, 1]` of one observation, weighted
    pub fn add_observation(&mut self, x: f64, weight: f64) {
        self.eta[0] += weight * x;
        self.eta[1] += weight;
        self.eta[2] += weight * x * x;
        self.eta[3] += weight;
    }
}

impl ExponentialFamily for NormalGamma {
    fn natural(&self) -> &DVector<f64> {
        &self.eta
    }

    fn natural_mut(&mut self) -> &mut DVector<f64> {
        &mut self.eta
    }

    fn log_normalizer(&self) -> f64 {
        let (kappa, a, b) = (self.kappa(), self.shape(), self.rate());
        a.ln_gamma().0 - a * b.ln() - 0.5 * kappa.ln() + 0.5 * (2.0 * PI).ln()
    }

    fn expected_sufficient_stats(&self) -> DVector<f64> {
        let e = self.expectations();
        DVector::from_vec(vec![
            e.tau_mu,
            -0.5 * e.tau_mu2,
            -0.5 * e.tau,
            0.5 * e.log_tau,
        ])
    }

    fn is_proper(&self) -> bool {
        self.is_finite()
            && self.kappa() > 0.0
            && self.shape() > 0.0
            && self.rate() > 0.0
            && self.is_well_conditioned()
    }
}
