use log::info;

/// Decides after each round whether the outer iteration can stop.
pub trait ConvergenceCriterion {
    fn is_converged(&mut self, round: usize, elbo: f64) -> bool;
}

/// Stops once two consecutive round ELBOs differ by at most `threshold`.
/// The first observed round only records its ELBO as the baseline.
#[derive(Debug, Clone)]
pub struct ConvergenceElbo {
    threshold: f64,
    previous: Option<f64>,
}

impl ConvergenceElbo {
    pub fn new(threshold: f64) -> Self {
        ConvergenceElbo {
            threshold,
            previous: None,
        }
    }

    pub fn previous(&self) -> Option<f64> {
        self.previous
    }
}

impl ConvergenceCriterion for ConvergenceElbo {
    fn is_converged(&mut self, round: usize, elbo: f64) -> bool {
        let Some(previous) = self.previous.replace(elbo) else {
            return false;
        };
        let delta = (elbo - previous).abs();
        if delta <= self.threshold {
            info!("converged at round {}: |delta ELBO| = {:.3e}", round, delta);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_round_is_only_a_baseline() {
        let mut monitor = ConvergenceElbo::new(f64::INFINITY);
        assert!(!monitor.is_converged(0, -1e6));
        assert_eq!(monitor.previous(), Some(-1e6));
        assert!(monitor.is_converged(1, 0.0));
    }

    #[test]
    fn stops_when_change_is_small() {
        let mut monitor = ConvergenceElbo::new(0.01);
        assert!(!monitor.is_converged(0, -100.0));
        assert!(!monitor.is_converged(1, -90.0));
        assert!(!monitor.is_converged(2, -89.5));
        assert!(monitor.is_converged(3, -89.495));
    }
}
