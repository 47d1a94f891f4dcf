use nalgebra::DVector;

/// A distribution of the exponential family held by its natural
/// parameters.
pub trait ExponentialFamily {
    fn natural(&self) -> &DVector<f64>;

    fn natural_mut(&mut self) -> &mut DVector<f64>;

    /// log partition function `A(eta)`
    fn log_normalizer(&self) -> f64;

    /// `E[T(theta)]` under this distribution
    fn expected_sufficient_stats(&self) -> DVector<f64>;

    /// the natural parameters define a normalisable density
    fn is_proper(&self) -> bool;

    fn dim(&self) -> usize {
        self.natural().len()
    }

    fn is_finite(&self) -> bool {
        self.natural().iter().all(|x| x.is_finite())
    }

    fn add_natural(&mut self, other: &Self)
    where
        Self: Sized,
    {
        *self.natural_mut() += other.natural();
    }

    /// `KL(self || prior) = (eta_q - eta_p) . E_q[T] - A(eta_q) + A(eta_p)`
    fn kl_divergence(&self, prior: &Self) -> f64
    where
        Self: Sized,
    {
        let diff = self.natural() - prior.natural();
        diff.dot(&self.expected_sufficient_stats()) - self.log_normalizer()
            + prior.log_normalizer()
    }
}
