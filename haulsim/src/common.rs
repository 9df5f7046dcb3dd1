use rand::{SeedableRng, rngs::SmallRng};
use rand_distr::{Distribution as _, Exp};
use thiserror::Error;

/// A sampler for repair and failure durations, in seconds.
#[derive(Debug, Clone)]
pub enum Distribution {
    Constant(f64),
    Exponential(Exp<f64>, SmallRng),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DistributionConfig {
    Constant(f64),
    Exponential { mean: f64 },
}

/// Hands out independently seeded distributions. Every `create` call consumes one seed, so a
/// run that creates its distributions in a fixed order is reproducible from `base_seed` alone.
#[derive(Debug, Clone)]
pub struct DistributionFactory {
    pub base_seed: u64,
    pub next_seed: u64,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct DistributionParametersError {
    pub msg: String,
}

fn exp_from_mean(mean: f64) -> Result<Exp<f64>, DistributionParametersError> {
    if !(mean.is_finite() && mean > 0.) {
        return Err(DistributionParametersError {
            msg: format!("exponential mean must be positive and finite, got {}", mean),
        });
    }
    Exp::new(mean.recip()).map_err(|e| DistributionParametersError { msg: e.to_string() })
}

impl DistributionFactory {
    pub fn new(base_seed: u64) -> Self {
        DistributionFactory { base_seed, next_seed: base_seed }
    }

    pub fn create(&mut self, config: DistributionConfig) -> Result<Distribution, DistributionParametersError> {
        let seed = self.next_seed;
        self.next_seed += 1;
        match config {
            DistributionConfig::Constant(x) => Ok(Distribution::Constant(x)),
            DistributionConfig::Exponential { mean } => {
                Ok(Distribution::Exponential(exp_from_mean(mean)?, SmallRng::seed_from_u64(seed)))
            }
        }
    }
}

impl Distribution {
    pub fn sample(&mut self) -> f64 {
        match self {
            Distribution::Constant(value) => *value,
            Distribution::Exponential(dist, rng) => dist.sample(rng),
        }
    }

    /// Changes the mean of an exponential distribution while keeping its generator state.
    /// Constant distributions are left untouched.
    pub fn set_mean(&mut self, mean: f64) -> Result<(), DistributionParametersError> {
        if let Distribution::Exponential(dist, _) = self {
            *dist = exp_from_mean(mean)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_seeds_are_consumed_in_order() {
        let mut df = DistributionFactory::new(7);
        let mut a = df.create(DistributionConfig::Exponential { mean: 10. }).unwrap();
        let mut b = df.create(DistributionConfig::Exponential { mean: 10. }).unwrap();
        assert_eq!(df.next_seed, 9);

        let mut df2 = DistributionFactory::new(7);
        let mut a2 = df2.create(DistributionConfig::Exponential { mean: 10. }).unwrap();
        assert_eq!(a.sample(), a2.sample());
        assert_ne!(a.sample(), b.sample());
    }

    #[test]
    fn rejects_non_positive_mean() {
        let mut df = DistributionFactory::new(0);
        assert!(df.create(DistributionConfig::Exponential { mean: 0. }).is_err());
        assert!(df.create(DistributionConfig::Exponential { mean: f64::INFINITY }).is_err());
    }

    #[test]
    fn set_mean_keeps_constant_distributions() {
        let mut dist = Distribution::Constant(4.);
        dist.set_mean(100.).unwrap();
        assert_eq!(dist.sample(), 4.);
    }
}
