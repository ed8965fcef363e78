//! Log-normally distributed durations in whole days

use rand::Rng;
use rand_distr::{Distribution, LogNormal};

use crate::core::config::DurationConfig;
use crate::core::error::{EpiError, Result};

/// Draws day counts whose underlying distribution has the given mean and sd
///
/// A zero sd always yields the mean. Draws are rounded and never below one day.
#[derive(Debug, Clone)]
pub struct DurationDistribution {
    mean: f64,
    distribution: Option<LogNormal<f64>>,
}

impl DurationDistribution {
    pub fn new(mean: f64, sd: f64) -> Result<Self> {
        if !(mean > 0.0 && mean.is_finite()) {
            return Err(EpiError::Config(format!("duration mean must be positive, got {}", mean)));
        }
        if !(sd >= 0.0 && sd.is_finite()) {
            return Err(EpiError::Config(format!("duration sd must be non-negative, got {}", sd)));
        }

        let distribution = if sd == 0.0 {
            None
        } else {
            let mu = (mean * mean / (mean * mean + sd * sd).sqrt()).ln();
            let sigma = (1.0 + (sd / mean).powi(2)).ln().sqrt();
            let lognormal = LogNormal::new(mu, sigma)
                .map_err(|e| EpiError::Config(format!("log-normal({}, {}): {}", mu, sigma, e)))?;
            Some(lognormal)
        };

        Ok(Self { mean, distribution })
    }

    pub fn from_config(config: &DurationConfig) -> Result<Self> {
        Self::new(config.mean, config.sd)
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sample_days<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        let value = match &self.distribution {
            Some(distribution) => distribution.sample(rng),
            None => self.mean,
        };
        value.round().max(1.0) as u32
    }
}
