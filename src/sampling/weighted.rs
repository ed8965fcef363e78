//! Weighted random choice over a fixed collection
//!
//! Weights are normalised once at build time into a cumulative table with
//! the final 1.0 left implicit. A draw is a uniform number in [0, 1) and a
//! binary search, so choosing is O(log n) however skewed the weights are.

use rand::Rng;

use crate::core::error::{EpiError, Result};

#[derive(Debug, Clone)]
pub struct WeightedSampler<T> {
    items: Vec<T>,
    /// Cumulative probability after each item except the last
    cumulative: Vec<f64>,
}

impl<T> WeightedSampler<T> {
    /// Build a sampler, computing each item's weight once
    pub fn build<F>(items: Vec<T>, weight_fn: F) -> Result<Self>
    where
        F: Fn(&T) -> f64,
    {
        if items.is_empty() {
            return Err(EpiError::Domain("cannot sample from an empty collection".into()));
        }

        let weights: Vec<f64> = items.iter().map(&weight_fn).collect();
        if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(EpiError::Domain(format!("invalid sampling weight {}", bad)));
        }

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(EpiError::Domain(format!(
                "weights of {} items sum to {}",
                items.len(),
                total
            )));
        }

        let mut cumulative = Vec::with_capacity(items.len() - 1);
        let mut running = 0.0;
        for weight in &weights[..weights.len() - 1] {
            running += weight / total;
            cumulative.push(running);
        }

        Ok(Self { items, cumulative })
    }

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> &T {
        let r: f64 = rng.gen();
        // bisect-right: zero-weight items share a boundary with their
        // predecessor and are skipped
        let index = self.cumulative.partition_point(|&c| c <= r);
        &self.items[index]
    }

    /// Probability that `choose` returns the item at `index`
    pub fn probability(&self, index: usize) -> f64 {
        if index >= self.items.len() {
            return 0.0;
        }
        let upper = self.cumulative.get(index).copied().unwrap_or(1.0);
        let lower = if index == 0 { 0.0 } else { self.cumulative[index - 1] };
        upper - lower
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
