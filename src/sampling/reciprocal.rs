//! Right-skewed integer size distributions with an exact total
//!
//! Sizes come from `max / ratio` where the ratios are uniform draws bent by a
//! power. The power is searched until the floored sizes land within a small
//! tolerance of the requested total, then the residual is spread over the
//! interior sizes so the total is exact. A city's household sizes, or the
//! populations of the cities themselves, are produced this way.

use rand::Rng;

use crate::core::error::{EpiError, Result};

/// Relative distance from the target total that ends the power search
const TOLERANCE: f64 = 0.001;

/// Fresh draws tried before the fit is abandoned
const MAX_ATTEMPTS: usize = 100;

/// Power search leaves `(1 / MAX_POWER, MAX_POWER)` only when a draw cannot fit
const MAX_POWER: f64 = 1e7;

/// Search steps per draw before it is abandoned
const MAX_SEARCH_STEPS: usize = 10_000;

#[derive(Debug, Clone)]
pub struct SizeDistributionFitter {
    count: usize,
    min: f64,
    max: f64,
    sum: u64,
}

impl SizeDistributionFitter {
    /// Check that `count` sizes in `[min, max]` can add up to `sum`
    pub fn new(count: usize, min: u32, max: u32, sum: u64) -> Result<Self> {
        if count == 0 {
            return Err(EpiError::Value("count must be at least 1".into()));
        }
        if min == 0 {
            return Err(EpiError::Value("min must be positive".into()));
        }
        if max < min {
            return Err(EpiError::Value(format!("max ({}) is below min ({})", max, min)));
        }
        if u32::try_from(sum).is_err() {
            return Err(EpiError::Value(format!("sum ({}) does not fit a size", sum)));
        }

        let (count_i, min_i, max_i, sum_i) = (count as i64, min as i64, max as i64, sum as i64);
        if count >= 2 && max_i * count_i < sum_i {
            return Err(EpiError::Value(format!(
                "{} sizes of at most {} cannot reach {}",
                count, max, sum
            )));
        }
        if count == 2 && sum_i < 2 * min_i {
            return Err(EpiError::Value(format!(
                "two sizes of at least {} cannot total {}",
                min, sum
            )));
        }
        if count >= 3 && (sum_i - max_i - min_i).div_euclid(count_i - 2) < min_i + 1 {
            return Err(EpiError::Value(format!(
                "sum {} leaves too little room between min {} and max {} for {} sizes",
                sum, min, max, count
            )));
        }

        let clamped_min = (min as f64).min(sum as f64 / (count as f64 * 1.1));

        Ok(Self {
            count,
            min: clamped_min,
            max: max as f64,
            sum,
        })
    }

    /// Produce `count` sizes totalling exactly `sum`, largest first
    pub fn fit<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec<u32>> {
        match self.count {
            1 => return Ok(vec![self.sum as u32]),
            2 => {
                let larger = self.sum.div_ceil(2);
                return Ok(vec![larger as u32, (self.sum - larger) as u32]);
            }
            _ => {}
        }

        let ratio = self.max / self.min;
        for attempt in 0..MAX_ATTEMPTS {
            if let Some(mut sizes) = self.search(rng, ratio) {
                adjust_total(&mut sizes, self.sum as i64, self.min.ceil() as i64, self.max as i64);
                return into_sizes(sizes);
            }
            tracing::trace!(attempt, count = self.count, sum = self.sum, "size fit restarting");
        }

        Err(EpiError::Build(format!(
            "size distribution did not converge after {} attempts (count {}, min {}, max {}, sum {})",
            MAX_ATTEMPTS, self.count, self.min, self.max, self.sum
        )))
    }

    /// Search the power for one draw of ratios
    fn search<R: Rng + ?Sized>(&self, rng: &mut R, ratio: f64) -> Option<Vec<i64>> {
        let draws: Vec<f64> = (0..self.count).map(|_| rng.gen_range(1.0..=ratio)).collect();
        let smallest = draws.iter().copied().fold(f64::INFINITY, f64::min);
        let base: Vec<f64> = draws.iter().map(|d| d / smallest).collect();

        let target = self.sum as f64;
        let upper = target * (1.0 + TOLERANCE);
        let lower = target / (1.0 + TOLERANCE);

        let mut power = 1.0;
        let mut step = 0.1;
        let mut previous: Option<f64> = None;

        for _ in 0..MAX_SEARCH_STEPS {
            if !(power > 1.0 / MAX_POWER && power < MAX_POWER) {
                return None;
            }

            let sizes = self.candidates(&base, power, ratio)?;
            let total = sizes.iter().sum::<i64>() as f64;
            let last = previous.unwrap_or(total);

            if total > upper {
                if last < target || power <= step * 2.0 {
                    step /= 10.0;
                }
                power -= step;
            } else if total < lower {
                if last > target {
                    step /= 10.0;
                }
                power += step;
            } else {
                return Some(sizes);
            }
            previous = Some(total);
        }
        None
    }

    /// Sizes for one power: ratios bent by `power`, rescaled back onto `[1, ratio]`
    fn candidates(&self, base: &[f64], power: f64, ratio: f64) -> Option<Vec<i64>> {
        let bent: Vec<f64> = base.iter().map(|b| b.powf(power)).collect();
        let top = bent.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !(top > 1.0 && top.is_finite()) {
            return None;
        }

        let scale = (ratio - 1.0) / (top - 1.0);
        let floor = self.min.ceil();
        Some(
            bent.iter()
                .map(|b| (self.max / ((b - 1.0) * scale + 1.0)).floor().clamp(floor, self.max) as i64)
                .collect(),
        )
    }
}

/// Sort descending and spread the residual over every size but the
/// largest and smallest, keeping each size within `[lo, hi]`. Whatever the
/// interior cannot absorb is moved one unit at a time over all sizes.
fn adjust_total(sizes: &mut [i64], target: i64, lo: i64, hi: i64) {
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    let n = sizes.len();
    if n < 3 {
        return;
    }

    let mut diff = target - sizes.iter().sum::<i64>();
    let interior = (n - 2) as i64;
    let mut delta = ((diff.abs() + interior - 1) / interior) * diff.signum();
    for size in &mut sizes[1..n - 1] {
        let moved = (*size + delta).clamp(lo, hi) - *size;
        *size += moved;
        diff -= moved;
        if delta.abs() > diff.abs() {
            delta = diff;
        }
    }

    while diff != 0 {
        let step = diff.signum();
        let before = diff;
        for size in sizes.iter_mut() {
            if diff == 0 {
                break;
            }
            if (lo..=hi).contains(&(*size + step)) {
                *size += step;
                diff -= step;
            }
        }
        if diff == before {
            break;
        }
    }
    sizes.sort_unstable_by(|a, b| b.cmp(a));
}

fn into_sizes(sizes: Vec<i64>) -> Result<Vec<u32>> {
    sizes
        .into_iter()
        .map(|s| {
            u32::try_from(s)
                .map_err(|_| EpiError::InvariantViolation(format!("fitted size {} is negative", s)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_small_fit_is_exact_and_bounded() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let sizes = SizeDistributionFitter::new(5, 10, 100, 200)
            .unwrap()
            .fit(&mut rng)
            .unwrap();

        assert_eq!(sizes.len(), 5);
        assert_eq!(sizes.iter().map(|&s| s as u64).sum::<u64>(), 200);
        assert!(sizes.iter().all(|&s| (10..=100).contains(&s)), "{:?}", sizes);
    }

    #[test]
    fn test_large_fit_is_exact() {
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let sizes = SizeDistributionFitter::new(1000, 1, 100, 20_000)
            .unwrap()
            .fit(&mut rng)
            .unwrap();

        assert_eq!(sizes.len(), 1000);
        assert_eq!(sizes.iter().map(|&s| s as u64).sum::<u64>(), 20_000);
        // Largest first
        assert!(sizes.windows(2).take(1).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_sizes_are_right_skewed() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let sizes = SizeDistributionFitter::new(500, 1, 50, 5_000)
            .unwrap()
            .fit(&mut rng)
            .unwrap();

        let mean = 5_000.0 / 500.0;
        let below_mean = sizes.iter().filter(|&&s| (s as f64) < mean).count();
        assert!(below_mean > sizes.len() / 2, "{} of {} below mean", below_mean, sizes.len());
    }

    #[test]
    fn test_incompatible_arguments() {
        // max * count < sum
        assert!(matches!(
            SizeDistributionFitter::new(5, 10, 20, 200),
            Err(EpiError::Value(_))
        ));
        // no room between the extremes
        assert!(matches!(
            SizeDistributionFitter::new(5, 50, 100, 200),
            Err(EpiError::Value(_))
        ));
        assert!(matches!(
            SizeDistributionFitter::new(0, 1, 10, 10),
            Err(EpiError::Value(_))
        ));
        assert!(matches!(
            SizeDistributionFitter::new(3, 0, 10, 10),
            Err(EpiError::Value(_))
        ));
    }

    #[test]
    fn test_degenerate_counts() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(
            SizeDistributionFitter::new(1, 1, 1000, 1000).unwrap().fit(&mut rng).unwrap(),
            vec![1000]
        );
        assert_eq!(
            SizeDistributionFitter::new(2, 1, 100, 7).unwrap().fit(&mut rng).unwrap(),
            vec![4, 3]
        );
    }

    #[test]
    fn test_equal_bounds_leave_no_room() {
        assert!(matches!(
            SizeDistributionFitter::new(4, 5, 5, 20),
            Err(EpiError::Value(_))
        ));
    }

    #[test]
    fn test_adjust_total_spreads_residual() {
        let mut sizes = vec![1, 10, 5, 5, 5];
        adjust_total(&mut sizes, 33, 1, 10);
        assert_eq!(sizes.iter().sum::<i64>(), 33);
        assert_eq!(sizes[0], 10);
        assert_eq!(sizes[4], 1);

        let mut shrink = vec![10, 6, 6, 6, 1];
        adjust_total(&mut shrink, 25, 1, 10);
        assert_eq!(shrink.iter().sum::<i64>(), 25);
    }

    #[test]
    fn test_same_seed_same_sizes() {
        let fitter = SizeDistributionFitter::new(50, 2, 40, 600).unwrap();
        let a = fitter.fit(&mut ChaCha8Rng::seed_from_u64(8)).unwrap();
        let b = fitter.fit(&mut ChaCha8Rng::seed_from_u64(8)).unwrap();
        assert_eq!(a, b);
    }
}
