//! Random sampling primitives used while building and running a world

pub mod lognormal;
pub mod reciprocal;
pub mod weighted;

pub use lognormal::DurationDistribution;
pub use reciprocal::SizeDistributionFitter;
pub use weighted::WeightedSampler;

/// Round to `digits` significant figures
pub fn round_significant(value: f64, digits: i32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let magnitude = value.abs().log10().floor() as i32;
    let exponent = digits - 1 - magnitude;
    if exponent >= 0 {
        let factor = 10f64.powi(exponent);
        (value * factor).round() / factor
    } else {
        let factor = 10f64.powi(-exponent);
        (value / factor).round() * factor
    }
}
