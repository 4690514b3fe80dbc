//! Shared numeric helpers.
//!
//! - `round_2dp`: rounds a value to 2 decimal places through `Decimal`, so the
//!   forecast table serializes as `3.1` / `12.46` rather than binary noise.
//! - `mean`: arithmetic mean that ignores undefined values.
//! - `sample_normal`: one Normal(μ, σ) draw used for synthesized columns.
//!
//! Non-finite inputs never leak out of these helpers: `round_2dp` maps NaN and
//! ±Inf to 0, `mean` returns `None` when nothing is left to average.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Round an f64 to 2 decimal places (half away from zero).
///
/// Values beyond `Decimal`'s range are already integral and pass through.
pub(crate) fn round_2dp(v: f64) -> f64 {
    if !v.is_finite() {
        tracing::warn!("round_2dp received non-finite value {}, defaulting to 0", v);
        return 0.0;
    }
    Decimal::from_f64(v)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(v)
}

/// Arithmetic mean of the finite values in `values`, `None` if there are none.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Population standard deviation around `centre`.
pub(crate) fn std_dev(values: &[f64], centre: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let var = values.iter().map(|v| (v - centre).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Draw one value from Normal(`mean`, `std_dev`). An invalid deviation
/// (negative or NaN) yields `mean`.
pub(crate) fn sample_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std_dev: f64) -> f64 {
    Normal::new(mean, std_dev)
        .map(|dist| dist.sample(rng))
        .unwrap_or(mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_round_2dp_normal() {
        assert_eq!(round_2dp(3.14159), 3.14);
    }

    #[test]
    fn test_round_2dp_negative() {
        assert_eq!(round_2dp(-1.236), -1.24);
        assert_eq!(round_2dp(12.0), 12.0);
    }

    #[test]
    fn test_round_2dp_non_finite() {
        assert_eq!(round_2dp(f64::NAN), 0.0);
        assert_eq!(round_2dp(f64::INFINITY), 0.0);
        assert_eq!(round_2dp(f64::NEG_INFINITY), 0.0);
    }

    #[test]
    fn test_round_2dp_beyond_decimal_range() {
        assert_eq!(round_2dp(1e30), 1e30);
        assert_eq!(round_2dp(-4.5e29), -4.5e29);
    }

    #[test]
    fn test_mean_skips_non_finite() {
        assert_eq!(mean(&[1.0, f64::NAN, 3.0]), Some(2.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_std_dev() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((std_dev(&v, 5.0) - 2.0).abs() < 1e-12);
        assert_eq!(std_dev(&[], 0.0), 0.0);
    }

    #[test]
    fn test_sample_normal_invalid_std_returns_mean() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(sample_normal(&mut rng, 5.0, f64::NAN), 5.0);
        assert_eq!(sample_normal(&mut rng, 5.0, -1.0), 5.0);
    }

    #[test]
    fn test_sample_normal_is_seeded() {
        let a = sample_normal(&mut StdRng::seed_from_u64(42), 25.0, 5.0);
        let b = sample_normal(&mut StdRng::seed_from_u64(42), 25.0, 5.0);
        assert_eq!(a, b);
    }
}
