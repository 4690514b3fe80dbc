//! Autoregressive integrated model (no moving-average part) and the mean
//! forecaster that stands in when it cannot be fit.
//!
//! AR coefficients come from the Yule-Walker equations, solved with the
//! Levinson-Durbin recursion on the (optionally differenced) series.
//! Forecasts are produced on the differenced scale and integrated back onto
//! the last observed level.

use std::fmt;

use super::ModelError;
use crate::helpers::mean;

/// `(p, d, 0)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
}

impl ArimaOrder {
    /// (1,0,0) for short series, (5,1,0) from 30 points on.
    pub fn for_length(len: usize) -> Self {
        if len < 30 {
            Self { p: 1, d: 0 }
        } else {
            Self { p: 5, d: 1 }
        }
    }

    fn min_points(&self) -> usize {
        self.p + self.d + 2
    }
}

impl fmt::Display for ArimaOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},0)", self.p, self.d)
    }
}

#[derive(Debug, Clone)]
pub struct Arima {
    ar_coeffs: Vec<f64>,
    /// Mean of the differenced series
    constant: f64,
    /// Last value of the series after 0..d rounds of differencing
    last_levels: Vec<f64>,
    differenced: Vec<f64>,
}

impl Arima {
    pub fn fit(series: &[f64], order: ArimaOrder) -> Result<Self, ModelError> {
        if series.len() < order.min_points() {
            return Err(ModelError::InsufficientData {
                required: order.min_points(),
                actual: series.len(),
            });
        }
        if series.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteInput);
        }

        let differenced = difference(series, order.d);
        let constant = mean(&differenced).unwrap_or(0.0);
        let ar_coeffs = yule_walker(&differenced, constant, order.p);
        if ar_coeffs.iter().any(|c| !c.is_finite()) {
            return Err(ModelError::NonFiniteOutput);
        }

        let last_levels = (0..order.d)
            .filter_map(|k| difference(series, k).last().copied())
            .collect();
        tracing::debug!(order = %order, coefficients = ?ar_coeffs, "Fitted ARIMA");
        Ok(Self {
            ar_coeffs,
            constant,
            last_levels,
            differenced,
        })
    }

    pub fn forecast(&self, steps: usize) -> Result<Vec<f64>, ModelError> {
        if steps == 0 {
            return Ok(Vec::new());
        }

        let n = self.differenced.len();
        let mut extended = self.differenced.clone();
        for _ in 0..steps {
            let mut next = self.constant;
            for (j, coeff) in self.ar_coeffs.iter().enumerate() {
                if let Some(prev) = extended.len().checked_sub(j + 1).map(|idx| extended[idx]) {
                    next += coeff * (prev - self.constant);
                }
            }
            extended.push(next);
        }

        let forecasts = self.integrate(&extended[n..]);
        if forecasts.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFiniteOutput);
        }
        Ok(forecasts)
    }

    /// Undo `d` rounds of differencing, anchored on the last observed levels.
    fn integrate(&self, diffs: &[f64]) -> Vec<f64> {
        let mut result = diffs.to_vec();
        for level in self.last_levels.iter().rev() {
            let mut acc = *level;
            for v in result.iter_mut() {
                acc += *v;
                *v = acc;
            }
        }
        result
    }
}

fn difference(data: &[f64], order: usize) -> Vec<f64> {
    let mut result = data.to_vec();
    for _ in 0..order {
        result = result.windows(2).map(|w| w[1] - w[0]).collect();
    }
    result
}

/// Yule-Walker AR coefficients via Levinson-Durbin.
fn yule_walker(data: &[f64], centre: f64, p: usize) -> Vec<f64> {
    if p == 0 {
        return Vec::new();
    }
    let n = data.len();
    let centered: Vec<f64> = data.iter().map(|x| x - centre).collect();
    let autocov: Vec<f64> = (0..=p)
        .map(|k| {
            (k..n).map(|i| centered[i] * centered[i - k]).sum::<f64>() / n as f64
        })
        .collect();

    let mut coeffs = vec![0.0; p];
    if autocov[0].abs() <= 1e-10 {
        return coeffs;
    }
    coeffs[0] = autocov[1] / autocov[0];
    for k in 1..p {
        let mut num = autocov[k + 1];
        let mut denom = autocov[0];
        for j in 0..k {
            num -= coeffs[j] * autocov[k - j];
            denom -= coeffs[j] * autocov[j + 1];
        }
        if denom.abs() <= 1e-10 {
            break;
        }
        let reflection = num / denom;
        let previous = coeffs.clone();
        coeffs[k] = reflection;
        for j in 0..k {
            coeffs[j] = previous[j] - reflection * previous[k - 1 - j];
        }
    }
    coeffs
}

/// Forecasts the historical mean for every step.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanForecaster {
    pub mean: f64,
}

impl MeanForecaster {
    pub fn fit(series: &[f64]) -> Self {
        Self {
            mean: mean(series).unwrap_or(0.0),
        }
    }

    pub fn forecast(&self, steps: usize) -> Vec<f64> {
        vec![self.mean; steps]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_by_length() {
        assert_eq!(ArimaOrder::for_length(29), ArimaOrder { p: 1, d: 0 });
        assert_eq!(ArimaOrder::for_length(30), ArimaOrder { p: 5, d: 1 });
        assert_eq!(ArimaOrder::for_length(30).to_string(), "(5,1,0)");
    }

    #[test]
    fn test_ar1_forecast_is_finite() {
        // x[t] = 0.6 x[t-1] with a deterministic wiggle
        let mut series = vec![1.0];
        for t in 1..200 {
            let wiggle = if t % 2 == 0 { 0.5 } else { -0.5 };
            series.push(0.6 * series[t - 1] + wiggle);
        }
        let model = Arima::fit(&series, ArimaOrder { p: 1, d: 0 }).unwrap();
        assert_eq!(model.ar_coeffs.len(), 1);
        let forecast = model.forecast(10).unwrap();
        assert_eq!(forecast.len(), 10);
        assert!(forecast.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_differenced_trend_continues() {
        let series: Vec<f64> = (0..50).map(|x| 2.0 * x as f64).collect();
        let model = Arima::fit(&series, ArimaOrder { p: 5, d: 1 }).unwrap();
        let forecast = model.forecast(3).unwrap();
        assert!((forecast[0] - 100.0).abs() < 1e-9);
        assert!((forecast[2] - 104.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_series() {
        let model = Arima::fit(&[4.0; 10], ArimaOrder { p: 1, d: 0 }).unwrap();
        assert_eq!(model.forecast(2).unwrap(), vec![4.0, 4.0]);
    }

    #[test]
    fn test_fit_errors() {
        assert!(matches!(
            Arima::fit(&[1.0, 2.0], ArimaOrder { p: 1, d: 0 }),
            Err(ModelError::InsufficientData { required: 3, actual: 2 })
        ));
        assert_eq!(
            Arima::fit(&[1.0, f64::NAN, 2.0, 3.0], ArimaOrder { p: 1, d: 0 }).unwrap_err(),
            ModelError::NonFiniteInput
        );
    }

    #[test]
    fn test_mean_forecaster() {
        let model = MeanForecaster::fit(&[1.0, 2.0, 3.0]);
        assert_eq!(model.forecast(3), vec![2.0, 2.0, 2.0]);
        assert_eq!(MeanForecaster::fit(&[]).forecast(1), vec![0.0]);
    }
}
