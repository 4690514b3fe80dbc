//! Forecast generation.
//!
//! Turns one trained model plus the normalized history into a contiguous
//! daily forecast table covering every canonical column. Generation never
//! fails: when the model cannot produce a usable target series, a seasonal
//! heuristic built from the historical mean takes over and the outcome
//! records why.
//!
//! Stages, in order:
//!   1. build the skeleton (future dates and calendar features)
//!   2. synthesize auxiliary weather columns from historical means
//!   3. predict the target through the model, or fall back to the heuristic
//!   4. sanitize (finite, non-negative precipitation, 2-decimal rounding)

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::helpers::{mean, round_2dp, sample_normal};
use crate::services::features::calendar_values;
use crate::services::frame::Frame;
use crate::services::models::{RegressorModel, TimeSeriesModel, TrainedModel};
use crate::services::preprocess::{Feature, PreprocessingArtifacts};
use crate::services::table::Observation;

/// Longest accepted horizon, in requested units.
pub const MAX_HORIZON_COUNT: u32 = 3650;

/// Historical means used when the history lacks a column.
const DEFAULT_TEMPERATURE: f64 = 25.0;
const DEFAULT_HUMIDITY: f64 = 70.0;
const DEFAULT_PRESSURE: f64 = 1013.0;
const DEFAULT_WIND_SPEED: f64 = 10.0;
const DEFAULT_PRECIPITATION: f64 = 5.0;

// --- Seasonal factors ---
//
// Indexed by month - 1. Temperature peaks in June, humidity and rain in the
// July/August monsoon.

const TEMPERATURE_FACTORS: [f64; 12] = [0.7, 0.8, 0.9, 1.0, 1.1, 1.2, 1.1, 1.1, 1.0, 0.9, 0.8, 0.7];
const HUMIDITY_FACTORS: [f64; 12] = [0.8, 0.7, 0.7, 0.8, 0.9, 1.1, 1.2, 1.2, 1.1, 1.0, 0.9, 0.8];
const PRECIPITATION_FACTORS: [f64; 12] =
    [0.3, 0.2, 0.3, 0.4, 0.6, 1.2, 1.5, 1.4, 1.0, 0.7, 0.4, 0.3];

/// Relative jitter applied to seasonal temperature and humidity.
const SEASONAL_NOISE: f64 = 0.1;
/// Relative jitter of the heuristic precipitation.
const PRECIPITATION_NOISE: f64 = 0.3;
const PRESSURE_NOISE: f64 = 5.0;
const WIND_NOISE: f64 = 2.0;
const HUMIDITY_BOUNDS: (f64, f64) = (30.0, 95.0);

// --- Post-processing of model output ---
//
// Tunable heuristics: exponential smoothing weight on the new prediction,
// and the runaway guard that pulls a forecast whose mean exceeds 3x the
// historical mean back down to 2x.

const SMOOTHING_WEIGHT: f64 = 0.7;
const RUNAWAY_RATIO: f64 = 3.0;
const RUNAWAY_TARGET_RATIO: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HorizonUnit {
    Days,
    Weeks,
    Months,
    Years,
}

impl HorizonUnit {
    /// Calendar approximation: a month is 30 days, a year 365.
    pub fn days(&self) -> usize {
        match self {
            HorizonUnit::Days => 1,
            HorizonUnit::Weeks => 7,
            HorizonUnit::Months => 30,
            HorizonUnit::Years => 365,
        }
    }
}

impl FromStr for HorizonUnit {
    type Err = HorizonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches('s') {
            "day" => Ok(HorizonUnit::Days),
            "week" => Ok(HorizonUnit::Weeks),
            "month" => Ok(HorizonUnit::Months),
            "year" => Ok(HorizonUnit::Years),
            _ => Err(HorizonError::UnknownUnit(s.to_string())),
        }
    }
}

impl fmt::Display for HorizonUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HorizonUnit::Days => "days",
            HorizonUnit::Weeks => "weeks",
            HorizonUnit::Months => "months",
            HorizonUnit::Years => "years",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HorizonError {
    #[error("Horizon count must be between 1 and 3650, got {0}")]
    CountOutOfRange(u32),

    #[error("Unknown horizon unit '{0}'. Use days, weeks, months or years.")]
    UnknownUnit(String),
}

/// How far ahead to forecast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Horizon {
    count: u32,
    unit: HorizonUnit,
}

impl Horizon {
    pub fn new(count: u32, unit: HorizonUnit) -> Result<Self, HorizonError> {
        if !(1..=MAX_HORIZON_COUNT).contains(&count) {
            return Err(HorizonError::CountOutOfRange(count));
        }
        Ok(Self { count, unit })
    }

    pub fn days(&self) -> usize {
        self.count as usize * self.unit.days()
    }
}

impl fmt::Display for Horizon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.count, self.unit)
    }
}

/// Why the heuristic produced the target instead of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The time-series model could not forecast
    ForecastFailed,
    /// The regressor rejected the feature rows or returned unusable values
    PredictionFailed,
    /// A feature-based model was supplied without its preprocessing artifacts
    MissingArtifacts,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PredictionPath {
    Model,
    Heuristic {
        reason: FallbackReason,
        detail: String,
    },
}

#[derive(Debug, Clone)]
pub struct ForecastOutcome {
    pub rows: Vec<Observation>,
    pub path: PredictionPath,
    pub warnings: Vec<String>,
}

/// Historical column means with fixed defaults for absent columns.
#[derive(Debug, Clone, Copy)]
struct HistoricalMeans {
    temperature: f64,
    humidity: f64,
    pressure: f64,
    wind_speed: f64,
    precipitation: f64,
}

impl HistoricalMeans {
    fn of(history: &Frame) -> Self {
        let or = |name: &str, default: f64| history.mean(name).unwrap_or(default);
        Self {
            temperature: or("temperature", DEFAULT_TEMPERATURE),
            humidity: or("humidity", DEFAULT_HUMIDITY),
            pressure: or("pressure", DEFAULT_PRESSURE),
            wind_speed: or("wind_speed", DEFAULT_WIND_SPEED),
            precipitation: or("precipitation", DEFAULT_PRECIPITATION),
        }
    }

    fn get(&self, name: &str) -> Option<f64> {
        match name {
            "temperature" => Some(self.temperature),
            "humidity" => Some(self.humidity),
            "pressure" => Some(self.pressure),
            "wind_speed" => Some(self.wind_speed),
            "precipitation" => Some(self.precipitation),
            _ => None,
        }
    }
}

/// Produce the forecast table for `horizon` days after the last history date.
pub fn generate_forecast<R: Rng + ?Sized>(
    history: &Frame,
    model: &TrainedModel,
    horizon: Horizon,
    artifacts: Option<&PreprocessingArtifacts>,
    rng: &mut R,
) -> ForecastOutcome {
    let means = HistoricalMeans::of(history);
    let mut warnings = Vec::new();

    // --- Stage 1: skeleton ---
    let anchor = match history.last_date() {
        Some(last) => last,
        None => {
            warnings.push("History has no dates; forecasting from tomorrow".to_string());
            Utc::now().date_naive()
        }
    };
    let mut future = build_skeleton(anchor, horizon.days());
    if future.len() < horizon.days() {
        tracing::warn!(
            "Horizon of {} runs past the last representable date, truncated to {} days",
            horizon,
            future.len()
        );
        warnings.push(format!(
            "Forecast truncated to {} of {} days: dates after {} cannot be represented",
            future.len(),
            horizon.days(),
            future.last_date().unwrap_or(anchor)
        ));
    }

    // --- Stage 2: auxiliaries ---
    synthesize_auxiliaries(&mut future, &means, rng);

    // --- Stage 3: target ---
    let predicted = match model {
        TrainedModel::TimeSeries(ts) => predict_time_series(ts, future.len()),
        TrainedModel::FeatureBased(regressor) => match artifacts {
            Some(artifacts) => {
                predict_regressor(regressor, &future, artifacts, &means)
            }
            None => Err((
                FallbackReason::MissingArtifacts,
                "no preprocessing artifacts for a feature-based model".to_string(),
            )),
        },
    };
    let path = match predicted {
        Ok(values) => {
            future.insert("precipitation", values.into_iter().map(Some).collect());
            PredictionPath::Model
        }
        Err((reason, detail)) => {
            tracing::warn!(
                "{} forecast fell back to seasonal heuristic: {}",
                model.kind(),
                detail
            );
            warnings.push(format!(
                "{} could not produce a forecast ({}); used seasonal averages instead",
                model.kind(),
                detail
            ));
            let values = heuristic_precipitation(&future, means.precipitation, rng);
            future.insert("precipitation", values.into_iter().map(Some).collect());
            PredictionPath::Heuristic { reason, detail }
        }
    };

    // --- Stage 4: sanitize ---
    let rows = sanitize(&future, &means);
    tracing::info!(
        days = rows.len(),
        model = %model.kind(),
        heuristic = matches!(path, PredictionPath::Heuristic { .. }),
        "Generated forecast"
    );

    ForecastOutcome {
        rows,
        path,
        warnings,
    }
}

/// Daily dates starting the day after `anchor`, with calendar features.
/// Stops early at the last representable date.
fn build_skeleton(anchor: NaiveDate, days: usize) -> Frame {
    let dates: Vec<NaiveDate> = (1..=days as i64)
        .map_while(|i| anchor.checked_add_signed(Duration::days(i)))
        .collect();
    let calendar: Vec<[f64; 3]> = dates.iter().map(|d| calendar_values(*d)).collect();
    let mut frame = Frame::with_index(dates);
    for (slot, feature) in [Feature::DayOfYear, Feature::Month, Feature::SeasonCode]
        .iter()
        .enumerate()
    {
        frame.insert(feature.column(), calendar.iter().map(|c| Some(c[slot])).collect());
    }
    frame
}

fn month_index(date: &NaiveDate) -> usize {
    date.month0() as usize
}

fn synthesize_auxiliaries<R: Rng + ?Sized>(future: &mut Frame, means: &HistoricalMeans, rng: &mut R) {
    let dates: Vec<NaiveDate> = future.index().map(<[NaiveDate]>::to_vec).unwrap_or_default();

    let mut temperature = Vec::with_capacity(dates.len());
    let mut humidity = Vec::with_capacity(dates.len());
    let mut pressure = Vec::with_capacity(dates.len());
    let mut wind_speed = Vec::with_capacity(dates.len());
    for date in &dates {
        let m = month_index(date);
        temperature.push(Some(
            means.temperature * TEMPERATURE_FACTORS[m] * (1.0 + sample_normal(rng, 0.0, SEASONAL_NOISE)),
        ));
        let h = means.humidity * HUMIDITY_FACTORS[m] * (1.0 + sample_normal(rng, 0.0, SEASONAL_NOISE));
        humidity.push(Some(h.clamp(HUMIDITY_BOUNDS.0, HUMIDITY_BOUNDS.1)));
        pressure.push(Some(means.pressure + sample_normal(rng, 0.0, PRESSURE_NOISE)));
        wind_speed.push(Some((means.wind_speed + sample_normal(rng, 0.0, WIND_NOISE)).max(0.0)));
    }

    future.insert("temperature", temperature);
    future.insert("humidity", humidity);
    future.insert("pressure", pressure);
    future.insert("wind_speed", wind_speed);
}

type Prediction = Result<Vec<f64>, (FallbackReason, String)>;

fn predict_time_series(model: &TimeSeriesModel, steps: usize) -> Prediction {
    let values = model
        .forecast(steps)
        .map_err(|e| (FallbackReason::ForecastFailed, e.to_string()))?;
    if values.len() != steps {
        return Err((
            FallbackReason::ForecastFailed,
            format!("expected {} values, got {}", steps, values.len()),
        ));
    }
    Ok(values)
}

fn predict_regressor(
    model: &RegressorModel,
    future: &Frame,
    artifacts: &PreprocessingArtifacts,
    means: &HistoricalMeans,
) -> Prediction {
    let features: &[Feature] = if artifacts.feature_cols.is_empty() {
        &Feature::DEFAULT
    } else {
        &artifacts.feature_cols
    };

    let columns: Vec<Vec<f64>> = features
        .iter()
        .map(|f| {
            let name = f.column();
            if future.has_column(name) {
                future.column_f64(name)
            } else {
                vec![means.get(name).unwrap_or(0.0); future.len()]
            }
        })
        .collect();
    let rows = Array2::from_shape_fn((future.len(), columns.len()), |(r, c)| columns[c][r]);

    let predictions = model
        .predict(&artifacts.transform(&rows))
        .map_err(|e| (FallbackReason::PredictionFailed, e.to_string()))?
        .to_vec();
    if predictions.len() != future.len() {
        return Err((
            FallbackReason::PredictionFailed,
            format!("expected {} values, got {}", future.len(), predictions.len()),
        ));
    }
    Ok(post_process(predictions, means.precipitation))
}

/// Clip at zero, smooth, and pull back runaway forecasts.
fn post_process(predictions: Vec<f64>, historical_mean: f64) -> Vec<f64> {
    let mut smoothed = Vec::with_capacity(predictions.len());
    for p in predictions.into_iter().map(|p| p.max(0.0)) {
        let next = match smoothed.last() {
            Some(prev) => SMOOTHING_WEIGHT * p + (1.0 - SMOOTHING_WEIGHT) * prev,
            None => p,
        };
        smoothed.push(next);
    }

    if let Some(forecast_mean) = mean(&smoothed) {
        if forecast_mean > RUNAWAY_RATIO * historical_mean && forecast_mean > 0.0 {
            tracing::warn!(
                "Forecast mean {:.2} exceeds {}x the historical mean {:.2}, rescaling",
                forecast_mean,
                RUNAWAY_RATIO,
                historical_mean
            );
            let scale = RUNAWAY_TARGET_RATIO * historical_mean / forecast_mean;
            smoothed.iter_mut().for_each(|v| *v *= scale);
        }
    }
    smoothed
}

/// Seasonal precipitation: historical mean scaled by the month factor with
/// multiplicative noise, never negative.
fn heuristic_precipitation<R: Rng + ?Sized>(future: &Frame, historical_mean: f64, rng: &mut R) -> Vec<f64> {
    future
        .index()
        .unwrap_or_default()
        .iter()
        .map(|date| {
            let factor = PRECIPITATION_FACTORS[month_index(date)];
            (historical_mean * factor * (1.0 + sample_normal(rng, 0.0, PRECIPITATION_NOISE))).max(0.0)
        })
        .collect()
}

fn sanitize(future: &Frame, means: &HistoricalMeans) -> Vec<Observation> {
    let dates = future.index().unwrap_or_default();
    let column = |name: &str| -> Vec<f64> {
        let fill = means.get(name).filter(|v| v.is_finite()).unwrap_or(0.0);
        future
            .column_f64(name)
            .into_iter()
            .map(|v| round_2dp(if v.is_finite() { v } else { fill }))
            .collect()
    };
    let temperature = column("temperature");
    let humidity = column("humidity");
    let pressure = column("pressure");
    let wind_speed = column("wind_speed");
    let precipitation = column("precipitation");

    dates
        .iter()
        .enumerate()
        .map(|(i, date)| Observation {
            date: *date,
            temperature: temperature[i],
            humidity: humidity[i],
            pressure: pressure[i],
            wind_speed: wind_speed[i].max(0.0),
            precipitation: precipitation[i].max(0.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::models::{LinearRegression, MeanForecaster};
    use crate::services::preprocess::{SimpleImputer, StandardScaler};
    use ndarray::Array1;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn history(days: usize, rain: f64) -> Frame {
        let start = date(2024, 1, 1);
        let dates: Vec<NaiveDate> = (0..days as i64).map(|i| start + Duration::days(i)).collect();
        let records: Vec<Observation> = dates
            .iter()
            .map(|d| Observation {
                date: *d,
                temperature: 20.0,
                humidity: 60.0,
                pressure: 1010.0,
                wind_speed: 4.0,
                precipitation: rain,
            })
            .collect();
        Frame::from_observations(&records)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn mean_model(value: f64) -> TrainedModel {
        TrainedModel::TimeSeries(TimeSeriesModel::Mean(MeanForecaster { mean: value }))
    }

    fn identity_artifacts(features: Vec<Feature>) -> PreprocessingArtifacts {
        let width = features.len();
        PreprocessingArtifacts {
            run_id: Uuid::new_v4(),
            scaler: StandardScaler {
                means: vec![0.0; width],
                scales: vec![1.0; width],
            },
            imputer: SimpleImputer {
                fill_values: vec![0.0; width],
            },
            feature_cols: features,
            trained_on_row_count: 10,
        }
    }

    fn assert_well_formed(rows: &[Observation], expected_len: usize, first: NaiveDate) {
        assert_eq!(rows.len(), expected_len);
        assert_eq!(rows[0].date, first);
        for pair in rows.windows(2) {
            assert_eq!(pair[1].date - pair[0].date, Duration::days(1));
        }
        for row in rows {
            assert!(row.precipitation >= 0.0);
            assert!(row.wind_speed >= 0.0);
            assert!((30.0..=95.0).contains(&row.humidity));
            for v in [row.temperature, row.humidity, row.pressure, row.wind_speed, row.precipitation] {
                assert!(v.is_finite());
                assert_eq!(round_2dp(v), v);
            }
        }
    }

    #[test]
    fn test_horizon_units() {
        assert_eq!(Horizon::new(2, HorizonUnit::Weeks).unwrap().days(), 14);
        assert_eq!(Horizon::new(1, HorizonUnit::Months).unwrap().days(), 30);
        assert_eq!(Horizon::new(1, HorizonUnit::Years).unwrap().days(), 365);
        assert_eq!(
            Horizon::new(0, HorizonUnit::Days),
            Err(HorizonError::CountOutOfRange(0))
        );
        assert!(Horizon::new(MAX_HORIZON_COUNT + 1, HorizonUnit::Days).is_err());
    }

    #[test]
    fn test_horizon_unit_parse() {
        assert_eq!("Days".parse::<HorizonUnit>().unwrap(), HorizonUnit::Days);
        assert_eq!("week".parse::<HorizonUnit>().unwrap(), HorizonUnit::Weeks);
        assert_eq!(" YEARS ".parse::<HorizonUnit>().unwrap(), HorizonUnit::Years);
        assert!(matches!(
            "fortnight".parse::<HorizonUnit>(),
            Err(HorizonError::UnknownUnit(_))
        ));
    }

    #[test]
    fn test_time_series_forecast_continues_after_history() {
        let history = history(30, 2.0);
        let outcome = generate_forecast(
            &history,
            &mean_model(2.0),
            Horizon::new(10, HorizonUnit::Days).unwrap(),
            None,
            &mut rng(),
        );
        assert_eq!(outcome.path, PredictionPath::Model);
        assert_well_formed(&outcome.rows, 10, date(2024, 1, 31));
        assert!(outcome.rows.iter().all(|r| r.precipitation == 2.0));
    }

    #[test]
    fn test_negative_time_series_output_is_clipped() {
        let outcome = generate_forecast(
            &history(10, 1.0),
            &mean_model(-3.0),
            Horizon::new(1, HorizonUnit::Weeks).unwrap(),
            None,
            &mut rng(),
        );
        assert_well_formed(&outcome.rows, 7, date(2024, 1, 11));
        assert!(outcome.rows.iter().all(|r| r.precipitation == 0.0));
    }

    #[test]
    fn test_regressor_without_artifacts_uses_heuristic() {
        let model = TrainedModel::FeatureBased(RegressorModel::Linear(LinearRegression {
            intercept: 1.0,
            coefficients: Array1::zeros(6),
        }));
        let outcome = generate_forecast(
            &history(20, 4.0),
            &model,
            Horizon::new(1, HorizonUnit::Months).unwrap(),
            None,
            &mut rng(),
        );
        assert!(matches!(
            outcome.path,
            PredictionPath::Heuristic {
                reason: FallbackReason::MissingArtifacts,
                ..
            }
        ));
        assert_eq!(outcome.warnings.len(), 1);
        assert_well_formed(&outcome.rows, 30, date(2024, 1, 21));
    }

    #[test]
    fn test_regressor_dimension_mismatch_uses_heuristic() {
        // model expects 3 features, artifacts supply 6
        let model = TrainedModel::FeatureBased(RegressorModel::Linear(LinearRegression {
            intercept: 1.0,
            coefficients: Array1::zeros(3),
        }));
        let artifacts = identity_artifacts(Feature::DEFAULT.to_vec());
        let outcome = generate_forecast(
            &history(20, 4.0),
            &model,
            Horizon::new(5, HorizonUnit::Days).unwrap(),
            Some(&artifacts),
            &mut rng(),
        );
        assert!(matches!(
            outcome.path,
            PredictionPath::Heuristic {
                reason: FallbackReason::PredictionFailed,
                ..
            }
        ));
        assert_well_formed(&outcome.rows, 5, date(2024, 1, 21));
    }

    #[test]
    fn test_regressor_path_smooths_constant_prediction() {
        let model = TrainedModel::FeatureBased(RegressorModel::Linear(LinearRegression {
            intercept: 3.0,
            coefficients: Array1::zeros(2),
        }));
        let artifacts = identity_artifacts(vec![Feature::DayOfYear, Feature::Month]);
        let outcome = generate_forecast(
            &history(20, 2.0),
            &model,
            Horizon::new(4, HorizonUnit::Days).unwrap(),
            Some(&artifacts),
            &mut rng(),
        );
        assert_eq!(outcome.path, PredictionPath::Model);
        assert!(outcome.rows.iter().all(|r| r.precipitation == 3.0));
    }

    #[test]
    fn test_post_process_smoothing_and_clip() {
        let out = post_process(vec![-1.0, 10.0, 0.0], 100.0);
        assert_eq!(out[0], 0.0);
        assert!((out[1] - 7.0).abs() < 1e-12);
        assert!((out[2] - 2.1).abs() < 1e-12);
    }

    #[test]
    fn test_post_process_rescales_runaway() {
        let out = post_process(vec![10.0, 10.0], 1.0);
        let m = mean(&out).unwrap();
        assert!((m - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_heuristic_follows_month_factors() {
        let future = build_skeleton(date(2024, 6, 30), 31);
        let values = heuristic_precipitation(&future, 10.0, &mut rng());
        assert_eq!(values.len(), 31);
        assert!(values.iter().all(|v| *v >= 0.0 && v.is_finite()));
    }

    #[test]
    fn test_skeleton_crosses_year_end() {
        let future = build_skeleton(date(2024, 12, 30), 3);
        assert_eq!(
            future.index().unwrap(),
            &[date(2024, 12, 31), date(2025, 1, 1), date(2025, 1, 2)]
        );
        assert_eq!(
            future.column("day_of_year"),
            Some(vec![Some(366.0), Some(1.0), Some(2.0)])
        );
        assert_eq!(
            future.column("season_code"),
            Some(vec![Some(0.0), Some(0.0), Some(0.0)])
        );
    }

    #[test]
    fn test_skeleton_stops_at_last_representable_date() {
        let anchor = NaiveDate::MAX - Duration::days(2);
        let future = build_skeleton(anchor, 5);
        assert_eq!(future.len(), 2);
        assert_eq!(future.last_date(), Some(NaiveDate::MAX));
    }

    #[test]
    fn test_forecast_near_calendar_end_is_truncated() {
        let history = Frame::with_index(vec![NaiveDate::MAX - Duration::days(3)]);
        let outcome = generate_forecast(
            &history,
            &mean_model(1.0),
            Horizon::new(1, HorizonUnit::Weeks).unwrap(),
            None,
            &mut rng(),
        );
        assert_eq!(outcome.rows.len(), 3);
        assert_eq!(outcome.rows[2].date, NaiveDate::MAX);
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("3 of 7 days"));
    }

    #[test]
    fn test_large_predictions_survive_rounding() {
        let outcome = generate_forecast(
            &history(10, 1.0),
            &mean_model(1e30),
            Horizon::new(3, HorizonUnit::Days).unwrap(),
            None,
            &mut rng(),
        );
        assert_eq!(outcome.path, PredictionPath::Model);
        assert!(outcome.rows.iter().all(|r| r.precipitation == 1e30));
    }

    #[test]
    fn test_missing_history_columns_use_defaults() {
        let mut history = Frame::with_index(vec![date(2024, 3, 1)]);
        history.insert("precipitation", vec![None]);
        let means = HistoricalMeans::of(&history);
        assert_eq!(means.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(means.precipitation, DEFAULT_PRECIPITATION);
    }
}
