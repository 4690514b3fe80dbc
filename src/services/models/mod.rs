//! Model bank: a fixed roster of regressors plus one time-series model.
//!
//! Feature-based models consume scaled feature rows; the time-series model
//! only sees the chronological target series. Both are wrapped in
//! [`TrainedModel`] so callers branch on an explicit tag rather than probing
//! for capabilities.

pub mod arima;
pub mod ensemble;
pub mod linear;
pub mod tree;

use ndarray::{s, Array1, Array2};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::services::preprocess::{PreparedData, MIN_SPLIT_ROWS};

pub use arima::{Arima, ArimaOrder, MeanForecaster};
pub use ensemble::{GradientBoosting, RandomForest};
pub use linear::LinearRegression;
pub use tree::TreeParams;

/// Seed for bootstrap sampling in the random forest.
pub const MODEL_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("Not enough data: need {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Training data contains NaN or infinite values")]
    NonFiniteInput,

    #[error("Feature rows have {actual} columns, model expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Normal equations are singular")]
    Singular,

    #[error("Model produced NaN or infinite output")]
    NonFiniteOutput,
}

/// The model roster, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
pub enum ModelKind {
    LinearRegression,
    RandomForest,
    GradientBoosting,
    Arima,
}

impl ModelKind {
    pub const ROSTER: [ModelKind; 4] = [
        ModelKind::LinearRegression,
        ModelKind::RandomForest,
        ModelKind::GradientBoosting,
        ModelKind::Arima,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ModelKind::LinearRegression => "Linear Regression",
            ModelKind::RandomForest => "Random Forest",
            ModelKind::GradientBoosting => "Gradient Boosting",
            ModelKind::Arima => "ARIMA",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModelKind::LinearRegression => "Simple linear model",
            ModelKind::RandomForest => "Ensemble of decision trees",
            ModelKind::GradientBoosting => "Sequential ensemble method",
            ModelKind::Arima => "Time series forecasting",
        }
    }

    /// Case-insensitive lookup by display name or a short alias.
    pub fn from_name(name: &str) -> Option<Self> {
        let folded: String = name
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        match folded.as_str() {
            "linearregression" | "linear" | "lr" => Some(ModelKind::LinearRegression),
            "randomforest" | "forest" | "rf" => Some(ModelKind::RandomForest),
            "gradientboosting" | "boosting" | "gb" | "gbr" => Some(ModelKind::GradientBoosting),
            "arima" => Some(ModelKind::Arima),
            _ => None,
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Regressors that map a scaled feature row to a target value.
#[derive(Debug, Clone)]
pub enum RegressorModel {
    Linear(LinearRegression),
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
}

impl RegressorModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            RegressorModel::Linear(_) => ModelKind::LinearRegression,
            RegressorModel::RandomForest(_) => ModelKind::RandomForest,
            RegressorModel::GradientBoosting(_) => ModelKind::GradientBoosting,
        }
    }

    pub fn predict(&self, rows: &Array2<f64>) -> Result<Array1<f64>, ModelError> {
        let predictions = match self {
            RegressorModel::Linear(m) => m.predict(rows)?,
            RegressorModel::RandomForest(m) => m.predict(rows)?,
            RegressorModel::GradientBoosting(m) => m.predict(rows)?,
        };
        if predictions.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFiniteOutput);
        }
        Ok(predictions)
    }

    /// Normalized impurity importances; tree ensembles only.
    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            RegressorModel::Linear(_) => None,
            RegressorModel::RandomForest(m) => Some(m.feature_importances().to_vec()),
            RegressorModel::GradientBoosting(m) => Some(m.feature_importances().to_vec()),
        }
    }
}

/// Models that extrapolate the target series on their own.
#[derive(Debug, Clone)]
pub enum TimeSeriesModel {
    Arima(Arima),
    /// Replaces ARIMA when it cannot be fit
    Mean(MeanForecaster),
}

impl TimeSeriesModel {
    /// Fit ARIMA on `series`, falling back to the series mean on failure.
    /// The second value describes the fallback when one happened.
    pub fn fit(series: &[f64]) -> (Self, Option<String>) {
        let order = ArimaOrder::for_length(series.len());
        match Arima::fit(series, order) {
            Ok(model) => (TimeSeriesModel::Arima(model), None),
            Err(e) => {
                tracing::warn!("ARIMA{} failed ({}), using mean forecaster", order, e);
                (
                    TimeSeriesModel::Mean(MeanForecaster::fit(series)),
                    Some(format!(
                        "ARIMA{} could not be fit ({}); forecasting the historical mean instead",
                        order, e
                    )),
                )
            }
        }
    }

    pub fn forecast(&self, steps: usize) -> Result<Vec<f64>, ModelError> {
        match self {
            TimeSeriesModel::Arima(m) => m.forecast(steps),
            TimeSeriesModel::Mean(m) => Ok(m.forecast(steps)),
        }
    }
}

/// A trained model of either family.
#[derive(Debug, Clone)]
pub enum TrainedModel {
    FeatureBased(RegressorModel),
    TimeSeries(TimeSeriesModel),
}

impl TrainedModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedModel::FeatureBased(m) => m.kind(),
            TrainedModel::TimeSeries(_) => ModelKind::Arima,
        }
    }

    pub fn feature_importances(&self) -> Option<Vec<f64>> {
        match self {
            TrainedModel::FeatureBased(m) => m.feature_importances(),
            TrainedModel::TimeSeries(_) => None,
        }
    }
}

/// One roster slot after training. A failed fit keeps its error so the
/// evaluator can report it.
#[derive(Debug, Clone)]
pub struct TrainedEntry {
    pub kind: ModelKind,
    pub model: Result<TrainedModel, ModelError>,
    /// Set when the slot holds a fallback instead of the requested model
    pub note: Option<String>,
}

/// `min(100, max(10, n / 2))`
pub fn n_estimators(n_train: usize) -> usize {
    (n_train / 2).clamp(10, 100)
}

/// Forest depth grows with the data: `max(1, min(10, n / 10))`.
pub fn forest_params(n_train: usize) -> TreeParams {
    TreeParams {
        max_depth: (n_train / 10).clamp(1, 10),
        min_samples_leaf: 3,
    }
}

pub fn boosting_params() -> TreeParams {
    TreeParams {
        max_depth: 4,
        min_samples_leaf: 3,
    }
}

pub const BOOSTING_LEARNING_RATE: f64 = 0.05;

/// Train every roster model on `data`.
///
/// Regressors use the shuffled training split and are skipped when the data
/// is too small to hold anything out. ARIMA is fit on the chronological
/// training prefix so it can be scored against the chronological holdout.
pub fn train_bank(data: &PreparedData) -> Vec<TrainedEntry> {
    let n_train = data.x_train.nrows();
    let n_rows = data.series.len();
    let estimators = n_estimators(n_train);
    tracing::debug!(
        n_train,
        n_estimators = estimators,
        forest_depth = forest_params(n_train).max_depth,
        "Training model bank"
    );

    let mut entries: Vec<TrainedEntry> = ModelKind::ROSTER[..3]
        .iter()
        .map(|&kind| {
            let model = match kind {
                _ if n_rows < MIN_SPLIT_ROWS => Err(ModelError::InsufficientData {
                    required: MIN_SPLIT_ROWS,
                    actual: n_rows,
                }),
                ModelKind::LinearRegression => {
                    LinearRegression::fit(&data.x_train, &data.y_train).map(RegressorModel::Linear)
                }
                ModelKind::RandomForest => RandomForest::fit(
                    &data.x_train,
                    &data.y_train,
                    estimators,
                    forest_params(n_train),
                    MODEL_SEED,
                )
                .map(RegressorModel::RandomForest),
                _ => GradientBoosting::fit(
                    &data.x_train,
                    &data.y_train,
                    estimators,
                    BOOSTING_LEARNING_RATE,
                    boosting_params(),
                )
                .map(RegressorModel::GradientBoosting),
            };
            if let Err(e) = &model {
                tracing::warn!("{} failed to train: {}", kind, e);
            }
            TrainedEntry {
                kind,
                model: model.map(TrainedModel::FeatureBased),
                note: None,
            }
        })
        .collect();

    let prefix = data.series.slice(s![..data.series_split]).to_vec();
    let (series_model, note) = TimeSeriesModel::fit(&prefix);
    entries.push(TrainedEntry {
        kind: ModelKind::Arima,
        model: Ok(TrainedModel::TimeSeries(series_model)),
        note,
    });

    tracing::info!(models = entries.len(), "Model bank trained");
    entries
}

/// Shared input validation for the regressors. Returns the feature count.
pub(crate) fn check_training_data(x: &Array2<f64>, y: &Array1<f64>) -> Result<usize, ModelError> {
    if x.nrows() == 0 || x.nrows() != y.len() {
        return Err(ModelError::InsufficientData {
            required: 1,
            actual: x.nrows().min(y.len()),
        });
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(ModelError::NonFiniteInput);
    }
    Ok(x.ncols())
}

/// Feature rows must have `width` columns.
pub(crate) fn check_rows(rows: &Array2<f64>, width: usize) -> Result<(), ModelError> {
    if rows.ncols() != width {
        return Err(ModelError::DimensionMismatch {
            expected: width,
            actual: rows.ncols(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prepared(n: usize) -> PreparedData {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 7) as f64 });
        let y = Array1::from_shape_fn(n, |i| 2.0 * i as f64 + 1.0);
        let split = n - n / 10;
        PreparedData {
            x_train: x.slice(s![..split, ..]).to_owned(),
            y_train: y.slice(s![..split]).to_owned(),
            x_test: x.slice(s![split.., ..]).to_owned(),
            y_test: y.slice(s![split..]).to_owned(),
            series: y,
            series_split: split,
        }
    }

    #[test]
    fn test_n_estimators_bounds() {
        assert_eq!(n_estimators(4), 10);
        assert_eq!(n_estimators(60), 30);
        assert_eq!(n_estimators(1000), 100);
    }

    #[test]
    fn test_forest_depth_bounds() {
        assert_eq!(forest_params(5).max_depth, 1);
        assert_eq!(forest_params(55).max_depth, 5);
        assert_eq!(forest_params(500).max_depth, 10);
    }

    #[test]
    fn test_model_kind_from_name() {
        assert_eq!(ModelKind::from_name("Random Forest"), Some(ModelKind::RandomForest));
        assert_eq!(ModelKind::from_name("linear_regression"), Some(ModelKind::LinearRegression));
        assert_eq!(ModelKind::from_name("ARIMA"), Some(ModelKind::Arima));
        assert_eq!(ModelKind::from_name("prophet"), None);
    }

    #[test]
    fn test_train_bank_roster_order() {
        let entries = train_bank(&prepared(60));
        let kinds: Vec<ModelKind> = entries.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, ModelKind::ROSTER.to_vec());
        assert!(entries.iter().all(|e| e.model.is_ok()));
    }

    #[test]
    fn test_train_bank_records_regressor_failure() {
        let mut data = prepared(20);
        data.x_train[[0, 0]] = f64::NAN;
        let entries = train_bank(&data);
        assert_eq!(entries[0].model.as_ref().err(), Some(&ModelError::NonFiniteInput));
        assert!(entries[3].model.is_ok());
    }

    #[test]
    fn test_train_bank_single_row_skips_regressors() {
        let data = PreparedData {
            x_train: Array2::zeros((1, 2)),
            y_train: Array1::from_vec(vec![4.0]),
            x_test: Array2::zeros((0, 2)),
            y_test: Array1::zeros(0),
            series: Array1::from_vec(vec![4.0]),
            series_split: 1,
        };
        let entries = train_bank(&data);
        assert_eq!(entries.len(), 4);
        for entry in &entries[..3] {
            assert_eq!(
                entry.model.as_ref().err(),
                Some(&ModelError::InsufficientData { required: 2, actual: 1 })
            );
        }
        assert!(matches!(
            entries[3].model,
            Ok(TrainedModel::TimeSeries(TimeSeriesModel::Mean(_)))
        ));
    }

    #[test]
    fn test_time_series_fallback_to_mean() {
        let (model, note) = TimeSeriesModel::fit(&[3.0]);
        assert!(matches!(model, TimeSeriesModel::Mean(_)));
        assert!(note.is_some());
        assert_eq!(model.forecast(2).unwrap(), vec![3.0, 3.0]);
    }

    #[test]
    fn test_feature_importances_only_for_ensembles() {
        let data = prepared(40);
        let linear = LinearRegression::fit(&data.x_train, &data.y_train).unwrap();
        assert!(RegressorModel::Linear(linear).feature_importances().is_none());
        let forest =
            RandomForest::fit(&data.x_train, &data.y_train, 10, forest_params(36), MODEL_SEED)
                .unwrap();
        let importances = RegressorModel::RandomForest(forest).feature_importances().unwrap();
        assert_eq!(importances.len(), 2);
    }
}
