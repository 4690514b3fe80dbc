//! End-to-end training run and forecast requests.
//!
//! `train` takes a raw table through normalization, calendar features,
//! preprocessing, the model bank and the evaluator, and returns one immutable
//! [`TrainingRun`]. Forecasts are generated from that bundle, so a model is
//! always paired with the scaler and imputer it was trained with.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use uuid::Uuid;

use crate::services::evaluator::{
    evaluate, feature_importance, report, Evaluation, FeatureImportance, ModelReportRow,
};
use crate::services::features::{
    add_calendar_features, parameter_importance, ParameterImportance, WEATHER_PARAMETERS,
};
use crate::services::forecast::{generate_forecast, ForecastOutcome, Horizon};
use crate::services::frame::Frame;
use crate::services::models::{train_bank, ModelKind, TimeSeriesModel, TrainedEntry, TrainedModel};
use crate::services::preprocess::{preprocess, PreprocessingArtifacts};
use crate::services::schema::{normalize, NormalizationReport};
use crate::services::table::RawTable;

/// Fatal input problems. Everything else is repaired and reported.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("The uploaded data is empty")]
    EmptyInput,

    #[error("No numeric columns found; at least one numeric column is required for precipitation")]
    NoNumericColumns,

    #[error("Column '{column}' contains no recognizable dates")]
    UndecodableDates { column: String },

    #[error("Could not read input: {0}")]
    Parse(String),
}

/// Everything one training pass produced.
#[derive(Debug, Clone)]
pub struct TrainingRun {
    pub artifacts: PreprocessingArtifacts,
    pub models: Vec<TrainedEntry>,
    pub evaluation: Evaluation,
    /// Lowest-RMSE model, if any model could be scored
    pub best: Option<ModelKind>,
    /// Time-series model refit on the full target series
    pub forecaster: TimeSeriesModel,
    /// Normalized history with calendar features and a filled target
    pub history: Frame,
    pub normalization: NormalizationReport,
    pub parameter_importance: Vec<ParameterImportance>,
    pub feature_importance: Vec<FeatureImportance>,
    pub warnings: Vec<String>,
}

/// Model preference for a forecast.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ModelChoice {
    /// The evaluator's best model
    #[default]
    Auto,
    /// A roster model by name
    Named(String),
}

impl ModelChoice {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            None | Some("") => ModelChoice::Auto,
            Some(s) if s.eq_ignore_ascii_case("auto") => ModelChoice::Auto,
            Some(s) => ModelChoice::Named(s.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForecastRequest {
    pub horizon: Horizon,
    pub model: ModelChoice,
    /// Output label for the target column; defaults to `precipitation`
    pub target_alias: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ForecastResult {
    pub run_id: Uuid,
    pub chosen: ModelKind,
    pub outcome: ForecastOutcome,
    pub target_label: String,
    pub warnings: Vec<String>,
}

/// Seeded RNG when `seed` is set, fresh entropy otherwise.
pub fn pipeline_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Train the full model roster on `raw`.
pub fn train<R: Rng + ?Sized>(raw: &RawTable, rng: &mut R) -> Result<TrainingRun, PipelineError> {
    let normalized = normalize(raw, rng)?;
    let mut warnings = normalized.report.warnings.clone();
    let mut history = normalized.frame;
    tracing::info!(rows = history.len(), "Normalization complete");

    if let Some(w) = add_calendar_features(&mut history) {
        warnings.push(w);
    }

    let prepared = preprocess(&mut history, rng);
    warnings.extend(prepared.warnings);
    let data = prepared.data;

    let models = train_bank(&data);
    let evaluation = evaluate(&models, &data);
    let best = evaluation.best;
    for score in &evaluation.scores {
        if let Some(note) = &score.note {
            warnings.push(format!("{}: {}", score.kind, note));
        }
    }

    let (forecaster, note) = TimeSeriesModel::fit(&data.series.to_vec());
    if let Some(note) = note {
        warnings.push(note);
    }

    let parameter_importance = parameter_importance(&history, &WEATHER_PARAMETERS);
    let feature_importance = feature_importance(&models, best, &prepared.artifacts.feature_cols);

    tracing::info!(
        run_id = %prepared.artifacts.run_id,
        best = ?best,
        warnings = warnings.len(),
        "Training run complete"
    );

    Ok(TrainingRun {
        artifacts: prepared.artifacts,
        models,
        evaluation,
        best,
        forecaster,
        history,
        normalization: normalized.report,
        parameter_importance,
        feature_importance,
        warnings,
    })
}

impl TrainingRun {
    /// Comparison table for display.
    pub fn report(&self) -> Vec<ModelReportRow> {
        report(&self.evaluation)
    }

    /// Resolve the requested model and generate a forecast with it.
    pub fn forecast<R: Rng + ?Sized>(&self, request: &ForecastRequest, rng: &mut R) -> ForecastResult {
        let mut warnings = Vec::new();
        let (chosen, model) = self.resolve_model(&request.model, &mut warnings);
        let outcome = generate_forecast(
            &self.history,
            &model,
            request.horizon,
            Some(&self.artifacts),
            rng,
        );
        warnings.extend(outcome.warnings.iter().cloned());

        let target_label = request
            .target_alias
            .as_deref()
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
            .unwrap_or("precipitation")
            .to_string();

        ForecastResult {
            run_id: self.artifacts.run_id,
            chosen,
            outcome,
            target_label,
            warnings,
        }
    }

    fn resolve_model(&self, choice: &ModelChoice, warnings: &mut Vec<String>) -> (ModelKind, TrainedModel) {
        let requested = match choice {
            ModelChoice::Auto => None,
            ModelChoice::Named(name) => match ModelKind::from_name(name) {
                Some(kind) => Some(kind),
                None => {
                    tracing::warn!("Unknown model '{}', using the best model", name);
                    warnings.push(format!("Unknown model '{}'; using the best model instead", name));
                    None
                }
            },
        };

        if let Some(kind) = requested {
            match self.usable(kind) {
                Some(model) => return (kind, model),
                None => {
                    tracing::warn!("{} is unavailable, using the best model", kind);
                    warnings.push(format!("{} failed to train; using the best model instead", kind));
                }
            }
        }

        self.best
            .and_then(|kind| self.usable(kind).map(|model| (kind, model)))
            .unwrap_or_else(|| {
                (
                    ModelKind::Arima,
                    TrainedModel::TimeSeries(self.forecaster.clone()),
                )
            })
    }

    /// The forecasting model for `kind`, if it trained. ARIMA always maps to
    /// the full-series forecaster.
    fn usable(&self, kind: ModelKind) -> Option<TrainedModel> {
        if kind == ModelKind::Arima {
            return Some(TrainedModel::TimeSeries(self.forecaster.clone()));
        }
        self.models
            .iter()
            .find(|entry| entry.kind == kind)
            .and_then(|entry| entry.model.as_ref().ok())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::forecast::{HorizonUnit, PredictionPath};
    use crate::services::models::{forest_params, n_estimators, ModelError};
    use chrono::{Duration, NaiveDate};

    fn rainfall_csv(days: usize) -> RawTable {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let mut csv = String::from("Date,rainfall_mm\n");
        for i in 0..days {
            let date = start + Duration::days(i as i64);
            csv.push_str(&format!("{},{}\n", date.format("%d/%m/%Y"), (i % 7) as f64 * 0.5));
        }
        RawTable::from_delimited(&csv).unwrap()
    }

    fn request(count: u32, unit: HorizonUnit, model: &str) -> ForecastRequest {
        ForecastRequest {
            horizon: Horizon::new(count, unit).unwrap(),
            model: ModelChoice::parse(Some(model)),
            target_alias: None,
        }
    }

    #[test]
    fn test_model_choice_parse() {
        assert_eq!(ModelChoice::parse(None), ModelChoice::Auto);
        assert_eq!(ModelChoice::parse(Some(" AUTO ")), ModelChoice::Auto);
        assert_eq!(
            ModelChoice::parse(Some("ARIMA")),
            ModelChoice::Named("ARIMA".to_string())
        );
    }

    #[test]
    fn test_train_rainfall_only_and_forecast_a_week() {
        let mut rng = pipeline_rng(Some(42));
        let run = train(&rainfall_csv(365), &mut rng).unwrap();
        assert_eq!(run.models.len(), 4);
        assert_eq!(run.report().len(), 4);
        assert!(run.best.is_some());
        assert_eq!(
            run.normalization.synthesized,
            vec!["temperature", "humidity", "pressure", "wind_speed"]
        );

        let result = run.forecast(&request(7, HorizonUnit::Days, "auto"), &mut rng);
        let rows = &result.outcome.rows;
        assert_eq!(rows.len(), 7);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert!(rows.iter().all(|r| r.precipitation >= 0.0));
        assert_eq!(Some(result.chosen), run.best);
        assert_eq!(result.target_label, "precipitation");
    }

    #[test]
    fn test_reforecast_reuses_artifacts() {
        let mut rng = pipeline_rng(Some(1));
        let run = train(&rainfall_csv(60), &mut rng).unwrap();
        let a = run.forecast(&request(1, HorizonUnit::Weeks, "Random Forest"), &mut rng);
        let b = run.forecast(&request(2, HorizonUnit::Months, "Random Forest"), &mut rng);
        assert_eq!(a.run_id, b.run_id);
        assert_eq!(a.outcome.rows.len(), 7);
        assert_eq!(b.outcome.rows.len(), 60);
        assert_eq!(a.chosen, ModelKind::RandomForest);
        assert_eq!(a.outcome.path, PredictionPath::Model);
    }

    #[test]
    fn test_unknown_model_falls_back_to_best() {
        let mut rng = pipeline_rng(Some(3));
        let run = train(&rainfall_csv(40), &mut rng).unwrap();
        let result = run.forecast(&request(3, HorizonUnit::Days, "prophet"), &mut rng);
        assert_eq!(Some(result.chosen), run.best);
        assert!(result.warnings.iter().any(|w| w.contains("prophet")));
    }

    #[test]
    fn test_failed_model_request_falls_back() {
        let mut rng = pipeline_rng(Some(5));
        let mut run = train(&rainfall_csv(40), &mut rng).unwrap();
        run.models[0].model = Err(ModelError::Singular);
        run.best = Some(ModelKind::RandomForest);
        let result = run.forecast(&request(3, HorizonUnit::Days, "linear regression"), &mut rng);
        assert_eq!(result.chosen, ModelKind::RandomForest);
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn test_arima_request_uses_full_series_forecaster() {
        let mut rng = pipeline_rng(Some(9));
        let run = train(&rainfall_csv(50), &mut rng).unwrap();
        let result = run.forecast(&request(5, HorizonUnit::Days, "arima"), &mut rng);
        assert_eq!(result.chosen, ModelKind::Arima);
        assert_eq!(result.outcome.rows.len(), 5);
    }

    #[test]
    fn test_target_alias_is_output_only() {
        let mut rng = pipeline_rng(Some(2));
        let run = train(&rainfall_csv(30), &mut rng).unwrap();
        let mut req = request(2, HorizonUnit::Days, "auto");
        req.target_alias = Some("rainfall_mm".to_string());
        let result = run.forecast(&req, &mut rng);
        assert_eq!(result.target_label, "rainfall_mm");
        assert!(run.history.has_column("precipitation"));
    }

    #[test]
    fn test_single_row_forecasts_the_mean() {
        let raw = RawTable::from_delimited("date,rain\n2024-01-01,1\n").unwrap();
        let mut rng = pipeline_rng(Some(0));
        let run = train(&raw, &mut rng).unwrap();
        assert_eq!(run.models.len(), 4);
        assert!(run.models[..3].iter().all(|entry| entry.model.is_err()));
        assert!(run.evaluation.scores.iter().all(|s| s.metrics.is_none()));
        assert!(run.report().iter().all(|row| row.rmse == "N/A"));
        assert_eq!(run.best, None);
        assert!(matches!(run.forecaster, TimeSeriesModel::Mean(_)));
        assert!(run.warnings.iter().any(|w| w.contains("1 row(s)")));

        let result = run.forecast(&request(3, HorizonUnit::Days, "auto"), &mut rng);
        assert_eq!(result.chosen, ModelKind::Arima);
        assert_eq!(result.outcome.path, PredictionPath::Model);
        assert_eq!(result.outcome.rows.len(), 3);
        assert_eq!(
            result.outcome.rows[0].date,
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
        );
        assert!(result.outcome.rows.iter().all(|r| r.precipitation == 1.0));
    }

    #[test]
    fn test_five_rows_train_every_model() {
        let mut rng = pipeline_rng(Some(4));
        let run = train(&rainfall_csv(5), &mut rng).unwrap();
        assert_eq!(run.history.len(), 5);
        assert_eq!(run.artifacts.trained_on_row_count, 4);
        assert_eq!(forest_params(4).max_depth, 1);
        assert_eq!(n_estimators(4), 10);
        assert!(run.models.iter().all(|entry| entry.model.is_ok()));
        assert!(run.evaluation.scores.iter().all(|s| s.metrics.is_some()));
        assert!(run.best.is_some());

        let result = run.forecast(&request(3, HorizonUnit::Days, "auto"), &mut rng);
        assert_eq!(result.outcome.rows.len(), 3);
    }

    #[test]
    fn test_one_year_horizon_is_365_daily_rows() {
        let mut rng = pipeline_rng(Some(6));
        let run = train(&rainfall_csv(90), &mut rng).unwrap();
        let result = run.forecast(&request(1, HorizonUnit::Years, "auto"), &mut rng);
        let rows = &result.outcome.rows;
        assert_eq!(rows.len(), 365);
        assert_eq!(rows[0].date, NaiveDate::from_ymd_opt(2023, 4, 1).unwrap());
        assert_eq!(rows[364].date, NaiveDate::from_ymd_opt(2024, 3, 30).unwrap());
        assert!(rows.iter().all(|r| r.precipitation >= 0.0 && r.precipitation.is_finite()));
    }

    #[test]
    fn test_no_dates_no_names_still_forecasts() {
        let raw = RawTable::from_delimited("a,b\n1,2\n3,4\n5,6\n7,8\n").unwrap();
        let mut rng = pipeline_rng(Some(11));
        let run = train(&raw, &mut rng).unwrap();
        assert_eq!(run.normalization.precipitation_source, "a");
        let result = run.forecast(&request(1, HorizonUnit::Weeks, "auto"), &mut rng);
        assert_eq!(result.outcome.rows.len(), 7);
        assert_eq!(
            result.outcome.rows[0].date,
            NaiveDate::from_ymd_opt(2023, 1, 5).unwrap()
        );
    }
}
