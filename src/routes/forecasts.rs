//! Forecast HTTP endpoints.
//!
//! - POST /api/v1/forecasts/upload?filename=NAME  (body: file bytes)
//! - POST /api/v1/forecasts/sample
//! - POST /api/v1/forecasts/open-meteo?location=&start_date=&end_date=
//! - POST /api/v1/forecasts/weatherapi?location=&start_date=&end_date=
//! - POST /api/v1/forecasts/openweather?location=&start_date=&end_date=
//! - POST /api/v1/forecasts/weatherbit?location=&start_date=&end_date=
//!
//! All accept `horizon_count`, `horizon_unit`, `model`, `target_alias` and
//! `format` (json|csv). Each request trains a fresh model roster on its own
//! data and answers with the comparison table plus the forecast.

use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::{AppError, ErrorResponse};
use crate::services::evaluator::{FeatureImportance, ModelReportRow};
use crate::services::features::ParameterImportance;
use crate::services::forecast::{Horizon, HorizonUnit, PredictionPath};
use crate::services::pipeline::{
    pipeline_rng, train, ForecastRequest, ForecastResult, ModelChoice, PipelineError, TrainingRun,
};
use crate::services::providers::{
    DailyHistory, OpenMeteoClient, OpenWeatherClient, WeatherApiClient, WeatherBitClient,
};
use crate::services::sample::load_or_generate;
use crate::services::schema::NormalizationReport;
use crate::services::table::{is_reserved_label, observations_to_csv, Observation, RawTable};

/// Forecast length used when `horizon_count` is omitted.
const DEFAULT_HORIZON_COUNT: u32 = 30;

/// Shared application state for data and forecast endpoints.
#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<AppConfig>,
    pub(crate) open_meteo: OpenMeteoClient,
    /// `None` when no WeatherAPI key is configured
    pub(crate) weatherapi: Option<WeatherApiClient>,
    pub(crate) openweather: Option<OpenWeatherClient>,
    pub(crate) weatherbit: Option<WeatherBitClient>,
}

impl AppState {
    pub(crate) fn new(config: AppConfig) -> Self {
        Self {
            open_meteo: OpenMeteoClient::new(&config),
            weatherapi: WeatherApiClient::from_config(&config),
            openweather: OpenWeatherClient::from_config(&config),
            weatherbit: WeatherBitClient::from_config(&config),
            config: Arc::new(config),
        }
    }
}

// ---------------------------------------------------------------------------
// Query parameter structs
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ForecastParams {
    /// Number of horizon units to forecast (1-3650, default 30)
    pub horizon_count: Option<u32>,
    /// days, weeks, months or years (default days)
    pub horizon_unit: Option<String>,
    /// Model to forecast with: "auto" (default) or a roster name such as "Random Forest"
    pub model: Option<String>,
    /// Column label for the predicted target (default "precipitation")
    pub target_alias: Option<String>,
    /// Response format: json (default) or csv
    pub format: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct UploadParams {
    /// Original file name; its extension selects the parser (csv, txt, tsv, json)
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ProviderParams {
    /// Place name, e.g. "Zurich"
    pub location: String,
    /// First day to fetch (YYYY-MM-DD)
    #[param(value_type = String, format = Date)]
    pub start_date: NaiveDate,
    /// Last day to fetch, inclusive (YYYY-MM-DD)
    #[param(value_type = String, format = Date)]
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Json,
    Csv,
}

impl ForecastParams {
    fn parse(&self) -> Result<(ForecastRequest, OutputFormat), AppError> {
        let unit: HorizonUnit = match self.horizon_unit.as_deref() {
            None => HorizonUnit::Days,
            Some(raw) => raw.parse()?,
        };
        let horizon = Horizon::new(self.horizon_count.unwrap_or(DEFAULT_HORIZON_COUNT), unit)?;

        let format = match self.format.as_deref().map(|f| f.trim().to_ascii_lowercase()) {
            None => OutputFormat::Json,
            Some(f) if f == "json" => OutputFormat::Json,
            Some(f) if f == "csv" => OutputFormat::Csv,
            Some(other) => {
                return Err(AppError::BadRequest(format!(
                    "Unknown format '{}'. Use json or csv.",
                    other
                )))
            }
        };

        if let Some(alias) = self.target_alias.as_deref().map(str::trim) {
            if is_reserved_label(alias) {
                return Err(AppError::BadRequest(format!(
                    "target_alias '{}' collides with an existing forecast column",
                    alias
                )));
            }
        }

        Ok((
            ForecastRequest {
                horizon,
                model: ModelChoice::parse(self.model.as_deref()),
                target_alias: self.target_alias.clone(),
            },
            format,
        ))
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// Training summary and forecast for one request.
#[derive(Debug, Serialize, ToSchema)]
pub struct ForecastResponse {
    /// Identifier of this training run
    pub run_id: Uuid,
    /// Where the training data came from ("upload", "sample", "open-meteo",
    /// "weatherapi", "openweather", "weatherbit")
    pub source: String,
    /// Lowest-RMSE model, null when no model could be scored
    pub best_model: Option<String>,
    /// Model that produced the forecast
    pub chosen_model: String,
    /// Whether the model or the seasonal heuristic produced the target column
    pub prediction_path: PredictionPath,
    /// One row per roster model
    pub model_comparison: Vec<ModelReportRow>,
    /// Correlation of each weather parameter with precipitation
    pub parameter_importance: Vec<ParameterImportance>,
    /// Feature importances of the best model (or the random forest)
    pub feature_importance: Vec<FeatureImportance>,
    /// What the schema normalizer repaired
    pub normalization: NormalizationReport,
    pub warnings: Vec<String>,
    /// Forecast rows; the target column is named after `target_alias`
    #[schema(value_type = Vec<Object>)]
    pub forecast: Vec<serde_json::Value>,
}

/// Serialize forecast rows with the target column relabelled. A label that
/// repeats an existing key leaves that key untouched.
fn forecast_rows(rows: &[Observation], target_label: &str) -> Vec<serde_json::Value> {
    rows.iter()
        .map(|row| {
            let mut value = serde_json::json!({
                "date": row.date.format("%Y-%m-%d").to_string(),
                "temperature": row.temperature,
                "humidity": row.humidity,
                "pressure": row.pressure,
                "wind_speed": row.wind_speed,
            });
            if let Some(obj) = value.as_object_mut() {
                obj.entry(target_label)
                    .or_insert_with(|| row.precipitation.into());
            }
            value
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Pipeline execution
// ---------------------------------------------------------------------------

/// Train on `raw` and forecast, off the async runtime.
async fn run_pipeline(
    raw: RawTable,
    request: ForecastRequest,
    seed: Option<u64>,
) -> Result<(TrainingRun, ForecastResult), AppError> {
    let (run, result) = tokio::task::spawn_blocking(move || {
        let mut rng = pipeline_rng(seed);
        let run = train(&raw, &mut rng)?;
        let result = run.forecast(&request, &mut rng);
        Ok::<_, PipelineError>((run, result))
    })
    .await??;
    Ok((run, result))
}

fn respond(
    source: &str,
    run: TrainingRun,
    result: ForecastResult,
    format: OutputFormat,
    extra_warnings: Vec<String>,
) -> Result<Response, AppError> {
    if format == OutputFormat::Csv {
        let csv = observations_to_csv(&result.outcome.rows, &result.target_label)
            .map_err(|e| AppError::InternalError(format!("CSV serialization failed: {}", e)))?;
        return Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"rainfall_forecast.csv\"",
                ),
            ],
            csv,
        )
            .into_response());
    }

    let model_comparison = run.report();
    let mut warnings = extra_warnings;
    warnings.extend(run.warnings);
    warnings.extend(result.warnings);

    Ok(Json(ForecastResponse {
        run_id: result.run_id,
        source: source.to_string(),
        best_model: run.best.map(|k| k.display_name().to_string()),
        chosen_model: result.chosen.display_name().to_string(),
        prediction_path: result.outcome.path,
        model_comparison,
        parameter_importance: run.parameter_importance,
        feature_importance: run.feature_importance,
        normalization: run.normalization,
        warnings,
        forecast: forecast_rows(&result.outcome.rows, &result.target_label),
    })
    .into_response())
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Train on an uploaded file and forecast.
///
/// The request body is the raw file. Columns are matched loosely: any
/// date-like column becomes the index, a precipitation-like (or the first
/// numeric) column becomes the target, and missing weather columns are
/// synthesized and reported.
#[utoipa::path(
    post,
    path = "/api/v1/forecasts/upload",
    tag = "Forecasts",
    params(UploadParams, ForecastParams),
    request_body(content = Vec<u8>, description = "CSV, TXT, TSV or JSON file contents", content_type = "application/octet-stream"),
    responses(
        (status = 200, description = "Model comparison and forecast (JSON, or text/csv with format=csv)", body = ForecastResponse),
        (status = 400, description = "Unreadable file or invalid parameters", body = ErrorResponse),
        (status = 422, description = "File has no usable data", body = ErrorResponse),
    )
)]
pub async fn upload_forecast(
    State(state): State<AppState>,
    Query(upload): Query<UploadParams>,
    Query(params): Query<ForecastParams>,
    body: Bytes,
) -> Result<Response, AppError> {
    let (request, format) = params.parse()?;
    tracing::info!(
        "Forecast upload: {} bytes, filename={:?}, horizon={}",
        body.len(),
        upload.filename,
        request.horizon
    );
    let raw = RawTable::from_bytes(&body, upload.filename.as_deref())?;
    let (run, result) = run_pipeline(raw, request, state.config.pipeline_seed).await?;
    respond("upload", run, result, format, Vec::new())
}

/// Train on the bundled sample dataset and forecast.
#[utoipa::path(
    post,
    path = "/api/v1/forecasts/sample",
    tag = "Forecasts",
    params(ForecastParams),
    responses(
        (status = 200, description = "Model comparison and forecast", body = ForecastResponse),
        (status = 400, description = "Invalid parameters", body = ErrorResponse),
    )
)]
pub async fn sample_forecast(
    State(state): State<AppState>,
    Query(params): Query<ForecastParams>,
) -> Result<Response, AppError> {
    let (request, format) = params.parse()?;
    let raw = load_sample(&state.config).await?;
    let (run, result) = run_pipeline(raw, request, state.config.pipeline_seed).await?;
    respond("sample", run, result, format, Vec::new())
}

/// Fetch daily weather from Open-Meteo, train on it and forecast.
#[utoipa::path(
    post,
    path = "/api/v1/forecasts/open-meteo",
    tag = "Forecasts",
    params(ProviderParams, ForecastParams),
    responses(
        (status = 200, description = "Model comparison and forecast", body = ForecastResponse),
        (status = 400, description = "Invalid parameters or date range", body = ErrorResponse),
        (status = 502, description = "Open-Meteo unreachable or location unknown", body = ErrorResponse),
    )
)]
pub async fn open_meteo_forecast(
    State(state): State<AppState>,
    Query(provider): Query<ProviderParams>,
    Query(params): Query<ForecastParams>,
) -> Result<Response, AppError> {
    let (request, format) = params.parse()?;
    let records = state
        .open_meteo
        .fetch(&provider.location, provider.start_date, provider.end_date)
        .await?;
    let raw = RawTable::from_observations(&records);
    let (run, result) = run_pipeline(raw, request, state.config.pipeline_seed).await?;
    respond("open-meteo", run, result, format, Vec::new())
}

/// Fetch daily history from WeatherAPI, train on it and forecast.
///
/// Days the API could not deliver are filled with placeholder values and
/// listed in `warnings`. Requires `WEATHERAPI_KEY`.
#[utoipa::path(
    post,
    path = "/api/v1/forecasts/weatherapi",
    tag = "Forecasts",
    params(ProviderParams, ForecastParams),
    responses(
        (status = 200, description = "Model comparison and forecast", body = ForecastResponse),
        (status = 400, description = "Invalid parameters, date range, or no API key configured", body = ErrorResponse),
        (status = 502, description = "WeatherAPI returned no data", body = ErrorResponse),
    )
)]
pub async fn weatherapi_forecast(
    State(state): State<AppState>,
    Query(provider): Query<ProviderParams>,
    Query(params): Query<ForecastParams>,
) -> Result<Response, AppError> {
    let (request, format) = params.parse()?;
    let client = state.weatherapi.as_ref().ok_or_else(|| {
        AppError::BadRequest("WeatherAPI is not configured; set WEATHERAPI_KEY".to_string())
    })?;
    let history = client
        .fetch(&provider.location, provider.start_date, provider.end_date)
        .await?;

    let extra_warnings = placeholder_warnings("WeatherAPI", &history);
    let raw = RawTable::from_observations(&history.records);
    let (run, result) = run_pipeline(raw, request, state.config.pipeline_seed).await?;
    respond("weatherapi", run, result, format, extra_warnings)
}

/// Fetch daily history from OpenWeather's One Call timemachine, train on it
/// and forecast.
///
/// Days the API could not deliver are filled with placeholder values and
/// listed in `warnings`. Requires `OPENWEATHER_KEY`.
#[utoipa::path(
    post,
    path = "/api/v1/forecasts/openweather",
    tag = "Forecasts",
    params(ProviderParams, ForecastParams),
    responses(
        (status = 200, description = "Model comparison and forecast", body = ForecastResponse),
        (status = 400, description = "Invalid parameters, date range, or no API key configured", body = ErrorResponse),
        (status = 502, description = "OpenWeather unreachable, location unknown or no data", body = ErrorResponse),
    )
)]
pub async fn openweather_forecast(
    State(state): State<AppState>,
    Query(provider): Query<ProviderParams>,
    Query(params): Query<ForecastParams>,
) -> Result<Response, AppError> {
    let (request, format) = params.parse()?;
    let client = state.openweather.as_ref().ok_or_else(|| {
        AppError::BadRequest("OpenWeather is not configured; set OPENWEATHER_KEY".to_string())
    })?;
    let history = client
        .fetch(&provider.location, provider.start_date, provider.end_date)
        .await?;

    let extra_warnings = placeholder_warnings("OpenWeather", &history);
    let raw = RawTable::from_observations(&history.records);
    let (run, result) = run_pipeline(raw, request, state.config.pipeline_seed).await?;
    respond("openweather", run, result, format, extra_warnings)
}

/// Fetch daily history from WeatherBit, train on it and forecast.
///
/// Requires `WEATHERBIT_KEY`.
#[utoipa::path(
    post,
    path = "/api/v1/forecasts/weatherbit",
    tag = "Forecasts",
    params(ProviderParams, ForecastParams),
    responses(
        (status = 200, description = "Model comparison and forecast", body = ForecastResponse),
        (status = 400, description = "Invalid parameters, date range, or no API key configured", body = ErrorResponse),
        (status = 502, description = "WeatherBit unreachable or returned no data", body = ErrorResponse),
    )
)]
pub async fn weatherbit_forecast(
    State(state): State<AppState>,
    Query(provider): Query<ProviderParams>,
    Query(params): Query<ForecastParams>,
) -> Result<Response, AppError> {
    let (request, format) = params.parse()?;
    let client = state.weatherbit.as_ref().ok_or_else(|| {
        AppError::BadRequest("WeatherBit is not configured; set WEATHERBIT_KEY".to_string())
    })?;
    let records = client
        .fetch(&provider.location, provider.start_date, provider.end_date)
        .await?;
    let raw = RawTable::from_observations(&records);
    let (run, result) = run_pipeline(raw, request, state.config.pipeline_seed).await?;
    respond("weatherbit", run, result, format, Vec::new())
}

fn placeholder_warnings(provider: &str, history: &DailyHistory) -> Vec<String> {
    history
        .error_summary()
        .map(|summary| {
            format!(
                "{} failed for {} day(s), placeholder values used: {}",
                provider,
                history.errors.len(),
                summary
            )
        })
        .into_iter()
        .collect()
}

/// Read (or generate) the sample dataset off the async runtime.
pub(crate) async fn load_sample(config: &AppConfig) -> Result<RawTable, AppError> {
    let path = PathBuf::from(&config.sample_data_path);
    let years = config.sample_years;
    let raw = tokio::task::spawn_blocking(move || load_or_generate(&path, years)).await??;
    Ok(raw)
}
