use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::{AppError, ErrorResponse};
use crate::routes::forecasts::{load_sample, AppState};
use crate::services::pipeline::pipeline_rng;
use crate::services::schema::normalize;
use crate::services::table::Observation;

/// Response type for GET /api/v1/data/sample.
#[derive(Debug, Serialize, ToSchema)]
pub struct SampleDataResponse {
    /// Number of daily observations
    pub rows: usize,
    /// First and last observation date (ISO 8601), null when empty
    pub first_date: Option<String>,
    pub last_date: Option<String>,
    /// Normalized daily observations in date order
    pub observations: Vec<Observation>,
}

/// Get the bundled sample dataset.
///
/// Generates and caches a synthetic dataset on first use when the sample
/// file is missing. Rows pass through the same normalization as uploads.
#[utoipa::path(
    get,
    path = "/api/v1/data/sample",
    tag = "Data",
    responses(
        (status = 200, description = "Sample observations", body = SampleDataResponse),
        (status = 422, description = "Sample file has no usable data", body = ErrorResponse),
    )
)]
pub async fn get_sample_data(
    State(state): State<AppState>,
) -> Result<Json<SampleDataResponse>, AppError> {
    let raw = load_sample(&state.config).await?;
    let seed = state.config.pipeline_seed;
    let normalized = tokio::task::spawn_blocking(move || normalize(&raw, &mut pipeline_rng(seed)))
        .await??;

    let observations = normalized.frame.to_observations().ok_or_else(|| {
        AppError::InternalError("Normalized sample has no date index".to_string())
    })?;

    Ok(Json(SampleDataResponse {
        rows: observations.len(),
        first_date: observations.first().map(|o| o.date.to_string()),
        last_date: observations.last().map(|o| o.date.to_string()),
        observations,
    }))
}
