//! Model scoring and ranking.
//!
//! Regressors are scored on the shuffled held-out split. The time-series
//! model is scored by forecasting the chronological holdout from the
//! chronological training prefix. Models that failed to train, or whose
//! predictions fail, stay in the table with undefined metrics and are never
//! picked as best.

use ndarray::{aview1, s, ArrayView1};
use serde::Serialize;
use utoipa::ToSchema;

use crate::helpers::round_2dp;
use crate::services::models::{ModelKind, TrainedEntry, TrainedModel};
use crate::services::preprocess::{Feature, PreparedData};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Metrics {
    pub mae: f64,
    pub rmse: f64,
    pub r2: f64,
}

/// MAE, RMSE and R². R² is 0 when the actual values have no variance.
/// `None` for empty, mismatched or non-finite inputs.
pub fn metrics(actual: ArrayView1<f64>, predicted: ArrayView1<f64>) -> Option<Metrics> {
    if actual.is_empty() || actual.len() != predicted.len() {
        return None;
    }
    if actual.iter().chain(predicted.iter()).any(|v| !v.is_finite()) {
        return None;
    }
    let n = actual.len() as f64;
    let errors = &actual - &predicted;
    let mae = errors.mapv(f64::abs).sum() / n;
    let ss_res = errors.mapv(|e| e * e).sum();
    let rmse = (ss_res / n).sqrt();
    let mean = actual.sum() / n;
    let ss_tot = actual.mapv(|a| (a - mean).powi(2)).sum();
    let r2 = if ss_tot.abs() < 1e-10 {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    };
    Some(Metrics { mae, rmse, r2 })
}

#[derive(Debug, Clone)]
pub struct ModelScore {
    pub kind: ModelKind,
    pub metrics: Option<Metrics>,
    /// Why metrics are missing, or which fallback stood in
    pub note: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    /// One score per roster slot, in roster order
    pub scores: Vec<ModelScore>,
    pub best: Option<ModelKind>,
}

/// Score every entry against the held-out data and pick the lowest RMSE.
pub fn evaluate(entries: &[TrainedEntry], data: &PreparedData) -> Evaluation {
    let scores: Vec<ModelScore> = entries
        .iter()
        .map(|entry| {
            let outcome = match &entry.model {
                Err(e) => Err(format!("training failed: {}", e)),
                Ok(TrainedModel::FeatureBased(model)) => model
                    .predict(&data.x_test)
                    .map_err(|e| format!("prediction failed: {}", e))
                    .map(|p| metrics(data.y_test.view(), p.view())),
                Ok(TrainedModel::TimeSeries(model)) => {
                    let holdout = data.series.slice(s![data.series_split..]);
                    model
                        .forecast(holdout.len())
                        .map_err(|e| format!("forecast failed: {}", e))
                        .map(|p| metrics(holdout, aview1(&p)))
                }
            };
            match outcome {
                Ok(m) => ModelScore {
                    kind: entry.kind,
                    metrics: m,
                    note: entry.note.clone(),
                },
                Err(reason) => {
                    tracing::warn!("{} could not be evaluated: {}", entry.kind, reason);
                    ModelScore {
                        kind: entry.kind,
                        metrics: None,
                        note: Some(reason),
                    }
                }
            }
        })
        .collect();

    let best = best_by_rmse(&scores);
    match best {
        Some(kind) => tracing::info!("Best model: {}", kind),
        None => tracing::warn!("No model produced usable metrics"),
    }
    Evaluation { scores, best }
}

/// Lowest RMSE wins; earlier roster slots win ties.
fn best_by_rmse(scores: &[ModelScore]) -> Option<ModelKind> {
    let mut best: Option<(ModelKind, f64)> = None;
    for score in scores {
        let Some(rmse) = score.metrics.map(|m| m.rmse) else {
            continue;
        };
        if best.map_or(true, |(_, current)| rmse < current) {
            best = Some((score.kind, rmse));
        }
    }
    best.map(|(kind, _)| kind)
}

/// One display row of the model comparison table.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ModelReportRow {
    #[serde(rename = "Model")]
    pub model: String,
    /// e.g. "1.23 mm" or "N/A"
    #[serde(rename = "MAE")]
    pub mae: String,
    #[serde(rename = "RMSE")]
    pub rmse: String,
    #[serde(rename = "R2")]
    pub r2: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Best")]
    pub best: bool,
    #[serde(rename = "Note", skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub fn report(evaluation: &Evaluation) -> Vec<ModelReportRow> {
    let with_unit = |v: Option<f64>| match v {
        Some(v) => format!("{:.2} mm", v),
        None => "N/A".to_string(),
    };
    evaluation
        .scores
        .iter()
        .map(|s| ModelReportRow {
            model: s.kind.display_name().to_string(),
            mae: with_unit(s.metrics.map(|m| m.mae)),
            rmse: with_unit(s.metrics.map(|m| m.rmse)),
            r2: s
                .metrics
                .map(|m| format!("{:.2}", m.r2))
                .unwrap_or_else(|| "N/A".to_string()),
            description: s.kind.description().to_string(),
            best: evaluation.best == Some(s.kind),
            note: s.note.clone(),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FeatureImportance {
    pub feature: Feature,
    /// Percentage, rounded to 2 decimals
    pub importance: f64,
}

/// Importances of the best model, or of the random forest when the best
/// model has none. Sorted descending; empty when neither is available.
pub fn feature_importance(
    entries: &[TrainedEntry],
    best: Option<ModelKind>,
    feature_cols: &[Feature],
) -> Vec<FeatureImportance> {
    let importances_of = |kind: ModelKind| {
        entries
            .iter()
            .find(|e| e.kind == kind)
            .and_then(|e| e.model.as_ref().ok())
            .and_then(TrainedModel::feature_importances)
    };
    let Some(weights) = best
        .and_then(importances_of)
        .or_else(|| importances_of(ModelKind::RandomForest))
    else {
        return Vec::new();
    };

    let mut ranked: Vec<FeatureImportance> = feature_cols
        .iter()
        .zip(weights)
        .map(|(feature, w)| FeatureImportance {
            feature: *feature,
            importance: round_2dp(w * 100.0),
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}
