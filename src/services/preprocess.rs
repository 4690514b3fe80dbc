//! Imputation, train/test split and feature scaling.
//!
//! Produces the matrices the model bank trains on and the
//! [`PreprocessingArtifacts`] the forecast generator needs to transform
//! future feature rows exactly the way the training rows were transformed.

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::helpers::{mean, sample_normal, std_dev};
use crate::services::features::calendar_values;
use crate::services::frame::Frame;

/// Seed of the shuffled train/test split.
pub const SPLIT_SEED: u64 = 42;

/// Fewest rows that still allow a held-out split.
pub const MIN_SPLIT_ROWS: usize = 2;

/// Model input columns, in matrix order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Temperature,
    Humidity,
    Pressure,
    WindSpeed,
    DayOfYear,
    Month,
    SeasonCode,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Temperature,
        Feature::Humidity,
        Feature::Pressure,
        Feature::WindSpeed,
        Feature::DayOfYear,
        Feature::Month,
        Feature::SeasonCode,
    ];

    /// Used when no artifacts say otherwise.
    pub const DEFAULT: [Feature; 6] = [
        Feature::Temperature,
        Feature::Humidity,
        Feature::Pressure,
        Feature::WindSpeed,
        Feature::DayOfYear,
        Feature::Month,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            Feature::Temperature => "temperature",
            Feature::Humidity => "humidity",
            Feature::Pressure => "pressure",
            Feature::WindSpeed => "wind_speed",
            Feature::DayOfYear => "day_of_year",
            Feature::Month => "month",
            Feature::SeasonCode => "season_code",
        }
    }

    pub fn columns(features: &[Feature]) -> Vec<&'static str> {
        features.iter().map(Feature::column).collect()
    }
}

/// Column-mean imputation, fit on every row.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SimpleImputer {
    pub fill_values: Vec<f64>,
}

impl SimpleImputer {
    /// Fit per-column means; an all-missing column fills with 0.
    pub fn fit(rows: &Array2<f64>) -> Self {
        let fill_values = rows
            .axis_iter(Axis(1))
            .map(|column| mean(&column.to_vec()).unwrap_or(0.0))
            .collect();
        Self { fill_values }
    }

    pub fn transform(&self, rows: &Array2<f64>) -> Array2<f64> {
        let mut out = rows.clone();
        for (mut column, fill) in out.axis_iter_mut(Axis(1)).zip(&self.fill_values) {
            let fill = *fill;
            column.mapv_inplace(|v| if v.is_finite() { v } else { fill });
        }
        out
    }
}

/// Zero-mean, unit-variance scaling fit on the training split.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    /// Population standard deviations; zero is stored as 1.
    pub scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &Array2<f64>) -> Self {
        let mut means = Vec::with_capacity(rows.ncols());
        let mut scales = Vec::with_capacity(rows.ncols());
        for column in rows.axis_iter(Axis(1)) {
            let column = column.to_vec();
            let m = mean(&column).unwrap_or(0.0);
            let s = std_dev(&column, m);
            means.push(m);
            scales.push(if s > f64::EPSILON { s } else { 1.0 });
        }
        Self { means, scales }
    }

    pub fn transform(&self, rows: &Array2<f64>) -> Array2<f64> {
        let mut out = rows.clone();
        for ((mut column, m), s) in out
            .axis_iter_mut(Axis(1))
            .zip(&self.means)
            .zip(&self.scales)
        {
            let (m, s) = (*m, *s);
            column.mapv_inplace(|v| (v - m) / s);
        }
        out
    }
}

/// Everything needed to reproduce training-time transforms at forecast time.
/// Created once per training run and never mutated afterwards.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PreprocessingArtifacts {
    pub run_id: Uuid,
    pub scaler: StandardScaler,
    pub imputer: SimpleImputer,
    pub feature_cols: Vec<Feature>,
    pub trained_on_row_count: usize,
}

impl PreprocessingArtifacts {
    /// Impute then scale raw feature rows laid out as `feature_cols`.
    pub fn transform(&self, rows: &Array2<f64>) -> Array2<f64> {
        self.scaler.transform(&self.imputer.transform(rows))
    }
}

/// Model-ready matrices.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
    /// Target in date order, for the time-series model
    pub series: Array1<f64>,
    /// Length of the chronological training prefix of `series`
    pub series_split: usize,
}

#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub data: PreparedData,
    pub artifacts: PreprocessingArtifacts,
    pub warnings: Vec<String>,
}

/// Held-out share for `n` rows: `min(0.2, max(1/n, 0.1))` above 10 rows,
/// otherwise 0.1.
pub fn test_fraction(n: usize) -> f64 {
    if n > 10 {
        (1.0 / n as f64).max(0.1).min(0.2)
    } else {
        0.1
    }
}

/// Number of held-out rows, at least one and leaving at least one to train
/// on. A single row is never held out.
pub fn test_size(n: usize) -> usize {
    if n < MIN_SPLIT_ROWS {
        return 0;
    }
    let raw = (test_fraction(n) * n as f64 - 1e-9).ceil() as usize;
    raw.clamp(1, n - 1)
}

/// Prepare `frame` (already carrying calendar features) for training.
///
/// The target column is filled in place so later stages see the same values.
/// Fewer than two rows leave the test split empty.
pub fn preprocess<R: Rng + ?Sized>(frame: &mut Frame, rng: &mut R) -> Preprocessed {
    let n = frame.len();
    let mut warnings = Vec::new();
    if n < MIN_SPLIT_ROWS {
        tracing::warn!(rows = n, "Too few rows for a held-out split");
        warnings.push(format!(
            "Only {} row(s) available; models cannot be evaluated and the forecast uses the historical mean",
            n
        ));
    }

    let mut feature_cols: Vec<Feature> = Feature::ALL
        .into_iter()
        .filter(|f| frame.has_column(f.column()))
        .collect();
    if feature_cols.is_empty() {
        tracing::warn!("No usable feature columns, falling back to calendar features");
        warnings.push("No feature columns found; using day of year and month".to_string());
        let calendar: Vec<[f64; 3]> = match frame.index() {
            Some(dates) => dates.iter().map(|d| calendar_values(*d)).collect(),
            None => vec![[1.0, 1.0, 0.0]; n],
        };
        frame.insert("day_of_year", calendar.iter().map(|c| Some(c[0])).collect());
        frame.insert("month", calendar.iter().map(|c| Some(c[1])).collect());
        feature_cols = vec![Feature::DayOfYear, Feature::Month];
    }

    // Target
    let target_mean = frame.mean("precipitation");
    let target: Array1<f64> = match target_mean {
        Some(fill) => frame
            .column_f64("precipitation")
            .into_iter()
            .map(|v| if v.is_finite() { v } else { fill })
            .collect(),
        None => {
            tracing::warn!("Target column missing or empty, generating synthetic target");
            warnings.push(
                "Target column 'precipitation' was missing or empty; synthetic values were generated"
                    .to_string(),
            );
            (0..n).map(|_| sample_normal(rng, 5.0, 2.0)).collect()
        }
    };
    frame.insert("precipitation", target.iter().map(|v| Some(*v)).collect());

    // Features
    let columns = Feature::columns(&feature_cols);
    let raw_rows = frame.matrix(&columns);
    let imputer = SimpleImputer::fit(&raw_rows);
    let rows = imputer.transform(&raw_rows);

    // Shuffled split
    let n_test = test_size(n);
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(SPLIT_SEED));
    let (test_idx, train_idx) = order.split_at(n_test);

    let x_train_raw = rows.select(Axis(0), train_idx);
    let x_test_raw = rows.select(Axis(0), test_idx);
    let scaler = StandardScaler::fit(&x_train_raw);

    tracing::debug!(
        rows = n,
        train = train_idx.len(),
        test = n_test,
        features = ?columns,
        "Preprocessed training data"
    );

    let data = PreparedData {
        x_train: scaler.transform(&x_train_raw),
        y_train: target.select(Axis(0), train_idx),
        x_test: scaler.transform(&x_test_raw),
        y_test: target.select(Axis(0), test_idx),
        series_split: n - n_test,
        series: target,
    };

    let artifacts = PreprocessingArtifacts {
        run_id: Uuid::new_v4(),
        scaler,
        imputer,
        feature_cols,
        trained_on_row_count: train_idx.len(),
    };

    Preprocessed {
        data,
        artifacts,
        warnings,
    }
}
