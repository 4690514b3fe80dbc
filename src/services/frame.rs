//! Date-indexed numeric frame over a polars `DataFrame`.
//!
//! The normalizer, feature builder and preprocessing stages all operate on a
//! `Frame`. Every column is a nullable `Float64` series; null marks an
//! undefined cell. The date index is kept beside the data so forecast
//! skeletons and synthesized indexes share one representation.

use chrono::NaiveDate;
use ndarray::Array2;
use polars::prelude::*;

use crate::services::table::Observation;

#[derive(Debug, Clone)]
pub struct Frame {
    index: Option<Vec<NaiveDate>>,
    data: DataFrame,
    len: usize,
}

impl Frame {
    /// An empty frame indexed by `dates`.
    pub fn with_index(dates: Vec<NaiveDate>) -> Self {
        Self {
            len: dates.len(),
            index: Some(dates),
            data: DataFrame::empty(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn index(&self) -> Option<&[NaiveDate]> {
        self.index.as_deref()
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.index.as_ref().and_then(|dates| dates.iter().max().copied())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.data
            .get_column_names()
            .into_iter()
            .map(|name| name.as_str())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.data.get_column_index(name).is_some()
    }

    fn series(&self, name: &str) -> Option<Series> {
        let column = self.data.column(name).ok()?;
        column
            .as_materialized_series()
            .cast(&DataType::Float64)
            .ok()
    }

    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let series = self.series(name)?;
        let values = series.f64().ok()?;
        Some(values.into_iter().collect())
    }

    /// Column values with undefined cells as NaN. Missing columns are all-NaN.
    pub fn column_f64(&self, name: &str) -> Vec<f64> {
        match self.column(name) {
            Some(values) => values.iter().map(|v| v.unwrap_or(f64::NAN)).collect(),
            None => vec![f64::NAN; self.len],
        }
    }

    /// Mean of the defined cells of `name`, `None` if absent or all undefined.
    pub fn mean(&self, name: &str) -> Option<f64> {
        self.series(name)?.mean().filter(|m| m.is_finite())
    }

    /// Insert or replace a column. `values` is resized to the frame length
    /// and non-finite cells become null.
    pub fn insert(&mut self, name: &str, mut values: Vec<Option<f64>>) {
        if values.len() != self.len {
            tracing::warn!(
                "Column '{}' has {} values for a {}-row frame, resizing",
                name,
                values.len(),
                self.len
            );
            values.resize(self.len, None);
        }
        let values: Vec<Option<f64>> = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        if let Err(e) = self.data.with_column(Series::new(name.into(), values)) {
            tracing::warn!("Could not store column '{}': {}", name, e);
        }
    }

    /// Rename `from` to `to`. If `to` already exists the renamed column is
    /// dropped, keeping the first occurrence. Returns whether a column moved.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        if from == to {
            return self.has_column(from);
        }
        if !self.has_column(from) {
            return false;
        }
        if self.has_column(to) {
            tracing::warn!(
                "Renaming '{}' to '{}' collides with an existing column, keeping the first",
                from,
                to
            );
            self.remove(from);
            return false;
        }
        match self.data.rename(from, to.into()) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Could not rename '{}' to '{}': {}", from, to, e);
                false
            }
        }
    }

    /// Drop `name`; false if it was absent.
    pub fn remove(&mut self, name: &str) -> bool {
        self.data.drop_in_place(name).is_ok()
    }

    /// Keep only the columns named in `keep`, in that order.
    pub fn retain_columns(&mut self, keep: &[&str]) {
        let present: Vec<&str> = keep
            .iter()
            .copied()
            .filter(|name| self.has_column(name))
            .collect();
        match self.data.select(present) {
            Ok(selected) => self.data = selected,
            Err(e) => tracing::warn!("Could not select canonical columns: {}", e),
        }
    }

    /// Row-major matrix of `names`, undefined cells as NaN.
    pub fn matrix(&self, names: &[&str]) -> Array2<f64> {
        let columns: Vec<Vec<f64>> = names.iter().map(|name| self.column_f64(name)).collect();
        Array2::from_shape_fn((self.len, names.len()), |(r, c)| columns[c][r])
    }

    /// Canonical records, if the frame has a date index. Undefined cells
    /// become NaN; callers sanitize before this point.
    pub fn to_observations(&self) -> Option<Vec<Observation>> {
        let dates = self.index.as_ref()?;
        let temperature = self.column_f64("temperature");
        let humidity = self.column_f64("humidity");
        let pressure = self.column_f64("pressure");
        let wind_speed = self.column_f64("wind_speed");
        let precipitation = self.column_f64("precipitation");
        Some(
            dates
                .iter()
                .enumerate()
                .map(|(i, date)| Observation {
                    date: *date,
                    temperature: temperature[i],
                    humidity: humidity[i],
                    pressure: pressure[i],
                    wind_speed: wind_speed[i],
                    precipitation: precipitation[i],
                })
                .collect(),
        )
    }
}

/// Coerce loosely typed source text to numbers with a non-strict cast:
/// anything polars cannot read as a float becomes `None`.
pub fn coerce_numeric(texts: Vec<Option<String>>) -> Vec<Option<f64>> {
    let len = texts.len();
    let parsed = Series::new("raw".into(), texts).cast(&DataType::Float64);
    match parsed.as_ref().map(|s| s.f64()) {
        Ok(Ok(values)) => values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect(),
        _ => {
            tracing::warn!("Numeric coercion failed, treating {} cells as undefined", len);
            vec![None; len]
        }
    }
}

#[cfg(test)]
impl Frame {
    /// An empty frame of `len` rows without a date index.
    pub fn with_len(len: usize) -> Self {
        Self {
            index: None,
            data: DataFrame::empty(),
            len,
        }
    }

    /// Dated frame holding the five canonical numeric columns.
    pub fn from_observations(records: &[Observation]) -> Self {
        let mut frame = Self::with_index(records.iter().map(|r| r.date).collect());
        frame.insert("temperature", records.iter().map(|r| Some(r.temperature)).collect());
        frame.insert("humidity", records.iter().map(|r| Some(r.humidity)).collect());
        frame.insert("pressure", records.iter().map(|r| Some(r.pressure)).collect());
        frame.insert("wind_speed", records.iter().map(|r| Some(r.wind_speed)).collect());
        frame.insert(
            "precipitation",
            records.iter().map(|r| Some(r.precipitation)).collect(),
        );
        frame
    }

    pub fn undefined_count(&self) -> usize {
        self.data.get_columns().iter().map(|c| c.null_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_insert_replaces_existing() {
        let mut frame = Frame::with_len(2);
        frame.insert("a", vec![Some(1.0), Some(2.0)]);
        frame.insert("a", vec![Some(3.0), None]);
        assert_eq!(frame.column("a"), Some(vec![Some(3.0), None]));
        assert_eq!(frame.column_names().len(), 1);
    }

    #[test]
    fn test_insert_resizes() {
        let mut frame = Frame::with_len(3);
        frame.insert("a", vec![Some(1.0)]);
        assert_eq!(frame.column("a").unwrap().len(), 3);
    }

    #[test]
    fn test_insert_nulls_non_finite() {
        let mut frame = Frame::with_len(2);
        frame.insert("a", vec![Some(f64::NAN), Some(f64::INFINITY)]);
        assert_eq!(frame.column("a"), Some(vec![None, None]));
        assert_eq!(frame.undefined_count(), 2);
    }

    #[test]
    fn test_rename_collision_keeps_first() {
        let mut frame = Frame::with_len(1);
        frame.insert("precipitation", vec![Some(1.0)]);
        frame.insert("rain", vec![Some(9.0)]);
        assert!(!frame.rename("rain", "precipitation"));
        assert_eq!(frame.column("precipitation"), Some(vec![Some(1.0)]));
        assert!(!frame.has_column("rain"));
    }

    #[test]
    fn test_rename_and_remove() {
        let mut frame = Frame::with_len(1);
        frame.insert("temp", vec![Some(20.0)]);
        assert!(frame.rename("temp", "temperature"));
        assert_eq!(frame.column_names(), vec!["temperature"]);
        assert!(frame.remove("temperature"));
        assert!(!frame.remove("temperature"));
    }

    #[test]
    fn test_mean_ignores_undefined() {
        let mut frame = Frame::with_len(3);
        frame.insert("a", vec![Some(1.0), None, Some(3.0)]);
        assert_eq!(frame.mean("a"), Some(2.0));
        assert_eq!(frame.mean("missing"), None);
        frame.insert("b", vec![None; 3]);
        assert_eq!(frame.mean("b"), None);
    }

    #[test]
    fn test_matrix_row_major() {
        let mut frame = Frame::with_len(2);
        frame.insert("a", vec![Some(1.0), Some(2.0)]);
        frame.insert("b", vec![Some(3.0), None]);
        let m = frame.matrix(&["b", "a"]);
        assert_eq!(m.dim(), (2, 2));
        assert_eq!(m[[0, 0]], 3.0);
        assert_eq!(m[[0, 1]], 1.0);
        assert!(m[[1, 0]].is_nan());
    }

    #[test]
    fn test_retain_columns_orders() {
        let mut frame = Frame::with_len(1);
        frame.insert("x", vec![Some(0.0)]);
        frame.insert("b", vec![Some(1.0)]);
        frame.insert("a", vec![Some(2.0)]);
        frame.retain_columns(&["a", "b", "missing"]);
        assert_eq!(frame.column_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_coerce_numeric_is_non_strict() {
        let texts = vec![
            Some("1.5".to_string()),
            Some("abc".to_string()),
            None,
            Some("-2".to_string()),
            Some("1e30".to_string()),
        ];
        assert_eq!(
            coerce_numeric(texts),
            vec![Some(1.5), None, None, Some(-2.0), Some(1e30)]
        );
    }

    #[test]
    fn test_observation_roundtrip() {
        let records = vec![Observation {
            date: date(2024, 3, 1),
            temperature: 20.0,
            humidity: 60.0,
            pressure: 1010.0,
            wind_speed: 3.0,
            precipitation: 0.5,
        }];
        let frame = Frame::from_observations(&records);
        assert_eq!(frame.last_date(), Some(date(2024, 3, 1)));
        assert_eq!(frame.undefined_count(), 0);
        assert_eq!(frame.to_observations().unwrap(), records);
    }

    #[test]
    fn test_to_observations_requires_index() {
        assert!(Frame::with_len(2).to_observations().is_none());
    }
}
