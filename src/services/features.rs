//! Calendar features and correlation-based parameter importance.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use utoipa::ToSchema;

use crate::helpers::round_2dp;
use crate::services::frame::Frame;

/// Weather parameters ranked by [`parameter_importance`].
pub const WEATHER_PARAMETERS: [&str; 4] = ["temperature", "humidity", "pressure", "wind_speed"];

/// Season code for a calendar month: 0 Winter (Dec-Feb), 1 Summer (Mar-May),
/// 2 Monsoon (Jun-Sep), 3 Post-Monsoon (Oct-Nov).
pub fn season_code(month: u32) -> u8 {
    match month {
        12 | 1 | 2 => 0,
        3..=5 => 1,
        6..=9 => 2,
        _ => 3,
    }
}

/// `day_of_year`, `month` and `season_code` for one date.
pub fn calendar_values(date: NaiveDate) -> [f64; 3] {
    [
        date.ordinal() as f64,
        date.month() as f64,
        season_code(date.month()) as f64,
    ]
}

/// Append calendar features derived from the frame's date index.
///
/// Without an index every row gets the placeholders `(1, 1, 0)` and a
/// warning is returned.
pub fn add_calendar_features(frame: &mut Frame) -> Option<String> {
    let (values, warning): (Vec<[f64; 3]>, Option<String>) = match frame.index() {
        Some(dates) => (dates.iter().map(|d| calendar_values(*d)).collect(), None),
        None => {
            tracing::warn!("Frame has no date index, using placeholder calendar features");
            (
                vec![[1.0, 1.0, 0.0]; frame.len()],
                Some("No date index available; calendar features default to day 1, January, Winter".to_string()),
            )
        }
    };

    for (slot, name) in ["day_of_year", "month", "season_code"].iter().enumerate() {
        frame.insert(name, values.iter().map(|v| Some(v[slot])).collect());
    }
    warning
}

/// Share of the total absolute correlation with precipitation.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ParameterImportance {
    pub parameter: String,
    /// Percentage, rounded to 2 decimals
    pub importance: f64,
}

/// Rank `parameters` by |Pearson r| against `precipitation`, normalized to
/// percentages. Absent or constant columns score 0; if nothing correlates,
/// every entry is 0.
pub fn parameter_importance(frame: &Frame, parameters: &[&str]) -> Vec<ParameterImportance> {
    let target = frame.column_f64("precipitation");
    let raw: Vec<f64> = parameters
        .iter()
        .map(|p| {
            if !frame.has_column(p) {
                return 0.0;
            }
            pearson(&frame.column_f64(p), &target)
                .map(f64::abs)
                .unwrap_or(0.0)
        })
        .collect();

    let total: f64 = raw.iter().sum();
    let mut ranked: Vec<ParameterImportance> = parameters
        .iter()
        .zip(&raw)
        .map(|(p, r)| ParameterImportance {
            parameter: p.to_string(),
            importance: if total > 0.0 {
                round_2dp(r / total * 100.0)
            } else {
                0.0
            },
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked
}

/// Pearson correlation over the rows where both values are finite.
fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(x, y)| (*x, *y))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    let denom = (sxx * syy).sqrt();
    (denom > f64::EPSILON).then(|| sxy / denom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_season_code_table() {
        let expected = [0, 0, 1, 1, 1, 2, 2, 2, 2, 3, 3, 0];
        for (month, code) in (1..=12).zip(expected) {
            assert_eq!(season_code(month), code, "month {}", month);
        }
    }

    #[test]
    fn test_calendar_features_from_index() {
        let mut frame = Frame::with_index(vec![date(2024, 12, 31), date(2024, 7, 1)]);
        assert!(add_calendar_features(&mut frame).is_none());
        assert_eq!(frame.column("day_of_year").unwrap()[0], Some(366.0));
        assert_eq!(frame.column("month").unwrap()[1], Some(7.0));
        assert_eq!(frame.column("season_code").unwrap()[0], Some(0.0));
        assert_eq!(frame.column("season_code").unwrap()[1], Some(2.0));
    }

    #[test]
    fn test_calendar_features_without_index() {
        let mut frame = Frame::with_len(2);
        assert!(add_calendar_features(&mut frame).is_some());
        assert_eq!(frame.column("day_of_year"), Some(vec![Some(1.0), Some(1.0)]));
        assert_eq!(frame.column("season_code"), Some(vec![Some(0.0), Some(0.0)]));
    }

    #[test]
    fn test_parameter_importance_sums_to_100() {
        let mut frame = Frame::with_len(4);
        frame.insert("precipitation", vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        frame.insert("temperature", vec![Some(2.0), Some(4.0), Some(6.0), Some(8.0)]);
        frame.insert("humidity", vec![Some(4.0), Some(3.0), Some(2.0), Some(1.0)]);
        frame.insert("pressure", vec![Some(1.0), Some(1.0), Some(1.0), Some(1.0)]);
        let ranked = parameter_importance(&frame, &WEATHER_PARAMETERS);
        assert_eq!(ranked.len(), 4);
        let total: f64 = ranked.iter().map(|r| r.importance).sum();
        assert!((total - 100.0).abs() < 0.05);
        assert_eq!(ranked[0].importance, 50.0);
        assert_eq!(ranked[3].importance, 0.0);
    }

    #[test]
    fn test_parameter_importance_all_zero_without_signal() {
        let mut frame = Frame::with_len(3);
        frame.insert("precipitation", vec![Some(0.0), Some(0.0), Some(0.0)]);
        frame.insert("temperature", vec![Some(1.0), Some(2.0), Some(3.0)]);
        let ranked = parameter_importance(&frame, &WEATHER_PARAMETERS);
        assert!(ranked.iter().all(|r| r.importance == 0.0));
    }
}
