//! Bundled sample dataset: loaded from disk, or generated and cached there.

use std::f64::consts::PI;
use std::path::Path;

use chrono::{Datelike, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp};

use crate::helpers::sample_normal;
use crate::services::pipeline::PipelineError;
use crate::services::table::{Observation, RawTable};

/// Generated data is reproducible for a given end date.
pub const SAMPLE_SEED: u64 = 42;

/// Load the CSV at `path`, or generate `years` of daily data ending today and
/// try to write it to `path` for next time.
pub fn load_or_generate(path: &Path, years: u32) -> Result<RawTable, PipelineError> {
    if path.exists() {
        let bytes = std::fs::read(path).map_err(|e| {
            PipelineError::Parse(format!("Could not read {}: {}", path.display(), e))
        })?;
        let filename = path.file_name().and_then(|n| n.to_str());
        tracing::info!("Loaded sample data from {}", path.display());
        return RawTable::from_bytes(&bytes, filename);
    }

    tracing::warn!(
        "Sample file {} not found, generating {} years of synthetic data",
        path.display(),
        years
    );
    let records = generate(years, Utc::now().date_naive(), SAMPLE_SEED);
    if let Err(e) = write_csv(path, &records) {
        tracing::warn!("Could not cache sample data at {}: {}", path.display(), e);
    }
    Ok(RawTable::from_observations(&records))
}

/// Daily synthetic weather from `end - 365 * years` to `end` inclusive.
///
/// Temperature, humidity and wind follow yearly sine waves with noise;
/// rain falls with probability 0.3 from April to September and 0.2
/// otherwise, in Exponential(mean 5) amounts.
pub fn generate(years: u32, end: NaiveDate, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = end - Duration::days(365 * years as i64);
    let n_days = (end - start).num_days() + 1;

    let wind_gust = Exp::new(0.5).ok();
    let rain_amount = Exp::new(0.2).ok();

    (0..n_days)
        .map(|t| {
            let date = start + Duration::days(t);
            let phase = 2.0 * PI * t as f64 / 365.0;

            let temperature = 20.0 + 15.0 * phase.sin() + sample_normal(&mut rng, 0.0, 3.0);
            let humidity = (50.0 + 30.0 * (phase + PI / 2.0).sin()
                + sample_normal(&mut rng, 0.0, 10.0))
            .clamp(20.0, 100.0);
            let pressure = 1015.0 + sample_normal(&mut rng, 0.0, 5.0);
            let gust = wind_gust.as_ref().map(|d| d.sample(&mut rng)).unwrap_or(2.0);
            let wind_speed = (5.0 + 5.0 * (phase + PI).sin() + gust).clamp(0.0, 30.0);

            let rain_probability = if (4..=9).contains(&date.month()) { 0.3 } else { 0.2 };
            let precipitation = if rng.gen::<f64>() < rain_probability {
                rain_amount.as_ref().map(|d| d.sample(&mut rng)).unwrap_or(5.0)
            } else {
                0.0
            };

            Observation {
                date,
                temperature: round_1dp(temperature),
                humidity: round_1dp(humidity),
                pressure: round_1dp(pressure),
                wind_speed: round_1dp(wind_speed),
                precipitation: round_1dp(precipitation),
            }
        })
        .collect()
}

fn round_1dp(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn write_csv(path: &Path, records: &[Observation]) -> Result<(), csv::Error> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
    }

    #[test]
    fn test_generate_covers_range() {
        let records = generate(1, end(), SAMPLE_SEED);
        assert_eq!(records.len(), 366);
        assert_eq!(records.last().unwrap().date, end());
        assert!(records.windows(2).all(|w| w[1].date - w[0].date == Duration::days(1)));
    }

    #[test]
    fn test_generate_respects_bounds() {
        for r in generate(2, end(), 7) {
            assert!((20.0..=100.0).contains(&r.humidity));
            assert!((0.0..=30.0).contains(&r.wind_speed));
            assert!(r.precipitation >= 0.0);
        }
    }

    #[test]
    fn test_generate_is_seeded() {
        assert_eq!(generate(1, end(), 42), generate(1, end(), 42));
    }

    #[test]
    fn test_generate_has_dry_and_wet_days() {
        let records = generate(1, end(), SAMPLE_SEED);
        let wet = records.iter().filter(|r| r.precipitation > 0.0).count();
        assert!(wet > 20 && wet < 200, "wet days: {}", wet);
    }

    #[test]
    fn test_load_or_generate_writes_then_reads() {
        let dir = std::env::temp_dir().join(format!("rainfall-sample-{}", uuid::Uuid::new_v4()));
        let path = dir.join("rainfall_data.csv");

        let generated = load_or_generate(&path, 1).unwrap();
        assert!(path.exists());
        let loaded = load_or_generate(&path, 1).unwrap();
        assert_eq!(loaded.headers, generated.headers);
        assert_eq!(loaded.rows.len(), generated.rows.len());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
