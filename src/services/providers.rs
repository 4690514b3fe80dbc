//! Weather data providers.
//!
//! Open-Meteo needs no key: the location is geocoded, then the hourly
//! forecast is fetched and one hour of each day is kept. WeatherAPI and
//! OpenWeather are keyed and serve one history request per day; failed days
//! are replaced by a placeholder record so the series stays contiguous.
//! WeatherBit returns the whole daily range in one keyed request.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use futures::future::join_all;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::helpers::mean;
use crate::services::table::Observation;

/// Longest date range a single fetch may cover.
pub const MAX_RANGE_DAYS: i64 = 366;

/// Errors listed individually in a history error summary.
const SUMMARY_ERRORS: usize = 3;

/// Every date from `start` to `end` inclusive.
pub fn date_range(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>, AppError> {
    if end < start {
        return Err(AppError::BadRequest(format!(
            "end_date {} is before start_date {}",
            end, start
        )));
    }
    let days = (end - start).num_days() + 1;
    if days > MAX_RANGE_DAYS {
        return Err(AppError::BadRequest(format!(
            "Date range spans {} days, at most {} allowed",
            days, MAX_RANGE_DAYS
        )));
    }
    Ok((0..days).map(|d| start + Duration::days(d)).collect())
}

fn build_http_client(user_agent: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client")
}

// --- Open-Meteo ---

/// Client for the Open-Meteo geocoding and forecast APIs.
#[derive(Debug, Clone)]
pub struct OpenMeteoClient {
    client: reqwest::Client,
    base_url: String,
    geocoding_url: String,
    hour: u32,
}

#[derive(Debug, Deserialize)]
struct GeocodingResponse {
    #[serde(default)]
    results: Vec<GeocodingResult>,
}

#[derive(Debug, Deserialize)]
struct GeocodingResult {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    hourly: OpenMeteoHourly,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
    relativehumidity_2m: Vec<Option<f64>>,
    precipitation: Vec<Option<f64>>,
    pressure_msl: Vec<Option<f64>>,
    windspeed_10m: Vec<Option<f64>>,
}

impl OpenMeteoClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: build_http_client(&config.user_agent),
            base_url: config.open_meteo_base_url.trim_end_matches('/').to_string(),
            geocoding_url: config
                .open_meteo_geocoding_url
                .trim_end_matches('/')
                .to_string(),
            hour: config.open_meteo_hour,
        }
    }

    /// Resolve a place name to (latitude, longitude) using the first match.
    pub async fn geocode(&self, location: &str) -> Result<(f64, f64), AppError> {
        let url = format!("{}/search", self.geocoding_url);
        let response = self
            .client
            .get(&url)
            .query(&[("name", location), ("count", "1")])
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("Open-Meteo geocoding failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "Open-Meteo geocoding returned HTTP {}",
                response.status()
            )));
        }

        let body: GeocodingResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Open-Meteo geocoding parse error: {}", e))
        })?;

        body.results
            .first()
            .map(|r| (r.latitude, r.longitude))
            .ok_or_else(|| {
                AppError::ExternalServiceError(format!("Location '{}' not found", location))
            })
    }

    /// Daily observations for `location` between `start` and `end`, taken at
    /// the configured hour of day.
    pub async fn fetch(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Observation>, AppError> {
        date_range(start, end)?;
        let (lat, lon) = self.geocode(location).await?;
        tracing::info!(
            "Fetching Open-Meteo data for {} ({:.4}, {:.4}) from {} to {}",
            location,
            lat,
            lon,
            start,
            end
        );

        let url = format!("{}/forecast", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", format!("{:.4}", lat)),
                ("longitude", format!("{:.4}", lon)),
                ("start_date", start.to_string()),
                ("end_date", end.to_string()),
                (
                    "hourly",
                    "temperature_2m,relativehumidity_2m,precipitation,pressure_msl,windspeed_10m"
                        .to_string(),
                ),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("Open-Meteo request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "Open-Meteo returned HTTP {}",
                response.status()
            )));
        }

        let body: OpenMeteoResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("Open-Meteo JSON parse error: {}", e))
        })?;

        let records = select_hour(&body.hourly, self.hour);
        if records.is_empty() {
            return Err(AppError::ExternalServiceError(format!(
                "Open-Meteo returned no complete readings at {:02}:00",
                self.hour
            )));
        }
        Ok(records)
    }
}

/// Keep the readings at `hour`, one per date. Rows with a missing value or
/// an unparseable timestamp are skipped.
fn select_hour(hourly: &OpenMeteoHourly, hour: u32) -> Vec<Observation> {
    let mut skipped = 0usize;
    let mut records: Vec<Observation> = Vec::new();

    for (i, raw_time) in hourly.time.iter().enumerate() {
        let Ok(time) = NaiveDateTime::parse_from_str(raw_time, "%Y-%m-%dT%H:%M") else {
            skipped += 1;
            continue;
        };
        if time.hour() != hour {
            continue;
        }
        let value = |series: &[Option<f64>]| series.get(i).copied().flatten();
        let reading = (
            value(&hourly.temperature_2m),
            value(&hourly.relativehumidity_2m),
            value(&hourly.pressure_msl),
            value(&hourly.windspeed_10m),
            value(&hourly.precipitation),
        );
        let (Some(temperature), Some(humidity), Some(pressure), Some(wind_speed), Some(precipitation)) =
            reading
        else {
            skipped += 1;
            continue;
        };
        if records.last().is_some_and(|r| r.date == time.date()) {
            continue;
        }
        records.push(Observation {
            date: time.date(),
            temperature,
            humidity,
            pressure,
            wind_speed,
            precipitation,
        });
    }

    if skipped > 0 {
        tracing::warn!("Skipped {} incomplete Open-Meteo readings", skipped);
    }
    records
}

// --- WeatherAPI ---

/// Client for the WeatherAPI.com history endpoint.
#[derive(Debug, Clone)]
pub struct WeatherApiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    hour: u32,
}

/// Result of a per-day range fetch.
#[derive(Debug, Clone)]
pub struct DailyHistory {
    /// One record per requested date, placeholders included
    pub records: Vec<Observation>,
    /// One message per failed date
    pub errors: Vec<String>,
}

impl DailyHistory {
    /// The first few errors joined, with "..." when more were dropped.
    pub fn error_summary(&self) -> Option<String> {
        if self.errors.is_empty() {
            return None;
        }
        let mut summary = self
            .errors
            .iter()
            .take(SUMMARY_ERRORS)
            .cloned()
            .collect::<Vec<_>>()
            .join("; ");
        if self.errors.len() > SUMMARY_ERRORS {
            summary.push_str("...");
        }
        Some(summary)
    }
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    forecast: HistoryForecast,
}

#[derive(Debug, Deserialize)]
struct HistoryForecast {
    forecastday: Vec<HistoryForecastDay>,
}

#[derive(Debug, Deserialize)]
struct HistoryForecastDay {
    day: HistoryDay,
}

#[derive(Debug, Deserialize)]
struct HistoryDay {
    avgtemp_c: Option<f64>,
    avghumidity: Option<f64>,
    maxwind_kph: Option<f64>,
    totalprecip_mm: Option<f64>,
}

/// History responses carry no daily pressure.
const STANDARD_PRESSURE_HPA: f64 = 1013.0;

/// Stand-in for a day the API could not deliver.
fn placeholder(date: NaiveDate) -> Observation {
    Observation {
        date,
        temperature: 25.0,
        humidity: 70.0,
        pressure: STANDARD_PRESSURE_HPA,
        wind_speed: 5.0,
        precipitation: 0.0,
    }
}

/// Pair per-day results with their dates, substituting placeholders for
/// failures. Errors only when every day failed.
fn collect_days(
    provider: &str,
    dates: &[NaiveDate],
    results: Vec<Result<Observation, String>>,
) -> Result<DailyHistory, AppError> {
    let mut records = Vec::with_capacity(dates.len());
    let mut errors = Vec::new();
    for (date, result) in dates.iter().zip(results) {
        match result {
            Ok(record) => records.push(record),
            Err(e) => {
                errors.push(format!("{}: {}", date, e));
                records.push(placeholder(*date));
            }
        }
    }

    if errors.len() == dates.len() {
        let history = DailyHistory { records, errors };
        return Err(AppError::ExternalServiceError(format!(
            "{} returned no data: {}",
            provider,
            history.error_summary().unwrap_or_default()
        )));
    }
    if !errors.is_empty() {
        tracing::warn!(
            "{} failed for {} of {} days, using placeholder records",
            provider,
            errors.len(),
            dates.len()
        );
    }
    Ok(DailyHistory { records, errors })
}

impl WeatherApiClient {
    /// `None` when no API key is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let api_key = config.weatherapi_key.clone()?;
        Some(Self {
            client: build_http_client(&config.user_agent),
            base_url: config.weatherapi_base_url.trim_end_matches('/').to_string(),
            api_key,
            hour: config.open_meteo_hour,
        })
    }

    /// Fetch every date from `start` to `end` concurrently.
    ///
    /// Fails only when the range is invalid or no date could be fetched.
    pub async fn fetch(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DailyHistory, AppError> {
        let dates = date_range(start, end)?;
        tracing::info!(
            "Fetching {} days of WeatherAPI history for {}",
            dates.len(),
            location
        );

        let results = join_all(dates.iter().map(|&date| self.fetch_day(location, date))).await;
        collect_days("WeatherAPI", &dates, results)
    }

    async fn fetch_day(&self, location: &str, date: NaiveDate) -> Result<Observation, String> {
        let url = format!("{}/history.json", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.clone()),
                ("q", location.to_string()),
                ("dt", date.format("%Y-%m-%d").to_string()),
                ("hour", self.hour.to_string()),
            ])
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let body: HistoryResponse = response
            .json()
            .await
            .map_err(|e| format!("JSON parse error: {}", e))?;
        let day = body
            .forecast
            .forecastday
            .into_iter()
            .next()
            .map(|d| d.day)
            .ok_or_else(|| "no data for date".to_string())?;

        Ok(Observation {
            date,
            temperature: day.avgtemp_c.unwrap_or(25.0),
            humidity: day.avghumidity.unwrap_or(70.0),
            pressure: STANDARD_PRESSURE_HPA,
            wind_speed: day.maxwind_kph.unwrap_or(10.0),
            precipitation: day.totalprecip_mm.unwrap_or(0.0),
        })
    }
}

// --- OpenWeather ---

/// Client for the OpenWeather geocoding and One Call timemachine APIs.
#[derive(Debug, Clone)]
pub struct OpenWeatherClient {
    client: reqwest::Client,
    base_url: String,
    geo_url: String,
    api_key: String,
    hour: u32,
}

#[derive(Debug, Deserialize)]
struct OpenWeatherPlace {
    lat: f64,
    lon: f64,
}

/// One Call 3.0 answers with `data`; the 2.5 timemachine used `hourly`.
#[derive(Debug, Deserialize)]
struct TimemachineResponse {
    #[serde(default)]
    data: Vec<TimemachineReading>,
    #[serde(default)]
    hourly: Vec<TimemachineReading>,
}

#[derive(Debug, Deserialize)]
struct TimemachineReading {
    temp: Option<f64>,
    humidity: Option<f64>,
    pressure: Option<f64>,
    wind_speed: Option<f64>,
    rain: Option<RainVolume>,
}

#[derive(Debug, Deserialize)]
struct RainVolume {
    #[serde(rename = "1h")]
    one_hour: Option<f64>,
}

impl OpenWeatherClient {
    /// `None` when no API key is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let api_key = config.openweather_key.clone()?;
        Some(Self {
            client: build_http_client(&config.user_agent),
            base_url: config.openweather_base_url.trim_end_matches('/').to_string(),
            geo_url: config.openweather_geo_url.trim_end_matches('/').to_string(),
            api_key,
            hour: config.open_meteo_hour,
        })
    }

    /// Resolve a place name to (latitude, longitude) using the first match.
    pub async fn geocode(&self, location: &str) -> Result<(f64, f64), AppError> {
        let url = format!("{}/direct", self.geo_url);
        let response = self
            .client
            .get(&url)
            .query(&[("q", location), ("limit", "1"), ("appid", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("OpenWeather geocoding failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "OpenWeather geocoding returned HTTP {}",
                response.status()
            )));
        }

        let places: Vec<OpenWeatherPlace> = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("OpenWeather geocoding parse error: {}", e))
        })?;

        places
            .first()
            .map(|p| (p.lat, p.lon))
            .ok_or_else(|| {
                AppError::ExternalServiceError(format!("Location '{}' not found", location))
            })
    }

    /// One timemachine request per date from `start` to `end`, taken at the
    /// configured hour (UTC).
    pub async fn fetch(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<DailyHistory, AppError> {
        let dates = date_range(start, end)?;
        let (lat, lon) = self.geocode(location).await?;
        tracing::info!(
            "Fetching {} days of OpenWeather history for {} ({:.4}, {:.4})",
            dates.len(),
            location,
            lat,
            lon
        );

        let results = join_all(dates.iter().map(|&date| self.fetch_day(lat, lon, date))).await;
        collect_days("OpenWeather", &dates, results)
    }

    async fn fetch_day(&self, lat: f64, lon: f64, date: NaiveDate) -> Result<Observation, String> {
        let timestamp = date
            .and_hms_opt(self.hour, 0, 0)
            .ok_or_else(|| format!("invalid hour {}", self.hour))?
            .and_utc()
            .timestamp();
        let url = format!("{}/onecall/timemachine", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("lat", format!("{:.4}", lat)),
                ("lon", format!("{:.4}", lon)),
                ("dt", timestamp.to_string()),
                ("appid", self.api_key.clone()),
                ("units", "metric".to_string()),
            ])
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        let body: TimemachineResponse = response
            .json()
            .await
            .map_err(|e| format!("JSON parse error: {}", e))?;
        let readings = if body.data.is_empty() {
            body.hourly
        } else {
            body.data
        };
        daily_from_readings(date, &readings).ok_or_else(|| "no data for date".to_string())
    }
}

/// Average the readings of one day; rain is summed over the hours.
fn daily_from_readings(date: NaiveDate, readings: &[TimemachineReading]) -> Option<Observation> {
    if readings.is_empty() {
        return None;
    }
    let fallback = placeholder(date);
    let average = |pick: fn(&TimemachineReading) -> Option<f64>, default: f64| {
        let values: Vec<f64> = readings.iter().filter_map(pick).collect();
        mean(&values).unwrap_or(default)
    };
    Some(Observation {
        date,
        temperature: average(|r| r.temp, fallback.temperature),
        humidity: average(|r| r.humidity, fallback.humidity),
        pressure: average(|r| r.pressure, fallback.pressure),
        wind_speed: average(|r| r.wind_speed, fallback.wind_speed),
        precipitation: readings
            .iter()
            .filter_map(|r| r.rain.as_ref().and_then(|rain| rain.one_hour))
            .sum(),
    })
}

// --- WeatherBit ---

/// Client for the WeatherBit daily history API.
#[derive(Debug, Clone)]
pub struct WeatherBitClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct WeatherBitResponse {
    #[serde(default)]
    data: Vec<WeatherBitDay>,
}

#[derive(Debug, Deserialize)]
struct WeatherBitDay {
    datetime: String,
    temp: Option<f64>,
    rh: Option<f64>,
    pres: Option<f64>,
    wind_spd: Option<f64>,
    precip: Option<f64>,
}

impl WeatherBitClient {
    /// `None` when no API key is configured.
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let api_key = config.weatherbit_key.clone()?;
        Some(Self {
            client: build_http_client(&config.user_agent),
            base_url: config.weatherbit_base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Daily history for `location` from `start` to `end` inclusive.
    ///
    /// WeatherBit treats `end_date` as exclusive, so one extra day is
    /// requested. Missing readings stay undefined for the normalizer to fill.
    pub async fn fetch(
        &self,
        location: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Observation>, AppError> {
        let days = date_range(start, end)?.len();
        let exclusive_end = end
            .succ_opt()
            .ok_or_else(|| AppError::BadRequest(format!("end_date {} is out of range", end)))?;
        tracing::info!(
            "Fetching {} days of WeatherBit history for {}",
            days,
            location
        );

        let url = format!("{}/history/daily", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("city", location.to_string()),
                ("start_date", start.to_string()),
                ("end_date", exclusive_end.to_string()),
                ("units", "M".to_string()),
                ("key", self.api_key.clone()),
            ])
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalServiceError(format!("WeatherBit request failed: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(AppError::ExternalServiceError(format!(
                "WeatherBit returned HTTP {}",
                response.status()
            )));
        }

        let body: WeatherBitResponse = response.json().await.map_err(|e| {
            AppError::ExternalServiceError(format!("WeatherBit JSON parse error: {}", e))
        })?;

        let records = weatherbit_records(body.data, start, end);
        if records.is_empty() {
            return Err(AppError::ExternalServiceError(format!(
                "WeatherBit returned no data for {}",
                location
            )));
        }
        Ok(records)
    }
}

/// Days inside `start..=end` in date order. Unparseable dates are skipped.
fn weatherbit_records(days: Vec<WeatherBitDay>, start: NaiveDate, end: NaiveDate) -> Vec<Observation> {
    let mut skipped = 0usize;
    let mut records: Vec<Observation> = days
        .into_iter()
        .filter_map(|day| {
            let date = day
                .datetime
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
            let Some(date) = date else {
                skipped += 1;
                return None;
            };
            (start..=end).contains(&date).then(|| Observation {
                date,
                temperature: day.temp.unwrap_or(f64::NAN),
                humidity: day.rh.unwrap_or(f64::NAN),
                pressure: day.pres.unwrap_or(f64::NAN),
                wind_speed: day.wind_spd.unwrap_or(f64::NAN),
                precipitation: day.precip.unwrap_or(f64::NAN),
            })
        })
        .collect();
    if skipped > 0 {
        tracing::warn!("Skipped {} WeatherBit days with unreadable dates", skipped);
    }
    records.sort_by_key(|r| r.date);
    records.dedup_by_key(|r| r.date);
    records
}
