/// Application configuration, parsed from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Sample dataset CSV; generated on first use when missing.
    pub sample_data_path: String,
    /// Years of synthetic history generated when the sample CSV is missing.
    pub sample_years: u32,
    /// Fixed RNG seed for synthesized columns and forecast jitter.
    /// Unset means every run draws fresh entropy.
    pub pipeline_seed: Option<u64>,
    pub weatherapi_key: Option<String>,
    pub weatherapi_base_url: String,
    pub open_meteo_base_url: String,
    pub open_meteo_geocoding_url: String,
    /// Hour of day (0-23) kept from Open-Meteo's hourly series.
    pub open_meteo_hour: u32,
    pub openweather_key: Option<String>,
    /// One Call API root, e.g. `https://api.openweathermap.org/data/3.0`
    pub openweather_base_url: String,
    pub openweather_geo_url: String,
    pub weatherbit_key: Option<String>,
    pub weatherbit_base_url: String,
    pub user_agent: String,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .expect("PORT must be a valid u16"),
            sample_data_path: std::env::var("SAMPLE_DATA_PATH")
                .unwrap_or_else(|_| "./data/rainfall_data.csv".to_string()),
            sample_years: std::env::var("SAMPLE_YEARS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .expect("SAMPLE_YEARS must be a positive integer"),
            pipeline_seed: std::env::var("PIPELINE_SEED")
                .ok()
                .map(|s| s.parse().expect("PIPELINE_SEED must be a valid u64")),
            weatherapi_key: std::env::var("WEATHERAPI_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            weatherapi_base_url: std::env::var("WEATHERAPI_BASE_URL")
                .unwrap_or_else(|_| "https://api.weatherapi.com/v1".to_string()),
            open_meteo_base_url: std::env::var("OPEN_METEO_BASE_URL")
                .unwrap_or_else(|_| "https://api.open-meteo.com/v1".to_string()),
            open_meteo_geocoding_url: std::env::var("OPEN_METEO_GEOCODING_URL")
                .unwrap_or_else(|_| "https://geocoding-api.open-meteo.com/v1".to_string()),
            open_meteo_hour: std::env::var("OPEN_METEO_HOUR")
                .unwrap_or_else(|_| "12".to_string())
                .parse::<u32>()
                .map(|h| h.min(23))
                .expect("OPEN_METEO_HOUR must be an hour between 0 and 23"),
            openweather_key: std::env::var("OPENWEATHER_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            openweather_base_url: std::env::var("OPENWEATHER_BASE_URL")
                .unwrap_or_else(|_| "https://api.openweathermap.org/data/3.0".to_string()),
            openweather_geo_url: std::env::var("OPENWEATHER_GEO_URL")
                .unwrap_or_else(|_| "https://api.openweathermap.org/geo/1.0".to_string()),
            weatherbit_key: std::env::var("WEATHERBIT_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            weatherbit_base_url: std::env::var("WEATHERBIT_BASE_URL")
                .unwrap_or_else(|_| "https://api.weatherbit.io/v2.0".to_string()),
            user_agent: std::env::var("HTTP_USER_AGENT")
                .unwrap_or_else(|_| "RainfallForecast/0.1".to_string()),
            max_upload_bytes: std::env::var("MAX_UPLOAD_BYTES")
                .unwrap_or_else(|_| (10 * 1024 * 1024).to_string())
                .parse()
                .expect("MAX_UPLOAD_BYTES must be a valid byte count"),
        }
    }
}
