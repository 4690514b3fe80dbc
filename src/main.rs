// Rainfall Forecast API v0.1
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod helpers;
mod routes;
mod services;

use config::AppConfig;
use routes::forecasts::AppState;

/// Rainfall Forecast API: OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Rainfall Forecast API",
        version = "0.1.0",
        description = "Daily rainfall forecasting from loosely formatted weather history. \
            Normalizes uploaded or fetched data to a canonical schema, trains linear, \
            random forest, gradient boosting and ARIMA models, ranks them on held-out \
            data and forecasts precipitation over a chosen horizon.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Data", description = "Bundled sample dataset"),
        (name = "Forecasts", description = "Model training and forecast generation"),
    ),
    paths(
        routes::health::health_check,
        routes::data::get_sample_data,
        routes::forecasts::upload_forecast,
        routes::forecasts::sample_forecast,
        routes::forecasts::open_meteo_forecast,
        routes::forecasts::weatherapi_forecast,
        routes::forecasts::openweather_forecast,
        routes::forecasts::weatherbit_forecast,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            routes::data::SampleDataResponse,
            routes::forecasts::ForecastResponse,
            services::table::Observation,
            services::evaluator::ModelReportRow,
            services::evaluator::FeatureImportance,
            services::features::ParameterImportance,
            services::preprocess::Feature,
            services::schema::NormalizationReport,
            services::schema::DateSource,
            services::schema::ColumnRename,
            services::forecast::PredictionPath,
            services::forecast::FallbackReason,
            services::forecast::HorizonUnit,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rainfall_forecast_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    let max_upload_bytes = config.max_upload_bytes;
    let port = config.port;

    if config.weatherapi_key.is_none() {
        tracing::warn!("WEATHERAPI_KEY not set, the WeatherAPI endpoint is disabled");
    }
    if config.openweather_key.is_none() {
        tracing::warn!("OPENWEATHER_KEY not set, the OpenWeather endpoint is disabled");
    }
    if config.weatherbit_key.is_none() {
        tracing::warn!("WEATHERBIT_KEY not set, the WeatherBit endpoint is disabled");
    }
    if let Some(seed) = config.pipeline_seed {
        tracing::info!("Using fixed pipeline seed {}", seed);
    }

    let app_state = AppState::new(config);

    // CORS: browser uploads need POST with arbitrary content types
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(Any);

    let data_routes = Router::new()
        .route("/api/v1/data/sample", get(routes::data::get_sample_data))
        .with_state(app_state.clone());

    let forecast_routes = Router::new()
        .route(
            "/api/v1/forecasts/upload",
            post(routes::forecasts::upload_forecast),
        )
        .route(
            "/api/v1/forecasts/sample",
            post(routes::forecasts::sample_forecast),
        )
        .route(
            "/api/v1/forecasts/open-meteo",
            post(routes::forecasts::open_meteo_forecast),
        )
        .route(
            "/api/v1/forecasts/weatherapi",
            post(routes::forecasts::weatherapi_forecast),
        )
        .route(
            "/api/v1/forecasts/openweather",
            post(routes::forecasts::openweather_forecast),
        )
        .route(
            "/api/v1/forecasts/weatherbit",
            post(routes::forecasts::weatherbit_forecast),
        )
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .with_state(app_state);

    let health_routes = Router::new().route("/api/v1/health", get(routes::health::health_check));

    let app = Router::new()
        .merge(health_routes)
        .merge(data_routes)
        .merge(forecast_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("API server listening on {}", addr);
    tracing::info!("Swagger UI available at http://localhost:{}/swagger-ui/", port);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
