pub mod data;
pub mod forecasts;
pub mod health;
