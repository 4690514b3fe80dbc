pub mod evaluator;
pub mod features;
pub mod forecast;
pub mod frame;
pub mod models;
pub mod pipeline;
pub mod preprocess;
pub mod providers;
pub mod sample;
pub mod schema;
pub mod table;
