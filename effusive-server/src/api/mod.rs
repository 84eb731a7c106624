//! HTTP API handlers

pub mod generate;
pub mod health;
pub mod models;
pub mod ref_audio;

pub use generate::generate_routes;
pub use health::health_routes;
pub use models::model_routes;
pub use ref_audio::ref_audio_routes;
