//! HTTP API handlers

pub mod calibration;
pub mod health;
pub mod progress;
pub mod scores;

pub use calibration::calibration_routes;
pub use health::health_routes;
pub use progress::progress_routes;
pub use scores::score_routes;
