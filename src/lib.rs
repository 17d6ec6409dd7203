// lib.rs - Domain library shared by the API server and the admin CLI
pub mod config;
pub mod errors;
pub mod models;
pub mod realtime;
pub mod services;

// Re-export commonly used types for convenience
pub use config::AppConfig;
pub use errors::{ApiError, ApiResult};
