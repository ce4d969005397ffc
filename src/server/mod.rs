pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod period;
pub mod services;

pub use config::{AppConfig, AppState};
pub use error::ApiError;
