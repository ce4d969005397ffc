pub mod database;
pub mod relay;
pub mod routes;
pub mod server;

pub use routes::app;
pub use server::{AppConfig, AppState};
