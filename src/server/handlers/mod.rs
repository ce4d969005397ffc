pub mod admin;
pub mod auth;
pub mod events;
pub mod insights;
pub mod metrics;
pub mod network;
