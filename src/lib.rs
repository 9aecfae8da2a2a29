pub mod apis;
pub mod config;
pub mod constants;
pub mod error;
pub mod gate;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod tasks;
pub mod types;

// Layered boundaries for application and infrastructure
pub mod app;
pub mod infra;
