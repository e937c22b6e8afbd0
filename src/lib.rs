pub mod aggregate;
pub mod clusters;
pub mod config;
pub mod db;
pub mod join;
pub mod models;
pub mod query;
pub mod session;
pub mod sync;
pub mod tables;

/// Application name for XDG paths
pub const APP_NAME: &str = "rockpulse";
