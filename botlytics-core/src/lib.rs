// src/lib.rs

pub mod attribution;
pub mod config;
pub mod db;
pub mod normalizer;
pub mod repositories;
pub mod services;
pub mod test_utils;
pub mod utils;

pub use config::AnalyticsConfig;
pub use db::Database;
pub use botlytics_common::error::Error;
