pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod metrics;
pub mod services;

pub use config::Config;
pub use error::{AppError, Result};
