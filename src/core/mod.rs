//! Core module - Common types and error handling

pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{EncodingError, Error, Result};
pub use types::*;
