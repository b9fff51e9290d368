//! Shared configuration and error types for certpilot.

pub mod config;
pub mod error;

pub use config::{CaInfo, CaKind, RenewConfig};
pub use error::{ConfigError, ConfigResult};
