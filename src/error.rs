//! Crate-level error type
//!
//! Configuration errors stop the process at startup. Transport errors are
//! handled inside the supervisor and only reach callers when it stopped.
//! Record errors are per-line and never fatal; routing problems are logged
//! and counted inside the router.

use crate::config::ConfigError;
use crate::record::RecordError;
use crate::transport::MqttError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] MqttError),

    #[error("Invalid record: {0}")]
    Record(#[from] RecordError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// True for errors that must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RelayError::Config(_) | RelayError::Mqtt(_) | RelayError::Io(_)
        )
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
