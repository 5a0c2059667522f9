use thiserror::Error;

use crate::transport::TransportError;

/// Failures surfaced by the gateway and meter drivers.
#[derive(Debug, Error)]
pub enum MeterError {
    /// Unknown or unreadable item, unsupported model, bad slave address or endpoint.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The link could not be opened or an exchange kept failing after reconnects.
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    /// The command was written but the actuator reports a different state.
    #[error("actuator {turn} status mismatch: commanded {}, reported {}", on_off(.commanded), on_off(.reported))]
    Verification {
        turn: usize,
        commanded: bool,
        reported: bool,
    },

    /// The meter answered with a value that has no known meaning.
    #[error("decode error: {0}")]
    Decode(String),
}

fn on_off(state: &bool) -> &'static str {
    if *state {
        "on"
    } else {
        "off"
    }
}

impl MeterError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        MeterError::Configuration(message.into())
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, MeterError::Connection(_))
    }
}

pub type Result<T, E = MeterError> = std::result::Result<T, E>;
