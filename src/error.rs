//! Error types shared by the device, synchronizer and surface layers

use thiserror::Error;

/// Errors raised while talking to the amplifier or handling surface requests
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Connection gate is closed (heartbeat not reporting ready)
    #[error("device not connected")]
    NotConnected,

    /// Device answered with a non-200 status
    #[error("device returned HTTP {status}")]
    Http { status: u16 },

    /// Network failure, timeout or refused connection
    #[error("transport error: {0}")]
    Transport(String),

    /// Device answered 200 but the body did not match the expected shape
    #[error("malformed device response: {0}")]
    Decode(String),

    /// Action/feedback parameters failed the schema check
    #[error("invalid parameters: {0}")]
    Validation(String),

    #[error("unknown action '{0}'")]
    UnknownAction(String),

    #[error("unknown feedback '{0}'")]
    UnknownFeedback(String),
}

impl GatewayError {
    /// Shorthand for building a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        GatewayError::Validation(msg.into())
    }

    /// True for failures caught before any remote call was issued
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            GatewayError::NotConnected
                | GatewayError::Validation(_)
                | GatewayError::UnknownAction(_)
                | GatewayError::UnknownFeedback(_)
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
