//! Error types for the Sirdata RTD provider.
//!
//! Errors are carried as [`error_stack::Report<RtdError>`] so every boundary
//! can add context with `change_context` while keeping the original cause.

use derive_more::{Display, Error};
use http::StatusCode;

/// Top-level error type for the provider and its edge service.
#[derive(Debug, Display, Error)]
pub enum RtdError {
    /// Settings could not be loaded or failed validation.
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// The outbound fetch to the classification service failed.
    #[display("Transport error: {message}")]
    Transport { message: String },

    /// The classification service answered with a body we cannot use.
    #[display("Payload error: {message}")]
    Payload { message: String },

    /// A built-in bidder adapter could not apply signals to a bid target.
    #[display("Bidder {bidder} error: {message}")]
    Bidder { bidder: String, message: String },

    /// A caller-supplied handler reported a failure.
    #[display("Custom handler {target} error: {message}")]
    CustomHandler { target: String, message: String },

    /// The incoming request to the edge service was malformed.
    #[display("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl RtdError {
    /// HTTP status used when this error surfaces through the edge service.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Transport { .. } | Self::Payload { .. } => StatusCode::BAD_GATEWAY,
            Self::Configuration { .. }
            | Self::Bidder { .. }
            | Self::CustomHandler { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to a caller. Internal details stay in the logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidRequest { message } => format!("Invalid request: {message}"),
            Self::Transport { .. } | Self::Payload { .. } => {
                "Upstream classification service unavailable".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}
