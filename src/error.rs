//! Error types for the payg library

use thiserror::Error;

/// Result type alias for payg operations
pub type Result<T> = std::result::Result<T, PaygError>;

/// Main error type for payg operations
#[derive(Error, Debug)]
pub enum PaygError {
    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Response body could not be interpreted
    #[error("Malformed response: {message}")]
    MalformedResponse { message: String },

    /// Resource server answered with a non-success status other than 402
    #[error("Request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    /// Payment backend rejected the completion call
    #[error("Payment {payment_id} failed: {reason}")]
    PaymentFailed { payment_id: String, reason: String },

    /// No pending grant to complete for a resource
    #[error("No pending payment for {key}")]
    NoPendingPayment { key: String },

    /// Another payment sequence already holds the resource
    #[error("Payment already in progress for {key}")]
    PaymentInProgress { key: String },

    /// Grant persistence error
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl PaygError {
    /// Create a malformed response error
    pub fn malformed_response(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Create a status error
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Create a payment failed error
    pub fn payment_failed(payment_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PaymentFailed {
            payment_id: payment_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Network or decoding failure; the grant store was left untouched
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::Json(_) | Self::MalformedResponse { .. }
        )
    }

    /// Completion was rejected; the grant stays pending and can be retried
    pub fn is_payment_failure(&self) -> bool {
        matches!(self, Self::PaymentFailed { .. })
    }

    /// HTTP status attached to this error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
