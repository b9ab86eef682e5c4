use codechat_protocol::{
    ProviderKind, ERR_AUTH, ERR_PROVIDER, ERR_TIMEOUT, ERR_UNEXPECTED, ERR_VALIDATION,
};
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a provider adapter
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("transient provider failure: {0}")]
    Transient(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ProviderError {
    /// Classify an HTTP status returned by a provider.
    ///
    /// 401/403 are auth failures, 429 is a rate limit, 408 and 5xx are
    /// transient, anything else in 4xx is a bad request.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = format!("HTTP {status}: {}", message.into());
        match status {
            401 | 403 => Self::Auth(message),
            429 => Self::RateLimited(message),
            408 | 500..=599 => Self::Transient(message),
            _ => Self::InvalidRequest(message),
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }
}

/// Terminal outcome of a routed query
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("provider failed after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    #[error("provider rejected credentials: {0}")]
    Auth(String),

    #[error("provider did not respond within {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,

    #[error("provider `{0}` is not configured")]
    ProviderNotConfigured(ProviderKind),
}

impl RouterError {
    /// Wire error code carried in the error envelope
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::ProviderNotConfigured(_) => ERR_VALIDATION,
            Self::Auth(_) => ERR_AUTH,
            Self::Transient { .. } => ERR_PROVIDER,
            Self::Timeout(_) => ERR_TIMEOUT,
            Self::Cancelled => ERR_UNEXPECTED,
        }
    }
}

pub type Result<T> = std::result::Result<T, RouterError>;
