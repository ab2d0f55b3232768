//! Error types for data operations.
//!
//! This module defines [`DataError`], the typed failure taxonomy shared by the
//! session, the request executor and every parser. Upstream contract changes
//! surface as [`DataError::Shape`]; an entity that simply has nothing to report
//! surfaces as [`DataError::NoData`], which public fetchers turn into an empty
//! table instead of propagating.

use std::time::Duration;

use polars::prelude::PolarsError;
use thiserror::Error;

/// Errors that can occur during data operations.
#[derive(Error, Debug)]
pub enum DataError {
    /// Cookie or crumb acquisition failed and no further strategy is available.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Rate limit exceeded by a provider.
    #[error("Rate limited by {provider}: retry after {retry_after:?}")]
    RateLimited {
        /// The provider that rate limited the request.
        provider: String,
        /// Suggested time to wait before retrying.
        retry_after: Option<Duration>,
    },

    /// Non-success HTTP status after the strategy-switch retry.
    #[error("HTTP {status}")]
    Http {
        /// The final status code returned by the upstream.
        status: u16,
    },

    /// Transport-level failure (connection, TLS, timeout, body read).
    #[error("Network error: {0}")]
    Network(String),

    /// The caller cancelled the request.
    #[error("Request cancelled")]
    Cancelled,

    /// The payload did not have the structure the parser relies on.
    #[error("Unexpected response shape: {0}")]
    Shape(String),

    /// A structurally valid response that carried no rows.
    #[error("No data: {0}")]
    NoData(String),

    /// The requested symbol was not found.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl DataError {
    /// Returns true for the "empty but well-formed" outcome.
    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData(_))
    }

    /// Returns true if resubmitting the same request later may succeed.
    ///
    /// This is advisory only; nothing in this workspace retries on its own
    /// beyond the single strategy switch.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Network(_) | Self::Http { status: 500..=599 }
        )
    }
}

impl From<PolarsError> for DataError {
    fn from(e: PolarsError) -> Self {
        Self::Shape(e.to_string())
    }
}

/// Result type alias using [`DataError`].
pub type Result<T> = std::result::Result<T, DataError>;
