// =============================================================================
// Domain errors surfaced by the market-data core
// =============================================================================
//
// Only the upstream and asset-store boundaries produce these. The cache and the
// candle aggregator are total over their inputs and never construct one.
// =============================================================================

use thiserror::Error;

/// Errors returned by [`crate::market::MarketService`] and its collaborators.
///
/// `Clone` is required so a single failed upstream fetch can be handed to every
/// caller that coalesced onto it.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MarketError {
    /// Malformed request input, rejected before any cache or upstream access.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The provider (or the local store) reports that the asset does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, non-404 error status, or undecodable payload.
    #[error("upstream unavailable{}: {message}", status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    UpstreamUnavailable {
        status: Option<u16>,
        message: String,
    },

    /// The asset store could not answer.
    #[error("asset store error: {0}")]
    Storage(String),
}

impl MarketError {
    pub fn upstream(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            status,
            message: message.into(),
        }
    }

    /// Machine-readable code recorded in the error log.
    pub fn code(&self) -> String {
        match self {
            Self::Validation(_) => "validation".to_string(),
            Self::NotFound(_) => "not_found".to_string(),
            Self::UpstreamUnavailable {
                status: Some(status),
                ..
            } => format!("upstream_{status}"),
            Self::UpstreamUnavailable { status: None, .. } => "upstream_network".to_string(),
            Self::Storage(_) => "storage".to_string(),
        }
    }
}

impl From<reqwest::Error> for MarketError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|s| s.as_u16());
        if err.is_timeout() {
            return Self::upstream(status, format!("request timed out: {err}"));
        }
        if err.is_decode() {
            return Self::upstream(status, format!("malformed provider payload: {err}"));
        }
        Self::upstream(status, err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;
