//! Error types for the webgist gateway.
//!
//! Every failure the gateway can surface maps onto a small taxonomy with a
//! stable HTTP status. Error messages are display-stable strings suitable
//! for `text/plain` responses; no internal details leak to clients.

/// Errors that can occur while answering a search or crawl request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A request parameter failed validation (malformed URL, bad protocol,
    /// bad TLD). Maps to HTTP 400.
    #[error("invalid parameter: {0}")]
    ParamValidation(String),

    /// The pipeline produced nothing to return. Maps to HTTP 404.
    #[error("no content: {0}")]
    NoContent(String),

    /// The upstream search engine or a scrape failed after retries.
    /// Maps to HTTP 500 unless a stale cache fallback absorbs it.
    #[error("downstream failure: {0}")]
    Downstream(String),

    /// Invalid gateway configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Anything unexpected. Maps to HTTP 500.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// The HTTP status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ParamValidation(_) => 400,
            Self::NoContent(_) => 404,
            Self::Downstream(_) | Self::Config(_) | Self::Internal(_) => 500,
        }
    }
}

/// Convenience type alias for gateway results.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_param_validation() {
        let err = GatewayError::ParamValidation("bad TLD".into());
        assert_eq!(err.to_string(), "invalid parameter: bad TLD");
    }

    #[test]
    fn display_no_content() {
        let err = GatewayError::NoContent("no batch produced".into());
        assert_eq!(err.to_string(), "no content: no batch produced");
    }

    #[test]
    fn display_downstream() {
        let err = GatewayError::Downstream("HTTP 503".into());
        assert_eq!(err.to_string(), "downstream failure: HTTP 503");
    }

    #[test]
    fn status_codes_match_taxonomy() {
        assert_eq!(GatewayError::ParamValidation("x".into()).status_code(), 400);
        assert_eq!(GatewayError::NoContent("x".into()).status_code(), 404);
        assert_eq!(GatewayError::Downstream("x".into()).status_code(), 500);
        assert_eq!(GatewayError::Internal("x".into()).status_code(), 500);
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<GatewayError>();
    }
}
