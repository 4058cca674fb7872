//! Error types for Turnstile

use hyper::StatusCode;

/// Main error type for Turnstile operations
#[derive(Debug, thiserror::Error)]
pub enum TurnstileError {
    #[error("Invalid key material: {0}")]
    KeyFormat(String),

    #[error("No login session found")]
    NoSession,

    #[error("Login session expired: {0}")]
    SessionExpired(String),

    #[error("Invalid identity token: {0}")]
    InvalidToken(String),

    #[error("Proving service unavailable: {0}")]
    ProverUnavailable(String),

    #[error("Malformed proving service response: {0}")]
    ProverResponse(String),

    #[error("Address seed mismatch: {0}")]
    AddressSeedMismatch(String),

    #[error("Sponsor key unavailable: {0}")]
    SponsorKey(String),

    #[error("Sponsor cannot pay fees: {0}")]
    SponsorInsolvent(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TurnstileError {
    /// Convert error to HTTP status code
    ///
    /// The sponsorship surface keeps a deliberately small contract:
    /// malformed or ambiguous request shapes are the caller's fault (400),
    /// everything else that leaks out of a handler is a server-side
    /// failure (500).
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidToken(_) => StatusCode::BAD_REQUEST,
            Self::KeyFormat(_)
            | Self::NoSession
            | Self::SessionExpired(_)
            | Self::ProverUnavailable(_)
            | Self::ProverResponse(_)
            | Self::AddressSeedMismatch(_)
            | Self::SponsorKey(_)
            | Self::SponsorInsolvent(_)
            | Self::Execution(_)
            | Self::Ledger(_)
            | Self::Timeout(_)
            | Self::Store(_)
            | Self::Config(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable kind, surfaced alongside the human message
    pub fn kind(&self) -> &'static str {
        match self {
            Self::KeyFormat(_) => "key_format",
            Self::NoSession => "no_session",
            Self::SessionExpired(_) => "session_expired",
            Self::InvalidToken(_) => "invalid_token",
            Self::ProverUnavailable(_) => "prover_unavailable",
            Self::ProverResponse(_) => "prover_response",
            Self::AddressSeedMismatch(_) => "address_seed_mismatch",
            Self::SponsorKey(_) => "sponsor_key",
            Self::SponsorInsolvent(_) => "sponsor_insolvent",
            Self::Execution(_) => "execution",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Ledger(_) => "ledger",
            Self::Timeout(_) => "timeout",
            Self::Store(_) => "store",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Whether a caller may reasonably retry the same request unchanged
    ///
    /// Transient infrastructure failures are retryable; everything bound to
    /// request content, expired state, or operator configuration is not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProverUnavailable(_) | Self::Ledger(_) | Self::Timeout(_)
        )
    }

    /// Status code and JSON body for surfacing this error over HTTP
    ///
    /// Every handler failure goes out in this one shape, so clients can
    /// branch on `code` and `retryable` without parsing the message text.
    pub fn to_status_code_and_body(&self) -> (StatusCode, serde_json::Value) {
        let body = serde_json::json!({
            "message": self.to_string(),
            "code": self.kind(),
            "retryable": self.is_retryable(),
        });
        (self.status_code(), body)
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for TurnstileError {
    fn from(err: std::io::Error) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for TurnstileError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidRequest(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for TurnstileError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for TurnstileError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Self::InvalidToken(format!("JWT error: {}", err))
    }
}

/// Result type alias for Turnstile operations
pub type Result<T> = std::result::Result<T, TurnstileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_shape_errors_map_to_400() {
        let err = TurnstileError::InvalidRequest("missing sender".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn server_side_failures_map_to_500() {
        for err in [
            TurnstileError::SponsorKey("not configured".into()),
            TurnstileError::SponsorInsolvent("no fee resources".into()),
            TurnstileError::ProverUnavailable("connect refused".into()),
            TurnstileError::Execution("relay rejected".into()),
            TurnstileError::Internal("oops".into()),
        ] {
            assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(TurnstileError::ProverUnavailable("503".into()).is_retryable());
        assert!(TurnstileError::Timeout("prover".into()).is_retryable());
        assert!(TurnstileError::Ledger("connect".into()).is_retryable());
        assert!(!TurnstileError::AddressSeedMismatch("seed".into()).is_retryable());
        assert!(!TurnstileError::InvalidRequest("shape".into()).is_retryable());
        assert!(!TurnstileError::SponsorInsolvent("empty".into()).is_retryable());
    }

    #[test]
    fn jwt_errors_become_invalid_token() {
        let err = jsonwebtoken::decode_header("not-a-token").unwrap_err();
        let converted: TurnstileError = err.into();
        assert!(matches!(converted, TurnstileError::InvalidToken(_)));
    }

    #[test]
    fn http_surface_pairs_status_with_uniform_body() {
        let (status, body) =
            TurnstileError::SponsorInsolvent("no fee resources".into()).to_status_code_and_body();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["code"], "sponsor_insolvent");
        assert_eq!(body["retryable"], false);
        assert!(body["message"].as_str().unwrap().contains("no fee resources"));

        let (status, body) =
            TurnstileError::InvalidRequest("missing sender".into()).to_status_code_and_body();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "invalid_request");
    }
}
