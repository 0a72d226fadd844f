//! ACME protocol error types

use thiserror::Error;

use super::jose::SigningError;
use super::types::Problem;

/// Errors surfaced by the ACME transport layer
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Network-class failure (connect, timeout). Retryable on the next
    /// reconciler tick.
    #[error("ACME transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The CA returned a structured problem document. Carried verbatim;
    /// most problem types are not locally recoverable.
    #[error("ACME protocol error: {0}")]
    Protocol(Problem),

    /// JWS construction failed
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// A required response header was absent
    #[error("ACME response from {url} missing required header '{header}'")]
    MissingHeader { header: &'static str, url: String },

    /// The response body could not be decoded as the expected shape
    #[error("failed to decode ACME response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// The new-nonce endpoint violated its contract
    #[error("new-nonce response invalid: {0}")]
    Nonce(String),
}

impl AcmeError {
    /// Whether the failure is a transient network condition rather than a
    /// CA-side rejection.
    pub fn is_transient(&self) -> bool {
        match self {
            AcmeError::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Whether the CA rejected the request for a stale nonce.
    pub fn is_bad_nonce(&self) -> bool {
        matches!(self, AcmeError::Protocol(p) if p.is_bad_nonce())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_carries_ca_detail() {
        let problem: Problem = serde_json::from_str(
            r#"{"type": "urn:ietf:params:acme:error:rateLimited", "detail": "too many orders"}"#,
        )
        .unwrap();
        let err = AcmeError::Protocol(problem);

        assert!(!err.is_transient());
        assert!(!err.is_bad_nonce());
        assert!(err.to_string().contains("too many orders"));
    }

    #[test]
    fn bad_nonce_is_detected_through_the_error() {
        let problem: Problem =
            serde_json::from_str(r#"{"type": "urn:ietf:params:acme:error:badNonce"}"#).unwrap();
        assert!(AcmeError::Protocol(problem).is_bad_nonce());
    }
}
