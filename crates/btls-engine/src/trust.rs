//! Trust verification callbacks and their backend-facing result codes.

use crate::backend::PeerCert;

/// Why a certificate chain was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustFailure {
    /// The chain does not anchor to a trusted authority.
    Untrusted,
    Expired,
    NotYetValid,
    Revoked,
    /// The certificate itself is malformed or unusable.
    BadCertificate,
    /// A required certificate was not provided.
    Incomplete,
    Other,
}

impl TrustFailure {
    /// Numeric verdict delivered to the backend. Zero is reserved for
    /// success; every failure kind is negative.
    pub fn code(&self) -> i32 {
        match self {
            TrustFailure::Untrusted => -10,
            TrustFailure::Expired => -11,
            TrustFailure::NotYetValid => -12,
            TrustFailure::Revoked => -13,
            TrustFailure::BadCertificate => -14,
            TrustFailure::Incomplete => -15,
            TrustFailure::Other => -1,
        }
    }
}

/// A rejected chain, with the message preserved for the engine fault.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TrustError {
    pub kind: TrustFailure,
    pub message: String,
}

impl TrustError {
    pub fn new(kind: TrustFailure, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Application-supplied chain verification, invoked from the delegated
/// validation task. `auth_type` names the certificate authentication
/// algorithm in use ("RSA", "ECDSA", ...).
pub trait TrustVerifier: Send + Sync {
    fn check_client_trusted(&self, chain: &[PeerCert], auth_type: &str) -> Result<(), TrustError>;
    fn check_server_trusted(&self, chain: &[PeerCert], auth_type: &str) -> Result<(), TrustError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_codes_negative_and_distinct() {
        let kinds = [
            TrustFailure::Untrusted,
            TrustFailure::Expired,
            TrustFailure::NotYetValid,
            TrustFailure::Revoked,
            TrustFailure::BadCertificate,
            TrustFailure::Incomplete,
            TrustFailure::Other,
        ];
        for kind in &kinds {
            assert!(kind.code() < 0);
        }
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_trust_error_preserves_message() {
        let err = TrustError::new(TrustFailure::Expired, "leaf expired 2024-01-01");
        assert_eq!(err.to_string(), "leaf expired 2024-01-01");
        assert_eq!(err.kind, TrustFailure::Expired);
    }
}
