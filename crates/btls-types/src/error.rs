/// TLS engine errors.
///
/// Would-block conditions are never errors: they surface as engine
/// statuses or handshake states. Everything here is a hard failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid or incomplete configuration, or a mutation attempted
    /// after the connection was instantiated.
    #[error("configuration error: {0}")]
    Config(String),
    /// The handshake failed for a non-alert reason.
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// A fatal alert was sent or received.
    #[error("fatal alert: {0}")]
    Alert(String),
    /// Peer certificate validation rejected the chain.
    #[error("certificate validation failed: {0}")]
    CertValidation(String),
    /// Operation on a closed or released connection.
    #[error("connection closed")]
    Closed,
    /// Resource acquisition failed (buffer allocation, backend setup).
    #[error("engine resource failure: {0}")]
    Resource(String),
    /// The handshake made no progress within the retry budget.
    #[error("connection stalled: {0}")]
    Stalled(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Config("missing private key".into());
        assert_eq!(err.to_string(), "configuration error: missing private key");

        let err = EngineError::Alert("bad_certificate".into());
        assert_eq!(err.to_string(), "fatal alert: bad_certificate");

        assert_eq!(EngineError::Closed.to_string(), "connection closed");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
