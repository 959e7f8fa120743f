//! Error types for Tarantool operations.

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// The main error type for Tarantool operations.
///
/// The error is `Clone` because a single connection failure completes every
/// outstanding call with the same cause, and a call handle may be awaited by
/// several waiters.
#[derive(Debug, Clone, Error)]
pub enum TarantoolError {
    /// Socket, handshake or framing failure. Fatal to the current connection.
    #[error("communication error: {0}")]
    Communication(String),

    /// Error reported by the server for a single request.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code with the error marker bit stripped.
        code: u32,
        /// Message carried in the `ERROR` body field.
        message: String,
    },

    /// Malformed greeting, corrupt frame or otherwise unexpected bytes.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A value that cannot be represented on the wire.
    #[error("unsupported type: {0}")]
    UnsupportedType(String),

    /// An operation did not finish within its deadline.
    #[error("timeout error: {0}")]
    Timeout(String),

    /// The server rejected the supplied credentials.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Invalid client settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The client was closed or gave up reconnecting.
    #[error("client closed: {0}")]
    Closed(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(Arc<io::Error>),
}

impl TarantoolError {
    /// Returns true for errors that mean the connection itself failed.
    pub fn is_communication(&self) -> bool {
        matches!(self, Self::Communication(_) | Self::Io(_))
    }

    /// Returns the server error code if this is a server error.
    pub fn server_code(&self) -> Option<u32> {
        match self {
            Self::Server { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Wraps this error as the cause of a communication failure.
    pub fn into_communication(self) -> Self {
        if self.is_communication() {
            self
        } else {
            Self::Communication(self.to_string())
        }
    }
}

impl From<io::Error> for TarantoolError {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// A specialized `Result` type for Tarantool operations.
pub type Result<T> = std::result::Result<T, TarantoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_communication_error_display() {
        let err = TarantoolError::Communication("connection reset".to_string());
        assert_eq!(err.to_string(), "communication error: connection reset");
    }

    #[test]
    fn test_server_error_display() {
        let err = TarantoolError::Server {
            code: 7,
            message: "Can't modify data because this instance is in read-only mode.".into(),
        };
        assert!(err.to_string().starts_with("server error 7:"));
        assert_eq!(err.server_code(), Some(7));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let err: TarantoolError = io_err.into();
        assert!(matches!(err, TarantoolError::Io(_)));
        assert!(err.is_communication());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_classification() {
        assert!(TarantoolError::Communication("x".into()).is_communication());
        assert!(!TarantoolError::Timeout("x".into()).is_communication());
        assert!(!TarantoolError::Protocol("x".into()).is_communication());
        assert_eq!(TarantoolError::Protocol("x".into()).server_code(), None);
    }

    #[test]
    fn test_into_communication_wraps_other_errors() {
        let err = TarantoolError::Protocol("bad frame".into()).into_communication();
        assert!(matches!(err, TarantoolError::Communication(ref m) if m.contains("bad frame")));

        let io: TarantoolError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(io.into_communication(), TarantoolError::Io(_)));
    }

    #[test]
    fn test_error_is_clone_send_sync() {
        fn assert_traits<T: Clone + Send + Sync>() {}
        assert_traits::<TarantoolError>();
    }
}
