use std::io;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while serving a proxied connection or talking to the coordinator.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown protocol version {0:#04x}")]
    UnknownProtocol(u8),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("secret key mismatch")]
    HandshakeMismatch,

    #[error("relay did not answer the handshake within {0:?}")]
    HandshakeTimeout(Duration),

    /// The quota ledger is exhausted for the current period.
    #[error("not enough quota")]
    NotEnoughQuota,

    #[error("no relay available")]
    NoRelay,

    #[error("dial {addr} timed out after {timeout:?}")]
    DialTimeout { addr: String, timeout: Duration },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps the error into an `io::Error` so it can travel through
    /// `AsyncRead`/`AsyncWrite` implementations.
    pub fn into_io(self) -> io::Error {
        match self {
            Error::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer").into();
        let display = format!("{}", err);
        assert!(display.contains("IO error"));
        assert!(display.contains("reset by peer"));
    }

    #[test]
    fn test_unknown_protocol_display() {
        let err = Error::UnknownProtocol(0x04);
        assert_eq!(format!("{}", err), "unknown protocol version 0x04");
    }

    #[test]
    fn test_quota_into_io_keeps_source() {
        let err = Error::NotEnoughQuota.into_io();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<Error>());
        assert!(matches!(inner, Some(Error::NotEnoughQuota)));
    }

    #[test]
    fn test_io_into_io_is_unwrapped() {
        let err = Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe")).into_io();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
