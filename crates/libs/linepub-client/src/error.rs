use std::net::SocketAddr;

/// Errors returned by client operations.
///
/// Malformed inbound frames never show up here; the receive loop drops them.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error("failed to resolve host {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("timeout: {operation}")]
    Timeout { operation: String },

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("client is closed")]
    Closed,

    #[error("receive loop already running")]
    ReceiveLoopActive,

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("write failed: {source}")]
    Write {
        #[source]
        source: std::io::Error,
    },

    #[error("read failed: {source}")]
    Read {
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {message}")]
    Config { message: String },
}

impl ClientError {
    /// Returns `true` when the failure concerns the connection rather than the
    /// caller's input or the client's lifecycle.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Resolve { .. }
                | Self::Connect { .. }
                | Self::Timeout { .. }
                | Self::Write { .. }
                | Self::Read { .. }
        )
    }

    pub(crate) fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }
}
