//! Error types for qail-infile.

use thiserror::Error;

/// Errors raised while answering a LOCAL INFILE request.
#[derive(Debug, Error)]
pub enum InfileError {
    /// File is neither whitelisted nor covered by `allow_all_files`.
    #[error("local file '{0}' is not registered")]
    FileNotAllowed(String),

    /// No reader handler under this name.
    #[error("reader '{0}' is not registered")]
    ReaderNotRegistered(String),

    /// Reader handler is registered but produced no stream.
    #[error("reader '{0}' returned no stream")]
    ReaderUnavailable(String),

    /// Whitelisted file could not be opened or stat'ed.
    #[error("failed to open local file '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading the resolved source failed mid-stream.
    #[error("read error: {0}")]
    Read(#[source] std::io::Error),

    /// Writing a packet to the server failed. The channel is unusable.
    #[error("send error: {0}")]
    Send(#[source] std::io::Error),

    /// Closing the source failed after the exchange completed. The
    /// connection itself is still in sync.
    #[error("failed to close local source: {0}")]
    Close(#[source] std::io::Error),

    /// Programmatic row contained a value the row format cannot represent.
    #[error("unsupported value type: {0}")]
    UnsupportedValue(String),

    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    /// Server answered with an ERR packet.
    #[error("Error {code} ({state}): {message}")]
    Server {
        code: u16,
        state: String,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InfileError {
    /// Whether the connection must be considered broken after this error.
    ///
    /// Everything else leaves the protocol synchronized: the termination
    /// packet was sent and the server's reply consumed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            InfileError::Send(_)
                | InfileError::Io(_)
                | InfileError::Protocol(_)
                | InfileError::PacketTooLarge { .. }
        )
    }
}

/// Result type for LOCAL INFILE operations.
pub type InfileResult<T> = Result<T, InfileError>;
