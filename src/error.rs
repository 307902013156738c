//! Error taxonomy — spec §7.
//!
//! Every kind maps to a stable string so RPC responses can surface it to
//! clients without leaking internal detail. `DaemonError::wire_kind` is the
//! value handlers put in an `{error}` response.

/// Top-level error type returned by core operations.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Framing or JSON parse failure on a subprocess stream. Fatal for the
    /// client instance; the owning workspace transitions to `Stopped`.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The child process exited unexpectedly; pending requests fail with
    /// this kind.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// A request's deadline elapsed before a response arrived.
    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The server reported a JSON-RPC error.
    #[error("LSP error {code}: {message}")]
    LspResponse { code: i64, message: String },

    /// Derived from a `-32601` (method not found) response; surfaced to the
    /// user verbatim.
    #[error("{method} is not supported by {server}")]
    MethodNotSupported { method: String, server: String },

    /// The symbol or resource the user asked about does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Multiple candidates matched a reference string.
    #[error("ambiguous reference: {0}")]
    Ambiguous(String),

    /// Malformed reference, bad regex, path outside workspace, etc.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unrecoverable I/O failure (process spawn, file read/write).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// The stable string clients should match on — never the `Display` text,
    /// which may include interpolated detail that changes across versions.
    pub fn wire_kind(&self) -> &'static str {
        match self {
            DaemonError::Protocol(_) => "ProtocolError",
            DaemonError::ConnectionClosed(_) => "ConnectionClosed",
            DaemonError::Timeout(_) => "Timeout",
            DaemonError::LspResponse { .. } => "LSPResponseError",
            DaemonError::MethodNotSupported { .. } => "MethodNotSupported",
            DaemonError::NotFound(_) => "NotFound",
            DaemonError::Ambiguous(_) => "Ambiguous",
            DaemonError::InvalidInput(_) => "InvalidInput",
            DaemonError::Io(_) => "Io",
        }
    }

    pub fn is_method_not_found_code(code: i64) -> bool {
        code == -32601
    }
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, DaemonError>;
