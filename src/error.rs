//! Error types for the gatelink protocol.

use thiserror::Error;

/// Result type alias for gatelink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol handling.
///
/// Internal detail (key sizes, decode failures, gate exception text) is for
/// logs only; peers see the coarse strings from [`Error::user_message`].
#[derive(Error, Debug)]
pub enum Error {
    /// Inbound bytes did not decode to a protocol envelope
    #[error("invalid message format: {0}")]
    InvalidMessage(String),

    /// Envelope decoded but named no known command
    #[error("unknown command")]
    UnknownCommand,

    /// No session matches the given identifier
    #[error("session not found")]
    SessionNotFound,

    /// Activation attempted on a session whose address is already set
    #[error("session already activated")]
    SessionActivated,

    /// A required request field is absent
    #[error("missing required parameters")]
    MissingParameters,

    /// Cryptographic operation failed
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Signature did not verify against the identity's signing key
    #[error("invalid signature")]
    InvalidSignature,

    /// A key had the wrong length for its scheme
    #[error("bad key size: expected {expected} bytes, got {actual}")]
    KeySize { expected: usize, actual: usize },

    /// Gate connect attempt exceeded the connect timeout
    #[error("gate connection timeout after {0}ms")]
    GateTimeout(u64),

    /// Gate could not be reached
    #[error("gate unavailable: {0}")]
    GateUnavailable(String),

    /// Gate connection closed while requests were pending
    #[error("gate connection closed")]
    GateClosed,

    /// Gate answered a request with a non-ok status
    #[error("gate rejected request: {0}")]
    GateRejected(String),

    /// A pending gate request exceeded its own timeout
    #[error("gate request timed out")]
    RequestTimeout,

    /// An injected hook returned an error
    #[error("hook error: {0}")]
    Hook(String),

    /// Network I/O error
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new cryptographic error
    pub fn crypto(msg: impl Into<String>) -> Self {
        Error::Crypto(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new hook error
    pub fn hook(msg: impl Into<String>) -> Self {
        Error::Hook(msg.into())
    }

    /// The string a protocol peer is allowed to see for this error.
    ///
    /// Crypto failures collapse to parameter/signature wording; everything
    /// else keeps its own short message. Gate errors go through
    /// [`Error::gate_user_message`] instead.
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidMessage(_) => "Invalid message format".into(),
            Error::UnknownCommand => "Unknown command".into(),
            Error::SessionNotFound => "Session not found".into(),
            Error::SessionActivated => "Session already activated".into(),
            Error::MissingParameters => "Missing required parameters".into(),
            Error::Crypto(_) | Error::KeySize { .. } => "Invalid parameters".into(),
            Error::InvalidSignature => "Invalid signature".into(),
            Error::Hook(_) => "Internal error".into(),
            other => other.gate_user_message(),
        }
    }

    /// Classify a gate-side failure into the small fixed set of user-facing
    /// messages. Matches on the cause text, so wrapped transport errors
    /// classify the same way as our own variants.
    pub fn gate_user_message(&self) -> String {
        let cause = self.to_string().to_lowercase();
        if cause.contains("timeout") || cause.contains("timed out") {
            "Authentication service timed out".into()
        } else if cause.contains("connect") || cause.contains("unavailable") || cause.contains("closed") {
            "Authentication service unavailable".into()
        } else {
            "Failed to initialize authentication".into()
        }
    }

    /// Whether the offending connection should be terminated after the
    /// error reply (protocol and session errors always are).
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            Error::InvalidMessage(_)
                | Error::UnknownCommand
                | Error::SessionNotFound
                | Error::SessionActivated
                | Error::MissingParameters
        )
    }
}
