//! Error types shared by the session registry, the chunker and request
//! validation.
//!
//! ## Error Cases
//! - `Full` / `Duplicate`: admission was refused by the registry.
//! - `NotFound` / `Busy`: a token lookup failed or the token is already
//!   serving a prediction.
//! - `InvalidToken` / `InvalidRequest`: the client sent something that does
//!   not satisfy the protocol.
//! - `InvalidGroupSize`: a chunker was built with a group size of zero.
//! - `Model` / `Tokenizer`: a collaborator failed; fatal to the session only.
//! - `ServiceShutdown`: the service no longer accepts work.

/// Result alias used across the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for session admission and generation.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The registry already holds its maximum number of sessions.
    #[error("Session capacity reached")]
    Full,

    /// The origin already owns a live session token.
    #[error("Origin already holds a session")]
    Duplicate,

    /// The token is not (or no longer) registered.
    #[error("Session token not found")]
    NotFound,

    /// Another prediction flow currently holds the token.
    #[error("Session token is busy")]
    Busy,

    /// The presented string is not a well-formed session token.
    #[error("Malformed session token")]
    InvalidToken,

    /// The completion request violated a field constraint.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Chunkers need a group size of at least one token.
    #[error("Group size must be greater than 0")]
    InvalidGroupSize,

    /// The language model failed to start or continue generation.
    #[error("Model error: {context}")]
    Model { context: String },

    /// The tokenizer failed to encode or decode.
    #[error("Tokenizer error: {context}")]
    Tokenizer { context: String },

    /// The service is shutting down and refuses new work.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors raised by the admission step of the
    /// registration protocol.
    pub const fn is_admission(&self) -> bool {
        matches!(self, Self::Full | Self::Duplicate)
    }
}
