//! Common error types for PartyQ

use thiserror::Error;

/// Common result type for PartyQ operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared by the queue store, the scheduler and the playback gateway
///
/// Every dispatch operation resolves to either a success value or exactly one
/// of these variants; the transport layer maps them to protocol status codes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Referenced track or session is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Track is already queued (in either queue)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Caller input is well-formed but not acceptable
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Caller input could not be parsed
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Caller lacks the privilege for the operation
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Playback service rejected the access token
    ///
    /// Handled inside the gateway by one refresh-and-retry; only surfaces
    /// when the retried call fails the same way.
    #[error("Credentials expired: {0}")]
    CredentialExpired(String),

    /// No playback device is available to the playback service
    #[error("No playback device available: {0}")]
    NoDeviceAvailable(String),

    /// Network error, timeout or server-side failure talking to the playback service
    #[error("Playback service unavailable: {0}")]
    GatewayUnavailable(String),

    /// Core invoked before required setup (e.g. missing credentials)
    #[error("Not initialized: {0}")]
    NotInitialized(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error
    #[error("IO error: {0}")]
    Io(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the distinguished expired-credentials signal
    pub fn is_credential_expired(&self) -> bool {
        matches!(self, Error::CredentialExpired(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
