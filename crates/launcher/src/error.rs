//! # Launcher Error Types
//!
//! Every public operation either succeeds completely or returns one of these
//! variants with the launcher state left exactly as it was before the call.
//!
//! ## Error Categories
//!
//! - **Validation**: bad arguments (unknown or duplicate app names, bad names)
//! - **State**: account or controller state forbids the call
//! - **Network**: the account store could not be reached; safe to retry
//! - **Protocol**: a launched app timed out or misbehaved during its handshake
//! - **System**: local I/O, corrupt stored data, configuration

use std::io;

use thiserror::Error;

/// Higher-level grouping of [`LauncherError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorCategory {
    /// Caller supplied arguments that cannot be applied
    Validation,
    /// Account or controller state forbids the operation
    State,
    /// Transient failure reaching the account store
    Network,
    /// Launch handshake failed
    Protocol,
    /// Local I/O, corrupt data or configuration problems
    System,
}

/// Result type for launcher operations.
pub type LauncherResult<T> = Result<T, LauncherError>;

#[derive(Debug, Error)]
pub enum LauncherError {
    /// Credentials do not open the stored account.
    #[error("authentication failed: wrong keyword, pin or password")]
    Authentication,

    #[error("an account already exists for these credentials")]
    AccountExists,

    #[error("no account exists for these credentials")]
    AccountNotFound,

    /// The account store was unreachable. Retrying the same call is safe.
    #[error("network unavailable: {0}")]
    Network(String),

    /// The name is already used by a local or non-local app.
    #[error("app '{0}' has already been added")]
    DuplicateApp(String),

    #[error("app '{0}' not found")]
    NotFound(String),

    #[error("app '{0}' is already available locally")]
    AlreadyLocal(String),

    #[error("invalid app name '{0}'")]
    InvalidAppName(String),

    /// The launched app did not finish its handshake in time.
    #[error("launch of '{app}' timed out while {phase}")]
    LaunchTimeout { app: String, phase: &'static str },

    /// The launched app violated the handshake protocol.
    #[error("launch of '{app}' rejected: {reason}")]
    ProtocolError { app: String, reason: String },

    #[error("failed to start '{app}': {source}")]
    Spawn {
        app: String,
        #[source]
        source: io::Error,
    },

    /// No loopback listener could be opened for a launch.
    #[error("loopback listener unavailable: {0}")]
    Loopback(#[source] io::Error),

    /// The store refused the write or returned data that cannot be read.
    #[error("account storage failure: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// The launcher has been logged out and stopped.
    #[error("launcher has been stopped")]
    Stopped,
}

impl LauncherError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            LauncherError::DuplicateApp(_)
            | LauncherError::NotFound(_)
            | LauncherError::AlreadyLocal(_)
            | LauncherError::InvalidAppName(_) => ErrorCategory::Validation,
            LauncherError::Authentication
            | LauncherError::AccountExists
            | LauncherError::AccountNotFound
            | LauncherError::Stopped => ErrorCategory::State,
            LauncherError::Network(_) => ErrorCategory::Network,
            LauncherError::LaunchTimeout { .. } | LauncherError::ProtocolError { .. } => {
                ErrorCategory::Protocol
            }
            LauncherError::Spawn { .. }
            | LauncherError::Loopback(_)
            | LauncherError::Storage(_)
            | LauncherError::Config(_) => ErrorCategory::System,
        }
    }

    /// Whether repeating the identical call may succeed without the caller
    /// changing anything first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LauncherError::Network(_))
    }
}
