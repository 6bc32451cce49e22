//! Error taxonomy for tunnels and shell sessions.
//!
//! Errors are split by the layer that raises them:
//!
//! 1. **Tunnel errors**: failures of the byte pipe itself. A direct socket
//!    could not be opened, a helper process could not be spawned, or the
//!    helper exited while the pipe was still in use.
//!
//! 2. **Session errors**: everything above the pipe, including request
//!    validation, authentication, shell negotiation and misuse of the
//!    session lifecycle (connecting twice, writing after close).
//!
//! # Retry Classification
//!
//! Only direct-connect failures that look transient are retried.
//! Spawn failures, process exits and authentication failures never are:
//! retrying a rejected password only risks an account lockout.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Connection error patterns that indicate transient failures.
///
/// Matched against the lower-cased message of a [`TunnelError::ConnectFailed`]
/// when the underlying `io::ErrorKind` was not available.
const TRANSIENT_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "timed out",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
];

/// Failure of the transport that carries a shell session's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    /// Direct connection refused, timed out or failed to resolve.
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    /// The tunnel helper process could not be started.
    #[error("failed to start tunnel process: {0}")]
    SpawnFailed(String),

    /// The tunnel helper exited before the pipe was closed.
    ///
    /// Carries `-1` when the process was terminated by a signal.
    #[error("tunnel process exited with code {0}")]
    ProcessExited(i32),
}

impl TunnelError {
    /// Build a [`TunnelError::ConnectFailed`] from a socket error.
    pub fn connect(err: &io::Error) -> Self {
        TunnelError::ConnectFailed(err.to_string())
    }

    /// Returns true if reopening the tunnel may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            TunnelError::ConnectFailed(message) => {
                let lower = message.to_lowercase();
                TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
            }
            TunnelError::SpawnFailed(_) | TunnelError::ProcessExited(_) => false,
        }
    }
}

/// Error raised by a shell session or while negotiating one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The connection request is missing required fields.
    #[error("{0}")]
    Validation(String),

    /// A connect is in flight or a shell is already established.
    #[error("session is already connected")]
    AlreadyConnected,

    /// The session reached a terminal state.
    #[error("session is already closed")]
    AlreadyClosed,

    /// The shell is not established yet.
    #[error("session is not ready")]
    NotReady,

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    /// Credentials were rejected or authentication could not run.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// PTY or shell request refused, or the SSH handshake failed.
    #[error("shell error: {0}")]
    Shell(String),

    /// Reading from or writing to the shell stream failed mid-session.
    #[error("stream error: {0}")]
    Io(String),

    /// Establishing the shell took longer than the connect timeout.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// The attempt was abandoned by an explicit disconnect.
    #[error("connection attempt cancelled")]
    Cancelled,
}

impl SessionError {
    /// Message reported when the request lacks a host or username.
    pub const MISSING_HOST_OR_USERNAME: &'static str = "Missing host or username";

    /// Returns true for errors that are always authentication related.
    pub fn is_auth(&self) -> bool {
        matches!(self, SessionError::Auth(_))
    }
}
