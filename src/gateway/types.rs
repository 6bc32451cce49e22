//! Core value types shared by the tunnel, session and relay layers.

use serde::{Deserialize, Serialize};

use super::error::SessionError;

/// Default SSH port when the request does not carry one
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default terminal rows when the client does not report a size
pub const DEFAULT_ROWS: u16 = 24;

/// Default terminal columns when the client does not report a size
pub const DEFAULT_COLS: u16 = 80;

/// Terminal window size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermSize {
    pub rows: u16,
    pub cols: u16,
}

impl TermSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Clamp both dimensions to a minimum of one cell.
    pub fn clamped(self) -> Self {
        Self {
            rows: self.rows.max(1),
            cols: self.cols.max(1),
        }
    }

    /// Initial size for a new shell: zero dimensions take the defaults.
    pub fn or_default(self) -> Self {
        Self {
            rows: if self.rows == 0 { DEFAULT_ROWS } else { self.rows },
            cols: if self.cols == 0 { DEFAULT_COLS } else { self.cols },
        }
    }
}

impl Default for TermSize {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS, DEFAULT_COLS)
    }
}

/// Parameters for one shell connection attempt.
///
/// Immutable once accepted by a session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Option<String>,
    pub initial_size: TermSize,
}

impl ConnectionRequest {
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            credential: None,
            initial_size: TermSize::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_size(mut self, size: TermSize) -> Self {
        self.initial_size = size;
        self
    }

    /// Host and username are required; everything else has a default.
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.host.trim().is_empty() || self.username.trim().is_empty() {
            return Err(SessionError::Validation(
                SessionError::MISSING_HOST_OR_USERNAME.to_string(),
            ));
        }
        Ok(())
    }

    /// `user@host:port`, for log lines.
    pub fn target(&self) -> String {
        format!("{}@{}:{}", self.username, self.host, self.port)
    }
}

// Keeps the credential out of logs.
impl std::fmt::Debug for ConnectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRequest")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("credential", &self.credential.as_ref().map(|_| "***"))
            .field("initial_size", &self.initial_size)
            .finish()
    }
}

/// Lifecycle status reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Tunnel open and authentication in progress
    Connecting,
    /// Interactive shell established
    Connected,
    /// Session ended cleanly
    Disconnected,
    /// Session ended abruptly mid-stream
    Lost,
}

impl SessionStatus {
    /// Disconnected and Lost end a session; nothing follows them.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Disconnected | SessionStatus::Lost)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Lost => write!(f, "lost"),
        }
    }
}

/// Session metadata for tracking connection information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// Tunnel strategy used, `direct` or `process`
    pub strategy: String,
    /// When the shell became ready (RFC3339 format)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected_at: Option<String>,
}
