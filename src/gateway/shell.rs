//! Shell negotiation seam.
//!
//! A [`ShellConnector`] turns an opened tunnel stream into an authenticated
//! interactive shell. The session state machine only sees the resulting
//! [`ShellLink`]: an input half for keystrokes and window changes, and an
//! output half producing chunks in arrival order.
//!
//! The production implementation is [`crate::gateway::ssh::SshConnector`].
//! Keeping the seam as a trait lets the session and relay be driven by
//! scripted shells in tests.

use std::sync::Arc;

use async_trait::async_trait;

use super::error::SessionError;
use super::tunnel::TunnelStream;
use super::types::{ConnectionRequest, TermSize};

/// One read from a shell's output.
#[derive(Debug)]
pub enum ShellRead {
    /// A chunk of output, in stream order.
    Data(Vec<u8>),
    /// The shell closed its stream cleanly.
    Eof,
    /// The stream broke.
    Failed(SessionError),
}

/// Write side of an established shell.
#[async_trait]
pub trait ShellInput: Send + Sync {
    /// Forward bytes verbatim to the shell.
    async fn write(&self, data: &[u8]) -> Result<(), SessionError>;

    /// Send a window-change request.
    async fn resize(&self, size: TermSize) -> Result<(), SessionError>;

    /// Close the shell channel and the authenticated connection.
    async fn close(&self);
}

/// Read side of an established shell.
#[async_trait]
pub trait ShellOutput: Send {
    async fn read(&mut self) -> ShellRead;
}

/// An established interactive shell.
pub struct ShellLink {
    pub input: Arc<dyn ShellInput>,
    pub output: Box<dyn ShellOutput>,
}

/// Authenticates over a tunnel stream and opens an interactive shell.
#[async_trait]
pub trait ShellConnector: Send + Sync {
    async fn open_shell(
        &self,
        stream: TunnelStream,
        request: &ConnectionRequest,
        size: TermSize,
    ) -> Result<ShellLink, SessionError>;
}
