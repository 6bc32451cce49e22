//! SSH shell negotiation over an opened tunnel.
//!
//! ## Negotiation
//!
//! 1. **Handshake**: run the SSH transport over the tunnel stream with
//!    `russh::client::connect_stream`.
//! 2. **Authentication**: username plus optional password through the
//!    [`AuthChain`].
//! 3. **Shell**: open a session channel, request a PTY at the current
//!    size, request a shell and wait for the server to accept it.
//!
//! Output that arrives before the shell acceptance is buffered and handed
//! out first, so nothing the server sends is lost or reordered.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Msg};
use russh::{ChannelMsg, ChannelReadHalf, ChannelWriteHalf, Disconnect, keys};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::auth::{AuthChain, AuthStrategy};
use super::config::GatewaySettings;
use super::error::SessionError;
use super::shell::{ShellConnector, ShellInput, ShellLink, ShellOutput, ShellRead};
use super::tunnel::TunnelStream;
use super::types::{ConnectionRequest, TermSize};

/// Client handler for russh that accepts all host keys.
///
/// Similar to `StrictHostKeyChecking=no` in OpenSSH. The key algorithm is
/// logged so operators can see what the gateway talked to.
pub struct GatewayClientHandler;

impl client::Handler for GatewayClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!("Accepting server key ({})", server_public_key.algorithm());
        Ok(true)
    }
}

/// Build russh client configuration.
///
/// - No inactivity timeout: interactive shells idle for long periods
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` flag
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// [`ShellConnector`] backed by russh.
pub struct SshConnector {
    compress: bool,
    term_type: String,
}

impl SshConnector {
    pub fn new(settings: &GatewaySettings) -> Self {
        Self {
            compress: settings.compress,
            term_type: settings.term_type.clone(),
        }
    }
}

#[async_trait]
impl ShellConnector for SshConnector {
    async fn open_shell(
        &self,
        stream: TunnelStream,
        request: &ConnectionRequest,
        size: TermSize,
    ) -> Result<ShellLink, SessionError> {
        let config = build_client_config(self.compress);

        let mut handle = client::connect_stream(config, stream, GatewayClientHandler)
            .await
            .map_err(|e| SessionError::Shell(format!("SSH handshake failed: {}", e)))?;

        let auth_chain = AuthChain::for_credential(request.credential.as_deref());
        if !auth_chain.authenticate(&mut handle, &request.username).await? {
            return Err(SessionError::Auth(
                "no authentication methods succeeded".to_string(),
            ));
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| SessionError::Shell(format!("failed to open channel: {}", e)))?;

        channel
            .request_pty(
                false,
                &self.term_type,
                u32::from(size.cols),
                u32::from(size.rows),
                0,
                0,
                &[],
            )
            .await
            .map_err(|e| SessionError::Shell(format!("PTY request failed: {}", e)))?;
        channel
            .request_shell(true)
            .await
            .map_err(|e| SessionError::Shell(format!("shell request failed: {}", e)))?;

        let (mut read_half, write_half) = channel.split();
        let pending = await_shell_reply(&mut read_half).await?;

        Ok(ShellLink {
            input: Arc::new(SshShellInput {
                writer: Mutex::new(write_half),
                handle,
            }),
            output: Box::new(SshShellOutput {
                reader: read_half,
                pending,
                eof: false,
            }),
        })
    }
}

/// Wait for the server to accept or refuse the shell request, buffering
/// any output that races ahead of the reply.
async fn await_shell_reply(
    reader: &mut ChannelReadHalf,
) -> Result<VecDeque<Vec<u8>>, SessionError> {
    let mut pending = VecDeque::new();
    loop {
        match reader.wait().await {
            Some(ChannelMsg::Success) => return Ok(pending),
            Some(ChannelMsg::Failure) => {
                return Err(SessionError::Shell("shell request refused".to_string()));
            }
            Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                pending.push_back(data.to_vec());
            }
            Some(ChannelMsg::Close) | None => {
                return Err(SessionError::Shell(
                    "channel closed during shell negotiation".to_string(),
                ));
            }
            Some(_) => {}
        }
    }
}

struct SshShellInput {
    writer: Mutex<ChannelWriteHalf<Msg>>,
    handle: client::Handle<GatewayClientHandler>,
}

#[async_trait]
impl ShellInput for SshShellInput {
    async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        self.writer
            .lock()
            .await
            .data(data)
            .await
            .map_err(|e| SessionError::Io(format!("failed to write to shell: {}", e)))
    }

    async fn resize(&self, size: TermSize) -> Result<(), SessionError> {
        self.writer
            .lock()
            .await
            .window_change(u32::from(size.cols), u32::from(size.rows), 0, 0)
            .await
            .map_err(|e| SessionError::Io(format!("failed to resize shell: {}", e)))
    }

    async fn close(&self) {
        if let Err(e) = self.writer.lock().await.close().await {
            debug!("Shell channel already closed: {}", e);
        }
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            warn!("Error during disconnect: {}", e);
        }
    }
}

struct SshShellOutput {
    reader: ChannelReadHalf,
    pending: VecDeque<Vec<u8>>,
    eof: bool,
}

#[async_trait]
impl ShellOutput for SshShellOutput {
    async fn read(&mut self) -> ShellRead {
        if let Some(chunk) = self.pending.pop_front() {
            return ShellRead::Data(chunk);
        }

        loop {
            match self.reader.wait().await {
                // With a PTY the remote merges stderr into the same stream
                Some(ChannelMsg::Data { data }) | Some(ChannelMsg::ExtendedData { data, .. }) => {
                    return ShellRead::Data(data.to_vec());
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    debug!("Remote shell exited with status {}", exit_status);
                }
                Some(ChannelMsg::Eof) => self.eof = true,
                Some(ChannelMsg::Close) => return ShellRead::Eof,
                Some(_) => {}
                None if self.eof => return ShellRead::Eof,
                None => {
                    return ShellRead::Failed(SessionError::Io(
                        "connection closed unexpectedly".to_string(),
                    ));
                }
            }
        }
    }
}
