//! Binding between one client channel and at most one shell session.
//!
//! The relay reacts to client intents and forwards session events to the
//! channel's outbound queue as [`ServerMessage`]s:
//!
//! - a new connect request tears down the current session first
//! - input and resize are queued in arrival order for the current session,
//!   or dropped silently when there is none; a shell that stops reading
//!   never stalls the channel
//! - a client disconnect tears the session down and waits until its
//!   terminal status has been forwarded

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::protocol::{ServerMessage, Utf8Chunker};
use super::session::{SessionContext, SessionEvent, SessionEvents, ShellSession};
use super::types::{ConnectionRequest, TermSize};

/// Client input waiting for the shell
pub const INPUT_BUFFER: usize = 256;

enum Inbound {
    Data(Vec<u8>),
    Resize(TermSize),
}

struct ActiveShell {
    session: Arc<ShellSession>,
    input: mpsc::Sender<Inbound>,
    connect_task: JoinHandle<()>,
    writer: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

/// Per-channel session binding.
pub struct SessionRelay {
    channel_id: Uuid,
    ctx: SessionContext,
    outbound: mpsc::Sender<ServerMessage>,
    active: Option<ActiveShell>,
}

impl SessionRelay {
    pub fn new(channel_id: Uuid, ctx: SessionContext, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            channel_id,
            ctx,
            outbound,
            active: None,
        }
    }

    /// Whether a session is currently bound.
    pub fn has_session(&self) -> bool {
        self.active.is_some()
    }

    /// Start a new session for `request`.
    ///
    /// An invalid request is answered with an error and leaves any current
    /// session untouched. Otherwise the current session is torn down and a
    /// fresh one starts connecting in the background.
    pub async fn on_connect_request(&mut self, request: ConnectionRequest) {
        if let Err(e) = request.validate() {
            debug!("Channel {} rejected connect request: {}", self.channel_id, e);
            let _ = self.outbound.send(ServerMessage::error(e.to_string())).await;
            return;
        }

        self.teardown().await;

        let (session, events) = ShellSession::new(self.ctx.clone());
        let session = Arc::new(session);
        info!(
            "Channel {} starting session {} for {}",
            self.channel_id,
            session.id(),
            request.target()
        );

        let forwarder = tokio::spawn(forward_events(events, self.outbound.clone()));
        let (input, queued) = mpsc::channel(INPUT_BUFFER);
        let writer = tokio::spawn(apply_input(session.clone(), queued));
        let connect_task = {
            let session = session.clone();
            tokio::spawn(async move {
                if let Err(e) = session.connect(request).await {
                    debug!("Session {} connect ended: {}", session.id(), e);
                }
            })
        };

        self.active = Some(ActiveShell {
            session,
            input,
            connect_task,
            writer,
            forwarder,
        });
    }

    /// Queue input for the current session.
    ///
    /// Never waits on the shell. With the queue full the input is dropped
    /// and the client is told.
    pub async fn on_client_input(&self, data: &[u8]) {
        let Some(active) = &self.active else {
            return;
        };
        match active.input.try_send(Inbound::Data(data.to_vec())) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Session {} is not accepting input, dropped {} bytes",
                    active.session.id(),
                    data.len()
                );
                let _ = self
                    .outbound
                    .send(ServerMessage::error("Shell is not accepting input"))
                    .await;
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Session {} input queue closed", active.session.id());
            }
        }
    }

    pub async fn on_client_resize(&self, size: TermSize) {
        let Some(active) = &self.active else {
            return;
        };
        if let Err(e) = active.input.try_send(Inbound::Resize(size)) {
            debug!("Dropping resize for session {}: {}", active.session.id(), e);
        }
    }

    /// Tear down the current session, if any. Idempotent.
    pub async fn on_client_disconnect(&mut self) {
        self.teardown().await;
    }

    async fn teardown(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let session_id = active.session.id();
        if let Some(info) = active.session.info() {
            info!(
                "Channel {} closing session {} to {}@{}:{}",
                self.channel_id, session_id, info.username, info.host, info.port
            );
        }

        active.session.disconnect().await;
        let _ = active.connect_task.await;
        drop(active.input);
        let _ = active.writer.await;
        // Last handle: the event stream closes even for a session that never
        // got as far as reporting a status.
        drop(active.session);
        let _ = active.forwarder.await;

        debug!("Channel {} released session {}", self.channel_id, session_id);
    }
}

/// Apply queued client input to the session in arrival order.
async fn apply_input(session: Arc<ShellSession>, mut queued: mpsc::Receiver<Inbound>) {
    while let Some(inbound) = queued.recv().await {
        let result = match inbound {
            Inbound::Data(data) => session.write(&data).await,
            Inbound::Resize(size) => session.resize(size).await,
        };
        if let Err(e) = result {
            debug!("Dropping input for session {}: {}", session.id(), e);
        }
    }
}

/// Forward one session's events until its terminal status or until the
/// outbound queue closes.
async fn forward_events(mut events: SessionEvents, outbound: mpsc::Sender<ServerMessage>) {
    let mut decoder = Utf8Chunker::default();

    while let Some(event) = events.recv().await {
        let message = match event {
            SessionEvent::Output(bytes) => {
                let data = decoder.decode(&bytes);
                if data.is_empty() {
                    continue;
                }
                ServerMessage::Output { data }
            }
            SessionEvent::Error(message) => ServerMessage::Error { message },
            SessionEvent::Status(status) => {
                if status.is_terminal() {
                    let data = decoder.finish();
                    if !data.is_empty() && outbound.send(ServerMessage::Output { data }).await.is_err() {
                        return;
                    }
                }
                ServerMessage::status(status)
            }
        };

        let terminal = message.is_terminal_status();
        if outbound.send(message).await.is_err() || terminal {
            return;
        }
    }
}
