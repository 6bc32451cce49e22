//! Shell session lifecycle.
//!
//! A [`ShellSession`] owns one remote interactive shell: the tunnel that
//! carries it, the negotiated shell, and the background reader that turns
//! shell output into [`SessionEvent`]s.
//!
//! # States
//!
//! ```text
//! Idle --connect--> Connecting --shell ready--> ShellReady
//!                       |                           |
//!                       +------> Closed / Failed <--+
//! ```
//!
//! Every session that reports `connecting` reports exactly one terminal
//! status (`disconnected` or `lost`) and nothing after it. Resources are
//! released before the terminal status is emitted, so an observer that
//! sees it can rely on the tunnel being gone.
//!
//! # Cancellation
//!
//! [`ShellSession::disconnect`] cancels an in-flight connect at its next
//! await point, waits for the attempt to clean up after itself and only
//! then tears the session down.
//!
//! # Flow control
//!
//! At most [`OUTPUT_WINDOW`] output chunks are queued ahead of the consumer.
//! With the window full the reader stops reading, so a slow consumer pushes
//! back on the shell instead of growing the queue. Status and error events
//! do not count against the window.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::GatewaySettings;
use super::error::{SessionError, TunnelError};
use super::shell::{ShellConnector, ShellInput, ShellOutput, ShellRead};
use super::tunnel::{self, TunnelGuard, TunnelMonitor, TunnelPolicy, TunnelStrategy};
use super::types::{ConnectionRequest, SessionInfo, SessionStatus, TermSize};

/// How long to wait for a tunnel helper's exit report after the shell
/// stream broke. A helper that died explains the broken stream better than
/// the stream error itself.
const EXIT_GRACE: Duration = Duration::from_millis(250);

/// Output chunks that may be queued ahead of the event consumer.
pub const OUTPUT_WINDOW: usize = 64;

/// Notification from a session, delivered in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Status(SessionStatus),
    Output(Vec<u8>),
    Error(String),
}

/// Receiving end of a session's events.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
    window: Arc<Semaphore>,
}

impl SessionEvents {
    /// Next event, or `None` once the session is gone and all events were
    /// delivered.
    ///
    /// Taking an output chunk lets the reader fetch another one.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        let event = self.rx.recv().await;
        if let Some(SessionEvent::Output(_)) = &event {
            self.window.add_permits(1);
        }
        event
    }
}

impl Drop for SessionEvents {
    fn drop(&mut self) {
        // Nobody is listening: let the reader drain the shell unthrottled
        self.window.close();
    }
}

/// Externally visible session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    ShellReady,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

/// Collaborators shared by all sessions of a gateway.
#[derive(Clone)]
pub struct SessionContext {
    pub settings: Arc<GatewaySettings>,
    pub policy: Arc<dyn TunnelPolicy>,
    pub connector: Arc<dyn ShellConnector>,
}

impl SessionContext {
    pub fn new(
        settings: GatewaySettings,
        policy: impl TunnelPolicy + 'static,
        connector: impl ShellConnector + 'static,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            policy: Arc::new(policy),
            connector: Arc::new(connector),
        }
    }
}

/// Resources of an established shell.
struct Live {
    input: Arc<dyn ShellInput>,
    guard: TunnelGuard,
}

impl Live {
    async fn release(self) {
        self.input.close().await;
        self.guard.close().await;
    }
}

enum Phase {
    Idle,
    Connecting,
    Ready(Live),
    Closed { failed: bool },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Connecting => SessionState::Connecting,
            Phase::Ready(_) => SessionState::ShellReady,
            Phase::Closed { failed: false } => SessionState::Closed,
            Phase::Closed { failed: true } => SessionState::Failed,
        }
    }
}

/// How a session ended.
enum Termination {
    /// Remote end-of-data or an explicit disconnect
    Clean,
    /// The connect attempt failed
    Rejected(SessionError),
    /// The stream broke after the shell was established
    Lost(SessionError),
}

impl Termination {
    fn is_failure(&self) -> bool {
        !matches!(self, Termination::Clean)
    }

    fn into_events(self) -> Vec<SessionEvent> {
        match self {
            Termination::Clean => vec![SessionEvent::Status(SessionStatus::Disconnected)],
            Termination::Rejected(err) => vec![
                SessionEvent::Error(err.to_string()),
                SessionEvent::Status(SessionStatus::Disconnected),
            ],
            Termination::Lost(err) => vec![
                SessionEvent::Error(err.to_string()),
                SessionEvent::Status(SessionStatus::Lost),
            ],
        }
    }
}

struct Inner {
    phase: Phase,
    size: TermSize,
    info: Option<SessionInfo>,
}

/// State shared between the session handle and its reader task.
struct Shared {
    id: Uuid,
    inner: Mutex<Inner>,
    events: mpsc::UnboundedSender<SessionEvent>,
    window: Arc<Semaphore>,
    done: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a panic elsewhere; the state is still
        // consistent because every transition is a single assignment.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Emit a non-terminal event if the session has not ended.
    ///
    /// Checked under the state lock, so nothing slips out after a terminal
    /// transition.
    fn emit_live(&self, event: SessionEvent) {
        let inner = self.lock();
        if matches!(inner.phase, Phase::Connecting | Phase::Ready(_)) {
            let _ = self.events.send(event);
        }
    }

    /// Move to a terminal state, release resources, then report.
    ///
    /// Only the first caller does anything; later calls return at once.
    async fn finish(&self, termination: Termination) {
        let (live, report) = {
            let mut inner = self.lock();
            let closed = Phase::Closed {
                failed: termination.is_failure(),
            };
            match std::mem::replace(&mut inner.phase, closed) {
                previous @ Phase::Closed { .. } => {
                    inner.phase = previous;
                    return;
                }
                Phase::Idle => (None, false),
                Phase::Connecting => (None, true),
                Phase::Ready(live) => (Some(live), true),
            }
        };

        if let Some(live) = live {
            live.release().await;
        }
        if report {
            for event in termination.into_events() {
                let _ = self.events.send(event);
            }
        }
        self.done.send_replace(true);
        debug!("Session {} finished", self.id);
    }

    async fn wait_done(&self) {
        let mut done = self.done.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

/// One remote interactive shell.
pub struct ShellSession {
    shared: Arc<Shared>,
    ctx: SessionContext,
    cancel: CancellationToken,
    attempt: tokio::sync::Mutex<()>,
}

impl ShellSession {
    /// Create an idle session and the receiver for its events.
    pub fn new(ctx: SessionContext) -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let window = Arc::new(Semaphore::new(OUTPUT_WINDOW));
        let (done, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            id: Uuid::new_v4(),
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                size: TermSize::default(),
                info: None,
            }),
            events: tx,
            window: window.clone(),
            done,
        });

        let session = Self {
            shared,
            ctx,
            cancel: CancellationToken::new(),
            attempt: tokio::sync::Mutex::new(()),
        };
        (session, SessionEvents { rx, window })
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().phase.state()
    }

    /// Terminal size currently recorded for the shell.
    pub fn size(&self) -> TermSize {
        self.shared.lock().size
    }

    /// Connection metadata, available once a connect was accepted.
    pub fn info(&self) -> Option<SessionInfo> {
        self.shared.lock().info.clone()
    }

    /// Open the tunnel, authenticate and start an interactive shell.
    ///
    /// Returns once the shell is ready or the attempt ended. Failures are
    /// also reported as events, followed by a `disconnected` status. An
    /// invalid request is rejected before anything is emitted.
    pub async fn connect(&self, request: ConnectionRequest) -> Result<(), SessionError> {
        request.validate()?;

        let Ok(_attempt) = self.attempt.try_lock() else {
            return Err(SessionError::AlreadyConnected);
        };

        let strategy = self.ctx.policy.select(&request);
        {
            let mut inner = self.shared.lock();
            match inner.phase {
                Phase::Idle => {}
                Phase::Connecting | Phase::Ready(_) => return Err(SessionError::AlreadyConnected),
                Phase::Closed { .. } => return Err(SessionError::AlreadyClosed),
            }
            inner.phase = Phase::Connecting;
            inner.size = request.initial_size.or_default();
            inner.info = Some(SessionInfo {
                session_id: self.shared.id.to_string(),
                host: request.host.clone(),
                port: request.port,
                username: request.username.clone(),
                strategy: strategy.kind().to_string(),
                connected_at: None,
            });
            let _ = self
                .shared
                .events
                .send(SessionEvent::Status(SessionStatus::Connecting));
        }

        info!(
            "Session {} connecting to {} via {} tunnel",
            self.shared.id,
            request.target(),
            strategy.kind()
        );

        match self.establish(&strategy, &request).await {
            Ok((live, negotiated, output, monitor)) => self.go_live(live, negotiated, output, monitor).await,
            Err(SessionError::Cancelled) => {
                debug!("Session {} connect cancelled", self.shared.id);
                Err(SessionError::Cancelled)
            }
            Err(err) => {
                if err.is_auth() {
                    warn!("Session {} authentication failed: {}", self.shared.id, err);
                } else {
                    warn!("Session {} connect failed: {}", self.shared.id, err);
                }
                self.shared.finish(Termination::Rejected(err.clone())).await;
                Err(err)
            }
        }
    }

    /// Open the tunnel and negotiate the shell within the connect timeout.
    ///
    /// On failure everything acquired so far has been released.
    async fn establish(
        &self,
        strategy: &TunnelStrategy,
        request: &ConnectionRequest,
    ) -> Result<(Live, TermSize, Box<dyn ShellOutput>, TunnelMonitor), SessionError> {
        let limit = self.ctx.settings.connect_timeout;
        let deadline = tokio::time::Instant::now() + limit;

        let tunnel = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
            opened = tokio::time::timeout_at(deadline, tunnel::open(strategy, &self.ctx.settings)) => {
                opened.map_err(|_| {
                    TunnelError::ConnectFailed(format!(
                        "timed out after {:?} opening {} tunnel",
                        limit,
                        strategy.kind()
                    ))
                })??
            }
        };
        let (stream, guard, mut monitor) = tunnel.into_parts();

        let size = self.size();
        let negotiated = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::Cancelled),
            failure = monitor.failed() => Err(SessionError::from(failure)),
            link = tokio::time::timeout_at(deadline, self.ctx.connector.open_shell(stream, request, size)) => {
                link.unwrap_or(Err(SessionError::Timeout(limit)))
            }
        };

        match negotiated {
            Ok(link) => Ok((
                Live {
                    input: link.input,
                    guard,
                },
                size,
                link.output,
                monitor,
            )),
            Err(err) => {
                let err = match err {
                    SessionError::Cancelled | SessionError::Timeout(_) | SessionError::Tunnel(_) => err,
                    other => monitor
                        .failure_within(EXIT_GRACE)
                        .await
                        .map(SessionError::from)
                        .unwrap_or(other),
                };
                guard.close().await;
                Err(err)
            }
        }
    }

    /// Publish an established shell and start reading from it.
    async fn go_live(
        &self,
        live: Live,
        negotiated: TermSize,
        output: Box<dyn ShellOutput>,
        monitor: TunnelMonitor,
    ) -> Result<(), SessionError> {
        let input = live.input.clone();
        let helper = live.guard.pid();
        let published = {
            let mut inner = self.shared.lock();
            if self.cancel.is_cancelled() || !matches!(inner.phase, Phase::Connecting) {
                Err(live)
            } else {
                inner.phase = Phase::Ready(live);
                if let Some(info) = inner.info.as_mut() {
                    info.connected_at = Some(Utc::now().to_rfc3339());
                }
                let _ = self
                    .shared
                    .events
                    .send(SessionEvent::Status(SessionStatus::Connected));
                Ok((inner.size, inner.info.clone()))
            }
        };
        let (current, info) = match published {
            Ok(published) => published,
            Err(live) => {
                live.release().await;
                return Err(SessionError::Cancelled);
            }
        };

        if let Some(info) = info {
            info!(
                "Session {} shell ready: {}@{}:{} via {} tunnel{} at {}",
                info.session_id,
                info.username,
                info.host,
                info.port,
                info.strategy,
                helper.map(|pid| format!(" (helper pid {})", pid)).unwrap_or_default(),
                info.connected_at.as_deref().unwrap_or("-")
            );
        }

        tokio::spawn(pump(
            self.shared.clone(),
            output,
            monitor,
            self.cancel.clone(),
        ));

        // A resize that arrived while negotiating
        if current != negotiated
            && let Err(e) = input.resize(current).await
        {
            debug!("Session {} deferred resize failed: {}", self.shared.id, e);
        }
        Ok(())
    }

    /// Forward bytes to the shell verbatim.
    ///
    /// A write stuck on a shell that stopped reading gives up with
    /// `AlreadyClosed` once the session is disconnected.
    pub async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let input = {
            let inner = self.shared.lock();
            match &inner.phase {
                Phase::Ready(live) => live.input.clone(),
                Phase::Idle | Phase::Connecting => return Err(SessionError::NotReady),
                Phase::Closed { .. } => return Err(SessionError::AlreadyClosed),
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::AlreadyClosed),
            written = input.write(data) => written,
        }
    }

    /// Record a new terminal size and forward it to the shell.
    ///
    /// Dimensions are clamped to at least one cell. While connecting the
    /// size is only recorded and applied once the shell is ready.
    pub async fn resize(&self, size: TermSize) -> Result<(), SessionError> {
        let size = size.clamped();
        let input = {
            let mut inner = self.shared.lock();
            let input = match &inner.phase {
                Phase::Ready(live) => Some(live.input.clone()),
                Phase::Connecting => None,
                Phase::Idle => return Err(SessionError::NotReady),
                Phase::Closed { .. } => return Err(SessionError::AlreadyClosed),
            };
            inner.size = size;
            input
        };
        let Some(input) = input else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SessionError::AlreadyClosed),
            resized = input.resize(size) => resized,
        }
    }

    /// End the session and release its resources.
    ///
    /// Cancels an in-flight connect. Idempotent: later calls wait for the
    /// first teardown to complete and return.
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        let _attempt = self.attempt.lock().await;
        self.shared.finish(Termination::Clean).await;
        self.shared.wait_done().await;
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read shell output until the stream ends, fails or the session is
/// cancelled.
async fn pump(
    shared: Arc<Shared>,
    mut output: Box<dyn ShellOutput>,
    mut monitor: TunnelMonitor,
    cancel: CancellationToken,
) {
    let termination = loop {
        // Wait for room in the output window before reading further
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            credit = shared.window.acquire() => {
                // A closed window means the consumer is gone
                if let Ok(credit) = credit {
                    credit.forget();
                }
            }
            failure = monitor.failed() => {
                warn!("Session {} lost: {}", shared.id, failure);
                break Termination::Lost(failure.into());
            }
        }

        tokio::select! {
            biased;
            // Whoever cancelled owns the teardown
            _ = cancel.cancelled() => return,
            read = output.read() => match read {
                ShellRead::Data(chunk) => shared.emit_live(SessionEvent::Output(chunk)),
                ShellRead::Eof => {
                    info!("Session {} shell closed by remote", shared.id);
                    break Termination::Clean;
                }
                ShellRead::Failed(err) => {
                    let err = monitor
                        .failure_within(EXIT_GRACE)
                        .await
                        .map(SessionError::from)
                        .unwrap_or(err);
                    warn!("Session {} lost: {}", shared.id, err);
                    break Termination::Lost(err);
                }
            },
            failure = monitor.failed() => {
                warn!("Session {} lost: {}", shared.id, failure);
                break Termination::Lost(failure.into());
            }
        }
    };
    shared.finish(termination).await;
}
