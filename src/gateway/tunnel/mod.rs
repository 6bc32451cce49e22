//! Transport tunnels: how a shell session's bytes reach the remote host.
//!
//! A tunnel is opened from a [`TunnelStrategy`] and yields three parts:
//!
//! - a [`TunnelStream`], the duplex byte pipe handed to the SSH layer
//! - a [`TunnelGuard`], which owns the OS resource behind the pipe and
//!   releases it on [`TunnelGuard::close`] or drop
//! - a [`TunnelMonitor`], which resolves if the tunnel fails on its own
//!   (the helper process exiting while the pipe is still in use)
//!
//! Strategy selection is pluggable through [`TunnelPolicy`]. The default
//! [`DomainPolicy`] routes configured hosts through a helper process and
//! everything else over a direct TCP connection.

mod direct;
mod process;

use std::future::pending;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::config::{GatewaySettings, TunnelConfig};
use super::error::TunnelError;
use super::types::ConnectionRequest;

pub use process::ProcessStream;

/// Byte pipe usable as an SSH transport.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Type-erased tunnel stream.
pub type TunnelStream = Box<dyn DuplexStream>;

/// How to reach the remote host for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelStrategy {
    /// Plain TCP connection to `host:port`.
    Direct { host: String, port: u16 },
    /// Local helper process whose stdin/stdout carry the SSH stream.
    ProcessBridge { command: String, args: Vec<String> },
}

impl TunnelStrategy {
    /// Short name for logs and session metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            TunnelStrategy::Direct { .. } => "direct",
            TunnelStrategy::ProcessBridge { .. } => "process",
        }
    }
}

/// Chooses a tunnel strategy for a connection request.
///
/// Recomputed for every connection attempt; nothing is cached.
pub trait TunnelPolicy: Send + Sync {
    fn select(&self, request: &ConnectionRequest) -> TunnelStrategy;
}

/// Routes hosts that match a configured tunneling domain through the
/// helper process; all other hosts connect directly.
///
/// A host matches a domain when it equals it or is a subdomain of it.
pub struct DomainPolicy {
    config: TunnelConfig,
}

impl DomainPolicy {
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }

    fn matches(&self, host: &str) -> bool {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        self.config.domains.iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl TunnelPolicy for DomainPolicy {
    fn select(&self, request: &ConnectionRequest) -> TunnelStrategy {
        if !self.matches(&request.host) {
            return TunnelStrategy::Direct {
                host: request.host.clone(),
                port: request.port,
            };
        }

        let port = request.port.to_string();
        let args = self
            .config
            .args
            .iter()
            .map(|arg| arg.replace("{host}", &request.host).replace("{port}", &port))
            .collect();

        TunnelStrategy::ProcessBridge {
            command: self.config.command.clone(),
            args,
        }
    }
}

/// Owner of the OS resource behind a tunnel.
///
/// For a process bridge this cancels and reaps the helper; for a direct
/// socket the stream itself owns the descriptor, so the guard is inert.
pub struct TunnelGuard {
    cancel: CancellationToken,
    reaper: Option<JoinHandle<()>>,
    pid: Option<u32>,
}

impl TunnelGuard {
    fn inert() -> Self {
        Self {
            cancel: CancellationToken::new(),
            reaper: None,
            pid: None,
        }
    }

    /// Helper process id, if this tunnel owns one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Release the tunnel and wait until the helper has been reaped.
    pub async fn close(mut self) {
        self.cancel.cancel();
        if let Some(reaper) = self.reaper.take()
            && let Err(e) = reaper.await
        {
            debug!("Tunnel reaper ended abnormally: {}", e);
        }
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Asynchronous failure notification from a tunnel.
pub struct TunnelMonitor {
    rx: Option<oneshot::Receiver<TunnelError>>,
}

impl TunnelMonitor {
    fn quiet() -> Self {
        Self { rx: None }
    }

    /// Resolves with the tunnel's failure. Never resolves for tunnels that
    /// cannot fail independently or that ended cleanly.
    pub async fn failed(&mut self) -> TunnelError {
        if let Some(rx) = self.rx.as_mut() {
            let result = rx.await;
            self.rx = None;
            if let Ok(err) = result {
                return err;
            }
        }
        pending().await
    }

    /// Wait up to `grace` for a failure report.
    pub async fn failure_within(&mut self, grace: Duration) -> Option<TunnelError> {
        tokio::time::timeout(grace, self.failed()).await.ok()
    }
}

/// An opened tunnel. Split with [`Tunnel::into_parts`].
pub struct Tunnel {
    stream: TunnelStream,
    guard: TunnelGuard,
    monitor: TunnelMonitor,
}

impl Tunnel {
    pub fn into_parts(self) -> (TunnelStream, TunnelGuard, TunnelMonitor) {
        (self.stream, self.guard, self.monitor)
    }
}

/// Open a tunnel for the given strategy.
pub async fn open(
    strategy: &TunnelStrategy,
    settings: &GatewaySettings,
) -> Result<Tunnel, TunnelError> {
    match strategy {
        TunnelStrategy::Direct { host, port } => {
            let stream = direct::connect_with_retry(host, *port, settings).await?;
            Ok(Tunnel {
                stream: Box::new(stream),
                guard: TunnelGuard::inert(),
                monitor: TunnelMonitor::quiet(),
            })
        }
        TunnelStrategy::ProcessBridge { command, args } => {
            let (stream, guard, monitor) = process::spawn_bridge(command, args)?;
            Ok(Tunnel {
                stream: Box::new(stream),
                guard,
                monitor,
            })
        }
    }
}
