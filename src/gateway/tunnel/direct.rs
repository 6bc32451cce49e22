//! Direct TCP tunnel.
//!
//! Each attempt is bounded by the connect timeout. Transient failures
//! (refused, reset, timed out, unreachable) are retried with exponential
//! backoff and jitter via `backon`, up to the configured retry count.

use std::sync::atomic::{AtomicU32, Ordering};

use backon::{ExponentialBuilder, Retryable};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::gateway::config::{GatewaySettings, MAX_RETRY_DELAY};
use crate::gateway::error::TunnelError;

pub(super) async fn connect_with_retry(
    host: &str,
    port: u16,
    settings: &GatewaySettings,
) -> Result<TcpStream, TunnelError> {
    let attempt_counter = AtomicU32::new(0);

    let backoff = ExponentialBuilder::default()
        .with_min_delay(settings.retry_delay)
        .with_max_delay(MAX_RETRY_DELAY)
        .with_max_times(settings.max_retries as usize)
        .with_jitter();

    let result = (|| async {
        let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);
        if current_attempt > 0 {
            warn!("Connect retry attempt {} to {}:{}", current_attempt, host, port);
        }
        connect(host, port, settings).await
    })
    .retry(backoff)
    .when(TunnelError::is_transient)
    .notify(|err, dur| {
        warn!("Connect failed: {}. Retrying in {:?}", err, dur);
    })
    .await;

    let retries = attempt_counter.load(Ordering::SeqCst).saturating_sub(1);
    if result.is_ok() && retries > 0 {
        info!(
            "Connected to {}:{} after {} retry attempt(s)",
            host, port, retries
        );
    }
    result
}

async fn connect(host: &str, port: u16, settings: &GatewaySettings) -> Result<TcpStream, TunnelError> {
    let stream = tokio::time::timeout(settings.connect_timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| {
            TunnelError::ConnectFailed(format!(
                "connect to {}:{} timed out after {:?}",
                host, port, settings.connect_timeout
            ))
        })?
        .map_err(|e| TunnelError::connect(&e))?;

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY on {}:{}: {}", host, port, e);
    }

    Ok(stream)
}
