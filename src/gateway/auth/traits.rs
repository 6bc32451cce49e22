//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::gateway::error::SessionError;
use crate::gateway::ssh::GatewayClientHandler;

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected
    /// * `Err(_)` - The attempt itself failed (protocol or transport error)
    async fn authenticate(
        &self,
        handle: &mut client::Handle<GatewayClientHandler>,
        username: &str,
    ) -> Result<bool, SessionError>;

    /// Name of the strategy, for logs.
    fn name(&self) -> &'static str;
}
