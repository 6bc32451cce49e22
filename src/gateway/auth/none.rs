//! The SSH `none` authentication method.

use async_trait::async_trait;
use russh::client;

use crate::gateway::error::SessionError;
use crate::gateway::ssh::GatewayClientHandler;

use super::traits::AuthStrategy;

/// Succeeds only on servers that let the account in without credentials.
pub struct NoneAuth;

#[async_trait]
impl AuthStrategy for NoneAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<GatewayClientHandler>,
        username: &str,
    ) -> Result<bool, SessionError> {
        let result = handle
            .authenticate_none(username)
            .await
            .map_err(|e| SessionError::Auth(format!("none authentication failed: {}", e)))?;

        Ok(result.success())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
