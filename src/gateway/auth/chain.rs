//! Authentication chain for trying multiple strategies.

use async_trait::async_trait;
use russh::client;
use tracing::debug;

use crate::gateway::error::SessionError;
use crate::gateway::ssh::GatewayClientHandler;

use super::traits::AuthStrategy;
use super::{NoneAuth, PasswordAuth};

/// Authentication chain that tries multiple strategies in order.
///
/// The first successful strategy stops the chain.
pub struct AuthChain {
    strategies: Vec<Box<dyn AuthStrategy>>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Chain for the credential carried by a connection request.
    ///
    /// A non-empty password uses password authentication; without one the
    /// `none` method is tried so passwordless accounts still work.
    pub fn for_credential(credential: Option<&str>) -> Self {
        match credential.filter(|c| !c.is_empty()) {
            Some(password) => Self::new().with_password(password),
            None => Self::new().with_none(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.strategies.push(Box::new(PasswordAuth::new(password)));
        self
    }

    pub fn with_none(mut self) -> Self {
        self.strategies.push(Box::new(NoneAuth));
        self
    }

    #[cfg(test)]
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

impl Default for AuthChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthStrategy for AuthChain {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<GatewayClientHandler>,
        username: &str,
    ) -> Result<bool, SessionError> {
        if self.strategies.is_empty() {
            return Err(SessionError::Auth(
                "no authentication strategies configured".to_string(),
            ));
        }

        let mut last_error = None;

        for strategy in &self.strategies {
            debug!("Trying authentication strategy: {}", strategy.name());

            match strategy.authenticate(handle, username).await {
                Ok(true) => {
                    debug!("Authentication succeeded with strategy: {}", strategy.name());
                    return Ok(true);
                }
                Ok(false) => {
                    last_error = Some(SessionError::Auth(format!(
                        "{} authentication rejected",
                        strategy.name()
                    )));
                }
                Err(e) => {
                    debug!("Authentication error with strategy {}: {}", strategy.name(), e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SessionError::Auth("all authentication methods failed".to_string())))
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}
