//! Authentication strategies for SSH connections.
//!
//! A trait-based system in which each credential type is one
//! [`AuthStrategy`]. The gateway only ever receives a username and an
//! optional password, so the chain holds at most two strategies.
//!
//! # Available Strategies
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`NoneAuth`]: The `none` method, for accounts without a password
//!
//! # Example
//!
//! ```ignore
//! use webssh_gateway::gateway::auth::{AuthChain, AuthStrategy};
//!
//! let chain = AuthChain::for_credential(Some("secret"));
//! let accepted = chain.authenticate(&mut handle, "alice").await?;
//! ```

mod chain;
mod none;
mod password;
mod traits;

pub use chain::AuthChain;
pub use none::NoneAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;
