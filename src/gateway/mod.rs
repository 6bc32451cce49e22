//! Browser-facing SSH gateway.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Value types shared across layers
//! - `config`: Configuration resolution with environment variable support
//! - `error`: Error taxonomy and retry classification
//! - `tunnel`: Direct TCP and process-bridged transports
//! - `auth`: SSH authentication strategies
//! - `shell`: Shell negotiation seam
//! - `ssh`: russh-backed shell negotiation
//! - `session`: Shell session lifecycle and events
//! - `relay`: Binding between a client channel and its session
//! - `protocol`: Client channel wire format
//! - `storage`: Command suggestion storage
//! - `ws`: WebSocket client channel and HTTP routes

pub mod auth;
pub mod config;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod shell;
pub mod ssh;
pub mod storage;
pub mod tunnel;
pub mod types;
pub mod ws;

pub use session::{SessionContext, SessionEvent, SessionEvents, SessionState, ShellSession};
pub use ws::{AppState, routes};
