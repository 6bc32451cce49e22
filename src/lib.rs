//! Relay interactive SSH shells to browser terminals over WebSocket.

pub mod gateway;
