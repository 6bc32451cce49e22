//! Configuration resolution for the gateway.
//!
//! The binary resolves every value from its environment variable and falls
//! back to a built-in default when the variable is unset or invalid.
//! Library callers build [`GatewaySettings`], [`ServerConfig`] and
//! [`TunnelConfig`] directly, starting from `Default`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PORT` | 3001 | HTTP/WebSocket listen port |
//! | `STATIC_DIR` | unset | Serve client assets from this directory |
//! | `COMMANDS_DIR` | `commands` | Command suggestion store directory |
//! | `SSH_CONNECT_TIMEOUT` | 60s | Tunnel open + auth + shell negotiation bound |
//! | `SSH_MAX_RETRIES` | 0 | Retries for transient direct-connect failures |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_COMPRESSION` | true | Offer zlib compression |
//! | `TUNNEL_DOMAINS` | empty | Hosts routed through the tunnel helper |
//! | `TUNNEL_COMMAND` | `cloudflared` | Tunnel helper executable |
//! | `TUNNEL_ARGS` | `access tcp --hostname {host}` | Tunnel helper arguments |
//! | `TERM_TYPE` | `xterm-256color` | Terminal type requested for the PTY |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default listen port
pub(crate) const DEFAULT_PORT: u16 = 3001;

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Default maximum retry attempts for direct connections
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 0;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap (10 seconds)
pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Default command suggestion directory
pub(crate) const DEFAULT_COMMANDS_DIR: &str = "commands";

/// Default tunnel helper
pub(crate) const DEFAULT_TUNNEL_COMMAND: &str = "cloudflared";

/// Default tunnel helper arguments, `{host}` and `{port}` are substituted
pub(crate) const DEFAULT_TUNNEL_ARGS: &str = "access tcp --hostname {host}";

/// Default terminal type
pub(crate) const DEFAULT_TERM_TYPE: &str = "xterm-256color";

pub(crate) const PORT_ENV_VAR: &str = "PORT";
pub(crate) const STATIC_DIR_ENV_VAR: &str = "STATIC_DIR";
pub(crate) const COMMANDS_DIR_ENV_VAR: &str = "COMMANDS_DIR";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "SSH_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const TUNNEL_DOMAINS_ENV_VAR: &str = "TUNNEL_DOMAINS";
pub(crate) const TUNNEL_COMMAND_ENV_VAR: &str = "TUNNEL_COMMAND";
pub(crate) const TUNNEL_ARGS_ENV_VAR: &str = "TUNNEL_ARGS";
pub(crate) const TERM_TYPE_ENV_VAR: &str = "TERM_TYPE";

/// Settings shared by every shell session the gateway opens.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Bound on tunnel open, authentication and shell negotiation
    pub connect_timeout: Duration,
    /// Retries for transient direct-connect failures
    pub max_retries: u32,
    /// Initial delay between retries
    pub retry_delay: Duration,
    /// Whether to offer zlib compression
    pub compress: bool,
    /// Terminal type requested for the PTY
    pub term_type: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            compress: true,
            term_type: DEFAULT_TERM_TYPE.to_string(),
        }
    }
}

impl GatewaySettings {
    /// Resolve every setting from the environment.
    pub fn from_env() -> Self {
        Self {
            connect_timeout: resolve_connect_timeout(),
            max_retries: resolve_max_retries(),
            retry_delay: resolve_retry_delay(),
            compress: resolve_compression(),
            term_type: env_string(TERM_TYPE_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_TERM_TYPE.to_string()),
        }
    }
}

/// Process-level settings: where to listen and what to serve.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: Option<PathBuf>,
    pub commands_dir: PathBuf,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            port: resolve_port(),
            static_dir: env_string(STATIC_DIR_ENV_VAR).map(PathBuf::from),
            commands_dir: env_string(COMMANDS_DIR_ENV_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_COMMANDS_DIR)),
        }
    }
}

/// Tunnel helper settings consumed by [`crate::gateway::tunnel::DomainPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub domains: Vec<String>,
    pub command: String,
    pub args: Vec<String>,
}

impl Default for TunnelConfig {
    /// No tunneled domains: every host connects directly.
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            command: DEFAULT_TUNNEL_COMMAND.to_string(),
            args: DEFAULT_TUNNEL_ARGS
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl TunnelConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            domains: env_string(TUNNEL_DOMAINS_ENV_VAR)
                .map(|raw| parse_list(&raw, ','))
                .unwrap_or(defaults.domains),
            command: env_string(TUNNEL_COMMAND_ENV_VAR).unwrap_or(defaults.command),
            args: env_string(TUNNEL_ARGS_ENV_VAR)
                .map(|raw| raw.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.args),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_list(raw: &str, separator: char) -> Vec<String> {
    raw.split(separator)
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Resolve the listen port: env var -> default
pub(crate) fn resolve_port() -> u16 {
    env_parsed(PORT_ENV_VAR).unwrap_or(DEFAULT_PORT)
}

/// Resolve the connection timeout: env var (seconds) -> default
pub(crate) fn resolve_connect_timeout() -> Duration {
    Duration::from_secs(env_parsed(CONNECT_TIMEOUT_ENV_VAR).unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS))
}

/// Resolve the max retries value: env var -> default
pub(crate) fn resolve_max_retries() -> u32 {
    env_parsed(MAX_RETRIES_ENV_VAR).unwrap_or(DEFAULT_MAX_RETRIES)
}

/// Resolve the retry delay: env var (milliseconds) -> default
pub(crate) fn resolve_retry_delay() -> Duration {
    Duration::from_millis(env_parsed(RETRY_DELAY_MS_ENV_VAR).unwrap_or(DEFAULT_RETRY_DELAY_MS))
}

/// Resolve the compression setting: env var -> default (true)
pub(crate) fn resolve_compression() -> bool {
    match env::var(COMPRESSION_ENV_VAR) {
        Ok(value) => value.eq_ignore_ascii_case("true") || value == "1",
        Err(_) => true,
    }
}

/// Parse an env var, `None` when unset or unparseable.
fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
