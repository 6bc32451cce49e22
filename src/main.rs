#![deny(warnings)]
#![deny(clippy::unwrap_used)]

use std::sync::Arc;

use dotenv::dotenv;
use poem::{Server, listener::TcpListener};
use tracing::info;
use webssh_gateway::gateway::config::{GatewaySettings, ServerConfig, TunnelConfig};
use webssh_gateway::gateway::ssh::SshConnector;
use webssh_gateway::gateway::storage::FileCommandStore;
use webssh_gateway::gateway::tunnel::DomainPolicy;
use webssh_gateway::gateway::{AppState, SessionContext, routes};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Initialize logging with proper tracing default
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("valid directive")),
        )
        .init();

    let server = ServerConfig::from_env();
    let settings = GatewaySettings::from_env();
    let tunnel = TunnelConfig::from_env();
    if !tunnel.domains.is_empty() {
        info!(
            "Routing {} through {}",
            tunnel.domains.join(", "),
            tunnel.command
        );
    }

    let commands = FileCommandStore::open(&server.commands_dir).await?;
    let connector = SshConnector::new(&settings);
    let sessions = SessionContext::new(settings, DomainPolicy::new(tunnel), connector);
    let state = AppState::new(sessions, Arc::new(commands));

    if let Some(dir) = &server.static_dir {
        info!("Serving client from {}", dir.display());
    }
    let app = routes(state, server.static_dir.clone());

    let addr = format!("0.0.0.0:{}", server.port);
    info!("Starting WebSSH gateway on {}", addr);

    Server::new(TcpListener::bind(addr))
        .name("WebSSH Gateway")
        .run(app)
        .await?;

    Ok(())
}
