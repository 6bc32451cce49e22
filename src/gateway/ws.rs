//! WebSocket client channel and HTTP routes.
//!
//! ## Connection lifecycle
//!
//! 1. The browser opens `GET /ws`.
//! 2. Frames are JSON messages (see [`crate::gateway::protocol`]); binary
//!    frames are shell input.
//! 3. Outgoing messages are funneled through an mpsc queue so session
//!    tasks can send without holding the socket.
//! 4. When the socket closes, the bound session is torn down before the
//!    channel goes away.

use std::path::PathBuf;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use poem::endpoint::StaticFilesEndpoint;
use poem::middleware::{Cors, Tracing};
use poem::web::Data;
use poem::web::websocket::{Message, WebSocket, WebSocketStream};
use poem::{Endpoint, EndpointExt, IntoResponse, Route, get, handler};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::protocol::{ClientMessage, ServerMessage, parse_client_message};
use super::relay::SessionRelay;
use super::session::SessionContext;
use super::storage::{CUSTOM_CATEGORY, CommandStore};
use super::types::TermSize;

/// Outbound queue depth per channel
const OUTBOUND_BUFFER: usize = 256;

/// State shared by all client channels.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionContext,
    pub commands: Arc<dyn CommandStore>,
}

impl AppState {
    pub fn new(sessions: SessionContext, commands: Arc<dyn CommandStore>) -> Self {
        Self { sessions, commands }
    }
}

/// One browser connection: decodes client messages and reacts to them.
pub struct ClientChannel {
    id: Uuid,
    relay: SessionRelay,
    commands: Arc<dyn CommandStore>,
    outbound: mpsc::Sender<ServerMessage>,
}

impl ClientChannel {
    pub fn new(state: &AppState, outbound: mpsc::Sender<ServerMessage>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            relay: SessionRelay::new(id, state.sessions.clone(), outbound.clone()),
            commands: state.commands.clone(),
            outbound,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn handle_text(&mut self, text: &str) {
        match parse_client_message(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!("Channel {} sent an invalid message: {}", self.id, e);
                self.reply(ServerMessage::error(format!("Invalid message: {}", e)))
                    .await;
            }
        }
    }

    pub async fn handle_binary(&mut self, data: &[u8]) {
        self.relay.on_client_input(data).await;
    }

    pub async fn handle(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::ConnectRequest(params) => {
                self.relay.on_connect_request(params.into_request()).await;
            }
            ClientMessage::Input { data } => self.relay.on_client_input(data.as_bytes()).await,
            ClientMessage::Resize { rows, cols } => {
                self.relay.on_client_resize(TermSize::new(rows, cols)).await;
            }
            ClientMessage::LoadCommands => {
                let commands = self.commands.load_all().await;
                self.reply(ServerMessage::CommandsLoaded { commands }).await;
            }
            ClientMessage::SaveCommand { command } => {
                match self.commands.append(CUSTOM_CATEGORY, &command).await {
                    Ok(true) => debug!("Channel {} saved a command", self.id),
                    Ok(false) => {}
                    Err(e) => {
                        error!("Failed to save command: {}", e);
                        self.reply(ServerMessage::error(format!("Failed to save command: {}", e)))
                            .await;
                    }
                }
            }
            ClientMessage::Disconnect => self.relay.on_client_disconnect().await,
        }
    }

    /// Tear down the bound session. Call once the transport is gone.
    pub async fn close(mut self) {
        if self.relay.has_session() {
            debug!("Channel {} closed with a session bound, tearing it down", self.id);
        }
        self.relay.on_client_disconnect().await;
    }

    async fn reply(&self, message: ServerMessage) {
        if self.outbound.send(message).await.is_err() {
            debug!("Channel {} outbound queue closed", self.id);
        }
    }
}

/// `GET /ws`: WebSocket upgrade.
#[handler]
pub fn ws_endpoint(ws: WebSocket, state: Data<&AppState>) -> impl IntoResponse {
    let state = state.0.clone();
    ws.on_upgrade(move |socket| run_socket(socket, state))
}

async fn run_socket(socket: WebSocketStream, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);

    let send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut channel = ClientChannel::new(&state, tx);
    let channel_id = channel.id();
    info!("Client connected: {}", channel_id);

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => channel.handle_text(&text).await,
            Ok(Message::Binary(data)) => channel.handle_binary(&data).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("Channel {} read error: {}", channel_id, e);
                break;
            }
        }
    }

    channel.close().await;
    let _ = send_task.await;
    info!("Client disconnected: {}", channel_id);
}

/// Assemble the HTTP application.
///
/// `/ws` carries client channels. With a static directory, everything else
/// serves the browser client, falling back to its `index.html`.
pub fn routes(state: AppState, static_dir: Option<PathBuf>) -> impl Endpoint {
    let mut route = Route::new().at("/ws", get(ws_endpoint));
    if let Some(dir) = static_dir {
        route = route.nest(
            "/",
            StaticFilesEndpoint::new(dir)
                .index_file("index.html")
                .fallback_to_index(),
        );
    }
    route.with(Cors::new()).with(Tracing).data(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use crate::gateway::config::{GatewaySettings, TunnelConfig};
    use crate::gateway::ssh::SshConnector;
    use crate::gateway::storage::StoreError;
    use crate::gateway::tunnel::DomainPolicy;

    #[derive(Default)]
    struct MemoryStore {
        custom: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandStore for MemoryStore {
        async fn load(&self, category: &str) -> Vec<String> {
            if category == CUSTOM_CATEGORY {
                self.custom.lock().await.clone()
            } else {
                Vec::new()
            }
        }

        async fn append(&self, _category: &str, command: &str) -> Result<bool, StoreError> {
            let mut custom = self.custom.lock().await;
            if command.trim().is_empty() || custom.iter().any(|c| c == command) {
                return Ok(false);
            }
            custom.push(command.to_string());
            Ok(true)
        }
    }

    fn state() -> AppState {
        let settings = GatewaySettings::default();
        let sessions = SessionContext::new(
            settings.clone(),
            DomainPolicy::new(TunnelConfig::default()),
            SshConnector::new(&settings),
        );
        AppState::new(sessions, Arc::new(MemoryStore::default()))
    }

    fn channel() -> (ClientChannel, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        (ClientChannel::new(&state(), tx), rx)
    }

    async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_json_answered_with_error() {
        let (mut channel, mut rx) = channel();
        channel.handle_text("not json").await;
        assert!(matches!(next(&mut rx).await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_missing_host_answered_with_validation_error() {
        let (mut channel, mut rx) = channel();
        channel
            .handle_text(r#"{"type":"connect-request","host":"","username":"alice"}"#)
            .await;
        assert_eq!(
            next(&mut rx).await,
            ServerMessage::error("Missing host or username")
        );
    }

    #[tokio::test]
    async fn test_save_then_load_commands() {
        let (mut channel, mut rx) = channel();
        channel
            .handle_text(r#"{"type":"save-command","command":"uptime"}"#)
            .await;
        channel
            .handle_text(r#"{"type":"save-command","command":"uptime"}"#)
            .await;
        channel.handle_text(r#"{"type":"load-commands"}"#).await;

        let mut expected = BTreeMap::new();
        for category in crate::gateway::storage::CATEGORIES {
            expected.insert(category.to_string(), Vec::new());
        }
        expected.insert(CUSTOM_CATEGORY.to_string(), vec!["uptime".to_string()]);
        assert_eq!(
            next(&mut rx).await,
            ServerMessage::CommandsLoaded { commands: expected }
        );
    }

    #[tokio::test]
    async fn test_input_without_session_is_dropped() {
        let (mut channel, mut rx) = channel();
        channel.handle_text(r#"{"type":"input","data":"ls\n"}"#).await;
        channel.handle_binary(b"ls\n").await;
        channel.handle_text(r#"{"type":"resize","rows":10,"cols":10}"#).await;
        channel.handle_text(r#"{"type":"disconnect"}"#).await;
        assert!(
            tokio::time::timeout(Duration::from_millis(100), rx.recv())
                .await
                .is_err()
        );
    }

    mod http_routes {
        use super::*;

        use poem::http::StatusCode;
        use poem::test::TestClient;

        #[tokio::test]
        async fn test_static_dir_served_with_index_fallback() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("index.html"), "<h1>terminal</h1>").unwrap();
            std::fs::write(dir.path().join("app.js"), "connect();").unwrap();

            // The endpoint owns its directory path
            let app = {
                let static_dir = dir.path().to_path_buf();
                routes(state(), Some(static_dir))
            };
            let client = TestClient::new(app);

            let resp = client.get("/").send().await;
            resp.assert_status_is_ok();
            resp.assert_text("<h1>terminal</h1>").await;

            let resp = client.get("/app.js").send().await;
            resp.assert_status_is_ok();
            resp.assert_text("connect();").await;

            let resp = client.get("/sessions/42").send().await;
            resp.assert_status_is_ok();
            resp.assert_text("<h1>terminal</h1>").await;
        }

        #[tokio::test]
        async fn test_without_static_dir_only_ws_is_routed() {
            let client = TestClient::new(routes(state(), None));
            client
                .get("/")
                .send()
                .await
                .assert_status(StatusCode::NOT_FOUND);
        }
    }
}
