//! Test doubles for driving sessions end to end without an SSH server.
//!
//! The scripted connector speaks a one-line handshake over the tunnel
//! stream: it sends `HELLO <user> <password|-> <rows>x<cols>` and expects
//! `OK` (shell ready) or `DENIED` (bad credentials). After that the stream
//! carries raw shell bytes in both directions.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use webssh_gateway::gateway::config::GatewaySettings;
use webssh_gateway::gateway::error::SessionError;
use webssh_gateway::gateway::session::{SessionContext, SessionEvent, SessionEvents};
use webssh_gateway::gateway::shell::{ShellConnector, ShellInput, ShellLink, ShellOutput, ShellRead};
use webssh_gateway::gateway::tunnel::{TunnelPolicy, TunnelStrategy, TunnelStream};
use webssh_gateway::gateway::types::{ConnectionRequest, TermSize};

pub const WRONG_PASSWORD: &str = "wrong";

/// Connector speaking the line handshake.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    /// Every size sent to a shell: the negotiated one, then each resize
    pub sizes: Arc<StdMutex<Vec<TermSize>>>,
    /// Shell writes never complete, like a remote that stopped reading
    pub stall_input: bool,
}

impl ScriptedConnector {
    pub fn stalling_input() -> Self {
        Self {
            stall_input: true,
            ..Default::default()
        }
    }

    pub fn sizes(&self) -> Vec<TermSize> {
        self.sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShellConnector for ScriptedConnector {
    async fn open_shell(
        &self,
        stream: TunnelStream,
        request: &ConnectionRequest,
        size: TermSize,
    ) -> Result<ShellLink, SessionError> {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);

        let hello = format!(
            "HELLO {} {} {}x{}\n",
            request.username,
            request.credential.as_deref().unwrap_or("-"),
            size.rows,
            size.cols
        );
        writer
            .write_all(hello.as_bytes())
            .await
            .map_err(|e| SessionError::Shell(format!("handshake failed: {}", e)))?;

        let mut reply = String::new();
        let read = reader
            .read_line(&mut reply)
            .await
            .map_err(|e| SessionError::Shell(format!("handshake failed: {}", e)))?;
        match reply.trim() {
            "OK" => {}
            "DENIED" => return Err(SessionError::Auth("rejected".to_string())),
            _ if read == 0 => {
                return Err(SessionError::Shell(
                    "handshake failed: connection closed".to_string(),
                ));
            }
            other => return Err(SessionError::Shell(format!("unexpected reply {:?}", other))),
        }

        self.sizes.lock().unwrap().push(size);
        Ok(ShellLink {
            input: Arc::new(ScriptedInput {
                writer: Mutex::new(writer),
                sizes: self.sizes.clone(),
                stall: self.stall_input,
            }),
            output: Box::new(ScriptedOutput { reader }),
        })
    }
}

struct ScriptedInput {
    writer: Mutex<WriteHalf<TunnelStream>>,
    sizes: Arc<StdMutex<Vec<TermSize>>>,
    stall: bool,
}

#[async_trait]
impl ShellInput for ScriptedInput {
    async fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        let mut writer = self.writer.lock().await;
        if self.stall {
            // Holds the writer, as a write blocked on a full window does
            std::future::pending::<()>().await;
        }
        writer
            .write_all(data)
            .await
            .map_err(|e| SessionError::Io(e.to_string()))?;
        writer.flush().await.map_err(|e| SessionError::Io(e.to_string()))
    }

    async fn resize(&self, size: TermSize) -> Result<(), SessionError> {
        let _writer = self.writer.lock().await;
        self.sizes.lock().unwrap().push(size);
        Ok(())
    }

    async fn close(&self) {
        let _ = self.writer.lock().await.shutdown().await;
    }
}

struct ScriptedOutput {
    reader: BufReader<ReadHalf<TunnelStream>>,
}

#[async_trait]
impl ShellOutput for ScriptedOutput {
    async fn read(&mut self) -> ShellRead {
        let mut buf = vec![0u8; 4096];
        match self.reader.read(&mut buf).await {
            Ok(0) => ShellRead::Eof,
            Ok(n) => {
                buf.truncate(n);
                ShellRead::Data(buf)
            }
            Err(e) => ShellRead::Failed(SessionError::Io(e.to_string())),
        }
    }
}

/// Local endpoint answering the line handshake.
///
/// After `OK` it greets with `Welcome <user>\r\n` and echoes input. A line
/// `exit` closes the connection; a line `count <n>` sends `n` numbered
/// lines.
pub struct ScriptedEndpoint {
    pub port: u16,
    pub open: Arc<AtomicUsize>,
}

impl ScriptedEndpoint {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let open = Arc::new(AtomicUsize::new(0));

        let counter = open.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let counter = counter.clone();
                tokio::spawn(async move {
                    serve(socket).await;
                    counter.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self { port, open }
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Wait until the endpoint has seen every connection close.
    pub async fn wait_idle(&self) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.open_connections() > 0 {
            if tokio::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

async fn serve(socket: tokio::net::TcpStream) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader);

    let mut hello = String::new();
    if lines.read_line(&mut hello).await.unwrap_or(0) == 0 {
        return;
    }
    let fields: Vec<&str> = hello.split_whitespace().collect();
    let (user, password) = match fields.as_slice() {
        ["HELLO", user, password, ..] => (user.to_string(), password.to_string()),
        _ => return,
    };
    if password == WRONG_PASSWORD {
        let _ = writer.write_all(b"DENIED\n").await;
        return;
    }
    if writer.write_all(b"OK\n").await.is_err() {
        return;
    }
    if writer
        .write_all(format!("Welcome {}\r\n", user).as_bytes())
        .await
        .is_err()
    {
        return;
    }

    loop {
        let mut line = String::new();
        match lines.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let trimmed = line.trim();
        if trimmed == "exit" {
            let _ = writer.shutdown().await;
            return;
        }
        if let Some(n) = trimmed.strip_prefix("count ") {
            let n: usize = n.parse().unwrap_or(0);
            for i in 0..n {
                if writer.write_all(format!("line {}\n", i).as_bytes()).await.is_err() {
                    return;
                }
            }
            continue;
        }
        if writer.write_all(line.as_bytes()).await.is_err() {
            return;
        }
    }
}

/// Policy routing hosts by exact name; unknown hosts connect directly.
#[derive(Default)]
pub struct HostMap {
    routes: HashMap<String, TunnelStrategy>,
}

impl HostMap {
    pub fn route(mut self, host: &str, strategy: TunnelStrategy) -> Self {
        self.routes.insert(host.to_string(), strategy);
        self
    }
}

impl TunnelPolicy for HostMap {
    fn select(&self, request: &ConnectionRequest) -> TunnelStrategy {
        self.routes
            .get(&request.host)
            .cloned()
            .unwrap_or_else(|| TunnelStrategy::Direct {
                host: request.host.clone(),
                port: request.port,
            })
    }
}

pub fn local(port: u16) -> TunnelStrategy {
    TunnelStrategy::Direct {
        host: "127.0.0.1".to_string(),
        port,
    }
}

pub fn sh(script: &str) -> TunnelStrategy {
    TunnelStrategy::ProcessBridge {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script.to_string()],
    }
}

pub fn context(policy: HostMap, connector: ScriptedConnector) -> SessionContext {
    let settings = GatewaySettings {
        connect_timeout: Duration::from_secs(5),
        ..Default::default()
    };
    SessionContext::new(settings, policy, connector)
}

pub async fn next_event(events: &mut SessionEvents) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event stream closed")
}

/// Collect output events until the accumulated text contains `needle`.
pub async fn output_until(events: &mut SessionEvents, needle: &str) -> String {
    let mut text = String::new();
    while !text.contains(needle) {
        match next_event(events).await {
            SessionEvent::Output(bytes) => text.push_str(&String::from_utf8_lossy(&bytes)),
            other => panic!("expected output, got {:?}", other),
        }
    }
    text
}

/// Events arriving within a short quiet period.
pub async fn drain(events: &mut SessionEvents) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(300), events.recv()).await
    {
        seen.push(event);
    }
    seen
}
