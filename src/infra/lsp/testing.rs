//! In-memory language server for tests
//!
//! Speaks framed JSON-RPC over `tokio::io::duplex`, answers `initialize`
//! from a script, echoes everything else and counts every method it sees.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::client::LspConnection;
use super::protocol::{Message, Notification, Request, RequestId, Response, error_codes};
use super::servers::{ProviderContext, ServerProvider};
use super::transport::{
    BoxedReader, BoxedWriter, Connection, MessageReader, ProcessHandle, ServerDescription,
    Transport, write_notification, write_request, write_response,
};
use crate::error::LspError;

#[derive(Debug, Clone)]
pub struct ServerScript {
    pub capabilities: Value,
    pub null_initialize: bool,
    /// Methods that never get an answer
    pub silent: Vec<String>,
    /// Methods answered with an internal error
    pub fail: Vec<String>,
    /// The process dies when it receives `exit`
    pub exit_on_exit: bool,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            capabilities: json!({ "hoverProvider": true }),
            null_initialize: false,
            silent: Vec::new(),
            fail: Vec::new(),
            exit_on_exit: false,
        }
    }
}

impl ServerScript {
    pub fn with_capabilities(capabilities: Value) -> Self {
        Self {
            capabilities,
            ..Self::default()
        }
    }

    pub fn exits_on_exit() -> Self {
        Self {
            exit_on_exit: true,
            ..Self::default()
        }
    }
}

/// Process handle whose liveness the test controls
#[derive(Debug, Default)]
pub struct FakeProcess {
    dead: AtomicBool,
    kills: AtomicUsize,
    hang_up: CancellationToken,
}

impl FakeProcess {
    pub fn set_alive(&self, alive: bool) {
        self.dead.store(!alive, Ordering::SeqCst);
    }

    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessHandle for FakeProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn is_alive(&self) -> bool {
        !self.dead.load(Ordering::SeqCst)
    }

    fn kill(&self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
        self.set_alive(false);
        self.hang_up.cancel();
    }
}

struct ServerState {
    script: ServerScript,
    counts: Mutex<HashMap<String, usize>>,
    writer: tokio::sync::Mutex<Option<WriteHalf<DuplexStream>>>,
    replies: Mutex<HashMap<RequestId, oneshot::Sender<Response>>>,
    next_id: AtomicU64,
    process: Arc<FakeProcess>,
}

#[derive(Clone)]
pub struct FakeServer {
    state: Arc<ServerState>,
}

impl FakeServer {
    /// Start a fake server; returns the client's stream pair.
    pub fn spawn(script: ServerScript) -> (Self, (BoxedReader, BoxedWriter)) {
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server_side);
        let (client_read, client_write) = tokio::io::split(client_side);

        let state = Arc::new(ServerState {
            script,
            counts: Mutex::new(HashMap::new()),
            writer: tokio::sync::Mutex::new(Some(server_write)),
            replies: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1000),
            process: Arc::new(FakeProcess::default()),
        });

        tokio::spawn(serve(Arc::clone(&state), server_read));

        (
            Self { state },
            (Box::new(client_read), Box::new(client_write)),
        )
    }

    /// Start a fake server and package it as a transport connection.
    pub fn launch(script: ServerScript) -> (Self, Connection) {
        let (server, (reader, writer)) = Self::spawn(script);
        let process: Arc<dyn ProcessHandle> = server.process();
        (
            server,
            Connection {
                reader,
                writer,
                process: Some(process),
            },
        )
    }

    pub fn process(&self) -> Arc<FakeProcess> {
        Arc::clone(&self.state.process)
    }

    pub fn count(&self, method: &str) -> usize {
        self.state.counts.lock().get(method).copied().unwrap_or(0)
    }

    /// Wait until `method` was seen at least `n` times.
    pub async fn wait_for(&self, method: &str, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while self.count(method) < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "server never saw {} x{}",
                method,
                n
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Close the server's end of the stream.
    pub fn hang_up(&self) {
        self.state.process.hang_up.cancel();
    }

    pub async fn send_notification(&self, method: &str, params: Value) {
        let notification = Notification::new(method, Some(params));
        let mut guard = self.state.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            write_notification(writer, &notification).await.unwrap();
        }
    }

    /// Issue a server-to-client request and wait for the client's answer.
    pub async fn server_request(&self, method: &str, params: Value) -> Response {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.state.replies.lock().insert(RequestId::Number(id), tx);

        let request = Request::new(id, method, Some(params));
        {
            let mut guard = self.state.writer.lock().await;
            let writer = guard.as_mut().expect("server already hung up");
            write_request(writer, &request).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("client never answered")
            .unwrap()
    }
}

async fn serve(state: Arc<ServerState>, read: ReadHalf<DuplexStream>) {
    let mut reader = MessageReader::new(Box::new(read));
    let hang_up = state.process.hang_up.clone();

    loop {
        let message = tokio::select! {
            _ = hang_up.cancelled() => break,
            message = reader.read_message() => message,
        };
        let Ok(message) = message else {
            break;
        };

        match message {
            Message::Request(request) => {
                bump(&state, &request.method);
                if let Some(response) = respond(&state.script, &request) {
                    let mut guard = state.writer.lock().await;
                    if let Some(writer) = guard.as_mut() {
                        let _ = write_response(writer, &response).await;
                    }
                }
            }
            Message::Notification(notification) => {
                bump(&state, &notification.method);
                if notification.method == "exit" && state.script.exit_on_exit {
                    state.process.set_alive(false);
                    break;
                }
            }
            Message::Response(response) => {
                if let Some(id) = &response.id
                    && let Some(tx) = state.replies.lock().remove(id)
                {
                    let _ = tx.send(response);
                }
            }
        }
    }

    // Dropping both halves closes the client's read side
    state.writer.lock().await.take();
}

fn bump(state: &ServerState, method: &str) {
    *state.counts.lock().entry(method.to_string()).or_insert(0) += 1;
}

fn respond(script: &ServerScript, request: &Request) -> Option<Response> {
    let method = request.method.as_str();
    if script.silent.iter().any(|m| m == method) {
        return None;
    }
    if script.fail.iter().any(|m| m == method) {
        return Some(Response::failure(
            Some(request.id.clone()),
            error_codes::INTERNAL_ERROR,
            format!("{} failed", method),
        ));
    }

    let result = match method {
        "initialize" if script.null_initialize => Value::Null,
        "initialize" => json!({
            "capabilities": script.capabilities,
            "serverInfo": { "name": "fake-ls", "version": "0.0.1" }
        }),
        "shutdown" => Value::Null,
        _ => request.params.clone().unwrap_or(Value::Null),
    };
    Some(Response::success(request.id.clone(), result))
}

/// Fake server wrapped in a started connection.
pub fn open_connection(
    script: ServerScript,
) -> (FakeServer, Arc<LspConnection>, Arc<dyn ProcessHandle>) {
    let (server, (reader, writer)) = FakeServer::spawn(script);
    let connection = LspConnection::start("fake", Path::new("/w"), reader, writer, false);
    let process: Arc<dyn ProcessHandle> = server.process();
    (server, connection, process)
}

/// Transport that launches a fresh fake server per `open`.
pub struct FakeTransport {
    script: Mutex<ServerScript>,
    servers: Mutex<Vec<FakeServer>>,
    refuse: AtomicBool,
}

impl FakeTransport {
    pub fn new(script: ServerScript) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            servers: Mutex::new(Vec::new()),
            refuse: AtomicBool::new(false),
        })
    }

    /// Make subsequent launches fail at the transport level.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn launches(&self) -> usize {
        self.servers.lock().len()
    }

    pub fn server(&self, index: usize) -> FakeServer {
        self.servers.lock()[index].clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(
        &self,
        description: &ServerDescription,
        _root: &Path,
    ) -> Result<Connection, LspError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LspError::Launch(format!("{}: refused", description.name)));
        }
        let script = self.script.lock().clone();
        let (server, connection) = FakeServer::launch(script);
        self.servers.lock().push(server);
        Ok(connection)
    }
}

/// Provider accepting a fixed set of content types.
pub struct FakeProvider {
    name: String,
    content_types: Vec<String>,
    asked: AtomicUsize,
}

impl FakeProvider {
    pub fn new(name: &str, content_types: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            content_types: content_types.iter().map(|s| s.to_string()).collect(),
            asked: AtomicUsize::new(0),
        })
    }

    pub fn asked(&self) -> usize {
        self.asked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServerProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn describe(&self, context: &ProviderContext) -> Option<ServerDescription> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.content_types
            .iter()
            .any(|ct| *ct == context.content_type)
            .then(|| ServerDescription::command(self.name.clone(), "fake-ls", Vec::new()))
    }
}
