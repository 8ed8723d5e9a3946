//! JSON-RPC connection to one language server
//!
//! Owns the write half of the stream and a reader task that routes
//! responses to pending requests, answers server-initiated requests and
//! caches diagnostics. The reader only holds a weak reference, so dropping
//! the last `Arc<LspConnection>` closes the write half.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::time::timeout;

use super::log::ServerLog;
use super::protocol::{
    Diagnostic, LogMessageParams, Message, MessageType, Notification, PublishDiagnosticsParams,
    Request, RequestId, Response, ResponseError, WorkspaceFolder, error_codes,
};
use super::transport::{
    BoxedReader, BoxedWriter, MessageReader, decode_body, write_notification, write_request,
    write_response,
};
use crate::error::LspError;
use crate::models::workspace::path_to_uri;

type PendingRequest = oneshot::Sender<Response>;

const MAX_DIAGNOSTICS_CACHE: usize = 200;

/// A request on the wire whose response has not been taken yet
pub struct PendingResponse {
    id: u64,
    method: String,
    rx: oneshot::Receiver<Response>,
}

impl PendingResponse {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Wait at most `limit`. `None` means the response has not arrived yet
    /// and the request is still pending.
    pub async fn wait_for(&mut self, limit: Duration) -> Option<Result<Value, LspError>> {
        match timeout(limit, &mut self.rx).await {
            Ok(Ok(response)) => Some(response_to_result(response)),
            Ok(Err(_)) => Some(Err(LspError::ConnectionClosed)),
            Err(_) => None,
        }
    }
}

fn response_to_result(response: Response) -> Result<Value, LspError> {
    match response.into_result() {
        Ok(value) => Ok(value),
        Err(err) if err.code == error_codes::CONNECTION_CLOSED => Err(LspError::ConnectionClosed),
        Err(err) => Err(err.into()),
    }
}

pub struct LspConnection {
    name: String,
    root: PathBuf,
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    next_id: AtomicU64,
    pending: Mutex<HashMap<RequestId, PendingRequest>>,
    diagnostics: RwLock<HashMap<String, Vec<Diagnostic>>>,
    log: ServerLog,
    closed: AtomicBool,
}

impl LspConnection {
    /// Wrap a connected stream pair and start the reader task.
    pub fn start(
        name: impl Into<String>,
        root: &Path,
        reader: BoxedReader,
        writer: BoxedWriter,
        log_enabled: bool,
    ) -> Arc<Self> {
        let connection = Arc::new(Self {
            name: name.into(),
            root: root.to_path_buf(),
            writer: tokio::sync::Mutex::new(Some(writer)),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            diagnostics: RwLock::new(HashMap::new()),
            log: ServerLog::new(log_enabled),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&connection);
        tokio::spawn(read_loop(weak, MessageReader::new(reader)));

        connection
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closed flag without draining, as seen mid-way through `fail_pending`.
    #[cfg(test)]
    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn log(&self) -> &ServerLog {
        &self.log
    }

    /// Put a request on the wire without waiting for the answer.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<PendingResponse, LspError> {
        if self.is_closed() {
            return Err(LspError::ConnectionClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(RequestId::Number(id), tx);

        // The reader may have drained the table between the check and the insert
        if self.is_closed() {
            self.pending.lock().remove(&RequestId::Number(id));
            return Err(LspError::ConnectionClosed);
        }

        let request = Request::new(id, method, params);
        tracing::trace!("{} LSP request {}: {}", self.name, id, method);

        let written = {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(writer) => write_request(writer, &request).await.map_err(LspError::from),
                None => Err(LspError::NotConnected),
            }
        };

        if let Err(e) = written {
            self.pending.lock().remove(&RequestId::Number(id));
            return Err(e);
        }

        Ok(PendingResponse {
            id,
            method: method.to_string(),
            rx,
        })
    }

    /// Send a request and wait up to `limit` for the response.
    ///
    /// On timeout the request is cancelled on the server with `$/cancelRequest`.
    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        limit: Duration,
    ) -> Result<T, LspError> {
        let mut pending = self.send_request(method, params).await?;

        match pending.wait_for(limit).await {
            Some(result) => {
                let value = result?;
                serde_json::from_value(value).map_err(|e| LspError::Protocol(e.to_string()))
            }
            None => {
                self.cancel_request(pending.id()).await;
                Err(LspError::Timeout {
                    method: method.to_string(),
                    millis: limit.as_millis() as u64,
                })
            }
        }
    }

    pub async fn cancel_request(&self, id: u64) {
        self.pending.lock().remove(&RequestId::Number(id));
        let _ = self
            .notify("$/cancelRequest", Some(serde_json::json!({ "id": id })))
            .await;
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        let notification = Notification::new(method, params);

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(LspError::NotConnected)?;
        write_notification(writer, &notification).await?;
        Ok(())
    }

    /// Close the write half; the server sees end of input.
    pub async fn close(&self) {
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
    }

    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        self.diagnostics
            .read()
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    /// Fail every pending request; the stream is gone.
    fn fail_pending(&self) {
        self.closed.store(true, Ordering::Release);
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            tracing::debug!(
                "Failing {} pending requests: {} connection closed",
                drained.len(),
                self.name
            );
        }
        for (id, sender) in drained {
            let _ = sender.send(Response::failure(
                Some(id),
                error_codes::CONNECTION_CLOSED,
                format!("{} closed the connection", self.name),
            ));
        }
    }

    fn handle_message(self: &Arc<Self>, message: Message) {
        match message {
            Message::Response(response) => {
                let Some(id) = response.id.clone() else {
                    tracing::debug!("{} sent a response without id", self.name);
                    return;
                };
                let sender = {
                    let mut pending = self.pending.lock();
                    // Some servers echo numeric ids back as strings
                    pending.remove(&id).or_else(|| match &id {
                        RequestId::String(s) => s
                            .parse::<u64>()
                            .ok()
                            .and_then(|n| pending.remove(&RequestId::Number(n))),
                        RequestId::Number(_) => None,
                    })
                };
                match sender {
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => tracing::debug!(
                        "Response for unknown request {:?} (may have timed out)",
                        id
                    ),
                }
            }
            Message::Request(request) => {
                let response = match self.answer(&request) {
                    Ok(result) => Response::success(request.id, result),
                    Err(error) => Response {
                        jsonrpc: "2.0".to_string(),
                        id: Some(request.id),
                        result: None,
                        error: Some(error),
                    },
                };
                // Written off the read loop so a busy writer cannot stall reads
                let connection = Arc::clone(self);
                tokio::spawn(async move {
                    let mut guard = connection.writer.lock().await;
                    if let Some(writer) = guard.as_mut()
                        && let Err(e) = write_response(writer, &response).await
                    {
                        tracing::debug!("{} response write failed: {}", connection.name, e);
                    }
                });
            }
            Message::Notification(notification) => self.handle_notification(notification),
        }
    }

    /// Answer a server-initiated request.
    fn answer(&self, request: &Request) -> Result<Value, ResponseError> {
        match request.method.as_str() {
            "workspace/configuration" => {
                let items = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("items"))
                    .and_then(|i| i.as_array())
                    .map(|arr| arr.len())
                    .unwrap_or(0);
                Ok(Value::Array(vec![Value::Null; items]))
            }
            "workspace/workspaceFolders" => {
                let folder = workspace_folder(&self.root);
                Ok(serde_json::to_value(vec![folder]).unwrap_or(Value::Null))
            }
            "client/registerCapability"
            | "client/unregisterCapability"
            | "window/workDoneProgress/create" => Ok(Value::Null),
            "window/showDocument" => Ok(serde_json::json!({ "success": false })),
            "workspace/applyEdit" => Ok(serde_json::json!({
                "applied": false,
                "failureReason": "Edits are not applied by this client"
            })),
            method => {
                tracing::debug!("Unhandled server request: {}", method);
                Err(ResponseError {
                    code: error_codes::METHOD_NOT_FOUND,
                    message: format!("Method not found: {}", method),
                    data: None,
                })
            }
        }
    }

    fn handle_notification(&self, notification: Notification) {
        let params = notification.params.unwrap_or(Value::Null);
        match notification.method.as_str() {
            "textDocument/publishDiagnostics" => {
                match serde_json::from_value::<PublishDiagnosticsParams>(params) {
                    Ok(published) => self.cache_diagnostics(published),
                    Err(e) => tracing::debug!("Malformed diagnostics from {}: {}", self.name, e),
                }
            }
            "window/logMessage" | "window/showMessage" => {
                if let Ok(message) = serde_json::from_value::<LogMessageParams>(params) {
                    self.log.record(message.typ, &message.message);
                    match message.typ {
                        MessageType::Error => tracing::error!("LSP {}: {}", self.name, message.message),
                        MessageType::Warning => tracing::warn!("LSP {}: {}", self.name, message.message),
                        MessageType::Info => tracing::info!("LSP {}: {}", self.name, message.message),
                        MessageType::Log | MessageType::Debug => {
                            tracing::debug!("LSP {}: {}", self.name, message.message)
                        }
                    }
                }
            }
            method => tracing::trace!("Unhandled notification: {}", method),
        }
    }

    fn cache_diagnostics(&self, published: PublishDiagnosticsParams) {
        let mut cache = self.diagnostics.write();
        if cache.len() >= MAX_DIAGNOSTICS_CACHE
            && !cache.contains_key(&published.uri)
            && let Some(oldest) = cache.keys().next().cloned()
        {
            cache.remove(&oldest);
        }
        tracing::debug!(
            "Cached {} diagnostics for {}",
            published.diagnostics.len(),
            published.uri
        );
        cache.insert(published.uri, published.diagnostics);
    }
}

pub fn workspace_folder(root: &Path) -> WorkspaceFolder {
    WorkspaceFolder {
        uri: path_to_uri(root),
        name: root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| root.to_string_lossy().into_owned()),
    }
}

/// Fails pending requests however the reader exits, panics included.
struct CloseOnExit(Weak<LspConnection>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        if let Some(connection) = self.0.upgrade() {
            connection.fail_pending();
        }
    }
}

/// Reads until end of stream or until the connection is dropped.
///
/// A body that fails to decode is skipped; only a framing or stream
/// error ends the connection.
async fn read_loop(connection: Weak<LspConnection>, mut reader: MessageReader) {
    let _guard = CloseOnExit(connection.clone());
    loop {
        let frame = reader.read_frame().await;
        let Some(connection) = connection.upgrade() else {
            break;
        };
        let body = match frame {
            Ok(body) => body,
            Err(e) => {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    tracing::debug!("{} closed its output", connection.name);
                } else {
                    tracing::warn!("{} LSP read error: {}", connection.name, e);
                }
                break;
            }
        };
        match decode_body(body) {
            Ok(message) => connection.handle_message(message),
            Err(e) => tracing::debug!("{} sent an undecodable message: {}", connection.name, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::lsp::testing::{FakeServer, ServerScript};
    use crate::infra::lsp::transport::write_message;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_round_trip() {
        let (server, streams) = FakeServer::spawn(ServerScript::default());
        let conn = LspConnection::start("fake", Path::new("/w"), streams.0, streams.1, false);

        let value: Value = conn
            .request("custom/echo", Some(json!({"x": 1})), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(value, json!({"x": 1}));
        assert_eq!(server.count("custom/echo"), 1);
    }

    #[tokio::test]
    async fn test_timeout_sends_cancel() {
        let script = ServerScript {
            silent: vec!["custom/slow".to_string()],
            ..ServerScript::default()
        };
        let (server, streams) = FakeServer::spawn(script);
        let conn = LspConnection::start("fake", Path::new("/w"), streams.0, streams.1, false);

        let err = conn
            .request::<Value>("custom/slow", None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        server.wait_for("$/cancelRequest", 1).await;
        assert_eq!(server.count("$/cancelRequest"), 1);
    }

    #[tokio::test]
    async fn test_pending_fail_when_server_closes() {
        let script = ServerScript {
            silent: vec!["custom/slow".to_string()],
            ..ServerScript::default()
        };
        let (server, streams) = FakeServer::spawn(script);
        let conn = LspConnection::start("fake", Path::new("/w"), streams.0, streams.1, false);

        let mut pending = conn.send_request("custom/slow", None).await.unwrap();
        server.wait_for("custom/slow", 1).await;
        server.hang_up();

        let result = pending.wait_for(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(result, Err(LspError::ConnectionClosed)));
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send_request("custom/echo", None).await,
            Err(LspError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_undecodable_message_is_skipped() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);
        let conn = LspConnection::start(
            "raw",
            Path::new("/w"),
            Box::new(client_read),
            Box::new(client_write),
            false,
        );

        let mut pending = conn.send_request("custom/echo", None).await.unwrap();
        let mut incoming = MessageReader::new(Box::new(server_read));
        incoming.read_message().await.unwrap();

        server_write
            .write_all(b"Content-Length: 2\r\n\r\n\xc3\x28")
            .await
            .unwrap();
        write_message(&mut server_write, r#"{"jsonrpc":"2.0","method":"bogus","id":[1]}"#)
            .await
            .unwrap();
        write_message(&mut server_write, r#"{"jsonrpc":"2.0","id":1,"result":42}"#)
            .await
            .unwrap();

        let result = pending.wait_for(Duration::from_secs(5)).await.unwrap();
        assert_eq!(result.unwrap(), json!(42));
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_oversized_frame_fails_pending_requests() {
        let (client_side, server_side) = tokio::io::duplex(1024);
        let (client_read, client_write) = tokio::io::split(client_side);
        let (server_read, mut server_write) = tokio::io::split(server_side);
        let conn = LspConnection::start(
            "raw",
            Path::new("/w"),
            Box::new(client_read),
            Box::new(client_write),
            false,
        );

        let mut pending = conn.send_request("custom/echo", None).await.unwrap();
        let mut incoming = MessageReader::new(Box::new(server_read));
        incoming.read_message().await.unwrap();

        server_write
            .write_all(b"Content-Length: 18446744073709551615\r\n\r\n")
            .await
            .unwrap();

        let result = pending.wait_for(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(result, Err(LspError::ConnectionClosed)));
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_send_after_close_leaves_no_pending_entry() {
        let (_server, streams) = FakeServer::spawn(ServerScript::default());
        let conn = LspConnection::start("fake", Path::new("/w"), streams.0, streams.1, false);

        conn.mark_closed();
        assert!(matches!(
            conn.send_request("custom/echo", None).await,
            Err(LspError::ConnectionClosed)
        ));
        assert!(conn.pending.lock().is_empty());
    }

    #[tokio::test]
    async fn test_server_requests_are_answered() {
        let (server, streams) = FakeServer::spawn(ServerScript::default());
        let conn = LspConnection::start("fake", Path::new("/w/proj"), streams.0, streams.1, false);

        let config = server
            .server_request(
                "workspace/configuration",
                json!({ "items": [{ "section": "a" }, { "section": "b" }] }),
            )
            .await;
        assert_eq!(config.result, Some(json!([null, null])));

        let folders = server.server_request("workspace/workspaceFolders", json!(null)).await;
        assert_eq!(folders.result.unwrap()[0]["name"], "proj");

        let edit = server.server_request("workspace/applyEdit", json!({})).await;
        assert_eq!(edit.result.unwrap()["applied"], false);

        let unknown = server.server_request("custom/unknown", json!({})).await;
        assert_eq!(unknown.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        drop(conn);
    }

    #[tokio::test]
    async fn test_diagnostics_and_log_notifications() {
        let (server, streams) = FakeServer::spawn(ServerScript::default());
        let conn = LspConnection::start("fake", Path::new("/w"), streams.0, streams.1, true);

        server
            .send_notification(
                "textDocument/publishDiagnostics",
                json!({
                    "uri": "file:///w/a.foo",
                    "diagnostics": [{
                        "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
                        "severity": 1,
                        "message": "boom"
                    }]
                }),
            )
            .await;
        server
            .send_notification("window/logMessage", json!({ "type": 3, "message": "ready" }))
            .await;
        // Round trip so both notifications are processed before asserting
        let _: Value = conn
            .request("custom/echo", None, Duration::from_secs(5))
            .await
            .unwrap();

        let diagnostics = conn.diagnostics("file:///w/a.foo");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "boom");
        assert_eq!(conn.log().lines()[0].message, "ready");
    }

    #[test]
    fn test_workspace_folder_name() {
        let folder = workspace_folder(Path::new("/home/user/project"));
        assert_eq!(folder.name, "project");
        assert_eq!(folder.uri, "file:///home/user/project");
    }
}
