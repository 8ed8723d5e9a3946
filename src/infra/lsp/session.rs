//! One live language-server session
//!
//! Lifecycle: `Starting -> Ready -> ShuttingDown -> Terminated`. The
//! capability snapshot is set exactly once, when the handshake completes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use super::capabilities::Capabilities;
use super::client::LspConnection;
use super::handshake::{self, HandshakeOutcome};
use super::protocol::Diagnostic;
use super::transport::{Connection, ProcessHandle, wait_for_exit};
use crate::config::RuntimeConfig;
use crate::error::LspError;
use crate::models::workspace::SessionKey;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);
static NO_CAPABILITIES: LazyLock<Capabilities> = LazyLock::new(Capabilities::empty);

const EXIT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum SessionState {
    Starting = 0,
    Ready = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Ready,
            2 => Self::ShuttingDown,
            3 => Self::Terminated,
            _ => Self::Starting,
        }
    }
}

#[derive(Debug, Clone)]
struct Timeouts {
    request: Duration,
    shutdown: Duration,
    exit_wait: Duration,
}

pub struct Session {
    id: SessionId,
    key: SessionKey,
    root: PathBuf,
    server_name: String,
    connection: Arc<LspConnection>,
    process: Option<Arc<dyn ProcessHandle>>,
    capabilities: OnceLock<Capabilities>,
    opened_files: RwLock<HashSet<PathBuf>>,
    state: AtomicU8,
    cleaned_up: AtomicBool,
    timeouts: Timeouts,
}

impl Session {
    /// Wrap a freshly opened connection. The session stays `Starting`
    /// until [`Session::initialize`] completes.
    pub fn start(
        key: SessionKey,
        root: &Path,
        server_name: impl Into<String>,
        connection: Connection,
        config: &RuntimeConfig,
    ) -> Arc<Self> {
        let server_name = server_name.into();
        let lsp = LspConnection::start(
            server_name.clone(),
            root,
            connection.reader,
            connection.writer,
            config.communication_log,
        );

        Arc::new(Self {
            id: SessionId::next(),
            key,
            root: root.to_path_buf(),
            server_name,
            connection: lsp,
            process: connection.process,
            capabilities: OnceLock::new(),
            opened_files: RwLock::new(HashSet::new()),
            state: AtomicU8::new(SessionState::Starting as u8),
            cleaned_up: AtomicBool::new(false),
            timeouts: Timeouts {
                request: config.request_timeout,
                shutdown: config.shutdown_timeout,
                exit_wait: config.exit_wait,
            },
        })
    }

    /// Run the handshake and move to `Ready`. When the server went away
    /// mid-handshake the session is left `Starting` and the caller should
    /// discard it.
    pub async fn initialize(&self, config: &RuntimeConfig) -> Result<HandshakeOutcome, LspError> {
        let outcome = handshake::perform(
            &self.connection,
            self.process.as_deref(),
            &self.root,
            config,
        )
        .await?;

        if outcome.process_exited {
            return Ok(outcome);
        }

        let _ = self.capabilities.set(outcome.capabilities.clone());
        self.transition(SessionState::Starting, SessionState::Ready);

        if outcome.capabilities.is_empty() {
            tracing::warn!(
                "{} session {} for {} is running without capabilities",
                self.server_name,
                self.id,
                self.key
            );
        } else {
            tracing::info!(
                "{} session {} ready for {}",
                self.server_name,
                self.id,
                self.key
            );
        }
        Ok(outcome)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn capabilities(&self) -> &Capabilities {
        self.capabilities.get().unwrap_or(&NO_CAPABILITIES)
    }

    pub fn connection(&self) -> &Arc<LspConnection> {
        &self.connection
    }

    pub fn process_id(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.id())
    }

    /// Liveness of the backing server. Attached sessions have no process
    /// and count as alive while their connection is open.
    pub fn is_process_alive(&self) -> bool {
        match &self.process {
            Some(process) => process.is_alive(),
            None => !self.connection.is_closed(),
        }
    }

    /// Ready, with a live server and an open connection.
    pub fn is_usable(&self) -> bool {
        self.state() == SessionState::Ready
            && self.is_process_alive()
            && !self.connection.is_closed()
    }

    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, LspError> {
        if !self.is_usable() {
            return Err(LspError::NotConnected);
        }
        self.connection
            .request(method, params, self.timeouts.request)
            .await
    }

    /// Short bounded query. A timeout means "no answer available now".
    pub async fn query<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Option<T>, LspError> {
        match self.request(method, params).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_timeout() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), LspError> {
        self.connection.notify(method, params).await
    }

    /// Record that the editor opened `file` on this session. Returns false
    /// when it was already open.
    pub fn open_file(&self, file: &Path) -> bool {
        self.opened_files.write().insert(file.to_path_buf())
    }

    pub fn close_file(&self, file: &Path) -> bool {
        self.opened_files.write().remove(file)
    }

    pub fn is_open(&self, file: &Path) -> bool {
        self.opened_files.read().contains(file)
    }

    pub fn opened_files(&self) -> Vec<PathBuf> {
        self.opened_files.read().iter().cloned().collect()
    }

    pub fn diagnostics(&self, uri: &str) -> Vec<Diagnostic> {
        self.connection.diagnostics(uri)
    }

    /// Ask the server to shut down at its own pace; nothing is awaited.
    pub async fn shutdown(&self) {
        self.enter_shutting_down();
        match self.connection.send_request("shutdown", None).await {
            Ok(_) => tracing::debug!("Shutdown requested from {} {}", self.server_name, self.id),
            Err(e) => tracing::debug!("Shutdown request to {} failed: {}", self.server_name, e),
        }
    }

    /// Shutdown request with a bounded wait, then force-kill.
    pub async fn shutdown_and_kill(&self) {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enter_shutting_down();

        if let Err(e) = self
            .connection
            .request::<Value>("shutdown", None, self.timeouts.shutdown)
            .await
        {
            tracing::debug!("{} {} shutdown: {}", self.server_name, self.id, e);
        }

        self.kill_running_server_process();
        self.connection.close().await;
        self.state
            .store(SessionState::Terminated as u8, Ordering::Release);
    }

    /// Force termination without any protocol exchange.
    pub fn kill_running_server_process(&self) {
        if let Some(process) = &self.process
            && process.is_alive()
        {
            tracing::debug!("Killing {} server process {:?}", self.server_name, process.id());
            process.kill();
        }
        self.state
            .store(SessionState::Terminated as u8, Ordering::Release);
    }

    /// Full cleanup: shutdown, exit, wait for the process, then kill.
    /// Runs at most once per session.
    pub async fn dispose(&self) {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        self.enter_shutting_down();
        tracing::debug!("Disposing {} session {} ({})", self.server_name, self.id, self.key);

        if self.is_process_alive() {
            if let Err(e) = self
                .connection
                .request::<Value>("shutdown", None, self.timeouts.shutdown)
                .await
            {
                tracing::debug!("{} {} shutdown: {}", self.server_name, self.id, e);
            }
            if let Err(e) = self.connection.notify("exit", None).await {
                tracing::debug!("{} {} exit: {}", self.server_name, self.id, e);
            }
        }
        self.connection.close().await;

        if let Some(process) = &self.process
            && !wait_for_exit(process.as_ref(), self.timeouts.exit_wait, EXIT_POLL).await
        {
            tracing::warn!(
                "{} did not exit within {}s, killing",
                self.server_name,
                self.timeouts.exit_wait.as_secs()
            );
            process.kill();
        }

        self.state
            .store(SessionState::Terminated as u8, Ordering::Release);
        tracing::info!("{} session {} stopped", self.server_name, self.id);
    }

    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::Acquire)
    }

    /// Mark a session that never became usable as finished and kill it.
    pub(crate) fn abandon(&self) {
        self.cleaned_up.store(true, Ordering::Release);
        self.kill_running_server_process();
    }

    fn enter_shutting_down(&self) {
        self.transition(SessionState::Ready, SessionState::ShuttingDown);
        self.transition(SessionState::Starting, SessionState::ShuttingDown);
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("server", &self.server_name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.cleaned_up.load(Ordering::Acquire)
            && let Some(process) = &self.process
            && process.is_alive()
        {
            process.kill();
            tracing::debug!("Session {} dropped, process killed", self.id);
        }
    }
}
