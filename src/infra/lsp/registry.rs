//! Session Registry
//!
//! Owns every live session. Content-type sessions are keyed by
//! (root, content type) and held weakly; the keep-alive map holds the
//! strong reference and is what the idle reaper scans. Manually attached
//! sessions live in a separate, strongly held table keyed by root and
//! file extension.
//!
//! All table mutation is serialized behind one async mutex, held across
//! launch and handshake, so one key never gets two servers.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast};

use super::servers::{ProviderContext, ProviderRegistry};
use super::session::{Session, SessionId};
use super::transport::{DefaultTransport, ServerDescription, Transport};
use crate::config::RuntimeConfig;
use crate::error::SessionError;
use crate::models::config::BinderConfig;
use crate::models::workspace::{SessionKey, canonical_dir, file_extension, is_under, parent_dir};
use crate::services::project::{ContentTypes, ProjectLocator};
use crate::services::scheduler::SessionSource;

const EVENT_CAPACITY: usize = 64;

/// Fired when a new session becomes available (never on reuse)
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created(Arc<Session>),
}

struct AttachedRoot {
    root: PathBuf,
    by_extension: HashMap<String, Arc<Session>>,
}

#[derive(Default)]
struct Tables {
    by_key: HashMap<SessionKey, Weak<Session>>,
    keep_alive: HashMap<SessionId, (Arc<Session>, Instant)>,
    attached: Vec<AttachedRoot>,
}

impl Tables {
    /// Usable session for `key`. A stale entry is dropped and disposed.
    fn live(&mut self, key: &SessionKey) -> Option<Arc<Session>> {
        let session = self.by_key.get(key)?.upgrade();
        match session {
            Some(session) if session.is_usable() => Some(session),
            Some(session) => {
                tracing::info!(
                    "Discarding stale session {} for {} ({:?})",
                    session.id(),
                    key,
                    session.state()
                );
                self.by_key.remove(key);
                self.keep_alive.remove(&session.id());
                spawn_dispose(session);
                None
            }
            None => {
                self.by_key.remove(key);
                None
            }
        }
    }

    fn touch(&mut self, session: &Arc<Session>) {
        self.keep_alive
            .insert(session.id(), (Arc::clone(session), Instant::now()));
    }

    fn forget(&mut self, session: &Session) {
        self.keep_alive.remove(&session.id());
        if let Some(weak) = self.by_key.get(session.key())
            && weak.upgrade().is_none_or(|s| s.id() == session.id())
        {
            self.by_key.remove(session.key());
        }
    }

    fn everything(&self) -> BTreeMap<SessionId, Arc<Session>> {
        let mut all = BTreeMap::new();
        for (session, _) in self.keep_alive.values() {
            all.insert(session.id(), Arc::clone(session));
        }
        for session in self.by_key.values().filter_map(Weak::upgrade) {
            all.insert(session.id(), session);
        }
        for attached in &self.attached {
            for session in attached.by_extension.values() {
                all.insert(session.id(), Arc::clone(session));
            }
        }
        all
    }
}

fn spawn_dispose(session: Arc<Session>) {
    tokio::spawn(async move {
        session.dispose().await;
    });
}

pub struct SessionRegistry {
    tables: Mutex<Tables>,
    providers: ProviderRegistry,
    transport: Arc<dyn Transport>,
    content_types: ContentTypes,
    locator: ProjectLocator,
    config: RuntimeConfig,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionRegistry {
    pub fn new(
        providers: ProviderRegistry,
        transport: Arc<dyn Transport>,
        content_types: ContentTypes,
        config: RuntimeConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            tables: Mutex::new(Tables::default()),
            providers,
            transport,
            content_types,
            locator: ProjectLocator::default(),
            config,
            events,
        }
    }

    /// Registry with the configured command providers and the process/TCP transport.
    pub fn from_config(config: &BinderConfig) -> Self {
        Self::new(
            ProviderRegistry::from_config(config),
            Arc::new(DefaultTransport),
            ContentTypes::from_config(config),
            RuntimeConfig::from(config),
        )
    }

    pub fn with_locator(mut self, locator: ProjectLocator) -> Self {
        self.locator = locator;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn content_types(&self) -> &ContentTypes {
        &self.content_types
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Session for `file`, with the owning project found by root markers.
    pub async fn resolve_file(&self, file: &Path) -> Option<Arc<Session>> {
        let owner = self.locator.find_root(file);
        self.resolve(owner.as_deref(), file).await
    }

    /// Session serving `file`: an attached session when one covers it,
    /// otherwise the content-type session (created on demand).
    pub async fn resolve(&self, owner: Option<&Path>, file: &Path) -> Option<Arc<Session>> {
        if let Some(session) = self.attached_for(file).await {
            return Some(session);
        }

        let Some(content_type) = self.content_types.for_file(file) else {
            tracing::debug!("No content type for {}", file.display());
            return None;
        };

        match self.get_or_create(owner, file, content_type).await {
            Ok(session) => Some(session),
            Err(e) => {
                tracing::warn!("No session for {}: {}", file.display(), e);
                None
            }
        }
    }

    /// Search stops at the first attached root containing `file`, whether
    /// or not it has a session for the file's extension.
    async fn attached_for(&self, file: &Path) -> Option<Arc<Session>> {
        let mut tables = self.tables.lock().await;
        let index = tables
            .attached
            .iter()
            .position(|attached| is_under(&attached.root, file))?;

        let ext = file_extension(file)?;
        let attached = &mut tables.attached[index];
        let session = attached.by_extension.get(&ext).cloned()?;
        if session.is_usable() {
            return Some(session);
        }

        tracing::info!("Attached session {} for .{} is gone", session.id(), ext);
        attached
            .by_extension
            .retain(|_, s| s.id() != session.id());
        spawn_dispose(session);
        None
    }

    /// Find or start the session for (root, content type).
    ///
    /// The root is `owner` when known, else the anchor file's directory.
    /// Blocks for the whole launch and handshake when a server is started.
    pub async fn get_or_create(
        &self,
        owner: Option<&Path>,
        anchor: &Path,
        content_type: &str,
    ) -> Result<Arc<Session>, SessionError> {
        let root = match owner {
            Some(owner) => canonical_dir(owner),
            None => canonical_dir(&parent_dir(anchor)),
        };
        let key = SessionKey::new(&root, content_type);

        let mut tables = self.tables.lock().await;
        if let Some(session) = tables.live(&key) {
            tables.touch(&session);
            return Ok(session);
        }

        let context = ProviderContext {
            content_type: content_type.to_string(),
            project: owner.map(canonical_dir),
            root: root.clone(),
        };
        let description =
            self.providers
                .describe(&context)
                .await
                .ok_or_else(|| SessionError::NoProvider {
                    content_type: content_type.to_string(),
                })?;

        let session = self.launch(key.clone(), &root, &description).await?;
        tables.by_key.insert(key, Arc::downgrade(&session));
        tables.touch(&session);
        drop(tables);

        let _ = self.events.send(SessionEvent::Created(Arc::clone(&session)));
        Ok(session)
    }

    /// Start a project's server without a file in hand.
    pub async fn ensure_running(
        &self,
        project_dir: &Path,
        content_type: &str,
    ) -> Result<Arc<Session>, SessionError> {
        self.get_or_create(Some(project_dir), project_dir, content_type)
            .await
    }

    /// Connect to an already running server and serve every file under
    /// `root` with one of `extensions` from it. Replaces any previous
    /// attachment of the same root.
    pub async fn attach(
        &self,
        root: &Path,
        description: ServerDescription,
        extensions: &[String],
    ) -> Result<Arc<Session>, SessionError> {
        let root = canonical_dir(root);
        let extensions: Vec<String> = extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(SessionError::NoExtensions { root });
        }
        let key = SessionKey::new(&root, format!("attached:{}", extensions.join(",")));

        let mut tables = self.tables.lock().await;
        let session = self.launch(key, &root, &description).await?;

        let by_extension: HashMap<String, Arc<Session>> = extensions
            .iter()
            .map(|ext| (ext.clone(), Arc::clone(&session)))
            .collect();

        let replaced = match tables.attached.iter_mut().find(|a| a.root == root) {
            Some(existing) => std::mem::replace(&mut existing.by_extension, by_extension),
            None => {
                tables.attached.push(AttachedRoot {
                    root: root.clone(),
                    by_extension,
                });
                HashMap::new()
            }
        };
        drop(tables);

        let mut old: BTreeMap<SessionId, Arc<Session>> = BTreeMap::new();
        for session in replaced.into_values() {
            old.insert(session.id(), session);
        }
        for (_, session) in old {
            spawn_dispose(session);
        }

        tracing::info!(
            "Attached {} to {} for {:?}",
            description.name,
            root.display(),
            extensions
        );
        let _ = self.events.send(SessionEvent::Created(Arc::clone(&session)));
        Ok(session)
    }

    async fn launch(
        &self,
        key: SessionKey,
        root: &Path,
        description: &ServerDescription,
    ) -> Result<Arc<Session>, SessionError> {
        let connection = self.transport.open(description, root).await?;
        let session = Session::start(key, root, &description.name, connection, &self.config);

        let outcome = match session.initialize(&self.config).await {
            Ok(outcome) => outcome,
            Err(e) => {
                session.abandon();
                return Err(e.into());
            }
        };

        if outcome.process_exited {
            session.abandon();
            return Err(SessionError::ProcessExited {
                server: description.name.clone(),
            });
        }
        Ok(session)
    }

    /// Live sessions from both tables, each once.
    pub async fn all_sessions(&self) -> Vec<Arc<Session>> {
        let tables = self.tables.lock().await;
        tables
            .everything()
            .into_values()
            .filter(|s| s.is_process_alive())
            .collect()
    }

    /// Drop sessions idle for longer than `keep_alive` and dispose them.
    pub async fn evict_idle(&self, keep_alive: Duration) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut tables = self.tables.lock().await;
            let ids: Vec<SessionId> = tables
                .keep_alive
                .iter()
                .filter(|(_, (_, last))| last.elapsed() > keep_alive)
                .map(|(id, _)| *id)
                .collect();

            let mut expired = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some((session, _)) = tables.keep_alive.remove(&id) {
                    tables.forget(&session);
                    expired.push(session);
                }
            }
            expired
        };

        let count = expired.len();
        for session in expired {
            tracing::info!(
                "Evicting idle {} session {} ({})",
                session.server_name(),
                session.id(),
                session.key()
            );
            spawn_dispose(session);
        }
        count
    }

    /// Remove the session for `key` and stop its server; the next
    /// lookup launches a fresh one.
    pub async fn restart(&self, key: &SessionKey) -> bool {
        let session = {
            let mut tables = self.tables.lock().await;
            let session = tables.by_key.remove(key).and_then(|w| w.upgrade());
            if let Some(session) = &session {
                tables.keep_alive.remove(&session.id());
            }
            session
        };

        match session {
            Some(session) => {
                tracing::info!("Restarting {} for {}", session.server_name(), key);
                session.shutdown_and_kill().await;
                true
            }
            None => false,
        }
    }

    /// Force-kill every registered server. Host exit path.
    pub async fn kill_all(&self) {
        let sessions = {
            let mut tables = self.tables.lock().await;
            let all = tables.everything();
            *tables = Tables::default();
            all
        };

        for session in sessions.into_values() {
            session.kill_running_server_process();
        }
    }

    /// Graceful counterpart of [`SessionRegistry::kill_all`]. Every
    /// session it took off the tables is force-killed afterwards, including
    /// ones whose cleanup was already running elsewhere.
    pub async fn shutdown_all(&self) {
        let sessions = {
            let mut tables = self.tables.lock().await;
            let all = tables.everything();
            *tables = Tables::default();
            all
        };

        futures::future::join_all(sessions.values().map(|session| session.dispose())).await;
        for session in sessions.values() {
            session.kill_running_server_process();
        }
    }
}

#[async_trait]
impl SessionSource for SessionRegistry {
    async fn session_for(&self, file: &Path) -> Option<Arc<Session>> {
        self.resolve_file(file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::lsp::session::SessionState;
    use crate::infra::lsp::testing::{FakeProvider, FakeTransport, ServerScript};
    use serde_json::Value;

    const FOO: &str = "text/x-foo";

    fn registry_with(transport: Arc<FakeTransport>) -> Arc<SessionRegistry> {
        let config = RuntimeConfig::default()
            .with_handshake_poll(Duration::from_millis(10))
            .with_shutdown_timeouts(Duration::from_millis(200), Duration::from_millis(200));
        registry_with_config(transport, config)
    }

    fn registry_with_config(
        transport: Arc<FakeTransport>,
        config: RuntimeConfig,
    ) -> Arc<SessionRegistry> {
        let mut providers = ProviderRegistry::new();
        providers.register(FakeProvider::new("foo-ls", &[FOO]));

        let mut content_types = ContentTypes::default();
        content_types.insert("foo", FOO);
        content_types.insert("bar", "text/x-bar");

        Arc::new(SessionRegistry::new(
            providers,
            transport,
            content_types,
            config,
        ))
    }

    fn registry() -> (Arc<FakeTransport>, Arc<SessionRegistry>) {
        let transport = FakeTransport::new(ServerScript::exits_on_exit());
        let registry = registry_with(Arc::clone(&transport));
        (transport, registry)
    }

    #[tokio::test]
    async fn test_same_key_returns_same_session() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        let first = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        let second = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.launches(), 1);
        assert_eq!(first.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_distinct_roots_get_distinct_sessions() {
        let (transport, registry) = registry();
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();

        let in_a = registry
            .resolve(Some(a.path()), &a.path().join("one.foo"))
            .await
            .unwrap();
        let in_b = registry
            .resolve(Some(b.path()), &b.path().join("two.foo"))
            .await
            .unwrap();
        let also_a = registry
            .resolve(Some(a.path()), &a.path().join("sub").join("three.foo"))
            .await
            .unwrap();

        assert_ne!(in_a.id(), in_b.id());
        assert_eq!(in_a.id(), also_a.id());
        assert_eq!(transport.launches(), 2);
    }

    #[tokio::test]
    async fn test_without_owner_root_is_parent_dir() {
        let (_transport, registry) = registry();
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("pkg");
        std::fs::create_dir(&nested).unwrap();

        let session = registry
            .get_or_create(None, &nested.join("x.foo"), FOO)
            .await
            .unwrap();
        assert_eq!(session.root(), canonical_dir(&nested));
    }

    #[tokio::test]
    async fn test_dead_process_is_replaced() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        let first = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        transport.server(0).process().set_alive(false);

        let second = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.is_usable());
        assert_eq!(transport.launches(), 2);
    }

    #[tokio::test]
    async fn test_closed_connection_with_live_process_is_replaced() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        let first = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        let server = transport.server(0);
        server.hang_up();
        while !first.connection().is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(first.is_process_alive());

        let second = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(second.is_usable());
        assert_eq!(transport.launches(), 2);
        assert!(second.query::<Value>("custom/echo", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_session_is_replaced() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        let first = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        first.shutdown().await;
        transport.server(0).wait_for("shutdown", 1).await;
        assert_eq!(transport.server(0).process().kills(), 0);

        let second = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(transport.launches(), 2);
    }

    #[tokio::test]
    async fn test_no_provider() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();

        let err = registry
            .get_or_create(Some(root.path()), &root.path().join("a.bar"), "text/x-bar")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NoProvider { .. }));
        assert!(
            registry
                .resolve(Some(root.path()), &root.path().join("a.bar"))
                .await
                .is_none()
        );
        assert!(
            registry
                .resolve(Some(root.path()), &root.path().join("README"))
                .await
                .is_none()
        );
        assert_eq!(transport.launches(), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_creates_nothing_and_retries() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        transport.refuse(true);
        let err = registry
            .get_or_create(Some(root.path()), &file, FOO)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Lsp(_)));
        assert!(registry.all_sessions().await.is_empty());

        transport.refuse(false);
        assert!(registry.get_or_create(Some(root.path()), &file, FOO).await.is_ok());
    }

    #[tokio::test]
    async fn test_process_death_during_handshake_registers_nothing() {
        let transport = FakeTransport::new(ServerScript {
            silent: vec!["initialize".to_string()],
            ..ServerScript::default()
        });
        let registry = registry_with(Arc::clone(&transport));
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        let pending = {
            let registry = Arc::clone(&registry);
            let owner = root.path().to_path_buf();
            tokio::spawn(async move { registry.get_or_create(Some(&owner), &file, FOO).await })
        };

        while transport.launches() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let server = transport.server(0);
        server.wait_for("initialize", 1).await;
        server.process().set_alive(false);

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, SessionError::ProcessExited { .. }));
        assert!(registry.all_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_eviction_shuts_down_exactly_once() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        let session = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(registry.evict_idle(Duration::ZERO).await, 1);
        assert_eq!(registry.evict_idle(Duration::ZERO).await, 0);

        let server = transport.server(0);
        server.wait_for("exit", 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.count("shutdown"), 1);
        assert!(session.is_cleaned_up());

        // The evicted session is gone; the next lookup launches anew
        let fresh = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        assert_ne!(fresh.id(), session.id());
    }

    #[tokio::test]
    async fn test_recent_sessions_survive_eviction() {
        let (_transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        registry
            .get_or_create(Some(root.path()), &root.path().join("a.foo"), FOO)
            .await
            .unwrap();

        assert_eq!(registry.evict_idle(Duration::from_secs(600)).await, 0);
        assert_eq!(registry.all_sessions().await.len(), 1);
    }

    #[tokio::test]
    async fn test_attached_sessions() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();

        let description = ServerDescription::command("remote", "unused", Vec::new());
        let attached = registry
            .attach(root.path(), description, &["foo".to_string()])
            .await
            .unwrap();

        let hit = registry
            .resolve(None, &root.path().join("src").join("main.foo"))
            .await
            .unwrap();
        assert_eq!(hit.id(), attached.id());

        // No attached entry for .bar, and no provider either
        assert!(
            registry
                .resolve(None, &root.path().join("main.bar"))
                .await
                .is_none()
        );

        let outside = tempfile::tempdir().unwrap();
        let regular = registry
            .resolve(Some(outside.path()), &outside.path().join("x.foo"))
            .await
            .unwrap();
        assert_ne!(regular.id(), attached.id());

        // Eviction leaves attached sessions alone
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.evict_idle(Duration::ZERO).await;
        assert!(attached.is_usable());
        assert_eq!(registry.all_sessions().await.len(), 1);
        assert_eq!(transport.launches(), 2);
    }

    #[tokio::test]
    async fn test_attach_without_extensions_is_rejected() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let exts = ["foo".to_string()];

        let kept = registry
            .attach(root.path(), ServerDescription::command("r1", "unused", Vec::new()), &exts)
            .await
            .unwrap();

        for empty in [Vec::new(), vec![".".to_string()]] {
            let err = registry
                .attach(root.path(), ServerDescription::command("r2", "unused", Vec::new()), &empty)
                .await
                .unwrap_err();
            assert!(matches!(err, SessionError::NoExtensions { .. }));
        }

        assert_eq!(transport.launches(), 1);
        assert!(kept.is_usable());
        let hit = registry.resolve(None, &root.path().join("a.foo")).await.unwrap();
        assert_eq!(hit.id(), kept.id());
    }

    #[tokio::test]
    async fn test_reattach_disposes_previous() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let exts = ["foo".to_string()];

        let first = registry
            .attach(root.path(), ServerDescription::command("r1", "unused", Vec::new()), &exts)
            .await
            .unwrap();
        let second = registry
            .attach(root.path(), ServerDescription::command("r2", "unused", Vec::new()), &exts)
            .await
            .unwrap();

        assert_ne!(first.id(), second.id());
        transport.server(0).wait_for("shutdown", 1).await;
        let all = registry.all_sessions().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id(), second.id());
    }

    #[tokio::test]
    async fn test_events_fire_on_creation_only() {
        let (_transport, registry) = registry();
        let mut events = registry.subscribe();
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        let session = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();

        let SessionEvent::Created(created) = events.recv().await.unwrap();
        assert_eq!(created.id(), session.id());
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_kill_all_reaches_both_tables() {
        let (transport, registry) = registry();
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();

        registry
            .get_or_create(Some(a.path()), &a.path().join("x.foo"), FOO)
            .await
            .unwrap();
        registry
            .attach(
                b.path(),
                ServerDescription::command("remote", "unused", Vec::new()),
                &["foo".to_string()],
            )
            .await
            .unwrap();

        registry.kill_all().await;

        assert_eq!(transport.server(0).process().kills(), 1);
        assert_eq!(transport.server(1).process().kills(), 1);
        assert!(registry.all_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_all_kills_sessions_already_being_disposed() {
        let transport = FakeTransport::new(ServerScript::default());
        let config = RuntimeConfig::default()
            .with_handshake_poll(Duration::from_millis(10))
            .with_shutdown_timeouts(Duration::from_millis(200), Duration::from_secs(30));
        let registry = registry_with_config(Arc::clone(&transport), config);
        let root = tempfile::tempdir().unwrap();

        let session = registry.ensure_running(root.path(), FOO).await.unwrap();
        let lingering = {
            let session = Arc::clone(&session);
            tokio::spawn(async move { session.dispose().await })
        };
        let server = transport.server(0);
        server.wait_for("exit", 1).await;
        assert_eq!(server.process().kills(), 0);

        tokio::time::timeout(Duration::from_secs(5), registry.shutdown_all())
            .await
            .expect("shutdown_all must not wait on another cleanup");

        assert_eq!(server.process().kills(), 1);
        assert!(registry.all_sessions().await.is_empty());
        lingering.abort();
    }

    #[tokio::test]
    async fn test_restart_relaunches() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();

        let first = registry.ensure_running(root.path(), FOO).await.unwrap();
        assert!(registry.restart(first.key()).await);
        assert_eq!(transport.server(0).count("shutdown"), 1);
        assert_eq!(first.state(), SessionState::Terminated);

        let second = registry.ensure_running(root.path(), FOO).await.unwrap();
        assert_ne!(first.id(), second.id());
        assert!(!registry.restart(&SessionKey::new(root.path(), "text/x-none")).await);
    }

    #[tokio::test]
    async fn test_weak_entry_without_keep_alive_is_recreated() {
        let (transport, registry) = registry();
        let root = tempfile::tempdir().unwrap();
        let file = root.path().join("a.foo");

        let first_id = registry
            .get_or_create(Some(root.path()), &file, FOO)
            .await
            .unwrap()
            .id();
        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.evict_idle(Duration::ZERO).await;

        let second = registry.get_or_create(Some(root.path()), &file, FOO).await.unwrap();
        assert_ne!(second.id(), first_id);
        assert_eq!(transport.launches(), 2);
    }
}
