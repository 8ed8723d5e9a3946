//! Background Task Scheduler
//!
//! Per-file table of named tasks. Each (file, task) pair has at most one
//! pending run, guarded by a cancellation token; scheduling again cancels
//! the token and installs a new one, so rapid requests coalesce into one
//! run after the debounce delay. Runs execute one at a time on the
//! background lane and resolve the session for the file when they start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::infra::lsp::registry::SessionEvent;
use crate::infra::lsp::session::Session;

/// Where a run finds the session currently serving a file
#[async_trait]
pub trait SessionSource: Send + Sync {
    async fn session_for(&self, file: &Path) -> Option<Arc<Session>>;
}

/// A named, idempotent unit of work for one file
#[async_trait]
pub trait BackgroundTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, session: Arc<Session>, file: &Path) -> Result<(), TaskError>;
}

/// Single-worker queue
#[derive(Clone)]
struct Lane {
    name: &'static str,
    tx: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl Lane {
    fn spawn(name: &'static str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // A panicking job must not take the lane down with it
                if let Err(e) = tokio::spawn(job).await {
                    tracing::error!("{} lane job failed: {}", name, e);
                }
            }
        });
        Self { name, tx }
    }

    fn post(&self, job: BoxFuture<'static, ()>) {
        if self.tx.send(job).is_err() {
            tracing::debug!("{} lane closed, job dropped", self.name);
        }
    }
}

struct TaskEntry {
    task: Arc<dyn BackgroundTask>,
    token: CancellationToken,
}

struct Inner {
    source: Arc<dyn SessionSource>,
    debounce: Duration,
    tasks: Mutex<HashMap<PathBuf, HashMap<String, TaskEntry>>>,
    background: Lane,
    events: Lane,
}

#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

impl TaskScheduler {
    /// Must be called inside a tokio runtime; the lanes are spawned here.
    pub fn new(source: Arc<dyn SessionSource>, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                debounce,
                tasks: Mutex::new(HashMap::new()),
                background: Lane::spawn("background"),
                events: Lane::spawn("events"),
            }),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.inner.debounce
    }

    /// Register `task` for `file` and run it after the debounce delay.
    /// A pending run of the same task is replaced.
    pub fn schedule(&self, file: &Path, task: Arc<dyn BackgroundTask>) {
        self.inner.install(file, task, self.inner.debounce);
    }

    /// Restart the debounce window of a registered task. Returns false
    /// when the task is not registered for `file`.
    pub fn reschedule(&self, file: &Path, name: &str) -> bool {
        let task = {
            let tasks = self.inner.tasks.lock();
            tasks
                .get(file)
                .and_then(|entries| entries.get(name))
                .map(|entry| Arc::clone(&entry.task))
        };
        match task {
            Some(task) => {
                self.inner.install(file, task, self.inner.debounce);
                true
            }
            None => false,
        }
    }

    /// Remove the task and cancel its pending run. A run already executing
    /// finishes.
    pub fn cancel(&self, file: &Path, name: &str) -> bool {
        let mut tasks = self.inner.tasks.lock();
        let Some(entries) = tasks.get_mut(file) else {
            return false;
        };
        let removed = entries.remove(name);
        if entries.is_empty() {
            tasks.remove(file);
        }
        match removed {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget every task of `file`, e.g. when it is closed.
    pub fn cancel_all(&self, file: &Path) -> usize {
        let removed = self.inner.tasks.lock().remove(file).unwrap_or_default();
        for entry in removed.values() {
            entry.token.cancel();
        }
        removed.len()
    }

    /// Post every registered task of `file` immediately.
    pub fn run_all_now(&self, file: &Path) {
        let tasks: Vec<Arc<dyn BackgroundTask>> = {
            let tasks = self.inner.tasks.lock();
            tasks
                .get(file)
                .map(|entries| entries.values().map(|e| Arc::clone(&e.task)).collect())
                .unwrap_or_default()
        };
        for task in tasks {
            self.inner.install(file, task, Duration::ZERO);
        }
    }

    pub fn tasks_for(&self, file: &Path) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .tasks
            .lock()
            .get(file)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.inner.tasks.lock().keys().cloned().collect()
    }

    /// Run arbitrary work on the background lane.
    pub fn run_on_background<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.background.post(Box::pin(job));
    }

    /// Run editor-event work on its own lane, apart from slow protocol calls.
    pub fn run_on_events<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.events.post(Box::pin(job));
    }

    /// Re-run every file's tasks whenever a new session appears.
    pub fn follow(&self, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Created(session)) => {
                        tracing::debug!("Session {} created, re-running tasks", session.id());
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!("Missed {} session events, re-running tasks", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                let inner = scheduler.clone();
                scheduler.run_on_events(async move {
                    for file in inner.files() {
                        inner.run_all_now(&file);
                    }
                });
            }
        })
    }
}

impl Inner {
    /// Replace the pending run of (file, task) with one after `delay`.
    fn install(self: &Arc<Self>, file: &Path, task: Arc<dyn BackgroundTask>, delay: Duration) {
        let token = CancellationToken::new();
        {
            let mut tasks = self.tasks.lock();
            let entries = tasks.entry(file.to_path_buf()).or_default();
            if let Some(previous) = entries.insert(
                task.name().to_string(),
                TaskEntry {
                    task: Arc::clone(&task),
                    token: token.clone(),
                },
            ) {
                previous.token.cancel();
            }
        }
        self.arm(file.to_path_buf(), task, token, delay);
    }

    fn arm(
        self: &Arc<Self>,
        file: PathBuf,
        task: Arc<dyn BackgroundTask>,
        token: CancellationToken,
        delay: Duration,
    ) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            if token.is_cancelled() {
                return;
            }

            let runner = Arc::clone(&inner);
            inner
                .background
                .post(Box::pin(async move { runner.execute(file, task, token).await }));
        });
    }

    async fn execute(
        self: Arc<Self>,
        file: PathBuf,
        task: Arc<dyn BackgroundTask>,
        token: CancellationToken,
    ) {
        if token.is_cancelled() {
            return;
        }

        let Some(session) = self.source.session_for(&file).await else {
            tracing::trace!("No session for {}, skipping {}", file.display(), task.name());
            return;
        };

        match task.run(session, &file).await {
            Ok(()) => {}
            Err(TaskError::Interrupted) => {
                // Only the current schedule re-submits; a newer one supersedes it
                if !token.is_cancelled() {
                    tracing::debug!(
                        "{} for {} interrupted, re-submitting",
                        task.name(),
                        file.display()
                    );
                    self.arm(file, task, token, self.debounce);
                }
            }
            Err(TaskError::Lsp(e)) => {
                tracing::warn!("{} for {} failed: {}", task.name(), file.display(), e);
            }
        }
    }
}
