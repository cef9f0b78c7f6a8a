use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Platform-configured resource bindings (storage locations, secrets, ...).
///
/// Opaque to this layer: built once by the host and passed through to the
/// embedded runtime on every request. `Debug` prints names only so values
/// never end up in logs.
#[derive(Clone, Default)]
pub struct EnvBindings {
    entries: Arc<BTreeMap<String, String>>,
}

impl EnvBindings {
    pub fn new(entries: BTreeMap<String, String>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for EnvBindings {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for EnvBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Per-request ambient bundle handed to the embedded runtime.
///
/// Created by the host for exactly one invocation and dropped when it
/// completes. Carries the caller's cancellation signal and a `wait_until`
/// hook for background work that must outlive the returned response.
#[derive(Debug)]
pub struct ExecutionContext {
    request_id: String,
    remote_addr: Option<SocketAddr>,
    cancellation: CancellationToken,
    background: TaskTracker,
}

impl ExecutionContext {
    /// Create a context whose background work is tracked by `background`.
    pub fn new(background: TaskTracker) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            remote_addr: None,
            cancellation: CancellationToken::new(),
            background,
        }
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Replace the cancellation signal, e.g. with a child of the host's
    /// shutdown token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Keep `work` running after the response has been returned.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.background.spawn(work);
    }

    /// Like [`wait_until`](Self::wait_until), but hands back the task handle.
    pub fn spawn_background<F>(&self, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.background.spawn(work)
    }
}
