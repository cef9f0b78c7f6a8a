use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Instant;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};

use crate::error::InitializationError;
use crate::runtime::RuntimeFactory;

type Outcome<R> = Result<Arc<R>, InitializationError>;
type Construction<R> = Shared<BoxFuture<'static, Outcome<R>>>;

/// Observable lifecycle of the runtime handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    /// Nobody has asked for the runtime yet.
    Uninitialized,
    /// Construction started and has not finished.
    Pending,
    Ready,
    Failed,
}

/// Builds the embedded runtime at most once and shares it.
///
/// One loader models one process instance. The first call to
/// [`acquire`](Self::acquire) (or [`prewarm`](Self::prewarm)) starts
/// construction on its own tokio task and stores the pending result in a
/// shared future. Every later caller attaches to that same future, so all of
/// them resolve with the same handle or the same [`InitializationError`].
///
/// Failures are cached: once construction has failed, every call returns
/// that failure and construction is never attempted again. Recovering means
/// replacing the process instance.
///
/// Because construction runs on a detached task, a caller that gives up
/// waiting (timeout, dropped future) does not cancel or restart it.
pub struct RuntimeLoader<F: RuntimeFactory> {
    factory: Arc<F>,
    /// `None` until the first accessor starts construction.
    slot: Mutex<Option<Construction<F::Runtime>>>,
    /// Set by the construction task itself, whether or not anyone is waiting.
    outcome: Arc<OnceLock<Outcome<F::Runtime>>>,
    attempts: AtomicUsize,
}

impl<F: RuntimeFactory> RuntimeLoader<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
            slot: Mutex::new(None),
            outcome: Arc::new(OnceLock::new()),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Return the runtime handle, constructing it on first use.
    ///
    /// Resolved handles (and cached failures) are returned without
    /// suspending.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime while construction has not
    /// started yet, since construction is spawned onto the current runtime.
    pub async fn acquire(&self) -> Result<Arc<F::Runtime>, InitializationError> {
        // Fast path
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }

        let construction = self.construction();
        if let Some(outcome) = construction.peek() {
            return outcome.clone();
        }

        tracing::debug!("Waiting for embedded runtime construction");
        construction.await
    }

    /// Start construction without waiting for it.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime while construction has not
    /// started yet.
    pub fn prewarm(&self) {
        let _ = self.construction();
    }

    pub fn state(&self) -> LoaderState {
        match self.outcome.get() {
            Some(Ok(_)) => return LoaderState::Ready,
            Some(Err(_)) => return LoaderState::Failed,
            None => {}
        }
        match self.lock_slot().as_ref() {
            None => LoaderState::Uninitialized,
            // No recorded outcome: still running, or the task was aborted.
            Some(construction) => match construction.peek() {
                None => LoaderState::Pending,
                Some(Ok(_)) => LoaderState::Ready,
                Some(Err(_)) => LoaderState::Failed,
            },
        }
    }

    /// Number of constructions started by this loader (0 or 1).
    pub fn construction_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Construction<F::Runtime>>> {
        // The critical sections below never panic, so a poisoned lock still
        // holds a consistent slot.
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn construction(&self) -> Construction<F::Runtime> {
        let mut slot = self.lock_slot();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }

        let construction = self.start_construction();
        *slot = Some(construction.clone());
        construction
    }

    fn start_construction(&self) -> Construction<F::Runtime> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let factory = Arc::clone(&self.factory);
        let recorded = Arc::clone(&self.outcome);

        tracing::info!("Constructing embedded runtime");

        let task = tokio::spawn(async move {
            let started = Instant::now();
            let result = AssertUnwindSafe(factory.construct()).catch_unwind().await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let outcome = match result {
                Ok(Ok(runtime)) => {
                    tracing::info!(elapsed_ms, "Embedded runtime ready");
                    Ok(Arc::new(runtime))
                }
                Ok(Err(e)) => {
                    tracing::error!(elapsed_ms, "Embedded runtime construction failed: {e:#}");
                    Err(InitializationError::from_anyhow(&e))
                }
                Err(_) => {
                    tracing::error!(elapsed_ms, "Embedded runtime construction panicked");
                    Err(InitializationError::new("runtime construction panicked"))
                }
            };
            // Only this task ever sets it.
            let _ = recorded.set(outcome.clone());
            outcome
        });

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => Err(InitializationError::new(format!(
                    "runtime construction task aborted: {join_error}"
                ))),
            }
        }
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{EnvBindings, ExecutionContext};
    use crate::error::ForwardingError;
    use crate::runtime::{EmbeddedRuntime, FetchFuture};
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug)]
    struct NullRuntime {
        serial: usize,
    }

    impl EmbeddedRuntime for NullRuntime {
        type Body = ();

        fn fetch(
            &self,
            _request: http::Request<()>,
            _env: EnvBindings,
            _ctx: ExecutionContext,
        ) -> FetchFuture<'_> {
            Box::pin(async { Err(ForwardingError::Guest(anyhow::anyhow!("unused"))) })
        }
    }

    /// Counts constructions; optionally blocks until released, optionally fails.
    struct CountingFactory {
        built: Arc<AtomicUsize>,
        gate: Option<Arc<Notify>>,
        fail: bool,
    }

    impl CountingFactory {
        fn new() -> Self {
            Self {
                built: Arc::new(AtomicUsize::new(0)),
                gate: None,
                fail: false,
            }
        }
    }

    impl RuntimeFactory for CountingFactory {
        type Runtime = NullRuntime;

        fn construct(
            &self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<NullRuntime>> + Send + '_>> {
            Box::pin(async move {
                let serial = self.built.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(gate) = &self.gate {
                    gate.notified().await;
                }
                if self.fail {
                    anyhow::bail!("image missing");
                }
                Ok(NullRuntime { serial })
            })
        }
    }

    #[tokio::test]
    async fn new_loader_is_uninitialized() {
        let loader = RuntimeLoader::new(CountingFactory::new());
        assert_eq!(loader.state(), LoaderState::Uninitialized);
        assert_eq!(loader.construction_attempts(), 0);
    }

    #[tokio::test]
    async fn success_is_cached() {
        let factory = CountingFactory::new();
        let built = factory.built.clone();
        let loader = RuntimeLoader::new(factory);

        let first = loader.acquire().await.unwrap();
        let second = loader.acquire().await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.serial, 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(loader.state(), LoaderState::Ready);
    }

    #[tokio::test]
    async fn failure_is_cached_and_not_retried() {
        let mut factory = CountingFactory::new();
        factory.fail = true;
        let built = factory.built.clone();
        let loader = RuntimeLoader::new(factory);

        let first = loader.acquire().await.unwrap_err();
        let second = loader.acquire().await.unwrap_err();

        assert!(first.same_failure(&second));
        assert!(first.message().contains("image missing"));
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(loader.state(), LoaderState::Failed);
        assert_eq!(loader.construction_attempts(), 1);
    }

    #[tokio::test]
    async fn pending_state_while_construction_blocks() {
        let gate = Arc::new(Notify::new());
        let mut factory = CountingFactory::new();
        factory.gate = Some(gate.clone());
        let loader = RuntimeLoader::new(factory);

        loader.prewarm();
        assert_eq!(loader.state(), LoaderState::Pending);

        gate.notify_one();
        loader.acquire().await.unwrap();
        assert_eq!(loader.state(), LoaderState::Ready);
        assert_eq!(loader.construction_attempts(), 1);
    }

    async fn settle<F: RuntimeFactory>(loader: &RuntimeLoader<F>) -> LoaderState {
        tokio::time::timeout(Duration::from_secs(5), async {
            while loader.state() == LoaderState::Pending {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("construction should settle");
        loader.state()
    }

    #[tokio::test]
    async fn prewarm_outcome_is_visible_without_acquire() {
        let factory = CountingFactory::new();
        let built = factory.built.clone();
        let loader = RuntimeLoader::new(factory);

        loader.prewarm();
        assert_eq!(settle(&loader).await, LoaderState::Ready);
        assert_eq!(built.load(Ordering::SeqCst), 1);

        let runtime = loader.acquire().await.unwrap();
        assert_eq!(runtime.serial, 1);
    }

    #[tokio::test]
    async fn prewarm_failure_is_visible_without_acquire() {
        let mut factory = CountingFactory::new();
        factory.fail = true;
        let loader = RuntimeLoader::new(factory);

        loader.prewarm();
        assert_eq!(settle(&loader).await, LoaderState::Failed);

        let first = loader.acquire().await.unwrap_err();
        let second = loader.acquire().await.unwrap_err();
        assert!(first.same_failure(&second));
        assert_eq!(loader.construction_attempts(), 1);
    }

    #[tokio::test]
    async fn timed_out_waiter_does_not_restart_construction() {
        let gate = Arc::new(Notify::new());
        let mut factory = CountingFactory::new();
        factory.gate = Some(gate.clone());
        let built = factory.built.clone();
        let loader = RuntimeLoader::new(factory);

        let gave_up = tokio::time::timeout(Duration::from_millis(20), loader.acquire()).await;
        assert!(gave_up.is_err(), "first waiter should time out");

        gate.notify_one();
        let runtime = loader.acquire().await.unwrap();

        assert_eq!(runtime.serial, 1);
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    struct PanickingFactory;

    fn explode() -> anyhow::Result<NullRuntime> {
        panic!("constructor exploded")
    }

    impl RuntimeFactory for PanickingFactory {
        type Runtime = NullRuntime;

        fn construct(
            &self,
        ) -> Pin<Box<dyn Future<Output = anyhow::Result<NullRuntime>> + Send + '_>> {
            Box::pin(async { explode() })
        }
    }

    #[tokio::test]
    async fn panicking_factory_becomes_initialization_error() {
        let loader = RuntimeLoader::new(PanickingFactory);

        let err = loader.acquire().await.unwrap_err();
        assert!(err.message().contains("panicked"));
        assert_eq!(loader.state(), LoaderState::Failed);

        let again = loader.acquire().await.unwrap_err();
        assert!(err.same_failure(&again));
    }
}
