//! Boundary between a hosting platform and an embedded runtime.
//!
//! Two pieces live here:
//!
//! - [`RuntimeLoader`] builds the (expensive) embedded runtime at most once per
//!   process instance and hands every caller the same handle, or the same
//!   construction failure.
//! - [`RequestAdapter`] is the per-request entry point. It asks the loader for
//!   the handle and forwards the request, the environment bindings and the
//!   [`ExecutionContext`] into the runtime, returning whatever it produces.
//!
//! The runtime itself is abstracted behind [`EmbeddedRuntime`] and built by a
//! [`RuntimeFactory`], so hosts can plug in a wasm component host and tests can
//! plug in fakes.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgeport_core::{EnvBindings, ExecutionContext, RequestAdapter, RuntimeLoader};
//! # use edgeport_core::RuntimeFactory;
//!
//! # async fn run<F: RuntimeFactory>(
//! #     factory: F,
//! #     request: http::Request<<F::Runtime as edgeport_core::EmbeddedRuntime>::Body>,
//! # ) -> anyhow::Result<()> {
//! let loader = Arc::new(RuntimeLoader::new(factory));
//! let adapter = RequestAdapter::new(loader);
//! let env = EnvBindings::default();
//! let tracker = tokio_util::task::TaskTracker::new();
//!
//! let response = adapter
//!     .handle(request, &env, ExecutionContext::new(tracker))
//!     .await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod context;
pub mod error;
pub mod loader;
pub mod runtime;

pub use adapter::{RequestAdapter, RequestBody, initialization_failure};
pub use context::{EnvBindings, ExecutionContext};
pub use error::{ForwardingError, InitializationError};
pub use loader::{LoaderState, RuntimeLoader};
pub use runtime::{BoxError, EmbeddedRuntime, FetchFuture, ResponseBody, RuntimeFactory, full_body};
