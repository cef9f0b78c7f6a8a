use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};

use crate::context::{EnvBindings, ExecutionContext};
use crate::error::ForwardingError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body produced by an embedded runtime.
pub type ResponseBody = BoxBody<Bytes, BoxError>;

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response<ResponseBody>, ForwardingError>> + Send + 'a>>;

/// A constructed embedded runtime: the thing a `RuntimeHandle` points at.
///
/// One instance is shared by every in-flight request of a process instance
/// and is invoked concurrently without extra locking, so implementations
/// must be safe for concurrent use.
pub trait EmbeddedRuntime: Send + Sync + 'static {
    /// Request body type the entry point consumes.
    type Body: Send + 'static;

    /// Entry point. The request, bindings and context are handed over as-is;
    /// the response is returned to the platform unmodified.
    fn fetch(
        &self,
        request: Request<Self::Body>,
        env: EnvBindings,
        ctx: ExecutionContext,
    ) -> FetchFuture<'_>;
}

/// Construction primitive for an [`EmbeddedRuntime`].
///
/// Called at most once per [`RuntimeLoader`](crate::RuntimeLoader).
pub trait RuntimeFactory: Send + Sync + 'static {
    type Runtime: EmbeddedRuntime;

    fn construct(&self)
    -> Pin<Box<dyn Future<Output = anyhow::Result<Self::Runtime>> + Send + '_>>;
}

/// Wrap fixed bytes as a [`ResponseBody`].
pub fn full_body(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into())
        .map_err(|never| match never {})
        .boxed()
}
