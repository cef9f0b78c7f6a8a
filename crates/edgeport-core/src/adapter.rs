use std::sync::Arc;

use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Request, Response, StatusCode};

use crate::context::{EnvBindings, ExecutionContext};
use crate::error::{ForwardingError, InitializationError};
use crate::loader::RuntimeLoader;
use crate::runtime::{EmbeddedRuntime, ResponseBody, RuntimeFactory, full_body};

/// Request body type accepted by the runtime a factory builds.
pub type RequestBody<F> = <<F as RuntimeFactory>::Runtime as EmbeddedRuntime>::Body;

/// Per-request entry point between the platform and the embedded runtime.
///
/// Holds nothing but the shared loader. Each call acquires the runtime and
/// forwards the request, the bindings and the context into it untouched.
pub struct RequestAdapter<F: RuntimeFactory> {
    loader: Arc<RuntimeLoader<F>>,
}

impl<F: RuntimeFactory> Clone for RequestAdapter<F> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<F: RuntimeFactory> RequestAdapter<F> {
    pub fn new(loader: Arc<RuntimeLoader<F>>) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &Arc<RuntimeLoader<F>> {
        &self.loader
    }

    /// Forward one request into the embedded runtime.
    ///
    /// A runtime that failed to construct yields a `500` response rather
    /// than an error. Failures reported by the runtime's entry point are
    /// returned unchanged.
    pub async fn handle(
        &self,
        request: Request<RequestBody<F>>,
        env: &EnvBindings,
        ctx: ExecutionContext,
    ) -> Result<Response<ResponseBody>, ForwardingError> {
        let runtime = match self.loader.acquire().await {
            Ok(runtime) => runtime,
            Err(e) => {
                tracing::warn!(request_id = ctx.request_id(), "{e}");
                return Ok(initialization_failure(&e));
            }
        };

        tracing::debug!(
            request_id = ctx.request_id(),
            method = %request.method(),
            uri = %request.uri(),
            "Forwarding request to embedded runtime"
        );

        runtime.fetch(request, env.clone(), ctx).await
    }
}

/// Server-error outcome for a runtime that could not be constructed.
pub fn initialization_failure(error: &InitializationError) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(error.to_string()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
