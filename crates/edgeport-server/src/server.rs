//! HTTP listener that plays the hosting platform for the request adapter.
//!
//! Each accepted connection is served by hyper on its own task. Every
//! request gets a fresh [`ExecutionContext`] and is handed to the
//! [`RequestAdapter`] unchanged. The listener only adds what the platform
//! contract needs around it:
//!
//! - a per-request timeout (`504`), which cancels that request only
//! - a `500` when the runtime's entry point fails
//! - cancellation of the request's context when the client goes away
//! - graceful shutdown that drains connections and `wait_until` work

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use edgeport_core::{
    EmbeddedRuntime, EnvBindings, ExecutionContext, RequestAdapter, ResponseBody, RuntimeFactory,
    full_body,
};
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Pause after a failed `accept` (e.g. EMFILE) before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
use tracing::Instrument;

use crate::error::ServerError;

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub request_timeout: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

struct ServerState<F: RuntimeFactory> {
    adapter: RequestAdapter<F>,
    env: EnvBindings,
    background: TaskTracker,
    request_timeout: Option<Duration>,
}

pub struct HttpServer<F: RuntimeFactory> {
    state: Arc<ServerState<F>>,
    shutdown_grace: Duration,
}

impl<F> HttpServer<F>
where
    F: RuntimeFactory,
    F::Runtime: EmbeddedRuntime<Body = Incoming>,
{
    pub fn new(adapter: RequestAdapter<F>, env: EnvBindings, options: ServerOptions) -> Self {
        Self {
            state: Arc::new(ServerState {
                adapter,
                env,
                background: TaskTracker::new(),
                request_timeout: options.request_timeout,
            }),
            shutdown_grace: options.shutdown_grace,
        }
    }

    /// Bind `addr` and serve until `shutdown` fires.
    pub async fn bind_and_run(
        self,
        addr: SocketAddr,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        self.run(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");

        let connections = TaskTracker::new();

        loop {
            let (stream, remote) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Failed to accept connection: {e}");
                        if accept_backoff(&shutdown).await {
                            continue;
                        }
                        break;
                    }
                },
                _ = shutdown.cancelled() => break,
            };

            let state = Arc::clone(&self.state);
            let shutdown = shutdown.clone();

            connections.spawn(async move {
                let service = service_fn(move |request| {
                    let state = Arc::clone(&state);
                    async move { Ok::<_, Infallible>(handle_request(state, request, remote).await) }
                });

                let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                tokio::pin!(conn);

                let result = tokio::select! {
                    result = conn.as_mut() => result,
                    _ = shutdown.cancelled() => {
                        conn.as_mut().graceful_shutdown();
                        conn.await
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(%remote, "Connection closed with error: {e}");
                }
            });
        }

        tracing::info!("Shutting down; draining connections and background work");
        connections.close();
        self.state.background.close();

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            connections.wait().await;
            self.state.background.wait().await;
        })
        .await;

        match drained {
            Ok(()) => tracing::info!("Shutdown complete"),
            Err(_) => tracing::warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                connections = connections.len(),
                background = self.state.background.len(),
                "Shutdown grace period elapsed with work still running"
            ),
        }
        Ok(())
    }
}

async fn handle_request<F>(
    state: Arc<ServerState<F>>,
    request: Request<Incoming>,
    remote: SocketAddr,
) -> Response<ResponseBody>
where
    F: RuntimeFactory,
    F::Runtime: EmbeddedRuntime<Body = Incoming>,
{
    let ctx = ExecutionContext::new(state.background.clone()).with_remote_addr(remote);
    let span = tracing::info_span!(
        "request",
        request_id = ctx.request_id(),
        method = %request.method(),
        path = request.uri().path(),
    );

    // Fires if this future is dropped (client went away) or times out.
    let abandon = ctx.cancellation().clone().drop_guard();

    async move {
        let forward = state.adapter.handle(request, &state.env, ctx);
        let outcome = match state.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, forward).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(timeout_ms = limit.as_millis() as u64, "Request timed out");
                    return status_response(StatusCode::GATEWAY_TIMEOUT, "request timed out");
                }
            },
            None => forward.await,
        };

        match outcome {
            Ok(response) => {
                abandon.disarm();
                tracing::debug!(status = response.status().as_u16(), "Request completed");
                response
            }
            Err(e) => {
                tracing::error!("Embedded runtime failed to handle request: {e:#}");
                status_response(StatusCode::INTERNAL_SERVER_ERROR, "embedded runtime error")
            }
        }
    }
    .instrument(span)
    .await
}

fn status_response(status: StatusCode, message: &'static str) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Wait out [`ACCEPT_BACKOFF`]. Returns `false` if shutdown fired first.
async fn accept_backoff(shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => true,
        _ = shutdown.cancelled() => false,
    }
}
