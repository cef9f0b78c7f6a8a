use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Instant;

use anyhow::{Context, anyhow};
use edgeport_core::{
    BoxError, EmbeddedRuntime, EnvBindings, ExecutionContext, FetchFuture, ForwardingError,
    ResponseBody, RuntimeFactory,
};
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::sync::oneshot;
use wasmtime::component::Component;
use wasmtime::{Engine, Store};
use wasmtime_wasi_http::WasiHttpView;
use wasmtime_wasi_http::bindings::ProxyPre;
use wasmtime_wasi_http::bindings::http::types::{ErrorCode, Scheme};

use crate::error::RuntimeError;
use crate::runtime_context::RuntimeContext;
use crate::storage::{self, ComponentCache};
use crate::wasistate::WasiState;

/// Builds a [`WasmRuntime`] from a `wasi:http/proxy` component on disk.
///
/// Compilation is CPU-bound and runs on the blocking pool. With a cache
/// configured, a component that was compiled before is deserialized instead.
#[derive(Debug, Clone)]
pub struct WasmRuntimeFactory {
    component_path: PathBuf,
    cache: Option<ComponentCache>,
    inherit_stdio: bool,
}

impl WasmRuntimeFactory {
    pub fn new(component_path: PathBuf) -> Self {
        Self {
            component_path,
            cache: None,
            inherit_stdio: false,
        }
    }

    pub fn with_cache(mut self, cache: ComponentCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Let the guest write to the host's stdout/stderr.
    pub fn with_inherited_stdio(mut self, inherit: bool) -> Self {
        self.inherit_stdio = inherit;
        self
    }

    pub fn component_path(&self) -> &std::path::Path {
        &self.component_path
    }

    async fn build(&self) -> Result<WasmRuntime, RuntimeError> {
        let started = Instant::now();
        let path = self.component_path.clone();

        let wasm_bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => RuntimeError::ComponentNotFound(path.clone()),
            _ => RuntimeError::Io(e),
        })?;

        tracing::info!(
            path = %path.display(),
            size_bytes = wasm_bytes.len(),
            cached = self.cache.is_some(),
            "Compiling embedded component"
        );

        let context = RuntimeContext::new()?;
        let engine = context.engine.clone();
        let cache = self.cache.clone();
        let component: Component = tokio::task::spawn_blocking(move || match &cache {
            Some(cache) => cache.load_or_compile(&wasm_bytes, &engine),
            None => storage::compile(&wasm_bytes, &engine),
        })
        .await
        .map_err(|e| RuntimeError::CompilationFailed(format!("compile task failed: {e}")))??;

        // Pre-instantiate (expensive; done once per runtime)
        let instance_pre = context
            .linker
            .instantiate_pre(&component)
            .map_err(|e| RuntimeError::InstantiationFailed(format!("{e:#}")))?;
        let proxy_pre = ProxyPre::new(instance_pre).map_err(|e| {
            RuntimeError::InstantiationFailed(format!(
                "component does not export wasi:http/incoming-handler: {e:#}"
            ))
        })?;

        tracing::info!(
            path = %path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Embedded component ready"
        );

        Ok(WasmRuntime {
            engine: context.engine,
            proxy_pre,
            inherit_stdio: self.inherit_stdio,
        })
    }
}

impl RuntimeFactory for WasmRuntimeFactory {
    type Runtime = WasmRuntime;

    fn construct(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<WasmRuntime>> + Send + '_>> {
        Box::pin(async move { Ok(self.build().await?) })
    }
}

/// A compiled, pre-instantiated `wasi:http/proxy` component.
///
/// Every request gets its own `Store` and instance, so concurrent requests
/// share only the immutable engine and pre-instance.
pub struct WasmRuntime {
    engine: Engine,
    proxy_pre: ProxyPre<WasiState>,
    inherit_stdio: bool,
}

impl WasmRuntime {
    async fn serve(
        &self,
        request: Request<Incoming>,
        env: &EnvBindings,
        ctx: ExecutionContext,
    ) -> Result<Response<ResponseBody>, ForwardingError> {
        let mut store = Store::new(&self.engine, WasiState::new(env, self.inherit_stdio));

        let (sender, receiver) = oneshot::channel();
        let incoming = store
            .data_mut()
            .new_incoming_request(Scheme::Http, request)
            .context("creating incoming request resource")?;
        let outparam = store
            .data_mut()
            .new_response_outparam(sender)
            .context("creating response outparam")?;

        let proxy = self
            .proxy_pre
            .instantiate_async(&mut store)
            .await
            .context("instantiating component")?;

        // The guest keeps streaming the body after `set` is called, so the
        // handler task is background work that outlives this response.
        let cancel = ctx.cancellation().clone();
        let guest = ctx.spawn_background(async move {
            tokio::select! {
                result = proxy
                    .wasi_http_incoming_handler()
                    .call_handle(&mut store, incoming, outparam) => result,
                _ = cancel.cancelled() => Err(anyhow!("request cancelled")),
            }
        });

        tokio::select! {
            outcome = receiver => match outcome {
                Ok(Ok(response)) => Ok(response.map(|body| body.map_err(body_error).boxed())),
                Ok(Err(code)) => Err(anyhow!("guest reported error: {code:?}").into()),
                Err(_) => {
                    let detail = match guest.await {
                        Ok(Ok(())) => anyhow!("guest returned without setting a response"),
                        Ok(Err(e)) => e.context("guest trapped"),
                        Err(e) => anyhow!("guest task failed: {e}"),
                    };
                    tracing::warn!(request_id = ctx.request_id(), "{detail:#}");
                    Err(ForwardingError::Guest(detail))
                }
            },
            _ = ctx.cancellation().cancelled() => {
                guest.abort();
                tracing::debug!(request_id = ctx.request_id(), "Request cancelled, guest aborted");
                Err(ForwardingError::Cancelled)
            }
        }
    }
}

fn body_error(code: ErrorCode) -> BoxError {
    Box::new(std::io::Error::other(format!("guest body error: {code:?}")))
}

impl EmbeddedRuntime for WasmRuntime {
    type Body = Incoming;

    fn fetch(
        &self,
        request: Request<Incoming>,
        env: EnvBindings,
        ctx: ExecutionContext,
    ) -> FetchFuture<'_> {
        Box::pin(async move { self.serve(request, &env, ctx).await })
    }
}
