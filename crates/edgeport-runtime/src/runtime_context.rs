// Adapted from microsoft/wassette (MIT License)
// Copyright (c) Microsoft Corporation.

use anyhow::Result;
use wasmtime::component::Linker;
use wasmtime::{Config, Engine};

use crate::wasistate::WasiState;

/// Wasmtime engine and linker used to build the embedded runtime.
///
/// Built once per construction. The engine outlives it inside
/// [`WasmRuntime`](crate::WasmRuntime); the linker is only needed until the
/// component has been pre-instantiated.
pub struct RuntimeContext {
    pub engine: Engine,
    pub linker: Linker<WasiState>,
}

impl RuntimeContext {
    pub fn new() -> Result<Self> {
        let mut config = Config::new();
        config.wasm_component_model(true);
        config.async_support(true);

        let engine = Engine::new(&config)?;
        let mut linker: Linker<WasiState> = Linker::new(&engine);

        // WASI p2 host functions (filesystem, clocks, random, stdio, …)
        wasmtime_wasi::p2::add_to_linker_async(&mut linker)?;

        // WASI HTTP types + outgoing handler; incoming-handler is exported by the guest
        wasmtime_wasi_http::add_only_http_to_linker_async(&mut linker)?;

        tracing::debug!("RuntimeContext initialized (component-model + async + WASI p2 + HTTP)");

        Ok(Self { engine, linker })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_engine_and_linker() {
        let ctx = RuntimeContext::new().expect("default engine config should be valid");
        // Engines are cheap handles onto shared state
        let _clone = ctx.engine.clone();
    }
}
