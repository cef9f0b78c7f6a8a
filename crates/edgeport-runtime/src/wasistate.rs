// Adapted from microsoft/wassette (MIT License)
// Copyright (c) Microsoft Corporation.

use edgeport_core::EnvBindings;
use wasmtime::component::ResourceTable;
use wasmtime_wasi::{WasiCtx, WasiCtxBuilder, WasiCtxView, WasiView};
use wasmtime_wasi_http::{WasiHttpCtx, WasiHttpView};

/// Per-request guest state.
///
/// A fresh `WasiState` backs every request's `Store`, so nothing leaks
/// between requests through WASI resources.
///
/// - No filesystem preopens
/// - Environment variables are exactly the configured bindings
/// - Host stdio is inherited only when asked for
pub struct WasiState {
    ctx: WasiCtx,
    table: ResourceTable,
    http: WasiHttpCtx,
}

impl WasiView for WasiState {
    fn ctx(&mut self) -> WasiCtxView<'_> {
        WasiCtxView {
            ctx: &mut self.ctx,
            table: &mut self.table,
        }
    }
}

impl WasiHttpView for WasiState {
    fn ctx(&mut self) -> &mut WasiHttpCtx {
        &mut self.http
    }
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.table
    }
}

impl WasiState {
    pub fn new(env: &EnvBindings, inherit_stdio: bool) -> Self {
        let mut builder = WasiCtxBuilder::new();
        for (name, value) in env.iter() {
            builder.env(name, value);
        }
        if inherit_stdio {
            builder.inherit_stdio();
        }

        Self {
            ctx: builder.build(),
            table: ResourceTable::new(),
            http: WasiHttpCtx::new(),
        }
    }
}
