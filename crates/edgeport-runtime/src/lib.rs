// edgeport-runtime — embedded wasi:http component runtime for edgeport
//
// Engine, WASI state and cache layout adapted from microsoft/wassette (MIT License).
// Copyright (c) Microsoft Corporation.

//! Embedded `wasi:http/proxy` component runtime.
//!
//! [`WasmRuntimeFactory`] is the construction primitive handed to
//! [`edgeport_core::RuntimeLoader`]: it compiles (or loads from the
//! precompiled cache) a component and pre-instantiates it. The resulting
//! [`WasmRuntime`] implements [`edgeport_core::EmbeddedRuntime`] and serves
//! each request in a fresh store.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::path::PathBuf;
//! use std::sync::Arc;
//! use edgeport_core::{RequestAdapter, RuntimeLoader};
//! use edgeport_runtime::{ComponentCache, WasmRuntimeFactory};
//!
//! let factory = WasmRuntimeFactory::new(PathBuf::from("app.wasm"))
//!     .with_cache(ComponentCache::new(ComponentCache::default_path()));
//! let adapter = RequestAdapter::new(Arc::new(RuntimeLoader::new(factory)));
//! ```

pub mod component;
pub mod error;
pub mod runtime_context;
pub mod storage;
pub mod wasistate;

pub use component::{WasmRuntime, WasmRuntimeFactory};
pub use error::RuntimeError;
pub use storage::ComponentCache;
