// Adapted from microsoft/wassette (MIT License)
// Copyright (c) Microsoft Corporation.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use wasmtime::Engine;
use wasmtime::component::Component;

use crate::error::RuntimeError;

const PRECOMPILED_EXT: &str = "cwasm";

/// Disk cache of precompiled components.
///
/// Entries are keyed by the SHA-256 of the source bytes, so a rebuilt
/// component never picks up a stale artifact:
/// ```text
/// {base_dir}/
///   {sha256}.cwasm   - Wasmtime serialized component
/// ```
#[derive(Debug, Clone)]
pub struct ComponentCache {
    base_dir: PathBuf,
}

impl ComponentCache {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn default_path() -> PathBuf {
        dirs::cache_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("edgeport")
            .join("components")
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn cwasm_path(&self, source_hash: &str) -> PathBuf {
        self.base_dir.join(format!("{source_hash}.{PRECOMPILED_EXT}"))
    }

    /// Compile `wasm_bytes`, reusing a cached artifact when one matches.
    ///
    /// Cache write failures are logged and otherwise ignored; the freshly
    /// compiled component is still returned.
    pub fn load_or_compile(
        &self,
        wasm_bytes: &[u8],
        engine: &Engine,
    ) -> Result<Component, RuntimeError> {
        let source_hash = hash_bytes(wasm_bytes);
        let cwasm_path = self.cwasm_path(&source_hash);

        if cwasm_path.exists() {
            match self.load_precompiled(&cwasm_path, engine) {
                Ok(cached) => {
                    tracing::debug!(source_hash, "Loaded from precompiled cache");
                    return Ok(cached);
                }
                Err(e) => {
                    tracing::debug!(source_hash, "Precompiled cache invalid, recompiling: {e}")
                }
            }
        }

        let component = compile(wasm_bytes, engine)?;

        match self.store(&cwasm_path, &component) {
            Ok(()) => tracing::debug!(source_hash, "Saved precompiled cache"),
            Err(e) => tracing::warn!(source_hash, "Failed to write precompiled cache: {e}"),
        }

        Ok(component)
    }

    fn store(&self, path: &Path, component: &Component) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(&self.base_dir)?;
        let serialized = component
            .serialize()
            .map_err(|e| RuntimeError::CacheError(e.to_string()))?;

        // Other processes may have `path` mapped. Never rewrite it in place:
        // stage a sibling file and rename it over the final path.
        let mut staged = tempfile::NamedTempFile::new_in(&self.base_dir)?;
        staged.write_all(&serialized)?;
        staged.as_file().sync_all()?;
        staged.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn load_precompiled(&self, path: &Path, engine: &Engine) -> anyhow::Result<Component> {
        // SAFETY: cwasm files in this directory are only produced by `store`,
        // from components compiled by a Wasmtime engine. `store` replaces
        // artifacts by atomic rename, so a mapped file is never modified
        // while in use. Wasmtime rejects artifacts built with an
        // incompatible version or configuration.
        unsafe { Component::deserialize_file(engine, path) }
    }
}

/// Compile a component from source bytes without caching.
pub fn compile(wasm_bytes: &[u8], engine: &Engine) -> Result<Component, RuntimeError> {
    Component::from_binary(engine, wasm_bytes)
        .map_err(|e| RuntimeError::CompilationFailed(format!("{e:#}")))
}

/// SHA-256 hex digest used as the cache key.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
