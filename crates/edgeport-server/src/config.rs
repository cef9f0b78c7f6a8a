use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use edgeport_core::EnvBindings;
use edgeport_runtime::{ComponentCache, WasmRuntimeFactory};
use serde::Deserialize;

use crate::error::ServerError;

const BINDING_PREFIX: &str = "EDGEPORT_BINDING_";

#[derive(Debug, Default, Deserialize)]
pub struct EdgeportConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Opaque resource bindings handed to the component as environment
    /// variables.
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
    /// Per-request limit; `0` disables it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            request_timeout_ms: default_request_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8787))
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_shutdown_grace_ms() -> u64 {
    10_000
}

#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_component")]
    pub component: PathBuf,
    /// Reuse precompiled artifacts across restarts.
    #[serde(default = "default_true")]
    pub cache: bool,
    pub cache_dir: Option<PathBuf>,
    /// Start construction at startup instead of on the first request.
    #[serde(default)]
    pub eager: bool,
    #[serde(default)]
    pub inherit_stdio: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            component: default_component(),
            cache: true,
            cache_dir: None,
            eager: false,
            inherit_stdio: false,
        }
    }
}

fn default_component() -> PathBuf {
    PathBuf::from("app.wasm")
}
fn default_true() -> bool {
    true
}

impl EdgeportConfig {
    pub fn from_file(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ServerError> {
        toml::from_str(content)
            .map_err(|e| ServerError::Config(format!("Failed to parse config: {e}")))
    }

    /// Apply `EDGEPORT_LISTEN` and `EDGEPORT_BINDING_<NAME>` overrides.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), ServerError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if key == "EDGEPORT_LISTEN" {
                self.server.listen = value.parse().map_err(|e| {
                    ServerError::Config(format!("Invalid EDGEPORT_LISTEN '{value}': {e}"))
                })?;
            } else if let Some(name) = key.strip_prefix(BINDING_PREFIX) {
                if !name.is_empty() {
                    self.bindings.insert(name.to_string(), value);
                }
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        match self.server.request_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.server.shutdown_grace_ms)
    }

    pub fn env_bindings(&self) -> EnvBindings {
        EnvBindings::new(self.bindings.clone())
    }

    pub fn build_factory(&self) -> WasmRuntimeFactory {
        let factory = WasmRuntimeFactory::new(self.runtime.component.clone())
            .with_inherited_stdio(self.runtime.inherit_stdio);
        if !self.runtime.cache {
            return factory;
        }
        let cache_dir = self
            .runtime
            .cache_dir
            .clone()
            .unwrap_or_else(ComponentCache::default_path);
        factory.with_cache(ComponentCache::new(cache_dir))
    }
}
