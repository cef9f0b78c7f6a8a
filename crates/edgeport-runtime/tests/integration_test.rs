//! End-to-end tests for edgeport-runtime.
//!
//! These load a real `wasi:http/proxy` component and serve requests through
//! it. They require a prebuilt component whose handler answers every request
//! with `200` and echoes the request body, e.g. one built from the
//! `wasi-http` hello-world sample with `cargo component build --release`.
//!
//! Run with:
//! `EDGEPORT_TEST_COMPONENT=/path/to/echo.wasm cargo test -p edgeport-runtime --test integration_test -- --include-ignored`

use std::path::PathBuf;
use std::sync::Arc;

use edgeport_core::{LoaderState, RuntimeLoader};
use edgeport_runtime::{ComponentCache, WasmRuntimeFactory};

fn test_component() -> PathBuf {
    std::env::var_os("EDGEPORT_TEST_COMPONENT")
        .map(PathBuf::from)
        .expect("EDGEPORT_TEST_COMPONENT must point at a wasi:http/proxy component")
}

#[tokio::test]
async fn missing_component_fails_once_and_stays_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = WasmRuntimeFactory::new(tmp.path().join("absent.wasm"))
        .with_cache(ComponentCache::new(tmp.path().join("cache")));
    let loader = RuntimeLoader::new(factory);

    let first = loader.acquire().await.err().expect("missing component must fail");
    assert!(first.message().contains("Component not found"), "{first}");

    // Creating the file afterwards does not help: failures are cached.
    std::fs::write(tmp.path().join("absent.wasm"), b"late").unwrap();
    let second = loader.acquire().await.err().expect("failure is cached");
    assert!(first.same_failure(&second));
    assert_eq!(loader.state(), LoaderState::Failed);
    assert_eq!(loader.construction_attempts(), 1);
}

#[tokio::test]
#[ignore = "requires a prebuilt wasi:http/proxy component (EDGEPORT_TEST_COMPONENT)"]
async fn component_is_compiled_once_and_cached_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let cache = ComponentCache::new(tmp.path().to_path_buf());
    let loader = Arc::new(RuntimeLoader::new(
        WasmRuntimeFactory::new(test_component()).with_cache(cache.clone()),
    ));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let loader = loader.clone();
        tasks.push(tokio::spawn(async move { loader.acquire().await.is_ok() }));
    }
    for task in tasks {
        assert!(task.await.unwrap(), "acquire should succeed");
    }
    assert_eq!(loader.construction_attempts(), 1);

    let cached: Vec<_> = std::fs::read_dir(cache.base_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "cwasm"))
        .collect();
    assert_eq!(cached.len(), 1, "exactly one precompiled artifact expected");

    // A second process instance reuses the artifact.
    let warm = RuntimeLoader::new(WasmRuntimeFactory::new(test_component()).with_cache(cache));
    assert!(warm.acquire().await.is_ok());
}
