use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use edgeport_core::{RequestAdapter, RuntimeLoader};
use edgeport_server::{EdgeportConfig, HttpServer, ServerOptions};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser)]
#[command(
    name = "edgeport",
    version,
    about = "edgeport — serves a wasi:http component behind a lazily constructed runtime"
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept HTTP requests and forward them into the component
    Serve {
        /// Path to edgeport.toml
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Listen address (overrides config and EDGEPORT_LISTEN)
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Component to serve (overrides config)
        #[arg(long)]
        component: Option<PathBuf>,
    },
    /// Construct the runtime once, report the outcome and exit
    Check {
        /// Path to edgeport.toml
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Component to check (overrides config)
        #[arg(long)]
        component: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn load_config(path: Option<&PathBuf>, component: Option<PathBuf>) -> Result<EdgeportConfig> {
    let mut config = match path {
        Some(path) => EdgeportConfig::from_file(path)?,
        None => EdgeportConfig::default(),
    };
    config.apply_env_overrides(std::env::vars())?;
    if let Some(component) = component {
        config.runtime.component = component;
    }
    Ok(config)
}

fn init_logging(json: bool) {
    // Logs go to stderr so stdout stays free for `check --json`
    let filter = EnvFilter::try_from_env("EDGEPORT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Command::Serve {
            config,
            listen,
            component,
        } => serve(load_config(config.as_ref(), component)?, listen).await,
        Command::Check {
            config,
            component,
            json,
        } => check(load_config(config.as_ref(), component)?, json).await,
    }
}

async fn serve(config: EdgeportConfig, listen: Option<SocketAddr>) -> Result<()> {
    let addr = listen.unwrap_or(config.server.listen);

    tracing::info!(
        component = %config.runtime.component.display(),
        %addr,
        bindings = ?config.env_bindings(),
        eager = config.runtime.eager,
        "Starting edgeport"
    );

    let loader = Arc::new(RuntimeLoader::new(config.build_factory()));
    if config.runtime.eager {
        loader.prewarm();
    }

    let server = HttpServer::new(
        RequestAdapter::new(loader),
        config.env_bindings(),
        ServerOptions {
            request_timeout: config.request_timeout(),
            shutdown_grace: config.shutdown_grace(),
        },
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
            return;
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    server.bind_and_run(addr, shutdown).await?;
    Ok(())
}

async fn check(config: EdgeportConfig, json: bool) -> Result<()> {
    let loader = RuntimeLoader::new(config.build_factory());
    let started = Instant::now();
    let outcome = loader.acquire().await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let component = config.runtime.component.display().to_string();

    if json {
        let report = match &outcome {
            Ok(_) => serde_json::json!({
                "status": "ready",
                "component": component,
                "elapsed_ms": elapsed_ms,
            }),
            Err(e) => serde_json::json!({
                "status": "failed",
                "component": component,
                "elapsed_ms": elapsed_ms,
                "error": e.message(),
            }),
        };
        println!("{report}");
    } else {
        match &outcome {
            Ok(_) => println!("{component}: ready ({elapsed_ms} ms)"),
            Err(e) => println!("{component}: {e}"),
        }
    }

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}
