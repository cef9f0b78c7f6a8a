//! Hosting side of edgeport: configuration and the HTTP listener that feeds
//! requests into [`edgeport_core::RequestAdapter`].

pub mod config;
pub mod error;
pub mod server;

pub use config::EdgeportConfig;
pub use error::ServerError;
pub use server::{HttpServer, ServerOptions};
