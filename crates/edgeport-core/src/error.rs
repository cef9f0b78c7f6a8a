use std::sync::Arc;

use thiserror::Error;

/// The embedded runtime could not be constructed.
///
/// Cloned and handed to every caller attached to the failed construction, and
/// to every caller after it: the loader never retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("embedded runtime failed to initialize: {message}")]
pub struct InitializationError {
    message: Arc<str>,
}

impl InitializationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    /// Flatten an error chain into a single broadcastable failure.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        Self::new(format!("{error:#}"))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True when both values come from the same cached failure.
    pub fn same_failure(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.message, &other.message)
    }
}

/// The embedded runtime's entry point failed while handling one request.
///
/// Scoped to that request. Never touches the loader's cached handle.
#[derive(Debug, Error)]
pub enum ForwardingError {
    #[error("request cancelled before the embedded runtime responded")]
    Cancelled,

    #[error(transparent)]
    Guest(#[from] anyhow::Error),
}
