//! Error types shared across the explorer.

use std::time::Duration;

use thiserror::Error;

use crate::types::SessionStatus;

/// Failures reported by a [`Page`](crate::page::Page) implementation.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("failed to connect to browser at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    #[error("timed out after {duration:?} waiting for {what}")]
    Timeout { what: String, duration: Duration },

    #[error("element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("AI action layer is not configured")]
    ActUnavailable,

    #[error("AI action failed: {0}")]
    ActFailed(String),

    #[error("page already closed")]
    Closed,

    #[error("browser worker panicked: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum ExplorerError {
    #[error(transparent)]
    Browser(#[from] BrowserError),

    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid status transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("{what} required for {action} action")]
    MissingParam {
        action: &'static str,
        what: &'static str,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = ExplorerError> = std::result::Result<T, E>;
