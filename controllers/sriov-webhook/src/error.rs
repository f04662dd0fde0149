//! Controller-specific error types.
//!
//! This module defines error types specific to the SR-IOV webhook that are
//! not covered by the allocation engine's own errors.

use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the SR-IOV webhook.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Listener or server I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metrics registration or encoding failure
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}
