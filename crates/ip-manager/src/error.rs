//! IP manager errors

use thiserror::Error;

/// Errors raised by a cluster store.
///
/// Not-found is not an error: lookups return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Store could not serve the request
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Object is missing the name or namespace it is keyed by
    #[error("Missing metadata: {0}")]
    MissingMetadata(String),
}

/// Which side of the admission call an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself is wrong; retrying it unchanged will fail again
    Client,
    /// Infrastructure or internal failure; the caller may retry
    Server,
}

/// Errors that can occur while allocating SR-IOV networks.
#[derive(Debug, Error)]
pub enum IpManagerError {
    /// Missing or malformed request annotation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network configuration could not be rendered
    #[error("Render error: {0}")]
    Render(String),

    /// Cluster store failure other than not-found
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Allocation locks were not acquired in time
    #[error("Timed out waiting for allocation lock: {0}")]
    LockTimeout(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IpManagerError {
    /// Classifies the error for the admission response.
    pub fn class(&self) -> ErrorClass {
        match self {
            IpManagerError::Validation(_) => ErrorClass::Client,
            _ => ErrorClass::Server,
        }
    }

    /// HTTP status code reported back to the API server.
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::Client => 400,
            ErrorClass::Server => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_is_client_error() {
        let err = IpManagerError::Validation("missing required annotation".to_string());
        assert_eq!(err.class(), ErrorClass::Client);
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_store_and_render_are_server_errors() {
        let store = IpManagerError::from(StoreError::Unavailable("etcd leader lost".to_string()));
        assert_eq!(store.class(), ErrorClass::Server);
        assert_eq!(store.status_code(), 500);

        let render = IpManagerError::Render("bad template".to_string());
        assert_eq!(render.status_code(), 500);
    }
}
