use thiserror::Error;

/// An error reported by a store subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct StoreError {
    pub code: String,
    pub message: String,
}

impl StoreError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permission_denied(path: &str) -> Self {
        StoreError::new("permission-denied", format!("missing permissions on {path}"))
    }
}

/// Errors delivered to a binding's reject callback.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    #[error("subscription to {path} failed: {source}")]
    Subscription {
        path: String,
        #[source]
        source: StoreError,
    },
}

impl BindError {
    /// Store path of the subscription that failed.
    pub fn path(&self) -> &str {
        match self {
            BindError::Subscription { path, .. } => path,
        }
    }
}
