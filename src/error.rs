//! Error types for stack provisioning
//!
//! Only [`Error::Client`] is fatal. Everything else is reported by the
//! orchestrator and the run continues.

use thiserror::Error;

use crate::resource::{ResourceHandle, ResourceKind};

/// Main error type for stack operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error not covered by a more specific variant
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// The resource already exists (HTTP 409 on create)
    #[error("{handle} already exists")]
    Conflict {
        /// Identity of the resource that already exists
        handle: ResourceHandle,
    },

    /// The resource does not exist (HTTP 404)
    #[error("{handle} not found")]
    NotFound {
        /// Identity of the missing resource
        handle: ResourceHandle,
    },

    /// The control-plane client could not be constructed
    #[error("client error: {0}")]
    Client(String),

    /// Encoding a patch body or rendering a manifest failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The control plane answered with a different kind than requested
    #[error("expected {expected} but control plane returned {actual}")]
    KindMismatch {
        /// Kind the caller asked for
        expected: ResourceKind,
        /// Kind actually returned
        actual: ResourceKind,
    },

    /// Invalid runtime configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a client construction error with the given message
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Map a kube-rs error for `handle` onto the stack taxonomy.
    ///
    /// 409 and 404 API responses become [`Error::Conflict`] and
    /// [`Error::NotFound`]; everything else stays a [`Error::Kube`].
    pub fn from_kube(handle: &ResourceHandle, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                handle: handle.clone(),
            },
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                handle: handle.clone(),
            },
            other => Self::Kube { source: other },
        }
    }

    /// True if the resource already existed
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// True if the resource was absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
