//! Controller-specific error types.
//!
//! This module defines error types specific to the archaware controller
//! that are not covered by upstream library errors.

use crate::store::StoreError;
use kube::Error as KubeError;
use registry_client::RegistryError;
use thiserror::Error;

/// Errors that can occur in the archaware controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error outside the object store (client construction)
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error while resolving image architectures
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object lacks a field reconciliation depends on
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Cancellation signal fired before the operation finished
    #[error("Operation cancelled")]
    Cancelled,
}

impl ControllerError {
    /// Whether the backoff retrier should try again.
    ///
    /// Malformed registry content, missing fields and deleted objects fail
    /// identically on every attempt and are not retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(StoreError::NotFound(_) | StoreError::Decode(_)) => false,
            Self::Store(_) | Self::Kube(_) | Self::Watch(_) => true,
            Self::Registry(e) => e.is_transient(),
            Self::InvalidConfig(_) | Self::MissingField(_) | Self::Cancelled => false,
        }
    }

    /// Whether this is an optimistic-concurrency write conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Store(StoreError::Conflict(_)))
    }
}
