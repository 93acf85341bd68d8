//! RegistryClient trait for mocking
//!
//! This trait abstracts the registry content protocol so the architecture
//! resolver and the controllers can be unit tested without a registry.

use crate::error::RegistryError;
use crate::models::Descriptor;
use crate::reference::ImageReference;

/// Registry content-resolution protocol
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait RegistryClientTrait: Send + Sync {
    /// Resolve a tag or digest reference to the descriptor of its top-level content.
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor, RegistryError>;

    /// Fetch the bytes a descriptor points at, verified against its digest.
    async fn fetch(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RegistryError>;
}
