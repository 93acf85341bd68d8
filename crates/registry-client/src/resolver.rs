//! Architecture resolution
//!
//! Turns an image reference into the list of CPU architectures the image
//! can run on by walking the registry content graph:
//!
//! - an index yields the platform architecture of every child manifest
//! - a manifest yields the platform inlined on its config descriptor or,
//!   failing that, the `architecture` field of the config blob itself
//!
//! Results are never cached; every call reflects the registry as it is now.

use crate::error::RegistryError;
use crate::models::{
    Descriptor, ImageConfig, Index, MEDIA_TYPE_DOCKER_CONFIG, Manifest, is_index_type,
    is_manifest_type,
};
use crate::reference::ImageReference;
use crate::registry_trait::RegistryClientTrait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// What to do when a manifest's config descriptor carries no platform.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ManifestFallback {
    /// Fetch the config blob and read its `architecture` field
    #[default]
    FetchConfig,
    /// Skip the second fetch and assume this architecture
    AssumeDefault(String),
}

/// Resolves image references to supported architectures.
pub struct ArchitectureResolver {
    client: Arc<dyn RegistryClientTrait>,
    fallback: ManifestFallback,
}

impl std::fmt::Debug for ArchitectureResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchitectureResolver")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl ArchitectureResolver {
    /// Create a resolver that performs the config-blob fallback fetch.
    #[must_use]
    pub fn new(client: Arc<dyn RegistryClientTrait>) -> Self {
        Self {
            client,
            fallback: ManifestFallback::default(),
        }
    }

    /// Replace the manifest fallback behaviour.
    #[must_use]
    pub fn with_fallback(mut self, fallback: ManifestFallback) -> Self {
        self.fallback = fallback;
        self
    }

    /// Architectures supported by `image`.
    ///
    /// Indexes listing several manifests for one architecture produce
    /// duplicates; callers that need a set must deduplicate.
    ///
    /// # Errors
    ///
    /// Any resolution, fetch or decode failure fails the whole call; no
    /// partial result is returned.
    pub async fn resolve(&self, image: &str) -> Result<Vec<String>, RegistryError> {
        let reference = ImageReference::parse(image).inspect_err(|e| {
            error!(reference = %image, "Unable to parse image reference: {}", e);
        })?;

        let descriptor = self.client.resolve(&reference).await.inspect_err(|e| {
            error!(reference = %image, "Unable to resolve image reference: {}", e);
        })?;

        let content = self.fetch(&reference, &descriptor).await?;

        if is_index_type(&descriptor.media_type) {
            self.handle_index(image, &content)
        } else if is_manifest_type(&descriptor.media_type) {
            self.handle_manifest(image, &reference, &content).await
        } else {
            let err = RegistryError::UnknownMediaType(descriptor.media_type.clone());
            error!(reference = %image, "{}", err);
            Err(err)
        }
    }

    async fn fetch(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RegistryError> {
        self.client
            .fetch(reference, descriptor)
            .await
            .inspect_err(|e| {
                error!(
                    reference = %reference,
                    media_type = %descriptor.media_type,
                    "Unable to fetch content defined by descriptor: {}",
                    e
                );
            })
    }

    fn handle_index(&self, image: &str, content: &[u8]) -> Result<Vec<String>, RegistryError> {
        debug!(reference = %image, "Got index for image");
        let index: Index = unmarshal(image, content)?;

        let architectures: Vec<String> = index
            .manifests
            .iter()
            .filter_map(|manifest| {
                let platform = manifest.platform.as_ref();
                if platform.is_none() {
                    debug!(reference = %image, digest = %manifest.digest, "Index entry has no platform");
                }
                platform.map(|p| p.architecture.clone())
            })
            .collect();

        debug!(
            reference = %image,
            architectures = %architectures.join(", "),
            "Got architectures for image"
        );
        Ok(architectures)
    }

    async fn handle_manifest(
        &self,
        image: &str,
        reference: &ImageReference,
        content: &[u8],
    ) -> Result<Vec<String>, RegistryError> {
        debug!(reference = %image, "Got manifest for image");
        let manifest: Manifest = unmarshal(image, content)?;

        if let Some(platform) = &manifest.config.platform {
            if !platform.architecture.is_empty() {
                return Ok(vec![platform.architecture.clone()]);
            }
        }

        let config_descriptor = match &self.fallback {
            ManifestFallback::AssumeDefault(arch) => {
                debug!(reference = %image, arch = %arch, "No inlined platform, assuming default architecture");
                return Ok(vec![arch.clone()]);
            }
            ManifestFallback::FetchConfig => Descriptor {
                media_type: MEDIA_TYPE_DOCKER_CONFIG.to_string(),
                digest: manifest.config.digest.clone(),
                size: manifest.config.size,
                platform: None,
            },
        };

        let config_bytes = self.fetch(reference, &config_descriptor).await?;
        let config: ImageConfig = unmarshal(image, &config_bytes)?;
        if config.architecture.is_empty() {
            let err = RegistryError::MissingArchitecture(image.to_string());
            warn!(reference = %image, "{}", err);
            return Err(err);
        }
        Ok(vec![config.architecture])
    }
}

fn unmarshal<T: DeserializeOwned>(image: &str, bytes: &[u8]) -> Result<T, RegistryError> {
    serde_json::from_slice(bytes).map_err(|e| {
        error!(
            reference = %image,
            fetched = %String::from_utf8_lossy(bytes).chars().take(500).collect::<String>(),
            "Unable to unmarshal fetched bytes: {}",
            e
        );
        RegistryError::Serialization(e)
    })
}
