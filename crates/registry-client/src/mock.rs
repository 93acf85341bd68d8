//! Mock RegistryClient for unit testing
//!
//! Stores resolvable references and fetchable content in memory and can be
//! told to fail a number of calls, so retry paths can be exercised without a
//! registry.

use crate::client::sha256_digest;
use crate::error::RegistryError;
use crate::models::{
    Descriptor, Index, MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_CONFIG, MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_OCI_MANIFEST, Manifest, Platform,
};
use crate::reference::ImageReference;
use crate::registry_trait::RegistryClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Mock RegistryClient for testing
///
/// References are keyed by their normalised form, so `nginx` and
/// `docker.io/library/nginx:latest` hit the same entry.
#[derive(Clone, Default)]
pub struct MockRegistryClient {
    descriptors: Arc<Mutex<HashMap<String, Descriptor>>>,
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    // Remaining transient failures per normalised reference
    failures: Arc<Mutex<HashMap<String, u32>>>,
    resolve_calls: Arc<Mutex<u32>>,
    fetched: Arc<Mutex<Vec<Descriptor>>>,
}

impl std::fmt::Debug for MockRegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRegistryClient").finish_non_exhaustive()
    }
}

fn key(reference: &str) -> String {
    ImageReference::parse(reference)
        .map(|r| r.to_string())
        .unwrap_or_else(|_| reference.to_string())
}

impl MockRegistryClient {
    /// Create a new, empty mock client
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw content and return its descriptor
    pub fn add_blob(&self, media_type: &str, bytes: Vec<u8>) -> Descriptor {
        let descriptor = Descriptor {
            media_type: media_type.to_string(),
            digest: sha256_digest(&bytes),
            size: bytes.len() as u64,
            platform: None,
        };
        self.blobs
            .lock()
            .unwrap()
            .insert(descriptor.digest.clone(), bytes);
        descriptor
    }

    /// Make `reference` resolve to raw content of any media type
    pub fn add_raw(&self, reference: &str, media_type: &str, bytes: Vec<u8>) -> Descriptor {
        let descriptor = self.add_blob(media_type, bytes);
        self.descriptors
            .lock()
            .unwrap()
            .insert(key(reference), descriptor.clone());
        descriptor
    }

    /// Make `reference` resolve to an OCI index with one child manifest per architecture
    pub fn add_index(&self, reference: &str, architectures: &[&str]) -> Descriptor {
        let manifests = architectures
            .iter()
            .enumerate()
            .map(|(i, arch)| Descriptor {
                media_type: MEDIA_TYPE_OCI_MANIFEST.to_string(),
                digest: sha256_digest(format!("{reference}-{i}-{arch}").as_bytes()),
                size: 512,
                platform: Some(Platform {
                    architecture: (*arch).to_string(),
                    os: "linux".to_string(),
                    variant: None,
                }),
            })
            .collect();
        let index = Index {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_OCI_INDEX.to_string()),
            manifests,
        };
        let bytes = serde_json::to_vec(&index).unwrap();
        self.add_raw(reference, MEDIA_TYPE_OCI_INDEX, bytes)
    }

    /// Make `reference` resolve to a Docker schema 2 manifest.
    ///
    /// `inline_arch` sets a platform on the config descriptor; `config`
    /// is stored as the config blob the fallback fetch will read.
    pub fn add_manifest(
        &self,
        reference: &str,
        inline_arch: Option<&str>,
        config: &serde_json::Value,
    ) -> Descriptor {
        let config_bytes = serde_json::to_vec(config).unwrap();
        let mut config_descriptor = self.add_blob(MEDIA_TYPE_OCI_CONFIG, config_bytes);
        config_descriptor.platform = inline_arch.map(|arch| Platform {
            architecture: arch.to_string(),
            os: "linux".to_string(),
            variant: None,
        });
        let manifest = Manifest {
            schema_version: 2,
            media_type: Some(MEDIA_TYPE_DOCKER_MANIFEST.to_string()),
            config: config_descriptor,
            layers: Vec::new(),
        };
        let bytes = serde_json::to_vec(&manifest).unwrap();
        self.add_raw(reference, MEDIA_TYPE_DOCKER_MANIFEST, bytes)
    }

    /// Fail the next `count` resolutions of `reference` with a 503
    pub fn fail_next(&self, reference: &str, count: u32) {
        self.failures.lock().unwrap().insert(key(reference), count);
    }

    /// Number of resolve calls made so far
    #[must_use]
    pub fn resolve_calls(&self) -> u32 {
        *self.resolve_calls.lock().unwrap()
    }

    /// Every descriptor passed to `fetch`, in call order
    #[must_use]
    pub fn fetched(&self) -> Vec<Descriptor> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RegistryClientTrait for MockRegistryClient {
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor, RegistryError> {
        *self.resolve_calls.lock().unwrap() += 1;
        let key = reference.to_string();

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RegistryError::Api {
                        status: 503,
                        url: key,
                        body: "service unavailable".to_string(),
                    });
                }
            }
        }

        self.descriptors
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(RegistryError::NotFound(key))
    }

    async fn fetch(
        &self,
        _reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RegistryError> {
        self.fetched.lock().unwrap().push(descriptor.clone());
        self.blobs
            .lock()
            .unwrap()
            .get(&descriptor.digest)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(descriptor.digest.clone()))
    }
}
