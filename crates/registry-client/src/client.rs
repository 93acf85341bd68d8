//! Registry API client
//!
//! Implements the read side of the OCI distribution API:
//! `HEAD/GET /v2/<repository>/manifests/<reference>` and
//! `GET /v2/<repository>/blobs/<digest>`.

use crate::common::{HttpClient, header_str};
use crate::error::RegistryError;
use crate::models::{Descriptor, MANIFEST_ACCEPT, is_index_type, is_manifest_type};
use crate::reference::ImageReference;
use crate::registry_trait::RegistryClientTrait;
use reqwest::{Client, Method};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("archaware/", env!("CARGO_PKG_VERSION"));

/// Registry API client
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: HttpClient,
}

impl RegistryClient {
    /// Create a new registry client
    ///
    /// # Arguments
    /// * `timeout` - Per-request timeout, including the token handshake
    pub fn new(timeout: Duration) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(RegistryError::Http)?;

        Ok(Self {
            http: HttpClient::new(client),
        })
    }

    fn manifest_url(reference: &ImageReference, object: &str) -> String {
        format!(
            "{}/{}/manifests/{}",
            reference.api_base(),
            reference.repository(),
            object
        )
    }

    fn blob_url(reference: &ImageReference, digest: &str) -> String {
        format!(
            "{}/{}/blobs/{}",
            reference.api_base(),
            reference.repository(),
            digest
        )
    }

    /// Resolve via `HEAD`, the cheap path most registries support.
    async fn resolve_head(
        &self,
        reference: &ImageReference,
        url: &str,
    ) -> Result<Option<Descriptor>, RegistryError> {
        let response = self.http.send(Method::HEAD, url, &MANIFEST_ACCEPT).await?;

        let media_type = header_str(&response, "content-type");
        let digest = header_str(&response, "docker-content-digest").or(reference.digest());
        let size = header_str(&response, "content-length").and_then(|len| len.parse::<u64>().ok());

        Ok(match (media_type, digest, size) {
            (Some(media_type), Some(digest), Some(size)) if size > 0 => Some(Descriptor {
                media_type: media_type.to_string(),
                digest: digest.to_string(),
                size,
                platform: None,
            }),
            _ => None,
        })
    }

    /// Resolve via `GET`, computing whatever the registry left out.
    async fn resolve_get(
        &self,
        reference: &ImageReference,
        url: &str,
    ) -> Result<Descriptor, RegistryError> {
        let response = self.http.send(Method::GET, url, &MANIFEST_ACCEPT).await?;

        let header_media_type = header_str(&response, "content-type").map(str::to_string);
        let header_digest = header_str(&response, "docker-content-digest").map(str::to_string);
        let body = response.bytes().await?;

        let media_type = match header_media_type {
            Some(media_type) if is_index_type(&media_type) || is_manifest_type(&media_type) => {
                media_type
            }
            other => serde_json::from_slice::<serde_json::Value>(&body)
                .ok()
                .and_then(|doc| doc.get("mediaType")?.as_str().map(str::to_string))
                .or(other)
                .unwrap_or_default(),
        };
        let digest = header_digest
            .or_else(|| reference.digest().map(str::to_string))
            .unwrap_or_else(|| sha256_digest(&body));

        Ok(Descriptor {
            media_type,
            digest,
            size: body.len() as u64,
            platform: None,
        })
    }
}

#[async_trait::async_trait]
impl RegistryClientTrait for RegistryClient {
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor, RegistryError> {
        let url = Self::manifest_url(reference, reference.object());

        let descriptor = match self.resolve_head(reference, &url).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                debug!("HEAD {} returned an incomplete descriptor, falling back to GET", url);
                self.resolve_get(reference, &url).await?
            }
            // Some registries refuse HEAD outright; anything else is a real failure
            Err(RegistryError::Api { status: 405, .. }) => self.resolve_get(reference, &url).await?,
            Err(e) => return Err(e),
        };

        debug!(
            reference = %reference,
            media_type = %descriptor.media_type,
            digest = %descriptor.digest,
            size = descriptor.size,
            "Resolved image reference"
        );
        Ok(descriptor)
    }

    async fn fetch(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RegistryError> {
        // Manifests and indexes live under /manifests, everything else is a blob
        let url = if is_index_type(&descriptor.media_type) || is_manifest_type(&descriptor.media_type)
        {
            Self::manifest_url(reference, &descriptor.digest)
        } else {
            Self::blob_url(reference, &descriptor.digest)
        };

        let response = self
            .http
            .send(Method::GET, &url, &[descriptor.media_type.as_str()])
            .await?;
        let body = response.bytes().await?.to_vec();

        if descriptor.digest.starts_with("sha256:") {
            let actual = sha256_digest(&body);
            if actual != descriptor.digest {
                return Err(RegistryError::DigestMismatch {
                    expected: descriptor.digest.clone(),
                    actual,
                });
            }
        }

        debug!(
            media_type = %descriptor.media_type,
            bytes = body.len(),
            "Fetched content for {}",
            reference
        );
        Ok(body)
    }
}

/// `sha256:<hex>` digest of a byte slice.
#[must_use]
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}
