//! Image reference parsing
//!
//! Normalises references the way container runtimes do:
//! `nginx` becomes `docker.io/library/nginx:latest`,
//! `quay.io/org/app@sha256:...` keeps its digest, and registry hosts
//! are recognised by a `.` or `:` in the first path component or by
//! being `localhost`.

use crate::error::RegistryError;
use std::fmt;

/// Registry assumed when a reference names none
pub const DEFAULT_REGISTRY: &str = "docker.io";
/// Host that actually serves the Docker Hub v2 API
pub const DOCKER_HUB_API_HOST: &str = "registry-1.docker.io";
/// Tag assumed when a reference has neither tag nor digest
pub const DEFAULT_TAG: &str = "latest";

/// A parsed, normalised image reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    original: String,
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference as found in a pod's container spec.
    pub fn parse(reference: &str) -> Result<Self, RegistryError> {
        let original = reference.trim();
        if original.is_empty() || original.chars().any(char::is_whitespace) {
            return Err(RegistryError::InvalidReference(reference.to_string()));
        }

        let (name, digest) = match original.split_once('@') {
            Some((name, digest)) => {
                let valid = digest
                    .split_once(':')
                    .is_some_and(|(algo, hex)| !algo.is_empty() && !hex.is_empty());
                if !valid {
                    return Err(RegistryError::InvalidReference(format!(
                        "{original}: malformed digest"
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (original, None),
        };

        let (registry, remainder) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest)
            }
            _ => (DEFAULT_REGISTRY.to_string(), name),
        };
        let registry = if registry == "index.docker.io" {
            DEFAULT_REGISTRY.to_string()
        } else {
            registry
        };

        // A ':' after the last '/' separates the tag; earlier ones belong to a host.
        let last_slash = remainder.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match remainder[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&remainder[..split], Some(remainder[split + 1..].to_string()))
            }
            None => (remainder, None),
        };

        if repository.is_empty()
            || repository.split('/').any(str::is_empty)
            || repository.chars().any(|c| c.is_ascii_uppercase())
            || tag.as_deref().is_some_and(str::is_empty)
        {
            return Err(RegistryError::InvalidReference(original.to_string()));
        }

        let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository.to_string()
        };

        Ok(Self {
            original: original.to_string(),
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// The reference exactly as it was given.
    #[must_use]
    pub fn original(&self) -> &str {
        &self.original
    }

    /// Registry name as written (`docker.io`, `quay.io`, `localhost:5000`).
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry (`library/nginx`).
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag, if the reference carried one.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Digest, if the reference carried one.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// What to ask the manifests endpoint for: the digest wins over the tag.
    #[must_use]
    pub fn object(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or(DEFAULT_TAG)
    }

    /// Host serving the v2 API for this registry.
    #[must_use]
    pub fn api_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DOCKER_HUB_API_HOST
        } else {
            &self.registry
        }
    }

    /// Local registries are spoken to over plain HTTP.
    #[must_use]
    pub fn is_local(&self) -> bool {
        let host = self.registry.split(':').next().unwrap_or_default();
        host == "localhost" || host == "127.0.0.1"
    }

    /// Base URL of the v2 API, e.g. `https://registry-1.docker.io/v2`.
    #[must_use]
    pub fn api_base(&self) -> String {
        let scheme = if self.is_local() { "http" } else { "https" };
        format!("{scheme}://{}/v2", self.api_host())
    }

    /// Token scope needed to read this repository.
    #[must_use]
    pub fn pull_scope(&self) -> String {
        format!("repository:{}:pull", self.repository)
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        if self.tag.is_none() && self.digest.is_none() {
            write!(f, ":{DEFAULT_TAG}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
