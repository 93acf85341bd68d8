//! Container Registry Client
//!
//! Resolves container image references to the CPU architectures their
//! images support, speaking the OCI distribution API (and its Docker
//! schema 2 predecessor) over HTTPS.
//!
//! # Example
//!
//! ```no_run
//! use registry_client::{ArchitectureResolver, RegistryClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = RegistryClient::new(Duration::from_secs(30))?;
//! let resolver = ArchitectureResolver::new(Arc::new(client));
//!
//! // ["amd64", "arm", "arm64", ...]
//! let architectures = resolver.resolve("nginx:1.27").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Index and manifest support**: OCI indexes, Docker manifest lists,
//!   OCI and Docker schema 2 manifests
//! - **Config fallback**: reads the image config blob when a manifest
//!   carries no platform
//! - **Anonymous auth**: answers registry bearer challenges for public images
//! - **Mocking**: `MockRegistryClient` behind the `test-util` feature

pub mod client;
pub mod common;
pub mod error;
pub mod models;
pub mod reference;
#[path = "trait.rs"]
pub mod registry_trait;
pub mod resolver;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::RegistryClient;
pub use error::RegistryError;
pub use models::*;
pub use reference::ImageReference;
pub use registry_trait::RegistryClientTrait;
pub use resolver::{ArchitectureResolver, ManifestFallback};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockRegistryClient;
