//! Command-line and environment configuration.

use crate::error::ControllerError;
use clap::{Args, Parser, Subcommand, ValueEnum};
use registry_client::ManifestFallback;
use std::path::PathBuf;
use std::time::Duration;

/// Keeps node architecture taints and pod architecture tolerations in sync
/// with the architectures container images actually support.
#[derive(Debug, Parser)]
#[command(name = "archaware", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the controller until SIGINT or SIGTERM (default)
    Run,
    /// Remove every architecture taint and toleration, then exit.
    ///
    /// Pods carrying architecture tolerations are deleted so their owners
    /// recreate them without.
    Clean,
}

/// How to find the architecture of a manifest with no inlined platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FallbackMode {
    /// Fetch the image config blob and read its architecture
    FetchConfig,
    /// Assume `--default-architecture`
    AssumeDefault,
}

#[derive(Debug, Clone, Args)]
pub struct Config {
    /// Path to a kubeconfig file (falls back to ~/.kube/config, then in-cluster)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Key of architecture taints and tolerations
    #[arg(long, env = "ARCHAWARE_TAINT_KEY", default_value = "supported-arch", global = true)]
    pub taint_key: String,

    /// Seconds between full resync passes
    #[arg(long, env = "ARCHAWARE_RESYNC_INTERVAL_SECS", default_value_t = 60, global = true)]
    pub resync_interval_secs: u64,

    /// Attempts per reconciliation before giving up until the next trigger
    #[arg(long, env = "ARCHAWARE_MAX_RETRY_ATTEMPTS", default_value_t = 5, global = true)]
    pub max_retry_attempts: u32,

    /// Immediate re-read-and-write attempts on a write conflict
    #[arg(long, env = "ARCHAWARE_CONFLICT_RETRY_ATTEMPTS", default_value_t = 5, global = true)]
    pub conflict_retry_attempts: u32,

    #[arg(
        long,
        env = "ARCHAWARE_MANIFEST_FALLBACK",
        value_enum,
        default_value_t = FallbackMode::FetchConfig,
        global = true
    )]
    pub manifest_fallback: FallbackMode,

    /// Architecture assumed by `--manifest-fallback assume-default`
    #[arg(long, env = "ARCHAWARE_DEFAULT_ARCHITECTURE", default_value = "amd64", global = true)]
    pub default_architecture: String,

    /// Timeout for registry HTTP requests, in seconds
    #[arg(long, env = "ARCHAWARE_REGISTRY_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub registry_timeout_secs: u64,

    /// Default log filter, overridden by RUST_LOG
    #[arg(long, env = "ARCHAWARE_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.taint_key.trim().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "taint key must not be empty".to_string(),
            ));
        }
        if self.resync_interval_secs == 0 {
            return Err(ControllerError::InvalidConfig(
                "resync interval must be at least one second".to_string(),
            ));
        }
        if self.max_retry_attempts == 0 {
            return Err(ControllerError::InvalidConfig(
                "max retry attempts must be at least 1".to_string(),
            ));
        }
        if self.conflict_retry_attempts == 0 {
            return Err(ControllerError::InvalidConfig(
                "conflict retry attempts must be at least 1".to_string(),
            ));
        }
        if self.manifest_fallback == FallbackMode::AssumeDefault
            && self.default_architecture.trim().is_empty()
        {
            return Err(ControllerError::InvalidConfig(
                "default architecture must not be empty with assume-default".to_string(),
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    #[must_use]
    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    #[must_use]
    pub fn manifest_fallback(&self) -> ManifestFallback {
        match self.manifest_fallback {
            FallbackMode::FetchConfig => ManifestFallback::FetchConfig,
            FallbackMode::AssumeDefault => {
                ManifestFallback::AssumeDefault(self.default_architecture.clone())
            }
        }
    }
}
