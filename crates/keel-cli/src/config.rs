//! CLI configuration
//!
//! Read from `<config dir>/keel/config.yaml` when present; every field can be
//! overridden by a flag or a `KEEL_*` environment variable.

use clap::Args;
use keel_core::{Capabilities, KubeVersion};
use keel_release::CompressionMethod;
use keel_repo::ArchiveCache;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CliError, Result};

/// Settings loaded from the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeelConfig {
    /// Namespace used when none is given
    pub namespace: String,

    /// Release history directory
    pub storage_dir: Option<PathBuf>,

    /// Package archive cache directory
    pub cache_dir: Option<PathBuf>,

    pub compression: CompressionMethod,

    /// Deadline for resolution and rendering
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,

    /// Use the offline reconciler and the capabilities below
    pub offline: bool,

    pub capabilities: OfflineCapabilities,
}

impl Default for KeelConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            storage_dir: None,
            cache_dir: None,
            compression: CompressionMethod::default(),
            timeout: Some(Duration::from_secs(300)),
            offline: false,
            capabilities: OfflineCapabilities::default(),
        }
    }
}

/// Capabilities assumed when no cluster is consulted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OfflineCapabilities {
    pub kube_version: String,
    /// Empty accepts every `apiVersion`
    pub api_versions: Vec<String>,
}

impl Default for OfflineCapabilities {
    fn default() -> Self {
        Self {
            kube_version: "1.31.0".to_string(),
            api_versions: Vec::new(),
        }
    }
}

impl OfflineCapabilities {
    pub fn to_capabilities(&self) -> Capabilities {
        Capabilities::new(KubeVersion::new(&self.kube_version), self.api_versions.clone())
    }
}

/// Global flags overriding [`KeelConfig`]
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Configuration file
    #[arg(long, env = "KEEL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Target namespace
    #[arg(short, long, env = "KEEL_NAMESPACE", global = true)]
    pub namespace: Option<String>,

    /// Release history directory
    #[arg(long, env = "KEEL_STORAGE_DIR", global = true)]
    pub storage_dir: Option<PathBuf>,

    /// Package cache directory
    #[arg(long, env = "KEEL_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Operation timeout (e.g. 90s, 5m)
    #[arg(long, env = "KEEL_TIMEOUT", global = true, value_parser = parse_duration)]
    pub timeout: Option<Duration>,

    /// Do not contact a cluster
    #[arg(long, env = "KEEL_OFFLINE", global = true)]
    pub offline: bool,
}

fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(raw).map_err(|e| e.to_string())
}

impl KeelConfig {
    /// `<config dir>/keel/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("keel").join("config.yaml"))
    }

    /// Load `path`, or the default file if it exists, or defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(explicit) => explicit.to_path_buf(),
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(found) => found,
                None => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path).map_err(|e| CliError::Config {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| CliError::Config {
            message: format!("invalid {}: {}", path.display(), e),
        })?;

        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Load the file named by `args` and apply the flag overrides
    pub fn resolve(args: &ConfigArgs) -> Result<Self> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply(args);
        Ok(config)
    }

    pub fn apply(&mut self, args: &ConfigArgs) {
        if let Some(namespace) = &args.namespace {
            self.namespace = namespace.clone();
        }
        if let Some(dir) = &args.storage_dir {
            self.storage_dir = Some(dir.clone());
        }
        if let Some(dir) = &args.cache_dir {
            self.cache_dir = Some(dir.clone());
        }
        if let Some(timeout) = args.timeout {
            self.timeout = Some(timeout);
        }
        if args.offline {
            self.offline = true;
        }
    }

    pub fn storage_dir(&self) -> Result<PathBuf> {
        match &self.storage_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|dir| dir.join("keel").join("releases"))
                .ok_or_else(|| CliError::Config {
                    message: "could not determine a data directory; set --storage-dir".into(),
                }),
        }
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => ArchiveCache::default_root().map_err(|e| CliError::Config {
                message: format!("{}; set --cache-dir", e),
            }),
        }
    }
}
