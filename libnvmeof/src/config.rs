//! Driver configuration.
//!
//! Values come from three layers, later ones winning:
//!
//! 1. built-in defaults ([`NvmeofConfig::default`]),
//! 2. an optional YAML file named by `NVMEOF_CONFIG`,
//! 3. individual environment variables:
//!    - `NVMEOF_CLI`: path of the `nvme` utility.
//!    - `NVMEOF_CONTROL_PATH`: fabrics control device. Defaults to `/dev/nvme-fabrics`.
//!    - `NVMEOF_MOUNT_TABLE`: mount table to read. Defaults to `/proc/self/mounts`.
//!    - `NVMEOF_KUBELET_ROOT`: kubelet state directory. Defaults to `/var/lib/kubelet`.
//!    - `NVMEOF_FABRIC_MODEL`: model column value that marks a fabric device. Defaults to `Linux`.
//!    - `NVMEOF_LOCK_FILE`: host-wide attach lock. Defaults to `<plugin dir>/.attach.lock`.
//!    - `NVMEOF_DISCOVERY_ATTEMPTS`, `NVMEOF_DISCOVERY_BACKOFF_MS`: device discovery retry policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::NvmeofError;

pub const ENV_CONFIG_FILE: &str = "NVMEOF_CONFIG";

/// How hard to look for the device a connect just created.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoveryPolicy {
    /// Total number of post-connect listings, at least one.
    pub attempts: u32,
    /// Delay before the second listing; doubles on every further try.
    pub backoff_ms: u64,
}

impl Default for DiscoveryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 200,
        }
    }
}

impl DiscoveryPolicy {
    /// A single listing, no waiting.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Sleep before post-connect listing number `attempt` (0-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << (attempt - 1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }
}

/// Configuration for the NVMe-oF volume driver.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NvmeofConfig {
    pub nvme_cli: String,
    pub control_path: PathBuf,
    pub mount_table: PathBuf,
    pub kubelet_root: PathBuf,
    /// Value of the listing's model column that marks a fabric-attached row.
    pub fabric_model: String,
    pub lock_file: Option<PathBuf>,
    pub discovery: DiscoveryPolicy,
}

impl Default for NvmeofConfig {
    fn default() -> Self {
        Self {
            nvme_cli: "nvme".to_owned(),
            control_path: PathBuf::from("/dev/nvme-fabrics"),
            mount_table: PathBuf::from("/proc/self/mounts"),
            kubelet_root: PathBuf::from("/var/lib/kubelet"),
            fabric_model: "Linux".to_owned(),
            lock_file: None,
            discovery: DiscoveryPolicy::default(),
        }
    }
}

impl NvmeofConfig {
    /// Load the layered configuration from the process environment.
    pub fn load() -> Result<Self, NvmeofError> {
        let mut config = match std::env::var_os(ENV_CONFIG_FILE) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a YAML configuration file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, NvmeofError> {
        let content = std::fs::read_to_string(path).map_err(|e| NvmeofError::io(path, e))?;
        Self::from_yaml(&content).map_err(|e| NvmeofError::Config {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Override fields from `NVMEOF_*` variables looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F) -> Result<(), NvmeofError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("NVMEOF_CLI") {
            self.nvme_cli = v;
        }
        if let Some(v) = var("NVMEOF_CONTROL_PATH") {
            self.control_path = v.into();
        }
        if let Some(v) = var("NVMEOF_MOUNT_TABLE") {
            self.mount_table = v.into();
        }
        if let Some(v) = var("NVMEOF_KUBELET_ROOT") {
            self.kubelet_root = v.into();
        }
        if let Some(v) = var("NVMEOF_FABRIC_MODEL") {
            self.fabric_model = v;
        }
        if let Some(v) = var("NVMEOF_LOCK_FILE") {
            self.lock_file = Some(v.into());
        }
        if let Some(v) = var("NVMEOF_DISCOVERY_ATTEMPTS") {
            self.discovery.attempts = parse_env("NVMEOF_DISCOVERY_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("NVMEOF_DISCOVERY_BACKOFF_MS") {
            self.discovery.backoff_ms = parse_env("NVMEOF_DISCOVERY_BACKOFF_MS", &v)?;
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T, NvmeofError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| NvmeofError::Config {
            source_name: format!("${key}"),
            reason: format!("invalid value {value:?}: {e}"),
        })
}
