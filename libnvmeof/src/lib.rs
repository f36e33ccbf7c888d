//! # libnvmeof: NVMe over Fabrics volume attach for RK8s nodes
//!
//! `libnvmeof` connects a host to a remote NVMe-oF namespace, works out which
//! local block device the connect produced, and mounts a filesystem on it for
//! pods to use.  Teardown unmounts and closes the fabric session once no
//! other mount references the device.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeDescriptor`, call contexts, `FabricDevice`, `AttachState`. |
//! | [`error`] | [`NvmeofError`] enum covering all failure modes. |
//! | [`config`] | [`NvmeofConfig`]: YAML file plus `NVMEOF_*` environment overrides. |
//! | [`exec`] | [`CommandRunner`] trait for the external utilities. |
//! | [`fabric`] | Device enumeration, fabric sessions, the host lock and connect-time discovery. |
//! | [`mount`] | [`MountService`] trait and the Linux mounter. |
//! | [`host`] | Kubelet directory layout and the global mount path. |
//! | [`disk`] | [`DiskManager`]: global mount, pod bind mounts, reference-counted detach. |
//! | [`plugin`] | [`NvmeofPlugin`]: the entry points used by the node driver. |

pub mod config;
pub mod disk;
pub mod error;
pub mod exec;
pub mod fabric;
pub mod host;
pub mod mount;
pub mod plugin;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export the most commonly used items at crate root for convenience.
pub use config::{DiscoveryPolicy, NvmeofConfig};
pub use disk::DiskManager;
pub use error::NvmeofError;
pub use exec::{CommandOutput, CommandRunner, HostRunner};
pub use mount::MountService;
pub use plugin::NvmeofPlugin;
pub use types::*;
