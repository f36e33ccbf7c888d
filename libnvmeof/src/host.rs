//! On-disk directory layout supplied by the node agent.

use std::path::{Path, PathBuf};

use crate::types::VolumeDescriptor;

/// Plugin name used for the kubelet plugin directory.
pub const PLUGIN_NAME: &str = "kubernetes.io/nvmeof";

/// Escaped form of [`PLUGIN_NAME`] used inside pod volume directories.
const PLUGIN_DIR_NAME: &str = "kubernetes.io~nvmeof";

/// Directory provider: where host-wide and per-pod mounts live.
pub trait VolumeHost: Send + Sync {
    /// Base directory for host-wide (global) mounts of this plugin.
    fn plugin_dir(&self) -> PathBuf;

    /// Per-pod mount directory for `volume_name`.
    fn pod_volume_dir(&self, pod_uid: &str, volume_name: &str) -> PathBuf;
}

/// Kubelet directory layout rooted at e.g. `/var/lib/kubelet`.
///
/// ```text
/// <root>/plugins/kubernetes.io/nvmeof/<addr>-<svcid>-<transport>-<nqn>
/// <root>/pods/<pod-uid>/volumes/kubernetes.io~nvmeof/<volume>
/// ```
#[derive(Debug, Clone)]
pub struct KubeletHost {
    root: PathBuf,
}

impl KubeletHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl VolumeHost for KubeletHost {
    fn plugin_dir(&self) -> PathBuf {
        self.root.join("plugins").join(PLUGIN_NAME)
    }

    fn pod_volume_dir(&self, pod_uid: &str, volume_name: &str) -> PathBuf {
        self.root
            .join("pods")
            .join(pod_uid)
            .join("volumes")
            .join(PLUGIN_DIR_NAME)
            .join(volume_name)
    }
}

/// Host-wide mount path of a volume. Depends only on the descriptor's
/// identity tuple, so every pod sharing the volume resolves the same path.
pub fn global_mount_path(plugin_dir: &Path, descriptor: &VolumeDescriptor) -> PathBuf {
    plugin_dir.join(descriptor.global_dir_name())
}
