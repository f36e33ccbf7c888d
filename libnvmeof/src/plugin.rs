//! The volume plugin as the node agent sees it.
//!
//! [`NvmeofPlugin`] turns the agent's flat option maps and directories into
//! [`MountContext`] / [`UnmountContext`] values and hands them to the
//! [`DiskManager`].

use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::NvmeofConfig;
use crate::disk::DiskManager;
use crate::error::NvmeofError;
use crate::exec::{CommandRunner, HostRunner};
use crate::fabric::{Connector, DeviceEnumerator, FabricSessionManager};
use crate::host::{KubeletHost, PLUGIN_NAME, VolumeHost};
use crate::mount::HostMounter;
use crate::types::{
    FabricDevice, MountContext, OPT_KUBE_POD_UID, OPT_KUBE_VOLUME_NAME, UnmountContext,
    VolumeDescriptor,
};

/// Lock file name inside the plugin directory when none is configured.
pub const DEFAULT_LOCK_FILE: &str = ".attach.lock";

pub struct NvmeofPlugin {
    host: Arc<dyn VolumeHost>,
    disks: DiskManager,
}

impl NvmeofPlugin {
    pub fn new(host: Arc<dyn VolumeHost>, disks: DiskManager) -> Self {
        Self { host, disks }
    }

    /// Wire the plugin to the real host: `nvme` through
    /// [`HostRunner`], mounts through [`HostMounter`], kubelet directory
    /// layout under `config.kubelet_root`.
    pub fn from_config(config: &NvmeofConfig) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(HostRunner);
        let host = KubeletHost::new(&config.kubelet_root);
        let plugin_dir = host.plugin_dir();
        let lock_file = config
            .lock_file
            .clone()
            .unwrap_or_else(|| plugin_dir.join(DEFAULT_LOCK_FILE));

        let connector = Connector::new(
            DeviceEnumerator::new(&config.nvme_cli, &config.fabric_model, runner.clone()),
            FabricSessionManager::new(&config.control_path, &config.nvme_cli, runner.clone()),
            lock_file,
            config.discovery.clone(),
        );
        let mounter = Arc::new(HostMounter::new(&config.mount_table, runner));
        Self::new(
            Arc::new(host),
            DiskManager::new(connector, mounter, plugin_dir),
        )
    }

    pub fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    pub fn disks(&self) -> &DiskManager {
        &self.disks
    }

    pub fn can_support(&self, options: &HashMap<String, String>) -> bool {
        VolumeDescriptor::can_support(options)
    }

    /// `<transport>:<nqn>:<targetAddress>:<serviceId>` of the volume in
    /// `options`.
    pub fn volume_name(&self, options: &HashMap<String, String>) -> Result<String, NvmeofError> {
        Ok(VolumeDescriptor::from_options(options)?.volume_name())
    }

    /// Build the mount context for `options`.
    ///
    /// When the agent names the pod directory (`pod_dir`), it is used as is
    /// and the pod uid is taken from the options or, failing that, from the
    /// directory. Otherwise the directory comes from the [`VolumeHost`],
    /// which requires both the pod uid and volume name options.
    pub fn mount_context(
        &self,
        options: &HashMap<String, String>,
        pod_dir: Option<&Path>,
    ) -> Result<MountContext, NvmeofError> {
        let descriptor = VolumeDescriptor::from_options(options)?;
        let from_dir = pod_dir.and_then(parse_pod_dir);
        let option = |key: &str| options.get(key).filter(|v| !v.is_empty()).cloned();

        let pod_uid = option(OPT_KUBE_POD_UID)
            .or_else(|| from_dir.as_ref().map(|(uid, _)| uid.clone()))
            .unwrap_or_default();
        let volume_name = option(OPT_KUBE_VOLUME_NAME)
            .or_else(|| from_dir.as_ref().map(|(_, vol)| vol.clone()))
            .unwrap_or_else(|| descriptor.volume_name());

        let pod_mount_path = match pod_dir {
            Some(dir) => dir.to_path_buf(),
            None if !pod_uid.is_empty() => self.host.pod_volume_dir(&pod_uid, &volume_name),
            None => {
                return Err(NvmeofError::InvalidDescriptor(format!(
                    "missing {OPT_KUBE_POD_UID}; cannot place the pod mount"
                )));
            }
        };

        Ok(MountContext {
            global_mount_path: self.disks.global_mount_path(&descriptor),
            volume_name,
            pod_uid,
            descriptor,
            pod_mount_path,
        })
    }

    /// Build the unmount context for a pod volume directory.
    pub fn unmount_context(&self, pod_dir: &Path) -> UnmountContext {
        let (pod_uid, volume_name) = parse_pod_dir(pod_dir).unwrap_or_else(|| {
            let name = pod_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (String::new(), name)
        });
        UnmountContext {
            volume_name,
            pod_uid,
            pod_mount_path: pod_dir.to_path_buf(),
        }
    }

    pub fn set_up(&self, ctx: &MountContext) -> Result<(), NvmeofError> {
        self.disks.set_up(ctx)
    }

    pub fn tear_down(&self, ctx: &UnmountContext) -> Result<(), NvmeofError> {
        self.disks.tear_down(ctx)
    }

    /// Fabric devices currently attached to the host.
    pub fn list_devices(&self) -> Result<Vec<FabricDevice>, NvmeofError> {
        let snapshot = self.disks.connector().enumerator().list_fabric_devices()?;
        Ok(snapshot.iter().cloned().collect())
    }

    /// Close the fabric session behind `device_path` (`/dev/nvme2n1`).
    #[instrument(skip(self))]
    pub fn disconnect(&self, device_path: &str) -> Result<(), NvmeofError> {
        self.disks
            .connector()
            .sessions()
            .disconnect_device_path(device_path)
    }
}

/// Split `.../pods/<uid>/volumes/<plugin>/<volume>` into `(uid, volume)`.
fn parse_pod_dir(dir: &Path) -> Option<(String, String)> {
    let parts: Vec<&str> = dir
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    let pods = parts.iter().rposition(|p| *p == "pods")?;
    match &parts[pods + 1..] {
        [uid, "volumes", _, volume] => Some(((*uid).to_owned(), (*volume).to_owned())),
        _ => {
            debug!(dir = %dir.display(), "not a kubelet pod volume directory");
            None
        }
    }
}
