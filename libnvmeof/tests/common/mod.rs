//! Host fakes shared by the integration tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use libnvmeof::fabric::{Connector, DeviceEnumerator, FabricSessionManager};
use libnvmeof::host::{KubeletHost, VolumeHost};
use libnvmeof::{
    CommandOutput, CommandRunner, DiscoveryPolicy, DiskManager, MountService, NvmeofError,
    NvmeofPlugin,
};

pub fn init_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("libnvmeof=debug")
            .with_test_writer()
            .try_init();
    });
}

/// Scripted `nvme` utility.
#[derive(Default)]
pub struct Nvme {
    listings: Mutex<VecDeque<Vec<String>>>,
    pub disconnects: Mutex<Vec<String>>,
}

impl Nvme {
    pub fn new(listings: &[&[&str]]) -> Self {
        Self {
            listings: Mutex::new(
                listings
                    .iter()
                    .map(|ids| ids.iter().map(|s| (*s).to_owned()).collect())
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().unwrap().clone()
    }
}

impl CommandRunner for Nvme {
    fn run(&self, _program: &str, args: &[&str]) -> Result<CommandOutput, NvmeofError> {
        match args {
            ["list"] => {
                let mut listings = self.listings.lock().unwrap();
                let ids = if listings.len() > 1 {
                    listings.pop_front().unwrap_or_default()
                } else {
                    listings.front().cloned().unwrap_or_default()
                };
                let mut out = String::from("Node SN Model Namespace Usage Format FW Rev\n");
                for id in ids {
                    out.push_str(&format!("/dev/{id}n1  SN{id}  Linux  1  10.74 GB / 10.74 GB  512 B + 0 B  6.1.0\n"));
                }
                Ok(CommandOutput::success(out))
            }
            ["disconnect", "-d", id] => {
                self.disconnects.lock().unwrap().push((*id).to_owned());
                Ok(CommandOutput::success(""))
            }
            _ => Ok(CommandOutput::failure(1, "unknown command")),
        }
    }
}

/// Mount table kept in memory.
#[derive(Default)]
pub struct Mounts {
    table: Mutex<Vec<(String, PathBuf)>>,
    pub mkfs_calls: Mutex<usize>,
}

impl Mounts {
    pub fn contains(&self, path: &Path) -> bool {
        self.table.lock().unwrap().iter().any(|(_, p)| p == path)
    }

    pub fn mkfs_calls(&self) -> usize {
        *self.mkfs_calls.lock().unwrap()
    }

    fn device_of(&self, path: &Path) -> Option<String> {
        let table = self.table.lock().unwrap();
        table.iter().rev().find(|(_, p)| p == path).map(|(d, _)| d.clone())
    }
}

impl MountService for Mounts {
    fn is_mount_point(&self, path: &Path) -> Result<bool, NvmeofError> {
        Ok(self.contains(path))
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        _fs_type: &str,
        _read_only: bool,
    ) -> Result<(), NvmeofError> {
        *self.mkfs_calls.lock().unwrap() += 1;
        self.table
            .lock()
            .unwrap()
            .push((device.display().to_string(), target.to_path_buf()));
        Ok(())
    }

    fn bind_mount(&self, source: &Path, target: &Path, _read_only: bool) -> Result<(), NvmeofError> {
        let device = self
            .device_of(source)
            .ok_or_else(|| NvmeofError::mount(source, "not mounted"))?;
        self.table.lock().unwrap().push((device, target.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<(), NvmeofError> {
        let mut table = self.table.lock().unwrap();
        let idx = table
            .iter()
            .rposition(|(_, p)| p == path)
            .ok_or_else(|| NvmeofError::mount(path, "not mounted"))?;
        table.remove(idx);
        Ok(())
    }

    fn device_and_ref_count(&self, path: &Path) -> Result<(String, usize), NvmeofError> {
        let device = self
            .device_of(path)
            .ok_or_else(|| NvmeofError::mount(path, "not mounted"))?;
        let count = self
            .table
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| *d == device)
            .count();
        Ok((device, count))
    }

    fn mount_refs(&self, path: &Path) -> Result<Vec<PathBuf>, NvmeofError> {
        let Some(device) = self.device_of(path) else {
            return Ok(Vec::new());
        };
        Ok(self
            .table
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, p)| *d == device && p != path)
            .map(|(_, p)| p.clone())
            .collect())
    }
}

/// A kubelet root in a temp dir with a fake control device.
pub struct Node {
    pub root: tempfile::TempDir,
    pub nvme: Arc<Nvme>,
    pub mounts: Arc<Mounts>,
    pub plugin: NvmeofPlugin,
}

impl Node {
    pub fn new(nvme: Nvme) -> Self {
        let root = tempfile::tempdir().unwrap();
        let control = root.path().join("nvme-fabrics");
        std::fs::write(&control, b"").unwrap();

        let nvme = Arc::new(nvme);
        let mounts = Arc::new(Mounts::default());
        let host = KubeletHost::new(root.path());
        let plugin_dir = host.plugin_dir();
        let connector = Connector::new(
            DeviceEnumerator::new("nvme", "Linux", nvme.clone()),
            FabricSessionManager::new(control, "nvme", nvme.clone()),
            plugin_dir.join(".attach.lock"),
            DiscoveryPolicy::once(),
        );
        let disks = DiskManager::new(connector, mounts.clone(), plugin_dir);
        Self {
            nvme,
            mounts,
            plugin: NvmeofPlugin::new(Arc::new(host), disks),
            root,
        }
    }

    pub fn pod_dir(&self, uid: &str, volume: &str) -> PathBuf {
        KubeletHost::new(self.root.path()).pod_volume_dir(uid, volume)
    }
}
