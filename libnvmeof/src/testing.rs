//! In-memory host used by the unit tests.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Barrier, Mutex};

use crate::error::NvmeofError;
use crate::exec::{CommandOutput, CommandRunner};
use crate::mount::MountService;

/// `nvme list` output with one `Linux` row per device id.
pub fn listing(ids: &[&str]) -> String {
    let mut out = String::from(
        "Node             SN                   Model    Namespace Usage                      Format           FW Rev\n\
         ---------------- -------------------- -------- --------- -------------------------- ---------------- --------\n",
    );
    for id in ids {
        out.push_str(&format!(
            "/dev/{id}n1     0123456789abcdef     Linux    1         10.74  GB /  10.74  GB    512   B +  0 B   6.1.0\n"
        ));
    }
    out
}

/// Fake `nvme` utility. Each `list` pops the next scripted listing; the last
/// one repeats. `disconnect` calls are recorded.
#[derive(Default)]
pub struct FakeNvme {
    pub listings: Mutex<VecDeque<String>>,
    pub disconnects: Mutex<Vec<String>>,
    pub list_calls: Mutex<usize>,
    pub fail_disconnect: bool,
}

impl FakeNvme {
    pub fn with_listings(listings: &[&[&str]]) -> Self {
        Self {
            listings: Mutex::new(listings.iter().map(|ids| listing(ids)).collect()),
            ..Default::default()
        }
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }
}

impl CommandRunner for FakeNvme {
    fn run(&self, _program: &str, args: &[&str]) -> Result<CommandOutput, NvmeofError> {
        match args {
            ["list"] => {
                *self.list_calls.lock().unwrap() += 1;
                let mut listings = self.listings.lock().unwrap();
                let out = if listings.len() > 1 {
                    listings.pop_front().unwrap_or_default()
                } else {
                    listings.front().cloned().unwrap_or_default()
                };
                Ok(CommandOutput::success(out))
            }
            ["disconnect", "-d", device] => {
                self.disconnects.lock().unwrap().push((*device).to_owned());
                if self.fail_disconnect {
                    Ok(CommandOutput::failure(1, "failed to disconnect"))
                } else {
                    Ok(CommandOutput::success("NQN:vol disconnected 1 controller(s)"))
                }
            }
            other => Err(NvmeofError::UtilityInvocation {
                command: format!("nvme {}", other.join(" ")),
                reason: "unexpected call".to_owned(),
            }),
        }
    }
}

/// In-memory mount table implementing [`MountService`].
#[derive(Default)]
pub struct FakeMounter {
    /// `(device, mount point)` pairs.
    pub mounts: Mutex<Vec<(String, PathBuf)>>,
    /// Every `format_and_mount` call as `(device, target, fs_type)`.
    pub formatted: Mutex<Vec<(PathBuf, PathBuf, String)>>,
    pub fail_mount: bool,
    /// `is_mount_point` on a path ending in this name waits on the barrier.
    pub gate: Option<(String, Barrier)>,
}

impl FakeMounter {
    pub fn with_mounts(mounts: &[(&str, &str)]) -> Self {
        Self {
            mounts: Mutex::new(
                mounts
                    .iter()
                    .map(|(d, p)| ((*d).to_owned(), PathBuf::from(p)))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    pub fn mounted(&self, path: &Path) -> bool {
        self.mounts.lock().unwrap().iter().any(|(_, p)| p == path)
    }

    pub fn format_calls(&self) -> usize {
        self.formatted.lock().unwrap().len()
    }

    fn device_of(&self, path: &Path) -> Option<String> {
        self.mounts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(_, p)| p == path)
            .map(|(d, _)| d.clone())
    }
}

impl MountService for FakeMounter {
    fn is_mount_point(&self, path: &Path) -> Result<bool, NvmeofError> {
        if let Some((name, barrier)) = &self.gate {
            if path.ends_with(name) {
                barrier.wait();
            }
        }
        Ok(self.mounted(path))
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        _read_only: bool,
    ) -> Result<(), NvmeofError> {
        self.formatted.lock().unwrap().push((
            device.to_path_buf(),
            target.to_path_buf(),
            fs_type.to_owned(),
        ));
        if self.fail_mount {
            return Err(NvmeofError::mount(target, "wrong fs type, bad superblock"));
        }
        self.mounts
            .lock()
            .unwrap()
            .push((device.display().to_string(), target.to_path_buf()));
        Ok(())
    }

    fn bind_mount(
        &self,
        source: &Path,
        target: &Path,
        _read_only: bool,
    ) -> Result<(), NvmeofError> {
        let device = self
            .device_of(source)
            .ok_or_else(|| NvmeofError::mount(source, "bind source not mounted"))?;
        self.mounts
            .lock()
            .unwrap()
            .push((device, target.to_path_buf()));
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<(), NvmeofError> {
        let mut mounts = self.mounts.lock().unwrap();
        let idx = mounts
            .iter()
            .rposition(|(_, p)| p == path)
            .ok_or_else(|| NvmeofError::mount(path, "not mounted"))?;
        mounts.remove(idx);
        Ok(())
    }

    fn device_and_ref_count(&self, path: &Path) -> Result<(String, usize), NvmeofError> {
        let device = self
            .device_of(path)
            .ok_or_else(|| NvmeofError::mount(path, "not a mount point"))?;
        let count = self
            .mounts
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
            .mounts
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, p)| *d == device && p != path)
            .map(|(_, p)| p.clone())
            .collect())
    }
}
