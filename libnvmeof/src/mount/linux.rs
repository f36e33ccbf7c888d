//! Linux mount service built on `nix::mount`, `blkid` and `mkfs.*`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::mount::MsFlags;
use tracing::{debug, info, warn};

use crate::error::NvmeofError;
use crate::exec::CommandRunner;
use crate::mount::MountService;
use crate::mount::table::MountTable;

/// `blkid -p` exit code when no filesystem signature was found.
const BLKID_NOTHING_FOUND: i32 = 2;

/// [`MountService`] for the local Linux host.
pub struct HostMounter {
    mount_table: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl HostMounter {
    /// * `mount_table`: normally `/proc/self/mounts`
    /// * `runner`: used for `blkid` and `mkfs.*`
    pub fn new(mount_table: impl Into<PathBuf>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            mount_table: mount_table.into(),
            runner,
        }
    }

    fn table(&self) -> Result<MountTable, NvmeofError> {
        MountTable::read(&self.mount_table)
    }

    /// Filesystem type already on `device`, `None` when blank.
    pub fn probe_fs_type(&self, device: &Path) -> Result<Option<String>, NvmeofError> {
        let dev = path_str(device)?;
        let output = self
            .runner
            .run("blkid", &["-p", "-s", "TYPE", "-o", "value", dev])?;
        match output.code {
            Some(0) => {
                let fs = output.stdout.trim();
                Ok((!fs.is_empty()).then(|| fs.to_owned()))
            }
            Some(BLKID_NOTHING_FOUND) => Ok(None),
            _ => Err(NvmeofError::mount(
                device,
                format!("blkid probe failed: {}", output.stderr.trim()),
            )),
        }
    }

    fn format(&self, device: &Path, fs_type: &str) -> Result<(), NvmeofError> {
        let dev = path_str(device)?;
        let mkfs = format!("mkfs.{fs_type}");
        let mut args = Vec::with_capacity(2);
        match fs_type {
            "ext2" | "ext3" | "ext4" => args.push("-F"),
            "xfs" => args.push("-f"),
            _ => {}
        }
        args.push(dev);

        info!(device = %device.display(), %fs_type, "formatting device");
        self.runner.run_checked(&mkfs, &args)?;
        Ok(())
    }
}

impl MountService for HostMounter {
    fn is_mount_point(&self, path: &Path) -> Result<bool, NvmeofError> {
        Ok(self.table()?.is_mount_point(path))
    }

    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        read_only: bool,
    ) -> Result<(), NvmeofError> {
        let existing = self.probe_fs_type(device)?;
        let mount_fs = match existing {
            Some(found) => {
                if found != fs_type {
                    warn!(
                        device = %device.display(),
                        requested = %fs_type,
                        %found,
                        "device already formatted with a different filesystem, mounting as found",
                    );
                }
                found
            }
            None if read_only => {
                return Err(NvmeofError::mount(
                    device,
                    "device has no filesystem and the volume is read-only",
                ));
            }
            None => {
                self.format(device, fs_type)?;
                fs_type.to_owned()
            }
        };

        let mut flags = MsFlags::empty();
        if read_only {
            flags |= MsFlags::MS_RDONLY;
        }

        nix::mount::mount(
            Some(device),
            target,
            Some(mount_fs.as_str()),
            flags,
            None::<&str>,
        )
        .map_err(|e| NvmeofError::mount(target, e))?;

        info!(
            device = %device.display(),
            target = %target.display(),
            fs_type = %mount_fs,
            read_only,
            "device mounted",
        );
        Ok(())
    }

    fn bind_mount(
        &self,
        source: &Path,
        target: &Path,
        read_only: bool,
    ) -> Result<(), NvmeofError> {
        let mut flags = MsFlags::MS_BIND;
        if read_only {
            flags |= MsFlags::MS_RDONLY;
        }

        nix::mount::mount(Some(source), target, None::<&str>, flags, None::<&str>)
            .map_err(|e| NvmeofError::mount(target, e))?;

        // MS_RDONLY is ignored on the initial bind; it needs a remount.
        if read_only {
            nix::mount::mount(
                None::<&str>,
                target,
                None::<&str>,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                None::<&str>,
            )
            .map_err(|e| NvmeofError::mount(target, format!("remount read-only: {e}")))?;
        }

        debug!(
            source = %source.display(),
            target = %target.display(),
            read_only,
            "bind mount created",
        );
        Ok(())
    }

    fn unmount(&self, path: &Path) -> Result<(), NvmeofError> {
        nix::mount::umount(path).map_err(|e| NvmeofError::mount(path, e))?;
        debug!(path = %path.display(), "unmounted");
        Ok(())
    }

    fn device_and_ref_count(&self, path: &Path) -> Result<(String, usize), NvmeofError> {
        self.table()?
            .device_and_ref_count(path)
            .ok_or_else(|| NvmeofError::mount(path, "not a mount point"))
    }

    fn mount_refs(&self, path: &Path) -> Result<Vec<PathBuf>, NvmeofError> {
        Ok(self.table()?.refs(path))
    }
}

fn path_str(path: &Path) -> Result<&str, NvmeofError> {
    path.to_str()
        .ok_or_else(|| NvmeofError::mount(path, "non-UTF8 path"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::CommandOutput;
    use std::sync::Mutex;

    /// Replays one canned output per call and records the command lines.
    struct Scripted {
        outputs: Mutex<Vec<CommandOutput>>,
        calls: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(mut outputs: Vec<CommandOutput>) -> Arc<Self> {
            outputs.reverse();
            Arc::new(Self {
                outputs: Mutex::new(outputs),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl CommandRunner for Scripted {
        fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NvmeofError> {
            self.calls
                .lock()
                .unwrap()
                .push(crate::exec::command_line(program, args));
            Ok(self.outputs.lock().unwrap().pop().unwrap_or_default())
        }
    }

    fn mounter(runner: Arc<Scripted>, table: &Path) -> HostMounter {
        HostMounter::new(table, runner)
    }

    #[test]
    fn probe_detects_filesystem() {
        let runner = Scripted::new(vec![CommandOutput::success("xfs\n")]);
        let m = mounter(runner, Path::new("/proc/self/mounts"));
        assert_eq!(
            m.probe_fs_type(Path::new("/dev/nvme1n1")).unwrap(),
            Some("xfs".to_owned())
        );
    }

    #[test]
    fn probe_blank_device() {
        let runner = Scripted::new(vec![CommandOutput::failure(BLKID_NOTHING_FOUND, "")]);
        let m = mounter(runner, Path::new("/proc/self/mounts"));
        assert_eq!(m.probe_fs_type(Path::new("/dev/nvme1n1")).unwrap(), None);
    }

    #[test]
    fn probe_error_is_mount_service_error() {
        let runner = Scripted::new(vec![CommandOutput::failure(4, "bad device")]);
        let m = mounter(runner, Path::new("/proc/self/mounts"));
        let err = m.probe_fs_type(Path::new("/dev/nvme1n1")).unwrap_err();
        assert!(matches!(err, NvmeofError::MountService { .. }));
    }

    #[test]
    fn read_only_blank_device_is_not_formatted() {
        let runner = Scripted::new(vec![CommandOutput::failure(BLKID_NOTHING_FOUND, "")]);
        let m = mounter(runner.clone(), Path::new("/proc/self/mounts"));
        let err = m
            .format_and_mount(Path::new("/dev/nvme1n1"), Path::new("/mnt/x"), "ext4", true)
            .unwrap_err();
        assert!(matches!(err, NvmeofError::MountService { .. }));
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].starts_with("blkid"));
    }

    #[test]
    fn format_uses_force_flag() {
        let runner = Scripted::new(vec![CommandOutput::success("")]);
        let m = mounter(runner.clone(), Path::new("/proc/self/mounts"));
        m.format(Path::new("/dev/nvme1n1"), "ext4").unwrap();
        assert_eq!(
            runner.calls.lock().unwrap().as_slice(),
            ["mkfs.ext4 -F /dev/nvme1n1"]
        );
    }

    #[test]
    fn table_queries_read_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("mounts");
        std::fs::write(
            &table,
            "/dev/nvme0n1 /g ext4 rw 0 0\n/dev/nvme0n1 /p ext4 rw 0 0\n",
        )
        .unwrap();
        let m = mounter(Scripted::new(Vec::new()), &table);
        assert!(m.is_mount_point(Path::new("/p")).unwrap());
        assert_eq!(
            m.device_and_ref_count(Path::new("/g")).unwrap(),
            ("/dev/nvme0n1".to_owned(), 2)
        );
        assert_eq!(m.mount_refs(Path::new("/p")).unwrap(), vec![PathBuf::from("/g")]);
        assert!(m.device_and_ref_count(Path::new("/other")).is_err());
    }
}
