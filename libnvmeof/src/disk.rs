//! Disk manager: the two-level mount layout built on top of an attach.
//!
//! A volume is mounted once per host at its global path under the plugin
//! directory and bind-mounted from there into every pod that uses it:
//!
//! ```text
//! /dev/nvme2n1 ──mount──▶ <plugin_dir>/10.0.0.5-4420-tcp-vol-123
//!                               │
//!                               └──bind──▶ <pod dir>/volumes/kubernetes.io~nvmeof/<vol>
//! ```
//!
//! The fabric session is only closed when the last of these mounts goes.

use std::fs::DirBuilder;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use crate::error::NvmeofError;
use crate::fabric::Connector;
use crate::host;
use crate::mount::MountService;
use crate::types::{AttachState, FabricDevice, MountContext, UnmountContext, VolumeDescriptor};

/// Permission bits of the global and pod mount directories.
const MOUNT_DIR_MODE: u32 = 0o750;

/// Sets up and tears down volume mounts.
#[derive(Clone)]
pub struct DiskManager {
    connector: Connector,
    mounter: Arc<dyn MountService>,
    plugin_dir: PathBuf,
}

impl DiskManager {
    pub fn new(
        connector: Connector,
        mounter: Arc<dyn MountService>,
        plugin_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connector,
            mounter,
            plugin_dir: plugin_dir.into(),
        }
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn global_mount_path(&self, descriptor: &VolumeDescriptor) -> PathBuf {
        host::global_mount_path(&self.plugin_dir, descriptor)
    }

    /// Make the volume available at `ctx.pod_mount_path`.
    ///
    /// Idempotent: an existing pod mount returns immediately, and an existing
    /// global mount is reused without connecting again.
    #[instrument(skip_all, fields(volume = %ctx.volume_name, pod = %ctx.pod_uid))]
    pub fn set_up(&self, ctx: &MountContext) -> Result<(), NvmeofError> {
        let mut life = Lifecycle::new(&ctx.volume_name, AttachState::Unattached);
        self.mount_volume(ctx, &mut life).inspect_err(|e| life.fail(e))
    }

    fn mount_volume(&self, ctx: &MountContext, life: &mut Lifecycle<'_>) -> Result<(), NvmeofError> {
        let pod = &ctx.pod_mount_path;
        let global = &ctx.global_mount_path;

        if self.mounter.is_mount_point(pod)? {
            debug!(path = %pod.display(), "pod path already mounted, assuming idempotent retry");
            life.advance(AttachState::Mounted);
            return Ok(());
        }

        // Held across the global-mount check, the attach and the global mount.
        let guard = self.connector.lock()?;
        if self.mounter.is_mount_point(global)? {
            info!(path = %global.display(), "volume already attached on this host, reusing global mount");
            life.advance(AttachState::Mounting);
        } else {
            life.advance(AttachState::Connecting);
            let device = self
                .connector
                .attach_observed(&guard, &ctx.descriptor, |state| life.advance(state))?;
            life.advance(AttachState::Mounting);

            if let Err(e) = self.mount_global(&device, global, &ctx.descriptor) {
                self.release_session(&device, &e);
                return Err(e);
            }
        }
        drop(guard);

        create_mount_dir(pod)?;
        self.mounter
            .bind_mount(global, pod, ctx.descriptor.read_only)?;
        life.advance(AttachState::Mounted);

        info!(
            global = %global.display(),
            pod = %pod.display(),
            read_only = ctx.descriptor.read_only,
            "volume mounted",
        );
        Ok(())
    }

    fn mount_global(
        &self,
        device: &FabricDevice,
        global: &Path,
        descriptor: &VolumeDescriptor,
    ) -> Result<(), NvmeofError> {
        create_mount_dir(global)?;
        self.mounter.format_and_mount(
            &device.path,
            global,
            &descriptor.fs_type,
            descriptor.read_only,
        )?;
        info!(device = %device, path = %global.display(), fs = %descriptor.fs_type, "global mount ready");
        Ok(())
    }

    /// Undo a connect whose device could not be mounted.
    fn release_session(&self, device: &FabricDevice, cause: &NvmeofError) {
        warn!(device = %device, error = %cause, "mount failed after connect, disconnecting");
        if let Err(e) = self.connector.sessions().disconnect(&device.id) {
            error!(device = %device, error = %e, "compensating disconnect failed, session left open");
        }
    }

    /// Remove the pod's bind mount, and the global mount plus the fabric
    /// session once no pod uses the device any more.
    #[instrument(skip_all, fields(volume = %ctx.volume_name, pod = %ctx.pod_uid))]
    pub fn tear_down(&self, ctx: &UnmountContext) -> Result<(), NvmeofError> {
        let pod = &ctx.pod_mount_path;
        if !self.mounter.is_mount_point(pod)? {
            debug!(path = %pod.display(), "pod path not mounted, nothing to tear down");
            remove_mount_dir(pod)?;
            return Ok(());
        }

        let mut life = Lifecycle::new(&ctx.volume_name, AttachState::Mounted);
        life.advance(AttachState::Unmounting);
        self.unmount_volume(pod, &mut life)
            .inspect_err(|e| life.fail(e))
    }

    fn unmount_volume(&self, pod: &Path, life: &mut Lifecycle<'_>) -> Result<(), NvmeofError> {
        // Two pods unmounting at once must not both see the other as the
        // remaining user.
        let _guard = self.connector.lock()?;
        let refs = self.mounter.mount_refs(pod)?;
        self.mounter.unmount(pod)?;
        remove_mount_dir(pod)?;
        info!(path = %pod.display(), "pod mount removed");

        match refs.as_slice() {
            [global] if global.starts_with(&self.plugin_dir) => self.detach(global, life),
            _ => {
                debug!(remaining = refs.len(), "device still referenced, keeping global mount");
                life.advance(AttachState::Unattached);
                Ok(())
            }
        }
    }

    /// Unmount `path` and disconnect its device if `path` was the device's
    /// last mount.
    ///
    /// A failed disconnect is reported as [`NvmeofError::PartialTeardown`]:
    /// the mount is gone at that point but the session is not.
    #[instrument(skip(self))]
    pub fn detach_disk(&self, path: &Path) -> Result<(), NvmeofError> {
        let volume = path.display().to_string();
        let mut life = Lifecycle::new(&volume, AttachState::Unmounting);
        let _guard = self.connector.lock()?;
        self.detach(path, &mut life).inspect_err(|e| life.fail(e))
    }

    fn detach(&self, path: &Path, life: &mut Lifecycle<'_>) -> Result<(), NvmeofError> {
        let (device, count) = self.mounter.device_and_ref_count(path)?;
        self.mounter.unmount(path)?;
        remove_mount_dir(path)?;
        info!(%device, path = %path.display(), refs = count, "global mount removed");

        if count > 1 {
            debug!(%device, refs = count, "device still in use, leaving fabric session intact");
            life.advance(AttachState::Unattached);
            return Ok(());
        }

        life.advance(AttachState::Disconnecting);
        self.connector
            .sessions()
            .disconnect_device_path(&device)
            .map_err(|e| NvmeofError::PartialTeardown {
                device: device.clone(),
                reason: e.to_string(),
            })?;
        life.advance(AttachState::Unattached);
        info!(%device, "volume detached");
        Ok(())
    }
}

/// Tracks and logs the [`AttachState`] of one operation.
struct Lifecycle<'a> {
    volume: &'a str,
    state: AttachState,
}

impl<'a> Lifecycle<'a> {
    fn new(volume: &'a str, state: AttachState) -> Self {
        Self { volume, state }
    }

    fn advance(&mut self, next: AttachState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal attach transition {} -> {}",
            self.state,
            next
        );
        debug!(volume = self.volume, from = %self.state, to = %next, "attach state");
        self.state = next;
    }

    fn fail(&mut self, err: &NvmeofError) {
        error!(volume = self.volume, state = %self.state, error = %err, "volume operation failed");
        if self.state.can_transition_to(AttachState::Failed) {
            self.state = AttachState::Failed;
        }
    }
}

fn create_mount_dir(path: &Path) -> Result<(), NvmeofError> {
    DirBuilder::new()
        .recursive(true)
        .mode(MOUNT_DIR_MODE)
        .create(path)
        .map_err(|e| NvmeofError::io(path, e))
}

/// Remove an empty mount directory; a missing one is fine.
fn remove_mount_dir(path: &Path) -> Result<(), NvmeofError> {
    match std::fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(NvmeofError::io(path, e)),
    }
}
