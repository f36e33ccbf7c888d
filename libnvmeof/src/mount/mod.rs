//! Mount service: the filesystem primitives the disk manager delegates to.
//!
//! [`MountService`] is the seam between the attach/detach logic and the
//! host.  [`HostMounter`] is the Linux implementation; tests substitute an
//! in-memory fake.

use std::path::{Path, PathBuf};

use crate::error::NvmeofError;

pub mod linux;
pub mod table;

pub use linux::HostMounter;
pub use table::{MountEntry, MountTable};

/// Format / mount / reference-count primitives.
pub trait MountService: Send + Sync {
    /// Whether `path` is currently a mount point.
    fn is_mount_point(&self, path: &Path) -> Result<bool, NvmeofError>;

    /// Mount block `device` at `target`, creating a `fs_type` filesystem first
    /// when the device carries none. Never formats when `read_only` is set.
    fn format_and_mount(
        &self,
        device: &Path,
        target: &Path,
        fs_type: &str,
        read_only: bool,
    ) -> Result<(), NvmeofError>;

    /// Bind-mount `source` onto `target`.
    fn bind_mount(&self, source: &Path, target: &Path, read_only: bool)
    -> Result<(), NvmeofError>;

    fn unmount(&self, path: &Path) -> Result<(), NvmeofError>;

    /// Device mounted at `path` and how many mount points reference it,
    /// `path` included.
    fn device_and_ref_count(&self, path: &Path) -> Result<(String, usize), NvmeofError>;

    /// The other mount points backed by the same device as `path`.
    fn mount_refs(&self, path: &Path) -> Result<Vec<PathBuf>, NvmeofError>;
}
