//! `/proc/self/mounts` parsing.

use std::path::{Path, PathBuf};

use crate::error::NvmeofError;

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub device: String,
    pub mount_point: PathBuf,
}

/// Snapshot of the host mount table.
#[derive(Debug, Clone, Default)]
pub struct MountTable {
    entries: Vec<MountEntry>,
}

impl MountTable {
    pub fn read(path: &Path) -> Result<Self, NvmeofError> {
        let content = std::fs::read_to_string(path).map_err(|e| NvmeofError::mount(path, e))?;
        Ok(Self::parse(&content))
    }

    /// Parse the `<device> <mountpoint> <fstype> <options> <dump> <pass>`
    /// format. Lines with fewer than four fields are ignored.
    pub fn parse(content: &str) -> Self {
        let entries = content
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let device = unescape(fields.next()?);
                let mount_point = PathBuf::from(unescape(fields.next()?));
                // fstype and options must be present
                fields.nth(1)?;
                Some(MountEntry {
                    device,
                    mount_point,
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[MountEntry] {
        &self.entries
    }

    /// The mount visible at `path`; with stacked mounts the last one wins.
    pub fn find(&self, path: &Path) -> Option<&MountEntry> {
        self.entries.iter().rev().find(|e| e.mount_point == path)
    }

    pub fn is_mount_point(&self, path: &Path) -> bool {
        self.find(path).is_some()
    }

    /// Device at `path` and the number of mount points using that device.
    pub fn device_and_ref_count(&self, path: &Path) -> Option<(String, usize)> {
        let device = &self.find(path)?.device;
        let count = self.entries.iter().filter(|e| &e.device == device).count();
        Some((device.clone(), count))
    }

    /// Mount points other than `path` that share its device.
    pub fn refs(&self, path: &Path) -> Vec<PathBuf> {
        let Some(entry) = self.find(path) else {
            return Vec::new();
        };
        self.entries
            .iter()
            .filter(|e| e.device == entry.device && e.mount_point != path)
            .map(|e| e.mount_point.clone())
            .collect()
    }
}

/// Undo the kernel's octal escaping (`\040` for space and friends).
fn unescape(field: &str) -> String {
    if !field.contains('\\') {
        return field.to_owned();
    }
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..=i + 3].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = bytes[i + 1..=i + 3]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            out.push(value as u8);
            i += 4;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
