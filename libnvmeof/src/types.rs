//! Core NVMe-oF types: descriptors, call contexts, devices and attach state.
//!
//! These types form the data model shared by the fabric layer, the disk
//! manager and the node driver binary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::NvmeofError;

// ---------------------------------------------------------------------------
// Option keys
// ---------------------------------------------------------------------------

pub const OPT_TRANSPORT: &str = "transport";
pub const OPT_TARGET_ADDRESS: &str = "targetAddress";
pub const OPT_TRADDR: &str = "traddr";
pub const OPT_SERVICE_ID: &str = "serviceId";
pub const OPT_TRSVCID: &str = "trsvcid";
pub const OPT_NQN: &str = "nqn";
pub const OPT_FS_TYPE: &str = "fsType";
pub const OPT_READ_ONLY: &str = "readOnly";
pub const OPT_KUBE_FS_TYPE: &str = "kubernetes.io/fsType";
pub const OPT_KUBE_READWRITE: &str = "kubernetes.io/readwrite";
pub const OPT_KUBE_POD_UID: &str = "kubernetes.io/pod.uid";
pub const OPT_KUBE_VOLUME_NAME: &str = "kubernetes.io/pvOrVolumeName";

const DEFAULT_FS_TYPE: &str = "ext4";

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Fabric transport carried in the connect command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Rdma,
    Fc,
    Loop,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Rdma => "rdma",
            Self::Fc => "fc",
            Self::Loop => "loop",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = NvmeofError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "rdma" => Ok(Self::Rdma),
            "fc" => Ok(Self::Fc),
            "loop" => Ok(Self::Loop),
            other => Err(NvmeofError::InvalidDescriptor(format!(
                "unsupported transport {other:?}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume descriptor
// ---------------------------------------------------------------------------

/// Everything needed to reach and mount one remote namespace.
///
/// Identity for mount-path purposes is the tuple
/// `(target_address, service_id, transport, nqn)`; `fs_type` and `read_only`
/// only affect how the device is mounted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub transport: Transport,
    pub target_address: String,
    pub service_id: i32,
    pub nqn: String,
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
    #[serde(default)]
    pub read_only: bool,
}

fn default_fs_type() -> String {
    DEFAULT_FS_TYPE.to_owned()
}

impl VolumeDescriptor {
    /// Build a descriptor from the flat option map handed over by the node
    /// agent.
    ///
    /// Fails with [`NvmeofError::InvalidDescriptor`] when the fabric keys are
    /// missing (the volume is not an NVMe-oF volume) or malformed.
    pub fn from_options(options: &HashMap<String, String>) -> Result<Self, NvmeofError> {
        let get = |keys: &[&str]| lookup(options, keys);

        let transport = get(&[OPT_TRANSPORT])
            .ok_or_else(|| missing(OPT_TRANSPORT))?
            .parse::<Transport>()?;
        let target_address = get(&[OPT_TARGET_ADDRESS, OPT_TRADDR])
            .ok_or_else(|| missing(OPT_TARGET_ADDRESS))?
            .to_owned();
        let nqn = get(&[OPT_NQN]).ok_or_else(|| missing(OPT_NQN))?.to_owned();
        let service_id = get(&[OPT_SERVICE_ID, OPT_TRSVCID])
            .ok_or_else(|| missing(OPT_SERVICE_ID))?;
        let service_id = service_id.parse::<i32>().map_err(|e| {
            NvmeofError::InvalidDescriptor(format!("{OPT_SERVICE_ID} {service_id:?}: {e}"))
        })?;

        let fs_type = get(&[OPT_FS_TYPE, OPT_KUBE_FS_TYPE])
            .unwrap_or(DEFAULT_FS_TYPE)
            .to_owned();

        let read_only = match get(&[OPT_READ_ONLY]) {
            Some(v) => v.parse::<bool>().map_err(|e| {
                NvmeofError::InvalidDescriptor(format!("{OPT_READ_ONLY} {v:?}: {e}"))
            })?,
            None => get(&[OPT_KUBE_READWRITE]) == Some("ro"),
        };

        Ok(Self {
            transport,
            target_address,
            service_id,
            nqn,
            fs_type,
            read_only,
        })
    }

    /// Whether the option map carries the fields of an NVMe-oF volume.
    pub fn can_support(options: &HashMap<String, String>) -> bool {
        options.contains_key(OPT_NQN)
            && options.contains_key(OPT_TRANSPORT)
            && (options.contains_key(OPT_TARGET_ADDRESS) || options.contains_key(OPT_TRADDR))
    }

    /// Stable identity string, `<transport>:<nqn>:<targetAddress>:<serviceId>`.
    pub fn volume_name(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.transport, self.nqn, self.target_address, self.service_id
        )
    }

    /// Directory name of the host-wide mount,
    /// `<targetAddress>-<serviceId>-<transport>-<nqn>`.
    pub fn global_dir_name(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.target_address, self.service_id, self.transport, self.nqn
        )
    }

    /// The ASCII command written to the fabrics control device.
    pub fn connect_command(&self) -> String {
        format!(
            "traddr={},transport={},trsvcid={},nqn={}",
            self.target_address, self.transport, self.service_id, self.nqn
        )
    }
}

fn lookup<'a>(options: &'a HashMap<String, String>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| options.get(*k))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
}

fn missing(key: &str) -> NvmeofError {
    NvmeofError::InvalidDescriptor(format!("missing {key}; not an NVMe-oF volume"))
}

// ---------------------------------------------------------------------------
// Call contexts
// ---------------------------------------------------------------------------

/// Per-call context for a mount (`set_up`).
#[derive(Debug, Clone)]
pub struct MountContext {
    pub volume_name: String,
    pub pod_uid: String,
    pub descriptor: VolumeDescriptor,
    /// Host-wide mount shared by every pod using the volume.
    pub global_mount_path: PathBuf,
    /// Bind mount inside the pod's volume directory.
    pub pod_mount_path: PathBuf,
}

/// Per-call context for an unmount (`tear_down`).
///
/// The node agent does not hand the descriptor back on unmount, so the global
/// mount is recovered from the mount table instead.
#[derive(Debug, Clone)]
pub struct UnmountContext {
    pub volume_name: String,
    pub pod_uid: String,
    pub pod_mount_path: PathBuf,
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// A fabric-attached NVMe device as reported by the listing utility.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FabricDevice {
    /// Controller identifier, e.g. `nvme0`; this is what `disconnect` takes.
    pub id: String,
    /// Namespace block device, e.g. `/dev/nvme0n1`; this is what gets mounted.
    pub path: PathBuf,
}

impl fmt::Display for FabricDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.path.display())
    }
}

/// Reduce a namespace or controller name to its controller identifier.
///
/// `nvme2n1` → `nvme2`, `nvme0n1p1` → `nvme0`, `nvme3` → `nvme3`. Names that
/// do not follow the `nvme<N>` scheme are returned unchanged.
pub fn controller_id(name: &str) -> &str {
    let Some(rest) = name.strip_prefix("nvme") else {
        return name;
    };
    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return name;
    }
    &name[..4 + digits]
}

/// Ordered set of fabric devices visible at one point in time, keyed by
/// controller identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSnapshot {
    devices: BTreeMap<String, FabricDevice>,
}

impl DeviceSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device; the first namespace seen for a controller wins.
    pub fn insert(&mut self, device: FabricDevice) {
        self.devices.entry(device.id.clone()).or_insert(device);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FabricDevice> {
        self.devices.values()
    }

    /// Devices present in `self` but not in `before`.
    pub fn difference(&self, before: &DeviceSnapshot) -> Vec<FabricDevice> {
        self.devices
            .iter()
            .filter(|(id, _)| !before.contains(id))
            .map(|(_, dev)| dev.clone())
            .collect()
    }
}

impl FromIterator<FabricDevice> for DeviceSnapshot {
    fn from_iter<I: IntoIterator<Item = FabricDevice>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for dev in iter {
            snapshot.insert(dev);
        }
        snapshot
    }
}

// ---------------------------------------------------------------------------
// Attach lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of one volume attachment on this host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttachState {
    Unattached,
    Connecting,
    Discovering,
    Mounting,
    Mounted,
    Unmounting,
    Disconnecting,
    /// Terminal; reported to the caller.
    Failed,
}

impl AttachState {
    /// Whether `self → next` is a legal step.
    pub fn can_transition_to(self, next: AttachState) -> bool {
        use AttachState::*;
        matches!(
            (self, next),
            // Connecting: fresh attach. Mounting: device already attached on
            // the host, only the pod bind is missing. Mounted: idempotent
            // re-mount.
            (Unattached, Connecting | Mounting | Mounted | Unmounting)
                | (Connecting, Discovering | Failed)
                | (Discovering, Mounting | Failed)
                | (Mounting, Mounted | Failed)
                | (Mounted, Mounted | Unmounting)
                | (Unmounting, Disconnecting | Unattached | Failed)
                | (Disconnecting, Unattached | Failed)
        )
    }
}

impl fmt::Display for AttachState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unattached => "UNATTACHED",
            Self::Connecting => "CONNECTING",
            Self::Discovering => "DISCOVERING",
            Self::Mounting => "MOUNTING",
            Self::Mounted => "MOUNTED",
            Self::Unmounting => "UNMOUNTING",
            Self::Disconnecting => "DISCONNECTING",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn descriptor() -> VolumeDescriptor {
        VolumeDescriptor {
            transport: Transport::Tcp,
            target_address: "10.0.0.5".into(),
            service_id: 4420,
            nqn: "vol-123".into(),
            fs_type: "ext4".into(),
            read_only: false,
        }
    }

    #[test]
    fn descriptor_from_options() {
        let desc = VolumeDescriptor::from_options(&options(&[
            ("transport", "TCP"),
            ("targetAddress", "10.0.0.5"),
            ("serviceId", "4420"),
            ("nqn", "vol-123"),
            ("kubernetes.io/fsType", "xfs"),
            ("kubernetes.io/readwrite", "ro"),
        ]))
        .unwrap();
        assert_eq!(desc.transport, Transport::Tcp);
        assert_eq!(desc.service_id, 4420);
        assert_eq!(desc.fs_type, "xfs");
        assert!(desc.read_only);
    }

    #[test]
    fn descriptor_aliases_and_defaults() {
        let desc = VolumeDescriptor::from_options(&options(&[
            ("transport", "rdma"),
            ("traddr", "192.168.1.9"),
            ("trsvcid", "4421"),
            ("nqn", "nqn.2014-08.org.nvmexpress:uuid:1"),
        ]))
        .unwrap();
        assert_eq!(desc.target_address, "192.168.1.9");
        assert_eq!(desc.fs_type, "ext4");
        assert!(!desc.read_only);
    }

    #[test]
    fn descriptor_missing_fabric_fields() {
        let err = VolumeDescriptor::from_options(&options(&[("fsType", "ext4")])).unwrap_err();
        assert!(matches!(err, NvmeofError::InvalidDescriptor(_)));
        assert!(!VolumeDescriptor::can_support(&options(&[("fsType", "ext4")])));
    }

    #[test]
    fn descriptor_bad_service_id() {
        let err = VolumeDescriptor::from_options(&options(&[
            ("transport", "tcp"),
            ("targetAddress", "10.0.0.5"),
            ("serviceId", "port"),
            ("nqn", "vol-123"),
        ]))
        .unwrap_err();
        assert!(matches!(err, NvmeofError::InvalidDescriptor(_)));
    }

    #[test]
    fn unknown_transport_rejected() {
        assert!("iscsi".parse::<Transport>().is_err());
        assert_eq!("Fc".parse::<Transport>().unwrap(), Transport::Fc);
    }

    #[test]
    fn identity_strings() {
        let desc = descriptor();
        assert_eq!(desc.volume_name(), "tcp:vol-123:10.0.0.5:4420");
        assert_eq!(desc.global_dir_name(), "10.0.0.5-4420-tcp-vol-123");
        assert_eq!(
            desc.connect_command(),
            "traddr=10.0.0.5,transport=tcp,trsvcid=4420,nqn=vol-123"
        );
    }

    #[test]
    fn global_dir_ignores_mount_flags() {
        let mut other = descriptor();
        other.fs_type = "xfs".into();
        other.read_only = true;
        assert_eq!(descriptor().global_dir_name(), other.global_dir_name());
    }

    #[test]
    fn controller_id_strips_namespace() {
        assert_eq!(controller_id("nvme2n1"), "nvme2");
        assert_eq!(controller_id("nvme10n3p1"), "nvme10");
        assert_eq!(controller_id("nvme3"), "nvme3");
        assert_eq!(controller_id("sda"), "sda");
        assert_eq!(controller_id("nvme-fabrics"), "nvme-fabrics");
    }

    #[test]
    fn snapshot_difference() {
        let dev = |id: &str| FabricDevice {
            id: id.into(),
            path: PathBuf::from(format!("/dev/{id}n1")),
        };
        let before: DeviceSnapshot = [dev("nvme0")].into_iter().collect();
        let after: DeviceSnapshot = [dev("nvme0"), dev("nvme1")].into_iter().collect();
        assert_eq!(after.difference(&before), vec![dev("nvme1")]);
        assert!(before.difference(&after).is_empty());
    }

    #[test]
    fn attach_state_transitions() {
        use AttachState::*;
        assert!(Unattached.can_transition_to(Connecting));
        assert!(Mounted.can_transition_to(Mounted));
        assert!(Mounting.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Connecting));
        assert!(!Connecting.can_transition_to(Mounted));
        assert_eq!(Disconnecting.to_string(), "DISCONNECTING");
    }

    #[test]
    fn device_serializes_for_listing() {
        let dev = FabricDevice {
            id: "nvme2".into(),
            path: PathBuf::from("/dev/nvme2n1"),
        };
        let json = serde_json::to_value(&dev).unwrap();
        assert_eq!(json, serde_json::json!({"id": "nvme2", "path": "/dev/nvme2n1"}));
    }
}
