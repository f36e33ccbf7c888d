//! Device enumeration through `nvme list`.
//!
//! The tabular output looks like:
//!
//! ```text
//! Node             SN                   Model      Namespace Usage                 Format       FW Rev
//! ---------------- -------------------- ---------- --------- --------------------- ------------ --------
//! /dev/nvme0n1     S4EWNX0N123456       Samsung SSD 970 EVO Plus 1TB  1  ...
//! /dev/nvme1n1     8d5e1f2b3a4c5d6e     Linux      1         10.74  GB /  10.74  GB    512   B +  0 B   5.15.0
//! ```
//!
//! A Linux NVMe target reports `Linux` as its model, so a row whose third
//! column is the configured model string is taken to be fabric-attached.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::NvmeofError;
use crate::exec::CommandRunner;
use crate::types::{DeviceSnapshot, FabricDevice, controller_id};

/// Rows shorter than this cannot carry the model column.
const MIN_COLUMNS: usize = 4;
const MODEL_COLUMN: usize = 2;

/// Classification of one line of listing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListLine {
    /// A fabric-attached device row.
    Fabric(FabricDevice),
    /// A device row for a locally attached drive.
    Local,
    /// A device row that could not be interpreted.
    Malformed,
    /// Header, separator or blank line.
    Other,
}

/// Classify one line of `nvme list` output.
pub fn parse_list_line(line: &str, fabric_model: &str) -> ListLine {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let Some(node) = fields.first() else {
        return ListLine::Other;
    };
    if !node.starts_with('/') {
        return ListLine::Other;
    }
    if fields.len() < MIN_COLUMNS {
        return ListLine::Malformed;
    }
    if fields[MODEL_COLUMN] != fabric_model {
        return ListLine::Local;
    }

    let segments: Vec<&str> = node.split('/').collect();
    match segments.get(2) {
        Some(name) if !name.is_empty() => ListLine::Fabric(FabricDevice {
            id: controller_id(name).to_owned(),
            path: (*node).into(),
        }),
        _ => ListLine::Malformed,
    }
}

/// Result of parsing a full listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub devices: DeviceSnapshot,
    /// Device rows that could not be interpreted.
    pub malformed: usize,
}

/// Parse full `nvme list` output, keeping fabric devices only.
pub fn parse_listing(output: &str, fabric_model: &str) -> Listing {
    let mut listing = Listing::default();
    for line in output.lines() {
        match parse_list_line(line, fabric_model) {
            ListLine::Fabric(dev) => listing.devices.insert(dev),
            ListLine::Malformed => {
                debug!(%line, "skipping unparseable nvme list row");
                listing.malformed += 1;
            }
            ListLine::Local | ListLine::Other => {}
        }
    }
    listing
}

/// Lists fabric-attached NVMe devices on this host.
#[derive(Clone)]
pub struct DeviceEnumerator {
    nvme_cli: String,
    fabric_model: String,
    runner: Arc<dyn CommandRunner>,
}

impl DeviceEnumerator {
    pub fn new(
        nvme_cli: impl Into<String>,
        fabric_model: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            nvme_cli: nvme_cli.into(),
            fabric_model: fabric_model.into(),
            runner,
        }
    }

    /// Run the listing utility and return the fabric devices it reports.
    pub fn list_fabric_devices(&self) -> Result<DeviceSnapshot, NvmeofError> {
        let output = self.runner.run_checked(&self.nvme_cli, &["list"])?;
        let listing = parse_listing(&output.stdout, &self.fabric_model);
        if listing.malformed > 0 {
            warn!(
                skipped = listing.malformed,
                "nvme list rows could not be parsed and were ignored",
            );
        }
        debug!(devices = ?listing.devices.ids().collect::<Vec<_>>(), "fabric devices listed");
        Ok(listing.devices)
    }
}
