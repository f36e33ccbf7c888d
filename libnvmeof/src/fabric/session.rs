//! Fabric session management: connect through the fabrics control device,
//! disconnect through `nvme disconnect`.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::fd::IntoRawFd;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::error::NvmeofError;
use crate::exec::CommandRunner;
use crate::types::{VolumeDescriptor, controller_id};

/// Bytes read back from the control device after a connect.
const RESPONSE_LEN: usize = 128;
const RESPONSE_CAPACITY: usize = 1024;

/// Opens and closes fabric sessions.
#[derive(Clone)]
pub struct FabricSessionManager {
    control_path: PathBuf,
    nvme_cli: String,
    runner: Arc<dyn CommandRunner>,
}

impl FabricSessionManager {
    /// * `control_path`: fabrics control device, normally `/dev/nvme-fabrics`
    /// * `nvme_cli`: the `nvme` utility used for disconnects
    pub fn new(
        control_path: impl Into<PathBuf>,
        nvme_cli: impl Into<String>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            control_path: control_path.into(),
            nvme_cli: nvme_cli.into(),
            runner,
        }
    }

    /// Ask the kernel to connect to the target named by `descriptor`.
    ///
    /// The response read back is only logged; success is decided by the I/O
    /// calls alone.
    #[instrument(skip(self, descriptor), fields(nqn = %descriptor.nqn))]
    pub fn connect(&self, descriptor: &VolumeDescriptor) -> Result<(), NvmeofError> {
        let path = &self.control_path;
        let command = descriptor.connect_command();
        debug!(%command, path = %path.display(), "writing fabrics connect command");

        let mut channel = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| NvmeofError::control(path, "open", e))?;

        let written = channel
            .write(command.as_bytes())
            .map_err(|e| NvmeofError::control(path, "write", e))?;
        if written != command.len() {
            return Err(NvmeofError::control(
                path,
                "write",
                format!("short write {written} of {} bytes", command.len()),
            ));
        }

        let mut response = Vec::with_capacity(RESPONSE_CAPACITY);
        response.resize(RESPONSE_LEN, 0u8);
        let read = channel
            .read(&mut response)
            .map_err(|e| NvmeofError::control(path, "read", e))?;
        response.truncate(read);

        // Dropping a File swallows close(2) errors.
        nix::unistd::close(channel.into_raw_fd())
            .map_err(|e| NvmeofError::control(path, "close", e))?;

        let response = String::from_utf8_lossy(&response);
        debug!(response = %response.trim_end_matches('\0').trim(), "fabrics connect response");
        info!(
            traddr = %descriptor.target_address,
            trsvcid = descriptor.service_id,
            transport = %descriptor.transport,
            "fabric session connected",
        );
        Ok(())
    }

    /// Close the fabric session of controller `device_id` (e.g. `nvme2`).
    #[instrument(skip(self))]
    pub fn disconnect(&self, device_id: &str) -> Result<(), NvmeofError> {
        self.runner
            .run_checked(&self.nvme_cli, &["disconnect", "-d", device_id])?;
        info!(device = %device_id, "fabric session disconnected");
        Ok(())
    }

    /// Disconnect the controller behind a `/dev/<name>` device path.
    pub fn disconnect_device_path(&self, device_path: &str) -> Result<(), NvmeofError> {
        let device_id = device_id_from_path(device_path)?;
        self.disconnect(device_id)
    }
}

/// Extract the controller identifier from a three-segment device path.
///
/// `/dev/nvme3` → `nvme3`, `/dev/nvme2n1` → `nvme2`. Anything that does not
/// split into exactly `["", "dev", "<name>"]`-shaped segments is rejected
/// rather than guessed at.
pub fn device_id_from_path(device_path: &str) -> Result<&str, NvmeofError> {
    let segments: Vec<&str> = device_path.split('/').collect();
    match segments.as_slice() {
        [_, _, name] if !name.is_empty() => Ok(controller_id(name)),
        _ => Err(NvmeofError::PathParse(device_path.to_owned())),
    }
}
