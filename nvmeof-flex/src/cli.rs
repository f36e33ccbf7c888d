//! Command line of the FlexVolume driver.
//!
//! The node agent execs the driver as `nvmeof-flex <call> [args...]`. Calls
//! this driver does not implement (`attach`, `waitforattach`, ...) are
//! collected by [`Command::Unsupported`] and answered with `Not supported`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "nvmeof-flex", version, about = "NVMe over Fabrics FlexVolume driver")]
pub struct Cli {
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Report driver capabilities
    Init,
    /// Print the unique name of the volume described by the options
    #[command(name = "getvolumename")]
    GetVolumeName {
        /// Volume options as a JSON object
        options: String,
    },
    /// Attach the volume if needed and mount it at the pod directory
    Mount {
        /// Pod volume directory
        dir: PathBuf,
        /// Volume options as a JSON object
        options: String,
    },
    /// Unmount the pod directory, detaching the volume after its last user
    Unmount {
        /// Pod volume directory
        dir: PathBuf,
    },
    /// List the fabric-attached NVMe devices on this host
    List,
    /// Close the fabric session behind a device path such as /dev/nvme2n1
    Disconnect { device: String },
    #[command(external_subcommand)]
    Unsupported(Vec<String>),
}
