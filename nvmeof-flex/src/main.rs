//! `nvmeof-flex`: FlexVolume driver attaching NVMe over Fabrics volumes.
//!
//! Every call prints one JSON status object on stdout and exits non-zero on
//! failure.

mod cli;
mod logging;
mod output;

use std::collections::HashMap;
use std::process::ExitCode;
use std::sync::LazyLock;

use anyhow::{Context, bail};
use clap::Parser;
use clap::error::ErrorKind;
use libnvmeof::{NvmeofConfig, NvmeofError, NvmeofPlugin};
use tracing::{debug, error, info};

use crate::cli::{Cli, Command};
use crate::output::DriverStatus;

/// Driver configuration, loaded on first use.
static CONFIG: LazyLock<Result<NvmeofConfig, NvmeofError>> = LazyLock::new(NvmeofConfig::load);

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => return reply(parse_failure(&e)),
    };
    if let Err(e) = logging::init(cli.json) {
        eprintln!("nvmeof-flex: {e:#}");
    }

    let status = run(cli.command).unwrap_or_else(|e| {
        let message = format!("{e:#}");
        error!(error = %message, "driver call failed");
        DriverStatus::failure(message)
    });
    reply(status)
}

fn reply(status: DriverStatus) -> ExitCode {
    println!("{}", status.to_json());
    ExitCode::from(status.exit_code())
}

/// The agent only reads stdout, so bad arguments are answered with a
/// `Failure` object like any other error.
fn parse_failure(e: &clap::Error) -> DriverStatus {
    let rendered = e.to_string();
    let first = rendered.lines().next().unwrap_or_default();
    DriverStatus::failure(first.trim_start_matches("error: "))
}

fn run(command: Command) -> anyhow::Result<DriverStatus> {
    match command {
        Command::Init => Ok(DriverStatus::init()),
        Command::Unsupported(args) => {
            debug!(?args, "unsupported driver call");
            Ok(DriverStatus::not_supported())
        }
        command => {
            let config = CONFIG
                .as_ref()
                .map_err(|e| e.clone())
                .context("failed to load configuration")?;
            run_on_host(&NvmeofPlugin::from_config(config), command)
        }
    }
}

fn run_on_host(plugin: &NvmeofPlugin, command: Command) -> anyhow::Result<DriverStatus> {
    match command {
        Command::GetVolumeName { options } => {
            let options = parse_options(&options)?;
            Ok(DriverStatus::volume_name(plugin.volume_name(&options)?))
        }
        Command::Mount { dir, options } => {
            let options = parse_options(&options)?;
            if !plugin.can_support(&options) {
                bail!("volume options do not describe an NVMe-oF volume");
            }
            let ctx = plugin.mount_context(&options, Some(&dir))?;
            plugin
                .set_up(&ctx)
                .with_context(|| format!("mount {} at {}", ctx.volume_name, dir.display()))?;
            info!(dir = %dir.display(), volume = %ctx.volume_name, "mount complete");
            Ok(DriverStatus::success())
        }
        Command::Unmount { dir } => {
            let ctx = plugin.unmount_context(&dir);
            plugin
                .tear_down(&ctx)
                .with_context(|| format!("unmount {}", dir.display()))?;
            info!(dir = %dir.display(), "unmount complete");
            Ok(DriverStatus::success())
        }
        Command::List => Ok(DriverStatus::devices(plugin.list_devices()?)),
        Command::Disconnect { device } => {
            plugin.disconnect(&device)?;
            Ok(DriverStatus::success())
        }
        Command::Init | Command::Unsupported(_) => Ok(DriverStatus::not_supported()),
    }
}

/// Decode the options object the agent passes as JSON.
///
/// Values are normally strings; scalars of other types are kept in their
/// JSON text form.
fn parse_options(raw: &str) -> anyhow::Result<HashMap<String, String>> {
    let value: HashMap<String, serde_json::Value> =
        serde_json::from_str(raw).context("volume options are not a JSON object")?;
    value
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(s) => Ok((key, s)),
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => {
                Ok((key, value.to_string()))
            }
            other => bail!("option {key:?} has unsupported value {other}"),
        })
        .collect()
}
