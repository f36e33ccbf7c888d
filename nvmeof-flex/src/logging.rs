//! Tracing setup.
//!
//! stdout carries the driver protocol, so every log line goes to stderr and,
//! when `NVMEOF_JOURNALD=1`, to the systemd journal.

use anyhow::Context;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter directives, e.g. `libnvmeof=debug`. Falls back to `RUST_LOG`.
pub const LOG_ENV: &str = "NVMEOF_LOG";
pub const JOURNALD_ENV: &str = "NVMEOF_JOURNALD";

const DEFAULT_FILTER: &str = "info";

pub fn init(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let journald = if std::env::var(JOURNALD_ENV).is_ok_and(|v| v == "1") {
        Some(tracing_journald::layer().context("failed to connect to journald")?)
    } else {
        None
    };

    let (text, json) = if json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(std::io::stderr)), None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .with(journald)
        .try_init()
        .context("failed to install tracing subscriber")
}
