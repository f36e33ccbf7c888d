//! NVMe-oF error types.
//!
//! All errors in the `libnvmeof` crate are represented by the [`NvmeofError`]
//! enum.  Every variant carries enough context (path, device, command) for the
//! node agent to report a useful message; nothing is retried internally except
//! the bounded re-listing done during device discovery.

use thiserror::Error;

/// Unified error type for attach / mount / detach operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NvmeofError {
    /// The supplied options do not describe an NVMe-oF volume, or a field
    /// could not be interpreted.
    #[error("invalid volume descriptor: {0}")]
    InvalidDescriptor(String),

    /// Open, write (including a short write), read or close on the fabrics
    /// control device failed.
    #[error("control channel {op} on {path} failed: {reason}")]
    ControlChannel {
        /// Control device path, normally `/dev/nvme-fabrics`.
        path: String,
        /// Which step failed.
        op: &'static str,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The before/after device diff did not produce exactly one device.
    #[error("unable to locate newly attached device: {reason} (candidates: {candidates:?})")]
    Discovery {
        /// What went wrong.
        reason: String,
        /// Device identifiers that appeared during the connect window.
        candidates: Vec<String>,
    },

    /// A request delegated to the mount service failed.
    #[error("mount service failed at {path}: {reason}")]
    MountService {
        /// Path the operation targeted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A device path did not decompose into `/dev/<name>`.
    #[error("unable to extract device from {0}")]
    PathParse(String),

    /// An external utility could not be spawned or exited non-zero.
    #[error("{command} failed: {reason}")]
    UtilityInvocation {
        /// The command line that was run.
        command: String,
        /// Exit status and stderr, or the spawn error.
        reason: String,
    },

    /// The filesystem mount is gone but the fabric session for `device`
    /// could not be closed.
    #[error("device {device} unmounted but fabric session still open: {reason}")]
    PartialTeardown {
        /// Device whose session is still connected.
        device: String,
        /// Why the disconnect failed.
        reason: String,
    },

    /// The host-wide attach lock could not be taken.
    #[error("attach lock {path}: {reason}")]
    HostLock {
        /// Lock file path.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A configuration file or `NVMEOF_*` variable held an unusable value.
    #[error("invalid configuration in {source_name}: {reason}")]
    Config {
        /// File path, or `$VAR` for an environment variable.
        source_name: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Local filesystem bookkeeping (directory creation / removal) failed.
    #[error("io error at {path}: {reason}")]
    Io {
        /// Path the operation targeted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },
}

impl NvmeofError {
    /// Create a [`NvmeofError::MountService`] from a path and anything that
    /// implements [`std::fmt::Display`].
    pub fn mount<P: AsRef<std::path::Path>, E: std::fmt::Display>(path: P, e: E) -> Self {
        Self::MountService {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Create a [`NvmeofError::Io`] from a path and anything that implements
    /// [`std::fmt::Display`].
    pub fn io<P: AsRef<std::path::Path>, E: std::fmt::Display>(path: P, e: E) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Create a [`NvmeofError::ControlChannel`] for the given step.
    pub fn control<P: AsRef<std::path::Path>, E: std::fmt::Display>(
        path: P,
        op: &'static str,
        e: E,
    ) -> Self {
        Self::ControlChannel {
            path: path.as_ref().display().to_string(),
            op,
            reason: e.to_string(),
        }
    }

    /// `true` for the error that leaves a connected fabric session behind
    /// an already removed mount.
    pub fn is_partial_teardown(&self) -> bool {
        matches!(self, Self::PartialTeardown { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = NvmeofError::PathParse("nvme3".into());
        assert_eq!(err.to_string(), "unable to extract device from nvme3");
    }

    #[test]
    fn control_channel_display_names_step() {
        let err = NvmeofError::control("/dev/nvme-fabrics", "write", "short write 10 of 64");
        assert_eq!(
            err.to_string(),
            "control channel write on /dev/nvme-fabrics failed: short write 10 of 64"
        );
    }

    #[test]
    fn partial_teardown_is_distinct() {
        let err = NvmeofError::PartialTeardown {
            device: "/dev/nvme2n1".into(),
            reason: "exit status 1".into(),
        };
        assert!(err.is_partial_teardown());
        assert!(!NvmeofError::PathParse("x".into()).is_partial_teardown());
    }
}
