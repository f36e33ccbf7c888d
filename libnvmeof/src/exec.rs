//! External utility invocation.
//!
//! Everything this crate runs (`nvme`, `blkid`, `mkfs.*`) goes through the
//! [`CommandRunner`] trait so that tests can script the host.

use std::process::Command;

use tracing::debug;

use crate::error::NvmeofError;

/// Captured result of one utility run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a program to completion and captures its output.
///
/// Implementations only report spawn failures as errors; a non-zero exit is
/// returned in [`CommandOutput::code`] so callers can decide whether it
/// matters (see [`CommandRunner::run_checked`]).
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NvmeofError>;

    /// Run and turn a non-zero exit into [`NvmeofError::UtilityInvocation`].
    fn run_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NvmeofError> {
        let output = self.run(program, args)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(NvmeofError::UtilityInvocation {
            command: command_line(program, args),
            reason: format!(
                "exit status {}: {}",
                output
                    .code
                    .map_or_else(|| "signal".to_owned(), |c| c.to_string()),
                output.stderr.trim()
            ),
        })
    }
}

/// Runs utilities on the host with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NvmeofError> {
        debug!(command = %command_line(program, args), "running utility");
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| NvmeofError::UtilityInvocation {
                command: command_line(program, args),
                reason: e.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub(crate) fn command_line(program: &str, args: &[&str]) -> String {
    let mut line = program.to_owned();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
