use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;

use tracing::{debug, warn};

use crate::app::adb::locator::resolve_adb_program;
use crate::app::config::{bundle_dir, AppConfig};
use crate::app::error::AppError;
use crate::app::models::CommandResult;

const TOOL_NOT_FOUND_MESSAGE: &str =
    "ADB not found. Bundle it under Tools/ next to the executable or set adb.command_path.";

/// The single capability the pipeline needs from the device bridge.
pub trait CommandRunner: Send + Sync {
    /// Runs `args` against `device_id` (or the host when `None`). Never panics
    /// or errors; failures come back as an unsuccessful [`CommandResult`].
    fn execute(&self, device_id: Option<&str>, args: &[String], trace_id: &str) -> CommandResult;
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

pub fn run_command(program: &Path, args: &[String], trace_id: &str) -> Result<CommandOutput, AppError> {
    // No timeout: a hung bridge only blocks the worker that issued it.
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|err| {
            if err.kind() == IoErrorKind::NotFound {
                AppError::tool_not_found(TOOL_NOT_FOUND_MESSAGE, trace_id)
            } else {
                AppError::system(format!("Failed to spawn command: {err}"), trace_id)
            }
        })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code(),
    })
}

#[derive(Debug, Clone)]
pub struct AdbRunner {
    program: Option<PathBuf>,
}

impl AdbRunner {
    pub fn new(program: Option<PathBuf>) -> Self {
        Self { program }
    }

    /// Resolves the bridge once; the result is reused for every command.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(resolve_adb_program(&config.adb.command_path, &bundle_dir()))
    }

    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }
}

pub fn device_args(device_id: Option<&str>, args: &[String]) -> Vec<String> {
    let mut full = Vec::with_capacity(args.len() + 2);
    if let Some(device_id) = device_id {
        full.push("-s".to_string());
        full.push(device_id.to_string());
    }
    full.extend(args.iter().cloned());
    full
}

impl CommandRunner for AdbRunner {
    fn execute(&self, device_id: Option<&str>, args: &[String], trace_id: &str) -> CommandResult {
        let Some(program) = self.program.as_deref() else {
            warn!(trace_id = %trace_id, "adb executable unavailable");
            return CommandResult::failed(
                device_id,
                AppError::tool_not_found(TOOL_NOT_FOUND_MESSAGE, trace_id),
            );
        };

        let full_args = device_args(device_id, args);
        let started = Instant::now();
        let output = match run_command(program, &full_args, trace_id) {
            Ok(output) => output,
            Err(err) => {
                warn!(trace_id = %trace_id, error = %err.error, code = %err.code, "adb spawn failed");
                return CommandResult::failed(device_id, err);
            }
        };
        debug!(
            trace_id = %trace_id,
            args = %full_args.join(" "),
            exit_code = ?output.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "adb command finished"
        );

        if output.exit_code != Some(0) {
            let stderr = output.stderr.trim();
            let message = if stderr.is_empty() {
                format!("adb {} exited with {:?}", args.join(" "), output.exit_code)
            } else {
                format!("adb {} failed: {stderr}", args.join(" "))
            };
            warn!(trace_id = %trace_id, error = %message, "adb command failed");
            return CommandResult::failed(device_id, AppError::command_failed(message, trace_id));
        }

        CommandResult::ok(device_id, output.stdout.trim_end())
    }
}
