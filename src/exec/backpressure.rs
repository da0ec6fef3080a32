// src/exec/backpressure.rs

//! Backpressure: the validation command a task must pass to count as done.

use std::path::Path;
use std::process::Stdio;

use anyhow::Context;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::Result;
use crate::exec::BoxFuture;

/// Result of running one validation command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackpressureResult {
    pub success: bool,
    /// `None` when the process was killed (cancelled or by a signal).
    pub exit_code: Option<i32>,
    /// Combined stdout + stderr.
    pub output: String,
}

/// Runs a task's validation command.
///
/// Production code uses [`ShellBackpressure`]; tests can swap in anything
/// that does not spawn processes.
pub trait BackpressureRunner: Send + Sync {
    fn check<'a>(
        &'a self,
        command: &'a str,
        workdir: &'a Path,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<BackpressureResult>>;
}

/// Runs the validation command through the platform shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellBackpressure;

impl ShellBackpressure {
    pub fn new() -> Self {
        Self
    }
}

impl BackpressureRunner for ShellBackpressure {
    fn check<'a>(
        &'a self,
        command: &'a str,
        workdir: &'a Path,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<BackpressureResult>> {
        Box::pin(async move { Ok(run_shell(command, workdir, cancel).await?) })
    }
}

/// Build a shell command appropriate for the platform.
fn shell_command(command: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    }
}

async fn run_shell(
    command: &str,
    workdir: &Path,
    cancel: CancellationToken,
) -> anyhow::Result<BackpressureResult> {
    debug!(cmd = %command, workdir = %workdir.display(), "running backpressure command");

    let mut cmd = shell_command(command);
    cmd.current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .with_context(|| format!("spawning backpressure command `{command}`"))?;

    // Dropping the `wait_with_output` future on cancellation drops the child,
    // which kills it (`kill_on_drop`).
    tokio::select! {
        output = child.wait_with_output() => {
            let output = output
                .with_context(|| format!("waiting for backpressure command `{command}`"))?;

            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));

            debug!(
                cmd = %command,
                exit_code = output.status.code(),
                success = output.status.success(),
                "backpressure command exited"
            );

            Ok(BackpressureResult {
                success: output.status.success(),
                exit_code: output.status.code(),
                output: text,
            })
        }

        _ = cancel.cancelled() => {
            info!(cmd = %command, "cancellation requested; killing backpressure command");
            Ok(BackpressureResult {
                success: false,
                exit_code: None,
                output: "cancelled".to_string(),
            })
        }
    }
}
