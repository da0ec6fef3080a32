// src/container/cli.rs

//! `ContainerManager` backed by the docker / podman command line.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::container::detect::probe_candidates;
use crate::container::{ContainerConfig, ContainerManager};
use crate::errors::{OrchestratorError, Result};
use crate::exec::BoxFuture;
use crate::types::{ContainerRuntime, RuntimePreference};

/// Extra time given to `<runtime> stop` itself before we fall back to `kill`.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Buffered log lines per container before the reader waits for the consumer.
const LOG_BUFFER: usize = 256;

/// Drives one container runtime through its CLI.
///
/// Stateless apart from the program path, so a single instance can be
/// shared by every worker.
#[derive(Debug, Clone)]
pub struct CliContainerManager {
    runtime: ContainerRuntime,
    program: String,
}

impl CliContainerManager {
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self::with_program(runtime, runtime.program())
    }

    /// Use an explicit executable (e.g. an absolute path) for `runtime`.
    pub fn with_program(runtime: ContainerRuntime, program: impl Into<String>) -> Self {
        Self {
            runtime,
            program: program.into(),
        }
    }

    /// Probe the runtimes allowed by `preference` and use the first that
    /// answers a version query.
    pub async fn detect(preference: RuntimePreference) -> Result<Self> {
        let candidates: Vec<(ContainerRuntime, String)> = preference
            .candidates()
            .into_iter()
            .map(|rt| (rt, rt.program().to_string()))
            .collect();

        let (runtime, program) = probe_candidates(&candidates).await?;
        Ok(Self::with_program(runtime, program))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run `<program> args...` to completion and return trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String> {
        debug!(program = %self.program, ?args, "container cli call");

        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                OrchestratorError::Container(format!("failed to run {}: {e}", self.program))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Container(format!(
                "`{} {}` exited with {}: {}",
                self.program,
                args.first().copied().unwrap_or_default(),
                output.status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn is_running(&self, id: &str) -> Result<bool> {
        let state = self
            .run(&["inspect", "--format", "{{.State.Running}}", id])
            .await?;
        Ok(state == "true")
    }

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()> {
        let secs = timeout.as_secs().to_string();
        info!(container = %id, timeout = ?timeout, "stopping container");

        let args = ["stop", "-t", secs.as_str(), id];

        match tokio::time::timeout(timeout + STOP_GRACE, self.run(&args)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                warn!(container = %id, error = %e, "stop failed; killing container");
                self.kill(id).await
            }
            Err(_) => {
                warn!(container = %id, "stop did not return in time; killing container");
                self.kill(id).await
            }
        }
    }

    async fn kill(&self, id: &str) -> Result<()> {
        let Err(err) = self.run(&["kill", id]).await else {
            return Ok(());
        };

        // Already exited between the stop attempt and now.
        if !self.is_running(id).await.unwrap_or(true) {
            debug!(container = %id, error = %err, "kill failed on an exited container");
            return Ok(());
        }
        Err(err)
    }

    fn follow_logs(&self, id: &str) -> Result<mpsc::Receiver<String>> {
        let mut child = Command::new(&self.program)
            .args(["logs", "--follow", id])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                OrchestratorError::Container(format!("failed to run {} logs: {e}", self.program))
            })?;

        let (tx, rx) = mpsc::channel(LOG_BUFFER);

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let id = id.to_string();

        tokio::spawn(async move {
            let out = stdout.map(|s| tokio::spawn(forward_lines(s, tx.clone())));
            let err = stderr.map(|s| tokio::spawn(forward_lines(s, tx.clone())));
            drop(tx);

            for handle in [out, err].into_iter().flatten() {
                let _ = handle.await;
            }
            if let Err(e) = child.wait().await {
                debug!(container = %id, error = %e, "log follower exited abnormally");
            }
        });

        Ok(rx)
    }
}

async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

impl ContainerManager for CliContainerManager {
    fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    fn create<'a>(&'a self, config: &'a ContainerConfig) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let args = config.to_create_args();
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let id = self.run(&args).await?;
            if id.is_empty() {
                return Err(OrchestratorError::Container(format!(
                    "{} create returned no container id",
                    self.program
                )));
            }
            debug!(container = %id, image = %config.image, "container created");
            Ok(id)
        })
    }

    fn start<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.run(&["start", id]).await?;
            Ok(())
        })
    }

    fn wait<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<i64>> {
        Box::pin(async move {
            let out = self.run(&["wait", id]).await?;
            // Podman may print one line per container; take the last.
            let code = out.lines().last().unwrap_or_default().trim();
            code.parse::<i64>().map_err(|e| {
                OrchestratorError::Container(format!(
                    "unexpected exit code from {} wait: {code:?} ({e})",
                    self.program
                ))
            })
        })
    }

    fn logs<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<mpsc::Receiver<String>>> {
        Box::pin(async move { self.follow_logs(id) })
    }

    fn stop<'a>(&'a self, id: &'a str, timeout: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.stop_container(id, timeout))
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.is_running(id).await? {
                return Err(OrchestratorError::ContainerRunning(id.to_string()));
            }
            self.run(&["rm", id]).await?;
            debug!(container = %id, "container removed");
            Ok(())
        })
    }
}
