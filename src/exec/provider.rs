// src/exec/provider.rs

//! Pluggable execution provider abstraction.
//!
//! A worker hands each task to an `ExecutionProvider` and treats it as an
//! opaque capability: task in, success/failure plus output back. The set of
//! production providers is closed and picked from configuration:
//!
//! - [`LocalAgentProvider`] spawns the agent CLI on the host.
//! - [`ContainerAgentProvider`] runs the agent CLI in a throwaway container
//!   through a [`ContainerManager`].
//!
//! Tests provide their own implementation that doesn't spawn anything.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ProviderSection;
use crate::container::{CliContainerManager, ContainerConfig, ContainerManager};
use crate::dag::UnitId;
use crate::errors::{OrchestratorError, Result};
use crate::exec::BoxFuture;
use crate::types::{AgentKind, ProviderKind};

/// How long to keep draining container logs after the container exited.
const LOG_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// One task handed to a provider.
#[derive(Debug, Clone)]
pub struct TaskRequest {
    pub unit: UnitId,
    pub task: u32,
    pub description: String,
    pub workdir: PathBuf,
}

impl TaskRequest {
    /// Prompt text passed to the agent.
    pub fn prompt(&self) -> String {
        format!(
            "You are working on unit '{}', task {}.\n\n{}",
            self.unit, self.task, self.description
        )
    }
}

/// What a provider reports back for one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOutput {
    pub success: bool,
    pub output: String,
}

impl ProviderOutput {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Capability that executes a single task's unit of work.
///
/// Implementations must honour `cancel` at their suspension points and
/// return promptly once it fires. Retrying transient failures, if any, is the
/// provider's business.
pub trait ExecutionProvider: Send + Sync {
    fn name(&self) -> &str;

    fn execute(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ProviderOutput>>;
}

/// Build the provider selected by `[provider]`.
///
/// `stop_timeout` is the grace period a cancelled container gets before it is
/// killed.
pub async fn provider_from_config(
    section: &ProviderSection,
    stop_timeout: Duration,
) -> Result<Arc<dyn ExecutionProvider>> {
    match section.kind {
        ProviderKind::Local => Ok(Arc::new(LocalAgentProvider::new(section.agent))),
        ProviderKind::Container => {
            let image = section.image.clone().ok_or_else(|| {
                OrchestratorError::Config(
                    "[provider].image is required when kind = \"container\"".to_string(),
                )
            })?;
            let manager = CliContainerManager::detect(section.runtime).await?;
            info!(runtime = ?manager.runtime(), image = %image, "using containerised agent provider");
            Ok(Arc::new(ContainerAgentProvider::new(
                Arc::new(manager),
                section.agent,
                image,
                stop_timeout,
            )))
        }
    }
}

/// Runs the agent CLI directly on the host.
#[derive(Debug, Clone)]
pub struct LocalAgentProvider {
    agent: AgentKind,
}

impl LocalAgentProvider {
    pub fn new(agent: AgentKind) -> Self {
        Self { agent }
    }
}

impl ExecutionProvider for LocalAgentProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn execute(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ProviderOutput>> {
        let agent = self.agent;
        Box::pin(async move { Ok(run_local_agent(agent, request, cancel).await?) })
    }
}

async fn run_local_agent(
    agent: AgentKind,
    request: TaskRequest,
    cancel: CancellationToken,
) -> anyhow::Result<ProviderOutput> {
    let (program, args) = agent.command_line(&request.prompt());

    info!(
        unit = %request.unit,
        task = request.task,
        agent = program,
        "starting agent process"
    );

    let child = Command::new(program)
        .args(&args)
        .current_dir(&request.workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| {
            format!(
                "spawning {program} for unit '{}' task {}",
                request.unit, request.task
            )
        })?;

    tokio::select! {
        output = child.wait_with_output() => {
            let output = output.with_context(|| {
                format!("waiting for {program} (unit '{}' task {})", request.unit, request.task)
            })?;

            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));

            info!(
                unit = %request.unit,
                task = request.task,
                exit_code = output.status.code(),
                success = output.status.success(),
                "agent process exited"
            );

            Ok(ProviderOutput {
                success: output.status.success(),
                output: text,
            })
        }

        _ = cancel.cancelled() => {
            info!(
                unit = %request.unit,
                task = request.task,
                "cancellation requested; killing agent process"
            );
            Ok(ProviderOutput::failure("cancelled"))
        }
    }
}

/// Runs the agent CLI in a fresh container per task.
///
/// The task's working directory is mounted at `/workspace`. The container is
/// always removed afterwards; on cancellation it is stopped first, with
/// `stop_timeout` as the grace period before a forced kill.
pub struct ContainerAgentProvider {
    manager: Arc<dyn ContainerManager>,
    agent: AgentKind,
    image: String,
    stop_timeout: Duration,
}

impl ContainerAgentProvider {
    pub fn new(
        manager: Arc<dyn ContainerManager>,
        agent: AgentKind,
        image: impl Into<String>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            manager,
            agent,
            image: image.into(),
            stop_timeout,
        }
    }

    fn container_config(&self, request: &TaskRequest) -> ContainerConfig {
        let (program, args) = self.agent.command_line(&request.prompt());
        let mut command = vec![program.to_string()];
        command.extend(args);

        ContainerConfig::new(&self.image)
            .command(command)
            .mount(request.workdir.clone(), "/workspace")
            .workdir("/workspace")
            .env("UNIT_ID", &request.unit)
            .env("TASK_NUMBER", request.task.to_string())
    }

    async fn run_in_container(
        &self,
        id: &str,
        request: &TaskRequest,
        cancel: CancellationToken,
    ) -> Result<ProviderOutput> {
        self.manager.start(id).await?;

        let mut logs = self.manager.logs(id).await?;
        let collector = tokio::spawn(async move {
            let mut lines = Vec::new();
            while let Some(line) = logs.recv().await {
                lines.push(line);
            }
            lines.join("\n")
        });

        tokio::select! {
            code = self.manager.wait(id) => {
                let code = code?;
                let output = match tokio::time::timeout(LOG_DRAIN_TIMEOUT, collector).await {
                    Ok(Ok(text)) => text,
                    _ => String::new(),
                };
                info!(
                    unit = %request.unit,
                    task = request.task,
                    container = %id,
                    exit_code = code,
                    "agent container exited"
                );
                Ok(ProviderOutput { success: code == 0, output })
            }

            _ = cancel.cancelled() => {
                info!(
                    unit = %request.unit,
                    task = request.task,
                    container = %id,
                    "cancellation requested; stopping agent container"
                );
                collector.abort();
                self.manager.stop(id, self.stop_timeout).await?;
                Ok(ProviderOutput::failure("cancelled"))
            }
        }
    }
}

impl ExecutionProvider for ContainerAgentProvider {
    fn name(&self) -> &str {
        "container"
    }

    fn execute(
        &self,
        request: TaskRequest,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<ProviderOutput>> {
        Box::pin(async move {
            let config = self.container_config(&request);
            let id = self.manager.create(&config).await?;
            debug!(unit = %request.unit, task = request.task, container = %id, "container created");

            let result = self.run_in_container(&id, &request, cancel).await;

            if result.is_err() {
                // The container may still be running; remove refuses that.
                if let Err(e) = self.manager.stop(&id, self.stop_timeout).await {
                    debug!(container = %id, error = %e, "stop after failed run");
                }
            }

            if let Err(e) = self.manager.remove(&id).await {
                warn!(container = %id, error = %e, "failed to remove agent container");
            }

            result
        })
    }
}
