// src/container/mod.rs

//! Container lifecycle management.
//!
//! Workers that run agents in containers go through the [`ContainerManager`]
//! trait. The production implementation, [`CliContainerManager`], shells out
//! to the `docker` or `podman` CLI picked by [`detect`].

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::errors::Result;
use crate::exec::BoxFuture;
use crate::types::ContainerRuntime;

pub mod cli;
pub mod detect;

pub use cli::CliContainerManager;
pub use detect::{probe_candidates, probe_runtime};

/// Bind mount from the host into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerConfig {
    pub image: String,
    pub name: Option<String>,
    /// Overrides the image's default command when non-empty.
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub workdir: Option<String>,
}

impl ContainerConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Self::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn mount(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.mounts.push(Mount {
            host: host.into(),
            container: container.into(),
        });
        self
    }

    pub fn workdir(mut self, dir: impl Into<String>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Arguments for `<runtime> create`, image and command last.
    pub fn to_create_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string()];

        if let Some(name) = &self.name {
            args.push("--name".to_string());
            args.push(name.clone());
        }
        for (key, value) in &self.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &self.mounts {
            args.push("--volume".to_string());
            args.push(format!("{}:{}", mount.host.display(), mount.container));
        }
        if let Some(dir) = &self.workdir {
            args.push("--workdir".to_string());
            args.push(dir.clone());
        }

        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// Container lifecycle operations.
///
/// Implementations must be safe to share between workers running
/// concurrently; every method takes `&self`.
pub trait ContainerManager: Send + Sync {
    fn runtime(&self) -> ContainerRuntime;

    /// Create (but do not start) a container; returns its id.
    fn create<'a>(&'a self, config: &'a ContainerConfig) -> BoxFuture<'a, Result<String>>;

    fn start<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Block until the container exits; returns its exit code.
    fn wait<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<i64>>;

    /// Follow the container's combined output line by line. The channel
    /// closes when the container's output ends.
    fn logs<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<mpsc::Receiver<String>>>;

    /// Ask the container to terminate, killing it if it is still running
    /// after `timeout`.
    fn stop<'a>(&'a self, id: &'a str, timeout: Duration) -> BoxFuture<'a, Result<()>>;

    /// Delete a stopped container. Fails with `ContainerRunning` if it is
    /// still running.
    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>>;
}
