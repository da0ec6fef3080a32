// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::{Task, Unit};
use crate::errors::{OrchestratorError, Result};
use crate::types::{AgentKind, ProviderKind, RuntimePreference, parse_duration};

/// Plan file exactly as read from TOML, before validation.
///
/// ```toml
/// [config]
/// max_parallel = 4
///
/// [provider]
/// kind = "local"
/// agent = "claude"
///
/// [unit.api]
/// after = ["db"]
///
/// [[unit.api.task]]
/// description = "Add the /health endpoint"
/// backpressure = "cargo test -p api"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPlanFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub provider: ProviderSection,

    /// All units from `[unit.<id>]`, keyed by unit id.
    #[serde(default)]
    pub unit: BTreeMap<String, UnitConfig>,
}

/// A plan file that passed validation. Obtain one through
/// `PlanFile::try_from(raw)` or `config::load_and_validate`.
#[derive(Debug, Clone)]
pub struct PlanFile {
    pub config: ConfigSection,
    pub provider: ProviderSection,
    pub unit: BTreeMap<String, UnitConfig>,
}

impl PlanFile {
    /// Wrap already-validated sections. Skips every check.
    pub fn new_unchecked(
        config: ConfigSection,
        provider: ProviderSection,
        unit: BTreeMap<String, UnitConfig>,
    ) -> Self {
        Self {
            config,
            provider,
            unit,
        }
    }

    /// Build the unit records handed to the scheduler.
    ///
    /// Tasks are numbered `1..=n` in file order.
    pub fn units(&self) -> Vec<Unit> {
        self.unit
            .iter()
            .map(|(id, cfg)| {
                let tasks = cfg
                    .task
                    .iter()
                    .enumerate()
                    .map(|(idx, t)| {
                        Task::new(idx as u32 + 1, &t.description)
                            .depends_on(t.depends_on.clone())
                            .backpressure(&t.backpressure)
                    })
                    .collect();

                let mut unit = Unit::new(id);
                unit.deps = cfg.after.clone();
                unit.tasks = tasks;
                unit
            })
            .collect()
    }

    pub fn shutdown_timeout(&self) -> Result<Duration> {
        self.config.shutdown_timeout()
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Upper bound on units executing at once.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Grace period for running units on shutdown, e.g. `"30s"`.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,

    /// Buffer size of the event broadcast channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Stop a unit at its first failing task.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,

    /// Working directory handed to providers and backpressure commands.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
}

fn default_max_parallel() -> usize {
    4
}

fn default_shutdown_timeout() -> String {
    "30s".to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_fail_fast() -> bool {
    true
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            shutdown_timeout: default_shutdown_timeout(),
            event_capacity: default_event_capacity(),
            fail_fast: default_fail_fast(),
            workdir: default_workdir(),
        }
    }
}

impl ConfigSection {
    pub fn shutdown_timeout(&self) -> Result<Duration> {
        parse_duration(&self.shutdown_timeout).map_err(|e| {
            OrchestratorError::Config(format!("[config].shutdown_timeout: {e}"))
        })
    }
}

/// `[provider]` section: which agent runs tasks, and where.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderSection {
    #[serde(default)]
    pub kind: ProviderKind,

    #[serde(default)]
    pub agent: AgentKind,

    /// Image for `kind = "container"`.
    #[serde(default)]
    pub image: Option<String>,

    #[serde(default)]
    pub runtime: RuntimePreference,
}

/// `[unit.<id>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitConfig {
    /// Units that must complete before this one starts.
    #[serde(default)]
    pub after: Vec<String>,

    /// `[[unit.<id>.task]]` entries, in execution-number order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,
}

/// `[[unit.<id>.task]]` entry.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub description: String,

    /// Task numbers (1-indexed, same unit) that must complete first.
    #[serde(default)]
    pub depends_on: Vec<u32>,

    /// Shell command that must exit 0 for the task to count as done.
    /// Empty means no check.
    #[serde(default)]
    pub backpressure: String,
}
