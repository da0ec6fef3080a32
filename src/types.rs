use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

/// Where the coding agent runs.
///
/// - `Local`: the agent CLI is spawned directly on the host, inside the
///   configured working directory.
/// - `Container`: the agent CLI runs inside a fresh container per task, with
///   the working directory mounted at `/workspace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Local,
    Container,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "container" => Ok(ProviderKind::Container),
            other => Err(format!(
                "invalid provider kind: {other} (expected \"local\" or \"container\")"
            )),
        }
    }
}

/// Which coding agent CLI executes a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Claude,
    Codex,
}

impl AgentKind {
    /// Program and arguments that run one non-interactive agent turn.
    pub fn command_line(self, prompt: &str) -> (&'static str, Vec<String>) {
        match self {
            AgentKind::Claude => (
                "claude",
                vec![
                    "--dangerously-skip-permissions".to_string(),
                    "--print".to_string(),
                    prompt.to_string(),
                ],
            ),
            AgentKind::Codex => (
                "codex",
                vec![
                    "exec".to_string(),
                    "--full-auto".to_string(),
                    prompt.to_string(),
                ],
            ),
        }
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" => Ok(AgentKind::Claude),
            "codex" => Ok(AgentKind::Codex),
            other => Err(format!(
                "invalid agent: {other} (expected \"claude\" or \"codex\")"
            )),
        }
    }
}

/// Supported container runtimes, in detection priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Detection order used by `RuntimePreference::Auto`.
    pub const PRIORITY: [ContainerRuntime; 2] = [ContainerRuntime::Docker, ContainerRuntime::Podman];

    pub fn program(self) -> &'static str {
        match self {
            ContainerRuntime::Docker => "docker",
            ContainerRuntime::Podman => "podman",
        }
    }
}

/// Container runtime selection from `[provider].runtime`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimePreference {
    /// Probe `ContainerRuntime::PRIORITY` and take the first that answers.
    #[default]
    Auto,
    Docker,
    Podman,
}

impl RuntimePreference {
    /// Runtimes to probe, in order.
    pub fn candidates(self) -> Vec<ContainerRuntime> {
        match self {
            RuntimePreference::Auto => ContainerRuntime::PRIORITY.to_vec(),
            RuntimePreference::Docker => vec![ContainerRuntime::Docker],
            RuntimePreference::Podman => vec![ContainerRuntime::Podman],
        }
    }
}

impl FromStr for RuntimePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(RuntimePreference::Auto),
            "docker" => Ok(RuntimePreference::Docker),
            "podman" => Ok(RuntimePreference::Podman),
            other => Err(format!(
                "invalid container runtime: {other} (expected \"auto\", \"docker\" or \"podman\")"
            )),
        }
    }
}

/// Parse a duration such as `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    // Find the boundary between digits and suffix.
    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
