mod common;
use crate::common::{init_tracing, with_timeout};

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use unitdag::container::{
    CliContainerManager, ContainerConfig, ContainerManager, probe_candidates,
};
use unitdag::errors::OrchestratorError;
use unitdag::exec::{ContainerAgentProvider, ExecutionProvider, TaskRequest};
use unitdag::types::{AgentKind, ContainerRuntime, RuntimePreference};
use unitdag_test_utils::fake_container::FakeContainerManager;

type TestResult = Result<(), Box<dyn Error>>;

fn request() -> TaskRequest {
    TaskRequest {
        unit: "api".to_string(),
        task: 2,
        description: "Add the endpoint".to_string(),
        workdir: PathBuf::from("/tmp/work"),
    }
}

#[test]
fn create_args_put_image_and_command_last() {
    let config = ContainerConfig::new("agent:latest")
        .name("unit-a-1")
        .env("UNIT_ID", "a")
        .mount("/tmp/work", "/workspace")
        .workdir("/workspace")
        .command(vec!["claude".to_string(), "--print".to_string()]);

    assert_eq!(
        config.to_create_args(),
        vec![
            "create",
            "--name",
            "unit-a-1",
            "--env",
            "UNIT_ID=a",
            "--volume",
            "/tmp/work:/workspace",
            "--workdir",
            "/workspace",
            "agent:latest",
            "claude",
            "--print",
        ]
    );
    assert_eq!(ContainerConfig::new("busybox").to_create_args(), vec!["create", "busybox"]);
}

#[test]
fn runtime_preference_candidates() {
    assert_eq!(
        RuntimePreference::Auto.candidates(),
        vec![ContainerRuntime::Docker, ContainerRuntime::Podman]
    );
    assert_eq!(
        RuntimePreference::Podman.candidates(),
        vec![ContainerRuntime::Podman]
    );
}

#[tokio::test]
async fn probe_fails_when_nothing_answers() {
    init_tracing();

    let candidates = vec![
        (ContainerRuntime::Docker, "unitdag-no-such-docker".to_string()),
        (ContainerRuntime::Podman, "unitdag-no-such-podman".to_string()),
    ];

    match with_timeout(probe_candidates(&candidates)).await {
        Err(OrchestratorError::NoContainerRuntime { tried }) => {
            assert_eq!(tried, vec!["unitdag-no-such-docker", "unitdag-no-such-podman"]);
        }
        other => panic!("expected NoContainerRuntime, got {other:?}"),
    }
}

#[cfg(unix)]
#[tokio::test]
async fn probe_picks_first_responding_candidate() -> TestResult {
    init_tracing();

    // `true` ignores its arguments and exits 0.
    let candidates = vec![
        (ContainerRuntime::Docker, "unitdag-no-such-docker".to_string()),
        (ContainerRuntime::Podman, "true".to_string()),
    ];

    let (runtime, program) = with_timeout(probe_candidates(&candidates)).await?;
    assert_eq!(runtime, ContainerRuntime::Podman);
    assert_eq!(program, "true");
    Ok(())
}

#[tokio::test]
async fn container_provider_runs_full_lifecycle() -> TestResult {
    init_tracing();

    let manager = Arc::new(FakeContainerManager::new().log_lines(&["step 1", "done"]));
    let provider = ContainerAgentProvider::new(
        manager.clone(),
        AgentKind::Claude,
        "agent:latest",
        Duration::from_secs(1),
    );

    let out = with_timeout(provider.execute(request(), CancellationToken::new())).await?;

    assert!(out.success);
    assert!(out.output.contains("done"));
    assert_eq!(manager.op_names(), vec!["create", "start", "logs", "wait", "remove"]);
    assert_eq!(manager.live_containers(), 0);

    let config = &manager.configs()[0];
    assert_eq!(config.image, "agent:latest");
    assert_eq!(config.workdir.as_deref(), Some("/workspace"));
    assert_eq!(config.command.first().map(String::as_str), Some("claude"));
    assert!(config.env.contains(&("UNIT_ID".to_string(), "api".to_string())));
    assert!(config.env.contains(&("TASK_NUMBER".to_string(), "2".to_string())));
    Ok(())
}

#[tokio::test]
async fn nonzero_exit_is_a_failed_task() -> TestResult {
    init_tracing();

    let manager = Arc::new(FakeContainerManager::new().exit_code(2));
    let provider = ContainerAgentProvider::new(
        manager.clone(),
        AgentKind::Codex,
        "agent:latest",
        Duration::from_secs(1),
    );

    let out = with_timeout(provider.execute(request(), CancellationToken::new())).await?;
    assert!(!out.success);
    assert_eq!(manager.live_containers(), 0);
    Ok(())
}

#[tokio::test]
async fn cancellation_stops_before_remove() -> TestResult {
    init_tracing();

    let manager = Arc::new(FakeContainerManager::new().run_for(Duration::from_secs(30)));
    let provider = ContainerAgentProvider::new(
        manager.clone(),
        AgentKind::Claude,
        "agent:latest",
        Duration::from_secs(1),
    );

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            token.cancel();
        })
    };

    let out = with_timeout(provider.execute(request(), token)).await?;
    canceller.await?;

    assert!(!out.success);
    assert_eq!(
        manager.op_names(),
        vec!["create", "start", "logs", "wait", "stop", "remove"]
    );
    assert_eq!(manager.live_containers(), 0);
    Ok(())
}

/// Stand-in runtime CLI that appends its arguments to `calls.log`.
/// `stop` exits non-zero when `fail_stop` is set.
#[cfg(unix)]
fn recording_runtime(dir: &std::path::Path, fail_stop: bool) -> std::io::Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let log = dir.join("calls.log");
    let stop_exit = if fail_stop { 1 } else { 0 };
    let script = format!(
        "#!/bin/sh\necho \"$@\" >> '{}'\nif [ \"$1\" = stop ]; then exit {stop_exit}; fi\nexit 0\n",
        log.display()
    );
    let path = dir.join("fake-runtime");
    std::fs::write(&path, script)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

#[cfg(unix)]
#[tokio::test]
async fn cli_stop_passes_grace_period_to_the_runtime() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let program = recording_runtime(dir.path(), false)?;
    let manager =
        CliContainerManager::with_program(ContainerRuntime::Docker, program.display().to_string());

    with_timeout(manager.stop("c1", Duration::from_secs(3))).await?;

    let calls = std::fs::read_to_string(dir.path().join("calls.log"))?;
    assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["stop -t 3 c1"]);
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn cli_stop_falls_back_to_kill() -> TestResult {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let program = recording_runtime(dir.path(), true)?;
    let manager =
        CliContainerManager::with_program(ContainerRuntime::Docker, program.display().to_string());

    with_timeout(manager.stop("c1", Duration::from_secs(1))).await?;

    let calls = std::fs::read_to_string(dir.path().join("calls.log"))?;
    assert_eq!(calls.lines().collect::<Vec<_>>(), vec!["stop -t 1 c1", "kill c1"]);
    Ok(())
}
