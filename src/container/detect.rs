// src/container/detect.rs

//! Container runtime detection.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::{OrchestratorError, Result};
use crate::types::ContainerRuntime;

/// How long a runtime gets to answer `--version`.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether `program --version` runs and exits successfully in time.
pub async fn probe_runtime(program: &str) -> bool {
    let mut cmd = Command::new(program);
    cmd.arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(PROBE_TIMEOUT, cmd.status()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            debug!(program, error = %e, "runtime probe could not spawn");
            false
        }
        Err(_) => {
            debug!(program, "runtime probe timed out");
            false
        }
    }
}

/// Return the first candidate whose program answers a version query.
///
/// Candidates are tried in order. Fails with `NoContainerRuntime` listing
/// every program tried when none respond.
pub async fn probe_candidates(
    candidates: &[(ContainerRuntime, String)],
) -> Result<(ContainerRuntime, String)> {
    for (runtime, program) in candidates {
        if probe_runtime(program).await {
            info!(?runtime, program = %program, "container runtime detected");
            return Ok((*runtime, program.clone()));
        }
    }

    Err(OrchestratorError::NoContainerRuntime {
        tried: candidates.iter().map(|(_, p)| p.clone()).collect(),
    })
}
