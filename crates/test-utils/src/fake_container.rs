use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use unitdag::container::{ContainerConfig, ContainerManager};
use unitdag::errors::{OrchestratorError, Result};
use unitdag::exec::BoxFuture;
use unitdag::types::ContainerRuntime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeState {
    Created,
    Running,
    Exited,
}

/// In-memory container manager.
///
/// Containers "run" for `run_for`, print `log_lines`, then exit with
/// `exit_code`. Every call is appended to `ops()` as `"<op> <id>"`.
pub struct FakeContainerManager {
    exit_code: i64,
    run_for: Duration,
    log_lines: Vec<String>,
    next_id: Mutex<u32>,
    states: Mutex<HashMap<String, FakeState>>,
    configs: Mutex<Vec<ContainerConfig>>,
    ops: Mutex<Vec<String>>,
}

impl FakeContainerManager {
    pub fn new() -> Self {
        Self {
            exit_code: 0,
            run_for: Duration::from_millis(10),
            log_lines: vec!["agent done".to_string()],
            next_id: Mutex::new(0),
            states: Mutex::new(HashMap::new()),
            configs: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn exit_code(mut self, code: i64) -> Self {
        self.exit_code = code;
        self
    }

    pub fn run_for(mut self, d: Duration) -> Self {
        self.run_for = d;
        self
    }

    pub fn log_lines(mut self, lines: &[&str]) -> Self {
        self.log_lines = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    /// Operation names only, e.g. `["create", "start", ...]`.
    pub fn op_names(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .map(|op| op.split_whitespace().next().unwrap_or_default().to_string())
            .collect()
    }

    pub fn configs(&self) -> Vec<ContainerConfig> {
        self.configs.lock().unwrap().clone()
    }

    /// Containers that were created and not removed.
    pub fn live_containers(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    fn record(&self, op: &str, id: &str) {
        self.ops.lock().unwrap().push(format!("{op} {id}"));
    }

    fn set_state(&self, id: &str, state: FakeState) -> Result<()> {
        let mut states = self.states.lock().unwrap();
        match states.get_mut(id) {
            Some(s) => {
                *s = state;
                Ok(())
            }
            None => Err(OrchestratorError::Container(format!("no such container: {id}"))),
        }
    }

    fn state(&self, id: &str) -> Option<FakeState> {
        self.states.lock().unwrap().get(id).copied()
    }
}

impl Default for FakeContainerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContainerManager for FakeContainerManager {
    fn runtime(&self) -> ContainerRuntime {
        ContainerRuntime::Docker
    }

    fn create<'a>(&'a self, config: &'a ContainerConfig) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let id = {
                let mut next = self.next_id.lock().unwrap();
                *next += 1;
                format!("fake-{}", *next)
            };
            self.states
                .lock()
                .unwrap()
                .insert(id.clone(), FakeState::Created);
            self.configs.lock().unwrap().push(config.clone());
            self.record("create", &id);
            Ok(id)
        })
    }

    fn start<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record("start", id);
            self.set_state(id, FakeState::Running)
        })
    }

    fn wait<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<i64>> {
        Box::pin(async move {
            self.record("wait", id);
            tokio::time::sleep(self.run_for).await;
            self.set_state(id, FakeState::Exited)?;
            Ok(self.exit_code)
        })
    }

    fn logs<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<mpsc::Receiver<String>>> {
        Box::pin(async move {
            self.record("logs", id);
            let (tx, rx) = mpsc::channel(self.log_lines.len().max(1));
            for line in &self.log_lines {
                let _ = tx.send(line.clone()).await;
            }
            Ok(rx)
        })
    }

    fn stop<'a>(&'a self, id: &'a str, _timeout: Duration) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record("stop", id);
            self.set_state(id, FakeState::Exited)
        })
    }

    fn remove<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record("remove", id);
            if self.state(id) == Some(FakeState::Running) {
                return Err(OrchestratorError::ContainerRunning(id.to_string()));
            }
            self.states.lock().unwrap().remove(id);
            Ok(())
        })
    }
}
