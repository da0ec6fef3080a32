#![allow(dead_code)]

use unitdag::config::{
    ConfigSection, PlanFile, ProviderSection, RawPlanFile, TaskConfig, UnitConfig,
};
use unitdag::dag::{Task, Unit};

/// Builder for `PlanFile` to simplify test setup.
pub struct PlanBuilder {
    plan: RawPlanFile,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            plan: RawPlanFile {
                config: ConfigSection::default(),
                provider: ProviderSection::default(),
                unit: Default::default(),
            },
        }
    }

    pub fn with_unit(mut self, id: &str, unit: UnitConfig) -> Self {
        self.plan.unit.insert(id.to_string(), unit);
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.plan.config.max_parallel = n;
        self
    }

    pub fn fail_fast(mut self, val: bool) -> Self {
        self.plan.config.fail_fast = val;
        self
    }

    pub fn shutdown_timeout(mut self, dur: &str) -> Self {
        self.plan.config.shutdown_timeout = dur.to_string();
        self
    }

    /// The raw plan, for exercising validation failures.
    pub fn build_raw(self) -> RawPlanFile {
        self.plan
    }

    pub fn build(self) -> PlanFile {
        PlanFile::try_from(self.plan).expect("Failed to build valid plan from builder")
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `UnitConfig`.
pub struct UnitBuilder {
    unit: UnitConfig,
}

impl UnitBuilder {
    pub fn new() -> Self {
        Self {
            unit: UnitConfig::default(),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.unit.after.push(dep.to_string());
        self
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.unit.task.push(task);
        self
    }

    /// Shorthand for a task with a description and nothing else.
    pub fn task(self, description: &str) -> Self {
        self.with_task(TaskBuilder::new(description).build())
    }

    pub fn build(self) -> UnitConfig {
        self.unit
    }
}

impl Default for UnitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskBuilder {
    task: TaskConfig,
}

impl TaskBuilder {
    pub fn new(description: &str) -> Self {
        Self {
            task: TaskConfig {
                description: description.to_string(),
                depends_on: Vec::new(),
                backpressure: String::new(),
            },
        }
    }

    pub fn depends_on(mut self, number: u32) -> Self {
        self.task.depends_on.push(number);
        self
    }

    pub fn backpressure(mut self, cmd: &str) -> Self {
        self.task.backpressure = cmd.to_string();
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Unit record with one trivial task, depending on `deps`.
pub fn unit(id: &str, deps: &[&str]) -> Unit {
    let mut unit = Unit::new(id).with_task(Task::new(1, format!("work on {id}")));
    for dep in deps {
        unit = unit.after(*dep);
    }
    unit
}
