// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{PlanFile, RawPlanFile, UnitConfig};
use crate::dag::DagGraph;
use crate::errors::{OrchestratorError, Result};

impl TryFrom<RawPlanFile> for PlanFile {
    type Error = OrchestratorError;

    fn try_from(raw: RawPlanFile) -> std::result::Result<Self, Self::Error> {
        validate_plan(&raw)?;
        Ok(PlanFile::new_unchecked(raw.config, raw.provider, raw.unit))
    }
}

/// Run every semantic check on a raw plan without consuming it.
pub fn validate_plan(plan: &RawPlanFile) -> Result<()> {
    ensure_has_units(plan)?;
    validate_global_config(plan)?;
    validate_provider(plan)?;
    validate_unit_graph(plan)?;
    for (id, unit) in plan.unit.iter() {
        validate_tasks(id, unit)?;
    }
    Ok(())
}

fn ensure_has_units(plan: &RawPlanFile) -> Result<()> {
    if plan.unit.is_empty() {
        return Err(OrchestratorError::Config(
            "plan must contain at least one [unit.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(plan: &RawPlanFile) -> Result<()> {
    if plan.config.max_parallel == 0 {
        return Err(OrchestratorError::Config(
            "[config].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }

    if plan.config.event_capacity == 0 {
        return Err(OrchestratorError::Config(
            "[config].event_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    plan.config.shutdown_timeout()?;
    Ok(())
}

fn validate_provider(plan: &RawPlanFile) -> Result<()> {
    use crate::types::ProviderKind;

    let missing_image = plan
        .provider
        .image
        .as_deref()
        .is_none_or(|i| i.trim().is_empty());

    if plan.provider.kind == ProviderKind::Container && missing_image {
        return Err(OrchestratorError::Config(
            "[provider].image is required when kind = \"container\"".to_string(),
        ));
    }
    Ok(())
}

/// Missing dependencies and cycles are reported exactly as the scheduler's
/// graph builder reports them.
fn validate_unit_graph(plan: &RawPlanFile) -> Result<()> {
    DagGraph::from_edges(
        plan.unit
            .iter()
            .map(|(id, unit)| (id.as_str(), unit.after.as_slice())),
    )?;
    Ok(())
}

fn validate_tasks(unit_id: &str, unit: &UnitConfig) -> Result<()> {
    let count = unit.task.len() as u32;

    // Edge direction: dependency -> task.
    let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();
    for number in 1..=count {
        graph.add_node(number);
    }

    for (idx, task) in unit.task.iter().enumerate() {
        let number = idx as u32 + 1;

        if task.description.trim().is_empty() {
            return Err(OrchestratorError::Config(format!(
                "unit '{unit_id}' task {number} has an empty description"
            )));
        }

        for &dep in task.depends_on.iter() {
            if dep == number {
                return Err(OrchestratorError::Config(format!(
                    "unit '{unit_id}' task {number} cannot depend on itself"
                )));
            }
            if dep == 0 || dep > count {
                return Err(OrchestratorError::Config(format!(
                    "unit '{unit_id}' task {number} depends on unknown task {dep} (unit has {count} tasks)"
                )));
            }
            graph.add_edge(dep, number, ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(OrchestratorError::Config(format!(
            "cycle detected among tasks of unit '{unit_id}' involving task {}",
            cycle.node_id()
        ))),
    }
}
