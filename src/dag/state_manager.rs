// src/dag/state_manager.rs

//! State transitions over the scheduler's unit map.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::dag::DagGraph;
use crate::dag::unit::{Unit, UnitId, UnitStatus};

/// Applies lifecycle transitions to the unit map, using the graph for
/// neighbourhood lookups.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    units: &'a mut BTreeMap<UnitId, Unit>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DagGraph, units: &'a mut BTreeMap<UnitId, Unit>) -> Self {
        Self { graph, units }
    }

    /// Move every pending level-0 unit to `Ready`.
    pub fn seed_roots(&mut self) -> Vec<UnitId> {
        let roots: Vec<UnitId> = self.graph.levels().first().cloned().unwrap_or_default();

        let mut seeded = Vec::new();
        for id in roots {
            if let Some(unit) = self.units.get_mut(&id) {
                if unit.status == UnitStatus::Pending {
                    unit.status = UnitStatus::Ready;
                    debug!(unit = %id, "root unit marked Ready");
                    seeded.push(id);
                }
            }
        }
        seeded
    }

    pub fn deps_satisfied(&self, unit: &Unit) -> bool {
        ReadOnlyStateManager::new(self.units).deps_satisfied_for(unit)
    }

    /// After `completed` succeeded, promote each pending dependent whose
    /// dependencies are now all `Complete`.
    ///
    /// Returned ids are sorted (the graph keeps dependents sorted).
    pub fn promote_dependents(&mut self, completed: &str) -> Vec<UnitId> {
        let candidates: Vec<UnitId> = self
            .graph
            .dependents_of(completed)
            .iter()
            .filter(|id| {
                self.units
                    .get(id.as_str())
                    .map(|u| u.status == UnitStatus::Pending && self.deps_satisfied(u))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();

        for id in &candidates {
            if let Some(unit) = self.units.get_mut(id) {
                unit.status = UnitStatus::Ready;
                debug!(unit = %id, after = %completed, "dependencies complete; marked Ready");
            }
        }

        candidates
    }

    /// Mark every transitive dependent of `failed` that has not started yet
    /// as `Skipped`.
    ///
    /// Returns the newly skipped units ordered by level, then id. The failed
    /// unit itself is not included.
    pub fn mark_dependents_skipped(&mut self, failed: &str) -> Vec<UnitId> {
        let mut stack: Vec<UnitId> = self.graph.dependents_of(failed).to_vec();
        let mut visited: HashSet<UnitId> = HashSet::new();
        let mut newly_skipped = Vec::new();

        while let Some(id) = stack.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }

            match self.units.get_mut(&id) {
                Some(unit) => match unit.status {
                    UnitStatus::Pending | UnitStatus::Ready => {
                        unit.status = UnitStatus::Skipped;
                        debug!(unit = %id, cause = %failed, "upstream unit did not complete; marked Skipped");
                        newly_skipped.push(id.clone());
                    }
                    UnitStatus::Running => {
                        // A dependent cannot start before its dependencies
                        // complete, so this indicates a caller bug.
                        warn!(unit = %id, cause = %failed, "dependent of a failed unit is already running");
                    }
                    UnitStatus::Complete | UnitStatus::Failed | UnitStatus::Skipped => {}
                },
                None => {
                    warn!(unit = %id, "node in DAG not present in unit map");
                }
            }

            // Keep walking even through already-terminal units so the whole
            // downstream subtree is covered.
            stack.extend(self.graph.dependents_of(&id).iter().cloned());
        }

        self.sort_by_level(&mut newly_skipped);
        newly_skipped
    }

    /// Skip every unit that has not been dispatched yet (used on shutdown).
    pub fn skip_unstarted(&mut self) -> Vec<UnitId> {
        let mut skipped = Vec::new();
        for (id, unit) in self.units.iter_mut() {
            if matches!(unit.status, UnitStatus::Pending | UnitStatus::Ready) {
                unit.status = UnitStatus::Skipped;
                skipped.push(id.clone());
            }
        }
        self.sort_by_level(&mut skipped);
        skipped
    }

    fn sort_by_level(&self, ids: &mut [UnitId]) {
        ids.sort_by(|a, b| {
            let la = self.graph.level_of(a).unwrap_or(usize::MAX);
            let lb = self.graph.level_of(b).unwrap_or(usize::MAX);
            la.cmp(&lb).then_with(|| a.cmp(b))
        });
    }
}

/// A read-only view for dependency checks when only shared access is available.
pub struct ReadOnlyStateManager<'a> {
    units: &'a BTreeMap<UnitId, Unit>,
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(units: &'a BTreeMap<UnitId, Unit>) -> Self {
        Self { units }
    }

    /// A unit may run only once every dependency is `Complete`; a running
    /// dependency is not enough.
    pub fn deps_satisfied_for(&self, unit: &Unit) -> bool {
        unit.deps.iter().all(|dep| match self.units.get(dep) {
            Some(d) => d.status == UnitStatus::Complete,
            None => {
                warn!(unit = %unit.id, dep = %dep, "dependency missing from unit map");
                false
            }
        })
    }
}
