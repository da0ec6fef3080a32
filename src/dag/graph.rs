// src/dag/graph.rs

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use tracing::debug;

use crate::dag::unit::{Unit, UnitId};
use crate::errors::{OrchestratorError, Result};

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone, Default)]
struct DagNode {
    /// Direct dependencies: units that must complete before this one can run.
    deps: Vec<UnitId>,
    /// Direct dependents: units that depend on this one.
    dependents: Vec<UnitId>,
}

/// DFS colouring used while searching for a concrete cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Immutable dependency DAG keyed by unit id.
///
/// Built once from the full unit list; the topological order and the level
/// partition are computed during construction and cached. After `build`
/// returns, the graph is never mutated, so it can be shared freely behind an
/// `Arc` and read from any number of tasks.
#[derive(Debug, Clone)]
pub struct DagGraph {
    nodes: BTreeMap<UnitId, DagNode>,
    order: Vec<UnitId>,
    levels: Vec<Vec<UnitId>>,
    level_index: HashMap<UnitId, usize>,
}

impl DagGraph {
    /// Build and validate the graph for the given units.
    ///
    /// Fails with:
    /// - `DuplicateUnit` if two units share an id,
    /// - `MissingDependency` for the first dependency that names no unit,
    /// - `Cycle` with one concrete closed path if the graph is not acyclic.
    ///
    /// Construction is all-or-nothing: no partially built graph escapes.
    pub fn build(units: &[Unit]) -> Result<Self> {
        Self::from_edges(
            units
                .iter()
                .map(|u| (u.id.as_str(), u.deps.as_slice())),
        )
    }

    /// Same as [`DagGraph::build`], from `(id, deps)` pairs.
    pub fn from_edges<'a, I>(edges: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a [UnitId])>,
    {
        let mut nodes: BTreeMap<UnitId, DagNode> = BTreeMap::new();
        let mut declared: Vec<(UnitId, Vec<UnitId>)> = Vec::new();

        // First pass: register every node.
        for (id, deps) in edges {
            if nodes.insert(id.to_string(), DagNode::default()).is_some() {
                return Err(OrchestratorError::DuplicateUnit(id.to_string()));
            }
            declared.push((id.to_string(), deps.to_vec()));
        }

        // Second pass: forward edges, rejecting unknown ids. Repeated entries
        // collapse into a single edge.
        for (id, deps) in declared {
            let mut unique: Vec<UnitId> = Vec::with_capacity(deps.len());
            for dep in deps {
                if !nodes.contains_key(&dep) {
                    return Err(OrchestratorError::MissingDependency {
                        unit: id,
                        dependency: dep,
                    });
                }
                if !unique.contains(&dep) {
                    unique.push(dep);
                }
            }
            if let Some(node) = nodes.get_mut(&id) {
                node.deps = unique;
            }
        }

        // Third pass: reverse edges. Iterating the BTreeMap keeps every
        // dependents list sorted.
        let forward: Vec<(UnitId, Vec<UnitId>)> = nodes
            .iter()
            .map(|(id, n)| (id.clone(), n.deps.clone()))
            .collect();
        for (id, deps) in forward {
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(id.clone());
                }
            }
        }

        let order = kahn_order(&nodes);
        if order.len() < nodes.len() {
            let cycle = find_cycle(&nodes, &order);
            debug!(?cycle, "dependency cycle detected");
            return Err(OrchestratorError::Cycle { cycle });
        }

        let (levels, level_index) = compute_levels(&nodes, &order);

        Ok(Self {
            nodes,
            order,
            levels,
            level_index,
        })
    }

    /// All unit ids, in ascending order.
    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Immediate dependencies of a unit. Unknown ids yield an empty slice.
    pub fn dependencies_of(&self, id: &str) -> &[UnitId] {
        self.nodes
            .get(id)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a unit (sorted). Unknown ids yield an empty slice.
    pub fn dependents_of(&self, id: &str) -> &[UnitId] {
        self.nodes
            .get(id)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// Deterministic topological order (Kahn, ties broken lexicographically).
    pub fn topological_order(&self) -> &[UnitId] {
        &self.order
    }

    /// Units grouped by dependency depth.
    ///
    /// Level 0 holds every unit without dependencies; level `k` holds the
    /// units whose deepest dependency sits in level `k - 1`. Each level is
    /// sorted.
    pub fn levels(&self) -> &[Vec<UnitId>] {
        &self.levels
    }

    pub fn level_of(&self, id: &str) -> Option<usize> {
        self.level_index.get(id).copied()
    }
}

/// Kahn's algorithm over the dependency edges.
///
/// Free nodes sit in a min-heap, so whenever several become free at once they
/// are emitted in ascending id order. Returns fewer ids than there are nodes
/// when a cycle exists.
fn kahn_order(nodes: &BTreeMap<UnitId, DagNode>) -> Vec<UnitId> {
    let mut remaining: HashMap<&str, usize> = nodes
        .iter()
        .map(|(id, n)| (id.as_str(), n.deps.len()))
        .collect();

    let mut free: BinaryHeap<Reverse<&str>> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();

    let mut order = Vec::with_capacity(nodes.len());

    while let Some(Reverse(id)) = free.pop() {
        order.push(id.to_string());
        let Some(node) = nodes.get(id) else { continue };
        for dependent in &node.dependents {
            if let Some(count) = remaining.get_mut(dependent.as_str()) {
                *count -= 1;
                if *count == 0 {
                    free.push(Reverse(dependent.as_str()));
                }
            }
        }
    }

    order
}

/// Locate one concrete cycle among the nodes Kahn could not emit.
///
/// Walks dependency edges depth-first with three colours; the first edge that
/// reaches an in-progress node closes the loop. The returned path starts and
/// ends with the same id, and each consecutive pair `(a, b)` is an edge
/// "a depends on b".
fn find_cycle(nodes: &BTreeMap<UnitId, DagNode>, emitted: &[UnitId]) -> Vec<UnitId> {
    let mut marks: HashMap<&str, Mark> = nodes
        .keys()
        .map(|id| (id.as_str(), Mark::Unvisited))
        .collect();
    // Emitted nodes cannot be part of a cycle.
    for id in emitted {
        marks.insert(id.as_str(), Mark::Done);
    }

    for start in nodes.keys() {
        if marks.get(start.as_str()) != Some(&Mark::Unvisited) {
            continue;
        }

        // Explicit stack of (node, index of next dependency to explore).
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        marks.insert(start.as_str(), Mark::InProgress);

        while let Some(top) = stack.last_mut() {
            let id = top.0;
            let deps = nodes.get(id).map(|n| n.deps.as_slice()).unwrap_or(&[]);

            if top.1 >= deps.len() {
                marks.insert(id, Mark::Done);
                stack.pop();
                continue;
            }

            let dep = deps[top.1].as_str();
            top.1 += 1;

            match marks.get(dep).copied().unwrap_or(Mark::Done) {
                Mark::Unvisited => {
                    marks.insert(dep, Mark::InProgress);
                    stack.push((dep, 0));
                }
                Mark::InProgress => {
                    let pos = stack.iter().position(|(n, _)| *n == dep).unwrap_or(0);
                    let mut cycle: Vec<UnitId> =
                        stack[pos..].iter().map(|(n, _)| n.to_string()).collect();
                    cycle.push(dep.to_string());
                    return cycle;
                }
                Mark::Done => {}
            }
        }
    }

    // Kahn reported leftovers, so a cycle must exist; fall back to the raw
    // leftover set rather than an empty path.
    nodes
        .keys()
        .filter(|id| !emitted.contains(id))
        .cloned()
        .collect()
}

fn compute_levels(
    nodes: &BTreeMap<UnitId, DagNode>,
    order: &[UnitId],
) -> (Vec<Vec<UnitId>>, HashMap<UnitId, usize>) {
    let mut level_index: HashMap<UnitId, usize> = HashMap::with_capacity(order.len());

    // `order` guarantees every dependency is placed before its dependents.
    for id in order {
        let level = nodes
            .get(id)
            .map(|n| {
                n.deps
                    .iter()
                    .filter_map(|d| level_index.get(d))
                    .map(|l| l + 1)
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0);
        level_index.insert(id.clone(), level);
    }

    let depth = level_index.values().max().map(|m| m + 1).unwrap_or(0);
    let mut levels: Vec<Vec<UnitId>> = vec![Vec::new(); depth];
    for (id, level) in &level_index {
        levels[*level].push(id.clone());
    }
    for level in levels.iter_mut() {
        level.sort();
    }

    (levels, level_index)
}
