use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use unitdag::dag::{DagGraph, Unit};
use unitdag_test_utils::builders::unit;

// Strategy to generate a valid DAG of units.
// We ensure acyclicity by only allowing unit N to depend on units 0..N-1.
pub fn dag_strategy(max_units: usize) -> impl Strategy<Value = Vec<Unit>> {
    (1..=max_units).prop_flat_map(|num_units| {
        let deps_strat = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_units),
            num_units,
        );

        deps_strat.prop_map(move |raw_deps| {
            raw_deps
                .into_iter()
                .enumerate()
                .map(|(i, potential)| {
                    let deps: HashSet<String> = potential
                        .into_iter()
                        .filter(|_| i > 0)
                        .map(|d| format!("u{:02}", d % i.max(1)))
                        .collect();
                    let deps: Vec<&str> = deps.iter().map(String::as_str).collect();
                    unit(&format!("u{i:02}"), &deps)
                })
                .collect()
        })
    })
}

proptest! {
    #[test]
    fn topological_order_respects_every_edge(units in dag_strategy(12)) {
        let graph = DagGraph::build(&units).unwrap();
        let order = graph.topological_order();
        prop_assert_eq!(order.len(), units.len());

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

        for u in &units {
            for dep in &u.deps {
                prop_assert!(position[dep.as_str()] < position[u.id.as_str()]);
            }
        }
    }

    #[test]
    fn levels_partition_nodes_and_follow_longest_path(units in dag_strategy(12)) {
        let graph = DagGraph::build(&units).unwrap();

        let mut seen = HashSet::new();
        for (level, ids) in graph.levels().iter().enumerate() {
            prop_assert!(!ids.is_empty());
            for id in ids {
                prop_assert!(seen.insert(id.clone()), "{} appears twice", id);
                prop_assert_eq!(graph.level_of(id), Some(level));
            }
        }
        prop_assert_eq!(seen.len(), units.len());

        for u in &units {
            let level = graph.level_of(&u.id).unwrap();
            let expected = u
                .deps
                .iter()
                .map(|d| graph.level_of(d).unwrap() + 1)
                .max()
                .unwrap_or(0);
            prop_assert_eq!(level, expected);
        }
    }

    #[test]
    fn build_is_deterministic(units in dag_strategy(10)) {
        let mut reversed = units.clone();
        reversed.reverse();

        let a = DagGraph::build(&units).unwrap();
        let b = DagGraph::build(&reversed).unwrap();
        prop_assert_eq!(a.topological_order(), b.topological_order());
        prop_assert_eq!(a.levels(), b.levels());
    }

    #[test]
    fn back_edge_always_yields_a_valid_cycle(units in dag_strategy(10)) {
        // Make the first unit depend on the last one reachable from it, if any.
        let mut units = units;
        let n = units.len();
        let Some(last) = (1..n).rev().find(|&i| reaches(&units, i, 0)) else {
            return Ok(());
        };
        let target = units[last].id.clone();
        units[0].deps.push(target);

        let err = DagGraph::build(&units).unwrap_err();
        let unitdag::errors::OrchestratorError::Cycle { cycle } = err else {
            return Err(TestCaseError::fail("expected a cycle"));
        };

        prop_assert_eq!(cycle.first(), cycle.last());
        for pair in cycle.windows(2) {
            let from = units.iter().find(|u| u.id == pair[0]).unwrap();
            prop_assert!(from.deps.contains(&pair[1]));
        }
    }
}

/// Whether unit `from` transitively depends on unit `to` (by index).
fn reaches(units: &[Unit], from: usize, to: usize) -> bool {
    let target = &units[to].id;
    let mut stack = vec![units[from].id.clone()];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if &id == target {
            return true;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(u) = units.iter().find(|u| u.id == id) {
            stack.extend(u.deps.iter().cloned());
        }
    }
    false
}
