use std::collections::HashSet;

use proptest::prelude::*;
use unitdag::dag::{Scheduler, UnitStatus};
use unitdag::engine::UnitOutcome;
use unitdag::errors::UnitExecutionError;

use crate::graph::dag_strategy;

proptest! {
    #[test]
    fn run_terminates_and_failures_only_reach_dependents(
        units in dag_strategy(12),
        failing_indices in proptest::collection::vec(0..12usize, 0..4),
    ) {
        let ids: Vec<String> = units.iter().map(|u| u.id.clone()).collect();
        let failing: HashSet<String> = failing_indices
            .iter()
            .filter(|&&i| i < ids.len())
            .map(|&i| ids[i].clone())
            .collect();

        let mut scheduler = Scheduler::from_units(units.clone()).unwrap();
        scheduler.start();

        let mut executing: Vec<String> =
            scheduler.take_ready().into_iter().map(|u| u.id).collect();
        let mut steps = 0;

        while let Some(id) = executing.pop() {
            steps += 1;
            prop_assert!(steps <= ids.len(), "unit dispatched more than once");

            // Every dependency must be complete before dispatch.
            prop_assert_eq!(scheduler.deps_satisfied(&id), Some(true));

            let outcome = if failing.contains(&id) {
                UnitOutcome::Failed(UnitExecutionError::new(&id, "scripted"))
            } else {
                UnitOutcome::Complete
            };
            scheduler.handle_completion(&id, outcome);
            executing.extend(scheduler.take_ready().into_iter().map(|u| u.id));
        }

        prop_assert!(scheduler.is_finished());

        // A unit is skipped exactly when some dependency failed or was skipped.
        for u in &units {
            let status = scheduler.status_of(&u.id).unwrap();
            let blocked = u.deps.iter().any(|d| {
                matches!(
                    scheduler.status_of(d),
                    Some(UnitStatus::Failed | UnitStatus::Skipped)
                )
            });

            if blocked {
                prop_assert_eq!(status, UnitStatus::Skipped, "{} should be skipped", &u.id);
            } else if failing.contains(&u.id) {
                prop_assert_eq!(status, UnitStatus::Failed);
            } else {
                prop_assert_eq!(status, UnitStatus::Complete);
            }
        }

        let summary = scheduler.summary();
        prop_assert_eq!(summary.total(), units.len());
        prop_assert_eq!(summary.unfinished, 0);
    }
}
