// src/lib.rs

pub mod cli;
pub mod config;
pub mod container;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod events;
pub mod exec;
pub mod logging;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::{PlanFile, load_and_validate};
use crate::dag::{DagGraph, RunSummary, Scheduler};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, WorkerPool};
use crate::events::EventBus;
use crate::exec::{ShellBackpressure, WorkerConfig, WorkerDeps, provider_from_config};

/// How long the event printer gets to drain after the run finished.
const PRINTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - plan loading and CLI overrides
/// - scheduler / pool / runtime
/// - the execution provider and backpressure runner
/// - event printing
/// - Ctrl-C handling
///
/// Fails when any unit failed or was skipped.
pub async fn run(args: CliArgs) -> Result<()> {
    let mut plan = load_and_validate(&args.plan)?;
    apply_overrides(&mut plan, &args);

    let units = plan.units();
    if args.dry_run {
        let graph = DagGraph::build(&units)?;
        print_dry_run(&plan, &graph);
        return Ok(());
    }

    let shutdown_timeout = match args.shutdown_timeout {
        Some(t) => t,
        None => plan.shutdown_timeout()?,
    };

    let bus = EventBus::new(plan.config.event_capacity);
    let printer = spawn_event_printer(bus.subscribe());

    let provider = provider_from_config(&plan.provider, shutdown_timeout).await?;
    info!(provider = provider.name(), "execution provider ready");

    let deps = WorkerDeps::new(
        WorkerConfig {
            workdir: plan.config.workdir.clone(),
            fail_fast: plan.config.fail_fast,
        },
        bus.clone(),
        provider,
        Arc::new(ShellBackpressure::new()),
    );

    // Pool reports and shutdown requests.
    let (rt_tx, rt_rx) = mpsc::unbounded_channel::<RuntimeEvent>();

    let pool = WorkerPool::new(plan.config.max_parallel, Arc::new(deps), rt_tx.clone());

    let scheduler = Scheduler::from_units(units)?.with_events(bus.clone());
    info!(
        units = scheduler.graph().len(),
        levels = scheduler.graph().levels().len(),
        max_parallel = pool.max_parallel(),
        "plan loaded"
    );

    // Ctrl-C → graceful shutdown. Cancelling the root token first unblocks a
    // runtime that is waiting for a pool slot.
    {
        let tx = rt_tx.clone();
        let token = pool.cancellation_token();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; shutting down");
            token.cancel();
            let _ = tx.send(RuntimeEvent::ShutdownRequested);
        });
    }
    drop(rt_tx);

    let core = CoreRuntime::new(scheduler, pool.max_parallel());
    let runtime = Runtime::new(core, pool, rt_rx, RuntimeOptions { shutdown_timeout });
    let summary = runtime.run().await?;

    drop(bus);
    if tokio::time::timeout(PRINTER_DRAIN_TIMEOUT, printer).await.is_err() {
        debug!("event printer still running; detaching");
    }

    print_summary(&summary);

    if !summary.is_success() {
        bail!(
            "{} unit(s) failed, {} skipped",
            summary.failed,
            summary.skipped + summary.unfinished
        );
    }
    Ok(())
}

fn apply_overrides(plan: &mut PlanFile, args: &CliArgs) {
    if let Some(n) = args.max_parallel {
        debug!(from = plan.config.max_parallel, to = n, "max_parallel overridden on the command line");
        plan.config.max_parallel = n as usize;
    }
}

/// Print every published event on stdout until the bus closes.
fn spawn_event_printer(mut rx: broadcast::Receiver<events::OrchestratorEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => println!("{event}"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(dropped = n, "event printer lagging; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!(
        "unitdag: {} completed, {} failed, {} skipped",
        summary.completed,
        summary.failed,
        summary.skipped + summary.unfinished
    );
    if let Some(err) = &summary.first_error {
        println!("first failure: {err}");
    }
}

/// Dry-run output: configuration, levels and the topological order.
fn print_dry_run(plan: &PlanFile, graph: &DagGraph) {
    println!("unitdag dry-run");
    println!("  config.max_parallel = {}", plan.config.max_parallel);
    println!("  config.shutdown_timeout = {}", plan.config.shutdown_timeout);
    println!("  config.fail_fast = {}", plan.config.fail_fast);
    println!("  config.workdir = {}", plan.config.workdir.display());
    println!(
        "  provider = {:?} / {:?}",
        plan.provider.kind, plan.provider.agent
    );
    println!();

    println!("levels ({}):", graph.levels().len());
    for (level, ids) in graph.levels().iter().enumerate() {
        println!("  {level}: {}", ids.join(", "));
    }
    println!();

    println!("topological order: {}", graph.topological_order().join(" -> "));
    println!();

    println!("units ({}):", plan.unit.len());
    for (id, unit) in plan.unit.iter() {
        println!("  - {id}");
        if !unit.after.is_empty() {
            println!("      after: {:?}", unit.after);
        }
        for (idx, task) in unit.task.iter().enumerate() {
            println!("      task {}: {}", idx + 1, task.description);
            if !task.depends_on.is_empty() {
                println!("        depends_on: {:?}", task.depends_on);
            }
            if !task.backpressure.is_empty() {
                println!("        backpressure: {}", task.backpressure);
            }
        }
    }

    debug!("dry-run complete (no execution)");
}
