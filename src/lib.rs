// src/lib.rs

pub mod broadcast;
pub mod cli;
pub mod clock;
pub mod config;
pub mod cycling;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod persistence;
pub mod pool;
pub mod retry;
pub mod task;
pub mod taskdef;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::clock::{Clock, SystemClock};
use crate::config::WorkflowConfig;
use crate::config::loader::{default_db_path, load_and_validate};
use crate::engine::{CoreOptions, CoreRuntime, Runtime, RuntimeEvent};
use crate::exec::LocalJobSubmitter;
use crate::persistence::Store;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the run database (fresh or restart)
/// - core / runtime
/// - local job submitter
/// - (optional) workflow file watcher
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let config = load_and_validate(&config_path)
        .with_context(|| format!("loading workflow {}", config_path.display()))?;

    if args.dry_run {
        print_dry_run(&config);
        return Ok(());
    }

    let db_path = args
        .db
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_db_path(&config_path));
    let store = Store::open(&db_path)?;
    let fresh = store.is_fresh()?;
    if args.restart && fresh {
        bail!("nothing to restart: {} holds no run", db_path.display());
    }
    if !args.restart && !fresh {
        bail!("{} already holds a run; pass --restart to continue it", db_path.display());
    }

    let options = CoreOptions {
        workflow: workflow_name(&config_path),
        hold_start: args.hold,
        stop_point: args.stopcp.clone(),
        stop_task: args.stop_task.clone(),
    };
    let fingerprint = config.fingerprint.clone();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let core = if args.restart {
        CoreRuntime::restart(config, clock, options, &store)?
    } else {
        CoreRuntime::new(config, clock, options)?
    };

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let submitter = LocalJobSubmitter::new(rt_tx.clone());

    let _watcher_handle = if args.watch_config {
        Some(crate::watch::spawn_config_watcher(
            &config_path,
            fingerprint,
            rt_tx.clone(),
        )?)
    } else {
        None
    };

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    let runtime = Runtime::new(core, rt_rx, rt_tx, submitter, store).with_config_path(&config_path);
    let reason = runtime.run().await?;
    info!(?reason, "workflow finished");
    Ok(())
}

/// The workflow's name: its file stem, or its directory for `flow.toml`.
fn workflow_name(config_path: &Path) -> String {
    let dir_name = || {
        config_path
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().and_then(|d| d.file_name()).map(|n| n.to_string_lossy().into_owned()))
    };
    match config_path.file_stem().map(|s| s.to_string_lossy().into_owned()) {
        Some(stem) if stem != "flow" => stem,
        _ => dir_name().unwrap_or_else(|| "cyclerun".to_string()),
    }
}

/// Simple dry-run output: cycling settings, queues and task graph.
fn print_dry_run(config: &WorkflowConfig) {
    let cycling = &config.cycling;
    println!("cyclerun dry-run");
    println!("  cycling mode = {:?}", cycling.mode);
    println!("  initial cycle point = {}", cycling.initial);
    if let Some(fcp) = &cycling.final_point {
        println!("  final cycle point = {fcp}");
    }
    if let Some(stop) = &config.stop_point {
        println!("  stop after = {stop}");
    }
    println!("  runahead limit = {:?}", config.runahead);
    println!();

    println!("queues ({}):", config.queues.len());
    for queue in &config.queues {
        println!("  - {} (limit {}): {}", queue.name, queue.limit, queue.members.join(", "));
    }
    println!();

    println!("tasks ({}):", config.defs.len());
    for def in config.defs.iter() {
        println!("  - {}", def.name);
        for section in &def.sections {
            match &section.trigger {
                Some(trigger) => println!("      {}: {trigger}", section.sequence.expr()),
                None => println!("      {}: (parentless)", section.sequence.expr()),
            }
            if !section.xtriggers.is_empty() {
                println!("        xtriggers: @{}", section.xtriggers.join(" @"));
            }
        }
        if !def.runtime.script.is_empty() {
            println!("      script: {}", def.runtime.script);
        }
        if !def.outputs.is_empty() {
            let labels: Vec<&str> = def.outputs.keys().map(String::as_str).collect();
            println!("      outputs: {}", labels.join(", "));
        }
    }

    debug!("dry-run complete (no execution)");
}
