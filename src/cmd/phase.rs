//! Phase listing, status, and reset commands.

use anyhow::Result;
use std::path::Path;

use super::super::Cli;

pub fn cmd_list(cli: &Cli, project_dir: &Path) -> Result<()> {
    use cursus::config::Config;
    use cursus::graph::{PhaseKind, WorkflowGraph};

    let config = Config::new(project_dir.to_path_buf(), cli.verbose, cli.workflow.clone())?;
    let graph = WorkflowGraph::load_or_default(&config.workflow_file)?;

    println!();
    if config.workflow_file.exists() {
        println!("Workflow loaded from: {}", config.workflow_file.display());
    } else {
        println!("Workflow: built-in default (no workflow file found)");
    }
    println!("Fingerprint: {}", graph.fingerprint());
    println!();
    println!(
        "{:<12} {:<9} {:<6} {:<12} {:<12} {:<16} Name",
        "Phase", "Kind", "Tasks", "Next", "On failure", "Gate"
    );
    println!(
        "{:<12} {:<9} {:<6} {:<12} {:<12} {:<16} ----",
        "-----", "----", "-----", "----", "----------", "----"
    );

    for phase in graph.phases() {
        let kind = match phase.kind {
            PhaseKind::Gate => "gate",
            PhaseKind::Normal if phase.next.is_none() => "terminal",
            PhaseKind::Normal => "normal",
        };
        let gate = phase
            .gate
            .as_ref()
            .map(|g| format!("{} (max {})", g.threshold, g.max_retries))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<12} {:<9} {:<6} {:<12} {:<12} {:<16} {}",
            phase.id,
            kind,
            phase.tasks.len(),
            phase.next.as_deref().unwrap_or("-"),
            phase.on_failure.as_deref().unwrap_or("-"),
            gate,
            phase.name
        );
    }
    println!();
    println!("{} phases", graph.phases().len());
    println!();
    Ok(())
}

pub fn cmd_status(cli: &Cli, project_dir: &Path) -> Result<()> {
    use cursus::config::Config;
    use cursus::engine::StateStore;
    use cursus::graph::WorkflowGraph;
    use cursus::init::is_initialized;

    println!();
    println!("Cursus Run Status");
    println!("=================");
    println!();

    if !is_initialized(project_dir) {
        println!("Project: Not initialized");
        println!();
        println!("Run 'cursus init' to initialize the project.");
        println!();
        return Ok(());
    }

    let config = Config::new(project_dir.to_path_buf(), cli.verbose, cli.workflow.clone())?;
    let graph = WorkflowGraph::load_or_default(&config.workflow_file)?;
    let store = StateStore::new(config.state_file.clone());

    if !store.exists() {
        println!("Run: Not started");
        println!();
        println!("Run 'cursus start' to begin a run.");
        println!();
        return Ok(());
    }

    let state = store.load_or_init(&graph)?;
    let phase_name = graph
        .get(&state.current_phase)
        .map(|p| p.name.as_str())
        .unwrap_or("(not in current workflow)");

    println!("Run:     {}", state.run_id);
    if let Some(ref brief) = state.brief {
        println!("Brief:   {}", brief);
    }
    println!("Phase:   {} ({})", state.current_phase, phase_name);
    println!("Started: {}", state.created_at.format("%Y-%m-%d %H:%M:%S"));
    println!("Updated: {}", state.updated_at.format("%Y-%m-%d %H:%M:%S"));
    if state.graph_hash != graph.fingerprint() {
        println!("Note:    workflow definition changed since this run started");
    }

    println!();
    if state.completed.is_empty() {
        println!("Completed: (none)");
    } else {
        println!("Completed: {}", state.completed.join(" -> "));
    }

    if !state.gates.is_empty() {
        println!();
        println!("Gates:");
        for (id, record) in &state.gates {
            let verdict = if record.passed { "passed" } else { "failed" };
            let metric = record
                .metric
                .map(|m| format!("{m}%"))
                .unwrap_or_else(|| "no metric".to_string());
            println!(
                "  {}: {} ({}, iteration {}) at {}",
                id,
                verdict,
                metric,
                record.iteration,
                record.recorded_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    if !state.artifacts.is_empty() {
        println!();
        println!("Artifacts:");
        for entry in &state.artifacts {
            println!(
                "  {:<16} {} (from '{}')",
                entry.id,
                entry.path.display(),
                entry.produced_by
            );
        }
    }

    if let Some(ref esc) = state.escalation {
        println!();
        println!(
            "{} gate '{}' escalated after {} failed attempts: {}",
            console::style("Escalated:").red().bold(),
            esc.phase,
            esc.iterations,
            esc.reason
        );
        println!("Clear it with 'cursus goto <phase>' or 'cursus reset'.");
    }
    println!();
    Ok(())
}

pub fn cmd_reset(cli: &Cli, project_dir: &Path, force: bool) -> Result<()> {
    use cursus::config::Config;
    use cursus::engine::StateStore;
    use dialoguer::Confirm;

    let config = Config::new(project_dir.to_path_buf(), cli.verbose, cli.workflow.clone())?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will discard the current run. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    let store = StateStore::new(config.state_file.clone());
    store.reset()?;

    // Artifacts survive a reset; transcripts do not.
    if config.log_dir.exists() {
        std::fs::remove_dir_all(&config.log_dir).ok();
    }

    println!("Reset complete");
    Ok(())
}
