//! Workflow runs: `cursus start`, `cursus resume`, and `cursus goto`.

use std::path::Path;
use std::sync::Arc;

use cursus::dispatch::ProcessWorker;
use cursus::engine::{Orchestrator, RunOutcome, StateLock};
use cursus::errors::EngineError;

use super::super::Cli;

/// Build the full run stack for one command invocation. The returned lock
/// excludes a second orchestrator process for as long as it is held.
fn prepare(
    cli: &Cli,
    project_dir: &Path,
) -> Result<(Orchestrator<ProcessWorker>, StateLock), EngineError> {
    use cursus::config::Config;
    use cursus::dispatch::Dispatcher;
    use cursus::engine::StateStore;
    use cursus::graph::WorkflowGraph;
    use cursus::settings::Settings;
    use cursus::ui::RunUi;

    let config = Config::new(project_dir.to_path_buf(), cli.verbose, cli.workflow.clone())?;
    config.ensure_directories()?;

    let settings = Settings::load_or_default(&config.settings_file)?;
    let graph = WorkflowGraph::load_or_default(&config.workflow_file)?;

    let ui = Arc::new(RunUi::new(graph.phases().len() as u64, config.verbose));

    let worker = ProcessWorker::new(
        settings.worker_command(),
        settings.worker_flags(),
        config.project_dir.clone(),
        config.log_dir.clone(),
    )
    .with_ui(Arc::clone(&ui));
    let dispatcher = Dispatcher::new(worker, config.artifact_dir.clone());

    let store = StateStore::new(config.state_file.clone());
    let lock = store.lock()?;

    let orchestrator = Orchestrator::new(graph, store, dispatcher).with_ui(ui);
    Ok((orchestrator, lock))
}

pub async fn cmd_start(
    cli: &Cli,
    project_dir: &Path,
    brief: Option<String>,
) -> Result<RunOutcome, EngineError> {
    let (orchestrator, _lock) = prepare(cli, project_dir)?;
    let mut state = orchestrator.start(brief)?;
    println!(
        "Run {} started at phase '{}'",
        state.run_id, state.current_phase
    );
    let outcome = orchestrator.run(&mut state).await?;
    report_escalation(&outcome);
    Ok(outcome)
}

pub async fn cmd_resume(cli: &Cli, project_dir: &Path) -> Result<RunOutcome, EngineError> {
    let (orchestrator, _lock) = prepare(cli, project_dir)?;
    let mut state = orchestrator.resume()?;
    println!(
        "Resuming run {} at phase '{}'",
        state.run_id, state.current_phase
    );
    let outcome = orchestrator.run(&mut state).await?;
    report_escalation(&outcome);
    Ok(outcome)
}

pub async fn cmd_goto(
    cli: &Cli,
    project_dir: &Path,
    phase_id: &str,
) -> Result<RunOutcome, EngineError> {
    let (orchestrator, _lock) = prepare(cli, project_dir)?;
    let mut state = orchestrator.resume()?;
    orchestrator.reposition(&mut state, phase_id)?;
    println!(
        "Run {} repositioned to phase '{}'",
        state.run_id, state.current_phase
    );
    let outcome = orchestrator.run(&mut state).await?;
    report_escalation(&outcome);
    Ok(outcome)
}

/// Actionable summary after a gate exhausted its retries. The in-flight
/// progress lines came from the run UI; this is the remediation block.
fn report_escalation(outcome: &RunOutcome) {
    let RunOutcome::Escalated {
        phase,
        reason,
        iterations,
    } = outcome
    else {
        return;
    };

    println!();
    println!(
        "  {} {}",
        console::style("Escalated:").red().bold(),
        escalation_summary(phase, *iterations),
    );
    println!("  Last evaluation: {reason}");
    println!(
        "  Tip: Inspect the artifacts under .cursus/artifacts/ to see what the \
        workers produced, and the transcripts under .cursus/logs/."
    );
    println!(
        "  Tip: Fix the underlying problem, then 'cursus goto <phase>' to clear \
        the escalation and continue from there."
    );
    println!("  Tip: 'cursus reset' discards the run entirely.");
}

/// One-line description of an escalated gate.
///
/// Returns a string like "gate 'review' failed 4 times without meeting its
/// threshold". Pure logic so it can be unit-tested without a worker.
pub fn escalation_summary(phase: &str, iterations: u32) -> String {
    format!(
        "gate '{}' failed {} time{} without meeting its threshold.",
        phase,
        iterations,
        if iterations == 1 { "" } else { "s" }
    )
}
