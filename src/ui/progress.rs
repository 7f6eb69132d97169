use crate::ui::icons::{CHECK, CROSS, GATE, HALT, LOOP, SPARKLE};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Terminal UI for a workflow run, rendered via `indicatif` progress bars.
///
/// Two bars are stacked vertically:
/// - Phase bar — tracks how many phases have completed
/// - Attempt spinner — the phase currently dispatching and its live status
///
/// All methods coordinate output via `indicatif`'s `MultiProgress` internally.
pub struct RunUi {
    multi: MultiProgress,
    phase_bar: ProgressBar,
    attempt_bar: ProgressBar,
    verbose: bool,
    current_attempt: AtomicU32,
}

impl RunUi {
    /// Create the UI and add both progress bars to the multiplex renderer.
    ///
    /// # Arguments
    /// * `total_phases` — phase count of the loaded graph, sizes the phase bar
    /// * `verbose` — when `true`, worker step lines are echoed beneath the bars
    pub fn new(total_phases: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");

        let phase_bar = multi.add(ProgressBar::new(total_phases));
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("Phases");

        let attempt_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .expect("progress bar template is a valid static string");

        let attempt_bar = multi.add(ProgressBar::new_spinner());
        attempt_bar.set_style(attempt_style);
        attempt_bar.set_prefix(" Phase");

        Self {
            multi,
            phase_bar,
            attempt_bar,
            verbose,
            current_attempt: AtomicU32::new(1),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!` if the
    /// rich UI fails. This prevents silent loss of user-facing messages when
    /// the terminal or stdout is unavailable.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Print a dim informational line above the bars.
    pub fn print_note(&self, msg: &str) {
        self.print_line(format!("{}", style(format!("note: {msg}")).dim()));
    }

    /// Start the attempt spinner for the phase about to dispatch.
    ///
    /// Does **not** advance the phase counter — call [`Self::phase_complete`]
    /// or a gate method to settle the phase.
    pub fn start_phase(&self, phase: &str, name: &str, attempt: u32) {
        self.current_attempt.store(attempt, Ordering::SeqCst);
        let suffix = if attempt > 1 {
            format!(" (attempt {attempt})")
        } else {
            String::new()
        };
        self.phase_bar
            .set_message(format!("{}: {}", style(phase).yellow(), name));
        self.attempt_bar.set_message(format!(
            "Running {}{} {}",
            style(phase).cyan(),
            suffix,
            style("(starting...)").dim()
        ));
        self.attempt_bar
            .enable_steady_tick(Duration::from_millis(100));
    }

    /// Update the attempt spinner with a short status string.
    ///
    /// In verbose mode the message is also printed as a dim indented line.
    pub fn log_step(&self, msg: &str) {
        let attempt = self.current_attempt.load(Ordering::SeqCst);
        self.attempt_bar.set_message(format!(
            "Attempt {} {}",
            style(attempt).cyan(),
            style(format!("({})", msg)).dim()
        ));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(msg).dim()));
        }
    }

    /// Show a worker activity line (tool use, text snippet).
    pub fn show_activity(&self, description: &str) {
        let attempt = self.current_attempt.load(Ordering::SeqCst);
        self.attempt_bar.set_message(format!(
            "Attempt {} {}",
            style(attempt).cyan(),
            style(description).yellow()
        ));
        self.print_line(format!("    {}", style(description).yellow()));
    }

    /// Advance the phase bar and print a completion line.
    pub fn phase_complete(&self, phase: &str) {
        self.phase_bar.inc(1);
        self.attempt_bar
            .finish_with_message(format!("{} {} complete", CHECK, phase));
        self.print_line(format!(
            "{} Phase {} complete",
            CHECK,
            style(phase).green().bold()
        ));
    }

    /// A gate evaluated its report and passed.
    pub fn gate_passed(&self, phase: &str, reason: &str) {
        self.phase_bar.inc(1);
        self.attempt_bar
            .finish_with_message(format!("{} {} passed", CHECK, phase));
        self.print_line(format!(
            "{} Gate {} passed: {}",
            GATE,
            style(phase).green().bold(),
            style(reason).dim()
        ));
    }

    /// A gate failed within budget and the run is looping back.
    pub fn gate_failed(&self, phase: &str, reason: &str, iteration: u32, max: u32) {
        self.attempt_bar
            .finish_with_message(format!("{} {} failed", CROSS, phase));
        self.print_line(format!(
            "{} Gate {} failed ({}/{}): {}",
            LOOP,
            style(phase).red().bold(),
            iteration,
            max,
            reason
        ));
    }

    /// A gate exhausted its retries; the run is halting for a human.
    pub fn gate_escalated(&self, phase: &str, reason: &str, iterations: u32) {
        self.attempt_bar
            .finish_with_message(format!("{} {} escalated", CROSS, phase));
        self.print_line(format!(
            "{} Gate {} escalated after {} failed attempts: {}",
            HALT,
            style(phase).red().bold(),
            iterations,
            reason
        ));
    }

    /// Print the final celebration line once the terminal phase is reached.
    pub fn workflow_complete(&self) {
        self.phase_bar.finish();
        self.print_line(format!(
            "\n{} Workflow {}\n",
            SPARKLE,
            style("complete").green().bold()
        ));
    }
}
