//! Subprocess worker: runs one task by invoking the external agent CLI.
//!
//! The rendered request goes to a prompt file and the worker's stdin; the
//! worker's stream-json stdout is parsed for activity and the final result,
//! and the full transcript lands in a per-attempt log file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use crate::dispatch::stream::{WorkerBlock, WorkerEvent, describe_tool_use, text_snippet};
use crate::dispatch::{TaskOutput, TaskRequest, Worker, artifact_path};
use crate::errors::DispatchError;
use crate::ui::RunUi;

/// Invokes the configured worker command as a subprocess.
pub struct ProcessWorker {
    command: String,
    flags: Vec<String>,
    project_dir: PathBuf,
    log_dir: PathBuf,
    ui: Option<Arc<RunUi>>,
}

impl ProcessWorker {
    pub fn new(
        command: String,
        flags: Vec<String>,
        project_dir: PathBuf,
        log_dir: PathBuf,
    ) -> Self {
        Self {
            command,
            flags,
            project_dir,
            log_dir,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<RunUi>) -> Self {
        self.ui = Some(ui);
        self
    }

    fn log_step(&self, msg: &str) {
        if let Some(ref ui) = self.ui {
            ui.log_step(msg);
        }
    }

    fn show_activity(&self, msg: &str) {
        if let Some(ref ui) = self.ui {
            ui.show_activity(msg);
        }
    }
}

fn task_slug(task: &str) -> String {
    task.replace([':', '/'], "-")
}

pub fn prompt_file_name(phase: &str, attempt: u32, task: &str) -> String {
    format!("{phase}-attempt-{attempt}-{}-prompt.md", task_slug(task))
}

pub fn output_file_name(phase: &str, attempt: u32, task: &str) -> String {
    format!("{phase}-attempt-{attempt}-{}-output.log", task_slug(task))
}

/// Render the request the worker reads from stdin.
pub fn render_prompt(request: &TaskRequest) -> String {
    let mut prompt = format!(
        "You are the worker for one task in a phased workflow.\n\n\
         ## TASK\n{} (phase {} - {}, attempt {})\n",
        request.task, request.phase_id, request.phase_name, request.attempt
    );

    if let Some(brief) = &request.brief {
        prompt.push_str(&format!("\n## BRIEF\n{brief}\n"));
    }

    if !request.inputs.is_empty() {
        prompt.push_str("\n## INPUTS\n");
        for input in &request.inputs {
            prompt.push_str(&format!("- {}: {}\n", input.id, input.path.display()));
        }
    }

    if !request.outputs.is_empty() {
        prompt.push_str("\n## REQUIRED OUTPUTS\nWrite each artifact exactly where listed:\n");
        for artifact in &request.outputs {
            prompt.push_str(&format!(
                "- {}: {}\n",
                artifact,
                artifact_path(&request.artifact_dir, artifact).display()
            ));
        }
    }

    if request.wants_metric {
        prompt.push_str(
            "\n## REPORTING\nEnd the report artifact with a metric tag on its own line, \
             e.g. <metric>87</metric>. Only the last tag counts.\n",
        );
    }

    prompt
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn invoke(&self, request: TaskRequest) -> Result<TaskOutput, DispatchError> {
        let prompt = render_prompt(&request);

        let prompt_file = self.log_dir.join(prompt_file_name(
            &request.phase_id,
            request.attempt,
            &request.task,
        ));
        std::fs::write(&prompt_file, &prompt).map_err(|source| {
            DispatchError::PromptWriteFailed {
                path: prompt_file.clone(),
                source,
            }
        })?;

        let output_file = self.log_dir.join(output_file_name(
            &request.phase_id,
            request.attempt,
            &request.task,
        ));

        let start = Instant::now();
        debug!(task = %request.task, phase = %request.phase_id, command = %self.command, "spawning worker");
        self.log_step(&format!("{}: spawning {}", request.task, self.command));

        let mut cmd = Command::new(&self.command);
        for flag in &self.flags {
            cmd.arg(flag);
        }

        // stderr is dropped rather than piped: nothing drains it, and a
        // chatty worker would block on a full pipe.
        let mut child = cmd
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .current_dir(&self.project_dir)
            .spawn()
            .map_err(|source| DispatchError::SpawnFailed {
                command: self.command.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| task_failed(&request, format!("failed to write worker stdin: {e}")))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| task_failed(&request, format!("failed to close worker stdin: {e}")))?;
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| task_failed(&request, "worker stdout was not captured".to_string()))?;
        let mut reader = BufReader::new(stdout).lines();

        let mut accumulated = String::new();
        let mut final_result: Option<String> = None;
        let mut is_error = false;

        loop {
            let line = reader
                .next_line()
                .await
                .map_err(|e| task_failed(&request, format!("failed to read worker output: {e}")))?;
            let Some(line) = line else { break };
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<WorkerEvent>(&line) {
                Ok(WorkerEvent::Assistant { message }) => {
                    for block in message.content {
                        match block {
                            WorkerBlock::ToolUse { name, input } => {
                                self.show_activity(&describe_tool_use(&name, &input));
                            }
                            WorkerBlock::Text { text } => {
                                let snippet = text_snippet(&text, 60);
                                if !snippet.is_empty() {
                                    self.show_activity(&snippet);
                                }
                                accumulated.push_str(&text);
                                accumulated.push('\n');
                            }
                        }
                    }
                }
                Ok(WorkerEvent::Result {
                    result,
                    is_error: err,
                    ..
                }) => {
                    final_result = result;
                    is_error = err;
                }
                Ok(WorkerEvent::User { .. }) | Ok(WorkerEvent::System { .. }) => {}
                Err(_) => {
                    // Not stream-json; keep it for the transcript
                    accumulated.push_str(&line);
                    accumulated.push('\n');
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| task_failed(&request, format!("failed to wait for worker: {e}")))?;

        let combined = final_result.unwrap_or(accumulated);
        std::fs::write(&output_file, &combined).map_err(|source| {
            DispatchError::LogWriteFailed {
                path: output_file.clone(),
                source,
            }
        })?;

        let elapsed = start.elapsed();
        self.log_step(&format!(
            "{}: finished in {:.1}s (exit {})",
            request.task,
            elapsed.as_secs_f64(),
            status.code().unwrap_or(-1)
        ));

        if !status.success() {
            return Err(task_failed(
                &request,
                format!(
                    "worker exited with code {} (transcript: {})",
                    status.code().unwrap_or(-1),
                    output_file.display()
                ),
            ));
        }
        if is_error {
            return Err(task_failed(
                &request,
                format!(
                    "worker reported an error: {}",
                    text_snippet(&combined, 120)
                ),
            ));
        }

        Ok(TaskOutput {
            text: combined,
            log_file: Some(output_file),
        })
    }
}

fn task_failed(request: &TaskRequest, message: String) -> DispatchError {
    DispatchError::TaskFailed {
        phase: request.phase_id.clone(),
        task: request.task.clone(),
        message,
    }
}
