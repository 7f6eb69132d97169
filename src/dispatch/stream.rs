//! Worker stream-json event types.
//!
//! The worker CLI emits line-delimited JSON on stdout. The dispatcher
//! understands just enough of it to surface activity while a task runs and
//! to capture the final result: everything else is ignored.

use serde::Deserialize;
use serde_json::Value;

/// Events from the worker CLI's stream-json output format
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerEvent {
    #[serde(rename = "assistant")]
    Assistant { message: WorkerMessage },

    #[serde(rename = "user")]
    User {},

    #[serde(rename = "result")]
    Result {
        subtype: String,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        is_error: bool,
    },

    #[serde(rename = "system")]
    System { subtype: String },
}

#[derive(Debug, Deserialize)]
pub struct WorkerMessage {
    #[serde(default)]
    pub content: Vec<WorkerBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerBlock {
    #[serde(rename = "tool_use")]
    ToolUse { name: String, input: Value },

    #[serde(rename = "text")]
    Text { text: String },
}

/// One activity line for a tool-use event, e.g. "edit src/main.rs".
pub fn describe_tool_use(name: &str, input: &Value) -> String {
    let path_of = |input: &Value| {
        input
            .get("file_path")
            .and_then(|v| v.as_str())
            .map(shorten_path)
            .unwrap_or_else(|| "file".to_string())
    };
    match name {
        "Read" => format!("read {}", path_of(input)),
        "Write" => format!("write {}", path_of(input)),
        "Edit" => format!("edit {}", path_of(input)),
        "Bash" => {
            let cmd = input
                .get("command")
                .and_then(|v| v.as_str())
                .map(|s| truncate(s, 48))
                .unwrap_or_else(|| "command".to_string());
            format!("run {cmd}")
        }
        "Glob" | "Grep" => {
            let pattern = input.get("pattern").and_then(|v| v.as_str()).unwrap_or("*");
            format!("search {}", truncate(pattern, 32))
        }
        "Task" => {
            let desc = input
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("subagent");
            format!("agent {desc}")
        }
        other => other.to_string(),
    }
}

/// One activity line for streamed worker text: its first line, shortened.
pub fn text_snippet(text: &str, max_len: usize) -> String {
    let first_line = text.lines().next().unwrap_or(text);
    truncate(first_line.trim(), max_len)
}

/// Last two components of a path.
fn shorten_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() <= 2 {
        path.to_string()
    } else {
        parts[parts.len() - 2..].join("/")
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
