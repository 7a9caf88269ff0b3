use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::truncate::truncate_chars;

/// Whether a tool call may run without a human in the loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolRisk {
    /// Read-only or bookkeeping tools. Auto-approved.
    Safe,
    /// Mutates the filesystem, runs commands or reaches the network.
    Dangerous,
}

/// Tools the agent is known to expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KnownTool {
    Read,
    Glob,
    Grep,
    LS,
    TodoRead,
    TodoWrite,
    NotebookRead,
    WebSearch,
    BashOutput,
    ExitPlanMode,
    Bash,
    KillShell,
    Edit,
    MultiEdit,
    Write,
    NotebookEdit,
    WebFetch,
    Task,
}

impl KnownTool {
    pub fn from_name(name: &str) -> Option<Self> {
        let tool = match name {
            "Read" => Self::Read,
            "Glob" => Self::Glob,
            "Grep" => Self::Grep,
            "LS" => Self::LS,
            "TodoRead" => Self::TodoRead,
            "TodoWrite" => Self::TodoWrite,
            "NotebookRead" => Self::NotebookRead,
            "WebSearch" => Self::WebSearch,
            "BashOutput" => Self::BashOutput,
            "ExitPlanMode" => Self::ExitPlanMode,
            "Bash" => Self::Bash,
            "KillShell" => Self::KillShell,
            "Edit" => Self::Edit,
            "MultiEdit" => Self::MultiEdit,
            "Write" => Self::Write,
            "NotebookEdit" => Self::NotebookEdit,
            "WebFetch" => Self::WebFetch,
            "Task" => Self::Task,
            _ => return None,
        };
        Some(tool)
    }

    pub fn risk(self) -> ToolRisk {
        match self {
            Self::Read
            | Self::Glob
            | Self::Grep
            | Self::LS
            | Self::TodoRead
            | Self::TodoWrite
            | Self::NotebookRead
            | Self::WebSearch
            | Self::BashOutput
            | Self::ExitPlanMode => ToolRisk::Safe,
            Self::Bash
            | Self::KillShell
            | Self::Edit
            | Self::MultiEdit
            | Self::Write
            | Self::NotebookEdit
            | Self::WebFetch
            | Self::Task => ToolRisk::Dangerous,
        }
    }

    /// Input field that best describes what a call does.
    fn primary_field(self) -> Option<&'static str> {
        match self {
            Self::Bash => Some("command"),
            Self::Read | Self::Edit | Self::MultiEdit | Self::Write => Some("file_path"),
            Self::NotebookRead | Self::NotebookEdit => Some("notebook_path"),
            Self::Glob | Self::Grep => Some("pattern"),
            Self::LS => Some("path"),
            Self::WebFetch => Some("url"),
            Self::WebSearch => Some("query"),
            Self::Task => Some("description"),
            Self::BashOutput | Self::KillShell => Some("bash_id"),
            Self::TodoRead | Self::TodoWrite | Self::ExitPlanMode => None,
        }
    }
}

/// Static risk of a tool by name. Unknown tools (MCP tools, tools added by
/// newer agent versions) are dangerous.
pub fn classify(tool_name: &str) -> ToolRisk {
    KnownTool::from_name(tool_name)
        .map(KnownTool::risk)
        .unwrap_or(ToolRisk::Dangerous)
}

/// One-line description of a tool call's input for display.
pub fn normalize_input(tool_name: &str, input: &Value, max_chars: usize) -> String {
    let primary = KnownTool::from_name(tool_name)
        .and_then(KnownTool::primary_field)
        .and_then(|field| input.get(field))
        .and_then(Value::as_str);

    match primary {
        Some(value) => truncate_chars(value.lines().next().unwrap_or(""), max_chars),
        None if input.is_null() => String::new(),
        None => truncate_chars(&input.to_string(), max_chars),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_only_tools_are_safe() {
        for name in ["Read", "Glob", "Grep", "LS", "TodoWrite", "WebSearch"] {
            assert_eq!(classify(name), ToolRisk::Safe, "{name}");
        }
    }

    #[test]
    fn mutating_tools_are_dangerous() {
        for name in ["Bash", "Edit", "MultiEdit", "Write", "NotebookEdit", "WebFetch"] {
            assert_eq!(classify(name), ToolRisk::Dangerous, "{name}");
        }
    }

    #[test]
    fn unknown_tools_fail_safe() {
        assert_eq!(classify("mcp__github__create_issue"), ToolRisk::Dangerous);
        assert_eq!(classify(""), ToolRisk::Dangerous);
        assert_eq!(classify("read"), ToolRisk::Dangerous);
    }

    #[test]
    fn normalize_uses_primary_field() {
        assert_eq!(normalize_input("Bash", &json!({"command": "cargo test\n--all"}), 200), "cargo test");
        assert_eq!(normalize_input("Edit", &json!({"file_path": "/src/lib.rs", "old_string": "x"}), 200), "/src/lib.rs");
    }

    #[test]
    fn normalize_falls_back_to_json() {
        let out = normalize_input("mcp__x__y", &json!({"a": 1}), 200);
        assert_eq!(out, r#"{"a":1}"#);
        assert_eq!(normalize_input("TodoWrite", &Value::Null, 200), "");
    }

    #[test]
    fn normalize_truncates() {
        let long = "x".repeat(500);
        let out = normalize_input("Bash", &json!({ "command": long }), 50);
        assert_eq!(out.chars().count(), 51);
    }
}
