use serde::{Deserialize, Serialize};

use crate::ids::{AgentSessionId, ApprovalId, ToolCallId};

/// Progress of a tool call as shown in chat.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Running,
    Succeeded,
    Failed,
}

/// How an approval request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied,
    TimedOut,
}

/// A renderable unit handed to the chat sink. Layout is the sink's business;
/// these carry only what happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RenderUnit {
    #[serde(rename = "session_started")]
    SessionStarted {
        cwd: String,
        model: String,
        tool_count: usize,
        session_id: Option<AgentSessionId>,
    },

    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_call")]
    ToolCall {
        tool_call_id: ToolCallId,
        tool_name: String,
        input: String,
        status: ToolStatus,
        preview: Option<String>,
    },

    /// Tool input too large to show inline; the summarizer holds the full text.
    #[serde(rename = "large_operation")]
    LargeOperation {
        tool_call_id: ToolCallId,
        tool_name: String,
        summary: String,
        content_ref: String,
        status: ToolStatus,
        preview: Option<String>,
    },

    #[serde(rename = "completed")]
    Completed {
        num_turns: u32,
        result: Option<String>,
        session_id: Option<AgentSessionId>,
    },

    #[serde(rename = "failed")]
    Failed { subtype: String, num_turns: u32 },

    #[serde(rename = "process_failed")]
    ProcessFailed {
        code: Option<i32>,
        stderr: Option<String>,
    },

    #[serde(rename = "process_error")]
    ProcessError { message: String },

    #[serde(rename = "timed_out")]
    TimedOut { after_secs: u64 },

    #[serde(rename = "stopped")]
    Stopped,

    #[serde(rename = "approval_requested")]
    ApprovalRequested {
        request_id: ApprovalId,
        tool_name: String,
        input: String,
        requester: Option<String>,
    },

    #[serde(rename = "approval_resolved")]
    ApprovalResolved {
        request_id: ApprovalId,
        tool_name: String,
        outcome: ApprovalOutcome,
    },
}

impl RenderUnit {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionStarted { .. } => "session_started",
            Self::Text { .. } => "text",
            Self::ToolCall { .. } => "tool_call",
            Self::LargeOperation { .. } => "large_operation",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::ProcessFailed { .. } => "process_failed",
            Self::ProcessError { .. } => "process_error",
            Self::TimedOut { .. } => "timed_out",
            Self::Stopped => "stopped",
            Self::ApprovalRequested { .. } => "approval_requested",
            Self::ApprovalResolved { .. } => "approval_resolved",
        }
    }

    /// Units that end a run. Every run path emits exactly one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. }
                | Self::Failed { .. }
                | Self::ProcessFailed { .. }
                | Self::ProcessError { .. }
                | Self::TimedOut { .. }
                | Self::Stopped
        )
    }

    /// Copy of a tool unit moved to a terminal status with a result preview.
    /// Other units come back unchanged.
    pub fn with_tool_outcome(&self, failed: bool, result_preview: String) -> Self {
        let new_status = if failed {
            ToolStatus::Failed
        } else {
            ToolStatus::Succeeded
        };
        let mut unit = self.clone();
        match &mut unit {
            Self::ToolCall { status, preview, .. } | Self::LargeOperation { status, preview, .. } => {
                *status = new_status;
                *preview = Some(result_preview);
            }
            _ => {}
        }
        unit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_unit() -> RenderUnit {
        RenderUnit::ToolCall {
            tool_call_id: ToolCallId::from_raw("toolu_1"),
            tool_name: "Bash".into(),
            input: "ls".into(),
            status: ToolStatus::Running,
            preview: None,
        }
    }

    #[test]
    fn serializes_with_kind_tag() {
        let json = serde_json::to_value(RenderUnit::TimedOut { after_secs: 300 }).unwrap();
        assert_eq!(json["kind"], "timed_out");
        assert_eq!(json["after_secs"], 300);
    }

    #[test]
    fn kind_matches_serde_tag() {
        let units = vec![
            tool_unit(),
            RenderUnit::Stopped,
            RenderUnit::Text { text: "hi".into() },
            RenderUnit::Failed { subtype: "error_max_turns".into(), num_turns: 2 },
        ];
        for unit in units {
            let json = serde_json::to_value(&unit).unwrap();
            assert_eq!(json["kind"], unit.kind());
        }
    }

    #[test]
    fn terminal_units() {
        assert!(RenderUnit::Stopped.is_terminal());
        assert!(RenderUnit::ProcessError { message: "x".into() }.is_terminal());
        assert!(!tool_unit().is_terminal());
        assert!(!RenderUnit::Text { text: "x".into() }.is_terminal());
    }

    #[test]
    fn tool_outcome_updates_status_and_preview() {
        let done = tool_unit().with_tool_outcome(true, "exit 1".into());
        match done {
            RenderUnit::ToolCall { status, preview, .. } => {
                assert_eq!(status, ToolStatus::Failed);
                assert_eq!(preview.as_deref(), Some("exit 1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tool_outcome_leaves_other_units_alone() {
        let text = RenderUnit::Text { text: "hi".into() };
        assert_eq!(text.with_tool_outcome(false, "x".into()), text);
    }
}
