//! Line protocol spoken by the agent process on its standard output.
//!
//! Every line is one JSON object tagged by `type`. Message kinds and content
//! blocks we do not understand deserialize to `Unknown` / `Other` so newer
//! agent versions never break decoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentSessionId, ToolCallId};

/// One decoded protocol line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentMessage {
    System(SystemMessage),
    Assistant(AssistantMessage),
    User(UserMessage),
    Result(ResultMessage),
    #[serde(other)]
    Unknown,
}

impl AgentMessage {
    /// Session id carried by the message, if any.
    pub fn session_id(&self) -> Option<&AgentSessionId> {
        match self {
            Self::System(m) => m.session_id.as_ref(),
            Self::Assistant(m) => m.session_id.as_ref(),
            Self::User(m) => m.session_id.as_ref(),
            Self::Result(m) => m.session_id.as_ref(),
            Self::Unknown => None,
        }
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Assistant(_) => "assistant",
            Self::User(_) => "user",
            Self::Result(_) => "result",
            Self::Unknown => "unknown",
        }
    }

    /// A `result` message is the last useful line the agent writes.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Result(_))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub subtype: String,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub session_id: Option<AgentSessionId>,
}

impl SystemMessage {
    pub fn is_init(&self) -> bool {
        self.subtype == "init"
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub session_id: Option<AgentSessionId>,
    pub message: MessageBody,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    pub session_id: Option<AgentSessionId>,
    pub message: MessageBody,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default)]
    pub content: MessageContent,
}

/// Message content is normally a block array; echoed user prompts arrive as a
/// bare string.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Blocks(Vec<ContentBlock>),
    Text(String),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Blocks(Vec::new())
    }
}

impl MessageContent {
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Blocks(blocks) => blocks,
            Self::Text(_) => &[],
        }
    }

    /// Concatenated plain text of every text block, or `None` when there is none.
    pub fn text(&self) -> Option<String> {
        let text = match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        };
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: ToolCallId,
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        tool_use_id: ToolCallId,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

/// Tool result payload: a string, or an array of `{"type":"text"}` blocks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<Value>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl ToolResultContent {
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub subtype: String,
    #[serde(default)]
    pub session_id: Option<AgentSessionId>,
    #[serde(default)]
    pub num_turns: u32,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

impl ResultMessage {
    /// `success` subtype without the error flag. Anything `error_*` is a failure.
    pub fn is_success(&self) -> bool {
        self.subtype == "success" && !self.is_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> AgentMessage {
        serde_json::from_str(line).unwrap()
    }

    #[test]
    fn parses_system_init() {
        let msg = parse(
            r#"{"type":"system","subtype":"init","cwd":"/work/api","model":"claude-sonnet","tools":["Bash","Read"],"session_id":"S1"}"#,
        );
        let AgentMessage::System(sys) = &msg else {
            panic!("expected system, got {msg:?}");
        };
        assert!(sys.is_init());
        assert_eq!(sys.cwd.as_deref(), Some("/work/api"));
        assert_eq!(sys.tools.len(), 2);
        assert_eq!(msg.session_id().map(|s| s.as_str()), Some("S1"));
    }

    #[test]
    fn parses_assistant_text_and_tool_use() {
        let msg = parse(
            r#"{"type":"assistant","session_id":"S1","message":{"content":[{"type":"text","text":"Looking"},{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls"}}]}}"#,
        );
        let AgentMessage::Assistant(a) = msg else {
            panic!("expected assistant");
        };
        assert_eq!(a.message.content.text().as_deref(), Some("Looking"));
        match &a.message.content.blocks()[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id.as_str(), "toolu_1");
                assert_eq!(name, "Bash");
                assert_eq!(input["command"], "ls");
            }
            other => panic!("expected tool_use, got {other:?}"),
        }
    }

    #[test]
    fn parses_tool_result_with_block_content() {
        let msg = parse(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"toolu_1","content":[{"type":"text","text":"a.txt"},{"type":"text","text":"b.txt"}]}]}}"#,
        );
        let AgentMessage::User(u) = msg else {
            panic!("expected user");
        };
        match &u.message.content.blocks()[0] {
            ContentBlock::ToolResult { content, is_error, .. } => {
                assert_eq!(content.as_text(), "a.txt\nb.txt");
                assert!(!is_error);
            }
            other => panic!("expected tool_result, got {other:?}"),
        }
    }

    #[test]
    fn user_prompt_echo_as_string_is_tolerated() {
        let msg = parse(r#"{"type":"user","message":{"content":"hello"}}"#);
        let AgentMessage::User(u) = msg else {
            panic!("expected user");
        };
        assert!(u.message.content.blocks().is_empty());
    }

    #[test]
    fn result_success_and_error() {
        let ok = parse(r#"{"type":"result","subtype":"success","session_id":"S1","num_turns":3,"result":"done"}"#);
        let AgentMessage::Result(ok) = ok else {
            panic!("expected result");
        };
        assert!(ok.is_success());
        assert_eq!(ok.num_turns, 3);

        let err = parse(r#"{"type":"result","subtype":"error_max_turns","session_id":"S1","num_turns":10}"#);
        let AgentMessage::Result(err) = err else {
            panic!("expected result");
        };
        assert!(!err.is_success());
        assert!(err.result.is_none());
    }

    #[test]
    fn unknown_types_are_tolerated() {
        assert_eq!(parse(r#"{"type":"stream_event","event":{}}"#), AgentMessage::Unknown);
        let msg = parse(r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"hm"}]}}"#);
        let AgentMessage::Assistant(a) = msg else {
            panic!("expected assistant");
        };
        assert_eq!(a.message.content.blocks(), &[ContentBlock::Other]);
        assert!(a.message.content.text().is_none());
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(serde_json::from_str::<AgentMessage>(r#"{"subtype":"init"}"#).is_err());
    }
}
