//! Settings types. Every struct is `default`-filled so a settings file only
//! needs the keys it changes.

use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchboardSettings {
    pub agent: AgentSettings,
    pub approvals: ApprovalSettings,
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
}

impl SwitchboardSettings {
    /// Reject values that would make the orchestrator unusable.
    pub fn validate(&self) -> crate::Result<()> {
        if self.agent.program.trim().is_empty() {
            return Err(crate::SettingsError::InvalidValue("agent.program is empty".into()));
        }
        if self.agent.watchdog_secs == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "agent.watchdogSecs must be positive".into(),
            ));
        }
        if self.approvals.timeout_secs == 0 {
            return Err(crate::SettingsError::InvalidValue(
                "approvals.timeoutSecs must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// How the agent process is launched and supervised.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    /// Executable invoked through `sh -c`.
    pub program: String,
    /// Extra flags appended verbatim after the protocol flags.
    pub extra_args: Vec<String>,
    /// Directory channel folders are resolved against.
    pub base_dir: String,
    /// Watchdog: a run is killed after this many seconds.
    pub watchdog_secs: u64,
    /// Tool inputs serializing past this many bytes are "large operations".
    pub large_payload_bytes: usize,
    /// Max characters of a tool input/result preview.
    pub preview_chars: usize,
    /// Tool the agent calls for permission decisions (`--permission-prompt-tool`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_prompt_tool: Option<String>,
    /// MCP config exposing that tool (`--mcp-config`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcp_config: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            extra_args: Vec::new(),
            base_dir: ".".to_string(),
            watchdog_secs: 300,
            large_payload_bytes: 4096,
            preview_chars: 200,
            permission_prompt_tool: None,
            mcp_config: None,
        }
    }
}

/// Decision applied when nobody answers, or no one can be asked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultDecision {
    Allow,
    #[default]
    Deny,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalSettings {
    /// Seconds a human has to answer an approval request.
    pub timeout_secs: u64,
    /// Outcome when the deadline passes.
    pub timeout_decision: DefaultDecision,
    /// Outcome for risky tools when no notification can be delivered.
    pub fallback_decision: DefaultDecision,
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            timeout_decision: DefaultDecision::Deny,
            fallback_decision: DefaultDecision::Deny,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Capacity of the update broadcast channel.
    pub broadcast_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9191,
            broadcast_capacity: 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Persist warn+ logs to SQLite.
    pub persist: bool,
    /// Relative to the data directory unless absolute.
    pub db_path: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            persist: true,
            db_path: "logs.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Channel-session database, relative to the data directory unless absolute.
    pub db_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            db_path: "sessions.db".to_string(),
        }
    }
}
