use std::path::PathBuf;
use std::time::Duration;

use switchboard_settings::{DefaultDecision, SwitchboardSettings};

/// Bytes of stderr kept for a failure report.
pub const STDERR_TAIL_BYTES: usize = 2000;

/// Runtime configuration for the engine, resolved from settings.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub program: String,
    pub extra_args: Vec<String>,
    pub base_dir: PathBuf,
    pub watchdog: Duration,
    pub large_payload_bytes: usize,
    pub preview_chars: usize,
    pub permission_prompt_tool: Option<String>,
    pub mcp_config: Option<String>,
    /// Where the agent's permission hook posts; exported to the child env.
    pub hook_url: Option<String>,
    pub approvals: ApprovalConfig,
}

#[derive(Clone, Debug)]
pub struct ApprovalConfig {
    pub timeout: Duration,
    /// Decision when the human does not answer in time.
    pub allow_on_timeout: bool,
    /// Decision for risky tools when no notification can be delivered.
    pub allow_on_fallback: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            allow_on_timeout: false,
            allow_on_fallback: false,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_settings(&SwitchboardSettings::default())
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &SwitchboardSettings) -> Self {
        let agent = &settings.agent;
        let server = &settings.server;
        Self {
            program: agent.program.clone(),
            extra_args: agent.extra_args.clone(),
            base_dir: PathBuf::from(&agent.base_dir),
            watchdog: Duration::from_secs(agent.watchdog_secs),
            large_payload_bytes: agent.large_payload_bytes,
            preview_chars: agent.preview_chars,
            permission_prompt_tool: agent.permission_prompt_tool.clone(),
            mcp_config: agent.mcp_config.clone(),
            hook_url: Some(format!(
                "http://{}:{}/hooks/permission",
                server.host, server.port
            )),
            approvals: ApprovalConfig {
                timeout: Duration::from_secs(settings.approvals.timeout_secs),
                allow_on_timeout: settings.approvals.timeout_decision == DefaultDecision::Allow,
                allow_on_fallback: settings.approvals.fallback_decision == DefaultDecision::Allow,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_from_settings() {
        let config = EngineConfig::default();
        assert_eq!(config.program, "claude");
        assert_eq!(config.watchdog, Duration::from_secs(300));
        assert_eq!(config.approvals.timeout, Duration::from_secs(30));
        assert!(!config.approvals.allow_on_timeout);
        assert!(!config.approvals.allow_on_fallback);
        assert_eq!(
            config.hook_url.as_deref(),
            Some("http://127.0.0.1:9191/hooks/permission")
        );
    }

    #[test]
    fn allow_decisions_carry_over() {
        let mut settings = SwitchboardSettings::default();
        settings.approvals.timeout_decision = DefaultDecision::Allow;
        settings.agent.watchdog_secs = 5;
        let config = EngineConfig::from_settings(&settings);
        assert!(config.approvals.allow_on_timeout);
        assert_eq!(config.watchdog, Duration::from_secs(5));
    }
}
