//! Builds the shell command line that launches the agent for one prompt.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use switchboard_core::ids::{AgentSessionId, ChannelId};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Env var naming the channel a hook callback belongs to.
pub const CHANNEL_ENV: &str = "SWITCHBOARD_CHANNEL_ID";
/// Env var carrying the permission hook URL.
pub const HOOK_URL_ENV: &str = "SWITCHBOARD_HOOK_URL";

/// Everything needed to start one run.
#[derive(Clone, Debug)]
pub struct Invocation {
    pub command_line: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

fn quote(arg: &str) -> Result<Cow<'_, str>, EngineError> {
    shlex::try_quote(arg).map_err(|e| EngineError::Spawn(format!("cannot quote argument: {e}")))
}

/// Working directory for a channel: `base_dir/<folder or channel id>`.
pub fn resolve_folder(base_dir: &Path, channel: &ChannelId, folder: Option<&str>) -> PathBuf {
    let name = folder
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .unwrap_or(channel.as_str());
    base_dir.join(name)
}

/// Assemble the command line. The working directory must already exist.
pub fn build(
    config: &EngineConfig,
    channel: &ChannelId,
    cwd: PathBuf,
    prompt: &str,
    resume: Option<&AgentSessionId>,
) -> Result<Invocation, EngineError> {
    if !cwd.is_dir() {
        return Err(EngineError::Spawn(format!(
            "working directory {} does not exist",
            cwd.display()
        )));
    }

    // The program may carry its own flags (e.g. `node agent.js`), so it is
    // inserted verbatim.
    let mut parts: Vec<String> = vec![config.program.clone()];
    parts.push("-p".into());
    parts.push(quote(prompt)?.into_owned());
    if let Some(id) = resume {
        parts.push("--resume".into());
        parts.push(quote(id.as_str())?.into_owned());
    }
    parts.extend(
        ["--output-format", "stream-json", "--verbose"]
            .into_iter()
            .map(String::from),
    );
    if let Some(tool) = &config.permission_prompt_tool {
        parts.push("--permission-prompt-tool".into());
        parts.push(quote(tool)?.into_owned());
    }
    if let Some(mcp) = &config.mcp_config {
        parts.push("--mcp-config".into());
        parts.push(quote(mcp)?.into_owned());
    }
    for arg in &config.extra_args {
        parts.push(quote(arg)?.into_owned());
    }

    let mut env = vec![(CHANNEL_ENV.to_string(), channel.to_string())];
    if let Some(url) = &config.hook_url {
        env.push((HOOK_URL_ENV.to_string(), url.clone()));
    }

    Ok(Invocation {
        command_line: parts.join(" "),
        cwd,
        env,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig {
            hook_url: Some("http://127.0.0.1:9191/hooks/permission".into()),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn folder_falls_back_to_channel_id() {
        let base = Path::new("/srv/work");
        let chan = ChannelId::from_raw("C42");
        assert_eq!(resolve_folder(base, &chan, None), PathBuf::from("/srv/work/C42"));
        assert_eq!(resolve_folder(base, &chan, Some("  ")), PathBuf::from("/srv/work/C42"));
        assert_eq!(resolve_folder(base, &chan, Some("api")), PathBuf::from("/srv/work/api"));
    }

    #[test]
    fn prompt_is_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let inv = build(
            &config(),
            &ChannelId::from_raw("C1"),
            dir.path().to_path_buf(),
            "it's $(rm -rf /)",
            None,
        )
        .unwrap();
        let words = shlex::split(&inv.command_line).unwrap();
        assert_eq!(words[0], "claude");
        assert_eq!(words[1], "-p");
        assert_eq!(words[2], "it's $(rm -rf /)");
        assert!(words.contains(&"stream-json".to_string()));
        assert!(!words.contains(&"--resume".to_string()));
    }

    #[test]
    fn resume_and_permission_flags() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.permission_prompt_tool = Some("mcp__switchboard__approve".into());
        cfg.mcp_config = Some("/etc/switchboard/mcp.json".into());
        cfg.extra_args = vec!["--model".into(), "opus".into()];
        let inv = build(
            &cfg,
            &ChannelId::from_raw("C1"),
            dir.path().to_path_buf(),
            "hi",
            Some(&AgentSessionId::from_raw("sess-1")),
        )
        .unwrap();
        let words = shlex::split(&inv.command_line).unwrap();
        let after = |flag: &str| {
            let i = words.iter().position(|w| w == flag).unwrap();
            words[i + 1].clone()
        };
        assert_eq!(after("--resume"), "sess-1");
        assert_eq!(after("--permission-prompt-tool"), "mcp__switchboard__approve");
        assert_eq!(after("--mcp-config"), "/etc/switchboard/mcp.json");
        assert_eq!(words.last().map(String::as_str), Some("opus"));
        assert!(inv
            .env
            .iter()
            .any(|(k, v)| k == CHANNEL_ENV && v == "C1"));
        assert!(inv.env.iter().any(|(k, _)| k == HOOK_URL_ENV));
    }

    #[test]
    fn missing_directory_is_a_spawn_error() {
        let err = build(
            &config(),
            &ChannelId::from_raw("C1"),
            PathBuf::from("/definitely/not/here"),
            "hi",
            None,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Spawn(_)));
    }
}
