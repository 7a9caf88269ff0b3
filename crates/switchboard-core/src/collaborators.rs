//! Interfaces to the outside world the orchestrator depends on.
//!
//! The chat platform, the persistence backend and the summarizer for large
//! payloads all live behind these traits so the engine can be driven from an
//! HTTP surface, a bot, or a test harness alike.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::CollaboratorError;
use crate::events::RenderUnit;
use crate::ids::{AgentSessionId, ApprovalId, ChannelId, NoticeKey, UnitId};

/// Remembers the agent session id per channel so conversations resume.
/// Last write wins; no transactional guarantees.
pub trait SessionStore: Send + Sync {
    fn get_session(&self, channel: &ChannelId) -> Result<Option<AgentSessionId>, CollaboratorError>;
    fn set_session(
        &self,
        channel: &ChannelId,
        session_id: &AgentSessionId,
        display_name: &str,
    ) -> Result<(), CollaboratorError>;
    fn clear_session(&self, channel: &ChannelId) -> Result<(), CollaboratorError>;
}

/// Where rendered progress goes. Fire-and-forget from the engine's side.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn post_update(&self, channel: &ChannelId, unit: RenderUnit) -> Result<UnitId, CollaboratorError>;
    async fn update_unit(
        &self,
        channel: &ChannelId,
        unit_id: &UnitId,
        unit: RenderUnit,
    ) -> Result<(), CollaboratorError>;
}

/// Result of summarizing an oversized payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSummary {
    pub short_summary: String,
    /// Opaque handle to the full content (attachment id, paste URL, ...).
    pub full_content_ref: String,
}

#[async_trait]
pub trait ContentSummarizer: Send + Sync {
    async fn summarize(&self, raw: &str) -> Result<ContentSummary, CollaboratorError>;
}

/// Everything a human needs to decide on a tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApprovalNotice {
    pub request_id: ApprovalId,
    /// Already registered when the notice goes out, so an answer may arrive
    /// before delivery returns.
    pub notice_key: NoticeKey,
    pub channel_id: ChannelId,
    pub requester: Option<String>,
    pub tool_name: String,
    pub input: serde_json::Value,
    /// Message the notice should be attached to, if any.
    pub pivot: Option<UnitId>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

/// Delivers approval requests to a human. Answers carrying `notice.notice_key`
/// resolve the request; a transport that assigns its own key returns it and
/// that key resolves the request too.
#[async_trait]
pub trait ApprovalNotifier: Send + Sync {
    async fn send_approval_request(&self, notice: &ApprovalNotice) -> Result<NoticeKey, CollaboratorError>;
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_notice_serializes_timeout_as_seconds() {
        let notice = ApprovalNotice {
            request_id: ApprovalId::from_raw("perm_1"),
            notice_key: NoticeKey::from_raw("notice_1"),
            channel_id: ChannelId::from_raw("C1"),
            requester: Some("alice".into()),
            tool_name: "Bash".into(),
            input: serde_json::json!({"command": "rm -rf target"}),
            pivot: None,
            timeout: Duration::from_secs(30),
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["timeout"], 30);
        assert_eq!(json["request_id"], "perm_1");
        assert_eq!(json["notice_key"], "notice_1");

        let back: ApprovalNotice = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Duration::from_secs(30));
    }
}
