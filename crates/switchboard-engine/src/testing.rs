//! In-memory collaborators for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use switchboard_core::collaborators::{
    ApprovalNotice, ApprovalNotifier, ContentSummarizer, ContentSummary, SessionStore, UpdateSink,
};
use switchboard_core::errors::CollaboratorError;
use switchboard_core::events::RenderUnit;
use switchboard_core::ids::{AgentSessionId, ChannelId, NoticeKey, UnitId};

/// `SessionStore` over a HashMap, counting writes.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<ChannelId, (AgentSessionId, String)>>,
    writes: Mutex<Vec<(ChannelId, AgentSessionId)>>,
}

impl MemorySessionStore {
    /// Every `set_session` call in order.
    pub fn writes(&self) -> Vec<(ChannelId, AgentSessionId)> {
        self.writes.lock().clone()
    }

    pub fn display_name(&self, channel: &ChannelId) -> Option<String> {
        self.sessions.lock().get(channel).map(|(_, name)| name.clone())
    }
}

impl SessionStore for MemorySessionStore {
    fn get_session(&self, channel: &ChannelId) -> Result<Option<AgentSessionId>, CollaboratorError> {
        Ok(self.sessions.lock().get(channel).map(|(id, _)| id.clone()))
    }

    fn set_session(
        &self,
        channel: &ChannelId,
        session_id: &AgentSessionId,
        display_name: &str,
    ) -> Result<(), CollaboratorError> {
        let _ = self.sessions.lock().insert(
            channel.clone(),
            (session_id.clone(), display_name.to_string()),
        );
        self.writes.lock().push((channel.clone(), session_id.clone()));
        Ok(())
    }

    fn clear_session(&self, channel: &ChannelId) -> Result<(), CollaboratorError> {
        let _ = self.sessions.lock().remove(channel);
        Ok(())
    }
}

/// `UpdateSink` that records every post and update.
#[derive(Default)]
pub struct RecordingSink {
    posted: Mutex<Vec<(ChannelId, RenderUnit)>>,
    updated: Mutex<Vec<(ChannelId, UnitId, RenderUnit)>>,
    fail_posts: AtomicBool,
    notify: Notify,
}

impl RecordingSink {
    pub fn posted(&self) -> Vec<(ChannelId, RenderUnit)> {
        self.posted.lock().clone()
    }

    pub fn updated(&self) -> Vec<(ChannelId, UnitId, RenderUnit)> {
        self.updated.lock().clone()
    }

    pub fn units(&self) -> Vec<RenderUnit> {
        self.posted.lock().iter().map(|(_, u)| u.clone()).collect()
    }

    pub fn terminal_units(&self) -> Vec<RenderUnit> {
        self.units().into_iter().filter(RenderUnit::is_terminal).collect()
    }

    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::Relaxed);
    }

    /// Wait until a terminal unit has been posted, up to `timeout`.
    pub async fn wait_for_terminal(&self, timeout: Duration) -> Option<RenderUnit> {
        let wait = async {
            loop {
                let notified = self.notify.notified();
                if let Some(unit) = self.terminal_units().into_iter().next() {
                    return unit;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }
}

#[async_trait]
impl UpdateSink for RecordingSink {
    async fn post_update(&self, channel: &ChannelId, unit: RenderUnit) -> Result<UnitId, CollaboratorError> {
        if self.fail_posts.load(Ordering::Relaxed) {
            return Err(CollaboratorError::Unavailable("sink offline".into()));
        }
        self.posted.lock().push((channel.clone(), unit));
        self.notify.notify_waiters();
        Ok(UnitId::new())
    }

    async fn update_unit(
        &self,
        channel: &ChannelId,
        unit_id: &UnitId,
        unit: RenderUnit,
    ) -> Result<(), CollaboratorError> {
        self.updated
            .lock()
            .push((channel.clone(), unit_id.clone(), unit));
        Ok(())
    }
}

/// Summarizer returning a fixed summary.
pub struct StaticSummarizer {
    summary: ContentSummary,
}

impl StaticSummarizer {
    pub fn new(short_summary: &str, full_content_ref: &str) -> Self {
        Self {
            summary: ContentSummary {
                short_summary: short_summary.to_string(),
                full_content_ref: full_content_ref.to_string(),
            },
        }
    }
}

#[async_trait]
impl ContentSummarizer for StaticSummarizer {
    async fn summarize(&self, _raw: &str) -> Result<ContentSummary, CollaboratorError> {
        Ok(self.summary.clone())
    }
}

/// `ApprovalNotifier` that records notices under the key they carry.
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeKey, ApprovalNotice)>>,
    fail: AtomicBool,
    notify: Notify,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::Relaxed);
        notifier
    }

    pub fn notices(&self) -> Vec<(NoticeKey, ApprovalNotice)> {
        self.notices.lock().clone()
    }

    /// Wait for the `n`th notice (1-based) and return its key.
    pub async fn wait_for_notice(&self, n: usize) -> NoticeKey {
        loop {
            let notified = self.notify.notified();
            if let Some((key, _)) = self.notices.lock().get(n - 1) {
                return key.clone();
            }
            notified.await;
        }
    }
}

#[async_trait]
impl ApprovalNotifier for RecordingNotifier {
    async fn send_approval_request(&self, notice: &ApprovalNotice) -> Result<NoticeKey, CollaboratorError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err(CollaboratorError::Unavailable("chat offline".into()));
        }
        let key = notice.notice_key.clone();
        self.notices.lock().push((key.clone(), notice.clone()));
        self.notify.notify_waiters();
        Ok(key)
    }
}
