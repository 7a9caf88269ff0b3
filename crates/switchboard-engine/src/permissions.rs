//! Tool permission brokering.
//!
//! Safe tools pass straight through. Everything else becomes a pending
//! approval: a notice goes out to a human, and the first of {human answer,
//! deadline, channel clear, shutdown} decides it. Each request moves from
//! `Pending` to exactly one terminal state and is then forgotten.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use switchboard_core::collaborators::{ApprovalNotice, ApprovalNotifier, UpdateSink};
use switchboard_core::events::{ApprovalOutcome, RenderUnit};
use switchboard_core::ids::{ApprovalId, ChannelId, NoticeKey, UnitId};
use switchboard_core::tools::{classify, ToolRisk};

use crate::config::ApprovalConfig;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("permission broker shut down")]
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    SafeTool,
    UserApproved,
    UserDenied,
    TimedOut,
    /// No notice could be delivered; the static policy decided.
    Fallback,
    /// The channel was cleared while waiting.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
}

impl ApprovalDecision {
    pub(crate) fn new(allowed: bool, reason: DecisionReason) -> Self {
        Self { allowed, reason }
    }
}

/// Result of an external answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalOutcome {
    Resolved,
    /// Unknown, already decided, or expired.
    NotFound,
    /// Only the user who triggered the run may answer.
    WrongResponder,
}

/// Who is asking, and where to report the answer.
#[derive(Clone)]
pub struct ApprovalOrigin {
    pub channel_id: ChannelId,
    pub requester: Option<String>,
    pub pivot: Option<UnitId>,
    pub sink: Option<Arc<dyn UpdateSink>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApprovalState {
    Pending { deadline: Instant },
    Approved,
    Denied,
    TimedOut,
}

impl ApprovalState {
    /// The only transition: `Pending` to a terminal state, once.
    fn finish(&mut self, to: ApprovalState) -> bool {
        debug_assert!(!matches!(to, ApprovalState::Pending { .. }));
        if matches!(self, ApprovalState::Pending { .. }) {
            *self = to;
            true
        } else {
            false
        }
    }
}

struct PendingApproval {
    tool_name: String,
    input: Value,
    origin: ApprovalOrigin,
    notice_key: NoticeKey,
    /// Key a transport assigned instead of `notice_key`, if any.
    transport_key: Option<NoticeKey>,
    state: ApprovalState,
    responder: oneshot::Sender<ApprovalDecision>,
    timer: Option<JoinHandle<()>>,
}

/// Snapshot of a pending request for listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApprovalInfo {
    pub request_id: ApprovalId,
    pub channel_id: ChannelId,
    pub tool_name: String,
    pub input: Value,
    pub requester: Option<String>,
    pub notice_key: NoticeKey,
    pub remaining_secs: u64,
}

struct BrokerInner {
    pending: Mutex<HashMap<ApprovalId, PendingApproval>>,
    notices: Mutex<HashMap<NoticeKey, ApprovalId>>,
    notifier: Option<Arc<dyn ApprovalNotifier>>,
    config: ApprovalConfig,
    shut_down: AtomicBool,
}

#[derive(Clone)]
pub struct PermissionBroker {
    inner: Arc<BrokerInner>,
}

impl PermissionBroker {
    pub fn new(notifier: Option<Arc<dyn ApprovalNotifier>>, config: ApprovalConfig) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                pending: Mutex::new(HashMap::new()),
                notices: Mutex::new(HashMap::new()),
                notifier,
                config,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    /// Decide whether `tool_name` may run with `input`. Waits for a human
    /// when the tool is not known to be safe.
    pub async fn request_approval(
        &self,
        tool_name: &str,
        input: Value,
        origin: ApprovalOrigin,
    ) -> Result<ApprovalDecision, ApprovalError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(ApprovalError::Shutdown);
        }
        if classify(tool_name) == ToolRisk::Safe {
            debug!(tool_name, "safe tool auto-approved");
            return Ok(ApprovalDecision::new(true, DecisionReason::SafeTool));
        }
        let Some(notifier) = self.inner.notifier.clone() else {
            return Ok(self.fallback(tool_name));
        };

        let request_id = ApprovalId::new();
        let notice_key = NoticeKey::new();
        let timeout = self.inner.config.timeout;
        let (tx, rx) = oneshot::channel();
        let notice = ApprovalNotice {
            request_id: request_id.clone(),
            notice_key: notice_key.clone(),
            channel_id: origin.channel_id.clone(),
            requester: origin.requester.clone(),
            tool_name: tool_name.to_string(),
            input: input.clone(),
            pivot: origin.pivot.clone(),
            timeout,
        };

        {
            let mut pending = self.inner.pending.lock();
            if self.inner.shut_down.load(Ordering::Acquire) {
                return Err(ApprovalError::Shutdown);
            }
            let _ = pending.insert(
                request_id.clone(),
                PendingApproval {
                    tool_name: tool_name.to_string(),
                    input,
                    origin,
                    notice_key: notice_key.clone(),
                    transport_key: None,
                    state: ApprovalState::Pending {
                        deadline: Instant::now() + timeout,
                    },
                    responder: tx,
                    timer: None,
                },
            );
            let _ = self.inner.notices.lock().insert(notice_key.clone(), request_id.clone());
        }
        self.arm_timer(&request_id);
        info!(request_id = %request_id, tool_name, "approval requested");

        match notifier.send_approval_request(&notice).await {
            Ok(key) if key == notice_key => {}
            Ok(key) => {
                let mut pending = self.inner.pending.lock();
                if let Some(record) = pending.get_mut(&request_id) {
                    record.transport_key = Some(key.clone());
                    let _ = self.inner.notices.lock().insert(key, request_id.clone());
                }
            }
            Err(e) => {
                warn!(request_id = %request_id, tool_name, error = %e, kind = e.error_kind(), "approval notice failed, using fallback");
                if let Some(record) = self.inner.take(&request_id) {
                    record.abort_timer();
                    return Ok(self.fallback(tool_name));
                }
                // decided while the send was in flight; the answer is in `rx`
            }
        }

        rx.await.map_err(|_| ApprovalError::Shutdown)
    }

    /// A human answered the notice identified by `notice_key`.
    pub fn resolve_by_external_signal(
        &self,
        notice_key: &NoticeKey,
        responder: &str,
        approved: bool,
    ) -> SignalOutcome {
        let request_id = self.inner.notices.lock().get(notice_key).cloned();
        match request_id {
            Some(id) => self.resolve(&id, responder, approved),
            None => {
                debug!(notice_key = %notice_key, "signal for unknown notice");
                SignalOutcome::NotFound
            }
        }
    }

    /// Answer a request by id. Late and duplicate answers are no-ops.
    pub fn resolve(&self, request_id: &ApprovalId, responder: &str, approved: bool) -> SignalOutcome {
        {
            let pending = self.inner.pending.lock();
            let Some(record) = pending.get(request_id) else {
                debug!(request_id = %request_id, "signal for unknown or finished request");
                return SignalOutcome::NotFound;
            };
            if let Some(requester) = &record.origin.requester {
                if requester != responder {
                    warn!(request_id = %request_id, responder, "approval answered by someone else, ignoring");
                    return SignalOutcome::WrongResponder;
                }
            }
        }
        let (state, reason) = if approved {
            (ApprovalState::Approved, DecisionReason::UserApproved)
        } else {
            (ApprovalState::Denied, DecisionReason::UserDenied)
        };
        if self
            .inner
            .finish(request_id, state, ApprovalDecision::new(approved, reason), true)
        {
            SignalOutcome::Resolved
        } else {
            SignalOutcome::NotFound
        }
    }

    /// Deny everything pending for `channel`. Returns how many were cancelled.
    pub fn cancel_channel(&self, channel: &ChannelId) -> usize {
        let ids: Vec<ApprovalId> = self
            .inner
            .pending
            .lock()
            .iter()
            .filter(|(_, r)| &r.origin.channel_id == channel)
            .map(|(id, _)| id.clone())
            .collect();
        ids.iter()
            .filter(|id| {
                self.inner.finish(
                    id,
                    ApprovalState::Denied,
                    ApprovalDecision::new(false, DecisionReason::Cancelled),
                    true,
                )
            })
            .count()
    }

    /// Reject every pending request; waiting callers get `Shutdown`.
    pub fn shutdown(&self) {
        self.inner.shut_down.store(true, Ordering::Release);
        let drained: Vec<PendingApproval> = self.inner.pending.lock().drain().map(|(_, r)| r).collect();
        self.inner.notices.lock().clear();
        if !drained.is_empty() {
            info!(count = drained.len(), "rejecting pending approvals on shutdown");
        }
        for record in drained {
            record.abort_timer();
            // dropping the responder wakes the caller with Shutdown
        }
    }

    pub fn pending(&self) -> Vec<PendingApprovalInfo> {
        let now = Instant::now();
        self.inner
            .pending
            .lock()
            .iter()
            .map(|(id, r)| PendingApprovalInfo {
                request_id: id.clone(),
                channel_id: r.origin.channel_id.clone(),
                tool_name: r.tool_name.clone(),
                input: r.input.clone(),
                requester: r.origin.requester.clone(),
                notice_key: r.transport_key.clone().unwrap_or_else(|| r.notice_key.clone()),
                remaining_secs: match r.state {
                    ApprovalState::Pending { deadline } => {
                        deadline.saturating_duration_since(now).as_secs()
                    }
                    _ => 0,
                },
            })
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    fn fallback(&self, tool_name: &str) -> ApprovalDecision {
        let allowed = self.inner.config.allow_on_fallback;
        info!(tool_name, allowed, "no approval channel, static policy applied");
        ApprovalDecision::new(allowed, DecisionReason::Fallback)
    }

    fn arm_timer(&self, request_id: &ApprovalId) {
        let weak = Arc::downgrade(&self.inner);
        let id = request_id.clone();
        let timeout = self.inner.config.timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                let allowed = inner.config.allow_on_timeout;
                if inner.finish(
                    &id,
                    ApprovalState::TimedOut,
                    ApprovalDecision::new(allowed, DecisionReason::TimedOut),
                    false,
                ) {
                    warn!(request_id = %id, allowed, "approval timed out");
                }
            }
        });
        let mut pending = self.inner.pending.lock();
        match pending.get_mut(request_id) {
            Some(record) => record.timer = Some(timer),
            None => timer.abort(),
        }
    }
}

impl BrokerInner {
    fn take(&self, id: &ApprovalId) -> Option<PendingApproval> {
        let record = self.pending.lock().remove(id)?;
        let mut notices = self.notices.lock();
        let _ = notices.remove(&record.notice_key);
        if let Some(key) = &record.transport_key {
            let _ = notices.remove(key);
        }
        drop(notices);
        Some(record)
    }

    /// Move `id` to `state` and answer the caller. False if it was already
    /// decided.
    fn finish(
        &self,
        id: &ApprovalId,
        state: ApprovalState,
        decision: ApprovalDecision,
        abort_timer: bool,
    ) -> bool {
        let Some(mut record) = self.take(id) else {
            return false;
        };
        if !record.state.finish(state) {
            return false;
        }
        if abort_timer {
            record.abort_timer();
        }
        info!(request_id = %id, tool_name = %record.tool_name, allowed = decision.allowed, reason = ?decision.reason, "approval decided");

        if let Some(sink) = record.origin.sink.clone() {
            let channel = record.origin.channel_id.clone();
            let unit = RenderUnit::ApprovalResolved {
                request_id: id.clone(),
                tool_name: record.tool_name.clone(),
                outcome: match state {
                    ApprovalState::Approved => ApprovalOutcome::Approved,
                    ApprovalState::TimedOut => ApprovalOutcome::TimedOut,
                    _ => ApprovalOutcome::Denied,
                },
            };
            let _ = tokio::spawn(async move {
                if let Err(e) = sink.post_update(&channel, unit).await {
                    warn!(channel_id = %channel, error = %e, "failed to post approval outcome");
                }
            });
        }

        if record.responder.send(decision).is_err() {
            debug!(request_id = %id, "approval caller went away");
        }
        true
    }
}

impl PendingApproval {
    fn abort_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}
