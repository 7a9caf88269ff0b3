//! Ties the engine together: reserve a channel, launch the agent, pump its
//! output through the router, and report how the run ended.
//!
//! Every run ends with exactly one terminal unit on its sink. Whoever vacates
//! the slot first owns that unit: the pump for results, exits and timeouts,
//! and `stop`/`reset`/replacement for kills. The slot is always vacated
//! before the terminal unit is posted, so a sink that sees completion can
//! submit the next prompt straight away.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use switchboard_core::collaborators::{
    ApprovalNotifier, ContentSummarizer, SessionStore, UpdateSink,
};
use switchboard_core::errors::DecodeError;
use switchboard_core::events::RenderUnit;
use switchboard_core::ids::{AgentSessionId, ChannelId};
use switchboard_core::protocol::AgentMessage;
use switchboard_core::truncate::tail_bytes;

use crate::config::{EngineConfig, STDERR_TAIL_BYTES};
use crate::error::EngineError;
use crate::invocation;
use crate::permissions::{ApprovalDecision, ApprovalOrigin, DecisionReason, PermissionBroker};
use crate::registry::{Reservation, SessionRegistry};
use crate::router::{MessageRouter, RouteContext, RouteOutcome};
use crate::supervisor::{ProcessEvent, ProcessSupervisor};

/// One prompt for one channel.
pub struct RunRequest {
    pub channel: ChannelId,
    pub prompt: String,
    /// Chat user who sent the prompt; only they may answer its approvals.
    pub requester: Option<String>,
    /// Working folder under the base directory; defaults to the channel id.
    pub folder: Option<String>,
    pub display_name: Option<String>,
    pub sink: Arc<dyn UpdateSink>,
    /// Kill a live run instead of rejecting the prompt.
    pub replace: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTicket {
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub active: bool,
    pub session_id: Option<AgentSessionId>,
    pub pid: Option<u32>,
    pub open_tool_calls: usize,
    pub pending_approvals: usize,
}

#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    registry: Arc<SessionRegistry>,
    router: Arc<MessageRouter>,
    broker: PermissionBroker,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn SessionStore>,
        summarizer: Option<Arc<dyn ContentSummarizer>>,
        notifier: Option<Arc<dyn ApprovalNotifier>>,
    ) -> Self {
        let registry = Arc::new(SessionRegistry::new(store));
        let router = Arc::new(MessageRouter::new(
            Arc::clone(&registry),
            summarizer,
            config.large_payload_bytes,
            config.preview_chars,
        ));
        let broker = PermissionBroker::new(notifier, config.approvals.clone());
        Self {
            config: Arc::new(config),
            registry,
            router,
            broker,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &PermissionBroker {
        &self.broker
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start a run. Fails with `ChannelBusy` when the channel already has one
    /// (unless `replace` is set) and with `Spawn` when the agent cannot be
    /// launched; a spawn failure is also posted to the sink.
    pub async fn submit(&self, request: RunRequest) -> Result<RunTicket, EngineError> {
        let RunRequest {
            channel,
            prompt,
            requester,
            folder,
            display_name,
            sink,
            replace,
        } = request;
        let display_name = display_name.unwrap_or_else(|| channel.to_string());
        let resume = match self.registry.store().get_session(&channel) {
            Ok(id) => id,
            Err(e) => {
                warn!(channel_id = %channel, error = %e, kind = e.error_kind(), "session lookup failed, starting fresh");
                None
            }
        };
        let reservation = Reservation {
            session_id: resume.clone(),
            sink: Arc::clone(&sink),
            requester,
            display_name: display_name.clone(),
        };

        let generation = if replace {
            let (generation, previous) = self.registry.reserve(&channel, reservation);
            if let Some(previous) = previous {
                let _ = self.broker.cancel_channel(&channel);
                post(&channel, &previous.sink, RenderUnit::Stopped).await;
            }
            generation
        } else {
            self.registry.try_reserve(&channel, reservation)?
        };

        let run = Run {
            channel: channel.clone(),
            generation,
            sink,
            display_name,
            program: self.config.program.clone(),
            registry: Arc::clone(&self.registry),
            router: Arc::clone(&self.router),
        };

        let cwd = invocation::resolve_folder(&self.config.base_dir, &channel, folder.as_deref());
        let spawned = invocation::build(&self.config, &channel, cwd, &prompt, resume.as_ref())
            .and_then(|inv| ProcessSupervisor::spawn(&inv, self.config.watchdog));
        let (handle, events) = match spawned {
            Ok(spawned) => spawned,
            Err(e) => {
                error!(channel_id = %channel, generation, error = %e, "agent failed to start");
                run.finish(RenderUnit::ProcessError {
                    message: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        info!(
            channel_id = %channel,
            generation,
            pid = ?handle.pid,
            resumed = resume.is_some(),
            "agent started"
        );
        if self.registry.attach(&channel, generation, handle) {
            let _ = tokio::spawn(run.pump(events));
        }
        Ok(RunTicket { generation })
    }

    /// Kill the channel's run. The session id survives for the next prompt.
    pub async fn stop(&self, channel: &ChannelId) -> bool {
        let Some(slot) = self.registry.kill(channel) else {
            return false;
        };
        let _ = self.broker.cancel_channel(channel);
        post(channel, &slot.sink, RenderUnit::Stopped).await;
        true
    }

    /// Kill the channel's run and forget its session. Returns whether a run
    /// was live.
    pub async fn reset(&self, channel: &ChannelId) -> bool {
        let slot = self.registry.clear(channel);
        let cancelled = self.broker.cancel_channel(channel);
        if cancelled > 0 {
            debug!(channel_id = %channel, cancelled, "pending approvals cancelled");
        }
        match slot {
            Some(slot) => {
                post(channel, &slot.sink, RenderUnit::Stopped).await;
                true
            }
            None => false,
        }
    }

    pub fn has_active(&self, channel: &ChannelId) -> bool {
        self.registry.has_active(channel)
    }

    pub fn state(&self, channel: &ChannelId) -> ChannelState {
        let slot = self.registry.slot(channel);
        let session_id = slot
            .as_ref()
            .and_then(|s| s.reserved_session_id.clone())
            .or_else(|| self.registry.store().get_session(channel).ok().flatten());
        ChannelState {
            active: slot.is_some(),
            session_id,
            pid: slot.and_then(|s| s.handle).and_then(|h| h.pid),
            open_tool_calls: self.registry.open_tool_calls(channel),
            pending_approvals: self
                .broker
                .pending()
                .iter()
                .filter(|p| &p.channel_id == channel)
                .count(),
        }
    }

    /// Permission hook entry point for the agent running in `channel`. A
    /// channel without a run gets a denial.
    pub async fn request_permission(
        &self,
        channel: &ChannelId,
        tool_name: &str,
        input: Value,
    ) -> Result<ApprovalDecision, EngineError> {
        let Some(slot) = self.registry.slot(channel) else {
            warn!(channel_id = %channel, tool_name, "permission request for a channel with no run");
            return Ok(ApprovalDecision::new(false, DecisionReason::Cancelled));
        };
        let origin = ApprovalOrigin {
            channel_id: channel.clone(),
            requester: slot.requester,
            pivot: None,
            sink: Some(slot.sink),
        };
        Ok(self.broker.request_approval(tool_name, input, origin).await?)
    }

    /// Kill every run and reject every pending approval.
    pub async fn shutdown(&self) -> usize {
        let killed = self.registry.kill_all();
        self.broker.shutdown();
        for (channel, slot) in &killed {
            post(channel, &slot.sink, RenderUnit::Stopped).await;
        }
        info!(killed = killed.len(), "orchestrator shut down");
        killed.len()
    }
}

async fn post(channel: &ChannelId, sink: &Arc<dyn UpdateSink>, unit: RenderUnit) {
    let kind = unit.kind();
    if let Err(e) = sink.post_update(channel, unit).await {
        warn!(channel_id = %channel, kind, error = %e, "failed to post update");
    }
}

/// The pump's view of one run.
struct Run {
    channel: ChannelId,
    generation: u64,
    sink: Arc<dyn UpdateSink>,
    display_name: String,
    program: String,
    registry: Arc<SessionRegistry>,
    router: Arc<MessageRouter>,
}

impl Run {
    /// Vacate the slot and announce how the run ended. A run that lost its
    /// slot to a kill or a replacement stays silent.
    async fn finish(&self, unit: RenderUnit) {
        if self.registry.release(&self.channel, self.generation) {
            info!(channel_id = %self.channel, generation = self.generation, outcome = unit.kind(), "run finished");
            post(&self.channel, &self.sink, unit).await;
        } else {
            debug!(channel_id = %self.channel, generation = self.generation, "run superseded, not reporting");
        }
    }

    async fn route(&self, decoded: Result<AgentMessage, DecodeError>) -> bool {
        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                warn!(channel_id = %self.channel, line = %e.line_preview, error = %e.message, "undecodable agent output");
                return false;
            }
        };
        let ctx = RouteContext {
            channel: &self.channel,
            sink: &self.sink,
            display_name: &self.display_name,
        };
        match self.router.dispatch(&ctx, message).await {
            RouteOutcome::Continue => false,
            RouteOutcome::Finished(unit) => {
                self.finish(unit).await;
                true
            }
        }
    }

    async fn pump(self, mut events: mpsc::UnboundedReceiver<ProcessEvent>) {
        let mut stderr = String::new();
        while let Some(event) = events.recv().await {
            match event {
                ProcessEvent::Stdout(chunk) => {
                    for decoded in self.registry.decode(&self.channel, self.generation, &chunk) {
                        if self.route(decoded).await {
                            return;
                        }
                    }
                }
                ProcessEvent::Stderr(line) => {
                    debug!(channel_id = %self.channel, line = %line, "agent stderr");
                    stderr.push_str(&line);
                    stderr.push('\n');
                    if stderr.len() > STDERR_TAIL_BYTES * 2 {
                        stderr = tail_bytes(&stderr, STDERR_TAIL_BYTES);
                    }
                }
                ProcessEvent::TimedOut(after) => {
                    self.finish(RenderUnit::TimedOut {
                        after_secs: after.as_secs(),
                    })
                    .await;
                    return;
                }
                ProcessEvent::Exited { killed: true, .. } => {
                    let _ = self.registry.release(&self.channel, self.generation);
                    return;
                }
                exit @ ProcessEvent::Exited { .. } => {
                    if let Some(decoded) = self.registry.finish_decode(&self.channel, self.generation) {
                        if self.route(decoded).await {
                            return;
                        }
                    }
                    self.finish(self.exit_unit(&exit, &stderr)).await;
                    return;
                }
            }
        }
        let _ = self.registry.release(&self.channel, self.generation);
    }

    /// Terminal unit for an exit without a `result` line.
    fn exit_unit(&self, exit: &ProcessEvent, stderr: &str) -> RenderUnit {
        if exit.is_command_not_found() {
            return RenderUnit::ProcessError {
                message: format!("agent program `{}` not found", self.program),
            };
        }
        if exit.is_failure_exit() {
            let code = match exit {
                ProcessEvent::Exited { code, .. } => *code,
                _ => None,
            };
            let tail = tail_bytes(stderr.trim_end(), STDERR_TAIL_BYTES);
            return RenderUnit::ProcessFailed {
                code,
                stderr: (!tail.is_empty()).then_some(tail),
            };
        }
        RenderUnit::Completed {
            num_turns: 0,
            result: None,
            session_id: self
                .registry
                .slot(&self.channel)
                .and_then(|s| s.reserved_session_id),
        }
    }
}
