//! Turns decoded protocol messages into chat updates and per-channel state.

use std::sync::Arc;

use tracing::{debug, warn};

use switchboard_core::collaborators::{ContentSummarizer, UpdateSink};
use switchboard_core::events::{RenderUnit, ToolStatus};
use switchboard_core::ids::{AgentSessionId, ChannelId, ToolCallId, UnitId};
use switchboard_core::protocol::{
    AgentMessage, ContentBlock, ResultMessage, SystemMessage, ToolResultContent,
};
use switchboard_core::tools::normalize_input;
use switchboard_core::truncate::first_line_preview;

use crate::registry::{SessionRegistry, ToolCallRecord};

/// The run a message belongs to.
pub struct RouteContext<'a> {
    pub channel: &'a ChannelId,
    pub sink: &'a Arc<dyn UpdateSink>,
    pub display_name: &'a str,
}

/// What the caller should do after a message was routed.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    Continue,
    /// A `result` arrived; the run is over. The completion unit is left to
    /// the caller so it can free the channel before announcing it.
    Finished(RenderUnit),
}

pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
    summarizer: Option<Arc<dyn ContentSummarizer>>,
    large_payload_bytes: usize,
    preview_chars: usize,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<SessionRegistry>,
        summarizer: Option<Arc<dyn ContentSummarizer>>,
        large_payload_bytes: usize,
        preview_chars: usize,
    ) -> Self {
        Self {
            registry,
            summarizer,
            large_payload_bytes,
            preview_chars,
        }
    }

    pub async fn dispatch(&self, ctx: &RouteContext<'_>, message: AgentMessage) -> RouteOutcome {
        debug!(channel_id = %ctx.channel, message_type = message.message_type(), "routing message");
        match message {
            AgentMessage::System(system) => {
                self.on_system(ctx, system).await;
                RouteOutcome::Continue
            }
            AgentMessage::Assistant(assistant) => {
                if let Some(id) = &assistant.session_id {
                    self.persist_session(ctx, id);
                }
                for block in assistant.message.content.blocks() {
                    match block {
                        ContentBlock::Text { text } if !text.trim().is_empty() => {
                            let _ = self.post(ctx, RenderUnit::Text { text: text.clone() }).await;
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            self.on_tool_use(ctx, id, name, input).await;
                        }
                        _ => {}
                    }
                }
                RouteOutcome::Continue
            }
            AgentMessage::User(user) => {
                for block in user.message.content.blocks() {
                    if let ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } = block
                    {
                        self.on_tool_result(ctx, tool_use_id, content, *is_error).await;
                    }
                }
                RouteOutcome::Continue
            }
            AgentMessage::Result(result) => self.on_result(ctx, result),
            AgentMessage::Unknown => RouteOutcome::Continue,
        }
    }

    async fn on_system(&self, ctx: &RouteContext<'_>, system: SystemMessage) {
        if !system.is_init() {
            debug!(channel_id = %ctx.channel, subtype = %system.subtype, "ignoring system message");
            return;
        }
        if let Some(id) = &system.session_id {
            self.persist_session(ctx, id);
        }
        let unit = RenderUnit::SessionStarted {
            cwd: system.cwd.unwrap_or_default(),
            model: system.model.unwrap_or_default(),
            tool_count: system.tools.len(),
            session_id: system.session_id,
        };
        let _ = self.post(ctx, unit).await;
    }

    async fn on_tool_use(
        &self,
        ctx: &RouteContext<'_>,
        id: &ToolCallId,
        name: &str,
        input: &serde_json::Value,
    ) {
        let normalized_input = normalize_input(name, input, self.preview_chars);
        let raw = input.to_string();

        let unit = match &self.summarizer {
            Some(summarizer) if raw.len() > self.large_payload_bytes => {
                match summarizer.summarize(&raw).await {
                    Ok(summary) => RenderUnit::LargeOperation {
                        tool_call_id: id.clone(),
                        tool_name: name.to_string(),
                        summary: summary.short_summary,
                        content_ref: summary.full_content_ref,
                        status: ToolStatus::Running,
                        preview: None,
                    },
                    Err(e) => {
                        warn!(channel_id = %ctx.channel, tool_name = name, error = %e, "summarizer failed, rendering inline");
                        self.inline_tool_unit(id, name, &normalized_input)
                    }
                }
            }
            _ => self.inline_tool_unit(id, name, &normalized_input),
        };

        let unit_id = self.post(ctx, unit.clone()).await;
        self.registry.insert_tool_call(
            ctx.channel,
            id.clone(),
            ToolCallRecord {
                tool_name: name.to_string(),
                normalized_input,
                unit_id,
                unit,
            },
        );
    }

    fn inline_tool_unit(&self, id: &ToolCallId, name: &str, normalized_input: &str) -> RenderUnit {
        RenderUnit::ToolCall {
            tool_call_id: id.clone(),
            tool_name: name.to_string(),
            input: normalized_input.to_string(),
            status: ToolStatus::Running,
            preview: None,
        }
    }

    async fn on_tool_result(
        &self,
        ctx: &RouteContext<'_>,
        tool_use_id: &ToolCallId,
        content: &ToolResultContent,
        is_error: bool,
    ) {
        let Some(record) = self.registry.take_tool_call(ctx.channel, tool_use_id) else {
            debug!(channel_id = %ctx.channel, tool_call_id = %tool_use_id, "tool result without a matching call");
            return;
        };
        let Some(unit_id) = record.unit_id else {
            return;
        };
        let preview = first_line_preview(&content.as_text(), self.preview_chars);
        let updated = record.unit.with_tool_outcome(is_error, preview);
        if let Err(e) = ctx.sink.update_unit(ctx.channel, &unit_id, updated).await {
            warn!(channel_id = %ctx.channel, tool_name = %record.tool_name, error = %e, "failed to update tool unit");
        }
    }

    fn on_result(&self, ctx: &RouteContext<'_>, result: ResultMessage) -> RouteOutcome {
        if let Some(id) = &result.session_id {
            self.persist_session(ctx, id);
        }
        let unit = if result.is_success() {
            RenderUnit::Completed {
                num_turns: result.num_turns,
                result: result.result,
                session_id: result.session_id,
            }
        } else {
            RenderUnit::Failed {
                subtype: result.subtype,
                num_turns: result.num_turns,
            }
        };
        RouteOutcome::Finished(unit)
    }

    fn persist_session(&self, ctx: &RouteContext<'_>, session_id: &AgentSessionId) {
        self.registry.note_session(ctx.channel, session_id);
        if let Err(e) = self
            .registry
            .store()
            .set_session(ctx.channel, session_id, ctx.display_name)
        {
            warn!(channel_id = %ctx.channel, error = %e, kind = e.error_kind(), "failed to persist session id");
        }
    }

    async fn post(&self, ctx: &RouteContext<'_>, unit: RenderUnit) -> Option<UnitId> {
        let kind = unit.kind();
        match ctx.sink.post_update(ctx.channel, unit).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(channel_id = %ctx.channel, kind, error = %e, "failed to post update");
                None
            }
        }
    }
}
