//! Per-channel slot machine: at most one live agent process per channel.
//!
//! Everything a channel owns (its process slot, the partial-line buffer and
//! the open tool calls) lives in one [`ChannelRecord`] so a clear cannot leave
//! a sibling map stale. DashMap guards are never held across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_core::collaborators::{SessionStore, UpdateSink};
use switchboard_core::errors::DecodeError;
use switchboard_core::events::RenderUnit;
use switchboard_core::ids::{AgentSessionId, ChannelId, ToolCallId, UnitId};
use switchboard_core::protocol::AgentMessage;

use crate::decoder::StreamBuffer;
use crate::error::EngineError;

/// Handle to a spawned process. Cancelling the token kills it.
#[derive(Clone, Debug)]
pub struct ProcessHandle {
    pub cancel: CancellationToken,
    pub pid: Option<u32>,
}

impl ProcessHandle {
    pub fn kill(&self) {
        self.cancel.cancel();
    }
}

/// What a reservation needs to know about the run it stands for.
#[derive(Clone)]
pub struct Reservation {
    pub session_id: Option<AgentSessionId>,
    pub sink: Arc<dyn UpdateSink>,
    pub requester: Option<String>,
    pub display_name: String,
}

/// A channel's claim on its single process. Installed before the spawn with
/// no handle; the handle is attached once the process is up.
#[derive(Clone)]
pub struct ProcessSlot {
    pub generation: u64,
    pub handle: Option<ProcessHandle>,
    pub reserved_session_id: Option<AgentSessionId>,
    pub sink: Arc<dyn UpdateSink>,
    pub requester: Option<String>,
    pub display_name: String,
}

impl ProcessSlot {
    fn kill(&self) {
        if let Some(handle) = &self.handle {
            handle.kill();
        }
    }
}

/// An announced tool call waiting for its result.
#[derive(Clone, Debug)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub normalized_input: String,
    /// Unit posted for the call; `None` when the sink rejected the post.
    pub unit_id: Option<UnitId>,
    pub unit: RenderUnit,
}

#[derive(Default)]
struct ChannelRecord {
    slot: Option<ProcessSlot>,
    buffer: StreamBuffer,
    tool_calls: HashMap<ToolCallId, ToolCallRecord>,
}

impl ChannelRecord {
    fn install(&mut self, generation: u64, reservation: Reservation) {
        self.buffer.clear();
        self.tool_calls.clear();
        self.slot = Some(ProcessSlot {
            generation,
            handle: None,
            reserved_session_id: reservation.session_id,
            sink: reservation.sink,
            requester: reservation.requester,
            display_name: reservation.display_name,
        });
    }

    fn current(&self, generation: u64) -> bool {
        self.slot.as_ref().is_some_and(|s| s.generation == generation)
    }
}

pub struct SessionRegistry {
    channels: DashMap<ChannelId, ChannelRecord>,
    next_generation: AtomicU64,
    store: Arc<dyn SessionStore>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            channels: DashMap::new(),
            next_generation: AtomicU64::new(1),
            store,
        }
    }

    fn generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Check-and-install in one step. Fails if the channel holds a slot.
    pub fn try_reserve(&self, channel: &ChannelId, reservation: Reservation) -> Result<u64, EngineError> {
        let mut record = self.channels.entry(channel.clone()).or_default();
        if record.slot.is_some() {
            return Err(EngineError::ChannelBusy(channel.clone()));
        }
        let generation = self.generation();
        record.install(generation, reservation);
        debug!(channel_id = %channel, generation, "slot reserved");
        Ok(generation)
    }

    /// Install a slot unconditionally. A live predecessor is killed first and
    /// returned so the caller can tell its sink.
    pub fn reserve(&self, channel: &ChannelId, reservation: Reservation) -> (u64, Option<ProcessSlot>) {
        let mut record = self.channels.entry(channel.clone()).or_default();
        let previous = record.slot.take();
        if let Some(prev) = &previous {
            info!(channel_id = %channel, generation = prev.generation, "replacing active run");
            prev.kill();
        }
        let generation = self.generation();
        record.install(generation, reservation);
        (generation, previous)
    }

    /// Attach the spawned process to its reservation. Returns `false` (and
    /// kills the process) when the reservation was replaced or cleared during
    /// the spawn.
    pub fn attach(&self, channel: &ChannelId, generation: u64, handle: ProcessHandle) -> bool {
        if let Some(mut record) = self.channels.get_mut(channel) {
            if let Some(slot) = record.slot.as_mut().filter(|s| s.generation == generation) {
                slot.handle = Some(handle);
                return true;
            }
        }
        debug!(channel_id = %channel, generation, "reservation gone before attach");
        handle.kill();
        false
    }

    pub fn has_active(&self, channel: &ChannelId) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|record| record.slot.is_some())
    }

    pub fn is_current(&self, channel: &ChannelId, generation: u64) -> bool {
        self.channels
            .get(channel)
            .is_some_and(|record| record.current(generation))
    }

    /// Kill the active process and vacate the slot. The session id is kept.
    pub fn kill(&self, channel: &ChannelId) -> Option<ProcessSlot> {
        let slot = self.channels.get_mut(channel)?.slot.take()?;
        slot.kill();
        info!(channel_id = %channel, generation = slot.generation, "run killed");
        Some(slot)
    }

    /// Vacate the slot if it still belongs to `generation`. Safe to call any
    /// number of times; a stale release never clears a successor.
    pub fn release(&self, channel: &ChannelId, generation: u64) -> bool {
        let Some(mut record) = self.channels.get_mut(channel) else {
            return false;
        };
        if !record.current(generation) {
            return false;
        }
        if let Some(slot) = record.slot.take() {
            slot.kill();
        }
        debug!(channel_id = %channel, generation, "slot released");
        true
    }

    /// Forget the channel entirely: kill, drop slot, buffer and tool calls,
    /// and ask the store to forget the session id.
    pub fn clear(&self, channel: &ChannelId) -> Option<ProcessSlot> {
        let removed = self
            .channels
            .remove(channel)
            .and_then(|(_, record)| record.slot);
        if let Some(slot) = &removed {
            slot.kill();
        }
        if let Err(e) = self.store.clear_session(channel) {
            warn!(channel_id = %channel, error = %e, kind = e.error_kind(), "failed to clear stored session");
        }
        info!(channel_id = %channel, "channel cleared");
        removed
    }

    /// Kill every live process and return the vacated slots.
    pub fn kill_all(&self) -> Vec<(ChannelId, ProcessSlot)> {
        let mut killed = Vec::new();
        for mut record in self.channels.iter_mut() {
            if let Some(slot) = record.slot.take() {
                slot.kill();
                killed.push((record.key().clone(), slot));
            }
        }
        killed
    }

    /// Feed stdout of the current run through the channel's decoder.
    /// Output of a replaced run is dropped.
    pub fn decode(
        &self,
        channel: &ChannelId,
        generation: u64,
        chunk: &[u8],
    ) -> Vec<Result<AgentMessage, DecodeError>> {
        match self.channels.get_mut(channel) {
            Some(mut record) if record.current(generation) => record.buffer.feed(chunk),
            _ => Vec::new(),
        }
    }

    /// Decode whatever the run left unterminated at end of stream.
    pub fn finish_decode(
        &self,
        channel: &ChannelId,
        generation: u64,
    ) -> Option<Result<AgentMessage, DecodeError>> {
        match self.channels.get_mut(channel) {
            Some(mut record) if record.current(generation) => record.buffer.finish(),
            _ => None,
        }
    }

    pub fn insert_tool_call(&self, channel: &ChannelId, id: ToolCallId, record: ToolCallRecord) {
        if let Some(mut channel_record) = self.channels.get_mut(channel) {
            let _ = channel_record.tool_calls.insert(id, record);
        }
    }

    pub fn take_tool_call(&self, channel: &ChannelId, id: &ToolCallId) -> Option<ToolCallRecord> {
        self.channels.get_mut(channel)?.tool_calls.remove(id)
    }

    pub fn open_tool_calls(&self, channel: &ChannelId) -> usize {
        self.channels
            .get(channel)
            .map_or(0, |record| record.tool_calls.len())
    }

    /// Remember the session id the agent reported for the current run.
    pub fn note_session(&self, channel: &ChannelId, session_id: &AgentSessionId) {
        if let Some(mut record) = self.channels.get_mut(channel) {
            if let Some(slot) = record.slot.as_mut() {
                slot.reserved_session_id = Some(session_id.clone());
            }
        }
    }

    /// Snapshot of the channel's slot.
    pub fn slot(&self, channel: &ChannelId) -> Option<ProcessSlot> {
        self.channels.get(channel)?.slot.clone()
    }

    pub fn requester(&self, channel: &ChannelId) -> Option<String> {
        self.channels.get(channel)?.slot.as_ref()?.requester.clone()
    }

    pub fn active_count(&self) -> usize {
        self.channels.iter().filter(|r| r.slot.is_some()).count()
    }

    pub fn active_channels(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|r| r.slot.is_some())
            .map(|r| r.key().clone())
            .collect()
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemorySessionStore, RecordingSink};

    fn registry() -> (SessionRegistry, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::default());
        (SessionRegistry::new(store.clone()), store)
    }

    fn reservation() -> Reservation {
        Reservation {
            session_id: None,
            sink: Arc::new(RecordingSink::default()),
            requester: Some("alice".into()),
            display_name: "general".into(),
        }
    }

    fn handle() -> ProcessHandle {
        ProcessHandle {
            cancel: CancellationToken::new(),
            pid: None,
        }
    }

    fn chan() -> ChannelId {
        ChannelId::from_raw("C1")
    }

    #[test]
    fn try_reserve_is_single_flight() {
        let (reg, _) = registry();
        let generation = reg.try_reserve(&chan(), reservation()).unwrap();
        assert!(reg.has_active(&chan()));
        assert!(matches!(
            reg.try_reserve(&chan(), reservation()),
            Err(EngineError::ChannelBusy(_))
        ));
        assert!(reg.release(&chan(), generation));
        assert!(!reg.has_active(&chan()));
        assert!(reg.try_reserve(&chan(), reservation()).is_ok());
    }

    #[test]
    fn concurrent_try_reserve_admits_one() {
        let (reg, _) = registry();
        let reg = Arc::new(reg);
        let threads: Vec<_> = (0..16)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.try_reserve(&chan(), reservation()).is_ok())
            })
            .collect();
        let admitted = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn reserve_kills_predecessor() {
        let (reg, _) = registry();
        let first = reg.try_reserve(&chan(), reservation()).unwrap();
        let h = handle();
        assert!(reg.attach(&chan(), first, h.clone()));

        let (second, previous) = reg.reserve(&chan(), reservation());
        assert!(h.cancel.is_cancelled());
        assert_eq!(previous.unwrap().generation, first);
        assert_ne!(first, second);

        // stale release from the replaced run leaves the successor alone
        assert!(!reg.release(&chan(), first));
        assert!(reg.has_active(&chan()));
        assert!(reg.is_current(&chan(), second));
    }

    #[test]
    fn release_is_idempotent() {
        let (reg, _) = registry();
        let generation = reg.try_reserve(&chan(), reservation()).unwrap();
        assert!(reg.release(&chan(), generation));
        assert!(!reg.release(&chan(), generation));
        assert!(!reg.release(&ChannelId::from_raw("nope"), generation));
    }

    #[test]
    fn attach_after_kill_kills_new_process() {
        let (reg, _) = registry();
        let generation = reg.try_reserve(&chan(), reservation()).unwrap();
        assert!(reg.kill(&chan()).is_some());
        let h = handle();
        assert!(!reg.attach(&chan(), generation, h.clone()));
        assert!(h.cancel.is_cancelled());
    }

    #[test]
    fn clear_erases_everything_and_forgets_session() {
        let (reg, store) = registry();
        let c = chan();
        store
            .set_session(&c, &AgentSessionId::from_raw("s1"), "general")
            .unwrap();
        let generation = reg.try_reserve(&c, reservation()).unwrap();
        let h = handle();
        assert!(reg.attach(&c, generation, h.clone()));
        let _ = reg.decode(&c, generation, b"{\"type\":\"sys");
        reg.insert_tool_call(
            &c,
            ToolCallId::from_raw("t1"),
            ToolCallRecord {
                tool_name: "Bash".into(),
                normalized_input: "ls".into(),
                unit_id: None,
                unit: RenderUnit::Stopped,
            },
        );

        assert!(reg.clear(&c).is_some());
        assert!(h.cancel.is_cancelled());
        assert!(!reg.has_active(&c));
        assert_eq!(reg.open_tool_calls(&c), 0);
        assert_eq!(store.get_session(&c).unwrap(), None);
        // idempotent
        assert!(reg.clear(&c).is_none());
    }

    #[test]
    fn stale_output_is_not_decoded() {
        let (reg, _) = registry();
        let first = reg.try_reserve(&chan(), reservation()).unwrap();
        let (second, _) = reg.reserve(&chan(), reservation());
        let line = b"{\"type\":\"result\",\"subtype\":\"success\",\"num_turns\":1}\n";
        assert!(reg.decode(&chan(), first, line).is_empty());
        assert_eq!(reg.decode(&chan(), second, line).len(), 1);
    }

    #[test]
    fn kill_keeps_channel_record() {
        let (reg, _) = registry();
        let _ = reg.try_reserve(&chan(), reservation()).unwrap();
        let slot = reg.kill(&chan()).unwrap();
        assert_eq!(slot.requester.as_deref(), Some("alice"));
        assert!(!reg.has_active(&chan()));
        assert!(reg.kill(&chan()).is_none());
    }

    #[test]
    fn kill_all_counts_live_slots() {
        let (reg, _) = registry();
        let _ = reg.try_reserve(&ChannelId::from_raw("A"), reservation()).unwrap();
        let _ = reg.try_reserve(&ChannelId::from_raw("B"), reservation()).unwrap();
        assert_eq!(reg.active_count(), 2);
        assert_eq!(reg.kill_all().len(), 2);
        assert_eq!(reg.active_count(), 0);
    }
}
