//! Session orchestration: one supervised agent process per channel, its
//! output decoded and routed to the chat, and tool permissions brokered
//! through a human.

pub mod config;
pub mod decoder;
pub mod error;
pub mod invocation;
pub mod orchestrator;
pub mod permissions;
pub mod registry;
pub mod router;
pub mod supervisor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ApprovalConfig, EngineConfig};
pub use error::EngineError;
pub use orchestrator::{ChannelState, Orchestrator, RunRequest, RunTicket};
pub use permissions::{
    ApprovalDecision, ApprovalError, ApprovalOrigin, DecisionReason, PendingApprovalInfo,
    PermissionBroker, SignalOutcome,
};
pub use registry::SessionRegistry;
