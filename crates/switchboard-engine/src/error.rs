use switchboard_core::errors::CollaboratorError;
use switchboard_core::ids::ChannelId;

use crate::permissions::ApprovalError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("channel {0} already has an active run")]
    ChannelBusy(ChannelId),

    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// Short classification string for logging and HTTP mapping.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ChannelBusy(_) => "channel_busy",
            Self::Spawn(_) => "spawn",
            Self::Collaborator(_) => "collaborator",
            Self::Approval(_) => "approval",
            Self::Internal(_) => "internal",
        }
    }
}
