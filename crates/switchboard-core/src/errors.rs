/// Failure of an external collaborator (chat sink, notifier, store, summarizer).
/// The orchestrator logs these and carries on; none of them is fatal.
#[derive(Clone, Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("io error: {0}")]
    Io(String),
}

impl CollaboratorError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Rejected(_) => "rejected",
            Self::Io(_) => "io",
        }
    }
}

/// A complete protocol line that is not a valid message.
#[derive(Clone, Debug, thiserror::Error)]
#[error("malformed protocol line ({message}): {line_preview}")]
pub struct DecodeError {
    pub line_preview: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_strings() {
        assert_eq!(CollaboratorError::Unavailable("x".into()).error_kind(), "unavailable");
        assert_eq!(CollaboratorError::Rejected("x".into()).error_kind(), "rejected");
        assert_eq!(CollaboratorError::Io("x".into()).error_kind(), "io");
    }

    #[test]
    fn decode_error_display() {
        let err = DecodeError {
            line_preview: "{\"type\":".into(),
            message: "EOF while parsing".into(),
        };
        let s = err.to_string();
        assert!(s.contains("EOF while parsing"));
        assert!(s.contains("{\"type\":"));
    }
}
