use switchboard_core::errors::CollaboratorError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for CollaboratorError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Database(msg) => CollaboratorError::Unavailable(msg),
            StoreError::Io(msg) => CollaboratorError::Io(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_collaborator_error() {
        let err: CollaboratorError = StoreError::Database("locked".into()).into();
        assert_eq!(err.error_kind(), "unavailable");
        let err: CollaboratorError = StoreError::Io("denied".into()).into();
        assert_eq!(err.error_kind(), "io");
    }
}
