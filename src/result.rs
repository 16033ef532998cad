pub type Result<T, E = BatchError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("'{entity}' is not a valid entity type: {reason}")]
    InvalidEntityType { entity: String, reason: String },

    #[error("Batch size must be greater than 0 (got '{0}')")]
    InvalidChunkSize(usize),

    #[error("Unexpected entity '{actual}', expected '{expected}'")]
    TypeMismatch { expected: String, actual: String },

    #[error("No registered updater for driver: '{0}'")]
    UnregisteredDialect(String),

    #[error("Invalid registration for '{name}': {reason}")]
    InvalidStrategyRegistration { name: String, reason: String },

    #[error("Invalid sequence size '{actual}', expected '{expected}'")]
    SequenceLengthMismatch { expected: usize, actual: usize },

    #[error("No deferred queue is configured to dispatch the batch")]
    QueueUnavailable,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl BatchError {
    pub(crate) fn invalid_entity(entity: &str, reason: impl Into<String>) -> Self {
        BatchError::InvalidEntityType {
            entity: entity.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_registration(name: &str, reason: impl Into<String>) -> Self {
        BatchError::InvalidStrategyRegistration {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, BatchError::Storage(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_keep_their_message() {
        let err: BatchError = anyhow::anyhow!("duplicate key value violates unique constraint").into();
        assert!(err.is_storage());
        assert_eq!(
            err.to_string(),
            "duplicate key value violates unique constraint"
        );
    }

    #[test]
    fn chunk_size_message() {
        let err = BatchError::InvalidChunkSize(0);
        assert_eq!(err.to_string(), "Batch size must be greater than 0 (got '0')");
    }
}
