/// Conditions callers are expected to match on. They travel inside
/// `anyhow::Error` and can be recovered with `downcast_ref::<StoreError>()`.
#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum StoreError {
    #[error("record store is not initialized")]
    NotInitialized,
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("table {table} has no index named {index}")]
    UnknownIndex { table: String, index: String },
    #[error("record for table {table} is missing its key field {field}")]
    MissingKey { table: String, field: String },
    #[error("record for table {0} must be a JSON object")]
    NotAnObject(String),
}

/// True when `err` is, or wraps, [`StoreError::NotInitialized`].
#[must_use]
pub fn is_not_initialized(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(cause.downcast_ref::<StoreError>(), Some(StoreError::NotInitialized))
    })
}
