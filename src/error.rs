use thiserror::Error;

/// Errors raised while applying a diff object to a destination table.
///
/// None of these are retried here; every failure rolls back the apply
/// transaction before it reaches the caller.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Table {table} has no replica identity. Have key constraints been applied?")]
    MissingReplicaIdentity { table: String },

    #[error("Error determining the replica identity of object {object_id}: {reason}")]
    MalformedDiffObject { object_id: String, reason: String },

    #[error("Column {column} does not exist in table {table}")]
    SchemaMismatch { table: String, column: String },

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid action data in object {object_id}: {reason}")]
    InvalidActionData { object_id: String, reason: String },

    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while compiling push-down fragments for a remote source
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error(
        "Unsupported sort key on {column}: reversed={is_reversed}, nulls_first={nulls_first}"
    )]
    UnsupportedSortKey {
        column: String,
        is_reversed: bool,
        nulls_first: bool,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Invalid source metadata: {0}")]
    InvalidSourceMetadata(String),
}
