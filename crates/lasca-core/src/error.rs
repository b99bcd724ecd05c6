use crate::id::Id;

/// Malformed identifier string or byte representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid id format")]
pub struct ParseIdError;

/// Low-level database errors (connection, query, transaction). This is the
/// only failure mode of the repositories — domain errors such as a missing
/// namespace are handled at the boundary layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Query(#[from] sqlx::Error),
}

/// Errors establishing or initializing a shard connection.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    #[error("failed to connect to shard {id}: {source}")]
    Connect {
        id: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to initialize schema on shard {id}: {source}")]
    Initialize {
        id: u32,
        #[source]
        source: sqlx::Error,
    },

    #[error("shard {0} is already registered")]
    Duplicate(u32),
}

/// Failure reply for an enqueue request.
#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Failures of one dequeue-worker poll round.
#[derive(Debug, thiserror::Error)]
pub enum DequeueError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Namespace lookup failures: the requested id does not parse, or the
/// database call failed.
#[derive(Debug, thiserror::Error)]
pub enum NamespaceError {
    #[error(transparent)]
    InvalidId(#[from] ParseIdError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Ack/nack routing failures.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("could not route ack/nack for id {0}")]
    NoRoute(Id),

    #[error("ack/nack channel for shard {0} is closed")]
    Closed(u32),
}

/// The prefetch buffer task is gone (not yet started or already stopped).
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("prefetch buffer is not running")]
    Closed,
}
