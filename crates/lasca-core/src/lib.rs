pub mod backoff;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod message;
pub mod namespace;
pub mod prefetch;
pub mod queue;
pub mod telemetry;

pub use backoff::BackoffStrategy;
pub use config::{AppConfig, ShardConfig};
pub use db::{MessageRepository, NamespaceRepository, Shard, ShardManager};
pub use error::{
    BufferError, DbError, DequeueError, EnqueueError, NamespaceError, ParseIdError, RouteError,
    ShardError,
};
pub use id::Id;
pub use message::Message;
pub use namespace::Namespace;
pub use prefetch::{IngestEnvelope, PrefetchStatus, PriorityBuffer, MAX_PREFETCH_ITEM_COUNT};
pub use queue::{
    AckNackRequest, AckNackRouter, AckNackWorker, DequeueWorker, EnqueueRequest, EnqueueWorker,
    WorkerHandle,
};
