//! Persistence layer: shard management and the message/namespace
//! repositories. Repositories are stateless facades — every operation
//! takes the shard to run against.

mod messages;
mod namespaces;
mod shard;

pub use messages::MessageRepository;
pub use namespaces::NamespaceRepository;
pub use shard::{Shard, ShardManager};

/// Row limit applied when the caller does not provide one.
pub(crate) const DEFAULT_LIMIT_ROWS: i64 = 100;
