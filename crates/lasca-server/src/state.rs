use std::sync::Arc;

use lasca_core::{AckNackRouter, EnqueueRequest, NamespaceRepository, PriorityBuffer, Shard};

/// Shared handler state: channels into the worker mesh plus the main-shard
/// namespace repository. Everything here is either a channel handle or
/// read-only after startup, so cloning per request is cheap.
#[derive(Clone)]
pub struct AppState {
    pub enqueue_tx: async_channel::Sender<EnqueueRequest>,
    pub prefetch_buf: PriorityBuffer,
    pub acknack_router: Arc<AckNackRouter>,
    pub namespaces: Arc<NamespaceRepository>,
    pub main_shard: Arc<Shard>,
}
