use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::info;

use crate::db::{MessageRepository, Shard};
use crate::error::EnqueueError;
use crate::id::Id;
use crate::message::Message;
use crate::queue::WorkerHandle;

/// An enqueue request from the HTTP boundary. The reply channel carries
/// the generated message id (or the failure) back to the waiting handler.
pub struct EnqueueRequest {
    pub message: Message,
    pub reply: oneshot::Sender<Result<Id, EnqueueError>>,
}

/// Per-shard worker that consumes enqueue requests and stores them into
/// its shard.
///
/// Workers keep the number of concurrent database writers bounded: HTTP
/// handlers drop requests into one shared channel and every shard's worker
/// competes on the receiving side, so writes spread across shards without
/// an explicit dispatcher.
pub struct EnqueueWorker {
    shard: Arc<Shard>,
    repo: MessageRepository,
    inbound: async_channel::Receiver<EnqueueRequest>,
}

impl EnqueueWorker {
    pub fn spawn(
        shard: Arc<Shard>,
        inbound: async_channel::Receiver<EnqueueRequest>,
    ) -> WorkerHandle {
        let worker = Self {
            shard,
            repo: MessageRepository::new(),
            inbound,
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(worker.run(stop_rx));
        WorkerHandle::new(stop_tx, task)
    }

    async fn run(self, mut stop_rx: oneshot::Receiver<()>) {
        info!(shard = self.shard.id(), "enqueue worker started");
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                request = self.inbound.recv() => match request {
                    Ok(request) => self.handle_request(request).await,
                    Err(_) => break,
                },
            }
        }
        info!(shard = self.shard.id(), "enqueue worker stopped");
    }

    async fn handle_request(&self, request: EnqueueRequest) {
        let mut message = request.message;
        let result = match self.repo.save(&self.shard, &mut message).await {
            Ok(()) => Ok(message.id),
            Err(e) => Err(EnqueueError::from(e)),
        };
        // The caller enforces its own deadline; a dropped receiver just
        // means nobody is waiting for this reply anymore.
        let _ = request.reply.send(result);
    }
}
