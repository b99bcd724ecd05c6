use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use crate::db::{MessageRepository, Shard};
use crate::error::RouteError;
use crate::id::Id;
use crate::queue::WorkerHandle;

/// An acknowledgement for a delivered message: `ack = true` settles the
/// message for good, `ack = false` puts it back up for delivery.
#[derive(Debug, Clone, Copy)]
pub struct AckNackRequest {
    pub id: Id,
    pub ack: bool,
}

/// Per-shard worker that applies ack/nack requests to its shard.
///
/// Acks arrive in bursts too large to let HTTP handlers write to the
/// shards directly; the worker absorbs them from a bounded channel and
/// serializes the writes per shard. Fire-and-forget: failures are logged,
/// no reply is sent.
pub struct AckNackWorker {
    shard: Arc<Shard>,
    repo: MessageRepository,
    inbound: mpsc::Receiver<AckNackRequest>,
}

impl AckNackWorker {
    pub fn spawn(shard: Arc<Shard>, inbound: mpsc::Receiver<AckNackRequest>) -> WorkerHandle {
        let worker = Self {
            shard,
            repo: MessageRepository::new(),
            inbound,
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(worker.run(stop_rx));
        WorkerHandle::new(stop_tx, task)
    }

    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        info!(shard = self.shard.id(), "ack/nack worker started");
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                request = self.inbound.recv() => match request {
                    Some(request) => {
                        if let Err(e) = self
                            .repo
                            .ack_nack(&self.shard, &request.id, request.ack)
                            .await
                        {
                            error!(
                                id = %request.id,
                                ack = request.ack,
                                error = %e,
                                "error ack/nack message"
                            );
                        }
                    }
                    None => break,
                },
            }
        }
        info!(shard = self.shard.id(), "ack/nack worker stopped");
    }
}

/// Routes an ack/nack request to the worker owning the message's shard.
///
/// Message ids embed their shard id, so routing is a map lookup — no
/// database round-trip per acknowledgement.
#[derive(Default)]
pub struct AckNackRouter {
    routes: HashMap<u32, mpsc::Sender<AckNackRequest>>,
}

impl AckNackRouter {
    /// Register the inbound channel of a shard's ack/nack worker.
    pub fn register_worker(&mut self, shard_id: u32, tx: mpsc::Sender<AckNackRequest>) {
        self.routes.insert(shard_id, tx);
    }

    /// Route a request to the worker for the shard encoded in its id.
    pub async fn route(&self, request: AckNackRequest) -> Result<(), RouteError> {
        let shard_id = request.id.shard_id();
        let tx = self
            .routes
            .get(&shard_id)
            .ok_or(RouteError::NoRoute(request.id))?;
        tx.send(request)
            .await
            .map_err(|_| RouteError::Closed(shard_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_the_shard_encoded_in_the_id() {
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);

        let mut router = AckNackRouter::default();
        router.register_worker(10, tx_a);
        router.register_worker(20, tx_b);

        let id = Id::generate(20);
        router.route(AckNackRequest { id, ack: true }).await.unwrap();

        let request = rx_b.try_recv().unwrap();
        assert_eq!(request.id, id);
        assert!(request.ack);
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_shard_is_a_routing_error() {
        let (tx, _rx) = mpsc::channel(8);
        let mut router = AckNackRouter::default();
        router.register_worker(10, tx);

        let id = Id::generate(99);
        let result = router.route(AckNackRequest { id, ack: false }).await;
        assert!(matches!(result, Err(RouteError::NoRoute(_))));
    }

    #[tokio::test]
    async fn worker_logs_failures_and_keeps_draining() {
        let shard = Arc::new(crate::db::Shard::disconnected_for_tests(10, false));
        let (tx, rx) = mpsc::channel(8);
        let handle = AckNackWorker::spawn(shard, rx);

        // Requests against an unreachable shard fail internally; the
        // worker is fire-and-forget and must survive them.
        for _ in 0..3 {
            tx.send(AckNackRequest {
                id: Id::generate(10),
                ack: true,
            })
            .await
            .unwrap();
        }

        handle.stop().await;
    }

    #[tokio::test]
    async fn stopped_worker_channel_is_reported() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let mut router = AckNackRouter::default();
        router.register_worker(10, tx);

        let id = Id::generate(10);
        let result = router.route(AckNackRequest { id, ack: true }).await;
        assert!(matches!(result, Err(RouteError::Closed(10))));
    }
}
