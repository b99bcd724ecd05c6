//! The worker mesh: per-shard enqueue, dequeue, and ack/nack workers.
//!
//! Workers coordinate exclusively through bounded channels and never
//! terminate on errors — failures are logged and the loop continues.

mod acknack;
mod dequeue;
mod enqueue;

pub use acknack::{AckNackRequest, AckNackRouter, AckNackWorker};
pub use dequeue::DequeueWorker;
pub use enqueue::{EnqueueRequest, EnqueueWorker};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Handle for stopping a spawned worker task.
///
/// Stopping is two-phase: `stop` posts the termination request on the
/// worker's stop channel, then awaits the task so the caller knows the
/// worker drained and exited cleanly.
pub struct WorkerHandle {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(crate) fn new(stop_tx: oneshot::Sender<()>, task: JoinHandle<()>) -> Self {
        Self { stop_tx, task }
    }

    /// Request the worker to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.task.await;
    }
}
