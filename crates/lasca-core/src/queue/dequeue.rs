use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info};

use crate::backoff::BackoffStrategy;
use crate::db::{MessageRepository, Shard};
use crate::error::{DbError, DequeueError};
use crate::id::Id;
use crate::prefetch::{PrefetchStatus, PriorityBuffer, MAX_PREFETCH_ITEM_COUNT};
use crate::queue::WorkerHandle;

const DEQUEUE_BATCH_SIZE: i64 = 100;
const BACKOFF_INITIAL_DURATION: Duration = Duration::from_millis(10);
const BACKOFF_MAX_DURATION: Duration = Duration::from_secs(5);
const TOPIC_BACKOFF_MAX_DURATION: Duration = Duration::from_secs(5);
const BACKOFF_FACTOR: f32 = 2.0;

/// Per-shard worker that continuously polls its shard for messages ready
/// for delivery and stages them into the prefetch buffer.
///
/// Each round fetches a bounded batch (globally and per topic), offers it
/// to the buffer, then marks as prefetched only the rows the buffer
/// accepted — a full buffer therefore never starves the database of
/// redelivery. `Backoff` replies install a topic-scoped delay so the
/// database is not polled for that topic until the buffer drains.
pub struct DequeueWorker {
    shard: Arc<Shard>,
    repo: MessageRepository,
    prefetch_buf: PriorityBuffer,
    topic_backoffs: HashMap<String, BackoffStrategy>,
}

impl DequeueWorker {
    pub fn spawn(shard: Arc<Shard>, prefetch_buf: PriorityBuffer) -> WorkerHandle {
        let worker = Self {
            shard,
            repo: MessageRepository::new(),
            prefetch_buf,
            topic_backoffs: HashMap::new(),
        };
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(worker.run(stop_rx));
        WorkerHandle::new(stop_tx, task)
    }

    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        info!(shard = self.shard.id(), "dequeue worker started");
        let mut loop_backoff = BackoffStrategy::new(
            BACKOFF_INITIAL_DURATION,
            BACKOFF_FACTOR,
            BACKOFF_MAX_DURATION,
        );
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = loop_backoff.after() => {
                    if let Err(e) = self.dequeue_messages(&mut loop_backoff).await {
                        error!(
                            shard = self.shard.id(),
                            error = %e,
                            "error fetching messages from database"
                        );
                    }
                }
            }
        }
        info!(shard = self.shard.id(), "dequeue worker stopped");
    }

    async fn dequeue_messages(
        &mut self,
        loop_backoff: &mut BackoffStrategy,
    ) -> Result<(), DequeueError> {
        let exclusions = excluded_topics(&mut self.topic_backoffs);
        let messages = self
            .repo
            .find_messages_ready_for_delivery(
                &self.shard,
                false,
                &exclusions,
                MAX_PREFETCH_ITEM_COUNT as i64,
                Some(DEQUEUE_BATCH_SIZE),
            )
            .await?;

        if messages.is_empty() {
            loop_backoff.backoff();
            return Ok(());
        }
        loop_backoff.reset();

        // Topic and id survive the hand-off; the batch itself moves into
        // the buffer.
        let keys: Vec<(Id, String)> = messages
            .iter()
            .map(|m| (m.id, m.topic.clone()))
            .collect();
        let reply = self.prefetch_buf.ingest(messages).await?;
        let fetched_ids = process_prefetch_reply(&mut self.topic_backoffs, &keys, &reply);

        if fetched_ids.is_empty() {
            return Ok(());
        }
        let tx = self
            .repo
            .update_prefetched_batch(&self.shard, &fetched_ids, true)
            .await?;
        tx.commit().await.map_err(DbError::from)?;

        Ok(())
    }
}

/// Topics with a live backoff are excluded from the next delivery query;
/// entries whose backoff has elapsed are dropped so the topic is
/// re-allowed.
fn excluded_topics(backoffs: &mut HashMap<String, BackoffStrategy>) -> Vec<String> {
    let mut excludes = Vec::new();
    backoffs.retain(|topic, backoff| {
        if backoff.is_active() {
            excludes.push(topic.clone());
            true
        } else {
            false
        }
    });
    excludes
}

/// Collect the ids the buffer accepted; every `Backoff` reply escalates
/// (or installs) the backoff for its topic.
fn process_prefetch_reply(
    backoffs: &mut HashMap<String, BackoffStrategy>,
    keys: &[(Id, String)],
    reply: &[PrefetchStatus],
) -> Vec<Id> {
    let mut fetched_ids = Vec::new();
    for ((id, topic), status) in keys.iter().zip(reply) {
        match status {
            PrefetchStatus::Ok => fetched_ids.push(*id),
            PrefetchStatus::Backoff => {
                backoffs
                    .entry(topic.clone())
                    .or_insert_with(|| {
                        BackoffStrategy::new(
                            BACKOFF_INITIAL_DURATION,
                            BACKOFF_FACTOR,
                            TOPIC_BACKOFF_MAX_DURATION,
                        )
                    })
                    .backoff();
            }
        }
    }
    fetched_ids
}
