use std::collections::{BinaryHeap, HashMap};
use std::fmt;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::BufferError;
use crate::message::Message;
use crate::queue::WorkerHandle;

/// Maximum number of items the buffer will hold for every topic.
pub const MAX_PREFETCH_ITEM_COUNT: usize = 100;

const DEFAULT_DEQUEUE_LIMIT_PER_TOPIC: usize = 20;
const DEFAULT_CHAN_SIZE: usize = 300;

/// Status code the buffer replies with for every ingested message. When a
/// dequeue worker fetches items faster than consumers pull them, the topic
/// heap fills up to `MAX_PREFETCH_ITEM_COUNT` and further items are
/// rejected with `Backoff`.
///
/// Kept as a dedicated enum rather than a boolean: the variant set is
/// expected to grow (expired, duplicate, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchStatus {
    /// Item accepted by the buffer.
    Ok,
    /// Topic heap full, the worker should back off this topic.
    Backoff,
}

impl fmt::Display for PrefetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrefetchStatus::Ok => write!(f, "ok"),
            PrefetchStatus::Backoff => write!(f, "backoff"),
        }
    }
}

/// A batch of fetched messages plus the channel for the per-message reply.
/// The reply carries exactly one status per batch element, in input order.
pub struct IngestEnvelope {
    pub batch: Vec<Message>,
    pub reply: oneshot::Sender<Vec<PrefetchStatus>>,
}

struct GetItemsRequest {
    topic: String,
    limit: Option<usize>,
    reply: oneshot::Sender<Vec<Message>>,
}

/// Handle to the prefetch buffer task. Cloneable; dequeue workers use
/// `ingest` and the HTTP boundary uses `get_items`.
#[derive(Clone)]
pub struct PriorityBuffer {
    ingest_tx: mpsc::Sender<IngestEnvelope>,
    api_tx: mpsc::Sender<GetItemsRequest>,
}

impl PriorityBuffer {
    /// Spawn the buffer task and return the handle plus the stop handle.
    pub fn spawn() -> (Self, WorkerHandle) {
        let (ingest_tx, ingest_rx) = mpsc::channel(DEFAULT_CHAN_SIZE);
        let (api_tx, api_rx) = mpsc::channel(DEFAULT_CHAN_SIZE);
        let (stop_tx, stop_rx) = oneshot::channel();

        let task = BufferTask {
            ingest_rx,
            api_rx,
            buffers: HashMap::new(),
            next_seq: 0,
        };
        let join = tokio::spawn(task.run(stop_rx));

        (Self { ingest_tx, api_tx }, WorkerHandle::new(stop_tx, join))
    }

    /// Offer a batch of messages to the buffer. Returns one status per
    /// message, in input order.
    pub async fn ingest(&self, batch: Vec<Message>) -> Result<Vec<PrefetchStatus>, BufferError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ingest_tx
            .send(IngestEnvelope {
                batch,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BufferError::Closed)?;
        reply_rx.await.map_err(|_| BufferError::Closed)
    }

    /// Pop up to `limit` messages (default 20) for a topic, in ascending
    /// priority order. Returns an empty vec when the topic has nothing
    /// buffered.
    pub async fn get_items(
        &self,
        topic: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, BufferError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.api_tx
            .send(GetItemsRequest {
                topic: topic.to_string(),
                limit,
                reply: reply_tx,
            })
            .await
            .map_err(|_| BufferError::Closed)?;
        reply_rx.await.map_err(|_| BufferError::Closed)
    }
}

/// A buffered message plus its heap ordering key. Ordered by ascending
/// priority; ties resolve by insertion sequence, never by message id.
struct BufferedMessage {
    priority: u32,
    seq: u64,
    msg: Message,
}

impl PartialEq for BufferedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for BufferedMessage {}

impl Ord for BufferedMessage {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed so the std max-heap pops the lowest priority value
        // (= highest delivery priority) first.
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for BufferedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The buffer task state. Ingest and get-items mutate the same per-topic
/// heaps, so both run on one cooperative loop — no locks, and ordering is
/// trivially sequential.
struct BufferTask {
    ingest_rx: mpsc::Receiver<IngestEnvelope>,
    api_rx: mpsc::Receiver<GetItemsRequest>,
    buffers: HashMap<String, BinaryHeap<BufferedMessage>>,
    next_seq: u64,
}

impl BufferTask {
    async fn run(mut self, mut stop_rx: oneshot::Receiver<()>) {
        info!("prefetch buffer started");
        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                envelope = self.ingest_rx.recv() => match envelope {
                    Some(envelope) => {
                        let reply = self.process_ingest(envelope.batch);
                        let _ = envelope.reply.send(reply);
                    }
                    None => break,
                },
                request = self.api_rx.recv() => match request {
                    Some(request) => self.process_get_items(request),
                    None => break,
                },
            }
        }
        info!("prefetch buffer stopped");
    }

    fn process_ingest(&mut self, batch: Vec<Message>) -> Vec<PrefetchStatus> {
        let mut reply = Vec::with_capacity(batch.len());
        for msg in batch {
            let heap = self.buffers.entry(msg.topic.clone()).or_default();
            if heap.len() < MAX_PREFETCH_ITEM_COUNT {
                heap.push(BufferedMessage {
                    priority: msg.priority,
                    seq: self.next_seq,
                    msg,
                });
                self.next_seq += 1;
                reply.push(PrefetchStatus::Ok);
            } else {
                reply.push(PrefetchStatus::Backoff);
            }
        }
        reply
    }

    fn process_get_items(&mut self, request: GetItemsRequest) {
        let Some(heap) = self.buffers.get_mut(&request.topic) else {
            let _ = request.reply.send(Vec::new());
            return;
        };

        let limit = match request.limit {
            Some(limit) if limit > 0 => limit,
            _ => DEFAULT_DEQUEUE_LIMIT_PER_TOPIC,
        };
        let n = heap.len().min(limit);

        let mut popped = Vec::with_capacity(n);
        while popped.len() < n {
            match heap.pop() {
                Some(entry) => popped.push(entry),
                None => break,
            }
        }

        let messages: Vec<Message> = popped.iter().map(|entry| entry.msg.clone()).collect();
        if request.reply.send(messages).is_err() {
            // Caller gave up on its deadline. Restore the entries (with
            // their original sequence numbers) so nothing is lost.
            debug!(topic = %request.topic, "get-items caller gone, restoring popped entries");
            for entry in popped {
                heap.push(entry);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use std::time::Duration;

    fn test_message(topic: &str, priority: u32) -> Message {
        Message {
            id: Id::generate(10),
            topic: topic.to_string(),
            priority,
            namespace_id: Id::generate(10),
            payload: vec![1, 2, 3],
            metadata: Vec::new(),
            deliver_after: Duration::ZERO,
            ttl: Duration::from_secs(60),
        }
    }

    fn test_task() -> BufferTask {
        let (_ingest_tx, ingest_rx) = mpsc::channel(8);
        let (_api_tx, api_rx) = mpsc::channel(8);
        BufferTask {
            ingest_rx,
            api_rx,
            buffers: HashMap::new(),
            next_seq: 0,
        }
    }

    #[test]
    fn ingest_replies_one_status_per_message_in_order() {
        let mut task = test_task();
        let batch = vec![
            test_message("a", 1),
            test_message("b", 2),
            test_message("a", 3),
        ];
        let reply = task.process_ingest(batch);
        assert_eq!(reply, vec![PrefetchStatus::Ok; 3]);
    }

    #[test]
    fn topic_heaps_never_exceed_the_prefetch_bound() {
        let mut task = test_task();
        let batch: Vec<Message> = (0..150).map(|i| test_message("hot", i)).collect();

        let reply = task.process_ingest(batch);

        assert_eq!(reply.len(), 150);
        assert!(reply[..MAX_PREFETCH_ITEM_COUNT]
            .iter()
            .all(|s| *s == PrefetchStatus::Ok));
        assert!(reply[MAX_PREFETCH_ITEM_COUNT..]
            .iter()
            .all(|s| *s == PrefetchStatus::Backoff));
        assert_eq!(task.buffers["hot"].len(), MAX_PREFETCH_ITEM_COUNT);
    }

    #[test]
    fn rejection_is_per_topic() {
        let mut task = test_task();
        let full: Vec<Message> = (0..MAX_PREFETCH_ITEM_COUNT as u32)
            .map(|i| test_message("full", i))
            .collect();
        task.process_ingest(full);

        let reply = task.process_ingest(vec![test_message("full", 0), test_message("idle", 0)]);
        assert_eq!(reply, vec![PrefetchStatus::Backoff, PrefetchStatus::Ok]);
    }

    #[test]
    fn get_items_pops_in_ascending_priority_order() {
        let mut task = test_task();
        let priorities = [10u32, 91_928_347, 700, 1];
        task.process_ingest(priorities.iter().map(|p| test_message("t", *p)).collect());

        let (reply_tx, mut reply_rx) = oneshot::channel();
        task.process_get_items(GetItemsRequest {
            topic: "t".to_string(),
            limit: Some(10),
            reply: reply_tx,
        });

        let messages = reply_rx.try_recv().unwrap();
        let got: Vec<u32> = messages.iter().map(|m| m.priority).collect();
        assert_eq!(got, vec![1, 10, 700, 91_928_347]);
    }

    #[test]
    fn equal_priorities_pop_in_insertion_order() {
        let mut task = test_task();
        let batch: Vec<Message> = (0..5)
            .map(|i| {
                let mut msg = test_message("t", 7);
                msg.payload = vec![i];
                msg
            })
            .collect();
        task.process_ingest(batch);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        task.process_get_items(GetItemsRequest {
            topic: "t".to_string(),
            limit: None,
            reply: reply_tx,
        });

        let messages = reply_rx.try_recv().unwrap();
        let got: Vec<u8> = messages.iter().map(|m| m.payload[0]).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn get_items_respects_the_default_limit() {
        let mut task = test_task();
        let batch: Vec<Message> = (0..50).map(|i| test_message("t", i)).collect();
        task.process_ingest(batch);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        task.process_get_items(GetItemsRequest {
            topic: "t".to_string(),
            limit: None,
            reply: reply_tx,
        });

        let messages = reply_rx.try_recv().unwrap();
        assert_eq!(messages.len(), DEFAULT_DEQUEUE_LIMIT_PER_TOPIC);
    }

    #[test]
    fn unknown_topic_returns_empty() {
        let mut task = test_task();
        let (reply_tx, mut reply_rx) = oneshot::channel();
        task.process_get_items(GetItemsRequest {
            topic: "nothing".to_string(),
            limit: None,
            reply: reply_tx,
        });
        assert!(reply_rx.try_recv().unwrap().is_empty());
    }

    #[test]
    fn dropped_reply_restores_popped_entries() {
        let mut task = test_task();
        task.process_ingest((0..10).map(|i| test_message("t", i)).collect());

        let (reply_tx, reply_rx) = oneshot::channel();
        drop(reply_rx);
        task.process_get_items(GetItemsRequest {
            topic: "t".to_string(),
            limit: Some(4),
            reply: reply_tx,
        });

        assert_eq!(task.buffers["t"].len(), 10);

        // And a later pop still delivers in priority order.
        let (reply_tx, mut reply_rx) = oneshot::channel();
        task.process_get_items(GetItemsRequest {
            topic: "t".to_string(),
            limit: Some(3),
            reply: reply_tx,
        });
        let got: Vec<u32> = reply_rx
            .try_recv()
            .unwrap()
            .iter()
            .map(|m| m.priority)
            .collect();
        assert_eq!(got, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn spawned_buffer_serves_ingest_and_get_items() {
        let (buffer, handle) = PriorityBuffer::spawn();

        let statuses = buffer
            .ingest(vec![test_message("t", 5), test_message("t", 2)])
            .await
            .unwrap();
        assert_eq!(statuses, vec![PrefetchStatus::Ok, PrefetchStatus::Ok]);

        let messages = buffer.get_items("t", Some(10)).await.unwrap();
        let got: Vec<u32> = messages.iter().map(|m| m.priority).collect();
        assert_eq!(got, vec![2, 5]);

        handle.stop().await;
        assert!(matches!(
            buffer.get_items("t", None).await,
            Err(BufferError::Closed)
        ));
    }
}
