use std::time::Duration;

use crate::id::Id;

/// Core message domain type. This is the internal representation shared by
/// the workers and the persistence layer — distinct from the JSON wire
/// shapes at the HTTP boundary.
///
/// `ready_at = now + deliver_after` and `expires_at = now + ttl` are derived
/// at save time and live only in the database; rows past their expiry are
/// never returned by the delivery query.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Id,
    pub topic: String,
    /// Ordering key inside the prefetch buffer. Lower value = higher priority.
    pub priority: u32,
    pub namespace_id: Id,
    pub payload: Vec<u8>,
    pub metadata: Vec<u8>,
    pub deliver_after: Duration,
    pub ttl: Duration,
}
