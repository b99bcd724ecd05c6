use std::time::Duration;

use chrono::Utc;
use sqlx::postgres::types::PgInterval;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};

use crate::db::{Shard, DEFAULT_LIMIT_ROWS};
use crate::error::DbError;
use crate::id::Id;
use crate::message::Message;

/// Database operations for [Message] records. Stateless — every operation
/// takes the shard to run against.
#[derive(Default)]
pub struct MessageRepository;

impl MessageRepository {
    pub fn new() -> Self {
        Self
    }

    /// Insert a message into the shard, generating its id and deriving the
    /// delivery window. The generated id is written back into `item`.
    pub async fn save(&self, shard: &Shard, item: &mut Message) -> Result<(), DbError> {
        let statement = r#"
            INSERT INTO messages (
                id, topic, priority, namespace,
                payload, metadata, deliverafter, ttl,
                readyat, expiresat
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#;

        let new_id = Id::generate(shard.id());
        let now = Utc::now();

        sqlx::query(statement)
            .bind(new_id)
            .bind(item.topic.as_str())
            .bind(item.priority as i64)
            .bind(item.namespace_id)
            .bind(item.payload.as_slice())
            .bind(item.metadata.as_slice())
            .bind(interval(item.deliver_after))
            .bind(interval(item.ttl))
            .bind(now + chrono::Duration::milliseconds(item.deliver_after.as_millis() as i64))
            .bind(now + chrono::Duration::milliseconds(item.ttl.as_millis() as i64))
            .execute(shard.pool())
            .await?;

        item.id = new_id;
        Ok(())
    }

    /// Delete the message on ack; put it back up for delivery on nack.
    pub async fn ack_nack(&self, shard: &Shard, id: &Id, ack: bool) -> Result<(), DbError> {
        let statement = if ack {
            "DELETE FROM messages WHERE id = $1"
        } else {
            "UPDATE messages SET prefetched = FALSE WHERE id = $1"
        };
        sqlx::query(statement).bind(id).execute(shard.pool()).await?;
        Ok(())
    }

    /// Fetch messages whose delivery window is open, bounded per topic and
    /// overall, ordered by ascending priority.
    ///
    /// Rows are ranked by id within each topic so that at most
    /// `max_rows_by_topic` of the oldest rows per topic are returned; the
    /// time-sortable id token makes id order approximate age order.
    pub async fn find_messages_ready_for_delivery(
        &self,
        shard: &Shard,
        prefetched: bool,
        excluded_topics: &[String],
        max_rows_by_topic: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Message>, DbError> {
        let statement = r#"
            WITH ranked AS (
                SELECT id, topic, priority, payload, metadata,
                       ROW_NUMBER() OVER (PARTITION BY topic ORDER BY id) AS rn
                FROM messages
                WHERE readyat <= $1 AND expiresat > $1
                  AND prefetched = $2 AND NOT topic = ANY($3)
                ORDER BY priority
            )
            SELECT id, topic, priority, payload, metadata FROM ranked
            WHERE rn <= $4 LIMIT $5
        "#;

        let results = sqlx::query(statement)
            .bind(Utc::now())
            .bind(prefetched)
            .bind(excluded_topics)
            .bind(max_rows_by_topic)
            .bind(limit.unwrap_or(DEFAULT_LIMIT_ROWS))
            .try_map(row_to_message)
            .fetch_all(shard.pool())
            .await?;

        Ok(results)
    }

    /// Flip the prefetched flag for a batch of ids inside a transaction.
    /// The transaction is returned uncommitted: the caller commits only
    /// after the downstream hand-off succeeded. Dropping the handle rolls
    /// the update back.
    pub async fn update_prefetched_batch(
        &self,
        shard: &Shard,
        ids: &[Id],
        prefetched: bool,
    ) -> Result<Transaction<'static, Postgres>, DbError> {
        let mut tx = shard.pool().begin().await?;

        sqlx::query("UPDATE messages SET prefetched = $1 WHERE id = ANY($2)")
            .bind(prefetched)
            .bind(ids)
            .execute(&mut *tx)
            .await?;

        Ok(tx)
    }
}

/// Map a delivery-query row into a domain message. Columns not selected by
/// the query (namespace, durations) stay at their zero values — consumers
/// of the ready batch only use id, topic, priority, payload and metadata.
fn row_to_message(row: PgRow) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        priority: row.try_get::<i64, _>("priority")? as u32,
        namespace_id: Id::default(),
        payload: row.try_get::<Option<Vec<u8>>, _>("payload")?.unwrap_or_default(),
        metadata: row.try_get::<Option<Vec<u8>>, _>("metadata")?.unwrap_or_default(),
        deliver_after: Duration::ZERO,
        ttl: Duration::ZERO,
    })
}

fn interval(d: Duration) -> PgInterval {
    PgInterval {
        months: 0,
        days: 0,
        microseconds: d.as_micros() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_carries_microsecond_precision() {
        let iv = interval(Duration::from_secs(90));
        assert_eq!(iv.months, 0);
        assert_eq!(iv.days, 0);
        assert_eq!(iv.microseconds, 90_000_000);

        assert_eq!(interval(Duration::ZERO).microseconds, 0);
        assert_eq!(interval(Duration::from_millis(1500)).microseconds, 1_500_000);
    }
}
