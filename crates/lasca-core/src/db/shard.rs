use std::collections::HashMap;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::error::ShardError;

/// The `messages` table lives on every shard.
const MESSAGES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id BYTEA PRIMARY KEY,
    topic TEXT NOT NULL,
    priority BIGINT NOT NULL,
    namespace BYTEA NOT NULL,
    payload BYTEA,
    metadata BYTEA,
    deliverafter INTERVAL,
    ttl INTERVAL,
    readyat TIMESTAMPTZ NOT NULL,
    expiresat TIMESTAMPTZ NOT NULL,
    prefetched BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE INDEX IF NOT EXISTS idx_messages_topic_id ON messages (topic, id);
CREATE INDEX IF NOT EXISTS idx_messages_ready
    ON messages (prefetched, readyat, expiresat) WHERE prefetched = FALSE;
"#;

/// Namespaces are non-sharded data and only live on the main shard.
const NAMESPACES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS namespaces (
    id BYTEA PRIMARY KEY,
    name TEXT NOT NULL
);
"#;

/// A connected database shard.
pub struct Shard {
    id: u32,
    url: String,
    pool: PgPool,
    main: bool,
}

impl Shard {
    /// The shard's numeric id — the value embedded in every record id the
    /// shard owns.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The connection pool shared by every worker on this shard.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Whether this shard holds the non-sharded data (namespaces).
    pub fn is_main(&self) -> bool {
        self.main
    }

    /// The connection string the shard was configured with.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build a shard around a lazy pool that never connects. Lets worker
    /// tests exercise loop and shutdown mechanics without a database.
    #[cfg(test)]
    pub(crate) fn disconnected_for_tests(id: u32, main: bool) -> Shard {
        let url = "postgres://user:pw@127.0.0.1:1/unreachable";
        Shard {
            id,
            url: url.to_string(),
            pool: PgPoolOptions::new()
                .acquire_timeout(std::time::Duration::from_millis(200))
                .connect_lazy(url)
                .expect("parse test url"),
            main,
        }
    }

    /// Apply the shard schema. Idempotent, so reconnecting to an existing
    /// shard is a no-op.
    async fn initialize(&self) -> Result<(), sqlx::Error> {
        sqlx::raw_sql(MESSAGES_SCHEMA).execute(&self.pool).await?;
        if self.main {
            sqlx::raw_sql(NAMESPACES_SCHEMA).execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// Maintains the set of active database shards. Built once at startup and
/// read-only afterwards; exactly one shard is designated as "main".
#[derive(Default)]
pub struct ShardManager {
    shards: Vec<Arc<Shard>>,
    index: HashMap<u32, Arc<Shard>>,
}

impl ShardManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect to a shard, initialize its schema, and register it.
    pub async fn add(
        &mut self,
        shard_id: u32,
        main: bool,
        url: &str,
    ) -> Result<Arc<Shard>, ShardError> {
        if self.index.contains_key(&shard_id) {
            return Err(ShardError::Duplicate(shard_id));
        }

        let pool = PgPoolOptions::new()
            .connect(url)
            .await
            .map_err(|source| ShardError::Connect {
                id: shard_id,
                source,
            })?;

        let shard = Shard {
            id: shard_id,
            url: url.to_string(),
            pool,
            main,
        };
        if let Err(source) = shard.initialize().await {
            shard.pool.close().await;
            return Err(ShardError::Initialize {
                id: shard_id,
                source,
            });
        }

        info!(shard = shard_id, main, "shard connected");

        let shard = Arc::new(shard);
        self.shards.push(Arc::clone(&shard));
        self.index.insert(shard_id, Arc::clone(&shard));
        Ok(shard)
    }

    /// The list of active shards, in registration order.
    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    /// Look up an active shard by its id.
    pub fn get(&self, id: u32) -> Option<Arc<Shard>> {
        self.index.get(&id).cloned()
    }

    /// The shard that stores common non-sharded data.
    pub fn main_shard(&self) -> Option<Arc<Shard>> {
        self.shards.iter().find(|s| s.main).cloned()
    }

    /// Close all shard connections. Closing never aborts early: every
    /// shard gets its turn.
    pub async fn close(&self) {
        for shard in &self.shards {
            shard.pool.close().await;
            debug!(shard = shard.id, "closed connection to shard");
        }
    }
}
