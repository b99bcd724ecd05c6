use std::time::Duration;

use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::cache::ObjectCache;
use crate::db::{Shard, DEFAULT_LIMIT_ROWS};
use crate::error::{DbError, NamespaceError};
use crate::id::Id;
use crate::namespace::Namespace;

const CACHE_TTL: Duration = Duration::from_secs(60);
const CACHE_MAX_OBJECTS: usize = 500;

/// Database operations for [Namespace] records, all running against the
/// main shard. Lookups by id are memoized in a bounded TTL cache because
/// every enqueue resolves its namespace first.
pub struct NamespaceRepository {
    items_cache: ObjectCache<Namespace>,
}

impl Default for NamespaceRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRepository {
    pub fn new() -> Self {
        Self::with_cache(ObjectCache::new(CACHE_MAX_OBJECTS, CACHE_TTL))
    }

    /// Build a repository around a caller-configured cache.
    pub fn with_cache(items_cache: ObjectCache<Namespace>) -> Self {
        Self { items_cache }
    }

    /// Insert a namespace, generating its id on the main shard. The
    /// generated id is written back into `item`.
    pub async fn save(&self, shard: &Shard, item: &mut Namespace) -> Result<(), DbError> {
        let new_id = Id::generate(shard.id());
        sqlx::query("INSERT INTO namespaces (id, name) VALUES ($1, $2)")
            .bind(new_id)
            .bind(item.name.as_str())
            .execute(shard.pool())
            .await?;
        item.id = new_id;
        Ok(())
    }

    /// Find a namespace by its string id, going through the cache first.
    pub async fn cached_find_by_string_id(
        &self,
        shard: &Shard,
        id: &str,
    ) -> Result<Option<Namespace>, NamespaceError> {
        if let Some(item) = self.items_cache.get(id) {
            return Ok(Some(item));
        }

        let found = self.find_by_string_id(shard, id).await?;
        if let Some(ref item) = found {
            self.items_cache.put(id, item.clone());
        }
        Ok(found)
    }

    /// Find a namespace by its string id.
    pub async fn find_by_string_id(
        &self,
        shard: &Shard,
        id: &str,
    ) -> Result<Option<Namespace>, NamespaceError> {
        let uid = Id::parse(id)?;
        let found = sqlx::query("SELECT id, name FROM namespaces WHERE id = $1")
            .bind(uid)
            .try_map(row_to_namespace)
            .fetch_optional(shard.pool())
            .await
            .map_err(DbError::from)?;
        Ok(found)
    }

    /// List namespaces, bounded by `limit` (default 100).
    pub async fn find_all(
        &self,
        shard: &Shard,
        limit: Option<i64>,
    ) -> Result<Vec<Namespace>, DbError> {
        let items = sqlx::query("SELECT id, name FROM namespaces LIMIT $1")
            .bind(limit.unwrap_or(DEFAULT_LIMIT_ROWS))
            .try_map(row_to_namespace)
            .fetch_all(shard.pool())
            .await?;
        Ok(items)
    }
}

fn row_to_namespace(row: PgRow) -> Result<Namespace, sqlx::Error> {
    Ok(Namespace {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
    })
}
