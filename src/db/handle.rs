//! Client handles bound to one (data source, database) pair.

use crate::db::memory::MemoryDb;
use crate::error::KvResult;
use crate::models::DbIndex;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Connection source behind a [`BoundHandle`].
pub(crate) enum HandleBackend {
    Redis(deadpool_redis::Pool),
    Cluster(deadpool_redis::cluster::Pool),
    Memory(MemoryDb),
}

impl HandleBackend {
    fn kind(&self) -> &'static str {
        match self {
            HandleBackend::Redis(_) => "redis",
            HandleBackend::Cluster(_) => "redis-cluster",
            HandleBackend::Memory(_) => "memory",
        }
    }
}

struct BoundHandleInner {
    source: String,
    database: DbIndex,
    backend: HandleBackend,
}

/// A client whose every command targets one fixed (data source, database) pair.
///
/// Cloning is cheap and clones share the same underlying pool. Handles are
/// built once per pair by the data source's handle cache; use
/// [`BoundHandle::same`] to check whether two values are that one instance.
#[derive(Clone)]
pub struct BoundHandle {
    inner: Arc<BoundHandleInner>,
}

impl std::fmt::Debug for BoundHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundHandle")
            .field("source", &self.inner.source)
            .field("database", &self.inner.database)
            .field("backend", &self.inner.backend.kind())
            .finish()
    }
}

impl BoundHandle {
    pub(crate) fn new(source: impl Into<String>, database: DbIndex, backend: HandleBackend) -> Self {
        Self {
            inner: Arc::new(BoundHandleInner {
                source: source.into(),
                database,
                backend,
            }),
        }
    }

    /// Name of the data source this handle belongs to.
    pub fn source(&self) -> &str {
        &self.inner.source
    }

    /// Database every command is executed against.
    pub fn database(&self) -> DbIndex {
        self.inner.database
    }

    /// True if both values refer to the same cached handle.
    pub fn same(&self, other: &BoundHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub async fn ping(&self) -> KvResult<String> {
        with_connection!(&self.inner.backend,
            |conn| Ok(redis::cmd("PING").query_async::<String>(&mut conn).await?),
            |_db| Ok("PONG".to_string()),
        )
    }

    pub async fn get(&self, key: &str) -> KvResult<Option<String>> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.get(key).await?),
            |db| db.get(key),
        )
    }

    pub async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.set::<_, _, ()>(key, value).await?),
            |db| db.set(key, value, None),
        )
    }

    /// Set a value that expires after `ttl` (rounded down to whole seconds, at least one).
    pub async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> KvResult<()> {
        let seconds = ttl.as_secs().max(1);
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.set_ex::<_, _, ()>(key, value, seconds).await?),
            |db| db.set(key, value, Some(Duration::from_secs(seconds))),
        )
    }

    /// Returns the number of keys removed.
    pub async fn del(&self, key: &str) -> KvResult<usize> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.del(key).await?),
            |db| db.del(key),
        )
    }

    pub async fn exists(&self, key: &str) -> KvResult<bool> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.exists(key).await?),
            |db| db.exists(key),
        )
    }

    /// Returns false if the key does not exist.
    pub async fn expire(&self, key: &str, ttl: Duration) -> KvResult<bool> {
        let seconds = ttl.as_secs().max(1);
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.expire(key, seconds as i64).await?),
            |db| db.expire(key, Duration::from_secs(seconds)),
        )
    }

    pub async fn incr(&self, key: &str, delta: i64) -> KvResult<i64> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.incr(key, delta).await?),
            |db| db.incr(key, delta),
        )
    }

    /// Returns the list length after the push.
    pub async fn lpush(&self, key: &str, value: &str) -> KvResult<usize> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.lpush(key, value).await?),
            |db| db.lpush(key, value),
        )
    }

    /// Returns the list length after the push.
    pub async fn rpush(&self, key: &str, value: &str) -> KvResult<usize> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.rpush(key, value).await?),
            |db| db.rpush(key, value),
        )
    }

    pub async fn lpop(&self, key: &str) -> KvResult<Option<String>> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.lpop(key, None).await?),
            |db| db.lpop(key),
        )
    }

    pub async fn rpop(&self, key: &str) -> KvResult<Option<String>> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.rpop(key, None).await?),
            |db| db.rpop(key),
        )
    }

    pub async fn llen(&self, key: &str) -> KvResult<usize> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.llen(key).await?),
            |db| db.llen(key),
        )
    }

    pub async fn lrange(&self, key: &str, start: isize, stop: isize) -> KvResult<Vec<String>> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.lrange(key, start, stop).await?),
            |db| db.lrange(key, start, stop),
        )
    }

    /// Returns true when the field is new.
    pub async fn hset(&self, key: &str, field: &str, value: &str) -> KvResult<bool> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.hset(key, field, value).await?),
            |db| db.hset(key, field, value),
        )
    }

    pub async fn hget(&self, key: &str, field: &str) -> KvResult<Option<String>> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.hget(key, field).await?),
            |db| db.hget(key, field),
        )
    }

    pub async fn hdel(&self, key: &str, field: &str) -> KvResult<usize> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.hdel(key, field).await?),
            |db| db.hdel(key, field),
        )
    }

    pub async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        with_connection!(&self.inner.backend,
            |conn| Ok(conn.hgetall(key).await?),
            |db| db.hgetall(key),
        )
    }

    /// Number of keys in this handle's database.
    pub async fn dbsize(&self) -> KvResult<u64> {
        with_connection!(&self.inner.backend,
            |conn| Ok(redis::cmd("DBSIZE").query_async::<u64>(&mut conn).await?),
            |db| db.dbsize(),
        )
    }

    /// Remove every key in this handle's database.
    pub async fn flushdb(&self) -> KvResult<()> {
        with_connection!(&self.inner.backend,
            |conn| Ok(redis::cmd("FLUSHDB").query_async::<()>(&mut conn).await?),
            |db| db.flushdb(),
        )
    }
}
