//! Backend dispatch macros for reducing code duplication.
//!
//! Standalone and cluster pools hand out different connection types that both
//! implement `redis::aio::ConnectionLike`, so the same command body is expanded
//! once per pool type. The memory backend gets its own body.

/// Check out a connection for a [`HandleBackend`](crate::db::handle::HandleBackend)
/// and run the matching body.
///
/// # Example
///
/// ```ignore
/// with_connection!(&self.inner.backend,
///     |conn| Ok(conn.get(key).await?),
///     |db| db.get(key),
/// )
/// ```
macro_rules! with_connection {
    ($backend:expr, |$conn:ident| $remote:expr, |$db:ident| $local:expr $(,)?) => {
        match $backend {
            $crate::db::handle::HandleBackend::Redis(pool) => {
                let started = ::std::time::Instant::now();
                let mut $conn = pool.get().await.map_err(|e| {
                    $crate::error::KvError::pool_checkout(e, started.elapsed())
                })?;
                $remote
            }
            $crate::db::handle::HandleBackend::Cluster(pool) => {
                let started = ::std::time::Instant::now();
                let mut $conn = pool.get().await.map_err(|e| {
                    $crate::error::KvError::pool_checkout(e, started.elapsed())
                })?;
                $remote
            }
            $crate::db::handle::HandleBackend::Memory($db) => $local,
        }
    };
}
