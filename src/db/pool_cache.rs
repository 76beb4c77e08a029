//! Credential-scoped pool cache.
//!
//! Maps each distinct [`Credentials`] triple to one lazily built [`SqlPool`].
//!
//! # Concurrency
//!
//! - **`OnceCell` per key**: single-flight construction. Concurrent callers
//!   with the same credentials wait for one build and all receive the same
//!   pool; callers with other credentials never wait on it.
//! - **Brief map locks**: the `RwLock` only guards cell lookup/insertion and
//!   is never held across a connect.
//! - **Failed builds leave the cell empty**, so the next caller retries.
//!
//! # Bounding
//!
//! Both limits are off by default, in which case pools live until
//! [`PoolCache::close`]:
//! - `max_pools` rejects construction for new credentials once that many
//!   pools are cached.
//! - `pool_idle_ttl` starts a reaper that closes pools with nothing checked
//!   out, no caller holding them, and no use for longer than the TTL.

use crate::config::PoolOptions;
use crate::db::pool::SqlPool;
use crate::error::{ConnectionFailure, DbError, DbResult};
use crate::models::Credentials;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type PoolCell = Arc<OnceCell<SqlPool>>;

pub struct PoolCache {
    options: PoolOptions,
    pools: RwLock<HashMap<Credentials, PoolCell>>,
    /// std::sync::Mutex: set once at startup, taken once at shutdown
    reaper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl PoolCache {
    /// Create a cache. Spawns the idle reaper when `pool_idle_ttl` is set,
    /// so this must run inside a Tokio runtime in that case.
    pub fn new(options: PoolOptions) -> Arc<Self> {
        let cache = Arc::new(Self {
            options,
            pools: RwLock::new(HashMap::new()),
            reaper: std::sync::Mutex::new(None),
        });

        if let Some(ttl) = cache.options.pool_idle_ttl() {
            // Weak reference so the task never keeps the cache alive
            let weak = Arc::downgrade(&cache);
            let interval = cache.options.reaper_interval();
            let handle = tokio::spawn(Self::reaper_task(weak, interval, ttl));
            if let Ok(mut guard) = cache.reaper.lock() {
                *guard = Some(handle);
            }
            info!(ttl_secs = ttl.as_secs(), "Idle pool reaper started");
        }

        cache
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Get the pool for `credentials`, building it on first use.
    pub async fn acquire(&self, credentials: &Credentials) -> DbResult<SqlPool> {
        let cell = self.cell_for(credentials).await?;

        let pool = cell
            .get_or_try_init(|| async {
                debug!(url = %credentials.masked_url(), "Creating cached pool");
                SqlPool::connect(credentials, &self.options).await
            })
            .await?
            .clone();

        // A pool closed by the reaper between lookup and use is replaced
        if pool.is_closed() {
            self.evict(credentials, &cell).await;
            return Box::pin(self.acquire(credentials)).await;
        }

        pool.touch();
        Ok(pool)
    }

    /// Build a pool that is not cached. The caller closes it after one operation.
    pub async fn create_ephemeral(&self, credentials: &Credentials) -> DbResult<SqlPool> {
        debug!(url = %credentials.masked_url(), "Creating ephemeral pool");
        SqlPool::connect(credentials, &self.options).await
    }

    /// Number of cached pools that finished construction.
    pub async fn pool_count(&self) -> usize {
        let pools = self.pools.read().await;
        pools.values().filter(|cell| cell.get().is_some()).count()
    }

    /// Close every cached pool and stop the reaper.
    pub async fn close(&self) {
        if let Ok(mut guard) = self.reaper.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }

        // Drain under lock, close outside lock
        let drained: Vec<_> = {
            let mut pools = self.pools.write().await;
            pools.drain().collect()
        };

        for (_, cell) in drained {
            if let Some(pool) = cell.get() {
                pool.close().await;
            }
        }
        info!("All cached pools closed");
    }

    /// Look up or insert the cell for `credentials`, enforcing `max_pools`.
    async fn cell_for(&self, credentials: &Credentials) -> DbResult<PoolCell> {
        {
            let pools = self.pools.read().await;
            if let Some(cell) = pools.get(credentials) {
                return Ok(Arc::clone(cell));
            }
        }

        let mut pools = self.pools.write().await;
        // Double-check after acquiring write lock
        if let Some(cell) = pools.get(credentials) {
            return Ok(Arc::clone(cell));
        }

        if self.options.max_pools > 0 {
            // Cells whose build failed stay empty; they do not count
            pools.retain(|_, cell| cell.initialized() || Arc::strong_count(cell) > 1);
            if pools.len() >= self.options.max_pools {
                warn!(
                    max_pools = self.options.max_pools,
                    "Pool cache is full, rejecting new credentials"
                );
                return Err(DbError::connection(
                    ConnectionFailure::Pool,
                    format!(
                        "Too many distinct database credentials in use (limit {})",
                        self.options.max_pools
                    ),
                    "Retry later or raise --max-pools",
                ));
            }
        }

        let cell = Arc::new(OnceCell::new());
        pools.insert(credentials.clone(), Arc::clone(&cell));
        Ok(cell)
    }

    /// Remove `cell` for `credentials` if it is still the registered one.
    async fn evict(&self, credentials: &Credentials, cell: &PoolCell) {
        let mut pools = self.pools.write().await;
        if pools.get(credentials).is_some_and(|c| Arc::ptr_eq(c, cell)) {
            pools.remove(credentials);
        }
    }

    /// Remove and close pools idle for longer than `ttl`. Returns how many were closed.
    ///
    /// Collect-then-act: candidates are gathered under the read lock, each is
    /// re-checked under a brief write lock, and pools are closed outside all locks.
    pub async fn reap_idle(&self, ttl: Duration) -> usize {
        let now = Instant::now();
        let candidates: Vec<Credentials> = {
            let pools = self.pools.read().await;
            pools
                .iter()
                .filter(|(_, cell)| cell.get().is_some_and(|pool| Self::reapable(pool, ttl, now)))
                .map(|(creds, _)| creds.clone())
                .collect()
        };

        let mut reaped = 0;
        for creds in candidates {
            let removed = {
                let mut pools = self.pools.write().await;
                // Re-check: the pool may have been used since the scan
                let still_idle = pools
                    .get(&creds)
                    .and_then(|cell| cell.get())
                    .is_some_and(|pool| Self::reapable(pool, ttl, Instant::now()));
                if still_idle { pools.remove(&creds) } else { None }
            };

            if let Some(pool) = removed.as_ref().and_then(|cell| cell.get()) {
                info!(pool = %pool.name(), "Closing idle pool");
                pool.close().await;
                reaped += 1;
            }
        }
        reaped
    }

    /// Idle for `ttl` and referenced only by the cache. A caller still holding
    /// the pool between checkouts (e.g. while waiting on SQL generation) keeps
    /// it alive.
    fn reapable(pool: &SqlPool, ttl: Duration, now: Instant) -> bool {
        pool.holders() == 1 && pool.is_idle_for(ttl, now)
    }

    /// Exits once the cache is dropped.
    async fn reaper_task(weak: Weak<Self>, interval: Duration, ttl: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(cache) = weak.upgrade() else {
                debug!("Pool cache dropped, reaper exiting");
                return;
            };
            let reaped = cache.reap_idle(ttl).await;
            if reaped > 0 {
                debug!(reaped, "Idle pools reaped");
            }
        }
    }
}

impl std::fmt::Debug for PoolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolCache")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
