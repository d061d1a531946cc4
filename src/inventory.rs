//! # Key inventory
//!
//! Durable store of the trial and paid key pools. Every public operation
//! absorbs storage errors at this boundary: the `try_*` variants return the
//! typed [`InventoryError`], the plain variants log it and hand back a
//! negative result so request handling never unwinds past here.

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::StorageConfig;
use crate::dao::key_record::{self, KeyPool, KeyRecord};
use crate::dao::{init_db, open_memory_pool, open_sqlite_pool};
use crate::error::InventoryError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: u64,
    pub used: u64,
    pub available: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct InventoryStats {
    pub trial: PoolStats,
    pub paid: PoolStats,
}

impl InventoryStats {
    pub fn pool(&self, pool: KeyPool) -> PoolStats {
        match pool {
            KeyPool::Trial => self.trial,
            KeyPool::Paid => self.paid,
        }
    }
}

/// Outcome of a bulk import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkInsertReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

impl BulkInsertReport {
    pub fn submitted(&self) -> usize {
        self.inserted + self.duplicates + self.failed
    }
}

pub struct KeyInventory {
    pool: SqlitePool,
    // takes and marks inside this process go through one lock per pool
    trial_lock: Mutex<()>,
    paid_lock: Mutex<()>,
}

impl KeyInventory {
    /// Open the on-disk inventory, creating the file, its directory and the schema if absent.
    pub async fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        let pool = open_sqlite_pool(&config.db_path, config.max_connections).await?;
        init_db(&pool).await?;
        info!(db_path = %config.db_path.display(), "Key inventory opened");
        Ok(Self::from_pool(pool))
    }

    /// Throwaway inventory backed by an in-memory database
    pub async fn open_in_memory() -> anyhow::Result<Self> {
        let pool = open_memory_pool().await?;
        init_db(&pool).await?;
        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            trial_lock: Mutex::new(()),
            paid_lock: Mutex::new(()),
        }
    }

    fn lock_for(&self, pool: KeyPool) -> &Mutex<()> {
        match pool {
            KeyPool::Trial => &self.trial_lock,
            KeyPool::Paid => &self.paid_lock,
        }
    }

    pub async fn try_insert(&self, pool: KeyPool, value: &str) -> Result<(), InventoryError> {
        if value.trim().is_empty() {
            return Err(InventoryError::InvalidKey {
                pool,
                reason: "key is empty".to_string(),
            });
        }
        key_record::insert_key(&self.pool, pool, value)
            .await
            .map_err(|e| InventoryError::from_insert(pool, value, e))?;
        Ok(())
    }

    /// Insert one key. `false` on duplicate, malformed value or storage failure.
    pub async fn insert(&self, pool: KeyPool, value: &str) -> bool {
        match self.try_insert(pool, value).await {
            Ok(()) => true,
            Err(e) => {
                log_rejected_insert(&e);
                false
            }
        }
    }

    /// Insert keys in order, skipping each failure without aborting the rest.
    pub async fn try_bulk_insert<I, S>(&self, pool: KeyPool, values: I) -> BulkInsertReport
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut report = BulkInsertReport::default();
        for value in values {
            match self.try_insert(pool, value.as_ref()).await {
                Ok(()) => report.inserted += 1,
                Err(e) => {
                    log_rejected_insert(&e);
                    match e {
                        InventoryError::DuplicateKey { .. } => report.duplicates += 1,
                        _ => report.failed += 1,
                    }
                }
            }
        }
        info!(
            pool = %pool,
            inserted = report.inserted,
            duplicates = report.duplicates,
            failed = report.failed,
            "Bulk insert finished"
        );
        report
    }

    pub async fn bulk_insert<I, S>(&self, pool: KeyPool, values: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.try_bulk_insert(pool, values).await.inserted
    }

    /// Atomically claim one unused key.
    pub async fn try_take(&self, pool: KeyPool) -> Result<String, InventoryError> {
        let _guard = self.lock_for(pool).lock().await;
        match key_record::take_next_unused_key(&self.pool, pool).await? {
            Some(key) => {
                debug!(pool = %pool, "Key taken");
                Ok(key)
            }
            None => Err(InventoryError::PoolExhausted(pool)),
        }
    }

    pub async fn take(&self, pool: KeyPool) -> Option<String> {
        match self.try_take(pool).await {
            Ok(key) => Some(key),
            Err(InventoryError::PoolExhausted(_)) => {
                warn!(pool = %pool, "Key pool exhausted");
                None
            }
            Err(e) => {
                error!(pool = %pool, error = %e, "Failed to take key");
                None
            }
        }
    }

    /// `Ok(true)` only when the key existed and was unused until now.
    pub async fn try_mark_used(&self, pool: KeyPool, value: &str) -> Result<bool, InventoryError> {
        let _guard = self.lock_for(pool).lock().await;
        let rows = key_record::mark_key_used(&self.pool, pool, value).await?;
        Ok(rows > 0)
    }

    pub async fn mark_used(&self, pool: KeyPool, value: &str) -> bool {
        match self.try_mark_used(pool, value).await {
            Ok(changed) => changed,
            Err(e) => {
                error!(pool = %pool, error = %e, "Failed to mark key used");
                false
            }
        }
    }

    pub async fn try_pool_stats(&self, pool: KeyPool) -> Result<PoolStats, InventoryError> {
        let counts = key_record::count_keys(&self.pool, pool).await?;
        let total = u64::try_from(counts.total).unwrap_or_default();
        let used = u64::try_from(counts.used).unwrap_or_default().min(total);
        Ok(PoolStats {
            total,
            used,
            available: total - used,
        })
    }

    pub async fn try_stats(&self) -> Result<InventoryStats, InventoryError> {
        Ok(InventoryStats {
            trial: self.try_pool_stats(KeyPool::Trial).await?,
            paid: self.try_pool_stats(KeyPool::Paid).await?,
        })
    }

    /// `None` only when storage could not be read.
    pub async fn stats(&self) -> Option<InventoryStats> {
        match self.try_stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                error!(error = %e, "Failed to read key statistics");
                None
            }
        }
    }

    pub async fn record(&self, pool: KeyPool, value: &str) -> Result<Option<KeyRecord>, InventoryError> {
        Ok(key_record::get_key_record(&self.pool, pool, value).await?)
    }

    pub async fn records(&self, pool: KeyPool) -> Result<Vec<KeyRecord>, InventoryError> {
        Ok(key_record::list_keys(&self.pool, pool).await?)
    }

    pub async fn insert_trial(&self, value: &str) -> bool {
        self.insert(KeyPool::Trial, value).await
    }

    pub async fn insert_paid(&self, value: &str) -> bool {
        self.insert(KeyPool::Paid, value).await
    }

    pub async fn bulk_insert_trial<I, S>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.bulk_insert(KeyPool::Trial, values).await
    }

    pub async fn bulk_insert_paid<I, S>(&self, values: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.bulk_insert(KeyPool::Paid, values).await
    }

    pub async fn take_trial(&self) -> Option<String> {
        self.take(KeyPool::Trial).await
    }

    pub async fn take_paid(&self) -> Option<String> {
        self.take(KeyPool::Paid).await
    }

    pub async fn mark_trial_used(&self, value: &str) -> bool {
        self.mark_used(KeyPool::Trial, value).await
    }

    pub async fn mark_paid_used(&self, value: &str) -> bool {
        self.mark_used(KeyPool::Paid, value).await
    }

    /// Release the storage handle. Waits for in-flight connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Key inventory closed");
    }
}

fn log_rejected_insert(err: &InventoryError) {
    match err {
        InventoryError::DuplicateKey { pool, value } => {
            warn!(pool = %pool, value = %value, "Duplicate key skipped");
        }
        InventoryError::InvalidKey { pool, reason } => {
            warn!(pool = %pool, reason = %reason, "Malformed key skipped");
        }
        other => error!(error = %other, "Failed to insert key"),
    }
}
