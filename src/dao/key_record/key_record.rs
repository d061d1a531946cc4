use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{Result, SqlitePool};
use std::fmt;
use std::str::FromStr;

/// 两个互相独立的 key 池，记录永远不会在池之间移动
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPool {
    Trial,
    Paid,
}

impl KeyPool {
    pub const ALL: [KeyPool; 2] = [KeyPool::Trial, KeyPool::Paid];

    pub fn as_str(self) -> &'static str {
        match self {
            KeyPool::Trial => "trial",
            KeyPool::Paid => "paid",
        }
    }

    /// Backing table. Only these two literals are ever interpolated into SQL.
    pub fn table(self) -> &'static str {
        match self {
            KeyPool::Trial => "trial_keys",
            KeyPool::Paid => "paid_keys",
        }
    }
}

impl fmt::Display for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyPool {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trial" => Ok(KeyPool::Trial),
            "paid" => Ok(KeyPool::Paid),
            other => Err(format!("unknown key pool '{}', expected 'trial' or 'paid'", other)),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct KeyRecord {
    pub id: i64,
    pub key: String,
    pub is_used: bool,
    pub created_at: NaiveDateTime,
    pub used_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
pub struct PoolCounts {
    pub total: i64,
    pub used: i64,
}

/// Insert one key (async). A duplicate surfaces as a unique-constraint database error.
pub async fn insert_key(pool: &SqlitePool, key_pool: KeyPool, value: &str) -> Result<u64> {
    let sql = format!("INSERT INTO {} (key) VALUES (?)", key_pool.table());
    let res = sqlx::query(&sql)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Claim the oldest unused key and mark it used in the same statement (async)
pub async fn take_next_unused_key(pool: &SqlitePool, key_pool: KeyPool) -> Result<Option<String>> {
    let table = key_pool.table();
    let sql = format!(
        r#"
        UPDATE {table} SET
            is_used = 1,
            used_at = datetime('now')
        WHERE id = (SELECT id FROM {table} WHERE is_used = 0 ORDER BY id LIMIT 1)
          AND is_used = 0
        RETURNING key
    "#
    );
    let key = sqlx::query_scalar::<_, String>(&sql)
        .fetch_optional(pool)
        .await?;
    Ok(key)
}

/// Mark a key used if it is still unused (async). Returns rows affected: 0 or 1.
pub async fn mark_key_used(pool: &SqlitePool, key_pool: KeyPool, value: &str) -> Result<u64> {
    let sql = format!(
        "UPDATE {} SET is_used = 1, used_at = datetime('now') WHERE key = ? AND is_used = 0",
        key_pool.table()
    );
    let res = sqlx::query(&sql)
        .bind(value)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Read a key record by value (async)
pub async fn get_key_record(pool: &SqlitePool, key_pool: KeyPool, value: &str) -> Result<Option<KeyRecord>> {
    let sql = format!(
        "SELECT id, key, is_used, created_at, used_at FROM {} WHERE key = ?",
        key_pool.table()
    );
    let record = sqlx::query_as::<_, KeyRecord>(&sql)
        .bind(value)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

/// List all key records of a pool in id order (async)
pub async fn list_keys(pool: &SqlitePool, key_pool: KeyPool) -> Result<Vec<KeyRecord>> {
    let sql = format!(
        "SELECT id, key, is_used, created_at, used_at FROM {} ORDER BY id",
        key_pool.table()
    );
    let records = sqlx::query_as::<_, KeyRecord>(&sql)
        .fetch_all(pool)
        .await?;
    Ok(records)
}

/// Total and used counts of a pool (async)
pub async fn count_keys(pool: &SqlitePool, key_pool: KeyPool) -> Result<PoolCounts> {
    let sql = format!(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN is_used = 1 THEN 1 ELSE 0 END), 0) AS used
        FROM {}
    "#,
        key_pool.table()
    );
    let counts = sqlx::query_as::<_, PoolCounts>(&sql)
        .fetch_one(pool)
        .await?;
    Ok(counts)
}
