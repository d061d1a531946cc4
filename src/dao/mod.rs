use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub mod key_record;

/// 建表脚本，编译期嵌入
const INIT_SQL: &str = include_str!("../../data/init.sql");

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// 打开（必要时创建）位于 `path` 的 SQLite 数据库
pub async fn open_sqlite_pool(path: &Path, max_connections: u32) -> anyhow::Result<SqlitePool> {
    // 确保数据库目录存在
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir).await?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// 内存数据库，只保留一个永不过期的连接，否则每个连接都是一个新的空库
pub async fn open_memory_pool() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// 执行建表脚本，可重复调用
pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // 支持多条 SQL 语句分号分割执行
    for statement in INIT_SQL.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt).execute(pool).await?;
        }
    }
    Ok(())
}
