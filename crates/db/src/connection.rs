use std::str::FromStr;
use std::time::Duration;

use parley_core::config::DatabaseConfig;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};

pub type DbPool = sqlx::SqlitePool;

pub async fn connect(database_url: &str) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(database_url, 5, 30).await
}

pub async fn connect_from_config(config: &DatabaseConfig) -> Result<DbPool, sqlx::Error> {
    connect_with_settings(&config.url, config.max_connections, config.timeout_secs).await
}

/// Opens a pool, creating the database file when it does not exist yet.
///
/// In-memory URLs are pinned to a single connection: every sqlite connection
/// to `:memory:` would otherwise see its own empty database.
pub async fn connect_with_settings(
    database_url: &str,
    max_connections: u32,
    timeout_secs: u64,
) -> Result<DbPool, sqlx::Error> {
    let in_memory = is_in_memory(database_url);
    let url = if database_url == ":memory:" { "sqlite::memory:" } else { database_url };

    let mut options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));
    if !in_memory {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let mut pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(timeout_secs.max(1)));
    if in_memory {
        pool = pool.max_connections(1).min_connections(1).idle_timeout(None).max_lifetime(None);
    }

    pool.connect_with(options).await
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.contains(":memory:") || database_url.contains("mode=memory")
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::{connect_with_settings, is_in_memory};

    #[test]
    fn recognises_in_memory_urls() {
        assert!(is_in_memory(":memory:"));
        assert!(is_in_memory("sqlite::memory:"));
        assert!(is_in_memory("sqlite://parley?mode=memory&cache=shared"));
        assert!(!is_in_memory("sqlite://parley.db"));
    }

    #[tokio::test]
    async fn in_memory_pool_keeps_one_shared_database() {
        let pool = connect_with_settings("sqlite::memory:", 8, 5).await.expect("connect");
        sqlx::query("CREATE TABLE scratch (id INTEGER)").execute(&pool).await.expect("create");
        sqlx::query("INSERT INTO scratch (id) VALUES (1)").execute(&pool).await.expect("insert");

        let count = sqlx::query("SELECT COUNT(*) AS count FROM scratch")
            .fetch_one(&pool)
            .await
            .expect("count")
            .get::<i64, _>("count");
        assert_eq!(count, 1);
    }
}
