//! SQLite connections: index stores and source databases.
//!
//! Source databases are opened through a [`ConnectionCache`], an explicitly
//! owned LRU of connection pools keyed by database path. Each entry is a
//! private in-memory copy of the source file (or a read-only file handle
//! when in-memory loading is disabled or fails).

use anyhow::{bail, Context, Result};
use lru::LruCache;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::Mutex;

/// Open (creating if needed) a writable SQLite file used as an index store.
pub async fn connect_store(path: &Path, max_connections: u32) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open store {}", path.display()))?;

    Ok(pool)
}

/// A single-connection in-memory database that lives as long as the pool.
///
/// Foreign keys are not enforced: copied tables arrive in storage order,
/// children possibly before their parents, and may hold orphan rows.
pub async fn connect_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(false);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Open a source database file read-only.
pub async fn open_readonly(path: &Path) -> Result<SqlitePool> {
    if !path.is_file() {
        bail!("SQLite database not found: {}", path.display());
    }
    let options = SqliteConnectOptions::new()
        .filename(path)
        .read_only(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    Ok(pool)
}

/// Copy a source database file into a private in-memory database.
///
/// Tables are recreated from their stored DDL and filled with
/// `INSERT .. SELECT`; indexes, views and triggers follow. Virtual tables
/// are skipped.
pub async fn load_into_memory(path: &Path) -> Result<SqlitePool> {
    if !path.is_file() {
        bail!("SQLite database not found: {}", path.display());
    }

    let pool = connect_memory().await?;
    let mut conn = pool.acquire().await?;

    // A plain path would inherit the in-memory mode of the main database.
    sqlx::query("ATTACH DATABASE ? AS src")
        .bind(readonly_uri(path))
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to attach {}", path.display()))?;

    let objects = sqlx::query(
        r#"
        SELECT type, name, sql FROM src.sqlite_master
        WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%'
        ORDER BY CASE type WHEN 'table' THEN 0 WHEN 'index' THEN 1 WHEN 'view' THEN 2 ELSE 3 END
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;

    let has_tables = objects
        .iter()
        .any(|row| row.get::<String, _>("type") == "table");
    if !has_tables {
        bail!("No tables found in {}", path.display());
    }

    for row in &objects {
        let kind: String = row.get("type");
        let name: String = row.get("name");
        let sql: String = row.get("sql");

        if kind == "table" {
            if sql.trim_start().to_uppercase().starts_with("CREATE VIRTUAL") {
                tracing::debug!(table = %name, "skipping virtual table");
                continue;
            }
            sqlx::query(&sql).execute(&mut *conn).await?;
            let copy = format!(
                "INSERT INTO main.{0} SELECT * FROM src.{0}",
                quote_name(&name)
            );
            sqlx::query(&copy).execute(&mut *conn).await?;
        } else if let Err(e) = sqlx::query(&sql).execute(&mut *conn).await {
            tracing::warn!(object = %name, kind = %kind, "could not recreate object: {}", e);
        }
    }

    sqlx::query("DETACH DATABASE src").execute(&mut *conn).await?;
    drop(conn);

    Ok(pool)
}

/// `file:` URI opening `path` read-only.
fn readonly_uri(path: &Path) -> String {
    let mut uri = String::from("file:");
    for ch in path.to_string_lossy().chars() {
        match ch {
            '%' => uri.push_str("%25"),
            '?' => uri.push_str("%3f"),
            '#' => uri.push_str("%23"),
            c => uri.push(c),
        }
    }
    uri.push_str("?mode=ro");
    uri
}

/// Double-quote a SQLite identifier for use inside generated statements.
pub fn quote_name(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Bounded, least-recently-used cache of source database pools.
///
/// `get_or_load` holds the cache lock while loading, so a path is loaded
/// at most once per cache entry even under concurrent callers. Entries are
/// only ever dropped by eviction.
pub struct ConnectionCache {
    in_memory: bool,
    entries: Mutex<LruCache<PathBuf, SqlitePool>>,
}

impl ConnectionCache {
    pub fn new(capacity: usize, in_memory: bool) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            in_memory,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn get_or_load(&self, path: &Path) -> Result<SqlitePool> {
        let mut entries = self.entries.lock().await;
        if let Some(pool) = entries.get(path) {
            return Ok(pool.clone());
        }

        let pool = if self.in_memory {
            match load_into_memory(path).await {
                Ok(pool) => {
                    tracing::info!(path = %path.display(), "loaded database into memory");
                    pool
                }
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        "in-memory load failed, falling back to read-only file: {:#}",
                        e
                    );
                    open_readonly(path).await?
                }
            }
        } else {
            open_readonly(path).await?
        };

        if let Some((evicted, _)) = entries.push(path.to_path_buf(), pool.clone()) {
            if evicted != path {
                tracing::debug!(path = %evicted.display(), "evicted cached connection");
            }
        }
        Ok(pool)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn contains(&self, path: &Path) -> bool {
        self.entries.lock().await.contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn make_db(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(format!("{}.sqlite", name));
        let pool = connect_store(&path, 1).await.unwrap();
        sqlx::query("CREATE TABLE \"order\" (id INTEGER PRIMARY KEY, item TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE INDEX idx_item ON \"order\"(item)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO \"order\" (item) VALUES ('apple'), ('pear')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;
        path
    }

    #[tokio::test]
    async fn test_load_into_memory_copies_rows() {
        let tmp = TempDir::new().unwrap();
        let path = make_db(tmp.path(), "fruit").await;

        let pool = load_into_memory(&path).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM \"order\"")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_load_into_memory_is_detached_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = make_db(tmp.path(), "fruit").await;

        let pool = load_into_memory(&path).await.unwrap();
        sqlx::query("DELETE FROM \"order\"").execute(&pool).await.unwrap();

        let source = open_readonly(&path).await.unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM \"order\"")
            .fetch_one(&source)
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_load_into_memory_child_before_parent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("family.sqlite");
        let pool = connect_store(&path, 1).await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        for sql in [
            "PRAGMA foreign_keys = OFF",
            "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER REFERENCES parent (id))",
            "CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT)",
            "INSERT INTO parent VALUES (1, 'root')",
            "INSERT INTO child VALUES (1, 1), (2, 99)",
        ] {
            sqlx::query(sql).execute(&mut *conn).await.unwrap();
        }
        drop(conn);
        pool.close().await;

        let memory = load_into_memory(&path).await.unwrap();
        let children: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM child")
            .fetch_one(&memory)
            .await
            .unwrap();
        assert_eq!(children, 2);
    }

    #[tokio::test]
    async fn test_empty_database_falls_back_to_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.sqlite");
        let pool = connect_store(&path, 1).await.unwrap();
        pool.close().await;

        let err = load_into_memory(&path).await.unwrap_err();
        assert!(err.to_string().contains("No tables found"));

        let cache = ConnectionCache::new(2, true);
        cache.get_or_load(&path).await.unwrap();
        assert!(cache.contains(&path).await);
    }

    #[test]
    fn test_readonly_uri_escapes_query_characters() {
        assert_eq!(
            readonly_uri(Path::new("/data/a?b#c%d.sqlite")),
            "file:/data/a%3fb%23c%25d.sqlite?mode=ro"
        );
    }

    #[tokio::test]
    async fn test_missing_database_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let err = load_into_memory(&tmp.path().join("nope.sqlite"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_cache_reuses_and_evicts() {
        let tmp = TempDir::new().unwrap();
        let a = make_db(tmp.path(), "a").await;
        let b = make_db(tmp.path(), "b").await;

        let cache = ConnectionCache::new(1, true);
        cache.get_or_load(&a).await.unwrap();
        cache.get_or_load(&a).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(cache.contains(&a).await);

        cache.get_or_load(&b).await.unwrap();
        assert_eq!(cache.len().await, 1);
        assert!(!cache.contains(&a).await);
        assert!(cache.contains(&b).await);
    }

    #[test]
    fn test_quote_name() {
        assert_eq!(quote_name("order"), "\"order\"");
        assert_eq!(quote_name("a\"b"), "\"a\"\"b\"");
    }
}
