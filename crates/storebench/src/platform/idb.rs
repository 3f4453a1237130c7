//! Document key-value store backed by SQLite.
//!
//! One SQLite file per database, one table per object store. The database
//! version lives in `PRAGMA user_version`; opening with a higher version
//! runs the upgrade callback inside the version-change transaction.
//! Requests run on the blocking pool and each write request commits its own
//! transaction.

use super::{Platform, validate_name};
use bytes::Bytes;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use std::io;
use std::sync::Arc;

/// Entry point to the document store.
#[derive(Debug, Clone)]
pub struct IdbFactory {
    platform: Platform,
}

impl IdbFactory {
    pub(crate) fn new(platform: Platform) -> Self {
        Self { platform }
    }

    /// Open database `name` at `version`, running `on_upgrade` when the stored
    /// version is older.
    ///
    /// Opening with a version lower than the stored one fails with
    /// `InvalidInput`.
    pub async fn open<F>(&self, name: &str, version: u32, on_upgrade: F) -> io::Result<Database>
    where
        F: FnOnce(&VersionChange<'_>) -> rusqlite::Result<()> + Send + 'static,
    {
        self.platform.open_delay().await;
        validate_name("database", name)?;
        let dir = self.platform.idb_root();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{name}.sqlite"));

        let conn = tokio::task::spawn_blocking(move || -> io::Result<Connection> {
            let mut conn = Connection::open(&path).map_err(sqlite_error)?;
            let current: u32 = conn
                .pragma_query_value(None, "user_version", |row| row.get(0))
                .map_err(sqlite_error)?;
            if current > version {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("requested version {version} is older than stored version {current}"),
                ));
            }
            if current < version {
                let tx = conn.transaction().map_err(sqlite_error)?;
                on_upgrade(&VersionChange { conn: &tx }).map_err(sqlite_error)?;
                tx.pragma_update(None, "user_version", version)
                    .map_err(sqlite_error)?;
                tx.commit().map_err(sqlite_error)?;
                tracing::debug!(old = current, new = version, "upgraded document store");
            }
            Ok(conn)
        })
        .await
        .map_err(io::Error::other)??;

        Ok(Database {
            name: name.to_string(),
            version,
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

/// Schema access during a version change.
pub struct VersionChange<'a> {
    conn: &'a Connection,
}

impl VersionChange<'_> {
    pub fn contains_object_store(&self, name: &str) -> rusqlite::Result<bool> {
        let table = format!("store_{name}");
        self.conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
    }

    pub fn create_object_store(&self, name: &str) -> rusqlite::Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY NOT NULL, value BLOB NOT NULL)",
            store_table(name)
        ))
    }
}

/// An open database connection.
#[derive(Debug, Clone)]
pub struct Database {
    name: String,
    version: u32,
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Store `value` under `key`, committed before returning.
    pub async fn put(&self, store: &str, key: &str, value: Bytes) -> io::Result<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
            store_table(store)
        );
        let key = key.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(&sql, params![key, value.as_ref()])?;
            tx.commit()
        })
        .await
    }

    /// Fetch the value under `key`, `None` if absent.
    pub async fn get(&self, store: &str, key: &str) -> io::Result<Option<Bytes>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?1", store_table(store));
        let key = key.to_string();
        self.run(move |conn| {
            conn.query_row(&sql, params![key], |row| row.get::<_, Vec<u8>>(0))
                .optional()
        })
        .await
        .map(|value| value.map(Bytes::from))
    }

    /// Remove `key`. Returns `false` if it was absent.
    pub async fn delete(&self, store: &str, key: &str) -> io::Result<bool> {
        let sql = format!("DELETE FROM {} WHERE key = ?1", store_table(store));
        let key = key.to_string();
        self.run(move |conn| conn.execute(&sql, params![key]))
            .await
            .map(|n| n > 0)
    }

    /// Number of records in `store`.
    pub async fn count(&self, store: &str) -> io::Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", store_table(store));
        self.run(move |conn| conn.query_row(&sql, [], |row| row.get::<_, i64>(0)))
            .await
            .map(|n| u64::try_from(n).unwrap_or(0))
    }

    async fn run<T, F>(&self, f: F) -> io::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock();
            f(&mut conn)
        })
        .await
        .map_err(io::Error::other)?
        .map_err(sqlite_error)
    }
}

fn store_table(name: &str) -> String {
    format!("\"store_{}\"", name.replace('"', "\"\""))
}

/// Map SQLite errors to I/O errors; a missing object store is `NotFound`.
fn sqlite_error(err: rusqlite::Error) -> io::Error {
    if let rusqlite::Error::SqliteFailure(_, Some(msg)) = &err
        && msg.starts_with("no such table")
    {
        return io::Error::new(
            io::ErrorKind::NotFound,
            format!("object store not found: {msg}"),
        );
    }
    io::Error::other(err)
}
