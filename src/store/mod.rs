pub mod meta;
pub mod repository;
pub mod schema;

use crate::error::Result;
use crate::id;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;

/// A single-connection handle to the store file.
///
/// `Store` owns one SQLite connection in WAL mode and is meant to be owned
/// by exactly one logical caller at a time. Opening runs migrations and
/// mints the device identity on first use.
pub struct Store {
    conn: Connection,
    device_id: String,
}

impl Store {
    /// Open (or create) the store at `path`. Parent directories are
    /// created as needed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
        tracing::debug!(path = %path.display(), "opened store");
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        schema::migrate(&mut conn)?;
        let device_id = match meta::get(&conn, meta::DEVICE_ID_KEY)? {
            Some(existing) => existing,
            None => {
                let minted = id::mint_device_id();
                meta::set(&conn, meta::DEVICE_ID_KEY, &minted)?;
                tracing::info!(device_id = %minted, "minted device identity");
                minted
            }
        };
        Ok(Store { conn, device_id })
    }

    /// Stable per-installation identifier, persisted in `meta`.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn schema_version(&self) -> Result<u32> {
        schema::version(&self.conn)
    }

    pub fn meta_get(&self, key: &str) -> Result<Option<String>> {
        meta::get(&self.conn, key)
    }

    pub fn meta_set(&self, key: &str, value: &str) -> Result<()> {
        meta::set(&self.conn, key, value)
    }

    /// Begin a write transaction. Service mutations put the repository
    /// write and its oplog entries in one of these.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Access the underlying connection (read paths, sync engine).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    /// Snapshot the store to `dest` with `VACUUM INTO`, which captures
    /// in-flight WAL writes where a plain file copy would not.
    pub fn backup_to<P: AsRef<Path>>(&self, dest: P) -> Result<()> {
        let dest = dest.as_ref();
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let target = dest.to_string_lossy().into_owned();
        self.conn.execute("VACUUM INTO ?1", params![target])?;
        tracing::info!(dest = %dest.display(), "store snapshot written");
        Ok(())
    }
}
