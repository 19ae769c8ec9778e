//! Connection management. Domain modules hold a `Store` and open a
//! transaction (or a plain statement) per call; `Store` itself carries no
//! domain knowledge.
//!
//! Grounded on `src/signals/db_storage.rs`'s `parking_lot::Mutex<Connection>`
//! + `OpenFlags` pattern in the reference backend.

use super::schema::SCHEMA_SQL;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction};

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(database_url: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(database_url, flags)
            .with_context(|| format!("failed to open database at {database_url}"))?;

        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize schema")?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" {
            tracing::warn!(journal_mode, "WAL mode not active");
        }

        tracing::info!(database_url, "database initialized");
        Ok(Store { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Store { conn: Mutex::new(conn) })
    }

    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let guard = self.conn.lock();
        f(&guard)
    }

    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction) -> rusqlite::Result<T>) -> rusqlite::Result<T> {
        let mut guard = self.conn.lock();
        let tx = guard.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    pub fn can_reach_db(&self) -> bool {
        self.with_conn(|conn| conn.query_row("SELECT 1", [], |_| Ok(()))).is_ok()
    }
}
