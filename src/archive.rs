//! Durable store for recorded media chunks.
//!
//! One SQLite table keyed by recording id. All calls run on the blocking pool
//! and resolve only after the statement has committed.

use crate::error::{LinkError, Result};
use anyhow::Context as _;
use bytes::Bytes;
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalRecording {
    pub id: String,
    pub timestamp: i64,
    pub data: Bytes,
    pub size_label: String,
}

/// Recording without its blob, for history listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSummary {
    pub id: String,
    pub timestamp: i64,
    pub size_label: String,
}

impl From<&LocalRecording> for RecordingSummary {
    fn from(rec: &LocalRecording) -> Self {
        Self {
            id: rec.id.clone(),
            timestamp: rec.timestamp,
            size_label: rec.size_label.clone(),
        }
    }
}

#[derive(Clone)]
pub struct LocalArchive {
    conn: Arc<Mutex<Connection>>,
}

impl LocalArchive {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = open_connection(path.as_ref()).map_err(archive_err)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .context("open in-memory sqlite")
            .map_err(archive_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        migrate(&conn).map_err(archive_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn put(&self, recording: LocalRecording) -> Result<()> {
        self.run(move |conn| put_blocking(conn, &recording)).await
    }

    /// Every recording, newest first.
    pub async fn get_all(&self) -> Result<Vec<LocalRecording>> {
        self.run(get_all_blocking).await
    }

    /// Same ordering as [`get_all`](Self::get_all) without loading blobs.
    pub async fn list(&self) -> Result<Vec<RecordingSummary>> {
        self.run(list_blocking).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<LocalRecording>> {
        let id = id.to_owned();
        self.run(move |conn| get_blocking(conn, &id)).await
    }

    /// Returns whether a recording was removed.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_owned();
        self.run(move |conn| {
            let deleted = conn
                .execute("DELETE FROM videos WHERE id = ?1", params![id])
                .context("delete recording by id")?;
            Ok(deleted == 1)
        })
        .await
    }

    pub async fn clear(&self) -> Result<usize> {
        self.run(|conn| conn.execute("DELETE FROM videos", []).context("clear recordings"))
            .await
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> anyhow::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("archive connection poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| LinkError::Archive(format!("join archive task failed: {e}")))?
        .map_err(archive_err)
    }
}

fn archive_err(err: anyhow::Error) -> LinkError {
    LinkError::Archive(format!("{err:#}"))
}

fn open_connection(path: &Path) -> anyhow::Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .with_context(|| format!("open sqlite {}", path.display()))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .context("set PRAGMA journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("set PRAGMA synchronous=NORMAL")?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .context("set sqlite busy_timeout")?;
    Ok(conn)
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS videos (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          id TEXT NOT NULL UNIQUE,
          timestamp INTEGER NOT NULL,
          data BLOB NOT NULL,
          size_label TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS videos_timestamp ON videos (timestamp);
        "#,
    )
    .context("create videos table")
}

fn put_blocking(conn: &Connection, rec: &LocalRecording) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO videos (id, timestamp, data, size_label) VALUES (?1, ?2, ?3, ?4)",
        params![rec.id, rec.timestamp, rec.data.as_ref(), rec.size_label],
    )
    .with_context(|| format!("insert recording {}", rec.id))?;
    Ok(())
}

fn get_all_blocking(conn: &Connection) -> anyhow::Result<Vec<LocalRecording>> {
    let mut stmt = conn
        .prepare("SELECT id, timestamp, data, size_label FROM videos ORDER BY timestamp DESC, seq DESC")
        .context("prepare get_all")?;
    let mut rows = stmt.query([]).context("query recordings")?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().context("iterate recordings")? {
        out.push(LocalRecording {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            data: Bytes::from(row.get::<_, Vec<u8>>(2)?),
            size_label: row.get(3)?,
        });
    }
    Ok(out)
}

fn list_blocking(conn: &Connection) -> anyhow::Result<Vec<RecordingSummary>> {
    let mut stmt = conn
        .prepare("SELECT id, timestamp, size_label FROM videos ORDER BY timestamp DESC, seq DESC")
        .context("prepare list")?;
    let mut rows = stmt.query([]).context("query recording summaries")?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().context("iterate recording summaries")? {
        out.push(RecordingSummary {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            size_label: row.get(2)?,
        });
    }
    Ok(out)
}

fn get_blocking(conn: &Connection, id: &str) -> anyhow::Result<Option<LocalRecording>> {
    let mut stmt = conn
        .prepare("SELECT id, timestamp, data, size_label FROM videos WHERE id = ?1")
        .context("prepare get")?;
    let mut rows = stmt.query(params![id]).context("query recording by id")?;
    match rows.next().context("read recording row")? {
        Some(row) => Ok(Some(LocalRecording {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            data: Bytes::from(row.get::<_, Vec<u8>>(2)?),
            size_label: row.get(3)?,
        })),
        None => Ok(None),
    }
}
