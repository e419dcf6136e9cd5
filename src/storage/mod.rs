use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::config::{StorageBackend, StorageOptions};

mod file;
mod schema;

pub use file::JsonFileSlotStore;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A named durable location holding one serialized document.
pub trait SlotStore: Send + Sync {
    /// Returns `None` when the slot has never been written.
    fn read_slot(&self, slot: &str) -> Result<Option<String>, StorageError>;
    /// Replaces the whole slot content.
    fn write_slot(&self, slot: &str, payload: &str) -> Result<(), StorageError>;
    fn describe(&self) -> String;
}

#[derive(Clone)]
pub struct StorageHandle {
    backend: Arc<dyn SlotStore>,
}

impl fmt::Debug for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageHandle")
            .field("backend", &self.backend.describe())
            .finish()
    }
}

impl StorageHandle {
    pub fn from_backend(backend: Arc<dyn SlotStore>) -> Self {
        Self { backend }
    }

    pub fn memory() -> Self {
        Self::from_backend(Arc::new(MemorySlotStore::default()))
    }

    pub fn read(&self, slot: &str) -> Result<Option<String>, StorageError> {
        self.backend.read_slot(slot)
    }

    pub fn write(&self, slot: &str, payload: &str) -> Result<(), StorageError> {
        self.backend.write_slot(slot, payload)
    }

    pub fn describe(&self) -> String {
        self.backend.describe()
    }
}

pub fn init(options: &StorageOptions) -> Result<StorageHandle> {
    let handle = match options.backend {
        StorageBackend::Sqlite => {
            let store = SqliteSlotStore::open(&options.database_path, options.wal_autocheckpoint)
                .with_context(|| {
                    format!("opening database {}", options.database_path.display())
                })?;
            StorageHandle::from_backend(Arc::new(store))
        }
        StorageBackend::JsonFile => {
            fs::create_dir_all(&options.data_dir).with_context(|| {
                format!("creating data directory {}", options.data_dir.display())
            })?;
            StorageHandle::from_backend(Arc::new(JsonFileSlotStore::new(&options.data_dir)))
        }
        StorageBackend::Memory => StorageHandle::memory(),
    };
    tracing::info!(backend = %handle.describe(), slot = %options.slot, "storage ready");
    Ok(handle)
}

/// Key/value table inside a WAL-mode SQLite database; one connection per call.
#[derive(Debug, Clone)]
pub struct SqliteSlotStore {
    db_path: PathBuf,
    wal_autocheckpoint: u32,
}

impl SqliteSlotStore {
    pub fn open(db_path: &Path, wal_autocheckpoint: u32) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
            wal_autocheckpoint,
        };
        store.with_connection(|conn| schema::apply(conn))?;
        Ok(store)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.db_path)?;
        prepare_connection(&conn, self.wal_autocheckpoint)?;
        Ok(conn)
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.connect()?;
        Ok(f(&conn)?)
    }
}

impl SlotStore for SqliteSlotStore {
    fn read_slot(&self, slot: &str) -> Result<Option<String>, StorageError> {
        self.with_connection(|conn| {
            conn.query_row(schema::SELECT_PAYLOAD, params![slot], |row| row.get(0))
                .optional()
        })
    }

    fn write_slot(&self, slot: &str, payload: &str) -> Result<(), StorageError> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        self.with_connection(|conn| {
            conn.execute(schema::UPSERT_PAYLOAD, params![slot, payload, now])
                .map(|_| ())
        })
    }

    fn describe(&self) -> String {
        format!("sqlite {}", self.db_path.display())
    }
}

fn prepare_connection(conn: &Connection, wal_autocheckpoint: u32) -> rusqlite::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "wal_autocheckpoint", wal_autocheckpoint)?;
    Ok(())
}

#[derive(Debug, Default)]
struct MemoryInner {
    slots: HashMap<String, String>,
    fail_reads: bool,
    fail_writes: bool,
}

/// Process-local slots, used for `--ephemeral` sessions and tests.
#[derive(Debug, Default)]
pub struct MemorySlotStore {
    inner: Mutex<MemoryInner>,
}

impl MemorySlotStore {
    pub fn with_slot(slot: &str, payload: &str) -> Self {
        let store = Self::default();
        store
            .inner
            .lock()
            .slots
            .insert(slot.to_string(), payload.to_string());
        store
    }

    /// Makes subsequent reads fail, as an unreachable backend would.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.lock().fail_reads = fail;
    }

    /// Makes subsequent writes fail, as a full disk would.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    pub fn snapshot(&self, slot: &str) -> Option<String> {
        self.inner.lock().slots.get(slot).cloned()
    }
}

impl SlotStore for MemorySlotStore {
    fn read_slot(&self, slot: &str) -> Result<Option<String>, StorageError> {
        let inner = self.inner.lock();
        if inner.fail_reads {
            return Err(StorageError::Unavailable("memory slot reads disabled".into()));
        }
        Ok(inner.slots.get(slot).cloned())
    }

    fn write_slot(&self, slot: &str, payload: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.fail_writes {
            return Err(StorageError::Unavailable("memory slot writes disabled".into()));
        }
        inner.slots.insert(slot.to_string(), payload.to_string());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Copies a slot payload aside as `<slot>-<label>-<timestamp>.json` so a later
/// flush cannot destroy it.
pub fn write_slot_backup(dir: &Path, slot: &str, label: &str, raw: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating backup directory {}", dir.display()))?;
    let stamp = OffsetDateTime::now_utc()
        .format(format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .context("formatting backup timestamp")?;
    let mut path = dir.join(format!("{slot}-{label}-{stamp}.json"));
    let mut attempt = 1;
    while path.exists() {
        path = dir.join(format!("{slot}-{label}-{stamp}-{attempt}.json"));
        attempt += 1;
    }
    fs::write(&path, raw).with_context(|| format!("writing backup {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigPaths;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn storage_options(paths: &ConfigPaths, backend: StorageBackend) -> anyhow::Result<StorageOptions> {
        let mut options = StorageOptions {
            backend,
            ..StorageOptions::default()
        };
        options.resolve(paths)?;
        Ok(options)
    }

    #[test]
    fn sqlite_slot_upserts_in_place() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        let storage = init(&storage_options(&paths, StorageBackend::Sqlite)?)?;
        assert_eq!(storage.read("phrases")?, None);
        storage.write("phrases", "[1]")?;
        storage.write("phrases", "[2]")?;
        storage.write("other", "[3]")?;
        assert_eq!(storage.read("phrases")?.as_deref(), Some("[2]"));
        assert_eq!(storage.read("other")?.as_deref(), Some("[3]"));

        let conn = Connection::open(&paths.database_path)?;
        let rows: i64 = conn.query_row("SELECT COUNT(*) FROM slots", [], |row| row.get(0))?;
        assert_eq!(rows, 2);
        Ok(())
    }

    #[test]
    fn sqlite_connections_use_wal() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = SqliteSlotStore::open(&temp.path().join("db").join("phrases.db"), 500)?;
        let mode: String = store.with_connection(|conn| {
            conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))
        })?;
        assert_eq!(mode.to_lowercase(), "wal");
        assert!(store.database_path().exists());
        Ok(())
    }

    #[test]
    fn json_backend_writes_slot_file() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        let options = storage_options(&paths, StorageBackend::JsonFile)?;
        let storage = init(&options)?;
        storage.write(&options.slot, "[]")?;
        assert_eq!(fs::read_to_string(options.json_path())?, "[]");
        Ok(())
    }

    #[test]
    fn memory_backend_can_simulate_failures() {
        let store = MemorySlotStore::with_slot("phrases", "[]");
        store.set_fail_writes(true);
        assert_matches!(store.write_slot("phrases", "[1]"), Err(StorageError::Unavailable(_)));
        assert_eq!(store.snapshot("phrases").as_deref(), Some("[]"));
        store.set_fail_reads(true);
        assert_matches!(store.read_slot("phrases"), Err(StorageError::Unavailable(_)));
    }

    #[test]
    fn corrupt_backups_never_overwrite_each_other() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let first = write_slot_backup(temp.path(), "phrases", "corrupt", "{oops")?;
        let second = write_slot_backup(temp.path(), "phrases", "corrupt", "{again")?;
        assert_ne!(first, second);
        assert_eq!(fs::read_to_string(first)?, "{oops");
        assert_eq!(fs::read_to_string(second)?, "{again");
        Ok(())
    }
}
