use std::fs;
use std::io;
use std::path::PathBuf;

use super::{SlotStore, StorageError};

const SLOT_EXTENSION: &str = "json";
const SLOT_TMP_EXTENSION: &str = "json.tmp";

/// One `<slot>.json` file per slot inside a data directory.
#[derive(Debug, Clone)]
pub struct JsonFileSlotStore {
    dir: PathBuf,
}

impl JsonFileSlotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn slot_path(&self, slot: &str) -> PathBuf {
        self.dir.join(format!("{slot}.{SLOT_EXTENSION}"))
    }
}

impl SlotStore for JsonFileSlotStore {
    fn read_slot(&self, slot: &str) -> Result<Option<String>, StorageError> {
        let path = self.slot_path(slot);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn write_slot(&self, slot: &str, payload: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.dir).map_err(|source| StorageError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let final_path = self.slot_path(slot);
        let tmp_path = self.dir.join(format!("{slot}.{SLOT_TMP_EXTENSION}"));
        fs::write(&tmp_path, payload).map_err(|source| StorageError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, &final_path).map_err(|source| StorageError::Io {
            path: final_path.clone(),
            source,
        })?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("json files in {}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_slot_reads_as_none() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = JsonFileSlotStore::new(temp.path());
        assert_eq!(store.read_slot("phrases")?, None);
        Ok(())
    }

    #[test]
    fn write_replaces_whole_file_and_leaves_no_temp() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = JsonFileSlotStore::new(temp.path().join("nested"));
        store.write_slot("phrases", "[1]")?;
        store.write_slot("phrases", "[]")?;
        assert_eq!(store.read_slot("phrases")?.as_deref(), Some("[]"));
        let leftovers: Vec<_> = fs::read_dir(temp.path().join("nested"))?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
        Ok(())
    }
}
