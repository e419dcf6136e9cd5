use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};
use time::OffsetDateTime;

use crate::config::StorageOptions;
use crate::search::{filter_phrases, SceneQuery};
use crate::storage::{self, StorageError, StorageHandle};

mod legacy;

pub type PhraseId = i64;

/// Scene shown for records saved before scenes existed.
pub const UNSET_SCENE: &str = "未设置";
pub const DEFAULT_SLOT: &str = "phrases";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseRecord {
    pub id: PhraseId,
    pub english: String,
    pub chinese: String,
    pub scene: String,
}

impl PhraseRecord {
    pub fn display_scene(&self) -> &str {
        if self.scene.is_empty() {
            UNSET_SCENE
        } else {
            &self.scene
        }
    }

    pub fn value(&self, field: PhraseField) -> &str {
        match field {
            PhraseField::English => &self.english,
            PhraseField::Chinese => &self.chinese,
            PhraseField::Scene => &self.scene,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum PhraseField {
    #[default]
    English,
    Chinese,
    Scene,
}

impl PhraseField {
    pub fn label(self) -> &'static str {
        match self {
            PhraseField::English => "English",
            PhraseField::Chinese => "中文",
            PhraseField::Scene => "Scene",
        }
    }

    pub fn next(self) -> Self {
        match self {
            PhraseField::English => PhraseField::Chinese,
            PhraseField::Chinese => PhraseField::Scene,
            PhraseField::Scene => PhraseField::English,
        }
    }

    pub fn prev(self) -> Self {
        match self {
            PhraseField::English => PhraseField::Scene,
            PhraseField::Chinese => PhraseField::English,
            PhraseField::Scene => PhraseField::Chinese,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhraseDraft {
    pub english: String,
    pub chinese: String,
    pub scene: String,
}

impl PhraseDraft {
    pub fn new(
        english: impl Into<String>,
        chinese: impl Into<String>,
        scene: impl Into<String>,
    ) -> Self {
        Self {
            english: english.into(),
            chinese: chinese.into(),
            scene: scene.into(),
        }
    }

    pub fn from_record(record: &PhraseRecord) -> Self {
        Self::new(&record.english, &record.chinese, &record.scene)
    }

    pub fn value(&self, field: PhraseField) -> &str {
        match field {
            PhraseField::English => &self.english,
            PhraseField::Chinese => &self.chinese,
            PhraseField::Scene => &self.scene,
        }
    }

    /// Trims every field and fails if any of them ends up empty.
    pub fn validated(&self) -> Result<PhraseDraft, PhraseError> {
        let trimmed = PhraseDraft::new(
            self.english.trim(),
            self.chinese.trim(),
            self.scene.trim(),
        );
        let missing: Vec<PhraseField> = PhraseField::iter()
            .filter(|field| trimmed.value(*field).is_empty())
            .collect();
        if missing.is_empty() {
            Ok(trimmed)
        } else {
            Err(PhraseError::Validation { missing })
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PhraseError {
    #[error("all fields are required (missing: {})", list_fields(.missing))]
    Validation { missing: Vec<PhraseField> },
    #[error("phrase {0} not found")]
    NotFound(PhraseId),
    #[error("phrase storage unavailable: {0}")]
    StorageUnavailable(#[source] StorageError),
    #[error("stored phrases could not be parsed: {0}")]
    StorageCorrupt(#[source] serde_json::Error),
}

fn list_fields(fields: &[PhraseField]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushStatus {
    Written,
    /// The write failed; memory holds changes the slot does not.
    Deferred { reason: String },
    Unchanged,
}

impl FlushStatus {
    pub fn is_deferred(&self) -> bool {
        matches!(self, FlushStatus::Deferred { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation<T> {
    pub value: T,
    pub flush: FlushStatus,
}

#[derive(Debug)]
pub struct LoadReport {
    pub loaded: usize,
    pub backfilled_scenes: usize,
    pub stripped_audio: usize,
    pub reassigned_ids: usize,
    pub problem: Option<PhraseError>,
    pub backup: Option<PathBuf>,
    pub resave: FlushStatus,
}

impl LoadReport {
    fn empty() -> Self {
        Self {
            loaded: 0,
            backfilled_scenes: 0,
            stripped_audio: 0,
            reassigned_ids: 0,
            problem: None,
            backup: None,
            resave: FlushStatus::Unchanged,
        }
    }

    pub fn migrated(&self) -> bool {
        self.backfilled_scenes + self.stripped_audio + self.reassigned_ids > 0
    }

    /// One line for the status bar when something needs the user's attention.
    pub fn warning(&self) -> Option<String> {
        if let Some(problem) = &self.problem {
            let mut message = format!("Starting with no phrases: {problem}");
            if let Some(backup) = &self.backup {
                message.push_str(&format!(" (saved copy at {})", backup.display()));
            }
            return Some(message);
        }
        if let FlushStatus::Deferred { reason } = &self.resave {
            return Some(format!("Could not save migrated phrases: {reason}"));
        }
        None
    }
}

/// Hands out creation-time ids that never repeat, even within one millisecond.
#[derive(Debug, Clone, Default)]
struct IdAllocator {
    last: Option<PhraseId>,
}

impl IdAllocator {
    fn observe(&mut self, id: PhraseId) {
        self.last = Some(self.last.map_or(id, |last| last.max(id)));
    }

    fn next<F>(&mut self, now_ms: PhraseId, in_use: usize, taken: F) -> PhraseId
    where
        F: Fn(PhraseId) -> bool,
    {
        let preferred = match self.last {
            Some(last) if now_ms <= last => last.checked_add(1),
            _ => Some(now_ms),
        };
        let id = match preferred {
            Some(id) if !taken(id) => id,
            _ => lowest_unused(in_use, &taken),
        };
        self.observe(id);
        id
    }
}

/// Smallest positive id for which `taken` is false. At most `in_use` ids are
/// taken, so one of `1..=in_use + 1` is always free.
pub(crate) fn lowest_unused<F>(in_use: usize, taken: F) -> PhraseId
where
    F: Fn(PhraseId) -> bool,
{
    let bound = PhraseId::try_from(in_use)
        .unwrap_or(PhraseId::MAX)
        .saturating_add(1);
    (1..=bound).find(|id| !taken(*id)).unwrap_or(bound)
}

fn unix_millis() -> PhraseId {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as PhraseId
}

pub type SharedPhraseStore = Arc<Mutex<PhraseStore>>;

#[derive(Debug)]
pub struct PhraseStore {
    storage: StorageHandle,
    slot: String,
    backup_dir: Option<PathBuf>,
    phrases: IndexMap<PhraseId, PhraseRecord>,
    ids: IdAllocator,
    clock: fn() -> PhraseId,
    unflushed: bool,
    /// Set while the slot may hold phrases that were never loaded.
    slot_unread: bool,
}

impl PhraseStore {
    pub fn new(storage: StorageHandle, slot: impl Into<String>) -> Self {
        Self {
            storage,
            slot: slot.into(),
            backup_dir: None,
            phrases: IndexMap::new(),
            ids: IdAllocator::default(),
            clock: unix_millis,
            unflushed: false,
            slot_unread: false,
        }
    }

    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backup_dir = dir;
        self
    }

    pub fn with_clock(mut self, clock: fn() -> PhraseId) -> Self {
        self.clock = clock;
        self
    }

    pub fn open(storage: StorageHandle, options: &StorageOptions) -> (Self, LoadReport) {
        let mut store = Self::new(storage, options.slot.clone())
            .with_backup_dir(options.corrupt_backup_dir().map(PathBuf::from));
        let report = store.load();
        (store, report)
    }

    pub fn into_shared(self) -> SharedPhraseStore {
        Arc::new(Mutex::new(self))
    }

    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Replaces the in-memory collection with the slot content, normalizing
    /// legacy records and writing them back once if anything changed.
    pub fn load(&mut self) -> LoadReport {
        self.phrases.clear();
        self.ids = IdAllocator::default();
        self.unflushed = false;
        self.slot_unread = false;
        let mut report = LoadReport::empty();

        let raw = match self.storage.read(&self.slot) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                tracing::info!(slot = %self.slot, "no saved phrases yet");
                return report;
            }
            Err(err) => {
                tracing::warn!(?err, slot = %self.slot, "phrase slot unreadable");
                self.slot_unread = true;
                report.problem = Some(PhraseError::StorageUnavailable(err));
                return report;
            }
        };

        let stored = match legacy::parse(&raw) {
            Ok(stored) => stored,
            Err(err) => {
                tracing::warn!(?err, slot = %self.slot, "phrase slot holds invalid data");
                if let Some(dir) = &self.backup_dir {
                    match storage::write_slot_backup(dir, &self.slot, "corrupt", &raw) {
                        Ok(path) => {
                            tracing::info!(path = %path.display(), "backed up unreadable phrases");
                            report.backup = Some(path);
                        }
                        Err(err) => tracing::error!(?err, "backing up unreadable phrases"),
                    }
                }
                report.problem = Some(PhraseError::StorageCorrupt(err));
                return report;
            }
        };

        let normalized = legacy::normalize(stored);
        report.backfilled_scenes = normalized.backfilled_scenes;
        report.stripped_audio = normalized.stripped_audio;
        report.reassigned_ids = normalized.reassigned_ids;
        let changed = normalized.changed();
        self.phrases = normalized.records;
        for id in self.phrases.keys() {
            self.ids.observe(*id);
        }
        report.loaded = self.phrases.len();

        if changed {
            tracing::info!(
                backfilled = report.backfilled_scenes,
                stripped_audio = report.stripped_audio,
                reassigned = report.reassigned_ids,
                "migrating legacy phrases"
            );
            report.resave = self.flush();
        }
        tracing::info!(count = report.loaded, slot = %self.slot, "phrases loaded");
        report
    }

    pub fn add(&mut self, draft: PhraseDraft) -> Result<Mutation<PhraseRecord>, PhraseError> {
        let clean = draft.validated()?;
        let now = (self.clock)();
        let phrases = &self.phrases;
        let id = self
            .ids
            .next(now, phrases.len(), |id| phrases.contains_key(&id));
        let record = PhraseRecord {
            id,
            english: clean.english,
            chinese: clean.chinese,
            scene: clean.scene,
        };
        self.phrases.insert(id, record.clone());
        tracing::debug!(id, "phrase added");
        let flush = self.flush();
        Ok(Mutation {
            value: record,
            flush,
        })
    }

    pub fn update(
        &mut self,
        id: PhraseId,
        draft: PhraseDraft,
    ) -> Result<Mutation<PhraseRecord>, PhraseError> {
        if !self.phrases.contains_key(&id) {
            return Err(PhraseError::NotFound(id));
        }
        let clean = draft.validated()?;
        let record = self
            .phrases
            .get_mut(&id)
            .ok_or(PhraseError::NotFound(id))?;
        record.english = clean.english;
        record.chinese = clean.chinese;
        record.scene = clean.scene;
        let updated = record.clone();
        tracing::debug!(id, "phrase updated");
        let flush = self.flush();
        Ok(Mutation {
            value: updated,
            flush,
        })
    }

    pub fn remove(&mut self, id: PhraseId) -> Result<Mutation<PhraseRecord>, PhraseError> {
        let removed = self
            .phrases
            .shift_remove(&id)
            .ok_or(PhraseError::NotFound(id))?;
        tracing::debug!(id, "phrase removed");
        let flush = self.flush();
        Ok(Mutation {
            value: removed,
            flush,
        })
    }

    pub fn retry_flush(&mut self) -> FlushStatus {
        if self.unflushed {
            self.flush()
        } else {
            FlushStatus::Unchanged
        }
    }

    pub fn has_unflushed_changes(&self) -> bool {
        self.unflushed
    }

    pub fn get(&self, id: PhraseId) -> Option<&PhraseRecord> {
        self.phrases.get(&id)
    }

    pub fn contains(&self, id: PhraseId) -> bool {
        self.phrases.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PhraseRecord> {
        self.phrases.values()
    }

    pub fn filtered<'a>(&'a self, query: &SceneQuery) -> Vec<&'a PhraseRecord> {
        filter_phrases(self.iter(), query)
    }

    fn flush(&mut self) -> FlushStatus {
        let records: Vec<&PhraseRecord> = self.phrases.values().collect();
        let outcome = self
            .release_unread_slot()
            .and_then(|()| serde_json::to_string(&records).map_err(|err| err.to_string()))
            .and_then(|payload| {
                self.storage
                    .write(&self.slot, &payload)
                    .map_err(|err| err.to_string())
            });
        match outcome {
            Ok(()) => {
                self.unflushed = false;
                self.slot_unread = false;
                FlushStatus::Written
            }
            Err(reason) => {
                tracing::warn!(%reason, slot = %self.slot, "saving phrases failed; will retry");
                self.unflushed = true;
                FlushStatus::Deferred { reason }
            }
        }
    }

    /// A slot that failed to load is only overwritten once a fresh read shows
    /// it empty, or its content has been copied to the backup directory.
    fn release_unread_slot(&self) -> Result<(), String> {
        if !self.slot_unread {
            return Ok(());
        }
        let existing = self
            .storage
            .read(&self.slot)
            .map_err(|err| format!("saved phrases are still unreadable: {err}"))?;
        if let Some(raw) = existing {
            let dir = self.backup_dir.as_deref().ok_or_else(|| {
                "saved phrases were never loaded; restart to load them".to_string()
            })?;
            let path = storage::write_slot_backup(dir, &self.slot, "unloaded", &raw)
                .map_err(|err| format!("backing up phrases that were never loaded: {err:#}"))?;
            tracing::info!(path = %path.display(), "backed up phrases that were never loaded");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySlotStore;
    use assert_matches::assert_matches;
    use std::thread;

    const FROZEN_MS: PhraseId = 1_700_000_000_000;

    fn frozen_clock() -> PhraseId {
        FROZEN_MS
    }

    fn memory_store() -> (Arc<MemorySlotStore>, PhraseStore) {
        let backend = Arc::new(MemorySlotStore::default());
        let handle = StorageHandle::from_backend(backend.clone());
        (backend, PhraseStore::new(handle, DEFAULT_SLOT))
    }

    fn store_with(payload: &str) -> (Arc<MemorySlotStore>, PhraseStore, LoadReport) {
        let backend = Arc::new(MemorySlotStore::with_slot(DEFAULT_SLOT, payload));
        let handle = StorageHandle::from_backend(backend.clone());
        let mut store = PhraseStore::new(handle, DEFAULT_SLOT);
        let report = store.load();
        (backend, store, report)
    }

    fn persisted(backend: &MemorySlotStore) -> Vec<PhraseRecord> {
        let raw = backend.snapshot(DEFAULT_SLOT).unwrap_or_else(|| "[]".into());
        serde_json::from_str(&raw).expect("persisted payload is valid")
    }

    fn in_memory(store: &PhraseStore) -> Vec<PhraseRecord> {
        store.iter().cloned().collect()
    }

    #[test]
    fn add_trims_fields_and_persists() -> anyhow::Result<()> {
        let (backend, mut store) = memory_store();
        let added = store.add(PhraseDraft::new("  Hello ", " 你好", "greeting  "))?;
        assert_eq!(added.flush, FlushStatus::Written);
        assert_eq!(added.value.english, "Hello");
        assert_eq!(added.value.chinese, "你好");
        assert_eq!(added.value.scene, "greeting");
        assert_eq!(persisted(&backend), in_memory(&store));
        Ok(())
    }

    #[test]
    fn add_rejects_any_blank_field_without_touching_collection() {
        let (backend, mut store) = memory_store();
        let err = store.add(PhraseDraft::new("hi", "   ", "")).unwrap_err();
        assert_matches!(err, PhraseError::Validation { ref missing }
            if missing == &vec![PhraseField::Chinese, PhraseField::Scene]);
        assert!(store.is_empty());
        assert_eq!(backend.snapshot(DEFAULT_SLOT), None);
    }

    #[test]
    fn ids_stay_unique_when_clock_stalls() -> anyhow::Result<()> {
        let (_backend, store) = memory_store();
        let mut store = store.with_clock(frozen_clock);
        let first = store.add(PhraseDraft::new("a", "甲", "x"))?.value.id;
        let second = store.add(PhraseDraft::new("b", "乙", "x"))?.value.id;
        assert_eq!(first, FROZEN_MS);
        assert_eq!(second, FROZEN_MS + 1);
        Ok(())
    }

    #[test]
    fn ids_continue_above_loaded_records() -> anyhow::Result<()> {
        let payload = format!(
            r#"[{{"id": {}, "english": "a", "chinese": "甲", "scene": "x"}}]"#,
            FROZEN_MS + 10
        );
        let (_backend, store, _report) = store_with(&payload);
        let mut store = store.with_clock(frozen_clock);
        let added = store.add(PhraseDraft::new("b", "乙", "x"))?;
        assert_eq!(added.value.id, FROZEN_MS + 11);
        Ok(())
    }

    #[test]
    fn add_after_largest_possible_id_keeps_existing_record() -> anyhow::Result<()> {
        let (backend, store, report) = store_with(
            r#"[
                {"id": 9223372036854775807, "english": "keep me", "chinese": "留", "scene": "x"},
                {"english": "no id", "chinese": "无", "scene": "x"}
            ]"#,
        );
        assert_eq!(report.loaded, 2);
        let mut store = store.with_clock(frozen_clock);
        let first = store.add(PhraseDraft::new("new", "新", "x"))?.value.id;
        let second = store.add(PhraseDraft::new("newer", "更新", "x"))?.value.id;

        assert_eq!(store.len(), 4);
        assert_ne!(first, PhraseId::MAX);
        assert_ne!(first, second);
        assert_eq!(store.get(PhraseId::MAX).map(|p| p.english.as_str()), Some("keep me"));
        assert_eq!(persisted(&backend), in_memory(&store));
        Ok(())
    }

    #[test]
    fn update_keeps_id_and_position() -> anyhow::Result<()> {
        let (backend, mut store) = memory_store();
        let a = store.add(PhraseDraft::new("a", "甲", "x"))?.value.id;
        let b = store.add(PhraseDraft::new("b", "乙", "x"))?.value.id;
        let updated = store.update(a, PhraseDraft::new(" A ", "甲甲", "work"))?;
        assert_eq!(updated.value.id, a);
        let ids: Vec<_> = store.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(store.get(a).map(|p| p.scene.as_str()), Some("work"));
        assert_eq!(persisted(&backend), in_memory(&store));
        Ok(())
    }

    #[test]
    fn update_with_blank_field_leaves_record_alone() -> anyhow::Result<()> {
        let (backend, mut store) = memory_store();
        let id = store.add(PhraseDraft::new("Hello", "你好", "greeting"))?.value.id;
        let before = backend.snapshot(DEFAULT_SLOT);
        let err = store.update(id, PhraseDraft::new("", "你好", "greeting")).unwrap_err();
        assert_matches!(err, PhraseError::Validation { .. });
        assert_eq!(store.get(id).map(|p| p.english.as_str()), Some("Hello"));
        assert_eq!(backend.snapshot(DEFAULT_SLOT), before);
        Ok(())
    }

    #[test]
    fn missing_ids_report_not_found() {
        let (_backend, mut store) = memory_store();
        assert_matches!(
            store.update(42, PhraseDraft::new("a", "b", "c")),
            Err(PhraseError::NotFound(42))
        );
        assert_matches!(store.remove(42), Err(PhraseError::NotFound(42)));
    }

    #[test]
    fn remove_preserves_order_of_remaining() -> anyhow::Result<()> {
        let (backend, mut store) = memory_store();
        let ids: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|word| store.add(PhraseDraft::new(word, "字", "x")).map(|m| m.value.id))
            .collect::<Result<_, _>>()?;
        let removed = store.remove(ids[1])?;
        assert_eq!(removed.value.english, "b");
        let remaining: Vec<_> = store.iter().map(|p| p.id).collect();
        assert_eq!(remaining, vec![ids[0], ids[2]]);
        assert_eq!(persisted(&backend), in_memory(&store));
        Ok(())
    }

    #[test]
    fn persisted_payload_has_only_four_keys() -> anyhow::Result<()> {
        let (backend, mut store) = memory_store();
        store.add(PhraseDraft::new("a", "甲", "x"))?;
        let raw = backend.snapshot(DEFAULT_SLOT).unwrap_or_default();
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let object = value[0].as_object().expect("record object");
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["chinese", "english", "id", "scene"]);
        Ok(())
    }

    #[test]
    fn legacy_records_are_migrated_once_on_load() {
        let (backend, store, report) = store_with(
            r#"[{"id": 1, "english": "Hi", "chinese": "嗨", "audioUrl": "x.mp3"}]"#,
        );
        assert!(report.migrated());
        assert_eq!(report.resave, FlushStatus::Written);
        let record = store.get(1).expect("record");
        assert_eq!(record.scene, UNSET_SCENE);
        let raw = backend.snapshot(DEFAULT_SLOT).unwrap_or_default();
        assert!(!raw.contains("audioUrl"));
        assert!(raw.contains(UNSET_SCENE));

        let mut reloaded = PhraseStore::new(StorageHandle::from_backend(backend), DEFAULT_SLOT);
        let second = reloaded.load();
        assert!(!second.migrated());
        assert_eq!(second.resave, FlushStatus::Unchanged);
    }

    #[test]
    fn clean_load_does_not_rewrite_slot() {
        let payload = r#"[{"id":1,"english":"a","chinese":"甲","scene":"x"}]"#;
        let backend = Arc::new(MemorySlotStore::with_slot(DEFAULT_SLOT, payload));
        backend.set_fail_writes(true);
        let mut store = PhraseStore::new(StorageHandle::from_backend(backend), DEFAULT_SLOT);
        let report = store.load();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.resave, FlushStatus::Unchanged);
        assert!(report.warning().is_none());
    }

    #[test]
    fn missing_slot_loads_empty() {
        let (_backend, mut store) = memory_store();
        let report = store.load();
        assert!(store.is_empty());
        assert!(report.problem.is_none());
    }

    #[test]
    fn unreadable_slot_starts_empty_and_reports() {
        let backend = Arc::new(MemorySlotStore::default());
        backend.set_fail_reads(true);
        let mut store = PhraseStore::new(StorageHandle::from_backend(backend), DEFAULT_SLOT);
        let report = store.load();
        assert!(store.is_empty());
        assert_matches!(report.problem, Some(PhraseError::StorageUnavailable(_)));
        assert!(report.warning().is_some());
    }

    #[test]
    fn unread_slot_is_not_overwritten_without_backup() -> anyhow::Result<()> {
        let saved = r#"[{"id":1,"english":"a","chinese":"甲","scene":"x"}]"#;
        let backend = Arc::new(MemorySlotStore::with_slot(DEFAULT_SLOT, saved));
        backend.set_fail_reads(true);
        let mut store = PhraseStore::new(StorageHandle::from_backend(backend.clone()), DEFAULT_SLOT);
        store.load();

        let added = store.add(PhraseDraft::new("b", "乙", "y"))?;
        assert!(added.flush.is_deferred());
        assert_eq!(backend.snapshot(DEFAULT_SLOT).as_deref(), Some(saved));

        backend.set_fail_reads(false);
        assert!(store.retry_flush().is_deferred());
        assert_eq!(backend.snapshot(DEFAULT_SLOT).as_deref(), Some(saved));
        assert!(store.has_unflushed_changes());
        Ok(())
    }

    #[test]
    fn unread_slot_is_backed_up_before_first_write() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let saved = r#"[{"id":1,"english":"a","chinese":"甲","scene":"x"}]"#;
        let backend = Arc::new(MemorySlotStore::with_slot(DEFAULT_SLOT, saved));
        backend.set_fail_reads(true);
        let mut store = PhraseStore::new(StorageHandle::from_backend(backend.clone()), DEFAULT_SLOT)
            .with_backup_dir(Some(temp.path().to_path_buf()));
        store.load();
        backend.set_fail_reads(false);

        let added = store.add(PhraseDraft::new("b", "乙", "y"))?;
        assert_eq!(added.flush, FlushStatus::Written);
        assert_eq!(persisted(&backend), in_memory(&store));
        let backups: Vec<_> = std::fs::read_dir(temp.path())?.collect::<Result<_, _>>()?;
        assert_eq!(backups.len(), 1);
        assert_eq!(std::fs::read_to_string(backups[0].path())?, saved);

        store.add(PhraseDraft::new("c", "丙", "y"))?;
        assert_eq!(std::fs::read_dir(temp.path())?.count(), 1);
        Ok(())
    }

    #[test]
    fn corrupt_slot_is_backed_up_before_reporting() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let backend = Arc::new(MemorySlotStore::with_slot(DEFAULT_SLOT, "{not json"));
        let mut store = PhraseStore::new(StorageHandle::from_backend(backend), DEFAULT_SLOT)
            .with_backup_dir(Some(temp.path().to_path_buf()));
        let report = store.load();
        assert!(store.is_empty());
        assert_matches!(report.problem, Some(PhraseError::StorageCorrupt(_)));
        let backup = report.backup.as_ref().expect("backup written");
        assert_eq!(std::fs::read_to_string(backup)?, "{not json");
        Ok(())
    }

    #[test]
    fn failed_write_is_deferred_and_retried() -> anyhow::Result<()> {
        let (backend, mut store) = memory_store();
        backend.set_fail_writes(true);
        let added = store.add(PhraseDraft::new("a", "甲", "x"))?;
        assert!(added.flush.is_deferred());
        assert_eq!(store.len(), 1);
        assert!(store.has_unflushed_changes());
        assert_eq!(backend.snapshot(DEFAULT_SLOT), None);

        backend.set_fail_writes(false);
        assert_eq!(store.retry_flush(), FlushStatus::Written);
        assert!(!store.has_unflushed_changes());
        assert_eq!(persisted(&backend), in_memory(&store));
        assert_eq!(store.retry_flush(), FlushStatus::Unchanged);
        Ok(())
    }

    #[test]
    fn next_mutation_catches_up_after_deferred_flush() -> anyhow::Result<()> {
        let (backend, mut store) = memory_store();
        backend.set_fail_writes(true);
        store.add(PhraseDraft::new("a", "甲", "x"))?;
        backend.set_fail_writes(false);
        store.add(PhraseDraft::new("b", "乙", "x"))?;
        assert_eq!(persisted(&backend).len(), 2);
        Ok(())
    }

    #[test]
    fn shared_store_serializes_mutations() -> anyhow::Result<()> {
        let (backend, store) = memory_store();
        let shared = store.into_shared();
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    shared
                        .lock()
                        .add(PhraseDraft::new(format!("p{n}"), "字", "x"))
                        .map(|m| m.value.id)
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread finished")?;
        }
        let store = shared.lock();
        assert_eq!(store.len(), 4);
        assert_eq!(persisted(&backend), in_memory(&store));
        Ok(())
    }
}
