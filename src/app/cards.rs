use std::collections::HashMap;

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::phrases::{
    Mutation, PhraseDraft, PhraseError, PhraseField, PhraseId, PhraseRecord, PhraseStore,
};

/// Single-line text input with grapheme-aware cursor movement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldInput {
    value: String,
    cursor: usize,
    select_all: bool,
}

impl FieldInput {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let cursor = value.len();
        Self {
            value,
            cursor,
            select_all: false,
        }
    }

    /// Whole content selected, so the first keystroke replaces it.
    pub fn selected(value: impl Into<String>) -> Self {
        Self {
            select_all: true,
            ..Self::new(value)
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_all_selected(&self) -> bool {
        self.select_all && !self.value.is_empty()
    }

    pub fn cursor_column(&self) -> usize {
        self.value[..self.cursor].width()
    }

    pub fn clear(&mut self) {
        self.value.clear();
        self.cursor = 0;
        self.select_all = false;
    }

    pub fn insert_char(&mut self, ch: char) {
        if self.take_selection() {
            self.clear();
        }
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    pub fn backspace(&mut self) -> bool {
        if self.take_selection() {
            self.clear();
            return true;
        }
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.value, self.cursor);
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
        true
    }

    pub fn delete(&mut self) -> bool {
        if self.take_selection() {
            self.clear();
            return true;
        }
        let next = next_grapheme_boundary(&self.value, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.value.drain(self.cursor..next);
        true
    }

    pub fn move_left(&mut self) {
        if self.take_selection() {
            self.cursor = 0;
            return;
        }
        self.cursor = prev_grapheme_boundary(&self.value, self.cursor);
    }

    pub fn move_right(&mut self) {
        if self.take_selection() {
            self.cursor = self.value.len();
            return;
        }
        self.cursor = next_grapheme_boundary(&self.value, self.cursor);
    }

    pub fn move_home(&mut self) {
        self.select_all = false;
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.select_all = false;
        self.cursor = self.value.len();
    }

    pub fn move_word_left(&mut self) {
        self.select_all = false;
        let mut idx = self.cursor;
        while idx > 0 {
            let prev = prev_grapheme_boundary(&self.value, idx);
            if !self.value[prev..idx].trim().is_empty() {
                break;
            }
            idx = prev;
        }
        while idx > 0 {
            let prev = prev_grapheme_boundary(&self.value, idx);
            if self.value[prev..idx].trim().is_empty() {
                break;
            }
            idx = prev;
        }
        self.cursor = idx;
    }

    pub fn move_word_right(&mut self) {
        self.select_all = false;
        let len = self.value.len();
        let mut idx = self.cursor;
        while idx < len {
            let next = next_grapheme_boundary(&self.value, idx);
            if self.value[idx..next].trim().is_empty() {
                break;
            }
            idx = next;
        }
        while idx < len {
            let next = next_grapheme_boundary(&self.value, idx);
            if !self.value[idx..next].trim().is_empty() {
                break;
            }
            idx = next;
        }
        self.cursor = idx;
    }

    fn take_selection(&mut self) -> bool {
        let had = self.is_all_selected();
        self.select_all = false;
        had
    }
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    text[..cursor]
        .grapheme_indices(true)
        .next_back()
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .graphemes(true)
        .next()
        .map(|grapheme| cursor + grapheme.len())
        .unwrap_or(text.len())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditDraft {
    pub english: FieldInput,
    pub chinese: FieldInput,
    pub scene: FieldInput,
    pub focus: PhraseField,
}

impl EditDraft {
    pub fn from_record(record: &PhraseRecord) -> Self {
        Self {
            english: FieldInput::selected(record.english.as_str()),
            chinese: FieldInput::new(record.chinese.as_str()),
            scene: FieldInput::new(record.scene.as_str()),
            focus: PhraseField::English,
        }
    }

    pub fn field(&self, field: PhraseField) -> &FieldInput {
        match field {
            PhraseField::English => &self.english,
            PhraseField::Chinese => &self.chinese,
            PhraseField::Scene => &self.scene,
        }
    }

    pub fn field_mut(&mut self, field: PhraseField) -> &mut FieldInput {
        match field {
            PhraseField::English => &mut self.english,
            PhraseField::Chinese => &mut self.chinese,
            PhraseField::Scene => &mut self.scene,
        }
    }

    pub fn focused_mut(&mut self) -> &mut FieldInput {
        let focus = self.focus;
        self.field_mut(focus)
    }

    pub fn focus_next(&mut self) {
        self.focus = self.focus.next();
    }

    pub fn focus_prev(&mut self) {
        self.focus = self.focus.prev();
    }

    pub fn to_draft(&self) -> PhraseDraft {
        PhraseDraft::new(
            self.english.value(),
            self.chinese.value(),
            self.scene.value(),
        )
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardMode {
    View,
    Edit(EditDraft),
}

static VIEW_MODE: CardMode = CardMode::View;

#[derive(Debug)]
pub enum SaveOutcome {
    Saved(Mutation<PhraseRecord>),
    /// Card stays in Edit with the user's input untouched.
    Invalid(Vec<PhraseField>),
    /// The record is gone; the card state was dropped.
    Stale,
    NotEditing,
}

/// Per-card View/Edit state; cards without an entry are in View.
#[derive(Debug, Default)]
pub struct CardStates {
    modes: HashMap<PhraseId, CardMode>,
}

impl CardStates {
    pub fn mode(&self, id: PhraseId) -> &CardMode {
        self.modes.get(&id).unwrap_or(&VIEW_MODE)
    }

    pub fn is_editing(&self, id: PhraseId) -> bool {
        matches!(self.mode(id), CardMode::Edit(_))
    }

    pub fn editing_count(&self) -> usize {
        self.modes
            .values()
            .filter(|mode| matches!(mode, CardMode::Edit(_)))
            .count()
    }

    pub fn draft_mut(&mut self, id: PhraseId) -> Option<&mut EditDraft> {
        match self.modes.get_mut(&id) {
            Some(CardMode::Edit(draft)) => Some(draft),
            _ => None,
        }
    }

    /// View → Edit. A card already in Edit keeps its draft.
    pub fn begin_edit(&mut self, record: &PhraseRecord) -> bool {
        if self.is_editing(record.id) {
            return false;
        }
        self.modes
            .insert(record.id, CardMode::Edit(EditDraft::from_record(record)));
        true
    }

    pub fn cancel(&mut self, id: PhraseId) -> bool {
        self.modes.remove(&id).is_some()
    }

    pub fn save(&mut self, id: PhraseId, store: &mut PhraseStore) -> SaveOutcome {
        let draft = match self.modes.get(&id) {
            Some(CardMode::Edit(draft)) => draft.to_draft(),
            _ => return SaveOutcome::NotEditing,
        };
        match store.update(id, draft) {
            Ok(mutation) => {
                self.modes.remove(&id);
                SaveOutcome::Saved(mutation)
            }
            Err(PhraseError::Validation { missing }) => SaveOutcome::Invalid(missing),
            Err(err) => {
                tracing::debug!(id, ?err, "dropping edit state for missing phrase");
                self.modes.remove(&id);
                SaveOutcome::Stale
            }
        }
    }

    pub fn forget(&mut self, id: PhraseId) {
        self.modes.remove(&id);
    }

    pub fn retain_existing(&mut self, store: &PhraseStore) {
        self.modes.retain(|id, _| store.contains(*id));
    }
}
