use std::time::{Duration, Instant};

use strum::{Display, EnumIter};

use crate::app::cards::{CardMode, CardStates, EditDraft};
use crate::phrases::{PhraseId, PhraseRecord, PhraseStore};
use crate::search::SceneQuery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum ViewTab {
    #[strum(serialize = "Add phrase")]
    Form,
    #[strum(serialize = "Cards")]
    Cards,
}

#[derive(Debug, Clone, Default)]
pub struct SearchState {
    pub active: bool,
    pub input: String,
    query: SceneQuery,
}

impl SearchState {
    pub fn query(&self) -> &SceneQuery {
        &self.query
    }

    fn sync(&mut self) {
        self.query = SceneQuery::new(&self.input);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    NoPhrases,
    NoSceneMatch,
}

impl Placeholder {
    pub fn message(self) -> &'static str {
        match self {
            Placeholder::NoPhrases => "还没有添加任何短语，快去添加吧！ (press 'a' to add one)",
            Placeholder::NoSceneMatch => "没有找到匹配场景的短语 (no phrase matches this scene)",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CardView<'a> {
    pub record: &'a PhraseRecord,
    pub mode: &'a CardMode,
    pub selected: bool,
}

#[derive(Debug)]
pub enum CardListView<'a> {
    Empty(Placeholder),
    Cards(Vec<CardView<'a>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayState {
    ConfirmDelete { id: PhraseId, english: String },
    Alert { message: String },
    /// Shown after a successful add; `deadline` dismisses it on a later tick.
    Celebration { deadline: Instant },
}

#[derive(Debug)]
pub struct AppState {
    pub tab: ViewTab,
    pub selected: usize,
    pub search: SearchState,
    pub cards: CardStates,
    pub form: EditDraft,
    pub highlight_matches: bool,
    visible: Vec<PhraseId>,
    overlay: Option<OverlayState>,
    status_message: Option<String>,
    unflushed: bool,
}

impl AppState {
    pub fn new(store: &PhraseStore, highlight_matches: bool) -> Self {
        let mut state = Self {
            tab: if store.is_empty() {
                ViewTab::Form
            } else {
                ViewTab::Cards
            },
            selected: 0,
            search: SearchState::default(),
            cards: CardStates::default(),
            form: EditDraft::default(),
            highlight_matches,
            visible: Vec::new(),
            overlay: None,
            status_message: None,
            unflushed: false,
        };
        state.refresh(store);
        state
    }

    /// Recomputes the filtered view from scratch, keeping the selected card when it survives.
    pub fn refresh(&mut self, store: &PhraseStore) {
        let keep = self.selected_id();
        self.visible = store
            .filtered(self.search.query())
            .into_iter()
            .map(|record| record.id)
            .collect();
        self.cards.retain_existing(store);
        self.unflushed = store.has_unflushed_changes();
        match keep {
            Some(id) => self.select_id(id),
            None => self.normalize_selection(),
        }
    }

    pub fn visible_ids(&self) -> &[PhraseId] {
        &self.visible
    }

    pub fn selected_id(&self) -> Option<PhraseId> {
        self.visible.get(self.selected).copied()
    }

    pub fn select_id(&mut self, id: PhraseId) {
        if let Some(idx) = self.visible.iter().position(|visible| *visible == id) {
            self.selected = idx;
        } else {
            self.normalize_selection();
        }
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.visible.is_empty() {
            return;
        }
        let last = self.visible.len() as isize - 1;
        self.selected = (self.selected as isize + delta).clamp(0, last) as usize;
    }

    fn normalize_selection(&mut self) {
        if self.visible.is_empty() {
            self.selected = 0;
        } else if self.selected >= self.visible.len() {
            self.selected = self.visible.len() - 1;
        }
    }

    pub fn selected_is_editing(&self) -> bool {
        self.selected_id()
            .map(|id| self.cards.is_editing(id))
            .unwrap_or(false)
    }

    pub fn card_list<'a>(&'a self, store: &'a PhraseStore) -> CardListView<'a> {
        if store.is_empty() {
            return CardListView::Empty(Placeholder::NoPhrases);
        }
        let cards: Vec<CardView<'a>> = self
            .visible
            .iter()
            .enumerate()
            .filter_map(|(idx, id)| {
                store.get(*id).map(|record| CardView {
                    record,
                    mode: self.cards.mode(*id),
                    selected: idx == self.selected,
                })
            })
            .collect();
        if cards.is_empty() {
            CardListView::Empty(Placeholder::NoSceneMatch)
        } else {
            CardListView::Cards(cards)
        }
    }

    pub fn begin_search(&mut self) {
        self.search.active = true;
        self.tab = ViewTab::Cards;
    }

    pub fn finish_search(&mut self) {
        self.search.active = false;
    }

    pub fn cancel_search(&mut self, store: &PhraseStore) {
        self.search.active = false;
        if self.search.input.is_empty() {
            return;
        }
        self.search.input.clear();
        self.search.sync();
        self.refresh(store);
    }

    pub fn push_search_char(&mut self, store: &PhraseStore, ch: char) {
        self.search.input.push(ch);
        self.search.sync();
        self.refresh(store);
    }

    pub fn pop_search_char(&mut self, store: &PhraseStore) {
        if self.search.input.pop().is_some() {
            self.search.sync();
            self.refresh(store);
        }
    }

    pub fn set_search(&mut self, store: &PhraseStore, input: &str) {
        self.search.input = input.to_string();
        self.search.sync();
        self.refresh(store);
    }

    pub fn is_search_active(&self) -> bool {
        self.search.active
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn open_confirm_delete(&mut self, record: &PhraseRecord) {
        self.overlay = Some(OverlayState::ConfirmDelete {
            id: record.id,
            english: record.english.clone(),
        });
    }

    pub fn open_alert(&mut self, message: impl Into<String>) {
        self.overlay = Some(OverlayState::Alert {
            message: message.into(),
        });
    }

    pub fn show_celebration(&mut self, now: Instant, dismiss_after: Duration) {
        self.overlay = Some(OverlayState::Celebration {
            deadline: now + dismiss_after,
        });
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    /// Expires a celebration whose deadline has passed; returns true if it did.
    pub fn tick(&mut self, now: Instant) -> bool {
        match &self.overlay {
            Some(OverlayState::Celebration { deadline }) if now >= *deadline => {
                self.overlay = None;
                true
            }
            _ => false,
        }
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn has_unflushed_changes(&self) -> bool {
        self.unflushed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phrases::{PhraseDraft, DEFAULT_SLOT};
    use crate::storage::StorageHandle;
    use assert_matches::assert_matches;

    fn seeded(phrases: &[(&str, &str, &str)]) -> PhraseStore {
        let mut store = PhraseStore::new(StorageHandle::memory(), DEFAULT_SLOT);
        for (english, chinese, scene) in phrases {
            store
                .add(PhraseDraft::new(*english, *chinese, *scene))
                .expect("valid phrase");
        }
        store
    }

    fn shown_english<'a>(state: &'a AppState, store: &'a PhraseStore) -> Vec<&'a str> {
        match state.card_list(store) {
            CardListView::Cards(cards) => cards.iter().map(|c| c.record.english.as_str()).collect(),
            CardListView::Empty(_) => Vec::new(),
        }
    }

    #[test]
    fn empty_store_shows_no_phrases_placeholder() {
        let store = seeded(&[]);
        let state = AppState::new(&store, true);
        assert_eq!(state.tab, ViewTab::Form);
        assert_matches!(state.card_list(&store), CardListView::Empty(Placeholder::NoPhrases));
    }

    #[test]
    fn unmatched_filter_shows_scene_placeholder() {
        let store = seeded(&[("Hello", "你好", "greeting")]);
        let mut state = AppState::new(&store, true);
        state.set_search(&store, "airport");
        assert_matches!(state.card_list(&store), CardListView::Empty(Placeholder::NoSceneMatch));
        state.cancel_search(&store);
        assert_eq!(shown_english(&state, &store), vec!["Hello"]);
    }

    #[test]
    fn typing_refilters_on_every_keystroke() {
        let store = seeded(&[
            ("Hello", "你好", "Greeting"),
            ("Where is gate 5?", "5号登机口在哪里？", "airport"),
        ]);
        let mut state = AppState::new(&store, true);
        state.begin_search();
        for ch in "air".chars() {
            state.push_search_char(&store, ch);
        }
        assert_eq!(shown_english(&state, &store), vec!["Where is gate 5?"]);
        state.pop_search_char(&store);
        state.pop_search_char(&store);
        state.pop_search_char(&store);
        assert_eq!(shown_english(&state, &store).len(), 2);
    }

    #[test]
    fn selection_follows_record_across_refilter() {
        let store = seeded(&[("a", "甲", "x"), ("b", "乙", "y"), ("c", "丙", "y")]);
        let mut state = AppState::new(&store, true);
        state.move_selection(2);
        let chosen = state.selected_id();
        state.set_search(&store, "y");
        assert_eq!(state.selected_id(), chosen);
        assert_eq!(state.selected, 1);
        state.move_selection(10);
        assert_eq!(state.selected, 1);
        state.move_selection(-10);
        assert_eq!(state.selected, 0);
    }

    #[test]
    fn card_views_carry_mode_and_selection() {
        let store = seeded(&[("a", "甲", "x"), ("b", "乙", "y")]);
        let mut state = AppState::new(&store, true);
        let second = state.visible_ids()[1];
        state.cards.begin_edit(store.get(second).expect("record"));
        state.select_id(second);
        assert!(state.selected_is_editing());
        let CardListView::Cards(cards) = state.card_list(&store) else {
            panic!("expected cards");
        };
        assert_eq!(cards[0].mode, &CardMode::View);
        assert_matches!(cards[1].mode, CardMode::Edit(_));
        assert!(cards[1].selected);
    }

    #[test]
    fn celebration_expires_only_after_deadline() {
        let store = seeded(&[]);
        let mut state = AppState::new(&store, true);
        let start = Instant::now();
        state.show_celebration(start, Duration::from_secs(3));
        assert!(!state.tick(start + Duration::from_millis(2999)));
        assert!(state.overlay().is_some());
        assert!(state.tick(start + Duration::from_secs(3)));
        assert!(state.overlay().is_none());
    }

    #[test]
    fn dismissed_celebration_makes_later_tick_a_noop() {
        let store = seeded(&[]);
        let mut state = AppState::new(&store, true);
        let start = Instant::now();
        state.show_celebration(start, Duration::from_secs(3));
        state.close_overlay();
        state.open_alert("later");
        assert!(!state.tick(start + Duration::from_secs(10)));
        assert_matches!(state.overlay(), Some(OverlayState::Alert { .. }));
    }
}
