use std::io::Stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::config::{AppConfig, Palette};
use crate::phrases::{FlushStatus, LoadReport, PhraseError, PhraseField, PhraseStore};
use crate::ui;

mod actions;
pub mod cards;
pub mod state;

use actions::{Action, EditCommand};
use cards::{EditDraft, SaveOutcome};
pub use state::{AppState, CardListView, CardView, OverlayState, Placeholder, ViewTab};

const REQUIRED_FIELDS_ALERT: &str = "所有字段都不能为空 / All fields are required";
const CONFIRM_DELETE_PROMPT: &str = "确定要删除这个卡片吗？ / Delete this card?";

pub struct App {
    pub config: Arc<AppConfig>,
    store: PhraseStore,
    state: AppState,
    palette: Palette,
    list_state: ListState,
    should_quit: bool,
    quit_armed: bool,
    tick_rate: Duration,
}

impl App {
    /// Takes a store that has already been loaded, so any legacy rewrite is done before the first frame.
    pub fn new(config: Arc<AppConfig>, store: PhraseStore, report: &LoadReport) -> Self {
        let mut state = AppState::new(&store, config.search.highlight_matches);
        if let Some(warning) = report.warning() {
            state.set_status_message(Some(warning));
        } else if report.migrated() {
            state.set_status_message(Some(format!(
                "Updated {} saved phrase(s) to the current format",
                report.loaded
            )));
        }
        let palette = config.palette();
        Self {
            config,
            store,
            state,
            palette,
            list_state: ListState::default(),
            should_quit: false,
            quit_armed: false,
            tick_rate: Duration::from_millis(250),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        result
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn store(&self) -> &PhraseStore {
        &self.store
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn draw<B: Backend>(&mut self, terminal: &mut Terminal<B>) -> Result<()> {
        terminal
            .draw(|frame| {
                if self.state.visible_ids().is_empty() {
                    self.list_state.select(None);
                } else {
                    self.list_state.select(Some(self.state.selected));
                }
                ui::draw_app(
                    frame,
                    &self.state,
                    &self.store,
                    &self.palette,
                    &mut self.list_state,
                );
            })
            .context("rendering frame")?;
        Ok(())
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            self.draw(terminal)?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(0));

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.tick_at(Instant::now());
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    pub fn tick_at(&mut self, now: Instant) {
        if self.state.tick(now) {
            tracing::debug!("celebration dismissed by timer");
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if self.handle_overlay_key(key) {
            return;
        }

        match key.code {
            KeyCode::F(1) => {
                self.show_tab(ViewTab::Form);
                return;
            }
            KeyCode::F(2) => {
                self.show_tab(ViewTab::Cards);
                return;
            }
            _ => {}
        }

        if self.state.tab == ViewTab::Form {
            if let Some(command) = actions::edit_command(key) {
                self.handle_form_command(command);
            }
            return;
        }

        if self.state.is_search_active() {
            self.handle_search_key(key);
            return;
        }

        if self.state.selected_is_editing() {
            if let Some(command) = actions::edit_command(key) {
                self.handle_card_command(command);
            }
            return;
        }

        if let Some(action) = actions::card_list_action(key) {
            self.handle_action(action);
        }
    }

    fn show_tab(&mut self, tab: ViewTab) {
        self.state.tab = tab;
        if tab == ViewTab::Form {
            self.state.finish_search();
        }
    }

    fn handle_action(&mut self, action: Action) {
        if action != Action::Quit {
            self.quit_armed = false;
        }
        match action {
            Action::Quit => self.request_quit(),
            Action::SelectNext => self.state.move_selection(1),
            Action::SelectPrevious => self.state.move_selection(-1),
            Action::ShowForm => self.show_tab(ViewTab::Form),
            Action::StartSearch => self.state.begin_search(),
            Action::ClearSearch => self.state.cancel_search(&self.store),
            Action::EditSelected => self.begin_edit_selected(),
            Action::DeleteSelected => self.request_delete_selected(),
            Action::RetrySave => self.retry_save(),
        }
    }

    fn handle_search_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc => self.state.cancel_search(&self.store),
            KeyCode::Enter => self.state.finish_search(),
            KeyCode::Backspace => self.state.pop_search_char(&self.store),
            _ => match actions::edit_command(key) {
                Some(EditCommand::Insert(ch)) => self.state.push_search_char(&self.store, ch),
                Some(EditCommand::Quit) => self.request_quit(),
                _ => {}
            },
        }
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) -> bool {
        let Some(overlay) = self.state.overlay().cloned() else {
            return false;
        };
        match overlay {
            OverlayState::ConfirmDelete { id, .. } => match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') | KeyCode::Enter => {
                    self.state.close_overlay();
                    self.delete_confirmed(id);
                }
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.state.close_overlay();
                    self.state.set_status_message(Some("Delete canceled"));
                }
                _ => {}
            },
            OverlayState::Alert { .. } | OverlayState::Celebration { .. } => {
                self.state.close_overlay();
            }
        }
        true
    }

    fn handle_form_command(&mut self, command: EditCommand) {
        match command {
            EditCommand::Save => self.submit_form(),
            EditCommand::Advance => {
                if self.state.form.focus == PhraseField::Scene {
                    self.submit_form();
                } else {
                    self.state.form.focus_next();
                }
            }
            EditCommand::Cancel => self.show_tab(ViewTab::Cards),
            EditCommand::Quit => self.request_quit(),
            EditCommand::SelectPrevious | EditCommand::SelectNext => {}
            other => apply_text_command(&mut self.state.form, other),
        }
    }

    fn handle_card_command(&mut self, command: EditCommand) {
        let Some(id) = self.state.selected_id() else {
            return;
        };
        match command {
            EditCommand::Save => self.save_card(id),
            EditCommand::Cancel => {
                self.state.cards.cancel(id);
                self.state.set_status_message(Some("Edit canceled"));
            }
            EditCommand::Advance => {
                if let Some(draft) = self.state.cards.draft_mut(id) {
                    draft.focus_next();
                }
            }
            EditCommand::SelectPrevious => self.state.move_selection(-1),
            EditCommand::SelectNext => self.state.move_selection(1),
            EditCommand::Quit => self.request_quit(),
            other => {
                if let Some(draft) = self.state.cards.draft_mut(id) {
                    apply_text_command(draft, other);
                }
            }
        }
    }

    fn submit_form(&mut self) {
        let draft = self.state.form.to_draft();
        match self.store.add(draft) {
            Ok(mutation) => {
                let id = mutation.value.id;
                self.state.form.clear();
                if !self.state.search.query().matches(&mutation.value.scene) {
                    self.state.cancel_search(&self.store);
                }
                self.state.refresh(&self.store);
                self.state.select_id(id);
                self.state.tab = ViewTab::Cards;
                self.report_flush(&mutation.flush, "Phrase added");
                if self.config.celebration.enabled {
                    self.state
                        .show_celebration(Instant::now(), self.config.celebration.dismiss_after());
                }
            }
            Err(PhraseError::Validation { missing }) => {
                if let Some(first) = missing.first() {
                    self.state.form.focus = *first;
                }
                self.state.open_alert(REQUIRED_FIELDS_ALERT);
            }
            Err(err) => {
                tracing::error!(?err, "failed to add phrase");
                self.state
                    .set_status_message(Some(format!("Failed to add phrase: {err}")));
            }
        }
    }

    fn begin_edit_selected(&mut self) {
        let Some(id) = self.state.selected_id() else {
            return;
        };
        let Some(record) = self.store.get(id) else {
            return;
        };
        if self.state.cards.begin_edit(record) {
            self.state.set_status_message(Some(
                "Editing: Ctrl+Enter / Alt+Enter / Ctrl+S to save, Esc to cancel",
            ));
        }
    }

    fn save_card(&mut self, id: i64) {
        match self.state.cards.save(id, &mut self.store) {
            SaveOutcome::Saved(mutation) => {
                self.state.refresh(&self.store);
                self.report_flush(&mutation.flush, "Phrase saved");
            }
            SaveOutcome::Invalid(missing) => {
                if let (Some(first), Some(draft)) =
                    (missing.first(), self.state.cards.draft_mut(id))
                {
                    draft.focus = *first;
                }
                self.state.open_alert(REQUIRED_FIELDS_ALERT);
            }
            SaveOutcome::Stale => self.state.refresh(&self.store),
            SaveOutcome::NotEditing => {}
        }
    }

    fn request_delete_selected(&mut self) {
        let Some(id) = self.state.selected_id() else {
            return;
        };
        if self.state.cards.is_editing(id) {
            return;
        }
        if let Some(record) = self.store.get(id) {
            self.state.open_confirm_delete(record);
            self.state.set_status_message(Some(CONFIRM_DELETE_PROMPT));
        }
    }

    fn delete_confirmed(&mut self, id: i64) {
        match self.store.remove(id) {
            Ok(mutation) => {
                self.state.cards.forget(id);
                self.state.refresh(&self.store);
                self.report_flush(&mutation.flush, "Phrase deleted");
            }
            Err(PhraseError::NotFound(_)) => {
                self.state.cards.forget(id);
                self.state.refresh(&self.store);
            }
            Err(err) => {
                tracing::error!(?err, id, "failed to delete phrase");
                self.state
                    .set_status_message(Some(format!("Failed to delete phrase: {err}")));
            }
        }
    }

    fn retry_save(&mut self) {
        let status = self.store.retry_flush();
        self.state.refresh(&self.store);
        match status {
            FlushStatus::Written => self.state.set_status_message(Some("All changes saved")),
            FlushStatus::Unchanged => self.state.set_status_message(Some("Nothing to save")),
            FlushStatus::Deferred { reason } => self
                .state
                .set_status_message(Some(format!("Save failed again: {reason}"))),
        }
    }

    fn request_quit(&mut self) {
        if self.store.has_unflushed_changes() && !self.quit_armed {
            if let FlushStatus::Deferred { reason } = self.store.retry_flush() {
                self.quit_armed = true;
                self.state.refresh(&self.store);
                self.state.set_status_message(Some(format!(
                    "Unsaved changes ({reason}); quit again to discard them"
                )));
                return;
            }
        }
        self.should_quit = true;
    }

    fn report_flush(&mut self, flush: &FlushStatus, done: &str) {
        match flush {
            FlushStatus::Deferred { reason } => {
                self.state.set_status_message(Some(format!(
                    "{done}, but saving failed ({reason}); press 'w' to retry"
                )));
            }
            FlushStatus::Written | FlushStatus::Unchanged => {
                self.state.set_status_message(Some(done));
            }
        }
    }
}

fn apply_text_command(draft: &mut EditDraft, command: EditCommand) {
    match command {
        EditCommand::FocusNext => draft.focus_next(),
        EditCommand::FocusPrev => draft.focus_prev(),
        EditCommand::Insert(ch) => draft.focused_mut().insert_char(ch),
        EditCommand::Backspace => {
            draft.focused_mut().backspace();
        }
        EditCommand::Delete => {
            draft.focused_mut().delete();
        }
        EditCommand::Left => draft.focused_mut().move_left(),
        EditCommand::Right => draft.focused_mut().move_right(),
        EditCommand::WordLeft => draft.focused_mut().move_word_left(),
        EditCommand::WordRight => draft.focused_mut().move_word_right(),
        EditCommand::Home => draft.focused_mut().move_home(),
        EditCommand::End => draft.focused_mut().move_end(),
        EditCommand::Save
        | EditCommand::Cancel
        | EditCommand::Advance
        | EditCommand::SelectPrevious
        | EditCommand::SelectNext
        | EditCommand::Quit => {}
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen).context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend).context("creating terminal backend")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen).context("restoring screen state")?;
    Ok(())
}
