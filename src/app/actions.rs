use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    ShowForm,
    StartSearch,
    ClearSearch,
    EditSelected,
    DeleteSelected,
    RetrySave,
}

/// Keys understood while an input group (the add form or a card in Edit) has focus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditCommand {
    Save,
    Cancel,
    Advance,
    FocusNext,
    FocusPrev,
    Insert(char),
    Backspace,
    Delete,
    Left,
    Right,
    WordLeft,
    WordRight,
    Home,
    End,
    SelectPrevious,
    SelectNext,
    Quit,
}

fn plain(key: &KeyEvent) -> bool {
    !key.modifiers
        .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER)
}

fn is_quit_chord(key: &KeyEvent) -> bool {
    key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)
}

pub fn card_list_action(key: KeyEvent) -> Option<Action> {
    if is_quit_chord(&key) {
        return Some(Action::Quit);
    }
    match key.code {
        KeyCode::Char('j') | KeyCode::Down | KeyCode::PageDown => Some(Action::SelectNext),
        KeyCode::Char('k') | KeyCode::Up | KeyCode::PageUp => Some(Action::SelectPrevious),
        KeyCode::Enter => Some(Action::EditSelected),
        KeyCode::Esc => Some(Action::ClearSearch),
        KeyCode::Char(ch) if plain(&key) => match ch {
            'q' => Some(Action::Quit),
            'a' => Some(Action::ShowForm),
            '/' => Some(Action::StartSearch),
            'e' => Some(Action::EditSelected),
            'd' => Some(Action::DeleteSelected),
            'w' => Some(Action::RetrySave),
            _ => None,
        },
        _ => None,
    }
}

pub fn edit_command(key: KeyEvent) -> Option<EditCommand> {
    if is_quit_chord(&key) {
        return Some(EditCommand::Quit);
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);
    let command = match key.code {
        KeyCode::Enter if ctrl || alt => EditCommand::Save,
        KeyCode::Char('s') if ctrl => EditCommand::Save,
        KeyCode::Enter => EditCommand::Advance,
        KeyCode::Esc => EditCommand::Cancel,
        KeyCode::Tab | KeyCode::Down => EditCommand::FocusNext,
        KeyCode::BackTab | KeyCode::Up => EditCommand::FocusPrev,
        KeyCode::PageUp => EditCommand::SelectPrevious,
        KeyCode::PageDown => EditCommand::SelectNext,
        KeyCode::Backspace => EditCommand::Backspace,
        KeyCode::Delete => EditCommand::Delete,
        KeyCode::Left if ctrl => EditCommand::WordLeft,
        KeyCode::Right if ctrl => EditCommand::WordRight,
        KeyCode::Left => EditCommand::Left,
        KeyCode::Right => EditCommand::Right,
        KeyCode::Home => EditCommand::Home,
        KeyCode::End => EditCommand::End,
        KeyCode::Char(ch) if plain(&key) => EditCommand::Insert(ch),
        _ => return None,
    };
    Some(command)
}
