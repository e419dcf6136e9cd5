use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Tabs, Wrap};
use ratatui::Frame;
use regex::Regex;
use strum::IntoEnumIterator;
use unicode_width::UnicodeWidthStr;

use crate::app::cards::{CardMode, EditDraft, FieldInput};
use crate::app::{AppState, CardListView, CardView, OverlayState, ViewTab};
use crate::config::Palette;
use crate::highlight::{build_highlight_regex, split_matches};
use crate::phrases::{PhraseField, PhraseStore};

pub fn draw_app(
    frame: &mut Frame,
    state: &AppState,
    store: &PhraseStore,
    palette: &Palette,
    list_state: &mut ListState,
) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(5),
            Constraint::Length(4),
        ])
        .split(frame.size());

    render_tabs(frame, vertical[0], state, palette);
    match state.tab {
        ViewTab::Form => render_form(frame, vertical[1], &state.form, palette),
        ViewTab::Cards => render_cards(frame, vertical[1], state, store, palette, list_state),
    }

    let status = Paragraph::new(build_status_line(state, store, palette))
        .block(Block::default().borders(Borders::TOP));
    frame.render_widget(status, vertical[2]);

    render_overlay(frame, state, palette);
}

fn render_tabs(frame: &mut Frame, area: Rect, state: &AppState, palette: &Palette) {
    let titles: Vec<String> = ViewTab::iter()
        .enumerate()
        .map(|(idx, tab)| format!("F{} {tab}", idx + 1))
        .collect();
    let selected = ViewTab::iter().position(|tab| tab == state.tab).unwrap_or(0);
    let tabs = Tabs::new(titles)
        .select(selected)
        .block(Block::default().title("phrasecards").borders(Borders::ALL))
        .highlight_style(
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        );
    frame.render_widget(tabs, area);
}

fn render_form(frame: &mut Frame, area: Rect, form: &EditDraft, palette: &Palette) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(area);

    for (row, field) in rows.iter().zip(PhraseField::iter()) {
        let focused = form.focus == field;
        let input = form.field(field);
        let border = if focused {
            Style::default().fg(palette.accent)
        } else {
            Style::default()
        };
        let paragraph = Paragraph::new(input_line(input, focused, palette)).block(
            Block::default()
                .title(field.label())
                .borders(Borders::ALL)
                .border_style(border),
        );
        frame.render_widget(paragraph, *row);
        if focused {
            frame.set_cursor(row.x + 1 + input.cursor_column() as u16, row.y + 1);
        }
    }

    let hint = Paragraph::new(Line::from(Span::styled(
        "Tab/↑/↓ switch field • Enter on Scene or Ctrl+S to add • Esc back to cards",
        Style::default().fg(palette.muted),
    )));
    frame.render_widget(hint, rows[3]);
}

fn input_line(input: &FieldInput, focused: bool, palette: &Palette) -> Line<'static> {
    let style = if focused && input.is_all_selected() {
        Style::default()
            .fg(palette.selection_fg)
            .bg(palette.selection_bg)
    } else {
        Style::default()
    };
    Line::from(Span::styled(input.value().to_string(), style))
}

/// Inline cursor for inputs drawn inside list items, where the terminal cursor
/// cannot be placed.
fn spans_with_cursor(input: &FieldInput, palette: &Palette) -> Vec<Span<'static>> {
    let (before, after) = input.value().split_at(input.cursor());
    vec![
        Span::raw(before.to_string()),
        Span::styled("▌", Style::default().fg(palette.accent)),
        Span::raw(after.to_string()),
    ]
}

fn render_cards(
    frame: &mut Frame,
    area: Rect,
    state: &AppState,
    store: &PhraseStore,
    palette: &Palette,
    list_state: &mut ListState,
) {
    let sections = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(2)])
        .split(area);

    let search_style = if state.is_search_active() {
        Style::default().fg(palette.accent)
    } else {
        Style::default()
    };
    let mut search_spans = vec![Span::styled("/ ", search_style)];
    if state.search.input.is_empty() && !state.is_search_active() {
        search_spans.push(Span::styled(
            "press / to filter by scene",
            Style::default().fg(palette.muted),
        ));
    } else {
        search_spans.push(Span::raw(state.search.input.clone()));
    }
    frame.render_widget(
        Paragraph::new(Line::from(search_spans)).block(
            Block::default()
                .title("Scene filter")
                .borders(Borders::ALL)
                .border_style(search_style),
        ),
        sections[0],
    );
    if state.is_search_active() {
        let typed = state.search.input.width() as u16;
        frame.set_cursor(sections[0].x + 3 + typed, sections[0].y + 1);
    }

    let block = Block::default().title("Cards").borders(Borders::ALL);
    let cards = match state.card_list(store) {
        CardListView::Empty(placeholder) => {
            let paragraph = Paragraph::new(placeholder.message())
                .style(Style::default().fg(palette.muted))
                .wrap(Wrap { trim: true })
                .block(block);
            frame.render_widget(paragraph, sections[1]);
            return;
        }
        CardListView::Cards(cards) => cards,
    };

    let regex = if state.highlight_matches {
        build_highlight_regex(state.search.query())
    } else {
        None
    };
    let items: Vec<ListItem> = cards
        .iter()
        .map(|card| ListItem::new(card_lines(card, regex.as_ref(), palette)))
        .collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().add_modifier(Modifier::BOLD))
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, sections[1], list_state);
}

fn card_lines(card: &CardView<'_>, regex: Option<&Regex>, palette: &Palette) -> Text<'static> {
    let record = card.record;
    let mut lines = Vec::with_capacity(5);
    match card.mode {
        CardMode::View => {
            lines.push(Line::from(Span::styled(
                record.english.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(record.chinese.clone()));
            let mut scene = vec![Span::styled("scene: ", Style::default().fg(palette.muted))];
            scene.extend(highlight_line(
                record.display_scene(),
                regex,
                Style::default()
                    .fg(palette.highlight)
                    .add_modifier(Modifier::BOLD),
                Style::default().add_modifier(Modifier::ITALIC),
            ));
            lines.push(Line::from(scene));
        }
        CardMode::Edit(draft) => {
            lines.push(Line::from(Span::styled(
                "[EDIT] Ctrl+Enter/Ctrl+S save • Esc cancel",
                Style::default()
                    .fg(palette.editing)
                    .add_modifier(Modifier::BOLD),
            )));
            for field in PhraseField::iter() {
                let focused = card.selected && draft.focus == field;
                let marker = if draft.focus == field { "› " } else { "  " };
                let mut spans = vec![
                    Span::styled(marker, Style::default().fg(palette.editing)),
                    Span::styled(
                        format!("{:<8}", field.label()),
                        Style::default().fg(palette.muted),
                    ),
                ];
                let input = draft.field(field);
                if focused && !input.is_all_selected() {
                    spans.extend(spans_with_cursor(input, palette));
                } else {
                    spans.extend(input_line(input, focused, palette).spans);
                }
                lines.push(Line::from(spans));
            }
        }
    }
    lines.push(Line::from(""));
    Text::from(lines)
}

fn highlight_line(
    text: &str,
    regex: Option<&Regex>,
    highlight_style: Style,
    base_style: Style,
) -> Vec<Span<'static>> {
    split_matches(text, regex)
        .into_iter()
        .map(|segment| {
            let style = if segment.matched {
                highlight_style
            } else {
                base_style
            };
            Span::styled(segment.text.to_string(), style)
        })
        .collect()
}

fn build_status_line(state: &AppState, store: &PhraseStore, palette: &Palette) -> Text<'static> {
    let total = store.len();
    let shown = state.visible_ids().len();
    let mut spans = vec![
        Span::raw(format!("Phrases: {total}")),
        Span::raw(" | Showing: "),
        Span::styled(
            format!("{shown}"),
            Style::default().add_modifier(Modifier::BOLD),
        ),
    ];

    let editing = state.cards.editing_count();
    if editing > 0 {
        spans.push(Span::raw(" | Editing: "));
        spans.push(Span::styled(
            format!("{editing}"),
            Style::default()
                .fg(palette.editing)
                .add_modifier(Modifier::BOLD),
        ));
    }

    if !state.search.query().is_empty() {
        spans.push(Span::raw(" | Scene ~ "));
        spans.push(Span::styled(
            state.search.query().text().to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        ));
    }

    if state.has_unflushed_changes() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            "unsaved changes (w to retry)",
            Style::default()
                .fg(palette.danger)
                .add_modifier(Modifier::BOLD),
        ));
    }

    if let Some(message) = state.status_message() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            message.to_string(),
            Style::default().fg(palette.accent),
        ));
    }

    let keys = match state.tab {
        ViewTab::Form => "F2 cards • Tab next field • Ctrl+S add • Ctrl-c quit",
        ViewTab::Cards if state.is_search_active() => "type to filter • Enter keep • Esc clear",
        ViewTab::Cards if state.selected_is_editing() => {
            "Tab/↑/↓ field • Ctrl+Enter/Alt+Enter/Ctrl+S save • Esc cancel • PgUp/PgDn card"
        }
        ViewTab::Cards => "j/k move • e edit • d delete • / search • a add • w retry save • q quit",
    };
    Text::from(vec![
        Line::from(spans),
        Line::from(Span::styled(keys, Style::default().fg(palette.muted))),
    ])
}

fn render_overlay(frame: &mut Frame, state: &AppState, palette: &Palette) {
    let Some(overlay) = state.overlay() else {
        return;
    };
    let (title, border, lines) = match overlay {
        OverlayState::ConfirmDelete { english, .. } => (
            "Delete",
            palette.danger,
            vec![
                Line::from(Span::styled(
                    "确定要删除这个卡片吗？",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(format!("Delete \"{english}\"?")),
                Line::from(""),
                Line::from(Span::styled(
                    "y / Enter delete • n / Esc keep",
                    Style::default().fg(palette.muted),
                )),
            ],
        ),
        OverlayState::Alert { message } => (
            "Notice",
            palette.highlight,
            vec![
                Line::from(Span::styled(
                    message.clone(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "press any key",
                    Style::default().fg(palette.muted),
                )),
            ],
        ),
        OverlayState::Celebration { .. } => (
            "Added",
            palette.success,
            vec![
                Line::from(Span::styled(
                    "🎉 添加成功！ Phrase added",
                    Style::default()
                        .fg(palette.success)
                        .add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "press any key to continue",
                    Style::default().fg(palette.muted),
                )),
            ],
        ),
    };
    let area = centered_rect(50, 30, frame.size());
    frame.render_widget(Clear, area);
    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
