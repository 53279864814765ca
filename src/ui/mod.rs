use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::app::state::{AppState, ComposerState, OverlayState};
use crate::config::themes::Palette;
use crate::timeline::{time_label, LocalZone, TimelineEntry};

const DELETE_PROMPT: &str = "Are you sure you want to delete this message?";

pub fn draw_app(
    frame: &mut Frame,
    state: &AppState,
    list_state: &mut ListState,
    palette: &Palette,
    zone: &LocalZone,
) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(3),
            Constraint::Length(1),
        ])
        .split(frame.size());

    draw_timeline(frame, vertical[0], state, list_state, palette, zone);
    draw_composer(frame, vertical[1], state, palette);

    let status = build_status_line(state, palette);
    frame.render_widget(Paragraph::new(status), vertical[2]);

    render_overlay(frame, state, palette);
}

fn draw_timeline(
    frame: &mut Frame,
    area: Rect,
    state: &AppState,
    list_state: &mut ListState,
    palette: &Palette,
    zone: &LocalZone,
) {
    let block = Block::default()
        .title("BrainDump")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(palette.accent));

    if state.is_empty() {
        let empty = Paragraph::new(Line::from(Span::styled(
            "Nothing here yet. Type a thought below and press Enter.",
            Style::default().fg(palette.muted),
        )))
        .block(block)
        .wrap(Wrap { trim: false });
        frame.render_widget(empty, area);
        return;
    }

    let editing_id = state.editing_message().map(|m| m.id.as_str());
    let items: Vec<ListItem> = state
        .entries()
        .iter()
        .map(|entry| ListItem::new(entry_text(entry, editing_id, palette, zone)))
        .collect();

    let list = List::new(items).block(block).highlight_style(
        Style::default()
            .bg(palette.selection_bg)
            .fg(palette.selection_fg)
            .add_modifier(Modifier::BOLD),
    );
    list_state.select(state.highlighted_index());
    frame.render_stateful_widget(list, area, list_state);
}

fn entry_text(
    entry: &TimelineEntry,
    editing_id: Option<&str>,
    palette: &Palette,
    zone: &LocalZone,
) -> Text<'static> {
    match entry {
        TimelineEntry::DateHeader(header) => Text::from(
            Line::from(Span::styled(
                format!("--- {} ---", header.label),
                Style::default()
                    .fg(palette.header)
                    .add_modifier(Modifier::BOLD),
            ))
            .centered(),
        ),
        TimelineEntry::Message(message) => {
            let mut lines = Vec::new();
            let mut body = message.text.lines();
            let mut first = vec![Span::styled(
                format!("{} ", time_label(message.timestamp, zone)),
                Style::default().fg(palette.muted),
            )];
            if editing_id == Some(message.id.as_str()) {
                first.push(Span::styled(
                    "✎ ",
                    Style::default()
                        .fg(palette.editing)
                        .add_modifier(Modifier::BOLD),
                ));
            }
            first.push(Span::styled(
                body.next().unwrap_or_default().to_string(),
                Style::default().fg(palette.text),
            ));
            lines.push(Line::from(first));
            for rest in body {
                lines.push(Line::from(Span::styled(
                    format!("      {rest}"),
                    Style::default().fg(palette.text),
                )));
            }
            Text::from(lines)
        }
    }
}

fn draw_composer(frame: &mut Frame, area: Rect, state: &AppState, palette: &Palette) {
    let (title, border) = if state.is_editing() {
        ("Editing message (Enter to save, Esc to cancel)", palette.editing)
    } else {
        ("New message", palette.accent)
    };
    let inner_width = area.width.saturating_sub(2);
    let column = cursor_column(&state.composer);
    let scroll = column.saturating_sub(inner_width.saturating_sub(1));

    let paragraph = Paragraph::new(state.composer.buffer().to_string())
        .style(Style::default().fg(palette.text))
        .scroll((0, scroll))
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        );
    frame.render_widget(paragraph, area);

    if state.overlay().is_none() && inner_width > 0 && area.height > 2 {
        frame.set_cursor(area.x + 1 + column - scroll, area.y + 1);
    }
}

/// Display column of the composer cursor.
fn cursor_column(composer: &ComposerState) -> u16 {
    let buffer = composer.buffer();
    let cursor = composer.cursor().min(buffer.len());
    let width: usize = buffer[..cursor]
        .graphemes(true)
        .map(UnicodeWidthStr::width)
        .sum();
    u16::try_from(width).unwrap_or(u16::MAX)
}

fn build_status_line(state: &AppState, palette: &Palette) -> Line<'static> {
    if let Some(message) = &state.status_message {
        return Line::from(Span::styled(
            message.clone(),
            Style::default()
                .fg(palette.accent)
                .add_modifier(Modifier::BOLD),
        ));
    }

    let count = state.message_count();
    let noun = if count == 1 { "message" } else { "messages" };
    let mut spans = vec![Span::styled(
        format!("{count} {noun}"),
        Style::default().add_modifier(Modifier::BOLD),
    )];
    if !state.is_following_latest() {
        spans.push(Span::raw(" | End: latest"));
    }
    if state.undo_snapshot.is_some() {
        spans.push(Span::raw(" | ^U undo delete"));
    }
    spans.push(Span::styled(
        " | ^E edit  ^D delete  ^X export  ^Q quit",
        Style::default().fg(palette.muted),
    ));
    Line::from(spans)
}

fn render_overlay(frame: &mut Frame, state: &AppState, palette: &Palette) {
    match state.overlay() {
        Some(OverlayState::ConfirmDelete(draft)) => {
            let area = centered_rect(70, 50, frame.size());
            frame.render_widget(Clear, area);
            let preview = draft.message.text.lines().next().unwrap_or_default();
            let paragraph = Paragraph::new(vec![
                Line::from(Span::styled(
                    "Delete Message",
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(""),
                Line::from(DELETE_PROMPT),
                Line::from(Span::styled(
                    format!("\"{preview}\""),
                    Style::default().fg(palette.muted),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "Enter/y to delete • Esc/n to cancel",
                    Style::default().fg(palette.muted),
                )),
            ])
            .block(
                Block::default()
                    .title("Confirm Delete")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(palette.danger)),
            )
            .wrap(Wrap { trim: false });
            frame.render_widget(paragraph, area);
        }
        None => {}
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ]
            .as_ref(),
        )
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ]
            .as_ref(),
        )
        .split(vertical[1])[1]
}
