use unicode_segmentation::UnicodeSegmentation;

use crate::coordinator::Mutation;
use crate::message::Message;
use crate::timeline::{Timeline, TimelineEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteConfirmOverlay {
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayState {
    ConfirmDelete(DeleteConfirmOverlay),
}

/// What submitting the composer will do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ComposerMode {
    #[default]
    Compose,
    Editing(Message),
}

/// Single input line at the bottom of the screen. Cursor is a byte offset
/// that always sits on a grapheme boundary.
#[derive(Debug, Clone, Default)]
pub struct ComposerState {
    buffer: String,
    cursor: usize,
}

impl ComposerState {
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_blank(&self) -> bool {
        self.buffer.trim().is_empty()
    }

    pub fn set(&mut self, text: &str) {
        self.buffer = text.to_string();
        self.cursor = self.buffer.len();
    }

    pub fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.buffer)
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
    }

    pub fn insert_char(&mut self, ch: char) {
        self.buffer.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.buffer, self.cursor);
        self.buffer.drain(prev..self.cursor);
        self.cursor = prev;
        true
    }

    pub fn delete(&mut self) -> bool {
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.buffer.drain(self.cursor..next);
        true
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor = prev_grapheme_boundary(&self.buffer, self.cursor);
        true
    }

    pub fn move_right(&mut self) -> bool {
        let next = next_grapheme_boundary(&self.buffer, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.cursor = next;
        true
    }

    pub fn move_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_end(&mut self) {
        self.cursor = self.buffer.len();
    }
}

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub timeline: Timeline,
    /// Entry index of the highlighted message. `None` follows the newest one.
    pub selected: Option<usize>,
    pub composer: ComposerState,
    pub mode: ComposerMode,
    pub overlay: Option<OverlayState>,
    pub undo_snapshot: Option<Message>,
    pub status_message: Option<String>,
}

impl AppState {
    pub fn entries(&self) -> &[TimelineEntry] {
        &self.timeline.entries
    }

    pub fn is_empty(&self) -> bool {
        self.timeline.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.timeline.messages().count()
    }

    /// Installs a freshly published timeline unless an equal or newer one is
    /// already on screen. Returns whether it was applied.
    pub fn apply_timeline(&mut self, timeline: Timeline) -> bool {
        if timeline.generation <= self.timeline.generation {
            tracing::debug!(
                incoming = timeline.generation,
                current = self.timeline.generation,
                "dropping stale timeline"
            );
            return false;
        }
        let selected_id = self
            .selected
            .and_then(|idx| self.timeline.entries.get(idx))
            .map(|entry| entry.id().to_string());
        let previous = self.selected;
        self.timeline = timeline;

        self.selected = match selected_id {
            None => None,
            Some(id) => match self.timeline.entries.iter().position(|e| e.id() == id) {
                Some(idx) => Some(idx),
                None => previous.and_then(|idx| self.nearest_message(idx)),
            },
        };
        true
    }

    /// Entry index drawn as highlighted.
    pub fn highlighted_index(&self) -> Option<usize> {
        match self.selected {
            Some(idx) => Some(idx),
            None => self.last_message_index(),
        }
    }

    pub fn highlighted_message(&self) -> Option<&Message> {
        self.highlighted_index()
            .and_then(|idx| self.timeline.entries.get(idx))
            .and_then(TimelineEntry::as_message)
    }

    pub fn is_following_latest(&self) -> bool {
        self.selected.is_none()
    }

    pub fn follow_latest(&mut self) {
        self.selected = None;
    }

    /// Moves the highlight by `delta` messages, stepping over date headers.
    pub fn move_selection(&mut self, delta: isize) {
        let positions = self.message_positions();
        if positions.is_empty() {
            return;
        }
        let current = self
            .highlighted_index()
            .and_then(|idx| positions.iter().position(|&p| p == idx))
            .unwrap_or(positions.len() - 1) as isize;
        let last = positions.len() as isize - 1;
        let next = (current + delta).clamp(0, last) as usize;
        self.selected = Some(positions[next]);
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.mode, ComposerMode::Editing(_))
    }

    pub fn editing_message(&self) -> Option<&Message> {
        match &self.mode {
            ComposerMode::Editing(message) => Some(message),
            ComposerMode::Compose => None,
        }
    }

    /// Loads the highlighted message into the composer.
    pub fn begin_edit(&mut self) -> bool {
        let Some(message) = self.highlighted_message().cloned() else {
            return false;
        };
        self.composer.set(&message.text);
        self.mode = ComposerMode::Editing(message);
        true
    }

    pub fn cancel_edit(&mut self) {
        self.mode = ComposerMode::Compose;
        self.composer.clear();
    }

    /// Turns the composer contents into an edit or a send and resets the
    /// composer. A send puts the view back on the newest message. Blank input
    /// yields nothing and leaves the composer and mode as they were.
    pub fn submit_composer(&mut self) -> Option<Mutation> {
        if self.composer.is_blank() {
            return None;
        }
        let text = self.composer.take();
        let mutation = match std::mem::take(&mut self.mode) {
            ComposerMode::Editing(original) => Mutation::Edit { original, text },
            ComposerMode::Compose => {
                self.follow_latest();
                Mutation::Send { text }
            }
        };
        Some(mutation)
    }

    pub fn overlay(&self) -> Option<&OverlayState> {
        self.overlay.as_ref()
    }

    pub fn close_overlay(&mut self) {
        self.overlay = None;
    }

    pub fn open_delete_confirm(&mut self) -> bool {
        let Some(message) = self.highlighted_message().cloned() else {
            return false;
        };
        self.overlay = Some(OverlayState::ConfirmDelete(DeleteConfirmOverlay { message }));
        true
    }

    /// Closes the confirmation and remembers the message for undo.
    pub fn confirm_delete(&mut self) -> Option<Mutation> {
        let Some(OverlayState::ConfirmDelete(overlay)) = self.overlay.take() else {
            return None;
        };
        let message = overlay.message;
        if self.editing_message().map(|m| m.id.as_str()) == Some(message.id.as_str()) {
            self.cancel_edit();
        }
        self.undo_snapshot = Some(message.clone());
        Some(Mutation::Delete(message))
    }

    /// Hands out the last deleted message once.
    pub fn undo_delete(&mut self) -> Option<Mutation> {
        self.undo_snapshot.take().map(Mutation::Undo)
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn clear_status_message(&mut self) {
        self.status_message = None;
    }

    fn message_positions(&self) -> Vec<usize> {
        self.timeline
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.is_date_header())
            .map(|(idx, _)| idx)
            .collect()
    }

    fn last_message_index(&self) -> Option<usize> {
        self.timeline
            .entries
            .iter()
            .rposition(|entry| !entry.is_date_header())
    }

    fn nearest_message(&self, idx: usize) -> Option<usize> {
        let entries = &self.timeline.entries;
        let idx = idx.min(entries.len().checked_sub(1)?);
        entries[idx..]
            .iter()
            .position(|entry| !entry.is_date_header())
            .map(|offset| idx + offset)
            .or_else(|| entries[..idx].iter().rposition(|entry| !entry.is_date_header()))
    }
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor == 0 {
        return 0;
    }
    let mut last = 0;
    for (idx, _) in text[..cursor].grapheme_indices(true) {
        last = idx;
    }
    last
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    if cursor >= text.len() {
        return text.len();
    }
    text[cursor..]
        .graphemes(true)
        .next()
        .map(|grapheme| cursor + grapheme.len())
        .unwrap_or(text.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{build_timeline, LocalZone};
    use assert_matches::assert_matches;

    const DAY: i64 = 86_400_000;

    fn message(id: &str, text: &str, timestamp: i64) -> Message {
        Message {
            id: id.into(),
            text: text.into(),
            sender_id: "userId".into(),
            timestamp,
        }
    }

    fn timeline(generation: u64, messages: &[Message]) -> Timeline {
        Timeline {
            generation,
            entries: build_timeline(messages, &LocalZone::utc()),
        }
    }

    fn two_days() -> Vec<Message> {
        vec![
            message("1", "first", 1_000),
            message("2", "second", 2_000),
            message("3", "next day", DAY + 1_000),
        ]
    }

    fn loaded_state() -> AppState {
        let mut state = AppState::default();
        assert!(state.apply_timeline(timeline(1, &two_days())));
        state
    }

    #[test]
    fn stale_timelines_are_dropped() {
        let mut state = loaded_state();
        assert!(!state.apply_timeline(timeline(1, &[])));
        assert!(!state.apply_timeline(timeline(0, &[])));
        assert_eq!(state.message_count(), 3);
        assert!(state.apply_timeline(timeline(2, &[])));
        assert!(state.is_empty());
    }

    #[test]
    fn follows_latest_message_by_default() {
        let state = loaded_state();
        assert!(state.is_following_latest());
        assert_eq!(state.highlighted_message().map(|m| m.id.as_str()), Some("3"));
    }

    #[test]
    fn selection_skips_date_headers() {
        let mut state = loaded_state();
        // entries: [hdr, 1, 2, hdr, 3]
        state.move_selection(-1);
        assert_eq!(state.selected, Some(2));
        state.move_selection(-1);
        assert_eq!(state.selected, Some(1));
        state.move_selection(-10);
        assert_eq!(state.selected, Some(1));
        state.move_selection(2);
        assert_eq!(state.selected, Some(4));
        assert_eq!(state.highlighted_message().map(|m| m.id.as_str()), Some("3"));
    }

    #[test]
    fn selection_survives_republish_by_id() {
        let mut state = loaded_state();
        state.move_selection(-1);
        assert_eq!(state.highlighted_message().map(|m| m.id.as_str()), Some("2"));

        let mut messages = two_days();
        messages.insert(0, message("0", "earlier", 500));
        state.apply_timeline(timeline(2, &messages));
        assert_eq!(state.highlighted_message().map(|m| m.id.as_str()), Some("2"));
    }

    #[test]
    fn selection_moves_to_neighbour_when_message_disappears() {
        let mut state = loaded_state();
        state.move_selection(-1);
        let remaining: Vec<Message> = two_days().into_iter().filter(|m| m.id != "2").collect();
        state.apply_timeline(timeline(2, &remaining));
        assert_eq!(state.highlighted_message().map(|m| m.id.as_str()), Some("3"));
    }

    #[test]
    fn submit_in_compose_mode_sends_and_follows_latest() {
        let mut state = loaded_state();
        state.move_selection(-2);
        for ch in "hello".chars() {
            state.composer.insert_char(ch);
        }
        let mutation = state.submit_composer();
        assert_eq!(mutation, Some(Mutation::Send { text: "hello".into() }));
        assert!(state.composer.buffer().is_empty());
        assert!(state.is_following_latest());
    }

    #[test]
    fn editing_routes_submit_to_edit_and_cancel_restores_compose() {
        let mut state = loaded_state();
        state.move_selection(-1);
        assert!(state.begin_edit());
        assert!(state.is_editing());
        assert_eq!(state.composer.buffer(), "second");

        state.cancel_edit();
        assert!(!state.is_editing());
        assert!(state.composer.buffer().is_empty());

        assert!(state.begin_edit());
        state.composer.backspace();
        state.composer.insert_char('D');
        let mutation = state.submit_composer();
        assert_matches!(
            mutation,
            Some(Mutation::Edit { ref original, ref text }) if original.id == "2" && text == "seconD"
        );
        assert!(!state.is_editing());
        assert_eq!(state.selected, Some(2));
    }

    #[test]
    fn blank_submit_keeps_composer_and_mode() {
        let mut state = loaded_state();
        state.composer.set("  \t ");
        assert_eq!(state.submit_composer(), None);
        assert_eq!(state.composer.buffer(), "  \t ");
        assert!(!state.is_editing());

        assert!(state.begin_edit());
        state.composer.set("   ");
        assert_eq!(state.submit_composer(), None);
        assert_eq!(state.composer.buffer(), "   ");
        assert_matches!(state.editing_message(), Some(message) if message.id == "3");
    }

    #[test]
    fn delete_requires_confirmation_and_enables_one_undo() {
        let mut state = loaded_state();
        assert_eq!(state.confirm_delete(), None);

        assert!(state.open_delete_confirm());
        assert_matches!(state.overlay(), Some(OverlayState::ConfirmDelete(o)) if o.message.id == "3");
        state.close_overlay();
        assert_eq!(state.confirm_delete(), None);
        assert_eq!(state.undo_delete(), None);

        state.open_delete_confirm();
        let deleted = state.confirm_delete();
        assert_eq!(deleted, Some(Mutation::Delete(message("3", "next day", DAY + 1_000))));
        assert!(state.overlay().is_none());

        assert_eq!(
            state.undo_delete(),
            Some(Mutation::Undo(message("3", "next day", DAY + 1_000)))
        );
        assert_eq!(state.undo_delete(), None);
    }

    #[test]
    fn deleting_the_message_under_edit_leaves_editing_mode() {
        let mut state = loaded_state();
        state.begin_edit();
        state.open_delete_confirm();
        state.confirm_delete();
        assert!(!state.is_editing());
        assert!(state.composer.buffer().is_empty());
    }

    #[test]
    fn empty_timeline_has_nothing_to_edit_or_delete() {
        let mut state = AppState::default();
        state.move_selection(1);
        assert!(!state.begin_edit());
        assert!(!state.open_delete_confirm());
        assert_eq!(state.highlighted_index(), None);
    }

    #[test]
    fn composer_edits_by_grapheme() {
        let mut composer = ComposerState::default();
        composer.set("ae\u{301}z");
        assert!(composer.move_left());
        assert!(composer.move_left());
        assert_eq!(composer.cursor(), 1);
        assert!(composer.delete());
        assert_eq!(composer.buffer(), "az");
        composer.move_end();
        assert!(composer.backspace());
        assert_eq!(composer.buffer(), "a");
        assert!(!composer.move_right());
        composer.move_home();
        assert!(!composer.backspace());
        composer.insert_char('🙂');
        assert_eq!(composer.buffer(), "🙂a");
        assert_eq!(composer.cursor(), '🙂'.len_utf8());
    }

    #[test]
    fn blank_composer_is_detected() {
        let mut composer = ComposerState::default();
        composer.set("  \t ");
        assert!(composer.is_blank());
        composer.insert_char('x');
        assert!(!composer.is_blank());
    }
}
