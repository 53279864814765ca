//! Display-list construction: stored messages interleaved with synthetic
//! date headers, one per local calendar day.

use std::fmt;
use std::sync::Arc;

use chrono::TimeZone;
use time::macros::format_description;
use time::{Date, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use crate::message::Message;

/// Display-only marker opening a new local calendar day. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateHeader {
    pub id: String,
    pub label: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineEntry {
    DateHeader(DateHeader),
    Message(Message),
}

impl TimelineEntry {
    pub fn id(&self) -> &str {
        match self {
            TimelineEntry::DateHeader(header) => &header.id,
            TimelineEntry::Message(message) => &message.id,
        }
    }

    /// Header label or message body.
    pub fn text(&self) -> &str {
        match self {
            TimelineEntry::DateHeader(header) => &header.label,
            TimelineEntry::Message(message) => &message.text,
        }
    }

    /// Empty for headers.
    pub fn sender_id(&self) -> &str {
        match self {
            TimelineEntry::DateHeader(_) => "",
            TimelineEntry::Message(message) => &message.sender_id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            TimelineEntry::DateHeader(header) => header.timestamp,
            TimelineEntry::Message(message) => message.timestamp,
        }
    }

    pub fn is_date_header(&self) -> bool {
        matches!(self, TimelineEntry::DateHeader(_))
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            TimelineEntry::Message(message) => Some(message),
            TimelineEntry::DateHeader(_) => None,
        }
    }
}

/// A display list as handed to the view, stamped with the cycle that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timeline {
    pub generation: u64,
    pub entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        messages(&self.entries)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Inserts a header before the first message and before every message whose
/// local calendar day differs from the previous header's. `messages` must
/// already be in ascending timestamp order.
pub fn build_timeline(messages: &[Message], zone: &LocalZone) -> Vec<TimelineEntry> {
    let mut entries = Vec::with_capacity(messages.len() + messages.len().min(32));
    let mut last_header_day: Option<Date> = None;

    for message in messages {
        let day = local_datetime(message.timestamp, zone).date();
        if last_header_day != Some(day) {
            entries.push(TimelineEntry::DateHeader(DateHeader {
                id: Uuid::new_v4().to_string(),
                label: format_day(day),
                timestamp: message.timestamp,
            }));
            last_header_day = Some(day);
        }
        entries.push(TimelineEntry::Message(message.clone()));
    }

    entries
}

/// The persisted messages of a display list, in display order.
pub fn messages(entries: &[TimelineEntry]) -> impl Iterator<Item = &Message> {
    entries.iter().filter_map(TimelineEntry::as_message)
}

/// `DD Mon YYYY` for the local day containing `timestamp`.
pub fn header_label(timestamp: i64, zone: &LocalZone) -> String {
    format_day(local_datetime(timestamp, zone).date())
}

/// `HH:MM` in local time.
pub fn time_label(timestamp: i64, zone: &LocalZone) -> String {
    let format = format_description!("[hour]:[minute]");
    local_datetime(timestamp, zone)
        .format(&format)
        .unwrap_or_else(|_| timestamp.to_string())
}

/// Converts epoch milliseconds into local wall-clock time using the offset in
/// force at that instant. Instants whose UTC or local date falls outside the
/// supported calendar range collapse onto the epoch.
pub fn local_datetime(timestamp: i64, zone: &LocalZone) -> OffsetDateTime {
    let nanos = i128::from(timestamp) * 1_000_000;
    let local = OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|utc| utc.checked_to_offset(zone.offset_at(utc)));
    match local {
        Some(dt) => dt,
        None => {
            tracing::warn!(timestamp, "timestamp out of range, grouping under epoch");
            OffsetDateTime::UNIX_EPOCH
        }
    }
}

/// Answers which UTC offset applies at a given instant.
pub trait ZoneRules: fmt::Debug + Send + Sync {
    fn offset_at(&self, utc: OffsetDateTime) -> UtcOffset;
}

impl ZoneRules for UtcOffset {
    fn offset_at(&self, _utc: OffsetDateTime) -> UtcOffset {
        *self
    }
}

/// The system time zone, consulted per instant so daylight-saving rules apply
/// to historical timestamps too.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemZone;

impl ZoneRules for SystemZone {
    fn offset_at(&self, utc: OffsetDateTime) -> UtcOffset {
        let seconds = match chrono::Local.timestamp_opt(utc.unix_timestamp(), 0).single() {
            Some(local) => local.offset().local_minus_utc(),
            None => 0,
        };
        UtcOffset::from_whole_seconds(seconds).unwrap_or(UtcOffset::UTC)
    }
}

/// Shared handle to the zone rules every local-time rendering goes through.
#[derive(Debug, Clone)]
pub struct LocalZone(Arc<dyn ZoneRules>);

impl LocalZone {
    pub fn system() -> Self {
        Self(Arc::new(SystemZone))
    }

    pub fn utc() -> Self {
        Self::fixed(UtcOffset::UTC)
    }

    pub fn fixed(offset: UtcOffset) -> Self {
        Self(Arc::new(offset))
    }

    pub fn with_rules(rules: impl ZoneRules + 'static) -> Self {
        Self(Arc::new(rules))
    }

    pub fn offset_at(&self, utc: OffsetDateTime) -> UtcOffset {
        self.0.offset_at(utc)
    }

    /// The current local date.
    pub fn today(&self) -> Date {
        let now = OffsetDateTime::now_utc();
        now.checked_to_offset(self.offset_at(now))
            .unwrap_or(now)
            .date()
    }
}

impl Default for LocalZone {
    fn default() -> Self {
        Self::utc()
    }
}

fn format_day(day: Date) -> String {
    let format = format_description!("[day] [month repr:short] [year]");
    day.format(&format).unwrap_or_else(|_| day.to_string())
}
