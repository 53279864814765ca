use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

/// Placeholder author tag stamped on every entry typed by the local user.
pub const DEFAULT_SENDER_ID: &str = "userId";

static LAST_ISSUED_ID: AtomicI64 = AtomicI64::new(0);

/// A persisted journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub text: String,
    pub sender_id: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Message {
    /// Builds a fresh entry stamped with the current wall clock.
    pub fn compose(text: impl Into<String>, sender_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: next_id(now),
            text: text.into(),
            sender_id: sender_id.into(),
            timestamp: now,
        }
    }

    /// Same id, sender and timestamp; only the text changes.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }
}

pub fn now_millis() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    (nanos / 1_000_000) as i64
}

/// Millisecond-derived ids, bumped past the last issued value so two entries
/// created within the same millisecond still get distinct keys.
fn next_id(now: i64) -> String {
    let mut last = LAST_ISSUED_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(last + 1);
        match LAST_ISSUED_ID.compare_exchange_weak(
            last,
            candidate,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate.to_string(),
            Err(actual) => last = actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn compose_issues_unique_increasing_ids() {
        let ids: Vec<i64> = (0..500)
            .map(|i| Message::compose(format!("entry {i}"), DEFAULT_SENDER_ID))
            .map(|message| message.id.parse::<i64>().expect("numeric id"))
            .collect();
        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn with_text_keeps_identity_and_timestamp() {
        let original = Message {
            id: "5".into(),
            text: "old".into(),
            sender_id: DEFAULT_SENDER_ID.into(),
            timestamp: 1_704_099_600_000,
        };
        let edited = original.with_text("new");
        assert_eq!(edited.id, "5");
        assert_eq!(edited.text, "new");
        assert_eq!(edited.timestamp, original.timestamp);
        assert_eq!(edited.sender_id, original.sender_id);
    }
}
