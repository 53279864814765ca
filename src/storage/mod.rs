use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use rusqlite::{params, Connection, OptionalExtension, Row};
use thiserror::Error;

use crate::config::{ConfigPaths, StorageOptions};
use crate::message::Message;

mod schema;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message {0} already exists")]
    DuplicateKey(String),
    #[error("message {0} not found")]
    NotFound(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The four operations the rest of the application needs from durable storage.
pub trait MessageStore: Send + Sync {
    fn insert(&self, message: &Message) -> StoreResult<()>;
    fn update(&self, message: &Message) -> StoreResult<()>;
    fn delete(&self, message: &Message) -> StoreResult<()>;
    /// Every stored message, oldest first.
    fn list_all(&self) -> StoreResult<Vec<Message>>;
}

impl<S: MessageStore + ?Sized> MessageStore for Arc<S> {
    fn insert(&self, message: &Message) -> StoreResult<()> {
        (**self).insert(message)
    }

    fn update(&self, message: &Message) -> StoreResult<()> {
        (**self).update(message)
    }

    fn delete(&self, message: &Message) -> StoreResult<()> {
        (**self).delete(message)
    }

    fn list_all(&self) -> StoreResult<Vec<Message>> {
        (**self).list_all()
    }
}

#[derive(Clone)]
pub struct StorageHandle {
    db_path: Arc<PathBuf>,
    options: Arc<StorageOptions>,
}

impl StorageHandle {
    pub fn connect(&self) -> anyhow::Result<Connection> {
        let conn = Connection::open(&*self.db_path)
            .with_context(|| format!("opening database {}", self.db_path.display()))?;
        prepare_connection(&conn, &self.options)?;
        Ok(conn)
    }

    pub fn with_connection<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let conn = self.connect()?;
        f(&conn)
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn fetch_message(&self, id: &str) -> StoreResult<Option<Message>> {
        self.with_connection(|conn| {
            let message = conn
                .query_row(
                    "SELECT id, text, sender_id, timestamp FROM messages WHERE id = ?1",
                    params![id],
                    message_from_row,
                )
                .optional()?;
            Ok(message)
        })
    }

    pub fn count(&self) -> StoreResult<usize> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}

impl MessageStore for StorageHandle {
    fn insert(&self, message: &Message) -> StoreResult<()> {
        self.with_connection(|conn| {
            let inserted = conn.execute(
                "INSERT INTO messages (id, text, sender_id, timestamp)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO NOTHING",
                params![message.id, message.text, message.sender_id, message.timestamp],
            )?;
            if inserted == 0 {
                return Err(StoreError::DuplicateKey(message.id.clone()));
            }
            Ok(())
        })
    }

    fn update(&self, message: &Message) -> StoreResult<()> {
        self.with_connection(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET text = ?1, sender_id = ?2, timestamp = ?3 WHERE id = ?4",
                params![message.text, message.sender_id, message.timestamp, message.id],
            )?;
            if updated == 0 {
                return Err(StoreError::NotFound(message.id.clone()));
            }
            Ok(())
        })
    }

    fn delete(&self, message: &Message) -> StoreResult<()> {
        self.with_connection(|conn| {
            let deleted = conn.execute("DELETE FROM messages WHERE id = ?1", params![message.id])?;
            if deleted == 0 {
                return Err(StoreError::NotFound(message.id.clone()));
            }
            Ok(())
        })
    }

    fn list_all(&self) -> StoreResult<Vec<Message>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, text, sender_id, timestamp
                 FROM messages
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let messages = stmt
                .query_map([], message_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        text: row.get(1)?,
        sender_id: row.get(2)?,
        timestamp: row.get(3)?,
    })
}

pub fn init(paths: &ConfigPaths, storage: &StorageOptions) -> anyhow::Result<StorageHandle> {
    let db_path = if storage.database_path.as_os_str().is_empty() {
        &paths.database_path
    } else {
        &storage.database_path
    };
    if db_path.is_dir() {
        bail!("database path {} is a directory", db_path.display());
    }
    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating data directory {}", parent.display()))?;
    }
    let conn = Connection::open(db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    prepare_connection(&conn, storage)?;
    schema::apply(&conn)?;
    tracing::debug!(path = %db_path.display(), "message store ready");
    Ok(StorageHandle {
        db_path: Arc::new(db_path.clone()),
        options: Arc::new(storage.clone()),
    })
}

fn prepare_connection(conn: &Connection, storage: &StorageOptions) -> anyhow::Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("setting journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("setting synchronous=NORMAL")?;
    conn.pragma_update(
        None,
        "wal_autocheckpoint",
        storage.wal_autocheckpoint.to_string(),
    )
    .context("setting wal_autocheckpoint")?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    pub(crate) fn init_storage() -> anyhow::Result<(TempDir, StorageHandle)> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        paths.ensure_directories()?;
        let mut options = StorageOptions::default();
        options.database_path = paths.database_path.clone();
        let storage = init(&paths, &options)?;
        Ok((temp, storage))
    }

    pub(crate) fn message(id: &str, text: &str, timestamp: i64) -> Message {
        Message {
            id: id.into(),
            text: text.into(),
            sender_id: "userId".into(),
            timestamp,
        }
    }

    #[test]
    fn list_all_orders_by_timestamp_then_id() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert(&message("c", "third", 3_000))?;
        storage.insert(&message("b", "tie later id", 1_000))?;
        storage.insert(&message("a", "tie earlier id", 1_000))?;

        let ids: Vec<_> = storage.list_all()?.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        Ok(())
    }

    #[test]
    fn empty_store_lists_nothing() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        assert!(storage.list_all()?.is_empty());
        assert_eq!(storage.count()?, 0);
        Ok(())
    }

    #[test]
    fn insert_rejects_duplicate_ids() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert(&message("1", "first", 10))?;
        let err = storage.insert(&message("1", "again", 20)).unwrap_err();
        assert_matches!(err, StoreError::DuplicateKey(ref id) if id == "1");

        let stored = storage.fetch_message("1")?.expect("message present");
        assert_eq!(stored.text, "first");
        Ok(())
    }

    #[test]
    fn update_replaces_fields_of_existing_message() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let original = message("5", "old", 1_704_099_600_000);
        storage.insert(&original)?;
        storage.update(&original.with_text("new"))?;

        let stored = storage.fetch_message("5")?.expect("message present");
        assert_eq!(stored.text, "new");
        assert_eq!(stored.timestamp, original.timestamp);
        Ok(())
    }

    #[test]
    fn update_and_delete_report_missing_ids() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let ghost = message("ghost", "nobody", 1);
        assert_matches!(storage.update(&ghost), Err(StoreError::NotFound(_)));
        assert_matches!(storage.delete(&ghost), Err(StoreError::NotFound(_)));
        Ok(())
    }

    #[test]
    fn delete_removes_message_permanently() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let keep = message("1", "keep", 1);
        let doomed = message("2", "drop", 2);
        storage.insert(&keep)?;
        storage.insert(&doomed)?;

        storage.delete(&doomed)?;
        assert_eq!(storage.list_all()?, vec![keep]);
        assert!(storage.fetch_message("2")?.is_none());
        Ok(())
    }

    #[test]
    fn messages_survive_reopening_the_database() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::under(temp.path());
        let options = StorageOptions::default();
        {
            let storage = init(&paths, &options)?;
            storage.insert(&message("1", "persisted", 42))?;
        }
        let reopened = init(&paths, &options)?;
        assert_eq!(reopened.list_all()?, vec![message("1", "persisted", 42)]);
        assert_eq!(reopened.database_path(), paths.database_path.as_path());
        Ok(())
    }
}
