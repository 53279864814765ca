use std::fmt::Write as _;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use time::macros::format_description;
use time::Date;

use crate::config::ExportOptions;
use crate::message::Message;
use crate::storage::{MessageStore, StoreError};
use crate::timeline::{local_datetime, LocalZone};

pub const CSV_HEADER: &str = "ID,Text,SenderId,Timestamp";
const TMP_SUFFIX: &str = "tmp";
const WRITE_CHUNK: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("could not write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("export cancelled")]
    Cancelled,
    #[error("could not read messages: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub path: PathBuf,
    pub rows: usize,
}

/// Shared abandon switch for an in-flight export.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Serializes messages in the order given. Text is always quoted; rows are
/// joined with `\n` and the output has no trailing newline.
pub fn to_csv(messages: &[Message], zone: &LocalZone) -> String {
    let mut out = String::with_capacity(CSV_HEADER.len() + messages.len() * 64);
    out.push_str(CSV_HEADER);
    for message in messages {
        out.push('\n');
        let _ = write!(
            out,
            "{},{},{},{}",
            message.id,
            quote(&message.text),
            message.sender_id,
            format_timestamp(message.timestamp, zone)
        );
    }
    out
}

/// `BrainDump_export_<DDMMYYYY>.csv`
pub fn export_file_name(date: Date) -> String {
    format!(
        "BrainDump_export_{:02}{:02}{:04}.csv",
        date.day(),
        u8::from(date.month()),
        date.year()
    )
}

/// An explicit file path wins; an explicit directory, or the configured export
/// directory, receives the dated default name.
pub fn resolve_destination(explicit: Option<&Path>, options: &ExportOptions, today: Date) -> PathBuf {
    match explicit {
        Some(path) if path.is_dir() => path.join(export_file_name(today)),
        Some(path) => path.to_path_buf(),
        None => options.directory.join(export_file_name(today)),
    }
}

/// Writes `contents` beside `path` first and renames it into place, so a
/// failed or cancelled export never leaves a truncated file behind.
pub fn write_atomic(path: &Path, contents: &str, cancel: &CancelFlag) -> Result<(), ExportError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let tmp_path = temp_path(path);
    let result = write_chunks(&tmp_path, contents.as_bytes(), cancel).and_then(|()| {
        fs::rename(&tmp_path, path).map_err(|source| ExportError::Io {
            path: path.to_path_buf(),
            source,
        })
    });
    if result.is_err() {
        if let Err(err) = fs::remove_file(&tmp_path) {
            if err.kind() != io::ErrorKind::NotFound {
                tracing::warn!(?err, path = %tmp_path.display(), "failed to remove partial export");
            }
        }
    }
    result
}

/// Reads the store and writes its CSV rendition to `destination`.
pub fn export_messages<S: MessageStore + ?Sized>(
    store: &S,
    zone: &LocalZone,
    destination: &Path,
    cancel: &CancelFlag,
) -> Result<ExportReport, ExportError> {
    let messages = store.list_all()?;
    let csv = to_csv(&messages, zone);
    write_atomic(destination, &csv, cancel)?;
    tracing::info!(path = %destination.display(), rows = messages.len(), "exported messages");
    Ok(ExportReport {
        path: destination.to_path_buf(),
        rows: messages.len(),
    })
}

fn write_chunks(path: &Path, bytes: &[u8], cancel: &CancelFlag) -> Result<(), ExportError> {
    let io_err = |source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::create(path).map_err(io_err)?;
    for chunk in bytes.chunks(WRITE_CHUNK) {
        if cancel.is_cancelled() {
            return Err(ExportError::Cancelled);
        }
        file.write_all(chunk).map_err(io_err)?;
    }
    if cancel.is_cancelled() {
        return Err(ExportError::Cancelled);
    }
    file.sync_all().map_err(io_err)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(TMP_SUFFIX);
    path.with_file_name(name)
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn format_timestamp(timestamp: i64, zone: &LocalZone) -> String {
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    local_datetime(timestamp, zone)
        .format(&format)
        .unwrap_or_else(|_| timestamp.to_string())
}
