//! Serializes every change to the journal into one
//! mutate, reload, rebuild, publish cycle.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::Context;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::export::{self, CancelFlag, ExportReport};
use crate::message::Message;
use crate::storage::{MessageStore, StoreError, StoreResult};
use crate::timeline::{build_timeline, LocalZone, Timeline};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Send { text: String },
    Edit { original: Message, text: String },
    Delete(Message),
    /// Re-inserts a previously deleted message unchanged.
    Undo(Message),
    Reload,
}

impl Mutation {
    pub fn action(&self) -> &'static str {
        match self {
            Mutation::Send { .. } => "send",
            Mutation::Edit { .. } => "edit",
            Mutation::Delete(_) => "delete",
            Mutation::Undo(_) => "undo",
            Mutation::Reload => "reload",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(Timeline),
    /// Blank input; nothing was written and nothing is published.
    Skipped,
    /// The undo snapshot's id has been taken again.
    UndoUnavailable,
}

pub struct MutationCycle<S> {
    store: S,
    sender_id: String,
    zone: LocalZone,
    generation: Mutex<u64>,
}

impl<S: MessageStore> MutationCycle<S> {
    pub fn new(store: S, sender_id: impl Into<String>, zone: LocalZone) -> Self {
        Self {
            store,
            sender_id: sender_id.into(),
            zone,
            generation: Mutex::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn zone(&self) -> &LocalZone {
        &self.zone
    }

    /// Runs one full cycle. Cycles never interleave: the generation lock is
    /// held from the store mutation until the timeline is built.
    pub fn apply(&self, mutation: Mutation) -> StoreResult<CycleOutcome> {
        let mut generation = self.generation.lock();

        match mutation {
            Mutation::Send { text } => {
                if text.trim().is_empty() {
                    return Ok(CycleOutcome::Skipped);
                }
                let message = Message::compose(text, self.sender_id.as_str());
                self.store.insert(&message)?;
                tracing::debug!(id = %message.id, "message stored");
            }
            Mutation::Edit { original, text } => {
                if text.trim().is_empty() {
                    return Ok(CycleOutcome::Skipped);
                }
                self.store.update(&original.with_text(text))?;
                tracing::debug!(id = %original.id, "message edited");
            }
            Mutation::Delete(message) => {
                self.store.delete(&message)?;
                tracing::debug!(id = %message.id, "message deleted");
            }
            Mutation::Undo(snapshot) => match self.store.insert(&snapshot) {
                Ok(()) => tracing::debug!(id = %snapshot.id, "delete undone"),
                Err(StoreError::DuplicateKey(id)) => {
                    tracing::info!(%id, "undo skipped, id already in use");
                    return Ok(CycleOutcome::UndoUnavailable);
                }
                Err(err) => return Err(err),
            },
            Mutation::Reload => {}
        }

        let messages = self.store.list_all()?;
        let entries = build_timeline(&messages, &self.zone);
        *generation += 1;
        Ok(CycleOutcome::Published(Timeline {
            generation: *generation,
            entries,
        }))
    }

    /// The ordered store contents, read under the cycle lock.
    pub fn snapshot(&self) -> StoreResult<Vec<Message>> {
        let _guard = self.generation.lock();
        self.store.list_all()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorEvent {
    Published(Timeline),
    Skipped,
    UndoUnavailable,
    Failed { action: &'static str, message: String },
    Exported(ExportReport),
    ExportFailed(String),
}

enum Command {
    Apply(Mutation),
    Export { destination: PathBuf },
    Shutdown,
}

/// Owns the worker thread that runs cycles off the drawing thread.
pub struct Coordinator {
    commands: Sender<Command>,
    events: Receiver<CoordinatorEvent>,
    cancel: CancelFlag,
    worker: Option<JoinHandle<()>>,
}

impl Coordinator {
    pub fn spawn<S>(cycle: Arc<MutationCycle<S>>) -> anyhow::Result<Self>
    where
        S: MessageStore + 'static,
    {
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let cancel = CancelFlag::new();
        let worker_cancel = cancel.clone();
        let worker = thread::Builder::new()
            .name("braindump-coordinator".into())
            .spawn(move || run_worker(cycle, command_rx, event_tx, worker_cancel))
            .context("spawning coordinator thread")?;
        Ok(Self {
            commands: command_tx,
            events: event_rx,
            cancel,
            worker: Some(worker),
        })
    }

    pub fn submit(&self, mutation: Mutation) {
        if self.commands.send(Command::Apply(mutation)).is_err() {
            tracing::warn!("coordinator stopped, dropping mutation");
        }
    }

    pub fn request_export(&self, destination: PathBuf) {
        if self.commands.send(Command::Export { destination }).is_err() {
            tracing::warn!("coordinator stopped, dropping export request");
        }
    }

    pub fn events(&self) -> &Receiver<CoordinatorEvent> {
        &self.events
    }

    /// Cancels any export still writing, lets queued mutations finish and
    /// joins the worker.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.cancel.cancel();
        let _ = self.commands.send(Command::Shutdown);
        if worker.join().is_err() {
            tracing::error!("coordinator thread panicked");
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<S: MessageStore>(
    cycle: Arc<MutationCycle<S>>,
    commands: Receiver<Command>,
    events: Sender<CoordinatorEvent>,
    cancel: CancelFlag,
) {
    tracing::debug!("coordinator started");
    for command in commands.iter() {
        let event = match command {
            Command::Apply(mutation) => {
                let action = mutation.action();
                match cycle.apply(mutation) {
                    Ok(CycleOutcome::Published(timeline)) => CoordinatorEvent::Published(timeline),
                    Ok(CycleOutcome::Skipped) => CoordinatorEvent::Skipped,
                    Ok(CycleOutcome::UndoUnavailable) => CoordinatorEvent::UndoUnavailable,
                    Err(err) => {
                        tracing::error!(?err, action, "mutation cycle failed");
                        CoordinatorEvent::Failed {
                            action,
                            message: err.to_string(),
                        }
                    }
                }
            }
            Command::Export { destination } => {
                match export::export_messages(cycle.store(), cycle.zone(), &destination, &cancel) {
                    Ok(report) => CoordinatorEvent::Exported(report),
                    Err(err) => {
                        tracing::error!(?err, path = %destination.display(), "export failed");
                        CoordinatorEvent::ExportFailed(err.to_string())
                    }
                }
            }
            Command::Shutdown => break,
        };
        if events.send(event).is_err() {
            break;
        }
    }
    tracing::debug!("coordinator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tests::{init_storage, message};
    use crate::storage::StorageHandle;
    use crate::timeline::TimelineEntry;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn cycle(storage: &StorageHandle) -> MutationCycle<StorageHandle> {
        MutationCycle::new(storage.clone(), "userId", LocalZone::utc())
    }

    fn published(outcome: CycleOutcome) -> Timeline {
        match outcome {
            CycleOutcome::Published(timeline) => timeline,
            other => panic!("expected a publish, got {other:?}"),
        }
    }

    fn message_ids(timeline: &Timeline) -> Vec<String> {
        timeline.messages().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn blank_send_is_skipped_without_touching_the_store() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let cycle = cycle(&storage);

        assert_eq!(cycle.apply(Mutation::Send { text: "   \n\t".into() })?, CycleOutcome::Skipped);
        assert_eq!(cycle.apply(Mutation::Send { text: String::new() })?, CycleOutcome::Skipped);
        assert_eq!(storage.count()?, 0);
        Ok(())
    }

    #[test]
    fn send_stores_and_publishes_the_new_message() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let cycle = cycle(&storage);

        let timeline = published(cycle.apply(Mutation::Send { text: "hello".into() })?);
        assert_eq!(timeline.generation, 1);
        assert_eq!(timeline.entries.len(), 2);
        assert!(timeline.entries[0].is_date_header());

        let sent = timeline.messages().next().expect("message published").clone();
        assert_eq!(sent.text, "hello");
        assert_eq!(sent.sender_id, "userId");
        assert_eq!(storage.fetch_message(&sent.id)?, Some(sent));
        Ok(())
    }

    #[test]
    fn delete_then_undo_restores_the_same_timeline() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert(&message("1", "first", 1_000))?;
        storage.insert(&message("2", "second", 2_000))?;
        let cycle = cycle(&storage);

        let before = published(cycle.apply(Mutation::Reload)?);
        let victim = message("1", "first", 1_000);
        let after_delete = published(cycle.apply(Mutation::Delete(victim.clone()))?);
        assert_eq!(message_ids(&after_delete), vec!["2"]);

        let restored = published(cycle.apply(Mutation::Undo(victim.clone()))?);
        assert_eq!(message_ids(&restored), message_ids(&before));
        assert_eq!(storage.fetch_message("1")?, Some(victim));
        assert!(restored.generation > after_delete.generation);
        Ok(())
    }

    #[test]
    fn undo_after_id_reuse_is_unavailable() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let original = message("7", "original", 7_000);
        storage.insert(&original)?;
        let cycle = cycle(&storage);

        cycle.apply(Mutation::Delete(original.clone()))?;
        storage.insert(&message("7", "replacement", 8_000))?;

        assert_eq!(cycle.apply(Mutation::Undo(original))?, CycleOutcome::UndoUnavailable);
        let stored = storage.fetch_message("7")?.expect("replacement kept");
        assert_eq!(stored.text, "replacement");
        Ok(())
    }

    #[test]
    fn edit_keeps_identity_and_position() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        storage.insert(&message("4", "before", 4_000))?;
        storage.insert(&message("5", "old", 5_000))?;
        storage.insert(&message("6", "after", 6_000))?;
        let cycle = cycle(&storage);
        let before = published(cycle.apply(Mutation::Reload)?);

        let timeline = published(cycle.apply(Mutation::Edit {
            original: message("5", "old", 5_000),
            text: "new".into(),
        })?);
        assert_eq!(message_ids(&timeline), message_ids(&before));

        let position = |timeline: &Timeline| timeline.entries.iter().position(|e| e.id() == "5");
        assert_eq!(position(&timeline), position(&before));
        let edited = timeline.messages().find(|m| m.id == "5").expect("edited message");
        assert_eq!(edited.text, "new");
        assert_eq!(edited.timestamp, 5_000);
        Ok(())
    }

    #[test]
    fn blank_edit_is_skipped() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let original = message("5", "old", 5_000);
        storage.insert(&original)?;
        let cycle = cycle(&storage);

        let outcome = cycle.apply(Mutation::Edit {
            original,
            text: "  ".into(),
        })?;
        assert_eq!(outcome, CycleOutcome::Skipped);
        assert_eq!(storage.fetch_message("5")?.map(|m| m.text), Some("old".into()));
        Ok(())
    }

    #[test]
    fn store_failure_aborts_the_cycle() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let cycle = cycle(&storage);
        let result = cycle.apply(Mutation::Delete(message("ghost", "gone", 1)));
        assert_matches!(result, Err(StoreError::NotFound(ref id)) if id == "ghost");

        // A failed cycle does not consume a generation.
        let timeline = published(cycle.apply(Mutation::Reload)?);
        assert_eq!(timeline.generation, 1);
        Ok(())
    }

    #[test]
    fn worker_publishes_in_submission_order() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let mut coordinator = Coordinator::spawn(Arc::new(cycle(&storage)))?;

        let texts = ["one", "two", "  ", "three"];
        for text in texts {
            coordinator.submit(Mutation::Send { text: text.into() });
        }

        let mut generations = Vec::new();
        let mut skipped = 0;
        let mut last = None;
        for _ in texts {
            match coordinator.events().recv_timeout(Duration::from_secs(5))? {
                CoordinatorEvent::Published(timeline) => {
                    generations.push(timeline.generation);
                    last = Some(timeline);
                }
                CoordinatorEvent::Skipped => skipped += 1,
                other => panic!("unexpected event {other:?}"),
            }
        }
        coordinator.shutdown();

        assert_eq!(skipped, 1);
        assert_eq!(generations, vec![1, 2, 3]);
        let last = last.expect("a timeline was published");
        let bodies: Vec<&str> = last.messages().map(|m| m.text.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two", "three"]);
        assert_matches!(last.entries.first(), Some(TimelineEntry::DateHeader(_)));
        Ok(())
    }

    #[test]
    fn worker_reports_failures_and_exports() -> anyhow::Result<()> {
        let (temp, storage) = init_storage()?;
        storage.insert(&message("1", "kept", 1_000))?;
        let mut coordinator = Coordinator::spawn(Arc::new(cycle(&storage)))?;

        coordinator.submit(Mutation::Edit {
            original: message("missing", "x", 1),
            text: "y".into(),
        });
        let destination = temp.path().join("export.csv");
        coordinator.request_export(destination.clone());

        let failure = coordinator.events().recv_timeout(Duration::from_secs(5))?;
        assert_matches!(failure, CoordinatorEvent::Failed { action: "edit", .. });
        let exported = coordinator.events().recv_timeout(Duration::from_secs(5))?;
        assert_eq!(
            exported,
            CoordinatorEvent::Exported(ExportReport {
                path: destination.clone(),
                rows: 1,
            })
        );
        coordinator.shutdown();
        assert!(destination.exists());
        Ok(())
    }

    #[test]
    fn shutdown_is_idempotent() -> anyhow::Result<()> {
        let (_temp, storage) = init_storage()?;
        let mut coordinator = Coordinator::spawn(Arc::new(cycle(&storage)))?;
        coordinator.submit(Mutation::Reload);
        coordinator.shutdown();
        coordinator.shutdown();
        assert_matches!(
            coordinator.events().try_recv(),
            Ok(CoordinatorEvent::Published(_))
        );
        Ok(())
    }
}
