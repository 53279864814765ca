pub mod app;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod export;
pub mod message;
pub mod storage;
pub mod timeline;
pub mod ui;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
pub use coordinator::{Coordinator, CoordinatorEvent, CycleOutcome, Mutation, MutationCycle};
pub use message::Message;
pub use storage::{MessageStore, StorageHandle, StoreError};
pub use timeline::{build_timeline, Timeline, TimelineEntry};
