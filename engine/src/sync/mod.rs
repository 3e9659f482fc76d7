//! Synchronization: the engine facade, its cycle reports and the scheduler.

mod engine;
mod scheduler;
mod status;

pub use engine::SyncEngine;
pub use scheduler::{backoff_delay, SyncScheduler};
pub use status::{CollectionReport, SyncEvent, SyncReport, SyncStatus, WriteReceipt};
