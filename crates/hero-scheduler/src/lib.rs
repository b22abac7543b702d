//! Time-based release of messages, in two flavors: an in-memory
//! one-timer-per-message variant, and a storage-backed poller/deliverer/
//! cleaner variant for persistence across restarts.

mod delivery;
mod model;
mod poller;
mod storage;
mod timer;

pub use delivery::DeliveryHandler;
pub use model::{PendingQuery, ScheduledMessage, ScheduledStatus};
pub use poller::{StorageBackedScheduler, StorageBackedSchedulerConfig};
pub use storage::{InMemoryScheduledMessageStorage, ScheduledMessageStorage};
pub use timer::{InMemoryScheduler, ScheduleHandle, When};
