//! Inbox: exactly-once intake on top of an at-least-once upstream, by
//! recording seen message ids and short-circuiting duplicates before they
//! reach a handler.

mod model;
mod processor;
mod storage;

pub use model::{InboxEntry, InboxStatus};
pub use processor::{InboxMetricsSnapshot, InboxProcessor};
pub use storage::{InMemoryInboxStorage, InboxStorage};
