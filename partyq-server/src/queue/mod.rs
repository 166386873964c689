//! Vote-ordered track queues and session bookkeeping

pub mod entry;
pub mod store;

pub use entry::QueueEntry;
pub use store::{PoppedEntry, QueueSnapshot, QueueStore, Session};
