//! Per-listener consumer-group membership: read, inbox drain, idle reclaim,
//! ack, release, per spec.md §4.3. Grounded on
//! `journal-client/src/read/uncommitted.rs`'s retry-and-backoff poll shape,
//! retargeted at Redis Streams consumer groups instead of Gazette journals.

mod consumer;
pub mod identity;
pub mod retry;

pub use consumer::{Consumer, ConsumerState, Error, Result, DEFAULT_BLOCK_MS, DEFAULT_INBOX_NAME,
    DEFAULT_MAX_IDLE_TIME_MS};
pub use identity::{consumer_name, group_name, ListenerClass, DEFAULT_KEY_SEPARATOR};
