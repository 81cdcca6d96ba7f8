//! Thin async Redis Streams client: the command surface spec.md §6 names
//! (XADD, XREADGROUP, XRANGE/XREVRANGE, XPENDING(_RANGE), XCLAIM, XACK,
//! XGROUP CREATE/CREATECONSUMER/DELCONSUMER/DESTROY, XINFO GROUPS/CONSUMERS,
//! XLEN, XTRIM) plus the key/value side commands `fluxbus-lock` and the
//! progress-key tracker in `fluxbus-runtime` need, behind a `StreamStore`
//! trait so the rest of the workspace can test against an in-memory double.

mod error;
mod mock;
mod redis_store;
mod store;
mod types;

pub use error::{Error, Result};
pub use mock::MockStore;
pub use redis_store::RedisStreamStore;
pub use store::StreamStore;
pub use types::{
    ConsumerInfo, GroupInfo, GroupStart, KeyType, PendingDetail, PendingSummary, StreamBatch, StreamEntry,
};
