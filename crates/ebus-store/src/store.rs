use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    ConsumerInfo, GroupInfo, GroupStart, KeyType, PendingDetail, PendingSummary, StreamBatch, StreamEntry,
};

/// The full Redis Streams command surface spec.md §6 requires, abstracted
/// behind a trait so `fluxbus-consumer`/`fluxbus-runtime` can be exercised
/// against an in-memory [`crate::mock::MockStore`] in tests instead of a
/// live Redis server (grounded on `tests/mocks/connection.py` from
/// `original_source/`).
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// `XADD stream *|id field value [field value ...]`. Returns the
    /// server-assigned (or explicit) entry ID.
    async fn add(
        &self,
        stream: &str,
        id: Option<&str>,
        fields: &[(&str, &str)],
    ) -> Result<String>;

    /// `XREADGROUP GROUP group consumer [BLOCK ms] COUNT count STREAMS stream >`
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: Option<u64>,
    ) -> Result<Option<StreamBatch>>;

    /// `XREADGROUP ... STREAMS stream 0` — replay this consumer's own
    /// still-pending entries (the "inbox" spec.md §4.3 describes).
    async fn read_pending_for_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Option<StreamBatch>>;

    async fn range(&self, stream: &str, start: &str, end: &str, count: usize) -> Result<Vec<StreamEntry>>;

    async fn revrange(&self, stream: &str, start: &str, end: &str, count: usize) -> Result<Vec<StreamEntry>>;

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary>;

    /// `consumer` restricts the range to entries currently owned by that
    /// consumer (used for inbox drain); `None` scans the whole group (used
    /// for idle reclaim).
    async fn pending_range(
        &self,
        stream: &str,
        group: &str,
        min_idle_ms: u64,
        count: usize,
        consumer: Option<&str>,
    ) -> Result<Vec<PendingDetail>>;

    /// `XCLAIM stream group consumer min-idle-time id [id ...]`
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[&str],
    ) -> Result<Vec<StreamEntry>>;

    async fn ack(&self, stream: &str, group: &str, ids: &[&str]) -> Result<u64>;

    async fn group_create(&self, stream: &str, group: &str, start: GroupStart, mkstream: bool) -> Result<()>;

    async fn group_create_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<()>;

    async fn group_del_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<u64>;

    async fn group_destroy(&self, stream: &str, group: &str) -> Result<()>;

    async fn info_groups(&self, stream: &str) -> Result<Vec<GroupInfo>>;

    async fn info_consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>>;

    async fn len(&self, stream: &str) -> Result<u64>;

    /// `XTRIM stream MAXLEN ~ count`
    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64>;

    // --- key/value side commands, used by fluxbus-lock and progress-key
    // tracking; grounded on the same `redis` crate surface, not XSTREAM
    // commands. ---

    /// `SET key value NX PX ttl_ms` — returns whether the key was set.
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// `HSETNX key field value` then `EXPIRE key ttl_secs` — used by the
    /// progress-pipeline step to seed a handler's attempt counter at 0
    /// without clobbering a concurrent writer's value.
    async fn hash_set_nx(&self, key: &str, field: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    /// `HSET key field value` then `EXPIRE key ttl_secs` — used to mark a
    /// handler permanently complete (`value = "true"`), as distinct from
    /// `hash_increment`'s attempt-counter bump.
    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Compare-and-delete: delete `key` only if its current value equals
    /// `expected`. Used for lock release. Implementations should prefer an
    /// atomic Lua script and fall back to a plain `DEL` only when scripting
    /// is unavailable (see `fluxbus-lock`).
    async fn compare_delete(&self, key: &str, expected: &str) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<u64>;

    /// `HINCRBY key field 1` then `EXPIRE key ttl_secs` — the progress-key
    /// attempt counter, keyed `message_id::group_name::progress`.
    async fn hash_increment(&self, key: &str, field: &str, ttl_secs: u64) -> Result<i64>;

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>>;

    /// `KEYS pattern` — glob-style key enumeration, used by the operational
    /// CLI tools (`clear-groups`, `clean-handler-records`, `unlock`) to find
    /// progress/lock keys matching `*:<app>:*` without a per-key index.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    /// `EXISTS key` — whether the key is present, regardless of type.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// `TYPE key` — the server-reported type, or `None` if the key does not
    /// exist. Used by `fluxbus-clear-groups` to filter a `KEYS *` sweep
    /// down to stream keys the way `original_source`'s `clear_groups.py`
    /// filters with `connection.type(key) == STREAM_TYPE`.
    async fn type_of(&self, key: &str) -> Result<Option<KeyType>>;
}
