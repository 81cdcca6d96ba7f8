use std::collections::HashMap;

/// A single stream record: its server-assigned ID and its decoded field map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.fields.into_iter().collect()
    }
}

/// One stream's worth of entries as returned by `XREADGROUP`/`XREAD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamBatch {
    pub stream: String,
    pub entries: Vec<StreamEntry>,
}

/// Summary form of `XPENDING stream group` (no range).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PendingSummary {
    pub count: u64,
    pub lowest_id: Option<String>,
    pub highest_id: Option<String>,
    pub per_consumer: Vec<(String, u64)>,
}

/// One row of `XPENDING stream group - + count` (extended form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDetail {
    pub id: String,
    pub consumer: String,
    pub idle_ms: u64,
    pub delivery_count: u64,
}

/// One row of `XINFO GROUPS stream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    pub name: String,
    pub consumers: u64,
    pub pending: u64,
    pub last_delivered_id: String,
}

/// One row of `XINFO CONSUMERS stream group`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerInfo {
    pub name: String,
    pub pending: u64,
    pub idle_ms: u64,
}

/// Where to start reading a new consumer group from, per `XGROUP CREATE`'s
/// id argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStart {
    /// `$` — only entries added after group creation.
    Latest,
    /// `0` — every entry currently in the stream.
    Beginning,
}

impl GroupStart {
    pub fn as_redis_arg(self) -> &'static str {
        match self {
            GroupStart::Latest => "$",
            GroupStart::Beginning => "0",
        }
    }
}

/// The server-reported type of a key, per `TYPE key`. Used by operational
/// tooling (`fluxbus-clear-groups`) to tell stream keys apart from the
/// string/hash keys progress tracking and locking use, when enumerating the
/// keyspace via `KEYS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Stream,
    String,
    Hash,
    Other,
}

impl KeyType {
    pub fn from_redis_type_reply(reply: &str) -> Option<KeyType> {
        match reply {
            "none" => None,
            "stream" => Some(KeyType::Stream),
            "string" => Some(KeyType::String),
            "hash" => Some(KeyType::Hash),
            _ => Some(KeyType::Other),
        }
    }
}
