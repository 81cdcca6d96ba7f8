//! An in-memory [`StreamStore`] double for tests, standing in for a live
//! Redis server. Grounded on `tests/mocks/connection.py` from
//! `original_source/`, which plays the same role for the Python test suite:
//! a drop-in connection that keeps streams, consumer groups, and pending
//! entries in memory instead of talking to a real server.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::store::StreamStore;
use crate::types::{
    ConsumerInfo, GroupInfo, GroupStart, KeyType, PendingDetail, PendingSummary, StreamBatch, StreamEntry,
};

#[derive(Clone)]
struct PendingEntry {
    consumer: String,
    delivery_count: u64,
    delivered_at: std::time::Instant,
}

impl Default for PendingEntry {
    fn default() -> Self {
        PendingEntry {
            consumer: String::new(),
            delivery_count: 0,
            delivered_at: std::time::Instant::now(),
        }
    }
}

#[derive(Default)]
struct Group {
    consumers: Vec<String>,
    last_delivered_index: usize,
    pending: HashMap<String, PendingEntry>,
}

#[derive(Default)]
struct Stream {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, Group>,
    next_seq: u64,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, Stream>,
    kv: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
}

/// In-memory stand-in for a Redis Streams connection.
pub struct MockStore {
    inner: Mutex<Inner>,
}

impl Default for MockStore {
    fn default() -> Self {
        MockStore {
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(stream: &mut Stream) -> String {
        stream.next_seq += 1;
        format!("{}-0", stream.next_seq)
    }
}

#[async_trait]
impl StreamStore for MockStore {
    async fn add(&self, stream: &str, id: Option<&str>, fields: &[(&str, &str)]) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.streams.entry(stream.to_string()).or_default();
        let id = match id {
            Some(explicit) => explicit.to_string(),
            None => Self::next_id(entry),
        };
        entry.entries.push(StreamEntry {
            id: id.clone(),
            fields: fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        });
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        _block_ms: Option<u64>,
    ) -> Result<Option<StreamBatch>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.streams.get_mut(stream) else {
            return Ok(None);
        };
        let group_state = entry.groups.entry(group.to_string()).or_default();
        if !group_state.consumers.contains(&consumer.to_string()) {
            group_state.consumers.push(consumer.to_string());
        }

        let start = group_state.last_delivered_index;
        let take = entry
            .entries
            .get(start..)
            .map(|slice| slice.iter().take(count).cloned().collect::<Vec<_>>())
            .unwrap_or_default();

        if take.is_empty() {
            return Ok(None);
        }

        for item in &take {
            group_state.pending.insert(
                item.id.clone(),
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivery_count: 1,
                    delivered_at: std::time::Instant::now(),
                },
            );
        }
        group_state.last_delivered_index += take.len();

        Ok(Some(StreamBatch {
            stream: stream.to_string(),
            entries: take,
        }))
    }

    async fn read_pending_for_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Option<StreamBatch>> {
        let inner = self.inner.lock().unwrap();
        let Some(entry) = inner.streams.get(stream) else {
            return Ok(None);
        };
        let Some(group_state) = entry.groups.get(group) else {
            return Ok(None);
        };

        let entries: Vec<StreamEntry> = entry
            .entries
            .iter()
            .filter(|e| {
                group_state
                    .pending
                    .get(&e.id)
                    .map(|p| p.consumer == consumer)
                    .unwrap_or(false)
            })
            .take(count)
            .cloned()
            .collect();

        if entries.is_empty() {
            return Ok(None);
        }

        Ok(Some(StreamBatch {
            stream: stream.to_string(),
            entries,
        }))
    }

    async fn range(&self, stream: &str, _start: &str, _end: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .streams
            .get(stream)
            .map(|s| s.entries.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn revrange(&self, stream: &str, _start: &str, _end: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .streams
            .get(stream)
            .map(|s| s.entries.iter().rev().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary> {
        let inner = self.inner.lock().unwrap();
        let Some(group_state) = inner.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(PendingSummary::default());
        };

        let mut ids: Vec<&String> = group_state.pending.keys().collect();
        ids.sort();

        let mut per_consumer: HashMap<String, u64> = HashMap::new();
        for entry in group_state.pending.values() {
            *per_consumer.entry(entry.consumer.clone()).or_default() += 1;
        }

        Ok(PendingSummary {
            count: group_state.pending.len() as u64,
            lowest_id: ids.first().map(|s| s.to_string()),
            highest_id: ids.last().map(|s| s.to_string()),
            per_consumer: per_consumer.into_iter().collect(),
        })
    }

    async fn pending_range(
        &self,
        stream: &str,
        group: &str,
        min_idle_ms: u64,
        count: usize,
        consumer: Option<&str>,
    ) -> Result<Vec<PendingDetail>> {
        let inner = self.inner.lock().unwrap();
        let Some(group_state) = inner.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(Vec::new());
        };

        let mut details: Vec<PendingDetail> = group_state
            .pending
            .iter()
            .filter(|(_, entry)| consumer.map(|c| c == entry.consumer).unwrap_or(true))
            .map(|(id, entry)| PendingDetail {
                id: id.clone(),
                consumer: entry.consumer.clone(),
                idle_ms: entry.delivered_at.elapsed().as_millis() as u64,
                delivery_count: entry.delivery_count,
            })
            .filter(|detail| detail.idle_ms >= min_idle_ms)
            .collect();
        details.sort_by(|a, b| a.id.cmp(&b.id));
        details.truncate(count);
        Ok(details)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        _min_idle_ms: u64,
        ids: &[&str],
    ) -> Result<Vec<StreamEntry>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = entry.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let mut claimed = Vec::new();
        for id in ids {
            if let Some(pending) = group_state.pending.get_mut(*id) {
                pending.consumer = consumer.to_string();
                pending.delivery_count += 1;
                pending.delivered_at = std::time::Instant::now();
                if let Some(stream_entry) = entry.entries.iter().find(|e| e.id == *id) {
                    claimed.push(stream_entry.clone());
                }
            }
        }
        Ok(claimed)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[&str]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let Some(group_state) = inner.streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) else {
            return Ok(0);
        };
        let mut acked = 0;
        for id in ids {
            if group_state.pending.remove(*id).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }

    async fn group_create(&self, stream: &str, group: &str, start: GroupStart, mkstream: bool) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.streams.contains_key(stream) && !mkstream {
            return Ok(());
        }
        let entry = inner.streams.entry(stream.to_string()).or_default();
        let last_delivered_index = match start {
            GroupStart::Latest => entry.entries.len(),
            GroupStart::Beginning => 0,
        };
        entry.groups.entry(group.to_string()).or_insert(Group {
            last_delivered_index,
            ..Default::default()
        });
        Ok(())
    }

    async fn group_create_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(group_state) = inner.streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) {
            if !group_state.consumers.contains(&consumer.to_string()) {
                group_state.consumers.push(consumer.to_string());
            }
        }
        Ok(())
    }

    async fn group_del_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let Some(group_state) = inner.streams.get_mut(stream).and_then(|s| s.groups.get_mut(group)) else {
            return Ok(0);
        };
        group_state.consumers.retain(|c| c != consumer);
        let pending_ids: Vec<String> = group_state
            .pending
            .iter()
            .filter(|(_, p)| p.consumer == consumer)
            .map(|(id, _)| id.clone())
            .collect();
        let count = pending_ids.len() as u64;
        for id in pending_ids {
            group_state.pending.remove(&id);
        }
        Ok(count)
    }

    async fn group_destroy(&self, stream: &str, group: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.streams.get_mut(stream) {
            entry.groups.remove(group);
        }
        Ok(())
    }

    async fn info_groups(&self, stream: &str) -> Result<Vec<GroupInfo>> {
        let inner = self.inner.lock().unwrap();
        let Some(entry) = inner.streams.get(stream) else {
            return Ok(Vec::new());
        };
        Ok(entry
            .groups
            .iter()
            .map(|(name, group)| GroupInfo {
                name: name.clone(),
                consumers: group.consumers.len() as u64,
                pending: group.pending.len() as u64,
                last_delivered_id: if group.last_delivered_index == 0 {
                    "0-0".to_string()
                } else {
                    entry
                        .entries
                        .get(group.last_delivered_index - 1)
                        .map(|e| e.id.clone())
                        .unwrap_or_else(|| "0-0".to_string())
                },
            })
            .collect())
    }

    async fn info_consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>> {
        let inner = self.inner.lock().unwrap();
        let Some(group_state) = inner.streams.get(stream).and_then(|s| s.groups.get(group)) else {
            return Ok(Vec::new());
        };
        Ok(group_state
            .consumers
            .iter()
            .map(|name| ConsumerInfo {
                name: name.clone(),
                pending: group_state
                    .pending
                    .values()
                    .filter(|p| &p.consumer == name)
                    .count() as u64,
                idle_ms: 0,
            })
            .collect())
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.streams.get(stream).map(|s| s.entries.len() as u64).unwrap_or(0))
    }

    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.streams.get_mut(stream) else {
            return Ok(0);
        };
        let current = entry.entries.len() as u64;
        if current <= max_len {
            return Ok(0);
        }
        let remove = (current - max_len) as usize;
        entry.entries.drain(0..remove);
        Ok(remove as u64)
    }

    async fn set_nx_px(&self, key: &str, value: &str, _ttl_ms: u64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.kv.contains_key(key) {
            return Ok(false);
        }
        inner.kv.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.kv.get(key).cloned())
    }

    async fn compare_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.kv.get(key).map(|v| v.as_str()) == Some(expected) {
            inner.kv.remove(key);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        Ok(if inner.kv.remove(key).is_some() { 1 } else { 0 })
    }

    async fn hash_set_nx(&self, key: &str, field: &str, value: &str, _ttl_secs: u64) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str, _ttl_secs: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        hash.insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hash_increment(&self, key: &str, field: &str, _ttl_secs: u64) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let hash = inner.hashes.entry(key.to_string()).or_default();
        let current: i64 = hash.get(field).and_then(|v| v.parse().ok()).unwrap_or(0);
        let next = current + 1;
        hash.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .hashes
            .get(key)
            .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .streams
            .keys()
            .chain(inner.kv.keys())
            .chain(inner.hashes.keys())
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.streams.contains_key(key) || inner.kv.contains_key(key) || inner.hashes.contains_key(key))
    }

    async fn type_of(&self, key: &str) -> Result<Option<KeyType>> {
        let inner = self.inner.lock().unwrap();
        if inner.streams.contains_key(key) {
            Ok(Some(KeyType::Stream))
        } else if inner.kv.contains_key(key) {
            Ok(Some(KeyType::String))
        } else if inner.hashes.contains_key(key) {
            Ok(Some(KeyType::Hash))
        } else {
            Ok(None)
        }
    }
}

/// Minimal glob matcher supporting `*` and `?`, matching the subset of
/// Redis's `KEYS` pattern syntax the CLI tools actually use
/// (`*:<app>:*`-shaped patterns).
fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn recurse(pattern: &[u8], candidate: &[u8]) -> bool {
        match pattern.first() {
            None => candidate.is_empty(),
            Some(b'*') => {
                recurse(&pattern[1..], candidate)
                    || (!candidate.is_empty() && recurse(pattern, &candidate[1..]))
            }
            Some(b'?') => !candidate.is_empty() && recurse(&pattern[1..], &candidate[1..]),
            Some(&c) => candidate.first() == Some(&c) && recurse(&pattern[1..], &candidate[1..]),
        }
    }
    recurse(pattern.as_bytes(), candidate.as_bytes())
}

#[cfg(test)]
mod glob_tests {
    use super::glob_match;

    #[test]
    fn matches_prefix_and_suffix_wildcards() {
        assert!(glob_match("*:svc:*", "1-0::EVENTS:svc:bus:handlers::progress"));
        assert!(!glob_match("*:svc:*", "1-0::EVENTS:other:bus:handlers::progress"));
    }

    #[test]
    fn matches_lock_key_pattern() {
        assert!(glob_match("*:svc:*:LOCK", "EVENTS:svc:1-0:LOCK"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_group_then_ack_clears_pending() {
        let store = MockStore::new();
        store.add("s", None, &[("event", "x")]).await.unwrap();
        store
            .group_create("s", "g", GroupStart::Beginning, true)
            .await
            .unwrap();

        let batch = store
            .read_group("s", "g", "c1", 10, None)
            .await
            .unwrap()
            .expect("batch");
        assert_eq!(batch.entries.len(), 1);

        let summary = store.pending_summary("s", "g").await.unwrap();
        assert_eq!(summary.count, 1);

        let id = batch.entries[0].id.clone();
        let acked = store.ack("s", "g", &[id.as_str()]).await.unwrap();
        assert_eq!(acked, 1);

        let summary = store.pending_summary("s", "g").await.unwrap();
        assert_eq!(summary.count, 0);
    }

    #[tokio::test]
    async fn claim_reassigns_to_new_consumer() {
        let store = MockStore::new();
        store.add("s", None, &[("event", "x")]).await.unwrap();
        store
            .group_create("s", "g", GroupStart::Beginning, true)
            .await
            .unwrap();
        let batch = store
            .read_group("s", "g", "c1", 10, None)
            .await
            .unwrap()
            .unwrap();
        let id = batch.entries[0].id.clone();

        let claimed = store.claim("s", "g", "c2", 0, &[id.as_str()]).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let consumers = store.info_consumers("s", "g").await.unwrap();
        let c2_pending = consumers
            .iter()
            .find(|c| c.name == "c2")
            .map(|c| c.pending)
            .unwrap_or(0);
        assert_eq!(c2_pending, 1);
    }
}
