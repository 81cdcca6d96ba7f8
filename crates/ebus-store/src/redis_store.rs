use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{RedisError, Value};

use crate::error::{Error, Result};
use crate::store::StreamStore;
use crate::types::{
    ConsumerInfo, GroupInfo, GroupStart, KeyType, PendingDetail, PendingSummary, StreamBatch, StreamEntry,
};

/// Async Redis Streams client. Owns a `redis::Client` + `ConnectionManager`
/// pair (auto-reconnect), constructed once per listener at consumer-group
/// creation time and cheaply `Clone`d into every task that needs it —
/// grounded on the connection ownership pattern in
/// `other_examples/.../ethhook__crates-message-processor-src-consumer.rs.rs`.
#[derive(Clone)]
pub struct RedisStreamStore {
    connection: ConnectionManager,
}

impl RedisStreamStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(RedisStreamStore { connection })
    }

    fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

fn bulk(value: &Value) -> Option<&[Value]> {
    match value {
        Value::Bulk(items) => Some(items),
        _ => None,
    }
}

fn data_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

fn parse_fields(value: &Value) -> Vec<(String, String)> {
    let Some(items) = bulk(value) else {
        return Vec::new();
    };
    items
        .chunks(2)
        .filter_map(|chunk| match chunk {
            [key, val] => Some((data_string(key)?, data_string(val)?)),
            _ => None,
        })
        .collect()
}

fn parse_entry(value: &Value) -> Option<StreamEntry> {
    let parts = bulk(value)?;
    let id = data_string(parts.first()?)?;
    let fields = parts.get(1).map(parse_fields).unwrap_or_default();
    Some(StreamEntry { id, fields })
}

fn parse_entries(value: &Value) -> Vec<StreamEntry> {
    bulk(value)
        .map(|entries| entries.iter().filter_map(parse_entry).collect())
        .unwrap_or_default()
}

/// Parse the nested `XREADGROUP`/`XREAD` reply shape:
/// `Bulk([Bulk([Data(stream), Bulk([entries...])]), ...])`.
fn parse_read_reply(value: &Value) -> Option<StreamBatch> {
    let streams = bulk(value)?;
    let first = streams.first()?;
    let parts = bulk(first)?;
    let stream = data_string(parts.first()?)?;
    let entries = parts.get(1).map(parse_entries).unwrap_or_default();
    Some(StreamBatch { stream, entries })
}

fn ignore_busygroup(result: std::result::Result<(), RedisError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(Error::Redis(e)),
    }
}

const COMPARE_DELETE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

// HSETNX/HSET/HINCRBY and EXPIRE as one round trip so a crash or reconnect
// between the two commands can never leave the hash key without a TTL.
const HSETNX_EXPIRE_SCRIPT: &str = r#"
local set = redis.call("HSETNX", KEYS[1], ARGV[1], ARGV[2])
redis.call("EXPIRE", KEYS[1], ARGV[3])
return set
"#;

const HSET_EXPIRE_SCRIPT: &str = r#"
redis.call("HSET", KEYS[1], ARGV[1], ARGV[2])
redis.call("EXPIRE", KEYS[1], ARGV[3])
return 0
"#;

const HINCRBY_EXPIRE_SCRIPT: &str = r#"
local value = redis.call("HINCRBY", KEYS[1], ARGV[1], 1)
redis.call("EXPIRE", KEYS[1], ARGV[2])
return value
"#;

#[async_trait]
impl StreamStore for RedisStreamStore {
    async fn add(&self, stream: &str, id: Option<&str>, fields: &[(&str, &str)]) -> Result<String> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg(id.unwrap_or("*"));
        for (key, value) in fields {
            cmd.arg(*key).arg(*value);
        }
        let id: String = cmd.query_async(&mut self.connection()).await?;
        Ok(id)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: Option<u64>,
    ) -> Result<Option<StreamBatch>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(consumer);
        if let Some(block_ms) = block_ms {
            cmd.arg("BLOCK").arg(block_ms);
        }
        cmd.arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(stream)
            .arg(">");

        let reply: Value = cmd.query_async(&mut self.connection()).await?;
        Ok(parse_read_reply(&reply))
    }

    async fn read_pending_for_consumer(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Option<StreamBatch>> {
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("STREAMS")
            .arg(stream)
            .arg("0")
            .query_async(&mut self.connection())
            .await?;
        Ok(parse_read_reply(&reply))
    }

    async fn range(&self, stream: &str, start: &str, end: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let reply: Value = redis::cmd("XRANGE")
            .arg(stream)
            .arg(start)
            .arg(end)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.connection())
            .await?;
        Ok(parse_entries(&reply))
    }

    async fn revrange(&self, stream: &str, start: &str, end: &str, count: usize) -> Result<Vec<StreamEntry>> {
        let reply: Value = redis::cmd("XREVRANGE")
            .arg(stream)
            .arg(start)
            .arg(end)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.connection())
            .await?;
        Ok(parse_entries(&reply))
    }

    async fn pending_summary(&self, stream: &str, group: &str) -> Result<PendingSummary> {
        let reply: Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut self.connection())
            .await?;

        let Some(parts) = bulk(&reply) else {
            return Ok(PendingSummary::default());
        };

        let count = parts
            .first()
            .and_then(|v| match v {
                Value::Int(n) => Some(*n as u64),
                _ => None,
            })
            .unwrap_or(0);
        let lowest_id = parts.get(1).and_then(data_string);
        let highest_id = parts.get(2).and_then(data_string);
        let per_consumer = parts
            .get(3)
            .and_then(bulk)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let row = bulk(row)?;
                        let name = data_string(row.first()?)?;
                        let n: u64 = data_string(row.get(1)?)?.parse().ok()?;
                        Some((name, n))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(PendingSummary {
            count,
            lowest_id,
            highest_id,
            per_consumer,
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
        let mut cmd = redis::cmd("XPENDING");
        cmd.arg(stream).arg(group).arg("IDLE").arg(min_idle_ms).arg("-").arg("+").arg(count);
        if let Some(consumer) = consumer {
            cmd.arg(consumer);
        }
        let reply: Value = cmd.query_async(&mut self.connection()).await?;

        let details = bulk(&reply)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let row = bulk(row)?;
                        let id = data_string(row.first()?)?;
                        let consumer = data_string(row.get(1)?)?;
                        let idle_ms = match row.get(2)? {
                            Value::Int(n) => *n as u64,
                            other => data_string(other)?.parse().ok()?,
                        };
                        let delivery_count = match row.get(3)? {
                            Value::Int(n) => *n as u64,
                            other => data_string(other)?.parse().ok()?,
                        };
                        Some(PendingDetail {
                            id,
                            consumer,
                            idle_ms,
                            delivery_count,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(details)
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        ids: &[&str],
    ) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(stream).arg(group).arg(consumer).arg(min_idle_ms);
        for id in ids {
            cmd.arg(*id);
        }
        let reply: Value = cmd.query_async(&mut self.connection()).await?;
        Ok(parse_entries(&reply))
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[&str]) -> Result<u64> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(*id);
        }
        let acked: u64 = cmd.query_async(&mut self.connection()).await?;
        Ok(acked)
    }

    async fn group_create(&self, stream: &str, group: &str, start: GroupStart, mkstream: bool) -> Result<()> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE").arg(stream).arg(group).arg(start.as_redis_arg());
        if mkstream {
            cmd.arg("MKSTREAM");
        }
        let result: std::result::Result<(), RedisError> =
            cmd.query_async(&mut self.connection()).await;
        ignore_busygroup(result)
    }

    async fn group_create_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<()> {
        let _created: bool = redis::cmd("XGROUP")
            .arg("CREATECONSUMER")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .query_async(&mut self.connection())
            .await?;
        Ok(())
    }

    async fn group_del_consumer(&self, stream: &str, group: &str, consumer: &str) -> Result<u64> {
        let pending: u64 = redis::cmd("XGROUP")
            .arg("DELCONSUMER")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .query_async(&mut self.connection())
            .await?;
        Ok(pending)
    }

    async fn group_destroy(&self, stream: &str, group: &str) -> Result<()> {
        let _destroyed: bool = redis::cmd("XGROUP")
            .arg("DESTROY")
            .arg(stream)
            .arg(group)
            .query_async(&mut self.connection())
            .await?;
        Ok(())
    }

    async fn info_groups(&self, stream: &str) -> Result<Vec<GroupInfo>> {
        let reply: Value = redis::cmd("XINFO")
            .arg("GROUPS")
            .arg(stream)
            .query_async(&mut self.connection())
            .await?;

        let groups = bulk(&reply)
            .map(|rows| rows.iter().filter_map(parse_group_info).collect())
            .unwrap_or_default();
        Ok(groups)
    }

    async fn info_consumers(&self, stream: &str, group: &str) -> Result<Vec<ConsumerInfo>> {
        let reply: Value = redis::cmd("XINFO")
            .arg("CONSUMERS")
            .arg(stream)
            .arg(group)
            .query_async(&mut self.connection())
            .await?;

        let consumers = bulk(&reply)
            .map(|rows| rows.iter().filter_map(parse_consumer_info).collect())
            .unwrap_or_default();
        Ok(consumers)
    }

    async fn len(&self, stream: &str) -> Result<u64> {
        let len: u64 = redis::cmd("XLEN")
            .arg(stream)
            .query_async(&mut self.connection())
            .await?;
        Ok(len)
    }

    async fn trim(&self, stream: &str, max_len: u64) -> Result<u64> {
        let trimmed: u64 = redis::cmd("XTRIM")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_len)
            .query_async(&mut self.connection())
            .await?;
        Ok(trimmed)
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> Result<bool> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.connection())
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.connection())
            .await?;
        Ok(value)
    }

    async fn compare_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let script = redis::Script::new(COMPARE_DELETE_SCRIPT);
        let result = script
            .key(key)
            .arg(expected)
            .invoke_async::<i64>(&mut self.connection())
            .await;

        match result {
            Ok(deleted) => Ok(deleted == 1),
            Err(_) => {
                // Scripting unavailable (e.g. a read-only replica) — fall
                // back to a non-atomic read-then-delete.
                if self.get(key).await?.as_deref() == Some(expected) {
                    Ok(self.delete(key).await? > 0)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        let deleted: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut self.connection())
            .await?;
        Ok(deleted)
    }

    async fn hash_set_nx(&self, key: &str, field: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let set: bool = redis::Script::new(HSETNX_EXPIRE_SCRIPT)
            .key(key)
            .arg(field)
            .arg(value)
            .arg(ttl_secs)
            .invoke_async(&mut self.connection())
            .await?;
        Ok(set)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let _: i64 = redis::Script::new(HSET_EXPIRE_SCRIPT)
            .key(key)
            .arg(field)
            .arg(value)
            .arg(ttl_secs)
            .invoke_async(&mut self.connection())
            .await?;
        Ok(())
    }

    async fn hash_increment(&self, key: &str, field: &str, ttl_secs: u64) -> Result<i64> {
        let value: i64 = redis::Script::new(HINCRBY_EXPIRE_SCRIPT)
            .key(key)
            .arg(field)
            .arg(ttl_secs)
            .invoke_async(&mut self.connection())
            .await?;
        Ok(value)
    }

    async fn hash_get_all(&self, key: &str) -> Result<Vec<(String, String)>> {
        let reply: Value = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut self.connection())
            .await?;
        Ok(parse_fields(&reply))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(pattern)
            .query_async(&mut self.connection())
            .await?;
        Ok(keys)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let count: u64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut self.connection())
            .await?;
        Ok(count > 0)
    }

    async fn type_of(&self, key: &str) -> Result<Option<KeyType>> {
        let reply: String = redis::cmd("TYPE")
            .arg(key)
            .query_async(&mut self.connection())
            .await?;
        Ok(KeyType::from_redis_type_reply(&reply))
    }
}

fn parse_group_info(value: &Value) -> Option<GroupInfo> {
    let fields = parse_fields(value);
    let lookup = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
    Some(GroupInfo {
        name: lookup("name")?,
        consumers: lookup("consumers")?.parse().ok()?,
        pending: lookup("pending")?.parse().ok()?,
        last_delivered_id: lookup("last-delivered-id")?,
    })
}

fn parse_consumer_info(value: &Value) -> Option<ConsumerInfo> {
    let fields = parse_fields(value);
    let lookup = |name: &str| fields.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());
    Some(ConsumerInfo {
        name: lookup("name")?,
        pending: lookup("pending")?.parse().ok()?,
        idle_ms: lookup("idle")?.parse().ok()?,
    })
}
