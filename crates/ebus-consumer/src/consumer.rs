//! The per-listener consumer: owns a `(stream, group, consumer)` tuple and
//! presents a reliable iterator of message batches, per spec.md §4.3.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use fluxbus_lock::Scope;
use fluxbus_store::{GroupStart, StreamEntry, StreamStore};

use crate::retry::{self, Retry};

/// Well-known consumer name that owns released/orphaned messages pending
/// reassignment (spec.md's "Inbox" glossary entry).
pub const DEFAULT_INBOX_NAME: &str = "inbox";
/// Default blocking-read timeout (spec.md §4.3 `Read(block_ms)`).
pub const DEFAULT_BLOCK_MS: u64 = 100_000;
/// Default idle-reclaim eligibility threshold (spec.md §4.3 step 2).
pub const DEFAULT_MAX_IDLE_TIME_MS: u64 = 600_000;

const LOCK_TTL_MS: u64 = 30_000;
const LOCK_TIMEOUT_MS: u64 = 30_000;
const READ_COUNT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] fluxbus_store::Error),
    #[error(transparent)]
    Lock(#[from] fluxbus_lock::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Created,
    Active,
    Inactive,
}

/// Owns a `(stream, group, consumer)` tuple against a [`StreamStore`]. Every
/// multi-step mutation (group/consumer creation, inbox drain, idle reclaim)
/// runs under the group's [`fluxbus_lock`], per spec.md §4.2's usage rule.
pub struct Consumer {
    store: Arc<dyn StreamStore>,
    stream: String,
    group: String,
    consumer: String,
    inbox_name: String,
    max_idle_ms: u64,
    state: ConsumerState,
    retry: StdMutex<Box<dyn Retry>>,
}

impl Consumer {
    pub fn new(
        store: Arc<dyn StreamStore>,
        stream: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
    ) -> Self {
        Consumer {
            store,
            stream: stream.into(),
            group: group.into(),
            consumer: consumer.into(),
            inbox_name: DEFAULT_INBOX_NAME.to_string(),
            max_idle_ms: DEFAULT_MAX_IDLE_TIME_MS,
            state: ConsumerState::Created,
            retry: StdMutex::new(Box::new(retry::ExponentialBackoff::default())),
        }
    }

    pub fn with_inbox_name(mut self, name: impl Into<String>) -> Self {
        self.inbox_name = name.into();
        self
    }

    pub fn with_max_idle_ms(mut self, ms: u64) -> Self {
        self.max_idle_ms = ms;
        self
    }

    /// Override the transient-error retry policy governing the fresh-read
    /// poll loop (default: [`retry::ExponentialBackoff`]).
    pub fn with_retry(mut self, retry: impl Retry + 'static) -> Self {
        self.retry = StdMutex::new(Box::new(retry));
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn name(&self) -> &str {
        &self.consumer
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    fn lock_key(&self) -> String {
        fluxbus_lock::lock_key(&self.stream, &self.group, None)
    }

    /// Under the group lock: ensure the group exists (create if absent,
    /// tolerating concurrent creation), create the inbox consumer if
    /// absent, then create the named consumer. Sets state to active.
    pub async fn create(&mut self, scope: &Scope) -> Result<()> {
        let guard = fluxbus_lock::acquire(
            self.store.clone(),
            &self.lock_key(),
            scope,
            LOCK_TTL_MS,
            LOCK_TIMEOUT_MS,
        )
        .await?;

        self.store
            .group_create(&self.stream, &self.group, GroupStart::Latest, true)
            .await?;
        self.store
            .group_create_consumer(&self.stream, &self.group, &self.inbox_name)
            .await?;
        self.store
            .group_create_consumer(&self.stream, &self.group, &self.consumer)
            .await?;

        guard.release().await?;
        self.state = ConsumerState::Active;
        tracing::debug!(stream = %self.stream, group = %self.group, consumer = %self.consumer, "consumer created");
        Ok(())
    }

    /// Read the next batch per spec.md §4.3's three-step order: inbox
    /// drain, idle reclaim (excluding `exclude_ids`), then a blocking fresh
    /// read. An empty fresh read sleeps one second and returns an empty
    /// batch rather than looping internally, so the caller's poll loop gets
    /// a chance to re-check its shutdown flag between reads (spec.md §5).
    /// Transient store errors are retried internally with backoff.
    pub async fn read(
        &self,
        scope: &Scope,
        block_ms: u64,
        exclude_ids: &HashSet<String>,
    ) -> Result<Vec<StreamEntry>> {
        if let Some(entries) = self.drain_inbox(scope).await? {
            tracing::debug!(count = entries.len(), "drained inbox");
            return Ok(entries);
        }

        if let Some(entries) = self.reclaim_idle(scope, exclude_ids).await? {
            tracing::debug!(count = entries.len(), "reclaimed idle entries");
            return Ok(entries);
        }

        loop {
            let attempt = self
                .store
                .read_group(&self.stream, &self.group, &self.consumer, READ_COUNT, Some(block_ms))
                .await;

            match attempt {
                Ok(Some(batch)) if !batch.entries.is_empty() => {
                    self.retry.lock().unwrap().reset();
                    return Ok(batch.entries);
                }
                Ok(_) => {
                    self.retry.lock().unwrap().reset();
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    return Ok(Vec::new());
                }
                Err(err) => {
                    let wait = self.retry.lock().unwrap().next_backoff(&err);
                    match wait {
                        Some(wait) => {
                            tracing::debug!(stream = %self.stream, group = %self.group, error = %err, wait_ms = wait.as_millis(), "transient read error, retrying");
                            tokio::time::sleep(wait).await;
                        }
                        None => return Err(err.into()),
                    }
                }
            }
        }
    }

    async fn drain_inbox(&self, scope: &Scope) -> Result<Option<Vec<StreamEntry>>> {
        let guard = fluxbus_lock::acquire(
            self.store.clone(),
            &self.lock_key(),
            scope,
            LOCK_TTL_MS,
            LOCK_TIMEOUT_MS,
        )
        .await?;

        let pending = self
            .store
            .pending_range(&self.stream, &self.group, 0, READ_COUNT, Some(&self.inbox_name))
            .await?;

        let result = if pending.is_empty() {
            None
        } else {
            let ids: Vec<&str> = pending.iter().map(|p| p.id.as_str()).collect();
            let claimed = self
                .store
                .claim(&self.stream, &self.group, &self.consumer, 0, &ids)
                .await?;
            if claimed.is_empty() {
                None
            } else {
                Some(claimed)
            }
        };

        guard.release().await?;
        Ok(result)
    }

    async fn reclaim_idle(
        &self,
        scope: &Scope,
        exclude_ids: &HashSet<String>,
    ) -> Result<Option<Vec<StreamEntry>>> {
        let guard = fluxbus_lock::acquire(
            self.store.clone(),
            &self.lock_key(),
            scope,
            LOCK_TTL_MS,
            LOCK_TIMEOUT_MS,
        )
        .await?;

        let pending = self
            .store
            .pending_range(&self.stream, &self.group, self.max_idle_ms, READ_COUNT, None)
            .await?;

        let ids: Vec<&str> = pending
            .iter()
            .filter(|p| !exclude_ids.contains(&p.id))
            .map(|p| p.id.as_str())
            .collect();

        let result = if ids.is_empty() {
            None
        } else {
            let claimed = self
                .store
                .claim(&self.stream, &self.group, &self.consumer, self.max_idle_ms, &ids)
                .await?;
            if claimed.is_empty() {
                None
            } else {
                Some(claimed)
            }
        };

        guard.release().await?;
        Ok(result)
    }

    /// Acknowledge `message_id` and delete its progress key, but only when
    /// `all_handlers_complete` is true. Returns whether the message was
    /// actually acked — the stricter of the two rules spec.md §9's Open
    /// Question names: ack only when every handler in the progress map has
    /// completed, never on partial success.
    pub async fn mark_complete(
        &self,
        message_id: &str,
        progress_key: &str,
        all_handlers_complete: bool,
    ) -> Result<bool> {
        if !all_handlers_complete {
            return Ok(false);
        }
        self.store.ack(&self.stream, &self.group, &[message_id]).await?;
        self.store.delete(progress_key).await?;
        Ok(true)
    }

    /// Claim `message_id` back to the inbox (or a named consumer), making
    /// it available for another worker.
    pub async fn release(&self, message_id: &str, to: Option<&str>) -> Result<()> {
        let target = to.unwrap_or(&self.inbox_name);
        self.store
            .claim(&self.stream, &self.group, target, 0, &[message_id])
            .await?;
        Ok(())
    }

    /// Transfer all of this consumer's pending messages to the inbox, then
    /// delete the consumer from the group. No lock: this consumer is the
    /// sole owner of its own pending set.
    pub async fn remove(mut self) -> Result<()> {
        let pending = self
            .store
            .pending_range(&self.stream, &self.group, 0, 10_000, Some(&self.consumer))
            .await?;

        if !pending.is_empty() {
            let ids: Vec<&str> = pending.iter().map(|p| p.id.as_str()).collect();
            self.store
                .claim(&self.stream, &self.group, &self.inbox_name, 0, &ids)
                .await?;
        }

        self.store
            .group_del_consumer(&self.stream, &self.group, &self.consumer)
            .await?;
        self.state = ConsumerState::Inactive;
        tracing::debug!(stream = %self.stream, group = %self.group, consumer = %self.consumer, "consumer removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxbus_store::MockStore;

    fn store() -> Arc<dyn StreamStore> {
        Arc::new(MockStore::new())
    }

    #[tokio::test]
    async fn idle_reclaim_returns_same_message_to_another_consumer() {
        let store = store();
        store.add("EVENTS", None, &[("event", "x")]).await.unwrap();

        let scope = Scope::new();
        let mut a = Consumer::new(store.clone(), "EVENTS", "g", "a").with_max_idle_ms(0);
        a.create(&scope).await.unwrap();
        let batch = a.read(&scope, 10, &HashSet::new()).await.unwrap();
        assert_eq!(batch.len(), 1);
        let id = batch[0].id.clone();

        let mut b = Consumer::new(store.clone(), "EVENTS", "g", "b").with_max_idle_ms(0);
        b.create(&scope).await.unwrap();
        let reclaimed = b.read(&scope, 10, &HashSet::new()).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, id);
    }

    #[tokio::test]
    async fn remove_transfers_pending_to_inbox() {
        let store = store();
        store.add("EVENTS", None, &[("event", "x")]).await.unwrap();
        store.add("EVENTS", None, &[("event", "y")]).await.unwrap();
        store.add("EVENTS", None, &[("event", "z")]).await.unwrap();

        let scope = Scope::new();
        let mut a = Consumer::new(store.clone(), "EVENTS", "g", "a");
        a.create(&scope).await.unwrap();
        let batch = a.read(&scope, 10, &HashSet::new()).await.unwrap();
        assert_eq!(batch.len(), 3);
        a.remove().await.unwrap();

        let mut c = Consumer::new(store.clone(), "EVENTS", "g", "c");
        c.create(&scope).await.unwrap();
        let from_inbox = c.read(&scope, 10, &HashSet::new()).await.unwrap();
        assert_eq!(from_inbox.len(), 3);
    }

    #[tokio::test]
    async fn empty_fresh_read_returns_instead_of_spinning_forever() {
        let store = store();
        let scope = Scope::new();
        let mut consumer = Consumer::new(store.clone(), "EVENTS", "g", "c");
        consumer.create(&scope).await.unwrap();

        let batch = consumer.read(&scope, 10, &HashSet::new()).await.unwrap();
        assert!(
            batch.is_empty(),
            "an empty fresh read must return control to the caller's poll loop so it can re-check its shutdown flag"
        );
    }

    #[tokio::test]
    async fn mark_complete_is_noop_until_all_handlers_done() {
        let store = store();
        let id = store.add("EVENTS", None, &[("event", "x")]).await.unwrap();
        store.group_create("EVENTS", "g", GroupStart::Beginning, true).await.unwrap();
        store.read_group("EVENTS", "g", "c", 10, None).await.unwrap();

        let consumer = Consumer::new(store.clone(), "EVENTS", "g", "c");
        let acked = consumer.mark_complete(&id, "progress-key", false).await.unwrap();
        assert!(!acked);
        assert_eq!(store.pending_summary("EVENTS", "g").await.unwrap().count, 1);

        let acked = consumer.mark_complete(&id, "progress-key", true).await.unwrap();
        assert!(acked);
        assert_eq!(store.pending_summary("EVENTS", "g").await.unwrap().count, 0);
    }
}
