//! Per-message, per-handler progress tracking, per spec.md §3/§4.4.
//!
//! The progress key `message_id::group_name::progress` holds a hash of
//! `handler_identifier -> attempt_count`, with a value of the literal
//! string `"true"` standing in for "permanently completed" (spec.md §4.4's
//! "increment-to-completed (set to boolean true)").

use std::collections::HashMap;

use fluxbus_store::StreamStore;

/// Default progress-key TTL (spec.md §3 `KEY_LIFETIME_SECONDS`).
pub const DEFAULT_KEY_LIFETIME_SECONDS: u64 = 7_200;
/// Default per-handler retry ceiling (spec.md §3 `MAX_HANDLER_ATTEMPTS`).
pub const DEFAULT_MAX_HANDLER_ATTEMPTS: u32 = 5;

const COMPLETE_VALUE: &str = "true";

/// `<message_id>::<group_name>::progress`, per spec.md §6's persisted state
/// layout.
pub fn progress_key(message_id: &str, group_name: &str) -> String {
    format!("{message_id}::{group_name}::progress")
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] fluxbus_store::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single handler's resolution state, decoded from its raw hash value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    /// Still owed: attempt count is below the ceiling and it hasn't
    /// completed.
    Owed(u32),
    /// Ran successfully at least once.
    Completed,
    /// Exhausted `MAX_HANDLER_ATTEMPTS` without succeeding — permanently
    /// failed and no longer retried, even as siblings may still run
    /// (spec.md §8 invariant 5).
    Exhausted,
}

fn decode_status(value: Option<&str>, max_attempts: u32) -> HandlerStatus {
    match value {
        Some(COMPLETE_VALUE) => HandlerStatus::Completed,
        Some(raw) => match raw.parse::<u32>() {
            Ok(n) if n < max_attempts => HandlerStatus::Owed(n),
            Ok(_) => HandlerStatus::Exhausted,
            Err(_) => HandlerStatus::Owed(0),
        },
        None => HandlerStatus::Owed(0),
    }
}

/// Coordinates the progress hash for one message's worth of handlers.
pub struct ProgressTracker<'a> {
    store: &'a dyn StreamStore,
    ttl_secs: u64,
    max_attempts: u32,
}

impl<'a> ProgressTracker<'a> {
    pub fn new(store: &'a dyn StreamStore, ttl_secs: u64, max_attempts: u32) -> Self {
        ProgressTracker {
            store,
            ttl_secs,
            max_attempts,
        }
    }

    /// Seed every handler id at attempt-count 0 if absent, then read the
    /// full hash back — spec.md §4.4's progress pipeline: "for each
    /// handler, set-if-absent(progress[handler_id]=0); set TTL; read all
    /// entries."
    pub async fn seed_and_read(
        &self,
        key: &str,
        handler_ids: &[String],
    ) -> Result<HashMap<String, String>> {
        for id in handler_ids {
            self.store.hash_set_nx(key, id, "0", self.ttl_secs).await?;
        }
        Ok(self.store.hash_get_all(key).await?.into_iter().collect())
    }

    /// Handlers whose attempt count is below the ceiling and haven't
    /// completed — the "still owed" set spec.md §3 defines.
    pub fn still_owed<'b>(
        &self,
        entries: &HashMap<String, String>,
        handler_ids: &'b [String],
    ) -> Vec<&'b String> {
        handler_ids
            .iter()
            .filter(|id| matches!(decode_status(entries.get(*id).map(String::as_str), self.max_attempts), HandlerStatus::Owed(_)))
            .collect()
    }

    pub async fn mark_handler_complete(&self, key: &str, handler_id: &str) -> Result<()> {
        self.store.hash_set(key, handler_id, COMPLETE_VALUE, self.ttl_secs).await?;
        Ok(())
    }

    pub async fn mark_handler_attempt(&self, key: &str, handler_id: &str) -> Result<i64> {
        Ok(self.store.hash_increment(key, handler_id, self.ttl_secs).await?)
    }

    /// True when every handler in `handler_ids` has either completed or
    /// exhausted its retry ceiling — the stricter ack rule spec.md §9 fixes
    /// ("ack only when progress map shows all handlers complete").
    pub async fn all_resolved(&self, key: &str, handler_ids: &[String]) -> Result<bool> {
        let entries: HashMap<String, String> = self.store.hash_get_all(key).await?.into_iter().collect();
        Ok(handler_ids.iter().all(|id| {
            !matches!(
                decode_status(entries.get(id).map(String::as_str), self.max_attempts),
                HandlerStatus::Owed(_)
            )
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fluxbus_store::MockStore;

    #[tokio::test]
    async fn ceiling_marks_handler_exhausted_not_completed() {
        let store = MockStore::new();
        let tracker = ProgressTracker::new(&store, 7_200, 2);
        let key = progress_key("1-0", "g");
        let ids = vec!["h1".to_string()];

        tracker.seed_and_read(&key, &ids).await.unwrap();
        tracker.mark_handler_attempt(&key, "h1").await.unwrap();
        tracker.mark_handler_attempt(&key, "h1").await.unwrap();

        let entries = tracker.seed_and_read(&key, &ids).await.unwrap();
        assert!(tracker.still_owed(&entries, &ids).is_empty());
        assert!(tracker.all_resolved(&key, &ids).await.unwrap());
    }

    #[tokio::test]
    async fn completed_handler_is_resolved() {
        let store = MockStore::new();
        let tracker = ProgressTracker::new(&store, 7_200, 5);
        let key = progress_key("1-0", "g");
        tracker.mark_handler_complete(&key, "h1").await.unwrap();
        assert!(tracker.all_resolved(&key, &["h1".to_string()]).await.unwrap());
    }
}
