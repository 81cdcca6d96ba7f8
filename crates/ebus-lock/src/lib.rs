//! A re-entrant, scope-safe distributed lock built atop
//! [`fluxbus_store::StreamStore`]'s key/value side commands.
//!
//! Keys are `stream:group[:message_id]:LOCK`, matching the naming spec.md's
//! Lock component describes. Re-entrancy is recognized by an opaque scope
//! token — `(call-chain id, tokio::task::Id)` — identifying the caller's
//! call-site lineage, per the Design Notes supplemental in SPEC_FULL.md §4.2
//! (derived from `original_source`'s description of lock acquisition being
//! safe to nest within the same logical operation).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lazy_static::lazy_static;
use rand::Rng;
use uuid::Uuid;

use fluxbus_store::StreamStore;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] fluxbus_store::Error),
    #[error("timed out waiting to acquire lock '{0}'")]
    Timeout(String),
    /// spec.md §4.2: `acquire` "fails with `LockLost` if the server evicts
    /// it" — raised when the background watchdog (see `spawn_watchdog`)
    /// observes the lock key missing or holding a different token than the
    /// one this holder set, meaning the server expired or overwrote it
    /// while still held.
    #[error("lock '{0}' was evicted by the store while held")]
    LockLost(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Identifies a single call-site lineage for re-entrancy checks. Cloning a
/// `Scope` marks a nested call as part of the same logical lock-holder;
/// creating a new one (the default entry point) starts a fresh lineage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    call_chain_id: Uuid,
    task_id: Option<String>,
}

impl Scope {
    /// A fresh scope for a new top-level call chain, tagged with the
    /// current Tokio task's id when one is available (outside of a runtime,
    /// e.g. in synchronous tests, `task_id` is `None` and every `Scope::new`
    /// call is treated as distinct).
    pub fn new() -> Self {
        Scope {
            call_chain_id: Uuid::new_v4(),
            task_id: tokio::task::try_id().map(|id| id.to_string()),
        }
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

struct Held {
    owner: Scope,
    depth: u32,
    token: String,
    lost: Arc<AtomicBool>,
    watchdog: Option<tokio::task::JoinHandle<()>>,
}

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<String, Held>> = Mutex::new(HashMap::new());
}

/// Build the `stream:group[:message_id]:LOCK` key spec.md's Lock component
/// names.
pub fn lock_key(stream: &str, group: &str, message_id: Option<&str>) -> String {
    match message_id {
        Some(id) => format!("{stream}:{group}:{id}:LOCK"),
        None => format!("{stream}:{group}:LOCK"),
    }
}

/// A held lock. Callers must call [`LockGuard::release`] explicitly — the
/// release is a network round-trip and can fail, so it cannot happen
/// silently in `Drop`. A guard dropped without releasing logs a warning.
pub struct LockGuard {
    key: String,
    scope: Scope,
    store: Arc<dyn StreamStore>,
    lost: Arc<AtomicBool>,
    released: bool,
}

impl LockGuard {
    /// Whether the background watchdog has observed this lock evicted or
    /// overwritten since it was acquired. Checking this before relying on
    /// continued exclusivity lets a long critical section notice an
    /// eviction before `release` does.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        release_inner(&self.store, &self.key, &self.scope).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(key = %self.key, "lock guard dropped without an explicit release");
        }
    }
}

async fn release_inner(store: &dyn StreamStore, key: &str, scope: &Scope) -> Result<()> {
    let (token, watchdog, was_lost) = {
        let mut registry = REGISTRY.lock().unwrap();
        let Some(held) = registry.get_mut(key) else {
            return Ok(());
        };
        if &held.owner != scope {
            return Ok(());
        }

        held.depth -= 1;
        if held.depth > 0 {
            return Ok(());
        }

        let held = registry.remove(key).expect("just matched above");
        (held.token, held.watchdog, held.lost.load(Ordering::SeqCst))
    };

    if let Some(handle) = watchdog {
        handle.abort();
    }

    if was_lost {
        tracing::warn!(key = %key, "releasing a lock already reported lost; skipping compare-delete");
        return Err(Error::LockLost(key.to_string()));
    }

    store.compare_delete(key, &token).await?;
    Ok(())
}

/// Periodically confirms the lock key still holds this holder's token,
/// detecting a server-side TTL eviction (or an overwrite) while the lock is
/// held across a long critical section. Runs at a third of `ttl_ms` so an
/// eviction is caught well before a caller could mistakenly assume
/// continued exclusivity.
fn spawn_watchdog(
    store: Arc<dyn StreamStore>,
    key: String,
    token: String,
    ttl_ms: u64,
    lost: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_millis((ttl_ms / 3).max(50));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            match store.get(&key).await {
                Ok(Some(value)) if value == token => continue,
                Ok(_) => {
                    tracing::error!(key = %key, "lock key missing or held by another token, marking lock lost");
                    lost.store(true, Ordering::SeqCst);
                    return;
                }
                Err(err) => {
                    tracing::warn!(key = %key, error = %err, "lock watchdog check failed, will retry");
                }
            }
        }
    })
}

/// Acquire the named lock, blocking (via a jittered polling loop) until
/// acquired or `timeout_ms` elapses. Re-entrant: if `scope` already holds
/// this lock, the acquisition succeeds immediately and increments a depth
/// counter instead of taking the store-level lock again.
pub async fn acquire(
    store: Arc<dyn StreamStore>,
    key: &str,
    scope: &Scope,
    ttl_ms: u64,
    timeout_ms: u64,
) -> Result<LockGuard> {
    {
        let mut registry = REGISTRY.lock().unwrap();
        if let Some(held) = registry.get_mut(key) {
            if &held.owner == scope {
                held.depth += 1;
                return Ok(LockGuard {
                    key: key.to_string(),
                    scope: scope.clone(),
                    store,
                    lost: held.lost.clone(),
                    released: false,
                });
            }
        }
    }

    let deadline = tokio::time::Instant::now() + tokio::time::Duration::from_millis(timeout_ms);
    let token = Uuid::new_v4().to_string();

    loop {
        if store.set_nx_px(key, &token, ttl_ms).await? {
            let lost = Arc::new(AtomicBool::new(false));
            let watchdog = spawn_watchdog(store.clone(), key.to_string(), token.clone(), ttl_ms, lost.clone());
            let mut registry = REGISTRY.lock().unwrap();
            registry.insert(
                key.to_string(),
                Held {
                    owner: scope.clone(),
                    depth: 1,
                    token: token.clone(),
                    lost: lost.clone(),
                    watchdog: Some(watchdog),
                },
            );
            drop(registry);
            return Ok(LockGuard {
                key: key.to_string(),
                scope: scope.clone(),
                store,
                lost,
                released: false,
            });
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(Error::Timeout(key.to_string()));
        }

        let jitter_ms = rand::thread_rng().gen_range(10..50);
        tokio::time::sleep(tokio::time::Duration::from_millis(jitter_ms)).await;
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
    async fn reentrant_acquire_within_same_scope_succeeds() {
        let store = store();
        let scope = Scope::new();
        let key = lock_key("stream", "group", Some("1-0"));

        let outer = acquire(store.clone(), &key, &scope, 5_000, 1_000).await.unwrap();
        let inner = acquire(store.clone(), &key, &scope, 5_000, 1_000).await.unwrap();

        inner.release().await.unwrap();
        outer.release().await.unwrap();
    }

    #[tokio::test]
    async fn distinct_scopes_block_each_other() {
        let store = store();
        let key = lock_key("stream", "group", Some("2-0"));

        let scope_a = Scope::new();
        let held = acquire(store.clone(), &key, &scope_a, 5_000, 1_000).await.unwrap();

        let scope_b = Scope::new();
        let result = acquire(store.clone(), &key, &scope_b, 5_000, 50).await;
        assert!(matches!(result, Err(Error::Timeout(_))));

        held.release().await.unwrap();
    }

    #[tokio::test]
    async fn watchdog_marks_lock_lost_when_key_is_evicted() {
        let store = store();
        let key = lock_key("stream", "group", Some("3-0"));
        let scope = Scope::new();

        let held = acquire(store.clone(), &key, &scope, 100, 1_000).await.unwrap();
        assert!(!held.is_lost());

        store.delete(&key).await.unwrap();
        // Watchdog interval is ttl_ms/3 = ~33ms; give it a few cycles.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(held.is_lost());

        let result = held.release().await;
        assert!(matches!(result, Err(Error::LockLost(_))));
    }

    #[test]
    fn lock_key_includes_message_id_when_present() {
        assert_eq!(lock_key("s", "g", Some("1-0")), "s:g:1-0:LOCK");
        assert_eq!(lock_key("s", "g", None), "s:g:LOCK");
    }
}
