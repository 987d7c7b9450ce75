use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::StoreError;
use crate::services::store::KeyValueStore;

pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(300);

const SCOPE_PREFIX: &str = "juri:scores";

/// Identifies one persisted score sheet by (judge, form, event).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(judge_id: &str, form_id: &str, event_id: &str) -> Self {
        Self(format!(
            "{SCOPE_PREFIX}:{}:{}:{}",
            escape_component(judge_id),
            escape_component(form_id),
            escape_component(event_id)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Escapes the separator so that ("a:b", "c") and ("a", "b:c") never share a key.
fn escape_component(raw: &str) -> String {
    raw.replace('%', "%25").replace(':', "%3A")
}

/// Persisted shape of a score sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSnapshot {
    #[serde(default)]
    pub scores: BTreeMap<String, u32>,
    #[serde(default)]
    pub team_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default)]
    pub last_updated: i64,
}

struct PendingWrite {
    generation: u64,
    snapshot: SheetSnapshot,
    handle: JoinHandle<()>,
}

type PendingMap = Arc<Mutex<HashMap<ScopeKey, PendingWrite>>>;

/// Debounced save/load/clear of score sheets against a [`KeyValueStore`].
///
/// Each scope has at most one pending write. A new save replaces the pending one and restarts
/// the window; the write that eventually lands carries the latest snapshot.
pub struct PersistenceGateway {
    store: Arc<dyn KeyValueStore>,
    window: Duration,
    pending: PendingMap,
    next_generation: AtomicU64,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_window(store, DEFAULT_SAVE_DEBOUNCE)
    }

    pub fn with_window(store: Arc<dyn KeyValueStore>, window: Duration) -> Self {
        Self {
            store,
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Schedules a write of `snapshot` once the coalescing window elapses.
    ///
    /// Outside a tokio runtime there is no timer to coalesce on, so the write happens inline.
    pub fn save(&self, key: &ScopeKey, snapshot: SheetSnapshot) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            write_snapshot(self.store.as_ref(), key, &snapshot);
            return;
        };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = pending.remove(key) {
            previous.handle.abort();
        }

        let handle = runtime.spawn(delayed_write(
            Arc::clone(&self.pending),
            Arc::clone(&self.store),
            key.clone(),
            generation,
            self.window,
        ));
        pending.insert(
            key.clone(),
            PendingWrite {
                generation,
                snapshot,
                handle,
            },
        );
    }

    /// Most recent snapshot for the scope, including one still waiting in the window.
    /// Absent or malformed entries read as `None`.
    pub fn load(&self, key: &ScopeKey) -> Option<SheetSnapshot> {
        {
            let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(write) = pending.get(key) {
                return Some(write.snapshot.clone());
            }
        }

        let raw = match self.store.get(key.as_str()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!("Failed to read saved sheet {}: {}", key, err);
                return None;
            }
        };

        match serde_json::from_str::<SheetSnapshot>(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!("Ignoring malformed saved sheet {}: {}", key, err);
                None
            }
        }
    }

    /// Drops any pending write for the scope and removes its persisted snapshot.
    pub fn clear(&self, key: &ScopeKey) -> Result<(), StoreError> {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = pending.remove(key) {
                previous.handle.abort();
            }
        }
        debug!("Clearing saved sheet {}", key);
        self.store.remove(key.as_str())
    }

    /// Writes the pending snapshot for one scope right away.
    pub fn flush_scope(&self, key: &ScopeKey) {
        let write = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.remove(key)
        };
        if let Some(write) = write {
            write.handle.abort();
            write_snapshot(self.store.as_ref(), key, &write.snapshot);
        }
    }

    /// Writes every pending snapshot right away.
    pub fn flush(&self) {
        let drained: Vec<(ScopeKey, PendingWrite)> = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.drain().collect()
        };
        for (key, write) in drained {
            write.handle.abort();
            write_snapshot(self.store.as_ref(), &key, &write.snapshot);
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for PersistenceGateway {
    fn drop(&mut self) {
        self.flush();
    }
}

async fn delayed_write(
    pending: PendingMap,
    store: Arc<dyn KeyValueStore>,
    key: ScopeKey,
    generation: u64,
    window: Duration,
) {
    tokio::time::sleep(window).await;

    let mut pending = pending.lock().unwrap_or_else(PoisonError::into_inner);
    let is_current = pending
        .get(&key)
        .is_some_and(|write| write.generation == generation);
    if !is_current {
        return;
    }
    if let Some(write) = pending.remove(&key) {
        // Written under the lock so a concurrent save cannot interleave with this write.
        write_snapshot(store.as_ref(), &key, &write.snapshot);
    }
}

fn write_snapshot(store: &dyn KeyValueStore, key: &ScopeKey, snapshot: &SheetSnapshot) {
    let raw = match serde_json::to_string(snapshot) {
        Ok(raw) => raw,
        Err(err) => {
            error!("Failed to encode sheet {}: {}", key, err);
            return;
        }
    };
    match store.set(key.as_str(), &raw) {
        Ok(()) => debug!("Saved sheet {} ({} scores)", key, snapshot.scores.len()),
        Err(err) => error!("Failed to save sheet {}: {}", key, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;

    fn snapshot(scores: &[(&str, u32)]) -> SheetSnapshot {
        SheetSnapshot {
            scores: scores
                .iter()
                .map(|(id, value)| (id.to_string(), *value))
                .collect(),
            team_id: Some("t1".to_string()),
            last_updated: 1,
        }
    }

    #[test]
    fn scope_keys_separate_every_dimension() {
        let base = ScopeKey::new("j1", "f1", "e1");
        assert_ne!(base, ScopeKey::new("j2", "f1", "e1"));
        assert_ne!(base, ScopeKey::new("j1", "f2", "e1"));
        assert_ne!(base, ScopeKey::new("j1", "f1", "e2"));
        assert_eq!(base, ScopeKey::new("j1", "f1", "e1"));
        assert_ne!(
            ScopeKey::new("a:b", "c", "d"),
            ScopeKey::new("a", "b:c", "d")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_saves_coalesce_into_one_write() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PersistenceGateway::new(store.clone());
        let key = ScopeKey::new("j", "f", "e");

        for value in 1..=5 {
            gateway.save(&key, snapshot(&[("a1", value)]));
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(store.write_count(), 0);
        assert_eq!(gateway.pending_count(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.write_count(), 1);
        assert_eq!(gateway.pending_count(), 0);
        assert_eq!(gateway.load(&key), Some(snapshot(&[("a1", 5)])));
    }

    #[tokio::test(start_paused = true)]
    async fn scopes_debounce_independently() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PersistenceGateway::new(store.clone());
        let first = ScopeKey::new("j", "f", "e1");
        let second = ScopeKey::new("j", "f", "e2");

        gateway.save(&first, snapshot(&[("a1", 1)]));
        gateway.save(&second, snapshot(&[("a1", 2)]));
        tokio::time::sleep(Duration::from_millis(350)).await;

        assert_eq!(store.write_count(), 2);
        assert_eq!(gateway.load(&first), Some(snapshot(&[("a1", 1)])));
        assert_eq!(gateway.load(&second), Some(snapshot(&[("a1", 2)])));
    }

    #[tokio::test(start_paused = true)]
    async fn load_sees_a_pending_snapshot() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PersistenceGateway::new(store.clone());
        let key = ScopeKey::new("j", "f", "e");

        gateway.save(&key, snapshot(&[("a1", 7)]));
        assert_eq!(store.write_count(), 0);
        assert_eq!(gateway.load(&key), Some(snapshot(&[("a1", 7)])));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_the_pending_write() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PersistenceGateway::new(store.clone());
        let key = ScopeKey::new("j", "f", "e");

        gateway.save(&key, snapshot(&[("a1", 3)]));
        gateway.clear(&key).unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(store.write_count(), 0);
        assert_eq!(gateway.load(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_writes_without_waiting() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PersistenceGateway::new(store.clone());
        let key = ScopeKey::new("j", "f", "e");

        gateway.save(&key, snapshot(&[("a1", 9)]));
        gateway.flush();
        assert_eq!(store.write_count(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn malformed_entries_read_as_absent() {
        let store = Arc::new(MemoryStore::new());
        let key = ScopeKey::new("j", "f", "e");
        store.set(key.as_str(), "{\"scores\": \"oops\"}").unwrap();

        let gateway = PersistenceGateway::new(store);
        assert_eq!(gateway.load(&key), None);
    }

    #[test]
    fn saves_outside_a_runtime_write_inline() {
        let store = Arc::new(MemoryStore::new());
        let gateway = PersistenceGateway::new(store.clone());
        let key = ScopeKey::new("j", "f", "e");

        gateway.save(&key, snapshot(&[("a1", 4)]));
        assert_eq!(store.write_count(), 1);
        let raw = store.get(key.as_str()).unwrap().unwrap();
        assert!(raw.contains("\"teamId\":\"t1\""));
        assert!(raw.contains("\"lastUpdated\":1"));
    }
}
