//! Gossiped metadata/state store: namespaced K/V with per-key version
//! vectors, snapshot and merge (spec.md §4.5).
//!
//! The `VersionVector` shape is grounded on the pack's
//! `harborgrid-justin-rusty-db/src/networking/autodiscovery/membership.rs`
//! (`increment`/`merge`/`dominates`), reworked here to key on this crate's
//! opaque per-process `node_id` string instead of a `NodeId`, and to back
//! spec.md §4.5's componentwise `merge_update`/`apply_snapshot` contract
//! rather than rusty-db's membership delta log.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// `node_id -> counter`, attached to every state-store entry (spec.md §3).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector(HashMap<String, u64>);

impl VersionVector {
    pub fn new() -> Self {
        VersionVector(HashMap::new())
    }

    pub fn get(&self, node_id: &str) -> u64 {
        self.0.get(node_id).copied().unwrap_or(0)
    }

    /// Bumps the owning node's own counter (only the owner ever increments
    /// its own slot; remote slots are only absorbed via `merge_max`).
    pub fn increment(&mut self, node_id: &str) {
        let counter = self.0.entry(node_id.to_string()).or_insert(0);
        *counter += 1;
    }

    /// Componentwise max of `self` and `other`, in place.
    pub fn merge_max(&mut self, other: &VersionVector) {
        for (node_id, counter) in &other.0 {
            let entry = self.0.entry(node_id.clone()).or_insert(0);
            *entry = (*entry).max(*counter);
        }
    }

    /// `true` iff every component of `self` is `<=` the matching component
    /// of `other` (used by `merge_update`'s "already observed" skip check).
    pub fn le(&self, other: &VersionVector) -> bool {
        self.0.iter().all(|(node_id, counter)| *counter <= other.get(node_id))
    }
}

/// A serializable scalar/container value (spec.md §3: "arbitrary
/// codec-serializable scalars/containers").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

/// The operation a gossiped update represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateOp {
    Set,
    Delete,
}

/// One incremental update as carried by a `state_update` message
/// (spec.md §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateUpdate {
    pub namespace: String,
    pub key: String,
    pub value: Option<Value>,
    pub op: StateOp,
    pub vv: VersionVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: Value,
    vv: VersionVector,
}

/// The full reconcilable snapshot exchanged during anti-entropy
/// (spec.md §4.1 `state_sync`, §4.5 `snapshot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    state: HashMap<String, HashMap<String, Entry>>,
    version: u64,
    checksum: u64,
}

/// Event emitted on every local or merged mutation (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct StateChange {
    pub namespace: String,
    pub key: String,
    pub value: Option<Value>,
    pub op: StateOp,
}

type Subscriber = Box<dyn Fn(StateChange) + Send + Sync>;

/// Stable digest over the sorted serialization of `state`, used only to
/// validate reconstructed snapshots (spec.md §4.5: "not for Merkle sync").
fn checksum(state: &HashMap<String, HashMap<String, Entry>>) -> u64 {
    let mut namespaces: Vec<_> = state.keys().collect();
    namespaces.sort();

    let mut hasher = blake3::Hasher::new();
    for ns in namespaces {
        hasher.update(ns.as_bytes());
        let mut keys: Vec<_> = state[ns].keys().collect();
        keys.sort();
        for key in keys {
            hasher.update(key.as_bytes());
            if let Ok(bytes) = bincode::serialize(&state[ns][key]) {
                hasher.update(&bytes);
            }
        }
    }
    let hash = hasher.finalize();
    u64::from_le_bytes(hash.as_bytes()[..8].try_into().unwrap())
}

/// Namespaced K/V store with per-key version vectors (spec.md §4.5).
///
/// All mutating operations run under a single lock; reads go through a
/// concurrent map and never block a writer for longer than one key lookup
/// (spec.md §4.5 "Concurrency").
pub struct StateManager {
    node_id: String,
    state: parking_lot::RwLock<HashMap<String, HashMap<String, Entry>>>,
    version: std::sync::atomic::AtomicU64,
    subscribers: parking_lot::RwLock<Vec<Subscriber>>,
}

impl StateManager {
    pub fn new(node_id: String) -> Self {
        StateManager {
            node_id,
            state: parking_lot::RwLock::new(HashMap::new()),
            version: std::sync::atomic::AtomicU64::new(0),
            subscribers: parking_lot::RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, f: impl Fn(StateChange) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(f));
    }

    fn notify(&self, change: StateChange) {
        for f in self.subscribers.read().iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(change.clone())));
            if result.is_err() {
                warn!("state subscriber panicked");
            }
        }
    }

    fn bump_version(&self) -> u64 {
        self.version.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
    }

    /// No-op if `value` deep-equals the current value; else writes, bumps
    /// the local counter in `VV[ns:key]`, bumps the global `version`, and
    /// notifies subscribers with `op = Set`.
    pub fn set(&self, namespace: &str, key: &str, value: Value) {
        {
            let mut state = self.state.write();
            let ns_map = state.entry(namespace.to_string()).or_default();
            if let Some(existing) = ns_map.get(key) {
                if existing.value == value {
                    return;
                }
            }
            let mut vv = ns_map.get(key).map(|e| e.vv.clone()).unwrap_or_default();
            vv.increment(&self.node_id);
            ns_map.insert(key.to_string(), Entry { value: value.clone(), vv });
        }
        self.bump_version();
        self.notify(StateChange {
            namespace: namespace.to_string(),
            key: key.to_string(),
            value: Some(value),
            op: StateOp::Set,
        });
    }

    /// No-op if absent; else removes, bumps `VV`, bumps `version`, notifies
    /// with `op = Delete`.
    pub fn delete(&self, namespace: &str, key: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            match state.get_mut(namespace) {
                Some(ns_map) => ns_map.remove(key).is_some(),
                None => false,
            }
        };
        if removed {
            self.bump_version();
            self.notify(StateChange {
                namespace: namespace.to_string(),
                key: key.to_string(),
                value: None,
                op: StateOp::Delete,
            });
        }
        removed
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.state.read().get(namespace)?.get(key).map(|e| e.value.clone())
    }

    /// Current version vector for a key, or an empty one if absent — used
    /// by the engine to build outbound `state_update` messages.
    pub fn version_vector(&self, namespace: &str, key: &str) -> VersionVector {
        self.state
            .read()
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .map(|e| e.vv.clone())
            .unwrap_or_default()
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn global_version(&self) -> u64 {
        self.version.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Builds the full reconciliation snapshot (spec.md §4.5 `snapshot`).
    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read().clone();
        let checksum = checksum(&state);
        Snapshot { state, version: self.global_version(), checksum }
    }

    /// Applies each `(ns, key, value, op, remote_vv)` update:
    /// - Skip if `remote_vv <= local_vv` componentwise (already observed).
    /// - Else overwrite/delete and replace local VV with the componentwise
    ///   max. On genuinely concurrent (incomparable) VVs, the deterministic
    ///   tie-break is lexicographic max of the serialized value, so all
    ///   replicas converge on the same winner (spec.md §4.5).
    pub fn merge_update(&self, updates: Vec<StateUpdate>) {
        for update in updates {
            let applied = {
                let mut state = self.state.write();
                let ns_map = state.entry(update.namespace.clone()).or_default();
                let local_vv = ns_map.get(&update.key).map(|e| e.vv.clone()).unwrap_or_default();

                if update.vv.le(&local_vv) {
                    false
                } else {
                    let mut merged_vv = local_vv.clone();
                    merged_vv.merge_max(&update.vv);

                    let incomparable = !local_vv.le(&update.vv) && !update.vv.le(&local_vv);
                    let existing_value = ns_map.get(&update.key).map(|e| e.value.clone());

                    let winning_value = if incomparable {
                        match (existing_value, &update.value) {
                            (Some(local_val), Some(remote_val)) => {
                                let local_bytes = bincode::serialize(&local_val).unwrap_or_default();
                                let remote_bytes = bincode::serialize(remote_val).unwrap_or_default();
                                if remote_bytes > local_bytes { update.value.clone() } else { Some(local_val) }
                            }
                            (None, remote) => remote.clone(),
                            (local, None) => local,
                        }
                    } else {
                        update.value.clone()
                    };

                    match (update.op, winning_value) {
                        (StateOp::Delete, _) if !incomparable => {
                            ns_map.remove(&update.key);
                        }
                        (_, Some(value)) => {
                            ns_map.insert(update.key.clone(), Entry { value, vv: merged_vv });
                        }
                        (_, None) => {
                            ns_map.remove(&update.key);
                        }
                    }
                    true
                }
            };

            if applied {
                self.bump_version();
                self.notify(StateChange {
                    namespace: update.namespace,
                    key: update.key,
                    value: update.value,
                    op: update.op,
                });
            }
        }
    }

    /// Validates the checksum; if OK and `snap.version > local.version`,
    /// replaces the whole store and notifies subscribers for every
    /// differing key (spec.md §4.5 `apply_snapshot`). Returns `false` (a
    /// no-op) rather than erroring on mismatch/staleness, per spec.md §7's
    /// "predictable failure -> bool" policy.
    pub fn apply_snapshot(&self, snap: Snapshot) -> bool {
        if checksum(&snap.state) != snap.checksum {
            warn!("state_sync snapshot failed checksum validation, dropping");
            return false;
        }
        if snap.version <= self.global_version() {
            return false;
        }

        let changes = {
            let mut state = self.state.write();
            let mut changes = Vec::new();

            for (ns, new_keys) in &snap.state {
                let old_keys = state.get(ns);
                for (key, entry) in new_keys {
                    let differs = old_keys.and_then(|m| m.get(key)).map(|e| e.value != entry.value).unwrap_or(true);
                    if differs {
                        changes.push(StateChange {
                            namespace: ns.clone(),
                            key: key.clone(),
                            value: Some(entry.value.clone()),
                            op: StateOp::Set,
                        });
                    }
                }
            }
            for (ns, old_keys) in state.iter() {
                for key in old_keys.keys() {
                    if !snap.state.get(ns).map(|m| m.contains_key(key)).unwrap_or(false) {
                        changes.push(StateChange { namespace: ns.clone(), key: key.clone(), value: None, op: StateOp::Delete });
                    }
                }
            }

            *state = snap.state;
            self.version.store(snap.version, std::sync::atomic::Ordering::SeqCst);
            changes
        };

        for change in changes {
            self.notify(change);
        }
        true
    }
}

pub type SharedStateManager = Arc<StateManager>;
