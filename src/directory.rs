//! Thread-safe membership table (spec.md §4.4).
//!
//! Grounded on the teacher's `membership_manager.rs`, which kept
//! `members: Arc<RwLock<HashMap<NodeId, ClusterMember>>>` plus a
//! `Vec<Box<dyn NodeEventCallback>>` notified by iterating while holding the
//! read lock. Per SPEC_FULL.md's design-notes carryover, subscribers here
//! are dispatched *after* releasing the directory lock: the event payload is
//! cloned out, the lock dropped, then callbacks run, avoiding the re-entrant
//! deadlock risk the teacher's under-lock dispatch invited.

use crate::member::{Member, MemberStatus};
use crate::types::Address;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// Events emitted by the directory on membership transitions.
#[derive(Debug, Clone)]
pub enum DirectoryEvent {
    MemberJoined(Address),
    MemberLeft(Address),
    MemberSuspected(Address),
    MemberFailed(Address),
    MemberRecovered(Address),
}

type Subscriber = Box<dyn Fn(DirectoryEvent) + Send + Sync>;

/// The membership table: `address -> Member`, plus a designated `self`
/// member that is always present but excluded from peer-view queries and
/// broadcast fan-out (spec.md §9 "Self as a member").
pub struct Directory {
    self_address: Address,
    members: DashMap<Address, Member>,
    subscribers: RwLock<Vec<Subscriber>>,
}

impl Directory {
    pub fn new(self_member: Member) -> Self {
        let self_address = self_member.address.clone();
        let members = DashMap::new();
        members.insert(self_address.clone(), self_member);
        Directory { self_address, members, subscribers: RwLock::new(Vec::new()) }
    }

    pub fn self_address(&self) -> &Address {
        &self.self_address
    }

    /// Register a subscriber invoked on every directory transition.
    pub fn subscribe(&self, f: impl Fn(DirectoryEvent) + Send + Sync + 'static) {
        self.subscribers.write().push(Box::new(f));
    }

    fn notify(&self, event: DirectoryEvent) {
        for f in self.subscribers.read().iter() {
            // Subscriber callbacks are not permitted to block on the network
            // (spec.md §4.4); a panicking callback is caught so one bad
            // subscriber can't take down the directory's callers.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(event.clone())));
            if result.is_err() {
                warn!("directory subscriber panicked");
            }
        }
    }

    /// Idempotent by address. Returns `true` if a new member was inserted.
    pub fn add(&self, member: Member) -> bool {
        if self.members.contains_key(&member.address) {
            return false;
        }
        let address = member.address.clone();
        self.members.insert(address.clone(), member);
        self.notify(DirectoryEvent::MemberJoined(address));
        true
    }

    /// Idempotent. Returns the removed member, if any.
    pub fn remove(&self, address: &Address) -> Option<Member> {
        let removed = self.members.remove(address).map(|(_, m)| m);
        if removed.is_some() {
            self.notify(DirectoryEvent::MemberLeft(address.clone()));
        }
        removed
    }

    pub fn get(&self, address: &Address) -> Option<Member> {
        self.members.get(address).map(|m| m.clone())
    }

    /// Applies a status/incarnation update via `Member::update`, dispatching
    /// the appropriate event on transition. Never downgrades severity at
    /// equal incarnation (enforced by `Member::update`).
    pub fn update_status(&self, address: &Address, new_status: MemberStatus, new_incarnation: u64) -> bool {
        let transitioned = match self.members.get_mut(address) {
            Some(mut entry) => entry.update(new_status, new_incarnation),
            None => return false,
        };

        if transitioned {
            let event = match new_status {
                MemberStatus::Suspect => DirectoryEvent::MemberSuspected(address.clone()),
                MemberStatus::Dead => DirectoryEvent::MemberFailed(address.clone()),
                MemberStatus::Alive => DirectoryEvent::MemberRecovered(address.clone()),
            };
            self.notify(event);
        }
        transitioned
    }

    /// Mutates a member in place via `f`, returning `f`'s result. Used by the
    /// engine for timestamp bookkeeping (`mark_pending_ping`,
    /// `record_response`) that doesn't go through `update_status`.
    pub fn with_member_mut<R>(&self, address: &Address, f: impl FnOnce(&mut Member) -> R) -> Option<R> {
        self.members.get_mut(address).map(|mut entry| f(&mut entry))
    }

    fn peers_with_status(&self, status: MemberStatus) -> Vec<Address> {
        self.members
            .iter()
            .filter(|e| *e.key() != self.self_address && e.value().status == status)
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn alive_peers(&self) -> Vec<Address> {
        self.peers_with_status(MemberStatus::Alive)
    }

    pub fn suspect_peers(&self) -> Vec<Address> {
        self.peers_with_status(MemberStatus::Suspect)
    }

    pub fn dead_peers(&self) -> Vec<Address> {
        self.peers_with_status(MemberStatus::Dead)
    }

    /// All peers regardless of status, excluding self — the default
    /// broadcast fan-out target set before filtering out dead peers
    /// (spec.md §4.6 `broadcast_targets`).
    pub fn all_peers(&self) -> Vec<Address> {
        self.members
            .iter()
            .filter(|e| *e.key() != self.self_address)
            .map(|e| e.key().clone())
            .collect()
    }

    /// A snapshot of every member, including self, at the call instant.
    pub fn all_members(&self) -> Vec<Member> {
        self.members.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.members.contains_key(address)
    }
}

pub type SharedDirectory = Arc<Directory>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn dir() -> Directory {
        Directory::new(Member::new(Address::from("127.0.0.1:7000"), 0))
    }

    #[test]
    fn add_is_idempotent_and_emits_one_event() {
        let d = dir();
        let joins = Arc::new(AtomicUsize::new(0));
        let joins2 = Arc::clone(&joins);
        d.subscribe(move |e| {
            if let DirectoryEvent::MemberJoined(_) = e {
                joins2.fetch_add(1, Ordering::SeqCst);
            }
        });

        let m = Member::new(Address::from("127.0.0.1:7001"), 0);
        assert!(d.add(m.clone()));
        assert!(!d.add(m));
        assert_eq!(d.len(), 2); // self + the one peer
        assert_eq!(joins.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn self_excluded_from_peer_views() {
        let d = dir();
        d.add(Member::new(Address::from("127.0.0.1:7001"), 0));
        assert_eq!(d.alive_peers(), vec![Address::from("127.0.0.1:7001")]);
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let d = dir();
        let addr = Address::from("127.0.0.1:7001");
        d.add(Member::new(addr.clone(), 0));
        assert!(d.remove(&addr).is_some());
        assert!(d.remove(&addr).is_none());
    }
}
