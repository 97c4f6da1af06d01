//! Per-peer member state: address, incarnation, status, timing fields.
//!
//! Grounded on the teacher's `SwimNodeState` (`membership/swim.rs`), which
//! paired a `ClusterMember` with an `incarnation` and a `last_update`
//! instant; this type folds the full spec.md §3/§4.3 state machine into one
//! place instead of splitting it across a `ClusterMember` + wrapper.

use crate::types::{now_secs, Address};
use serde::{Deserialize, Serialize};

/// Severity order: alive < suspect < dead (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MemberStatus {
    Alive,
    Suspect,
    Dead,
}

impl MemberStatus {
    fn severity(self) -> u8 {
        match self {
            MemberStatus::Alive => 0,
            MemberStatus::Suspect => 1,
            MemberStatus::Dead => 2,
        }
    }
}

/// A single peer's state in the directory (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub address: Address,
    pub incarnation: u64,
    pub status: MemberStatus,
    pub last_state_change_at: f64,
    pub last_response_at: f64,
    pub pending_ping_at: Option<f64>,
}

impl Member {
    /// A freshly discovered peer, alive at incarnation 0 unless told
    /// otherwise (join/ping/members handlers all construct this way).
    pub fn new(address: Address, incarnation: u64) -> Self {
        let now = now_secs();
        Member {
            address,
            incarnation,
            status: MemberStatus::Alive,
            last_state_change_at: now,
            last_response_at: now,
            pending_ping_at: None,
        }
    }

    /// Applies spec.md §3 Invariant 1: the member's status monotonically
    /// tracks the highest {incarnation, severity} it has observed. Returns
    /// `true` if the update caused a status change (new incarnation alone,
    /// with unchanged status, does not count as a status transition).
    pub fn update(&mut self, new_status: MemberStatus, new_incarnation: u64) -> bool {
        let accepts = new_incarnation > self.incarnation
            || (new_incarnation == self.incarnation && new_status.severity() > self.status.severity());

        if !accepts {
            return false;
        }

        let status_changed = new_status != self.status;
        self.incarnation = new_incarnation;
        self.status = new_status;
        if status_changed {
            self.last_state_change_at = now_secs();
            // Invariant 3: pending_ping_at is cleared on transition away from alive.
            if new_status != MemberStatus::Alive {
                self.pending_ping_at = None;
            }
        }
        status_changed
    }

    /// Marks a probe as outstanding.
    pub fn mark_pending_ping(&mut self) {
        self.pending_ping_at = Some(now_secs());
    }

    /// Clears an outstanding probe and records a fresh response (invariant 3:
    /// cleared on any ack, direct or indirect).
    pub fn record_response(&mut self) {
        self.pending_ping_at = None;
        self.last_response_at = now_secs();
    }

    /// spec.md §4.3 `check_timeouts`: returns whether a status transition
    /// occurred as a result of elapsed time alone.
    pub fn check_timeouts(
        &mut self,
        now: f64,
        t_ping: f64,
        t_suspect: f64,
    ) -> bool {
        if self.status == MemberStatus::Alive {
            if let Some(pending_since) = self.pending_ping_at {
                if now - pending_since > t_ping {
                    return self.update(MemberStatus::Suspect, self.incarnation);
                }
            }
            return false;
        }

        if self.status == MemberStatus::Suspect && now - self.last_state_change_at > t_suspect {
            return self.update(MemberStatus::Dead, self.incarnation);
        }

        false
    }

    /// spec.md §4.3: dead members become eligible for removal after
    /// `T_dead` seconds in the dead state.
    pub fn eligible_for_removal(&self, now: f64, t_dead: f64) -> bool {
        self.status == MemberStatus::Dead && now - self.last_state_change_at > t_dead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member() -> Member {
        Member::new(Address::from("127.0.0.1:7000"), 0)
    }

    #[test]
    fn higher_incarnation_always_wins() {
        let mut m = member();
        assert!(m.update(MemberStatus::Suspect, 1));
        assert_eq!(m.status, MemberStatus::Suspect);
        assert_eq!(m.incarnation, 1);
    }

    #[test]
    fn equal_incarnation_requires_higher_severity() {
        let mut m = member();
        assert!(!m.update(MemberStatus::Alive, 0));
        assert!(m.update(MemberStatus::Suspect, 0));
        assert!(!m.update(MemberStatus::Alive, 0)); // downgrade at equal incarnation rejected
        assert_eq!(m.status, MemberStatus::Suspect);
    }

    #[test]
    fn lower_incarnation_is_rejected() {
        let mut m = member();
        m.update(MemberStatus::Suspect, 5);
        assert!(!m.update(MemberStatus::Dead, 3));
        assert_eq!(m.status, MemberStatus::Suspect);
        assert_eq!(m.incarnation, 5);
    }

    #[test]
    fn pending_ping_cleared_on_transition_away_from_alive() {
        let mut m = member();
        m.mark_pending_ping();
        assert!(m.pending_ping_at.is_some());
        m.update(MemberStatus::Suspect, 1);
        assert!(m.pending_ping_at.is_none());
    }

    #[test]
    fn ping_timeout_transitions_alive_to_suspect() {
        let mut m = member();
        m.pending_ping_at = Some(0.0);
        assert!(m.check_timeouts(1.0, 0.5, 5.0));
        assert_eq!(m.status, MemberStatus::Suspect);
    }

    #[test]
    fn suspect_timeout_transitions_to_dead() {
        let mut m = member();
        m.update(MemberStatus::Suspect, 0);
        m.last_state_change_at = 0.0;
        assert!(m.check_timeouts(10.0, 0.5, 5.0));
        assert_eq!(m.status, MemberStatus::Dead);
    }
}
