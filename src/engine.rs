//! Protocol Engine: periodic probing, failure inference, dissemination,
//! join and anti-entropy (spec.md §4.6).
//!
//! Grounded on the teacher's `swim.rs` `start_protocol_loop`/
//! `start_failure_detector` task-spawning idiom (`tokio::spawn` loops
//! selecting between a `tokio::time::sleep` and a shared `Notify` for
//! shutdown), generalized from the teacher's placeholder message-queue
//! `send_message` into real datagram sends through `Transport`, and from the
//! teacher's scalar "membership update wins on newer timestamp" rule
//! (`handle_membership_update`) to spec.md §3 Invariant 1's
//! incarnation/severity rule, which `Member::update`/`Directory::update_status`
//! already enforce.

use crate::codec::Message;
use crate::config::Timings;
use crate::directory::SharedDirectory;
use crate::member::{Member, MemberStatus};
use crate::state::{SharedStateManager, StateUpdate};
use crate::transport::{Transport, TransportEvent};
use crate::types::{now_secs, Address};
use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

fn resolve(addr: &Address) -> Option<SocketAddr> {
    use std::net::ToSocketAddrs;
    addr.as_str().to_socket_addrs().ok()?.next()
}

/// Drives the SWIM state machine and the gossiped state store for one node.
pub struct ProtocolEngine {
    self_address: Address,
    node_id: String,
    directory: SharedDirectory,
    state: SharedStateManager,
    transport: Arc<Transport>,
    timings: Timings,
    seeds: Vec<Address>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    /// target -> requesters awaiting a relayed `ping_ack` (indirect-probe
    /// correlation table; see `handle_ping_req`/`handle_ack`).
    forwarded_pings: Arc<DashMap<Address, Vec<Address>>>,
}

impl ProtocolEngine {
    pub fn new(
        self_address: Address,
        node_id: String,
        directory: SharedDirectory,
        state: SharedStateManager,
        transport: Arc<Transport>,
        timings: Timings,
        seeds: Vec<Address>,
    ) -> Self {
        ProtocolEngine {
            self_address,
            node_id,
            directory,
            state,
            transport,
            timings,
            seeds,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            forwarded_pings: Arc::new(DashMap::new()),
        }
    }

    /// spec.md §4.6 "broadcast_targets": every non-dead peer, excluding
    /// self. Dead members are removed from the directory immediately on
    /// transition (spec.md §9), so every remaining peer already qualifies.
    fn broadcast_targets(&self) -> Vec<Address> {
        self.directory.all_peers()
    }

    async fn send_to(&self, message: &Message, addr: &Address) -> bool {
        match resolve(addr) {
            Some(socket_addr) => self.transport.send_message(message, socket_addr).await,
            None => {
                warn!(%addr, "could not resolve address, treating as send failure");
                false
            }
        }
    }

    async fn broadcast(&self, message: &Message, targets: &[Address]) -> usize {
        let mut sent = 0;
        for addr in targets {
            if self.send_to(message, addr).await {
                sent += 1;
            }
        }
        sent
    }

    /// spec.md §4.6 "Join procedure": send `join(self)` to each configured
    /// seed (unless self is itself a seed).
    async fn send_joins_to_seeds(&self) {
        if self.seeds.iter().any(|s| *s == self.self_address) {
            return;
        }
        let join = Message::Join { sender: self.self_address.clone(), timestamp: now_secs() };
        for seed in &self.seeds {
            debug!(%seed, "sending join");
            self.send_to(&join, seed).await;
        }
    }

    pub async fn start(self: &Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        self.send_joins_to_seeds().await;
        self.spawn_probe_tick();
        self.spawn_timeout_sweep();
        self.spawn_anti_entropy();
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
    }

    fn spawn_probe_tick(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let period = self.timings.t_probe;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => engine.probe_tick().await,
                    _ = shutdown.notified() => break,
                }
            }
        });
    }

    fn spawn_timeout_sweep(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let period = self.timings.t_probe;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => engine.timeout_sweep().await,
                    _ = shutdown.notified() => break,
                }
            }
        });
    }

    fn spawn_anti_entropy(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let shutdown = Arc::clone(&self.shutdown);
        let period = self.timings.t_sync;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => engine.anti_entropy_tick().await,
                    _ = shutdown.notified() => break,
                }
            }
        });
    }

    /// Periodic task: probe tick, every `T_probe` (spec.md §4.6).
    async fn probe_tick(&self) {
        let candidates: Vec<Address> = self
            .directory
            .alive_peers()
            .into_iter()
            .filter(|addr| {
                self.directory
                    .get(addr)
                    .map(|m| m.pending_ping_at.is_none())
                    .unwrap_or(false)
            })
            .collect();

        let Some(target) = candidates.choose(&mut rand::thread_rng()).cloned() else {
            return;
        };

        let ping = Message::Ping { sender: self.self_address.clone(), target: target.clone(), timestamp: now_secs() };
        self.directory.with_member_mut(&target, |m| m.mark_pending_ping());
        self.send_to(&ping, &target).await;
    }

    /// Periodic task: timeout sweep, every `T_probe` (spec.md §4.6).
    async fn timeout_sweep(&self) {
        let now = now_secs();
        let t_ping = self.timings.t_ping.as_secs_f64();
        let t_suspect = self.timings.t_suspect.as_secs_f64();

        for addr in self.directory.all_peers() {
            let transition = self.directory.with_member_mut(&addr, |m| {
                if m.check_timeouts(now, t_ping, t_suspect) {
                    Some((m.status, m.incarnation))
                } else {
                    None
                }
            }).flatten();

            match transition {
                Some((MemberStatus::Suspect, incarnation)) => {
                    let targets = self.broadcast_targets();
                    let msg = Message::Suspect {
                        sender: self.self_address.clone(),
                        target: addr.clone(),
                        incarnation,
                        timestamp: now_secs(),
                    };
                    self.broadcast(&msg, &targets).await;
                    self.indirect_ping(&addr).await;
                }
                Some((MemberStatus::Dead, incarnation)) => {
                    let targets = self.broadcast_targets();
                    let msg = Message::Dead {
                        sender: self.self_address.clone(),
                        target: addr.clone(),
                        incarnation,
                        timestamp: now_secs(),
                    };
                    self.broadcast(&msg, &targets).await;
                    self.directory.remove(&addr);
                }
                _ => {}
            }
        }
    }

    /// Periodic task: anti-entropy, every `T_sync` (spec.md §4.6). Also
    /// opportunistically retries seed joins while the directory remains
    /// single-node (spec.md §4.6 "Join procedure").
    async fn anti_entropy_tick(&self) {
        if self.directory.len() == 1 && !self.seeds.is_empty() {
            self.send_joins_to_seeds().await;
        }

        let alive = self.directory.alive_peers();
        let Some(target) = alive.choose(&mut rand::thread_rng()).cloned() else {
            return;
        };
        let msg = Message::StateSync {
            sender: self.self_address.clone(),
            snapshot: self.state.snapshot(),
            timestamp: now_secs(),
        };
        self.send_to(&msg, &target).await;
    }

    /// spec.md §4.6 "Indirect probe": fan out through up to `k` helpers.
    async fn indirect_ping(&self, target: &Address) {
        let mut candidates: Vec<Address> = self
            .directory
            .alive_peers()
            .into_iter()
            .filter(|a| a != target)
            .collect();
        let k = self.timings.indirect_fanout;
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(k);

        for helper in candidates {
            let msg = Message::PingReq {
                sender: self.self_address.clone(),
                target: target.clone(),
                helper: self.self_address.clone(),
                timestamp: now_secs(),
            };
            self.send_to(&msg, &helper).await;
        }
    }

    /// Drains transport events and dispatches them to message handlers.
    /// Runs until `stop()` closes the channel.
    pub async fn run_receive_loop(self: Arc<Self>, mut events: tokio::sync::mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::MessageReceived(message, _from) => {
                    self.handle_message(message).await;
                }
                TransportEvent::DecodeError(reason, from) => {
                    debug!(%from, %reason, "dropped undecodable datagram");
                }
                TransportEvent::SendError(reason, addr) => {
                    debug!(%addr, %reason, "send error, peer treated as unreachable on next sweep");
                }
                TransportEvent::ReceiveError(reason) => {
                    warn!(%reason, "receive error");
                }
                TransportEvent::MessageSent(_) => {}
            }
        }
    }

    async fn handle_message(&self, message: Message) {
        match message {
            Message::Join { sender, .. } => self.handle_join(sender).await,
            Message::Ack { sender, .. } => self.handle_ack(sender).await,
            Message::Ping { sender, target, .. } => self.handle_ping(sender, target).await,
            Message::PingReq { sender, target, .. } => self.handle_ping_req(sender, target).await,
            Message::PingAck { target, .. } => self.handle_ping_ack(target).await,
            Message::Suspect { sender, target, incarnation, .. } => {
                self.handle_suspect(sender, target, incarnation).await
            }
            Message::Alive { target, incarnation, .. } => self.handle_alive(target, incarnation).await,
            Message::Dead { sender, target, incarnation, .. } => self.handle_dead(sender, target, incarnation).await,
            Message::Members { members, .. } => self.handle_members(members).await,
            Message::StateSync { snapshot, .. } => {
                self.state.apply_snapshot(snapshot);
            }
            Message::StateUpdateMsg { updates, .. } => {
                self.state.merge_update(updates);
            }
        }
    }

    /// Discovers `sender` if unknown, idempotently marking it alive at its
    /// current (or zero) incarnation. Shared by `join` and `ping` handlers
    /// (spec.md §4.6: "ping: same side effects as join").
    fn discover(&self, sender: &Address) -> bool {
        if self.directory.contains(sender) {
            return false;
        }
        self.directory.add(Member::new(sender.clone(), 0))
    }

    async fn handle_join(&self, sender: Address) {
        if sender == self.self_address {
            return;
        }
        let newly_discovered = self.discover(&sender);

        let ack = Message::Ack { sender: self.self_address.clone(), target: sender.clone(), timestamp: now_secs() };
        self.send_to(&ack, &sender).await;

        let members_msg = Message::Members {
            sender: self.self_address.clone(),
            members: self.directory.all_members().into_iter().map(|m| m.address).collect(),
            timestamp: now_secs(),
        };
        self.send_to(&members_msg, &sender).await;

        if newly_discovered {
            let incarnation = self.directory.get(&sender).map(|m| m.incarnation).unwrap_or(0);
            let alive_msg = Message::Alive { sender: self.self_address.clone(), target: sender.clone(), incarnation, timestamp: now_secs() };
            let targets: Vec<_> = self.broadcast_targets().into_iter().filter(|a| *a != sender).collect();
            self.broadcast(&alive_msg, &targets).await;
        }
    }

    async fn handle_ping(&self, sender: Address, _target: Address) {
        self.discover(&sender);
        let ack = Message::Ack { sender: self.self_address.clone(), target: sender.clone(), timestamp: now_secs() };
        self.send_to(&ack, &sender).await;
    }

    async fn handle_ack(&self, sender: Address) {
        if !self.directory.contains(&sender) {
            self.directory.add(Member::new(sender.clone(), 0));
        } else {
            // spec.md §4.6 "Indirect probe": receipt of any ack or ping_ack
            // for a peer clears pending_ping_at and restores alive status.
            let incarnation = self.directory.get(&sender).map(|m| m.incarnation).unwrap_or(0);
            self.directory.update_status(&sender, MemberStatus::Alive, incarnation);
            self.directory.with_member_mut(&sender, |m| m.record_response());
        }

        if let Some((_, requesters)) = self.forwarded_pings.remove(&sender) {
            for requester in requesters {
                let relay = Message::PingAck {
                    sender: self.self_address.clone(),
                    target: sender.clone(),
                    helper: self.self_address.clone(),
                    timestamp: now_secs(),
                };
                self.send_to(&relay, &requester).await;
            }
        }
    }

    async fn handle_ping_req(&self, sender: Address, target: Address) {
        if target == self.self_address {
            return;
        }
        self.forwarded_pings.entry(target.clone()).or_default().push(sender);
        let ping = Message::Ping { sender: self.self_address.clone(), target: target.clone(), timestamp: now_secs() };
        self.send_to(&ping, &target).await;
    }

    async fn handle_ping_ack(&self, target: Address) {
        if !self.directory.contains(&target) {
            self.directory.add(Member::new(target, 0));
            return;
        }
        let incarnation = self.directory.get(&target).map(|m| m.incarnation).unwrap_or(0);
        self.directory.update_status(&target, MemberStatus::Alive, incarnation);
        self.directory.with_member_mut(&target, |m| m.record_response());
    }

    async fn handle_suspect(&self, _sender: Address, target: Address, incarnation: u64) {
        if target == self.self_address {
            let new_incarnation = self
                .directory
                .get(&self.self_address)
                .map(|m| m.incarnation + 1)
                .unwrap_or(incarnation + 1);
            self.directory.update_status(&self.self_address, MemberStatus::Alive, new_incarnation);

            let alive_msg = Message::Alive {
                sender: self.self_address.clone(),
                target: self.self_address.clone(),
                incarnation: new_incarnation,
                timestamp: now_secs(),
            };
            let targets = self.broadcast_targets();
            self.broadcast(&alive_msg, &targets).await;
            return;
        }

        if !self.directory.contains(&target) {
            return;
        }
        let transitioned = self.directory.update_status(&target, MemberStatus::Suspect, incarnation);
        if transitioned {
            self.indirect_ping(&target).await;
        }
    }

    async fn handle_alive(&self, target: Address, incarnation: u64) {
        if !self.directory.contains(&target) {
            self.directory.add(Member::new(target, incarnation));
            return;
        }
        self.directory.update_status(&target, MemberStatus::Alive, incarnation);
    }

    async fn handle_dead(&self, _sender: Address, target: Address, incarnation: u64) {
        if target == self.self_address {
            let new_incarnation = self
                .directory
                .get(&self.self_address)
                .map(|m| m.incarnation + 1)
                .unwrap_or(incarnation + 1);
            self.directory.update_status(&self.self_address, MemberStatus::Alive, new_incarnation);

            let alive_msg = Message::Alive {
                sender: self.self_address.clone(),
                target: self.self_address.clone(),
                incarnation: new_incarnation,
                timestamp: now_secs(),
            };
            let targets = self.broadcast_targets();
            self.broadcast(&alive_msg, &targets).await;
            return;
        }

        let transitioned = self.directory.update_status(&target, MemberStatus::Dead, incarnation);
        if transitioned {
            self.directory.remove(&target);
        }
    }

    async fn handle_members(&self, members: Vec<Address>) {
        for addr in members {
            if addr != self.self_address && !self.directory.contains(&addr) {
                self.directory.add(Member::new(addr, 0));
            }
        }
    }

    /// Builds the outbound `state_update` message for a single local
    /// mutation, for callers that want to push incremental updates
    /// immediately rather than waiting for anti-entropy (not required by
    /// spec.md, but natural given `StateManager::subscribe`).
    pub fn state_update_message(&self, namespace: &str, key: &str) -> Message {
        let value = self.state.get(namespace, key);
        let vv = self.state.version_vector(namespace, key);
        let op = if value.is_some() { crate::state::StateOp::Set } else { crate::state::StateOp::Delete };
        Message::StateUpdateMsg {
            sender: self.self_address.clone(),
            updates: vec![StateUpdate { namespace: namespace.to_string(), key: key.to_string(), value, op, vv }],
            timestamp: now_secs(),
        }
    }

    pub async fn gossip_state_change(&self, namespace: &str, key: &str) {
        let msg = self.state_update_message(namespace, key);
        let targets = self.broadcast_targets();
        self.broadcast(&msg, &targets).await;
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_targets_excludes_self() {
        let directory = Arc::new(crate::directory::Directory::new(Member::new(Address::from("a"), 0)));
        directory.add(Member::new(Address::from("b"), 0));
        assert_eq!(directory.all_peers(), vec![Address::from("b")]);
    }
}
