//! Node construction API (spec.md §6), consumed by launchers and the HTTP
//! introspection component — both of which live outside this crate's scope
//! (spec.md §1) and talk to it only through the surface defined here.

use crate::config::{Config, Timings};
use crate::directory::{Directory, DirectoryEvent, SharedDirectory};
use crate::engine::ProtocolEngine;
use crate::error::Result;
use crate::member::{Member, MemberStatus};
use crate::state::{SharedStateManager, StateChange, StateManager, Value};
use crate::transport::Transport;
use crate::types::{generate_node_id, Address};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// A read-only view of a member, returned by `Node::members` (spec.md §6
/// "Member-view"). `Directory`'s own internal `Member` is not exposed
/// directly — callers may read, not mutate (spec.md §5 "Shared-resource
/// policy").
#[derive(Debug, Clone)]
pub struct MemberView {
    pub address: Address,
    pub incarnation: u64,
    pub status: MemberStatus,
    pub last_state_change_at: f64,
    pub last_response_at: f64,
}

impl From<Member> for MemberView {
    fn from(m: Member) -> Self {
        MemberView {
            address: m.address,
            incarnation: m.incarnation,
            status: m.status,
            last_state_change_at: m.last_state_change_at,
            last_response_at: m.last_response_at,
        }
    }
}

type MemberChangeCallback = Box<dyn Fn(Address, Option<MemberStatus>, MemberStatus) + Send + Sync>;
type MetadataChangeCallback = Box<dyn Fn(String, String, Option<Value>, crate::state::StateOp) + Send + Sync>;

/// A running (or not-yet-started) SWIM node: membership directory + gossiped
/// metadata store + protocol engine, bound to one UDP address.
pub struct Node {
    self_address: Address,
    directory: SharedDirectory,
    state: SharedStateManager,
    engine: Arc<ProtocolEngine>,
    transport: Arc<Transport>,
    started: AtomicBool,
    member_callbacks: parking_lot::RwLock<Vec<MemberChangeCallback>>,
    metadata_callbacks: parking_lot::RwLock<Vec<MetadataChangeCallback>>,
}

impl Node {
    /// spec.md §6 `create_node`.
    pub async fn create(
        host: impl Into<String>,
        port: u16,
        seeds: Vec<String>,
        initial_metadata: std::collections::HashMap<String, std::collections::HashMap<String, Value>>,
    ) -> Result<Arc<Node>> {
        Self::create_with_timings(host, port, seeds, initial_metadata, Timings::default()).await
    }

    /// As `create`, but with explicit protocol timings — used by tests that
    /// need a shortened `T_probe` (spec.md §8: "T_probe=0.1s for faster
    /// tests").
    pub async fn create_with_timings(
        host: impl Into<String>,
        port: u16,
        seeds: Vec<String>,
        initial_metadata: std::collections::HashMap<String, std::collections::HashMap<String, Value>>,
        timings: Timings,
    ) -> Result<Arc<Node>> {
        let host = host.into();
        let self_address = Address::new(host.clone(), port);
        let node_id = generate_node_id();

        let bind_addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| crate::error::Error::config(format!("invalid bind address {host}:{port}")))?;
        let (transport, events) = Transport::bind(bind_addr).await?;
        let transport = Arc::new(transport);

        let directory = Arc::new(Directory::new(Member::new(self_address.clone(), 0)));
        let state = Arc::new(StateManager::new(node_id.clone()));
        for (ns, kvs) in initial_metadata {
            for (key, value) in kvs {
                state.set(&ns, &key, value);
            }
        }

        let seed_addresses: Vec<Address> = seeds.into_iter().map(Address::from).collect();
        let engine = Arc::new(ProtocolEngine::new(
            self_address.clone(),
            node_id,
            Arc::clone(&directory),
            Arc::clone(&state),
            Arc::clone(&transport),
            timings,
            seed_addresses,
        ));

        let node = Arc::new(Node {
            self_address,
            directory,
            state,
            engine,
            transport,
            started: AtomicBool::new(false),
            member_callbacks: parking_lot::RwLock::new(Vec::new()),
            metadata_callbacks: parking_lot::RwLock::new(Vec::new()),
        });

        node.wire_callbacks();
        tokio::spawn(Arc::clone(&node.engine).run_receive_loop(events));

        Ok(node)
    }

    fn wire_callbacks(self: &Arc<Self>) {
        let node = Arc::clone(self);
        self.directory.subscribe(move |event: DirectoryEvent| {
            let (address, old_status, new_status) = match event {
                DirectoryEvent::MemberJoined(a) => (a, None, MemberStatus::Alive),
                DirectoryEvent::MemberRecovered(a) => (a, Some(MemberStatus::Suspect), MemberStatus::Alive),
                DirectoryEvent::MemberSuspected(a) => (a, Some(MemberStatus::Alive), MemberStatus::Suspect),
                DirectoryEvent::MemberFailed(a) => (a, Some(MemberStatus::Suspect), MemberStatus::Dead),
                DirectoryEvent::MemberLeft(a) => (a, Some(MemberStatus::Dead), MemberStatus::Dead),
            };
            for f in node.member_callbacks.read().iter() {
                f(address.clone(), old_status, new_status);
            }
        });

        let node = Arc::clone(self);
        self.state.subscribe(move |change: StateChange| {
            for f in node.metadata_callbacks.read().iter() {
                f(change.namespace.clone(), change.key.clone(), change.value.clone(), change.op);
            }
        });
    }

    /// Idempotent (spec.md §7 lifecycle misuse).
    pub async fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(address = %self.self_address, "starting node");
        self.transport.start();
        self.engine.start().await;
    }

    /// Idempotent.
    pub fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(address = %self.self_address, "stopping node");
        self.engine.stop();
        self.transport.stop();
    }

    pub fn address(&self) -> &Address {
        &self.self_address
    }

    pub fn alive_members(&self) -> Vec<Address> {
        self.directory.alive_peers()
    }

    pub fn suspect_members(&self) -> Vec<Address> {
        self.directory.suspect_peers()
    }

    pub fn dead_members(&self) -> Vec<Address> {
        self.directory.dead_peers()
    }

    pub fn members(&self) -> Vec<MemberView> {
        self.directory.all_members().into_iter().map(MemberView::from).collect()
    }

    pub fn get_metadata(&self, key: &str, namespace: Option<&str>) -> Option<Value> {
        self.state.get(namespace.unwrap_or("default"), key)
    }

    /// Returns `false` only when the call is refused at the API boundary;
    /// per spec.md §7 this never raises for an ordinary write.
    pub fn set_metadata(&self, key: &str, value: Value, namespace: Option<&str>) -> bool {
        if key.is_empty() {
            return false;
        }
        self.state.set(namespace.unwrap_or("default"), key, value);
        let engine = Arc::clone(&self.engine);
        let ns = namespace.unwrap_or("default").to_string();
        let key = key.to_string();
        tokio::spawn(async move { engine.gossip_state_change(&ns, &key).await });
        true
    }

    pub fn delete_metadata(&self, key: &str, namespace: Option<&str>) -> bool {
        let ns = namespace.unwrap_or("default");
        let removed = self.state.delete(ns, key);
        if removed {
            let engine = Arc::clone(&self.engine);
            let ns = ns.to_string();
            let key = key.to_string();
            tokio::spawn(async move { engine.gossip_state_change(&ns, &key).await });
        }
        removed
    }

    /// spec.md §6 `on_member_change(fn)`: `fn(address, old_status, new_status)`.
    pub fn on_member_change(&self, f: impl Fn(Address, Option<MemberStatus>, MemberStatus) + Send + Sync + 'static) {
        self.member_callbacks.write().push(Box::new(f));
    }

    /// spec.md §6 `on_metadata_change(fn)`: `fn(ns, key, value, op)`.
    pub fn on_metadata_change(&self, f: impl Fn(String, String, Option<Value>, crate::state::StateOp) + Send + Sync + 'static) {
        self.metadata_callbacks.write().push(Box::new(f));
    }
}

/// spec.md §6 free-function constructor mirroring `create_node(host, port,
/// seeds, initial_metadata) -> node`.
pub async fn create_node(
    host: impl Into<String>,
    port: u16,
    seeds: Vec<String>,
    initial_metadata: std::collections::HashMap<String, std::collections::HashMap<String, Value>>,
) -> Result<Arc<Node>> {
    Node::create(host, port, seeds, initial_metadata).await
}

/// Builds a `Node` from a `Config`, wiring its `Timings` through.
pub async fn node_from_config(config: &Config) -> Result<Arc<Node>> {
    Node::create_with_timings(
        config.host.clone(),
        config.port,
        config.seeds.clone(),
        config.initial_metadata.clone(),
        config.timings.clone(),
    )
    .await
}
