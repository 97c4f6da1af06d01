//! # swim-gossip
//!
//! A cluster-membership core implementing the SWIM protocol (Scalable
//! Weakly-consistent Infection-style Process Group Membership) with a
//! companion eventually-consistent key-value metadata store gossiped
//! alongside membership.
//!
//! ## What this crate is
//!
//! - The failure-detector state machine (ping / ping-req / ack) with direct
//!   and indirect probing.
//! - The membership directory, per-member incarnation numbers, and the
//!   alive / suspect / dead lifecycle.
//! - The join handshake and seed bootstrapping.
//! - The gossip-style metadata/state store with version-vector
//!   reconciliation and periodic full-snapshot anti-entropy.
//! - The message codec and datagram transport contract.
//!
//! ## What it is not
//!
//! HTTP status/introspection endpoints, interactive consoles, CLI
//! launchers, consistent-hash routing, and request-forwarding RPC are
//! external collaborators that consume this crate's `Node` API — they are
//! not part of it.
//!
//! ## Quick start
//!
//! ```no_run
//! use swim_gossip::node::create_node;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let node = create_node("127.0.0.1", 7946, vec![], Default::default()).await?;
//!     node.start().await;
//!     println!("alive peers: {:?}", node.alive_members());
//!     Ok(())
//! }
//! ```
//!
//! ## Research background
//!
//! - **SWIM**: Das, Gupta & Motivala (2002) — Scalable Weakly-consistent
//!   Infection-style Process Group Membership.
//! - **Version vectors**: Parker et al. (1983) — causal ordering for
//!   replicated data, applied here per-key rather than per-replica.

#![warn(rust_2018_idioms)]
#![allow(clippy::type_complexity)]

pub mod codec;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod member;
pub mod node;
pub mod state;
pub mod transport;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use member::{Member, MemberStatus};
pub use node::{create_node, Node};
pub use state::Value;
