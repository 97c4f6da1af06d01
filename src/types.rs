//! Common types shared across the membership/gossip core.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A peer identifier: `"host:port"`, compared as bytes (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Address(format!("{}:{}", host.into(), port))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

/// Current wall-clock time in fractional seconds, matching spec.md's
/// "wall-clock seconds, float" fields (`last_state_change_at`, message
/// timestamps, etc).
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Opaque per-process identifier used to own a slot in a version vector
/// (spec.md §3: "a per-process `node_id` ... not equal to any address").
pub fn generate_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
