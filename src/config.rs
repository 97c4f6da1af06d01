//! Configuration for a SWIM node: host, port, seeds, initial metadata, log
//! level, and protocol timings (spec.md §6 "Environment / configuration").
//!
//! Shaped after the teacher's `Config`/`ClusterConfig` split (a top-level
//! struct with a nested, independently-defaultable timing block), loadable
//! from TOML via `serde` the way the teacher's `config_management` module
//! intended. No membership or metadata state is ever part of this struct —
//! spec.md §9 "No persistent state": only bootstrap parameters survive a
//! restart, and only because the operator re-supplies them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Protocol timings (spec.md §6 "Default timings").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Timings {
    pub t_probe: Duration,
    pub t_ping: Duration,
    pub t_ping_req: Duration,
    pub t_suspect: Duration,
    pub t_dead: Duration,
    pub t_sync: Duration,
    pub indirect_fanout: usize,
    pub bootstrap_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        let t_probe = Duration::from_millis(1000);
        Timings {
            t_probe,
            t_ping: Duration::from_millis(500),
            t_ping_req: Duration::from_millis(500),
            t_suspect: Duration::from_millis(5000),
            t_dead: Duration::from_millis(30_000),
            t_sync: Duration::from_millis(10_000),
            indirect_fanout: 3,
            bootstrap_timeout: t_probe * 10,
        }
    }
}

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub seeds: Vec<String>,
    pub initial_metadata: HashMap<String, HashMap<String, crate::state::Value>>,
    pub log_level: String,
    pub timings: Timings,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "127.0.0.1".to_string(),
            port: 7946,
            seeds: Vec::new(),
            initial_metadata: HashMap::new(),
            log_level: "info".to_string(),
            timings: Timings::default(),
        }
    }
}

impl Config {
    /// Loads overrides from environment variables (`SWIM_HOST`, `SWIM_PORT`,
    /// `SWIM_SEEDS` comma-separated, `SWIM_LOG_LEVEL`), falling back to
    /// `Config::default()` for anything unset.
    pub fn from_env() -> crate::error::Result<Self> {
        let mut config = Config::default();

        if let Ok(host) = std::env::var("SWIM_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("SWIM_PORT") {
            config.port = port
                .parse()
                .map_err(|_| crate::error::Error::config(format!("invalid SWIM_PORT: {port}")))?;
        }
        if let Ok(seeds) = std::env::var("SWIM_SEEDS") {
            config.seeds = seeds.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
        }
        if let Ok(level) = std::env::var("SWIM_LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Loads a full `Config` from a TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::error::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| crate::error::Error::config(format!("reading {:?}: {e}", path.as_ref())))?;
        toml::from_str(&contents).map_err(|e| crate::error::Error::config(format!("parsing config TOML: {e}")))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timings_match_spec_defaults() {
        let t = Timings::default();
        assert_eq!(t.t_probe, Duration::from_secs(1));
        assert_eq!(t.t_suspect, Duration::from_secs(5));
        assert_eq!(t.t_dead, Duration::from_secs(30));
        assert_eq!(t.t_sync, Duration::from_secs(10));
        assert_eq!(t.indirect_fanout, 3);
    }
}
