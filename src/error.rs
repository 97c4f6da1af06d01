//! Error types for the membership/gossip core.

use thiserror::Error;

/// Result type alias for convenience.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for swim-gossip.
///
/// Per spec.md §7, predictable/boundary failures (unknown key, invalid
/// message shape, send failure to an unreachable peer) are surfaced as
/// `bool`/`Option` at the public API rather than as this type — `Error` is
/// reserved for failures that abort a fallible setup operation outright
/// (bind failure, bad configuration).
#[derive(Error, Debug)]
pub enum Error {
    /// Transport bind/socket errors. Fatal at `Node::start` (spec.md §7:
    /// "Configuration error (bind address in use) — fatal at start").
    #[error("transport error: {message}")]
    Transport {
        message: String,
        peer: Option<String>,
    },

    /// Codec construction errors (e.g. unknown codec name in config).
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Directory invariant violated by the caller.
    #[error("directory error: {message}")]
    Directory { message: String },

    /// State manager errors (checksum mismatch on snapshot apply).
    #[error("state error: {message}")]
    State { message: String },

    /// Configuration errors (bad address, bad TOML, missing field).
    #[error("configuration error: {message}")]
    Config {
        message: String,
        field: Option<String>,
    },

    /// Wrapped I/O error from the underlying socket.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn transport(message: impl Into<String>) -> Self {
        Error::Transport { message: message.into(), peer: None }
    }

    pub fn transport_to(message: impl Into<String>, peer: impl Into<String>) -> Self {
        Error::Transport { message: message.into(), peer: Some(peer.into()) }
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Error::Codec { message: message.into() }
    }

    pub fn directory(message: impl Into<String>) -> Self {
        Error::Directory { message: message.into() }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Error::State { message: message.into() }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Error::Config { message: message.into(), field: None }
    }
}
