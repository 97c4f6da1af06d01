//! Unreliable-datagram transport (spec.md §4.2).
//!
//! Grounded on the teacher's `swim.rs` periodic-task idiom (`tokio::spawn` +
//! `Arc<Notify>` shutdown signal) but built on `tokio::net::UdpSocket`
//! rather than the teacher's separate RDMA/DPDK `networking` module — spec.md
//! only asks for an "unreliable datagram socket", and the rest of this
//! crate's concurrency model (spec.md §5) is already `tokio`-async, so the
//! zero-copy/kernel-bypass networking stack the teacher built for AuroraDB
//! has no counterpart here (see DESIGN.md).

use crate::codec::{BincodeCodec, Codec, Message};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

/// Maximum UDP payload this transport will send/receive (spec.md §6).
pub const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Events published by the transport's receive loop and send path
/// (spec.md §4.2).
#[derive(Debug)]
pub enum TransportEvent {
    MessageReceived(Message, SocketAddr),
    MessageSent(SocketAddr),
    SendError(String, SocketAddr),
    ReceiveError(String),
    DecodeError(String, SocketAddr),
}

/// A bound UDP socket plus the background receive loop that decodes
/// inbound datagrams and publishes them on `events`.
pub struct Transport {
    socket: Arc<UdpSocket>,
    codec: Arc<dyn Codec>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    running: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl Transport {
    /// Binds the socket. `start`/`stop` are separately idempotent; binding
    /// happens once at construction since rebinding on the same address is
    /// not meaningful for a UDP socket that's still open.
    pub async fn bind(addr: SocketAddr) -> crate::error::Result<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|e| crate::error::Error::transport(format!("bind {addr} failed: {e}")))?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok((
            Transport {
                socket: Arc::new(socket),
                codec: Arc::new(BincodeCodec),
                events_tx,
                running: Arc::new(AtomicBool::new(false)),
                shutdown: Arc::new(Notify::new()),
            },
            events_rx,
        ))
    }

    /// Overrides the default bincode codec (spec.md §6: JSON is an
    /// acceptable alternative).
    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Idempotent: starting an already-started transport is a no-op
    /// (spec.md §7 lifecycle misuse).
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let socket = Arc::clone(&self.socket);
        let codec = Arc::clone(&self.codec);
        let events_tx = self.events_tx.clone();
        let running = Arc::clone(&self.running);
        let shutdown = Arc::clone(&self.shutdown);

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                tokio::select! {
                    // A receive loop that blocks indefinitely would miss
                    // `stop` for an unbounded time; pairing the recv future
                    // with the shutdown notification gives the <=1s
                    // responsiveness spec.md §5 requires without polling.
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, from)) => {
                                match codec.decode(&buf[..len]) {
                                    Some(message) => {
                                        let _ = events_tx.send(TransportEvent::MessageReceived(message, from));
                                    }
                                    None => {
                                        warn!(peer = %from, "dropped undecodable datagram");
                                        let _ = events_tx.send(TransportEvent::DecodeError("decode failed".into(), from));
                                    }
                                }
                            }
                            Err(e) => {
                                if !running.load(Ordering::SeqCst) {
                                    // Socket-closed errors after stop are silently absorbed.
                                    break;
                                }
                                warn!(error = %e, "transport receive error");
                                let _ = events_tx.send(TransportEvent::ReceiveError(e.to_string()));
                            }
                        }
                    }
                    _ = shutdown.notified() => {
                        debug!("transport receive loop shutting down");
                        break;
                    }
                }
            }
        });
    }

    /// Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
    }

    /// Sends one message to `addr`. Returns `false` on a transient send
    /// error; the caller treats the target as unreachable on the next
    /// sweep rather than escalating (spec.md §4.6 "Failure semantics").
    pub async fn send_message(&self, message: &Message, addr: SocketAddr) -> bool {
        let Some(bytes) = self.codec.encode(message) else {
            warn!("refused to send message that failed to encode");
            return false;
        };
        match self.socket.send_to(&bytes, addr).await {
            Ok(_) => {
                let _ = self.events_tx.send(TransportEvent::MessageSent(addr));
                true
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "send failed");
                let _ = self.events_tx.send(TransportEvent::SendError(e.to_string(), addr));
                false
            }
        }
    }

    /// Broadcasts to every address, returning how many sends succeeded.
    pub async fn broadcast_message(&self, message: &Message, addrs: &[SocketAddr]) -> usize {
        let mut sent = 0;
        for addr in addrs {
            if self.send_message(message, *addr).await {
                sent += 1;
            }
        }
        sent
    }
}
