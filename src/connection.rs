//! Connection drivers: the async loops that bind a protocol engine to a
//! datagram channel.
//!
//! # Architecture
//!
//! ```text
//!  SenderConnection                          ReceiverConnection
//!    ├── SenderWindow (chunks, GBN window)     ├── ReceiverEngine (reorder, ACKs)
//!    └── D: Datagram ──── START/DATA/END ────▶ └── D: Datagram
//!                    ◀──────── ACK ──────────
//! ```
//!
//! Each driver owns its channel and its engine for the lifetime of one
//! connection.  The only suspension point is [`Datagram::recv_from`]; every
//! wait is bounded except the receiver's wait for START.
//!
//! ```ignore
//! let socket = Socket::bind_for(peer).await?;
//! let stats = SenderConnection::new(socket, peer, Config::with_window(4))?
//!     .send_message(b"hello")
//!     .await?;
//! ```

use std::net::SocketAddr;

use thiserror::Error;
use tokio::time::Instant;

use crate::config::{Config, ConfigError};
use crate::packet::{Packet, PacketType};
use crate::receiver::ReceiverEngine;
use crate::sender::SenderWindow;
use crate::socket::{Datagram, SocketError};
use crate::state::{ReceiverState, SenderState};

/// Fatal connection errors.
///
/// Loss, corruption, and protocol violations never show up here; they are
/// absorbed by retransmission or silently dropped.
#[derive(Debug, Error)]
pub enum ConnError {
    #[error(transparent)]
    Socket(#[from] SocketError),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// No ACK for START within the configured number of attempts.
    #[error("no ACK for START after {0} attempt(s)")]
    ConnectTimeout(u32),
    /// The peer stopped acknowledging in the middle of a transfer.
    #[error("peer unresponsive after {0} consecutive ACK timeouts")]
    PeerUnresponsive(u32),
    /// An operation was called in the wrong [`SenderState`].
    #[error("operation not valid in state {0}")]
    BadState(SenderState),
}

/// Counters reported by a finished transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// DATA chunks the message was split into.
    pub chunks: usize,
    /// Every datagram sent, control packets and retransmissions included.
    pub packets_sent: usize,
    /// DATA packets re-sent after a timeout.
    pub retransmissions: usize,
    /// ACK waits that expired during the transfer phase.
    pub timeouts: usize,
    /// Whether the END packet was acknowledged before the retry budget ran out.
    pub close_acknowledged: bool,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Sending side of one connection.
pub struct SenderConnection<D> {
    socket: D,
    peer: SocketAddr,
    config: Config,
    state: SenderState,
    /// Sequence number for END, known once the message is chunked.
    end_seq: u32,
    stats: TransferStats,
}

impl<D: Datagram> SenderConnection<D> {
    /// Validate `config` and prepare to talk to `peer` over `socket`.
    pub fn new(socket: D, peer: SocketAddr, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self {
            socket,
            peer,
            config,
            state: SenderState::Idle,
            end_seq: 1,
            stats: TransferStats::default(),
        })
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Give the channel back, e.g. to inspect a simulator after a test.
    pub fn into_socket(self) -> D {
        self.socket
    }

    /// Run the whole protocol: handshake, transfer, close.
    pub async fn send_message(&mut self, message: &[u8]) -> Result<TransferStats, ConnError> {
        self.connect().await?;
        self.transfer(message).await?;
        self.close().await?;
        log::info!(
            "[sender] done: {} chunk(s), {} packet(s) sent, {} retransmitted, {} timeout(s)",
            self.stats.chunks,
            self.stats.packets_sent,
            self.stats.retransmissions,
            self.stats.timeouts
        );
        Ok(self.stats.clone())
    }

    /// Send START and wait for any ACK, resending START on each timeout.
    pub async fn connect(&mut self) -> Result<(), ConnError> {
        if self.state != SenderState::Idle {
            return Err(ConnError::BadState(self.state));
        }
        self.state = SenderState::Connecting;
        let start = Packet::start();

        for attempt in 1..=self.config.connect_attempts {
            self.send(&start).await?;
            log::debug!("[sender] → START (attempt {attempt})");

            let deadline = Instant::now() + self.config.ack_timeout;
            if let Some(ack) = self.wait_for_ack(deadline).await? {
                log::debug!("[sender] ← ACK {ack}; established");
                self.state = SenderState::Transferring;
                return Ok(());
            }
        }

        self.state = SenderState::Done;
        Err(ConnError::ConnectTimeout(self.config.connect_attempts))
    }

    /// Slide a Go-Back-N window over `message` until every chunk is
    /// cumulatively acknowledged.
    pub async fn transfer(&mut self, message: &[u8]) -> Result<(), ConnError> {
        if self.state != SenderState::Transferring {
            return Err(ConnError::BadState(self.state));
        }

        let mut window =
            SenderWindow::for_message(message, self.config.max_payload, self.config.window_size);
        self.stats.chunks = window.chunk_count();
        self.end_seq = window.end_sequence();
        let mut consecutive_timeouts = 0u32;

        while !window.is_complete() {
            for pkt in window.take_unsent() {
                self.send(&pkt).await?;
                log::trace!("[sender] → DATA seq={} len={}", pkt.seq, pkt.payload.len());
            }
            debug_assert!(window.in_flight() <= self.config.window_size);

            let deadline = Instant::now() + self.config.ack_timeout;
            match self.wait_for_ack(deadline).await? {
                Some(ack) => {
                    consecutive_timeouts = 0;
                    let slid = window.on_ack(ack);
                    if slid > 0 {
                        log::debug!(
                            "[sender] ← ACK {ack} (slid {slid}, {}/{} acked)",
                            window.window_start(),
                            window.chunk_count()
                        );
                    } else {
                        log::trace!("[sender] ← stale ACK {ack}");
                    }
                }
                None => {
                    self.stats.timeouts += 1;
                    consecutive_timeouts += 1;
                    if consecutive_timeouts >= self.config.max_consecutive_timeouts {
                        self.state = SenderState::Done;
                        return Err(ConnError::PeerUnresponsive(consecutive_timeouts));
                    }
                    // Go-Back-N: retransmit every unacked chunk from window_start.
                    let pkts = window.in_flight_packets();
                    log::debug!(
                        "[sender] timeout, retransmitting {} packet(s) from seq {}",
                        pkts.len(),
                        window.next_sequence()
                    );
                    for pkt in &pkts {
                        self.send(pkt).await?;
                    }
                    self.stats.retransmissions += pkts.len();
                }
            }
        }

        self.state = SenderState::Closing;
        Ok(())
    }

    /// Send END and wait for its ACK a bounded number of times.
    ///
    /// Running out of attempts is not an error: every DATA chunk was already
    /// acknowledged, so the transfer is complete either way.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        if self.state != SenderState::Closing {
            return Err(ConnError::BadState(self.state));
        }
        let end = Packet::end(self.end_seq);
        let want = self.end_seq.wrapping_add(1);

        for attempt in 1..=self.config.close_attempts {
            self.send(&end).await?;
            log::debug!("[sender] → END seq={} (attempt {attempt})", end.seq);

            let deadline = Instant::now() + self.config.ack_timeout;
            while let Some(ack) = self.wait_for_ack(deadline).await? {
                if ack == want {
                    log::debug!("[sender] ← ACK {ack} of END; closed");
                    self.stats.close_acknowledged = true;
                    self.state = SenderState::Done;
                    return Ok(());
                }
                log::trace!("[sender] ← stale ACK {ack} while closing");
            }
        }

        log::warn!(
            "[sender] END not acknowledged after {} attempt(s); closing anyway",
            self.config.close_attempts
        );
        self.state = SenderState::Done;
        Ok(())
    }

    async fn send(&mut self, pkt: &Packet) -> Result<(), ConnError> {
        self.socket.send_to(&pkt.encode(), self.peer).await?;
        self.stats.packets_sent += 1;
        Ok(())
    }

    /// Wait until `deadline` for one valid ACK from the peer.
    ///
    /// Datagrams from other addresses, corrupt datagrams, and non-ACK
    /// packets are skipped without extending the deadline.
    async fn wait_for_ack(&self, deadline: Instant) -> Result<Option<u32>, ConnError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let Some((bytes, addr)) = self.socket.recv_from(Some(remaining)).await? else {
                return Ok(None);
            };
            if addr != self.peer {
                log::trace!("[sender] ignoring datagram from {addr}");
                continue;
            }
            match Packet::parse(&bytes) {
                Ok(pkt) if pkt.kind == PacketType::Ack => return Ok(Some(pkt.seq)),
                Ok(pkt) => log::trace!("[sender] ignoring {} seq={}", pkt.kind, pkt.seq),
                Err(e) => log::debug!("[sender] dropping datagram: {e}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// Receiving side of one connection.
///
/// The connection binds itself to the address that sent the first valid
/// START; datagrams from any other address are ignored afterwards.
pub struct ReceiverConnection<D> {
    socket: D,
    engine: ReceiverEngine,
    peer: Option<SocketAddr>,
    config: Config,
}

impl<D: Datagram> ReceiverConnection<D> {
    pub fn new(socket: D, config: Config) -> Result<Self, ConnError> {
        config.validate()?;
        Ok(Self {
            socket,
            engine: ReceiverEngine::new(config.window_size),
            peer: None,
            config,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr()
    }

    pub fn engine(&self) -> &ReceiverEngine {
        &self.engine
    }

    /// Address of the sender this connection is bound to, once known.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Receive until END, then return the reassembled message.
    ///
    /// Waits without bound for START.  After that, going
    /// [`Config::idle_timeout`] without in-order progress closes the
    /// connection early with whatever prefix was delivered.  With a non-zero
    /// [`Config::linger`], keeps answering duplicate ENDs for that long
    /// before returning.
    pub async fn run(mut self) -> Result<Vec<u8>, ConnError> {
        log::info!("[receiver] listening on {}", self.socket.local_addr());
        let mut idle_deadline: Option<Instant> = None;
        let mut progress = self.engine.expected_sequence();

        while !self.engine.is_closed() {
            let wait = match idle_deadline {
                None => None,
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        log::warn!(
                            "[receiver] no progress for {:?}; closing with {} chunk(s) delivered",
                            self.config.idle_timeout,
                            self.engine.delivered().len()
                        );
                        break;
                    }
                    Some(remaining)
                }
            };
            if let Some((bytes, addr)) = self.socket.recv_from(wait).await? {
                self.handle(&bytes, addr).await?;
            }
            if self.engine.state() == ReceiverState::Established
                && (idle_deadline.is_none() || self.engine.expected_sequence() != progress)
            {
                progress = self.engine.expected_sequence();
                idle_deadline = Some(Instant::now() + self.config.idle_timeout);
            }
        }

        if self.engine.is_closed() && !self.config.linger.is_zero() {
            let deadline = Instant::now() + self.config.linger;
            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                match self.socket.recv_from(Some(remaining)).await? {
                    Some((bytes, addr)) => self.handle(&bytes, addr).await?,
                    None => break,
                }
            }
        }

        let message = self.engine.into_message();
        log::info!("[receiver] closed; {} byte(s) reassembled", message.len());
        Ok(message)
    }

    async fn handle(&mut self, bytes: &[u8], addr: SocketAddr) -> Result<(), ConnError> {
        if self.peer.is_some_and(|peer| peer != addr) {
            log::trace!("[receiver] ignoring datagram from {addr}");
            return Ok(());
        }
        let Some(ack) = self.engine.on_datagram(bytes) else {
            return Ok(());
        };
        if self.peer.is_none() {
            log::info!("[receiver] connection from {addr}");
            self.peer = Some(addr);
        }
        self.socket.send_to(&ack.encode(), addr).await?;
        Ok(())
    }
}

/// Run a full transfer (START, DATA, END) over an existing channel.
pub async fn send_message<D: Datagram>(
    socket: D,
    peer: SocketAddr,
    message: &[u8],
    config: Config,
) -> Result<TransferStats, ConnError> {
    SenderConnection::new(socket, peer, config)?
        .send_message(message)
        .await
}

/// Receive one message over an existing channel.
pub async fn receive_message<D: Datagram>(socket: D, config: Config) -> Result<Vec<u8>, ConnError> {
    ReceiverConnection::new(socket, config)?.run().await
}
