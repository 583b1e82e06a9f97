//! Fault-injecting network layer for deterministic testing.
//!
//! Real networks drop, reorder, duplicate, and corrupt packets.  To exercise
//! the reliability mechanisms without depending on actual network
//! conditions, [`Simulator`] wraps any [`Datagram`] channel and applies a
//! configurable fault model to every outbound datagram:
//!
//! | Fault       | Description                                            |
//! |-------------|--------------------------------------------------------|
//! | Loss        | Drop a datagram with probability `loss_rate`.          |
//! | Duplication | Deliver a datagram twice.                              |
//! | Reordering  | Hold a datagram back until the next one has been sent. |
//! | Corruption  | Flip one random bit.                                   |
//! | Scripted    | Drop the next N datagrams of a given type and sequence.|
//!
//! Faults are drawn from a seeded RNG so failures are reproducible.  Every
//! send attempt is recorded before faults are applied, letting tests assert
//! exactly what an engine transmitted.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::packet::{self, PacketType};
use crate::socket::{Datagram, Socket, SocketError};

/// Fault-injection model.  All probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub corrupt_rate: f64,
    /// RNG seed; equal seeds give equal fault sequences.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default: the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            corrupt_rate: 0.0,
            seed: 0,
        }
    }
}

/// Drop the next `remaining` datagrams whose header matches.
#[derive(Debug, Clone)]
struct DropRule {
    kind: PacketType,
    seq: u32,
    remaining: usize,
}

#[derive(Debug)]
struct Faults {
    rng: StdRng,
    rules: Vec<DropRule>,
    held: Option<(Vec<u8>, SocketAddr)>,
    sent: Vec<(PacketType, u32)>,
}

/// A fault-injecting wrapper around a datagram channel.
#[derive(Debug)]
pub struct Simulator<D = Socket> {
    inner: D,
    config: SimulatorConfig,
    faults: Mutex<Faults>,
}

impl<D: Datagram> Simulator<D> {
    pub fn new(inner: D, config: SimulatorConfig) -> Self {
        let faults = Faults {
            rng: StdRng::seed_from_u64(config.seed),
            rules: Vec::new(),
            held: None,
            sent: Vec::new(),
        };
        Self {
            inner,
            config,
            faults: Mutex::new(faults),
        }
    }

    /// Pass-through simulator (no random faults).
    pub fn transparent(inner: D) -> Self {
        Self::new(inner, SimulatorConfig::default())
    }

    /// Silently drop the next `times` outbound packets of `kind` carrying
    /// sequence number `seq`.
    pub fn drop_next(&self, kind: PacketType, seq: u32, times: usize) {
        self.lock().rules.push(DropRule {
            kind,
            seq,
            remaining: times,
        });
    }

    /// Every packet handed to [`Datagram::send_to`] so far, including ones
    /// the fault model then dropped.  Undecodable bytes are not recorded.
    pub fn sent_log(&self) -> Vec<(PacketType, u32)> {
        self.lock().sent.clone()
    }

    /// How many times a packet of `kind` with sequence `seq` was sent.
    pub fn sent_count(&self, kind: PacketType, seq: u32) -> usize {
        self.lock()
            .sent
            .iter()
            .filter(|&&entry| entry == (kind, seq))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Faults> {
        // A panic while holding the lock only happens in a failing test.
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Decide what actually goes on the wire for one send attempt.
    fn plan(&self, bytes: &[u8], dest: SocketAddr) -> Vec<(Vec<u8>, SocketAddr)> {
        let mut f = self.lock();

        if let Ok((header, _)) = packet::decode(bytes) {
            f.sent.push((header.kind, header.seq));
            if let Some(rule) = f
                .rules
                .iter_mut()
                .find(|r| r.remaining > 0 && r.kind == header.kind && r.seq == header.seq)
            {
                rule.remaining -= 1;
                log::trace!("[sim] scripted drop of {} seq={}", header.kind, header.seq);
                return Vec::new();
            }
        }

        if f.rng.random_bool(self.config.loss_rate) {
            log::trace!("[sim] lost {} byte(s)", bytes.len());
            return Vec::new();
        }

        let mut datagram = bytes.to_vec();
        if !datagram.is_empty() && f.rng.random_bool(self.config.corrupt_rate) {
            let bit = f.rng.random_range(0..datagram.len() * 8);
            datagram[bit / 8] ^= 1 << (bit % 8);
        }

        let mut out = Vec::with_capacity(3);
        if f.rng.random_bool(self.config.reorder_rate) && f.held.is_none() {
            f.held = Some((datagram, dest));
            return out;
        }
        if f.rng.random_bool(self.config.duplicate_rate) {
            out.push((datagram.clone(), dest));
        }
        out.push((datagram, dest));
        // A held-back datagram goes out after the one that overtook it.
        out.extend(f.held.take());
        out
    }
}

impl<D: Datagram> Datagram for Simulator<D> {
    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr()
    }

    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), SocketError> {
        for (datagram, to) in self.plan(bytes, dest) {
            self.inner.send_to(&datagram, to).await?;
        }
        Ok(())
    }

    async fn recv_from(
        &self,
        timeout: Option<Duration>,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>, SocketError> {
        self.inner.recv_from(timeout).await
    }
}
