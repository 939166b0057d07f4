//! Network impairment simulator.
//!
//! Real networks drop, reorder, and corrupt packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] wraps any [`Transport`] and applies a configurable fault
//! model:
//!
//! | Fault            | Direction | Description                                    |
//! |------------------|-----------|------------------------------------------------|
//! | Packet loss      | inbound   | Drop with probability `packet_loss`.           |
//! | Reordering       | inbound   | Hold one packet back until the next arrives.   |
//! | Corruption       | inbound   | Flip one random bit with `corrupt_packet`.     |
//! | ACK loss         | outbound  | Drop with probability `ack_loss`.              |
//! | ACK corruption   | outbound  | Flip one random bit with `corrupt_ack`.        |
//!
//! It is meant to sit on the receiver's side of the channel, so its outbound
//! traffic is ACKs (and the odd RESET).  The ACK answering the SYN gets no
//! exemption; the sender's SYN retries recover it like any other.  The RNG is seeded from
//! [`SimulatorConfig::seed`] when set, so a failing run can be replayed.

use std::io;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::{Result, StpError};
use crate::socket::Transport;

/// Fault probabilities, each in `[0.0, 1.0]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulatorConfig {
    /// Probability that an inbound packet is silently dropped.
    pub packet_loss: f64,
    /// Probability that an outbound ACK is silently dropped.
    pub ack_loss: f64,
    /// Probability that an inbound packet is delivered after its successor.
    pub reorder: f64,
    /// Probability that an inbound packet has one bit flipped.
    pub corrupt_packet: f64,
    /// Probability that an outbound ACK has one bit flipped.
    pub corrupt_ack: f64,
    /// RNG seed; entropy when `None`.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    pub fn validate(&self) -> Result<()> {
        let probabilities = [
            ("packet_loss", self.packet_loss),
            ("ack_loss", self.ack_loss),
            ("reorder", self.reorder),
            ("corrupt_packet", self.corrupt_packet),
            ("corrupt_ack", self.corrupt_ack),
        ];
        for (name, p) in probabilities {
            if !(0.0..=1.0).contains(&p) {
                return Err(StpError::Config(format!("{name} must be in [0, 1], got {p}")));
            }
        }
        Ok(())
    }
}

/// How many times each fault has fired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimulatorStats {
    pub dropped: u64,
    pub delayed: u64,
    pub corrupted: u64,
    pub acks_dropped: u64,
    pub acks_corrupted: u64,
}

/// A fault-injecting wrapper around another transport.
pub struct Simulator<T> {
    inner: T,
    config: SimulatorConfig,
    rng: StdRng,
    /// Packet pulled out of the stream to be delivered late.
    held: Option<Vec<u8>>,
    /// Held packet released behind its successor, handed out on the next read.
    ready: Option<Vec<u8>>,
    stats: SimulatorStats,
}

impl<T: Transport> Simulator<T> {
    pub fn new(inner: T, config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            inner,
            config,
            rng,
            held: None,
            ready: None,
            stats: SimulatorStats::default(),
        })
    }

    pub fn stats(&self) -> SimulatorStats {
        self.stats
    }

    fn happens(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen_bool(p)
    }

    fn flip_random_bit(&mut self, datagram: &mut [u8]) {
        if datagram.is_empty() {
            return;
        }
        let byte = self.rng.gen_range(0..datagram.len());
        let bit = self.rng.gen_range(0..8);
        datagram[byte] ^= 1 << bit;
    }
}

fn deliver(datagram: &[u8], buf: &mut [u8]) -> usize {
    let n = datagram.len().min(buf.len());
    buf[..n].copy_from_slice(&datagram[..n]);
    n
}

#[async_trait]
impl<T: Transport> Transport for Simulator<T> {
    async fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        if self.happens(self.config.ack_loss) {
            self.stats.acks_dropped += 1;
            log::warn!("[sim] outbound ACK dropped");
            return Ok(());
        }
        let mut bytes = datagram.to_vec();
        if self.happens(self.config.corrupt_ack) {
            self.flip_random_bit(&mut bytes);
            self.stats.acks_corrupted += 1;
            log::warn!("[sim] outbound ACK corrupted");
        }
        self.inner.send_datagram(&bytes).await
    }

    async fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(late) = self.ready.take() {
            log::warn!("[sim] delivering delayed packet");
            return Ok(deliver(&late, buf));
        }

        loop {
            let n = self.inner.recv_datagram(buf).await?;
            let mut datagram = buf[..n].to_vec();

            if self.happens(self.config.corrupt_packet) {
                self.flip_random_bit(&mut datagram);
                self.stats.corrupted += 1;
                log::warn!("[sim] inbound packet corrupted");
            }
            if self.happens(self.config.packet_loss) {
                self.stats.dropped += 1;
                log::warn!("[sim] inbound packet dropped");
                continue;
            }
            if self.held.is_none() && self.happens(self.config.reorder) {
                self.stats.delayed += 1;
                log::warn!("[sim] inbound packet delayed");
                self.held = Some(datagram);
                continue;
            }

            self.ready = self.held.take();
            return Ok(deliver(&datagram, buf));
        }
    }
}
