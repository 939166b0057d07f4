//! Datagram transport abstraction.
//!
//! The engines never touch a socket directly.  They speak to a [`Transport`],
//! which only has to move opaque datagrams; the segment-level helpers
//! (`send_segment`, `recv_segment`, `recv_segment_timeout`) are provided on
//! top and log one trace line per datagram.
//!
//! Implementations:
//! - [`UdpTransport`]: a tokio `UdpSocket` bound locally and connected to
//!   the peer, so every datagram goes to and comes from that one address.
//! - [`MemoryTransport`]: an in-process pipe, one end per peer.
//! - [`crate::simulator::Simulator`]: wraps another transport and injects
//!   loss, corruption and reordering.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::Result;
use crate::packet::{Packet, PacketType};

/// An unreliable, connected datagram channel.
#[async_trait]
pub trait Transport: Send {
    /// Send one datagram.  Delivery is not guaranteed.
    async fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()>;

    /// Wait for the next datagram and copy it into `buf`, returning its length.
    async fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Encode and send a segment.
    async fn send_segment(
        &mut self,
        kind: PacketType,
        window: u16,
        seq: u16,
        payload: &[u8],
    ) -> Result<()> {
        let packet = Packet::new(kind, window, seq, payload.to_vec());
        self.send_packet(&packet).await
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.encode()?;
        log::debug!("[stp] → {packet}");
        self.send_datagram(&bytes).await?;
        Ok(())
    }

    /// Receive the next datagram, whatever it contains.
    async fn recv_segment(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.recv_datagram(buf).await?;
        if log::log_enabled!(log::Level::Debug) {
            match Packet::decode(&buf[..n]) {
                Ok(packet) => log::debug!("[stp] ← {packet}"),
                Err(e) => log::debug!("[stp] ← {e}"),
            }
        }
        Ok(n)
    }

    /// Like [`recv_segment`](Self::recv_segment) but gives up at `deadline`,
    /// returning `Ok(None)`.
    async fn recv_segment_until(
        &mut self,
        buf: &mut [u8],
        deadline: Instant,
    ) -> io::Result<Option<usize>> {
        match tokio::time::timeout_at(deadline, self.recv_segment(buf)).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Like [`recv_segment`](Self::recv_segment) but gives up after `timeout`.
    async fn recv_segment_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> io::Result<Option<usize>> {
        self.recv_segment_until(buf, Instant::now() + timeout).await
    }
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

/// A UDP socket bound to a local address and connected to one peer.
#[derive(Debug)]
pub struct UdpTransport {
    inner: UdpSocket,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to `local` and connect to `peer`.
    ///
    /// Passing port 0 in `local` lets the OS choose an ephemeral port.
    pub async fn connect(local: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local).await?;
        Self::from_socket(inner, peer).await
    }

    /// Connect an already bound socket to `peer`.
    pub async fn from_socket(inner: UdpSocket, peer: SocketAddr) -> io::Result<Self> {
        inner.connect(peer).await?;
        let local_addr = inner.local_addr()?;
        log::info!("UDP \"connection\" {local_addr} ⇄ {peer} configured");
        Ok(Self {
            inner,
            local_addr,
            peer_addr: peer,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

/// Errors a connected UDP socket reports for conditions that are really just
/// packet loss, e.g. an ICMP port-unreachable while the peer is not up yet.
fn is_transient_io_error(e: &io::Error) -> bool {
    use io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset | ErrorKind::Interrupted
    )
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        match self.inner.send(datagram).await {
            Ok(_) => Ok(()),
            Err(e) if is_transient_io_error(&e) => {
                log::warn!("send to {} failed ({e}); treating as lost", self.peer_addr);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.inner.recv(buf).await {
                Ok(n) => return Ok(n),
                Err(e) if is_transient_io_error(&e) => {
                    log::debug!("recv from {} failed ({e}); retrying", self.peer_addr);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// In-process pipe
// ---------------------------------------------------------------------------

/// One end of an in-process datagram pipe.
///
/// Datagrams are delivered reliably and in order; wrap an end in a
/// [`crate::simulator::Simulator`] to make it misbehave.  Sending after the
/// other end is dropped silently discards the datagram, like UDP; receiving
/// after it is dropped fails with [`io::ErrorKind::NotConnected`].
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self { tx: a_tx, rx: a_rx },
            Self { tx: b_tx, rx: b_rx },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send_datagram(&mut self, datagram: &[u8]) -> io::Result<()> {
        // A closed peer is indistinguishable from loss.
        let _ = self.tx.send(datagram.to_vec());
        Ok(())
    }

    async fn recv_datagram(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let datagram = self
            .rx
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "peer end dropped"))?;
        let n = datagram.len().min(buf.len());
        buf[..n].copy_from_slice(&datagram[..n]);
        Ok(n)
    }
}
