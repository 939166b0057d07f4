//! Send-side connection: handshake, windowed transmission, teardown.
//!
//! [`Sender`] owns its transport and drives one connection through
//! `SYN_SENT → ESTABLISHED → CLOSING`.  Every method is async and runs the
//! protocol inline; there is no background task.  ACKs are read whenever the
//! sender has to wait, either for window space or for a retransmission
//! deadline.
//!
//! # Protocol contract
//!
//! - The SYN carries the initial sequence number (ISN); data starts at ISN+1.
//! - ACKs are **cumulative**: `seq = K` means every byte before `K` arrived.
//! - Bytes in flight never exceed the window the receiver last advertised,
//!   capped at [`seq::MAX_WINDOW`], and no more than `max_outstanding`
//!   segments are in flight.
//! - Each segment has its own retransmission timer (1s, 2s, 4s by default);
//!   only the segment whose timer fired is resent.
//! - The FIN carries the sequence number after the last data byte and is
//!   acknowledged with that number plus one.
//!
//! # Sequence-number layout
//!
//! ```text
//!  send_base          next_seq          send_base + peer_window
//!      │                  │                      │
//!  ────┼──────────────────┼──────────────────────┼──────▶ seq space
//!      │ <── in flight ──▶│ <──── usable ──────▶ │
//! ```
//!
//! Any fatal error sends a best-effort RESET, releases the connection and is
//! returned to the caller; the `Sender` is unusable afterwards.

use std::collections::VecDeque;
use std::net::SocketAddr;

use tokio::time::Instant;

use crate::config::SenderConfig;
use crate::error::{Result, StpError};
use crate::packet::{Packet, PacketError, PacketType, MTU};
use crate::seq;
use crate::socket::{Transport, UdpTransport};
use crate::state::{ConnectionState, Lifecycle, Role};
use crate::timer::{Expiry, RetransmitTimers};

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// A data segment awaiting acknowledgement.
#[derive(Debug, Clone)]
struct Segment {
    seq: u16,
    payload: Vec<u8>,
}

impl Segment {
    fn end(&self) -> u16 {
        seq::segment_end(self.seq, self.payload.len())
    }
}

/// Counters kept over the life of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// DATA segments transmitted for the first time.
    pub segments_sent: u64,
    /// Every resend: SYN, DATA and FIN.
    pub retransmissions: u64,
    pub bytes_acked: u64,
    pub acks_received: u64,
    /// ACKs dropped for a bad checksum.
    pub corrupt_acks: u64,
    /// ACKs outside `[send_base, next_seq]`.
    pub stale_acks: u64,
}

/// Handed back by [`Sender::close`] after the FIN is acknowledged.
#[derive(Debug, Clone)]
pub struct CloseReport {
    pub stats: SenderStats,
    pub history: Vec<ConnectionState>,
}

// ---------------------------------------------------------------------------
// Sender
// ---------------------------------------------------------------------------

/// Send-side state for one connection.
#[derive(Debug)]
pub struct Sender<T> {
    transport: T,
    config: SenderConfig,
    lifecycle: Lifecycle,
    isn: u16,
    /// Oldest unacknowledged byte (left window edge).
    send_base: u16,
    /// Sequence number for the next new byte.
    next_seq: u16,
    /// Window from the most recent acceptable ACK.
    peer_window: u16,
    /// In-flight segments ordered by sequence number (front = oldest).
    in_flight: VecDeque<Segment>,
    timers: RetransmitTimers,
    stats: SenderStats,
}

impl Sender<UdpTransport> {
    /// Bind `local`, connect to the receiver at `peer`, and open the
    /// connection.
    pub async fn connect(local: SocketAddr, peer: SocketAddr, config: SenderConfig) -> Result<Self> {
        let transport = UdpTransport::connect(local, peer).await?;
        Self::open(transport, config).await
    }
}

impl<T: Transport> Sender<T> {
    /// Perform the handshake over `transport`.
    ///
    /// Returns once the receiver has acknowledged the SYN; fails with
    /// [`StpError::Timeout`] if the retry budget runs out first.
    pub async fn open(transport: T, config: SenderConfig) -> Result<Self> {
        config.validate()?;
        let isn = config.isn.unwrap_or_else(rand::random);
        let mut sender = Self {
            transport,
            timers: RetransmitTimers::new(config.retry.clone(), config.max_outstanding),
            config,
            lifecycle: Lifecycle::new(Role::Sender),
            isn,
            send_base: isn,
            next_seq: isn,
            peer_window: 0,
            in_flight: VecDeque::new(),
            stats: SenderStats::default(),
        };
        match sender.handshake().await {
            Ok(()) => Ok(sender),
            Err(e) => Err(sender.abort(e).await),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn isn(&self) -> u16 {
        self.isn
    }

    pub fn send_base(&self) -> u16 {
        self.send_base
    }

    pub fn next_seq(&self) -> u16 {
        self.next_seq
    }

    pub fn peer_window(&self) -> u16 {
        self.peer_window
    }

    /// Segments sent but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    async fn handshake(&mut self) -> Result<()> {
        self.lifecycle.advance(ConnectionState::SynSent)?;
        let first = seq::plus(self.isn, 1);
        let ack = self.exchange(PacketType::Syn, self.isn, first, "SYN").await?;
        self.send_base = first;
        self.next_seq = first;
        self.peer_window = Self::admissible_window(&ack);
        self.lifecycle.advance(ConnectionState::Established)?;
        log::info!(
            "[sender] connected: ISN {}, peer window {}",
            self.isn,
            self.peer_window
        );
        Ok(())
    }

    /// Queue `data` for delivery.
    ///
    /// Returns once every byte has been transmitted at least once; it may
    /// still be unacknowledged.  Call [`Self::flush`] to wait for the ACKs.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.lifecycle.require(ConnectionState::Established)?;
        match self.transmit(data).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Wait until every byte sent so far is acknowledged.
    pub async fn flush(&mut self) -> Result<()> {
        self.lifecycle.require(ConnectionState::Established)?;
        match self.drain().await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e).await),
        }
    }

    /// Flush, then send the FIN and wait for its acknowledgement.
    ///
    /// The transport is released whether or not the close succeeds.
    pub async fn close(mut self) -> Result<CloseReport> {
        self.lifecycle.require(ConnectionState::Established)?;
        match self.finish().await {
            Ok(()) => {
                self.lifecycle.close();
                log::info!("[sender] connection closed");
                Ok(CloseReport {
                    stats: self.stats,
                    history: self.lifecycle.history().to_vec(),
                })
            }
            Err(e) => Err(self.abort(e).await),
        }
    }

    async fn finish(&mut self) -> Result<()> {
        self.drain().await?;
        self.lifecycle.advance(ConnectionState::Closing)?;
        let fin = self.next_seq;
        self.exchange(PacketType::Fin, fin, seq::plus(fin, 1), "FIN")
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Data phase
    // -----------------------------------------------------------------------

    async fn transmit(&mut self, data: &[u8]) -> Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let want = (data.len() - offset).min(self.config.mss);
            let room = self.usable_window();

            if self.timers.is_full() || (room < want && !self.in_flight.is_empty()) {
                self.await_progress().await?;
                continue;
            }
            if room == 0 {
                return Err(StpError::violation(
                    self.state(),
                    "receiver advertised a zero window with nothing in flight",
                ));
            }

            let len = want.min(room);
            self.transmit_segment(data[offset..offset + len].to_vec())
                .await?;
            offset += len;
        }
        Ok(())
    }

    /// Advertised window, capped so unacknowledged data never spans more
    /// than half the sequence space.
    fn admissible_window(ack: &Packet) -> u16 {
        ack.header.window.min(seq::MAX_WINDOW)
    }

    fn unacked_bytes(&self) -> usize {
        usize::from(seq::minus(self.next_seq, self.send_base))
    }

    fn usable_window(&self) -> usize {
        usize::from(self.peer_window).saturating_sub(self.unacked_bytes())
    }

    async fn transmit_segment(&mut self, payload: Vec<u8>) -> Result<()> {
        let segment = Segment {
            seq: self.next_seq,
            payload,
        };
        self.transport
            .send_segment(PacketType::Data, 0, segment.seq, &segment.payload)
            .await?;
        self.timers.arm(segment.seq, segment.end(), Instant::now());
        self.next_seq = segment.end();
        self.stats.segments_sent += 1;
        self.in_flight.push_back(segment);
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        while !self.in_flight.is_empty() {
            self.await_progress().await?;
        }
        Ok(())
    }

    /// Wait for one ACK or the earliest retransmission deadline, whichever
    /// comes first, and act on it.
    async fn await_progress(&mut self) -> Result<()> {
        let deadline = self
            .timers
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + self.config.retry.initial_timeout);
        let mut buf = [0u8; MTU];
        match self.transport.recv_segment_until(&mut buf, deadline).await? {
            Some(n) => {
                if let Some(ack) = self.classify(&buf[..n])? {
                    self.on_ack(&ack);
                }
            }
            None => self.on_timeout().await?,
        }
        Ok(())
    }

    fn on_ack(&mut self, ack: &Packet) {
        let ackno = ack.header.seq;
        if seq::greater(self.send_base, ackno) || seq::greater(ackno, self.next_seq) {
            self.stats.stale_acks += 1;
            log::debug!(
                "[sender] ignoring ACK {ackno} outside [{}, {}]",
                self.send_base,
                self.next_seq
            );
            return;
        }

        self.peer_window = Self::admissible_window(ack);
        self.timers.cancel_acked(ackno);
        while let Some(front) = self.in_flight.front() {
            if !seq::less_or_equal(front.end(), ackno) {
                break;
            }
            self.stats.bytes_acked += front.payload.len() as u64;
            self.in_flight.pop_front();
        }
        self.send_base = ackno;
        log::debug!(
            "[sender] send_base → {ackno}, peer window {}, {} in flight",
            self.peer_window,
            self.in_flight.len()
        );
    }

    async fn on_timeout(&mut self) -> Result<()> {
        let max_attempts = self.timers.policy().max_attempts;
        for expiry in self.timers.expire(Instant::now()) {
            match expiry {
                Expiry::Retransmit { seq, attempt } => {
                    let Some(segment) = self.in_flight.iter().find(|s| s.seq == seq) else {
                        continue;
                    };
                    log::warn!(
                        "[sender] timeout; retransmitting segment {seq} (attempt {attempt}/{max_attempts})"
                    );
                    self.transport
                        .send_segment(PacketType::Data, 0, seq, &segment.payload)
                        .await?;
                    self.stats.retransmissions += 1;
                }
                Expiry::Exhausted { seq, attempts } => {
                    return Err(StpError::Timeout {
                        what: format!("segment {seq}"),
                        attempts,
                    });
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Control segments
    // -----------------------------------------------------------------------

    /// Send a SYN or FIN and wait for the ACK carrying `expected`, resending
    /// with backoff until the retry budget is spent.
    async fn exchange(
        &mut self,
        kind: PacketType,
        seqno: u16,
        expected: u16,
        what: &str,
    ) -> Result<Packet> {
        let policy = self.config.retry.clone();
        let mut buf = [0u8; MTU];

        for attempt in 1..=policy.max_attempts {
            if attempt > 1 {
                self.stats.retransmissions += 1;
            }
            self.transport.send_segment(kind, 0, seqno, &[]).await?;

            let deadline = Instant::now() + policy.timeout_for(attempt);
            while let Some(n) = self.transport.recv_segment_until(&mut buf, deadline).await? {
                match self.classify(&buf[..n])? {
                    Some(ack) if ack.header.seq == expected => return Ok(ack),
                    Some(ack) => {
                        self.stats.stale_acks += 1;
                        log::debug!(
                            "[sender] ignoring ACK {} while waiting for {expected}",
                            ack.header.seq
                        );
                    }
                    None => {}
                }
            }
            log::warn!(
                "[sender] {what} timed out (attempt {attempt}/{})",
                policy.max_attempts
            );
        }

        Err(StpError::Timeout {
            what: what.to_owned(),
            attempts: policy.max_attempts,
        })
    }

    /// Parse a datagram from the receiver.
    ///
    /// `Ok(None)` means it was corrupted and dropped.  Anything but an ACK is
    /// fatal.
    fn classify(&mut self, datagram: &[u8]) -> Result<Option<Packet>> {
        let packet = match Packet::parse(datagram) {
            Ok(packet) => packet,
            Err(PacketError::ChecksumMismatch) => {
                self.stats.corrupt_acks += 1;
                log::warn!("[sender] checksum mismatch; ignoring ACK");
                return Ok(None);
            }
            Err(e) => return Err(StpError::Malformed(e)),
        };
        match packet.packet_type() {
            Some(PacketType::Ack) => {
                self.stats.acks_received += 1;
                Ok(Some(packet))
            }
            Some(PacketType::Reset) => Err(StpError::PeerReset),
            other => Err(StpError::violation(
                self.state(),
                format!(
                    "unexpected {} segment from receiver",
                    other.map_or("unknown", PacketType::tag)
                ),
            )),
        }
    }

    /// Tear the connection down and hand back `err`.
    ///
    /// A RESET is sent unless the peer reset first.
    async fn abort(&mut self, err: StpError) -> StpError {
        log::error!("[sender] {err}; tearing down connection");
        if !matches!(err, StpError::PeerReset) {
            if let Err(e) = self
                .transport
                .send_segment(PacketType::Reset, 0, 0, &[])
                .await
            {
                log::debug!("[sender] could not send RESET: {e}");
            }
        }
        self.in_flight.clear();
        self.timers.clear();
        self.lifecycle.close();
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::MemoryTransport;
    use crate::timer::RetryPolicy;
    use std::time::Duration;

    /// The receiving end of a pipe, driven by hand.
    struct Peer {
        end: MemoryTransport,
        buf: [u8; MTU],
    }

    impl Peer {
        async fn next(&mut self) -> Packet {
            let n = self.end.recv_segment(&mut self.buf).await.unwrap();
            Packet::parse(&self.buf[..n]).unwrap()
        }

        async fn ack(&mut self, seqno: u16, window: u16) {
            self.end
                .send_segment(PacketType::Ack, window, seqno, &[])
                .await
                .unwrap();
        }
    }

    fn pipe() -> (MemoryTransport, Peer) {
        let (near, end) = MemoryTransport::pair();
        (near, Peer { end, buf: [0; MTU] })
    }

    fn config(isn: u16) -> SenderConfig {
        SenderConfig {
            isn: Some(isn),
            ..Default::default()
        }
    }

    /// Open a sender with ISN `isn` against a peer advertising `window`.
    async fn opened(isn: u16, window: u16, cfg: SenderConfig) -> (Sender<MemoryTransport>, Peer) {
        let (near, mut peer) = pipe();
        let open = tokio::spawn(Sender::open(near, SenderConfig { isn: Some(isn), ..cfg }));
        let syn = peer.next().await;
        assert_eq!(syn.packet_type(), Some(PacketType::Syn));
        peer.ack(seq::plus(isn, 1), window).await;
        (open.await.unwrap().unwrap(), peer)
    }

    #[tokio::test]
    async fn handshake_adopts_peer_window() {
        let (tx, _peer) = opened(100, 5000, SenderConfig::default()).await;
        assert_eq!(tx.state(), ConnectionState::Established);
        assert_eq!(tx.send_base(), 101);
        assert_eq!(tx.next_seq(), 101);
        assert_eq!(tx.peer_window(), 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn syn_is_retried_with_backoff() {
        let (near, mut peer) = pipe();
        let open = tokio::spawn(Sender::open(near, config(7)));

        let start = Instant::now();
        peer.next().await;
        peer.next().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
        peer.next().await;
        assert!(start.elapsed() >= Duration::from_secs(3));
        peer.ack(8, 5000).await;

        let tx = open.await.unwrap().unwrap();
        assert_eq!(tx.stats().retransmissions, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_gives_up_after_three_attempts() {
        let (near, mut peer) = pipe();
        let open = tokio::spawn(Sender::open(near, config(7)));
        for _ in 0..3 {
            assert_eq!(peer.next().await.packet_type(), Some(PacketType::Syn));
        }
        let err = open.await.unwrap().unwrap_err();
        assert!(matches!(err, StpError::Timeout { attempts: 3, .. }));
        assert_eq!(peer.next().await.packet_type(), Some(PacketType::Reset));
    }

    #[tokio::test]
    async fn data_is_segmented_at_mss() {
        let cfg = SenderConfig {
            mss: 300 - 7,
            ..Default::default()
        };
        let (mut tx, mut peer) = opened(0, 5000, cfg).await;
        tx.send(&[9u8; 1000]).await.unwrap();

        let mut lens = Vec::new();
        let mut seqs = Vec::new();
        for _ in 0..4 {
            let p = peer.next().await;
            assert_eq!(p.packet_type(), Some(PacketType::Data));
            seqs.push(p.header.seq);
            lens.push(p.payload.len());
        }
        assert_eq!(seqs, vec![1, 294, 587, 880]);
        assert_eq!(lens, vec![293, 293, 293, 121]);
        assert_eq!(tx.in_flight(), 4);
    }

    #[tokio::test]
    async fn window_limits_bytes_in_flight() {
        let cfg = SenderConfig {
            mss: 10,
            ..Default::default()
        };
        let (mut tx, mut peer) = opened(0, 20, cfg).await;
        let send = tokio::spawn(async move {
            tx.send(&[1u8; 30]).await.unwrap();
            tx
        });

        assert_eq!(peer.next().await.header.seq, 1);
        assert_eq!(peer.next().await.header.seq, 11);
        // Window is full until the first segment is acknowledged.
        peer.ack(11, 20).await;
        assert_eq!(peer.next().await.header.seq, 21);

        let tx = send.await.unwrap();
        assert_eq!(tx.send_base(), 11);
        assert_eq!(tx.next_seq(), 31);
    }

    #[tokio::test]
    async fn flush_waits_for_cumulative_ack() {
        let (mut tx, mut peer) = opened(50, 5000, SenderConfig::default()).await;
        tx.send(b"abcdef").await.unwrap();
        peer.next().await;

        let flush = tokio::spawn(async move {
            tx.flush().await.unwrap();
            tx
        });
        peer.ack(57, 4994).await;
        let tx = flush.await.unwrap();
        assert_eq!(tx.in_flight(), 0);
        assert_eq!(tx.send_base(), 57);
        assert_eq!(tx.peer_window(), 4994);
        assert_eq!(tx.stats().bytes_acked, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_expired_segment_is_resent() {
        let (mut tx, mut peer) = opened(0, 5000, SenderConfig::default()).await;
        tx.send(b"aaaa").await.unwrap();
        peer.next().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        tx.send(b"bbbb").await.unwrap();
        peer.next().await;

        let flush = tokio::spawn(async move {
            tx.flush().await.unwrap();
            tx
        });
        // The first timer fires half a second before the second one.
        let resent = peer.next().await;
        assert_eq!(resent.header.seq, 1);
        assert_eq!(resent.payload, b"aaaa");
        peer.ack(9, 5000).await;

        let tx = flush.await.unwrap();
        assert_eq!(tx.stats().retransmissions, 1);
        assert_eq!(tx.send_base(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_window_is_capped_at_half_the_space() {
        let cfg = SenderConfig {
            max_outstanding: 200,
            ..Default::default()
        };
        let (tx, mut peer) = opened(0, u16::MAX, cfg).await;
        assert_eq!(tx.peer_window(), seq::MAX_WINDOW);

        let total = 40_000usize;
        let task = tokio::spawn(async move {
            let mut tx = tx;
            tx.send(&vec![7u8; total]).await.unwrap();
            tx.flush().await.unwrap();
            tx
        });

        // 111 full segments fit under the cap; the 112th does not.
        let mut received = 0usize;
        for _ in 0..111 {
            received += peer.next().await.payload.len();
        }
        assert_eq!(received, 111 * 293);
        let more = peer
            .end
            .recv_segment_timeout(&mut peer.buf, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(more, None, "sender overran the capped window");

        peer.ack(seq::segment_end(1, received), u16::MAX).await;
        while received < total {
            received += peer.next().await.payload.len();
        }
        peer.ack(seq::segment_end(1, total), u16::MAX).await;

        let tx = task.await.unwrap();
        assert_eq!(tx.send_base(), 40_001);
        assert_eq!(tx.stats().stale_acks, 0);
        assert_eq!(tx.stats().retransmissions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupted_ack_counts_as_not_received() {
        let (mut tx, mut peer) = opened(0, 5000, SenderConfig::default()).await;
        tx.send(b"abc").await.unwrap();
        peer.next().await;

        let flush = tokio::spawn(async move {
            tx.flush().await.unwrap();
            tx
        });
        let mut bytes = Packet::control(PacketType::Ack, 1, 4).encode().unwrap();
        bytes[3] ^= 0x01;
        peer.end.send_datagram(&bytes).await.unwrap();

        // Only the timeout can move the sender now.
        let resent = peer.next().await;
        assert_eq!(resent.header.seq, 1);
        assert_eq!(resent.payload, b"abc");
        peer.ack(4, 4000).await;

        let tx = flush.await.unwrap();
        assert_eq!(tx.stats().corrupt_acks, 1);
        assert_eq!(tx.stats().acks_received, 2, "SYN-ACK plus the valid data ACK");
        assert_eq!(tx.stats().retransmissions, 1);
        assert_eq!(tx.send_base(), 4);
        assert_eq!(tx.peer_window(), 4000);
    }

    #[tokio::test]
    async fn stale_ack_is_ignored() {
        let (mut tx, mut peer) = opened(10, 5000, SenderConfig::default()).await;
        tx.send(b"xyz").await.unwrap();
        peer.next().await;

        let flush = tokio::spawn(async move {
            tx.flush().await.unwrap();
            tx
        });
        peer.ack(900, 1).await;
        peer.ack(14, 5000).await;
        let tx = flush.await.unwrap();
        assert_eq!(tx.stats().stale_acks, 1);
        assert_eq!(tx.peer_window(), 5000);
    }

    #[tokio::test]
    async fn close_sends_fin_after_data() {
        let (mut tx, mut peer) = opened(0, 5000, SenderConfig::default()).await;
        tx.send(b"bye").await.unwrap();
        let data = peer.next().await;
        assert_eq!(data.header.seq, 1);

        let close = tokio::spawn(tx.close());
        peer.ack(4, 5000).await;
        let fin = peer.next().await;
        assert_eq!(fin.packet_type(), Some(PacketType::Fin));
        assert_eq!(fin.header.seq, 4);
        peer.ack(5, 5000).await;

        let report = close.await.unwrap().unwrap();
        assert_eq!(
            report.history,
            vec![
                ConnectionState::Closed,
                ConnectionState::SynSent,
                ConnectionState::Established,
                ConnectionState::Closing,
                ConnectionState::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn peer_reset_is_fatal() {
        let (mut tx, mut peer) = opened(0, 5000, SenderConfig::default()).await;
        tx.send(b"data").await.unwrap();
        peer.next().await;
        peer.end
            .send_segment(PacketType::Reset, 0, 0, &[])
            .await
            .unwrap();

        assert!(matches!(tx.flush().await, Err(StpError::PeerReset)));
        assert_eq!(tx.state(), ConnectionState::Closed);
        assert!(matches!(tx.send(b"more").await, Err(StpError::BadState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_with_nothing_in_flight_is_fatal() {
        let (mut tx, _peer) = opened(0, 0, SenderConfig::default()).await;
        let err = tx.send(b"stuck").await.unwrap_err();
        assert!(matches!(err, StpError::ProtocolViolation { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn segment_retry_budget_is_fatal() {
        let cfg = SenderConfig {
            retry: RetryPolicy {
                initial_timeout: Duration::from_millis(100),
                max_attempts: 2,
            },
            ..Default::default()
        };
        let (mut tx, mut peer) = opened(0, 5000, cfg).await;
        tx.send(b"lost").await.unwrap();
        peer.next().await;

        let err = tx.flush().await.unwrap_err();
        assert!(matches!(err, StpError::Timeout { attempts: 2, .. }));
        assert_eq!(peer.next().await.payload, b"lost");
        assert_eq!(peer.next().await.packet_type(), Some(PacketType::Reset));
    }

    #[tokio::test]
    async fn sequence_numbers_wrap() {
        let cfg = SenderConfig {
            mss: 4,
            ..Default::default()
        };
        let (mut tx, mut peer) = opened(65_533, 5000, cfg).await;
        tx.send(b"abcdefgh").await.unwrap();
        assert_eq!(peer.next().await.header.seq, 65_534);
        assert_eq!(peer.next().await.header.seq, 2);
        assert_eq!(tx.next_seq(), 6);

        let flush = tokio::spawn(async move {
            tx.flush().await.unwrap();
            tx
        });
        peer.ack(6, 5000).await;
        assert_eq!(flush.await.unwrap().send_base(), 6);
    }
}
