//! Receive-side state machine and receive loop.
//!
//! [`Receiver`] owns the connection record for the one connection a
//! receiver serves:
//! - Accepting the peer's SYN and learning its initial sequence number.
//! - Delivering in-order data to the application sink immediately.
//! - Parking out-of-order data in a [`ReassemblyQueue`] until the gap closes,
//!   then draining the contiguous run.
//! - Computing the advertised window and answering every accepted segment
//!   with exactly one ACK.
//! - Validating the FIN and entering `TIME_WAIT`.
//!
//! [`Receiver::on_datagram`] does no I/O besides writing to the sink: it
//! returns the ACK to send, if any.  [`Receiver::run`] (or [`receive`]) is the
//! loop that feeds it from a [`Transport`].
//!
//! # Window bookkeeping
//!
//! ```text
//!          LBRead  NBE                 LBReceived        LBA = LBRead + max_window
//!            │      │                      │                │
//!  ──────────┼──────┼──────────────────────┼────────────────┼──────▶ seq space
//!  delivered │      │ <─ gaps + parked ──▶ │ <─ free room ─▶│
//! ```
//!
//! `NBE − 1 == LBRead` holds between segments, and `LBReceived − LBRead`
//! never exceeds `max_window`; a segment that would break either bound
//! aborts the connection.

use std::io::Write;

use tokio::time::Instant;

use crate::config::ReceiverConfig;
use crate::error::{Result, StpError};
use crate::packet::{Packet, PacketError, PacketType, MTU};
use crate::reassembly::ReassemblyQueue;
use crate::seq;
use crate::socket::Transport;
use crate::state::{ConnectionState, Lifecycle, Progress, Role};

/// Counters kept over the life of one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// SYNs accepted in `LISTEN`.
    pub handshakes: u64,
    /// DATA segments delivered straight to the sink.
    pub in_order: u64,
    /// DATA segments parked in the reassembly queue.
    pub out_of_order: u64,
    /// Parked segments later drained into the sink.
    pub drained: u64,
    /// DATA segments that were already received.
    pub duplicates: u64,
    pub bytes_delivered: u64,
    /// Datagrams dropped for a bad checksum.
    pub checksum_failures: u64,
    pub acks_sent: u64,
}

/// What the caller must do after one datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// ACK to send back, if the segment was accepted.
    pub reply: Option<Packet>,
    pub progress: Progress,
}

impl Step {
    fn silent() -> Self {
        Self {
            reply: None,
            progress: Progress::Continue,
        }
    }

    fn reply(ack: Packet) -> Self {
        Self {
            reply: Some(ack),
            progress: Progress::Continue,
        }
    }
}

/// Summary handed back once the transfer completes.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub bytes: u64,
    pub stats: ReceiverStats,
    pub history: Vec<ConnectionState>,
}

/// Receive-side connection record.
#[derive(Debug)]
pub struct Receiver {
    config: ReceiverConfig,
    lifecycle: Lifecycle,
    /// Initial sequence number learned from the peer's SYN.
    isn: u16,
    /// Next byte expected; the left edge of the receive window.
    nbe: u16,
    /// Last byte delivered to the application.
    lb_read: u16,
    /// Right edge of data admitted, in order or parked.
    lb_received: u16,
    /// Window advertised in the most recent ACK.
    rwnd: u16,
    queue: ReassemblyQueue,
    stats: ReceiverStats,
}

impl Receiver {
    /// A receiver in `LISTEN`, waiting for the peer's SYN.
    pub fn new(config: ReceiverConfig) -> Result<Self> {
        config.validate()?;
        let mut lifecycle = Lifecycle::new(Role::Receiver);
        lifecycle.advance(ConnectionState::Listen)?;
        Ok(Self {
            rwnd: config.max_window,
            config,
            lifecycle,
            isn: 0,
            nbe: 1,
            lb_read: 0,
            lb_received: 0,
            queue: ReassemblyQueue::new(),
            stats: ReceiverStats::default(),
        })
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

    pub fn next_expected(&self) -> u16 {
        self.nbe
    }

    pub fn last_byte_read(&self) -> u16 {
        self.lb_read
    }

    pub fn last_byte_received(&self) -> u16 {
        self.lb_received
    }

    pub fn window(&self) -> u16 {
        self.rwnd
    }

    /// Segments currently parked out of order.
    pub fn parked(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Process one raw datagram.
    ///
    /// A checksum mismatch is swallowed here: no reply, no state change.
    /// Every other failure is fatal and must be followed by [`Self::abort`].
    pub fn on_datagram<W: Write>(&mut self, datagram: &[u8], sink: &mut W) -> Result<Step> {
        match Packet::parse(datagram) {
            Ok(packet) => self.on_packet(&packet, sink),
            Err(PacketError::ChecksumMismatch) => {
                self.stats.checksum_failures += 1;
                log::warn!("[receiver] checksum mismatch; ignoring packet");
                Ok(Step::silent())
            }
            Err(e) => Err(StpError::Malformed(e)),
        }
    }

    /// Process one verified packet.
    pub fn on_packet<W: Write>(&mut self, packet: &Packet, sink: &mut W) -> Result<Step> {
        use ConnectionState::*;

        let state = self.state();
        let seqno = packet.header.seq;

        match (state, packet.packet_type()) {
            (Listen, Some(PacketType::Syn)) => self.on_syn(seqno),
            (Listen, _) => Err(StpError::violation(state, "expected SYN")),

            (Established, Some(PacketType::Reset)) => {
                log::warn!("[receiver] reset received from sender");
                Err(StpError::PeerReset)
            }
            (Established, Some(PacketType::Syn)) if seqno == self.isn => {
                // Our ACK of the SYN was lost; answer the retransmission.
                log::debug!("[receiver] duplicate SYN {seqno}; re-acknowledging");
                Ok(Step::reply(self.ack(seq::plus(self.isn, 1))))
            }
            (Established, Some(PacketType::Syn)) => Err(StpError::violation(
                state,
                format!("SYN {seqno} does not match ISN {}", self.isn),
            )),
            (Established, Some(PacketType::Fin)) => self.on_fin(seqno),
            (Established, Some(PacketType::Data)) => self.on_data(seqno, &packet.payload, sink),
            (Established, other) => Err(StpError::violation(
                state,
                format!("unexpected {} segment", other.map_or("unknown", PacketType::tag)),
            )),

            (TimeWait, Some(PacketType::Fin)) if seqno == self.nbe => {
                log::debug!("[receiver] retransmitted FIN {seqno}; re-acknowledging");
                Ok(Step::reply(self.ack(seq::plus(self.nbe, 1))))
            }
            (TimeWait, _) => Err(StpError::violation(state, "only the FIN may be repeated")),

            (Closed | SynSent | Closing, _) => Err(StpError::BadState(state)),
        }
    }

    fn on_syn(&mut self, seqno: u16) -> Result<Step> {
        self.isn = seqno;
        self.lb_read = seqno;
        self.lb_received = seqno;
        self.nbe = seq::plus(seqno, 1);
        self.rwnd = self.config.max_window;
        self.lifecycle.advance(ConnectionState::Established)?;
        self.stats.handshakes += 1;
        log::info!("[receiver] connection from ISN {seqno} accepted");
        Ok(Step::reply(self.ack(self.nbe)))
    }

    fn on_fin(&mut self, seqno: u16) -> Result<Step> {
        if seqno != self.nbe {
            return Err(StpError::violation(
                self.state(),
                format!("FIN {seqno} arrived before byte {}", self.nbe),
            ));
        }
        self.lifecycle.advance(ConnectionState::TimeWait)?;
        // The FIN occupies one sequence number; NBE itself keeps counting
        // data only, so a retransmitted FIN still matches it.
        Ok(Step {
            reply: Some(self.ack(seq::plus(self.nbe, 1))),
            progress: Progress::Complete,
        })
    }

    fn on_data<W: Write>(&mut self, seqno: u16, payload: &[u8], sink: &mut W) -> Result<Step> {
        let max_window = self.config.max_window;
        let lba = seq::plus(self.lb_read, max_window);
        let last_byte = seq::minus(seq::segment_end(seqno, payload.len()), 1);

        if seq::greater(self.nbe, seqno) {
            self.stats.duplicates += 1;
            log::debug!("[receiver] duplicate segment {seqno} (expecting {})", self.nbe);
        } else if seq::greater(seqno, lba) {
            return Err(StpError::FlowControl(format!(
                "segment {seqno} lies beyond the last acceptable byte {lba}"
            )));
        } else if seqno == self.nbe {
            sink.write_all(payload)?;
            self.stats.in_order += 1;
            self.stats.bytes_delivered += payload.len() as u64;
            if seq::greater(last_byte, self.lb_received) {
                self.lb_received = last_byte;
            }

            let mut next = seq::segment_end(seqno, payload.len());
            while let Some(parked) = self.queue.take_if_present(next) {
                log::debug!("[receiver] draining parked segment {next} ({} bytes)", parked.len());
                sink.write_all(&parked)?;
                self.stats.drained += 1;
                self.stats.bytes_delivered += parked.len() as u64;
                next = seq::segment_end(next, parked.len());
            }

            self.nbe = next;
            self.lb_read = seq::minus(next, 1);
        } else {
            if self.queue.insert(seqno, payload) {
                self.stats.out_of_order += 1;
                log::debug!("[receiver] parked segment {seqno} (expecting {})", self.nbe);
            } else {
                self.stats.duplicates += 1;
            }
            if seq::greater(last_byte, self.lb_received) {
                self.lb_received = last_byte;
            }
        }

        let held = seq::minus(self.lb_received, self.lb_read);
        if held > max_window {
            return Err(StpError::FlowControl(format!(
                "{held} bytes held exceeds the {max_window}-byte window"
            )));
        }
        self.rwnd = max_window - held;
        log::debug!(
            "[receiver] rwnd adjusted to {} ({} bytes parked)",
            self.rwnd,
            self.queue.buffered_bytes()
        );

        Ok(Step::reply(self.ack(self.nbe)))
    }

    fn ack(&self, seqno: u16) -> Packet {
        Packet::control(PacketType::Ack, self.rwnd, seqno)
    }

    /// Run the receive loop until the transfer completes or fails.
    ///
    /// On completion the loop lingers in `TIME_WAIT` for the configured
    /// period, re-acknowledging retransmitted FINs, then closes.  Every fatal
    /// error goes through [`Self::abort`].
    pub async fn run<T, W>(&mut self, transport: &mut T, sink: &mut W) -> Result<TransferReport>
    where
        T: Transport,
        W: Write,
    {
        match self.drive(transport, sink).await {
            Ok(()) => {
                self.linger(transport, sink).await;
                self.lifecycle.close();
                log::info!(
                    "[receiver] transfer complete: {} bytes",
                    self.stats.bytes_delivered
                );
                Ok(TransferReport {
                    bytes: self.stats.bytes_delivered,
                    stats: self.stats,
                    history: self.lifecycle.history().to_vec(),
                })
            }
            Err(e) => Err(self.abort(transport, e).await),
        }
    }

    async fn drive<T, W>(&mut self, transport: &mut T, sink: &mut W) -> Result<()>
    where
        T: Transport,
        W: Write,
    {
        let mut buf = [0u8; MTU];
        loop {
            let n = transport.recv_segment(&mut buf).await?;
            let step = self.on_datagram(&buf[..n], sink)?;
            if let Some(ack) = &step.reply {
                transport.send_packet(ack).await?;
                self.stats.acks_sent += 1;
            }
            if step.progress == Progress::Complete {
                sink.flush()?;
                return Ok(());
            }
        }
    }

    async fn linger<T, W>(&mut self, transport: &mut T, sink: &mut W)
    where
        T: Transport,
        W: Write,
    {
        let deadline = Instant::now() + self.config.time_wait;
        let mut buf = [0u8; MTU];
        loop {
            let n = match transport.recv_segment_until(&mut buf, deadline).await {
                Ok(Some(n)) => n,
                Ok(None) => return,
                Err(e) => {
                    log::debug!("[receiver] transport closed during TIME_WAIT: {e}");
                    return;
                }
            };
            match self.on_datagram(&buf[..n], sink) {
                Ok(Step { reply: Some(ack), .. }) => {
                    if transport.send_packet(&ack).await.is_err() {
                        return;
                    }
                    self.stats.acks_sent += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    log::warn!("[receiver] {e} after completion; resetting");
                    let _ = transport.send_segment(PacketType::Reset, 0, 0, &[]).await;
                    return;
                }
            }
        }
    }

    /// Tear the connection down: best-effort RESET to the peer, release the
    /// record, and hand back the error for the caller.
    pub async fn abort<T: Transport>(&mut self, transport: &mut T, err: StpError) -> StpError {
        log::error!("[receiver] {err}; resetting connection");
        if let Err(e) = transport.send_segment(PacketType::Reset, 0, 0, &[]).await {
            log::debug!("[receiver] could not send RESET: {e}");
        }
        self.queue.clear();
        self.lifecycle.close();
        err
    }
}

/// Accept one connection on `transport` and write its byte stream to `sink`.
pub async fn receive<T, W>(
    transport: &mut T,
    config: ReceiverConfig,
    sink: &mut W,
) -> Result<TransferReport>
where
    T: Transport,
    W: Write,
{
    let mut receiver = Receiver::new(config)?;
    receiver.run(transport, sink).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::MemoryTransport;
    use std::time::Duration;

    const WINDOW: u16 = 5000;

    fn dgram(kind: PacketType, seqno: u16, payload: &[u8]) -> Vec<u8> {
        Packet::new(kind, 0, seqno, payload.to_vec()).encode().unwrap()
    }

    /// A receiver that has accepted SYN `isn`.
    fn established(isn: u16) -> (Receiver, Vec<u8>) {
        let mut rx = Receiver::new(ReceiverConfig::default()).unwrap();
        let mut out = Vec::new();
        rx.on_datagram(&dgram(PacketType::Syn, isn, &[]), &mut out)
            .unwrap();
        (rx, out)
    }

    fn data(rx: &mut Receiver, out: &mut Vec<u8>, seqno: u16, payload: &[u8]) -> Packet {
        rx.on_datagram(&dgram(PacketType::Data, seqno, payload), out)
            .unwrap()
            .reply
            .expect("accepted data must be acknowledged")
    }

    #[test]
    fn starts_in_listen() {
        let rx = Receiver::new(ReceiverConfig::default()).unwrap();
        assert_eq!(rx.state(), ConnectionState::Listen);
        assert_eq!(rx.window(), WINDOW);
    }

    #[test]
    fn syn_establishes_and_is_acknowledged() {
        let mut rx = Receiver::new(ReceiverConfig::default()).unwrap();
        let mut out = Vec::new();
        let step = rx.on_datagram(&dgram(PacketType::Syn, 41, &[]), &mut out).unwrap();

        let ack = step.reply.unwrap();
        assert_eq!(ack.packet_type(), Some(PacketType::Ack));
        assert_eq!(ack.header.seq, 42);
        assert_eq!(ack.header.window, WINDOW);
        assert_eq!(rx.state(), ConnectionState::Established);
        assert_eq!(rx.isn(), 41);
        assert_eq!(rx.last_byte_read(), 41);
        assert_eq!(rx.next_expected(), 42);
        assert_eq!(rx.stats().handshakes, 1);
    }

    #[test]
    fn non_syn_in_listen_is_a_violation() {
        let mut rx = Receiver::new(ReceiverConfig::default()).unwrap();
        let err = rx
            .on_datagram(&dgram(PacketType::Data, 1, b"early"), &mut Vec::<u8>::new())
            .unwrap_err();
        assert!(matches!(
            err,
            StpError::ProtocolViolation { state: ConnectionState::Listen, .. }
        ));
    }

    #[test]
    fn duplicate_syn_is_reacknowledged() {
        let (mut rx, mut out) = established(100);
        let step = rx.on_datagram(&dgram(PacketType::Syn, 100, &[]), &mut out).unwrap();
        assert_eq!(step.reply.unwrap().header.seq, 101);
        assert_eq!(rx.state(), ConnectionState::Established);
        assert_eq!(rx.stats().handshakes, 1);
    }

    #[test]
    fn foreign_syn_is_a_violation() {
        let (mut rx, mut out) = established(100);
        assert!(rx.on_datagram(&dgram(PacketType::Syn, 7, &[]), &mut out).is_err());
    }

    #[test]
    fn in_order_data_is_delivered() {
        let (mut rx, mut out) = established(0);
        let ack = data(&mut rx, &mut out, 1, b"hello");
        assert_eq!(out, b"hello");
        assert_eq!(ack.header.seq, 6);
        assert_eq!(ack.header.window, WINDOW);
        assert_eq!(rx.last_byte_read(), 5);
    }

    #[test]
    fn duplicate_data_is_delivered_once_and_acked_twice() {
        let (mut rx, mut out) = established(0);
        let first = data(&mut rx, &mut out, 1, b"0123456789");
        let second = data(&mut rx, &mut out, 1, b"0123456789");
        assert_eq!(out, b"0123456789");
        assert_eq!(first.header.seq, 11);
        assert_eq!(second.header.seq, 11);
        assert_eq!(rx.stats().duplicates, 1);
    }

    #[test]
    fn gap_is_parked_then_drained_in_order() {
        // Data starts at 1000: ranges [0,10), [20,30), [10,20) relative to it.
        let (mut rx, mut out) = established(999);

        let a = data(&mut rx, &mut out, 1000, &[b'a'; 10]);
        assert_eq!(a.header.seq, 1010);

        let c = data(&mut rx, &mut out, 1020, &[b'c'; 10]);
        assert_eq!(c.header.seq, 1010, "ACK must not advance past the gap");
        assert_eq!(c.header.window, WINDOW - 20);
        assert_eq!(rx.parked(), 1);
        assert_eq!(out.len(), 10);

        let b = data(&mut rx, &mut out, 1010, &[b'b'; 10]);
        assert_eq!(b.header.seq, 1030);
        assert_eq!(b.header.window, WINDOW);
        assert_eq!(rx.parked(), 0);

        let mut expected = vec![b'a'; 10];
        expected.extend([b'b'; 10]);
        expected.extend([b'c'; 10]);
        assert_eq!(out, expected);
        assert_eq!(rx.next_expected(), 1030);
        assert_eq!(rx.last_byte_read(), 1029);
        assert_eq!(rx.stats().drained, 1);
    }

    #[test]
    fn repeated_out_of_order_segment_is_stored_once() {
        let (mut rx, mut out) = established(0);
        data(&mut rx, &mut out, 11, b"later");
        data(&mut rx, &mut out, 11, b"later");
        assert_eq!(rx.parked(), 1);
        data(&mut rx, &mut out, 1, b"0123456789");
        assert_eq!(out, b"0123456789later");
    }

    #[test]
    fn segment_beyond_window_aborts_without_delivery() {
        let (mut rx, mut out) = established(0);
        let err = rx
            .on_datagram(&dgram(PacketType::Data, WINDOW + 1, b"x"), &mut out)
            .unwrap_err();
        assert!(matches!(err, StpError::FlowControl(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn segment_overrunning_window_edge_aborts() {
        let (mut rx, mut out) = established(0);
        // Starts exactly at the last acceptable byte but runs past it.
        let err = rx
            .on_datagram(&dgram(PacketType::Data, WINDOW, &[0u8; 10]), &mut out)
            .unwrap_err();
        assert!(matches!(err, StpError::FlowControl(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn data_across_sequence_wrap() {
        let (mut rx, mut out) = established(65_530);
        let ack = data(&mut rx, &mut out, 65_531, b"abcdef");
        assert_eq!(ack.header.seq, 1);
        let ack = data(&mut rx, &mut out, 1, b"gh");
        assert_eq!(ack.header.seq, 3);
        assert_eq!(out, b"abcdefgh");
        assert_eq!(rx.last_byte_read(), 2);
    }

    #[test]
    fn parked_segment_across_wrap_is_drained() {
        let (mut rx, mut out) = established(65_525);
        data(&mut rx, &mut out, 5, b"tail");
        let ack = data(&mut rx, &mut out, 65_526, &[b'x'; 15]);
        assert_eq!(ack.header.seq, 9);
        assert_eq!(&out[15..], b"tail");
    }

    #[test]
    fn fin_completes_and_acks_one_past_nbe() {
        let (mut rx, mut out) = established(0);
        data(&mut rx, &mut out, 1, b"abc");
        let step = rx.on_datagram(&dgram(PacketType::Fin, 4, &[]), &mut out).unwrap();
        assert_eq!(step.progress, Progress::Complete);
        assert_eq!(step.reply.unwrap().header.seq, 5);
        assert_eq!(rx.state(), ConnectionState::TimeWait);
        assert_eq!(rx.next_expected(), 4, "NBE counts data only");
    }

    #[test]
    fn early_fin_is_a_violation() {
        let (mut rx, mut out) = established(0);
        data(&mut rx, &mut out, 11, b"parked");
        assert!(rx.on_datagram(&dgram(PacketType::Fin, 20, &[]), &mut out).is_err());
    }

    #[test]
    fn time_wait_reacks_fin_and_rejects_anything_else() {
        let (mut rx, mut out) = established(0);
        rx.on_datagram(&dgram(PacketType::Fin, 1, &[]), &mut out).unwrap();

        let step = rx.on_datagram(&dgram(PacketType::Fin, 1, &[]), &mut out).unwrap();
        assert_eq!(step.reply.unwrap().header.seq, 2);
        assert_eq!(step.progress, Progress::Continue);
        assert_eq!(rx.lifecycle().terminal_entries(), 1);

        assert!(rx.on_datagram(&dgram(PacketType::Data, 1, b"x"), &mut out).is_err());
        assert!(rx.on_datagram(&dgram(PacketType::Fin, 9, &[]), &mut out).is_err());
    }

    #[test]
    fn reset_aborts() {
        let (mut rx, mut out) = established(0);
        let err = rx
            .on_datagram(&dgram(PacketType::Reset, 0, &[]), &mut out)
            .unwrap_err();
        assert!(matches!(err, StpError::PeerReset));
    }

    #[test]
    fn ack_from_sender_is_a_violation() {
        let (mut rx, mut out) = established(0);
        assert!(rx.on_datagram(&dgram(PacketType::Ack, 1, &[]), &mut out).is_err());
    }

    #[test]
    fn corrupted_datagram_is_dropped_silently() {
        let (mut rx, mut out) = established(0);
        let mut bytes = dgram(PacketType::Data, 1, b"payload");
        bytes[9] ^= 0x10;
        let step = rx.on_datagram(&bytes, &mut out).unwrap();
        assert_eq!(step, Step::silent());
        assert!(out.is_empty());
        assert_eq!(rx.next_expected(), 1);
        assert_eq!(rx.stats().checksum_failures, 1);
    }

    #[test]
    fn short_datagram_is_malformed() {
        let (mut rx, mut out) = established(0);
        let err = rx.on_datagram(&[0, 1, 2], &mut out).unwrap_err();
        assert!(matches!(err, StpError::Malformed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_loop_completes_a_transfer() {
        let (mut near, mut peer) = MemoryTransport::pair();
        let config = ReceiverConfig {
            time_wait: Duration::from_millis(100),
            ..Default::default()
        };
        let task = tokio::spawn(async move {
            let mut out = Vec::new();
            let report = receive(&mut near, config, &mut out).await;
            (report, out)
        });

        let mut buf = [0u8; MTU];
        let script = [
            (PacketType::Syn, 9, &b""[..], 10),
            (PacketType::Data, 10, &b"stream"[..], 16),
            (PacketType::Fin, 16, &b""[..], 17),
        ];
        for (kind, seqno, payload, acked) in script {
            peer.send_segment(kind, 0, seqno, payload).await.unwrap();
            let n = peer.recv_segment(&mut buf).await.unwrap();
            let ack = Packet::parse(&buf[..n]).unwrap();
            assert_eq!(ack.packet_type(), Some(PacketType::Ack));
            assert_eq!(ack.header.seq, acked);
        }

        let (report, out) = task.await.unwrap();
        let report = report.unwrap();
        assert_eq!(out, b"stream");
        assert_eq!(report.bytes, 6);
        assert_eq!(report.stats.acks_sent, 3);
        assert_eq!(
            report.history,
            vec![
                ConnectionState::Closed,
                ConnectionState::Listen,
                ConnectionState::Established,
                ConnectionState::TimeWait,
                ConnectionState::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn fatal_error_sends_reset() {
        let (mut near, mut peer) = MemoryTransport::pair();
        let task = tokio::spawn(async move {
            receive(&mut near, ReceiverConfig::default(), &mut Vec::<u8>::new()).await
        });

        peer.send_segment(PacketType::Data, 0, 1, b"no handshake")
            .await
            .unwrap();
        let mut buf = [0u8; MTU];
        let n = peer.recv_segment(&mut buf).await.unwrap();
        assert_eq!(
            Packet::parse(&buf[..n]).unwrap().packet_type(),
            Some(PacketType::Reset)
        );
        assert!(matches!(
            task.await.unwrap(),
            Err(StpError::ProtocolViolation { .. })
        ));
    }

    #[tokio::test]
    async fn stray_data_in_time_wait_resets_and_ends_the_linger() {
        let (mut near, mut peer) = MemoryTransport::pair();
        let config = ReceiverConfig {
            time_wait: Duration::from_secs(600),
            ..Default::default()
        };
        let task = tokio::spawn(async move {
            let mut out = Vec::new();
            let report = receive(&mut near, config, &mut out).await;
            (report, out)
        });

        let mut buf = [0u8; MTU];
        for (kind, seqno, acked) in [(PacketType::Syn, 99, 100), (PacketType::Fin, 100, 101)] {
            peer.send_segment(kind, 0, seqno, &[]).await.unwrap();
            let n = peer.recv_segment(&mut buf).await.unwrap();
            assert_eq!(Packet::parse(&buf[..n]).unwrap().header.seq, acked);
        }

        peer.send_segment(PacketType::Data, 0, 100, b"late").await.unwrap();
        let n = peer.recv_segment(&mut buf).await.unwrap();
        let reset = Packet::parse(&buf[..n]).unwrap();
        assert_eq!(reset.packet_type(), Some(PacketType::Reset));
        assert_eq!((reset.header.window, reset.header.seq), (0, 0));

        // The linger must end well before its ten-minute deadline.
        let (report, out) = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("linger did not stop after the RESET")
            .unwrap();
        let report = report.expect("completed transfer is still reported");
        assert!(out.is_empty());
        assert_eq!(report.bytes, 0);
        assert_eq!(report.history.last(), Some(&ConnectionState::Closed));
    }
}
