//! Retransmission timers.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RetryPolicy`]: the timeout for each attempt, doubling per attempt
//!   (1s, 2s, 4s by default) with a fixed attempt budget.
//! - [`RetransmitTimers`]: one deadline per outstanding segment, keyed by
//!   the segment's sequence number.
//!
//! The table has a single writer, the sender task.  An ACK that arrives
//! before expiry processing cancels its entries first, so a segment whose
//! data is acknowledged is never retransmitted afterwards.
//!
//! Deadlines use [`tokio::time::Instant`] so tests can run against tokio's
//! paused clock.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::seq;

/// Timeout schedule shared by the handshake, data segments and FIN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Timeout after the first transmission.
    pub initial_timeout: Duration,
    /// Transmissions allowed before the packet is declared lost for good.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_timeout: Duration::from_millis(1000),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Timeout that follows transmission number `attempt` (1-based).
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        let doublings = attempt.saturating_sub(1).min(16);
        self.initial_timeout.saturating_mul(1 << doublings)
    }

    /// `true` once `attempts` transmissions have all timed out.
    pub fn exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}

#[derive(Debug, Clone)]
struct TimerEntry {
    /// First sequence number after the segment's payload.
    end: u16,
    deadline: Instant,
    attempts: u32,
}

/// What the sender must do for one expired timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Resend the segment; `attempt` is the transmission number about to go out.
    Retransmit { seq: u16, attempt: u32 },
    /// The segment's retry budget is spent.
    Exhausted { seq: u16, attempts: u32 },
}

/// Per-segment retransmission deadlines.
#[derive(Debug)]
pub struct RetransmitTimers {
    policy: RetryPolicy,
    capacity: usize,
    entries: HashMap<u16, TimerEntry>,
}

impl RetransmitTimers {
    pub fn new(policy: RetryPolicy, capacity: usize) -> Self {
        Self {
            policy,
            capacity,
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` when no further segment may be put in flight.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Arm the timer for the segment `[seq, end)` after its first transmission.
    ///
    /// Returns `false` and leaves the table unchanged if that segment already
    /// has a timer or the table is full.
    pub fn arm(&mut self, seq: u16, end: u16, now: Instant) -> bool {
        if self.is_full() || self.entries.contains_key(&seq) {
            return false;
        }
        self.entries.insert(
            seq,
            TimerEntry {
                end,
                deadline: now + self.policy.timeout_for(1),
                attempts: 1,
            },
        );
        true
    }

    /// Cancel every timer whose segment ends at or before the cumulative `ack`.
    ///
    /// Returns the cancelled sequence numbers.
    pub fn cancel_acked(&mut self, ack: u16) -> Vec<u16> {
        let acked: Vec<u16> = self
            .entries
            .iter()
            .filter(|(_, e)| seq::less_or_equal(e.end, ack))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &acked {
            self.entries.remove(seq);
        }
        acked
    }

    /// Earliest pending deadline, if any timer is armed.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.deadline).min()
    }

    /// Process every timer whose deadline has passed.
    ///
    /// Live timers are re-armed with the next, doubled, timeout.  Exhausted
    /// timers are removed.  Results come back in deadline order.
    pub fn expire(&mut self, now: Instant) -> Vec<Expiry> {
        let mut due: Vec<(Instant, u16)> = self
            .entries
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(seq, e)| (e.deadline, *seq))
            .collect();
        due.sort();

        let mut out = Vec::with_capacity(due.len());
        for (_, seq) in due {
            let Some(entry) = self.entries.get_mut(&seq) else {
                continue;
            };
            if self.policy.exhausted(entry.attempts) {
                out.push(Expiry::Exhausted {
                    seq,
                    attempts: entry.attempts,
                });
                self.entries.remove(&seq);
            } else {
                entry.attempts += 1;
                entry.deadline = now + self.policy.timeout_for(entry.attempts);
                out.push(Expiry::Retransmit {
                    seq,
                    attempt: entry.attempts,
                });
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
