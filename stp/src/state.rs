//! Connection finite-state machine (FSM) types.
//!
//! Both engines share this vocabulary.  The receiver walks
//! `CLOSED → LISTEN → ESTABLISHED → TIME_WAIT`, the sender walks
//! `CLOSED → SYN_SENT → ESTABLISHED → CLOSING`, and either may drop to
//! `CLOSED` from anywhere when the connection is torn down.
//!
//! ```text
//!  receiver:  CLOSED ──open──▶ LISTEN ──SYN──▶ ESTABLISHED ──FIN──▶ TIME_WAIT
//!  sender:    CLOSED ──SYN──▶ SYN_SENT ──ACK──▶ ESTABLISHED ──close──▶ CLOSING
//!                 ▲                                                      │
//!                 └──────────────── reset / release ─────────────────────┘
//! ```
//!
//! The transitions themselves are driven by [`crate::receiver`] and
//! [`crate::sender`]; [`Lifecycle`] only checks them against the table and
//! records the path taken.

use std::fmt;

use crate::error::{Result, StpError};

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and final state.
    #[default]
    Closed,
    /// Receiver waiting for the peer's SYN.
    Listen,
    /// Sender has sent SYN and waits for its ACK.
    SynSent,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Sender has sent FIN and waits for its ACK.
    Closing,
    /// Receiver has acknowledged the FIN; only retransmitted FINs are valid.
    TimeWait,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "CLOSED",
            ConnectionState::Listen => "LISTEN",
            ConnectionState::SynSent => "SYN_SENT",
            ConnectionState::Established => "ESTABLISHED",
            ConnectionState::Closing => "CLOSING",
            ConnectionState::TimeWait => "TIME_WAIT",
        };
        f.write_str(name)
    }
}

/// Which end of the transfer a [`Lifecycle`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => f.write_str("sender"),
            Role::Receiver => f.write_str("receiver"),
        }
    }
}

impl Role {
    /// The legal forward transitions for this role.
    pub fn allows(self, from: ConnectionState, to: ConnectionState) -> bool {
        use ConnectionState::*;

        if to == Closed {
            return true;
        }
        match self {
            Role::Receiver => matches!(
                (from, to),
                (Closed, Listen) | (Listen, Established) | (Established, TimeWait)
            ),
            Role::Sender => matches!(
                (from, to),
                (Closed, SynSent) | (SynSent, Established) | (Established, Closing)
            ),
        }
    }

    /// State in which this role's transfer is considered finished.
    pub fn terminal(self) -> ConnectionState {
        match self {
            Role::Sender => ConnectionState::Closing,
            Role::Receiver => ConnectionState::TimeWait,
        }
    }
}

/// Outcome of feeding one inbound event to an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep going.
    Continue,
    /// The transfer is complete (receiver processed a valid FIN).
    Complete,
}

/// Current state of one connection plus the path it has taken.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    role: Role,
    state: ConnectionState,
    history: Vec<ConnectionState>,
}

impl Lifecycle {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            state: ConnectionState::Closed,
            history: vec![ConnectionState::Closed],
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Every state entered so far, in order, starting with `CLOSED`.
    pub fn history(&self) -> &[ConnectionState] {
        &self.history
    }

    /// How many times the role's terminal state has been entered.
    pub fn terminal_entries(&self) -> usize {
        let terminal = self.role.terminal();
        self.history.iter().filter(|s| **s == terminal).count()
    }

    /// Move to `next`, rejecting transitions outside the role's table.
    pub fn advance(&mut self, next: ConnectionState) -> Result<()> {
        if !self.role.allows(self.state, next) {
            return Err(StpError::BadState(self.state));
        }
        log::info!("[{}] {} → {}", self.role, self.state, next);
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Drop to `CLOSED`; always legal and idempotent.
    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            log::info!("[{}] {} → {}", self.role, self.state, ConnectionState::Closed);
            self.state = ConnectionState::Closed;
            self.history.push(ConnectionState::Closed);
        }
    }

    /// Fail with [`StpError::BadState`] unless the connection is in `expected`.
    pub fn require(&self, expected: ConnectionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(StpError::BadState(self.state))
        }
    }
}
