//! `stp`: a reliable, unidirectional byte stream over an unreliable
//! datagram channel.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐   SYN / DATA / FIN   ┌──────────┐
//!  │  Sender  │─────────────────────▶│ Receiver │──▶ sink (io::Write)
//!  └────┬─────┘                      └─────┬────┘
//!       │◀──────── ACK / RESET ────────────┘
//!       │                                  │
//!  ┌────▼──────────────────────────────────▼────┐
//!  │        Transport (UDP, in-memory pipe,     │
//!  │        or a Simulator wrapping either)     │
//!  └────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`seq`]         — wraparound-safe arithmetic on 16-bit sequence numbers
//! - [`packet`]      — wire format (serialise / deserialise / checksum)
//! - [`reassembly`]  — out-of-order data parked until the gap closes
//! - [`receiver`]    — LISTEN → ESTABLISHED → TIME_WAIT engine and receive loop
//! - [`sender`]      — SYN_SENT → ESTABLISHED → CLOSING engine
//! - [`timer`]       — per-segment retransmission deadlines with backoff
//! - [`state`]       — connection states and legal transitions per role
//! - [`socket`]      — datagram transport abstraction
//! - [`simulator`]   — loss / reorder / corruption injection for testing
//! - [`config`], [`error`] — engine configuration and error taxonomy

pub mod config;
pub mod error;
pub mod packet;
pub mod reassembly;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;

pub use config::{ReceiverConfig, SenderConfig};
pub use error::{Result, StpError};
pub use receiver::{receive, Receiver, TransferReport};
pub use sender::{CloseReport, Sender};
pub use simulator::{Simulator, SimulatorConfig};
pub use socket::{MemoryTransport, Transport, UdpTransport};
pub use state::ConnectionState;
pub use timer::RetryPolicy;
