//! Holding area for data that arrived ahead of the next expected byte.
//!
//! Entries are keyed by the sequence number of their first byte.  Lookups are
//! exact, so the numeric ordering of the map never matters across a wrap.

use std::collections::btree_map::{BTreeMap, Entry};

/// Out-of-order segments waiting for the gap in front of them to close.
#[derive(Debug, Default)]
pub struct ReassemblyQueue {
    entries: BTreeMap<u16, Vec<u8>>,
    buffered: usize,
}

impl ReassemblyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park `payload` under `seq`.
    ///
    /// A key that is already present is left untouched and `false` is
    /// returned; a retransmitted duplicate must not be stored twice.
    pub fn insert(&mut self, seq: u16, payload: &[u8]) -> bool {
        match self.entries.entry(seq) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                self.buffered += payload.len();
                slot.insert(payload.to_vec());
                true
            }
        }
    }

    /// Remove and return the entry keyed exactly at `seq`.
    pub fn take_if_present(&mut self, seq: u16) -> Option<Vec<u8>> {
        let payload = self.entries.remove(&seq)?;
        self.buffered -= payload.len();
        Some(payload)
    }

    /// Number of parked segments.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total payload bytes currently parked.
    pub fn buffered_bytes(&self) -> usize {
        self.buffered
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.buffered = 0;
    }
}
