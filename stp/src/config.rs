//! Engine configuration.
//!
//! Both structs carry protocol defaults via [`Default`]; the binary maps its
//! command-line flags onto them.  [`SenderConfig::validate`] and
//! [`ReceiverConfig::validate`] run when an engine is constructed.

use std::time::Duration;

use crate::error::{Result, StpError};
use crate::packet::MSS;
use crate::seq::MAX_WINDOW;
use crate::timer::RetryPolicy;

/// Receiver window used when none is configured.
pub const DEFAULT_RECEIVE_WINDOW: u16 = 5000;

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Largest payload per segment; at most [`MSS`].
    pub mss: usize,
    /// Size of the retransmission timer table (segments in flight).
    pub max_outstanding: usize,
    pub retry: RetryPolicy,
    /// Fixed initial sequence number; random when `None`.
    pub isn: Option<u16>,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            mss: MSS,
            max_outstanding: 16,
            retry: RetryPolicy::default(),
            isn: None,
        }
    }
}

impl SenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.mss == 0 || self.mss > MSS {
            return Err(StpError::Config(format!(
                "mss must be between 1 and {MSS}, got {}",
                self.mss
            )));
        }
        if self.max_outstanding == 0 {
            return Err(StpError::Config("max_outstanding must be at least 1".into()));
        }
        validate_retry(&self.retry)
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Bytes the receiver will hold beyond the last byte delivered.
    pub max_window: u16,
    /// How long to keep answering retransmitted FINs after completion.
    pub time_wait: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            max_window: DEFAULT_RECEIVE_WINDOW,
            time_wait: Duration::from_secs(2),
        }
    }
}

impl ReceiverConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_window == 0 || self.max_window > MAX_WINDOW {
            return Err(StpError::Config(format!(
                "max_window must be between 1 and {MAX_WINDOW}, got {}",
                self.max_window
            )));
        }
        Ok(())
    }
}

fn validate_retry(retry: &RetryPolicy) -> Result<()> {
    if retry.max_attempts == 0 {
        return Err(StpError::Config("max_attempts must be at least 1".into()));
    }
    if retry.initial_timeout.is_zero() {
        return Err(StpError::Config("initial_timeout must be non-zero".into()));
    }
    Ok(())
}
