//! Tunable protocol parameters shared by both roles.
//!
//! The window size is the only value the operator must always supply; the
//! rest default to the values the protocol was designed around (500 ms ACK
//! wait, 1472-byte chunks, five END attempts).

use std::time::Duration;

use thiserror::Error;

use crate::packet::MAX_PAYLOAD;

/// Adjustable protocol parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of unacknowledged DATA packets (sender) and width of
    /// the reorder window (receiver).
    pub window_size: usize,
    /// Largest payload placed in one DATA packet.
    pub max_payload: usize,
    /// How long the sender waits for an ACK before going back N.
    pub ack_timeout: Duration,
    /// START transmissions before the handshake is abandoned.
    pub connect_attempts: u32,
    /// Back-to-back ACK timeouts during transfer before the peer is declared
    /// unresponsive.
    pub max_consecutive_timeouts: u32,
    /// END transmissions before the sender closes without a final ACK.
    pub close_attempts: u32,
    /// How long a closed receiver keeps re-acknowledging duplicate ENDs.
    /// Zero returns as soon as the first END is acknowledged.
    pub linger: Duration,
    /// Longest an established receiver waits for the next datagram.  Reset
    /// whenever in-order DATA advances the cumulative ACK point.
    pub idle_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: 4,
            max_payload: MAX_PAYLOAD,
            ack_timeout: Duration::from_millis(500),
            connect_attempts: 20,
            max_consecutive_timeouts: 20,
            close_attempts: 5,
            linger: Duration::ZERO,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Reasons a [`Config`] is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size must be at least 1")]
    ZeroWindow,
    #[error("max payload {0} is outside 1..={MAX_PAYLOAD}")]
    PayloadOutOfRange(usize),
    #[error("ack timeout must be non-zero")]
    ZeroTimeout,
    #[error("idle timeout must be non-zero")]
    ZeroIdleTimeout,
    #[error("{0} must be at least 1")]
    ZeroAttempts(&'static str),
}

impl Config {
    /// Default parameters with the given window size.
    pub fn with_window(window_size: usize) -> Self {
        Self {
            window_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::ZeroWindow);
        }
        if !(1..=MAX_PAYLOAD).contains(&self.max_payload) {
            return Err(ConfigError::PayloadOutOfRange(self.max_payload));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.idle_timeout.is_zero() {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        for (name, value) in [
            ("connect_attempts", self.connect_attempts),
            ("max_consecutive_timeouts", self.max_consecutive_timeouts),
            ("close_attempts", self.close_attempts),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroAttempts(name));
            }
        }
        Ok(())
    }
}
