//! Finite-state-machine types for both roles.
//!
//! State transitions are *not* implemented here (they live in
//! [`crate::receiver`] and [`crate::connection`]), but the legal transitions
//! are documented on each variant.

/// Receiver connection lifecycle.
///
/// ```text
///  AWAITING_START ──START──▶ ESTABLISHED ──END──▶ CLOSED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverState {
    /// No START seen yet; everything except START is dropped.
    #[default]
    AwaitingStart,
    /// START acknowledged; DATA is buffered and delivered in order.
    Established,
    /// END acknowledged; `delivered` is final.
    Closed,
}

/// Sender transfer lifecycle.
///
/// ```text
///  IDLE ──▶ CONNECTING ──ACK──▶ TRANSFERRING ──all acked──▶ CLOSING ──▶ DONE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// START sent; waiting for any ACK.
    Connecting,
    /// Sliding the window over the message chunks.
    Transferring,
    /// Every chunk acknowledged; END sent, waiting for its ACK.
    Closing,
    /// Transfer finished; the socket may be released.
    Done,
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for SenderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
