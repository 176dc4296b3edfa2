//! Error types for pulsetracker.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging.

/// Errors raised by the BLE link and its write path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkError {
    /// No peripheral is connected.
    NotConnected,
    /// Connected, but the RX characteristic has not been discovered.
    NoWriteHandle,
    /// Nothing to send.
    EmptyPayload,
    /// Payload does not fit a single ATT write at the current MTU.
    PayloadTooLarge,
    /// The outbound queue is full.
    Busy,
}

/// Errors raised while decoding workout frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseError {
    /// The frame carries no `"event"` string.
    MissingEvent,
}

/// Errors raised by the heart-rate session queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    /// The command queue is full; the new command was rejected.
    QueueFull,
}
