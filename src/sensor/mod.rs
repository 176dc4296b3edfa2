//! Heart-rate sensor feed.
//!
//! The pulse sampler turns SAADC samples into beats with [`BeatDetector`]
//! and publishes every BPM update into a [`PulseFeed`]. Consumers (the
//! capture session and heart-rate telemetry) each get their own slot, so
//! one never steals a beat from the other.

pub mod beat;

#[cfg(feature = "embedded")]
pub mod saadc;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;

pub use beat::BeatDetector;

/// One beat-driven BPM update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Reading {
    pub bpm: u16,
    pub valid: bool,
}

/// Non-blocking source of beats.
pub trait HeartRateSensor {
    /// The reading of a beat seen since the last poll, if any.
    fn poll(&mut self) -> Option<Reading>;
}

/// Fan-out of beat readings to the session and telemetry consumers.
///
/// Each slot holds only the latest reading; an unread one is overwritten.
pub struct PulseFeed<M: RawMutex> {
    session: Signal<M, Reading>,
    telemetry: Signal<M, Reading>,
}

impl<M: RawMutex> Default for PulseFeed<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> PulseFeed<M> {
    pub const fn new() -> Self {
        Self {
            session: Signal::new(),
            telemetry: Signal::new(),
        }
    }

    pub fn publish(&self, reading: Reading) {
        self.session.signal(reading);
        self.telemetry.signal(reading);
    }

    /// Polling view for the capture session.
    pub fn session_sensor(&self) -> FeedSensor<'_, M> {
        FeedSensor {
            slot: &self.session,
        }
    }

    /// Wait for the next reading on the telemetry slot.
    pub async fn next_for_telemetry(&self) -> Reading {
        self.telemetry.wait().await
    }
}

/// [`HeartRateSensor`] backed by one [`PulseFeed`] slot.
pub struct FeedSensor<'a, M: RawMutex> {
    slot: &'a Signal<M, Reading>,
}

impl<M: RawMutex> HeartRateSensor for FeedSensor<'_, M> {
    fn poll(&mut self) -> Option<Reading> {
        self.slot.try_take()
    }
}
