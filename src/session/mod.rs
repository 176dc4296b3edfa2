//! Heart-rate capture sessions.
//!
//! The tracker asks for a heart rate with `{"cmd":"hr_req"}`. The session
//! task then collects beats for `HR_CAPTURE_WINDOW_MS` and answers with
//! `{"cmd":"hr_done","bpm":N}`. Commands arrive over a bounded queue; a
//! `Cancel` (sent when the link drops) aborts the capture and suppresses
//! the answer.
//!
//! [`HrSession`] is the pure state machine, [`SessionController`] ties it
//! to a sensor and the link's write path, and the `embedded` task drives
//! the controller with real time.

#[cfg(feature = "embedded")]
pub mod task;

use core::fmt::Write;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use heapless::String;

use crate::config::HR_CAPTURE_WINDOW_MS;
use crate::error::{LinkError, SessionError};
use crate::sensor::{HeartRateSensor, Reading};

/// Commands accepted by the session task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HrSessionCommand {
    Start { lap: u8 },
    Cancel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HrSessionState {
    Idle,
    Capturing {
        started_at_ms: u64,
        /// Latest valid BPM seen during this capture.
        last_bpm: Option<u16>,
        lap: u8,
    },
}

/// What a command did to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandOutcome {
    Started,
    NestedStartIgnored,
    Cancelled,
    CancelWhileIdle,
}

/// Outcome of a completed capture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HrResult {
    /// Last valid BPM, or 0 when none was seen.
    pub bpm: u16,
    pub lap: u8,
}

impl HrResult {
    /// Wire frame sent back to the tracker.
    pub fn encode(&self) -> String<32> {
        let mut out = String::new();
        let _ = write!(out, "{{\"cmd\":\"hr_done\",\"bpm\":{}}}", self.bpm);
        out
    }
}

/// Capture state machine. Time is passed in explicitly.
#[derive(Debug)]
pub struct HrSession {
    state: HrSessionState,
}

impl Default for HrSession {
    fn default() -> Self {
        Self::new()
    }
}

impl HrSession {
    pub const fn new() -> Self {
        Self {
            state: HrSessionState::Idle,
        }
    }

    pub fn state(&self) -> HrSessionState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.state, HrSessionState::Capturing { .. })
    }

    pub fn on_command(&mut self, cmd: HrSessionCommand, now_ms: u64) -> CommandOutcome {
        match (self.state, cmd) {
            (HrSessionState::Idle, HrSessionCommand::Start { lap }) => {
                info!("session: capture started for lap {}", lap);
                self.state = HrSessionState::Capturing {
                    started_at_ms: now_ms,
                    last_bpm: None,
                    lap,
                };
                CommandOutcome::Started
            }
            (HrSessionState::Capturing { .. }, HrSessionCommand::Start { lap }) => {
                warn!("session: nested start (lap {}) ignored", lap);
                CommandOutcome::NestedStartIgnored
            }
            (HrSessionState::Capturing { .. }, HrSessionCommand::Cancel) => {
                info!("session: capture cancelled");
                self.state = HrSessionState::Idle;
                CommandOutcome::Cancelled
            }
            (HrSessionState::Idle, HrSessionCommand::Cancel) => {
                debug!("session: cancel while idle");
                CommandOutcome::CancelWhileIdle
            }
        }
    }

    pub fn on_reading(&mut self, reading: Reading) {
        if let HrSessionState::Capturing { last_bpm, .. } = &mut self.state {
            if reading.valid && reading.bpm > 0 {
                *last_bpm = Some(reading.bpm);
            }
        }
    }

    /// Close the capture once its window has elapsed.
    pub fn poll(&mut self, now_ms: u64) -> Option<HrResult> {
        let HrSessionState::Capturing {
            started_at_ms,
            last_bpm,
            lap,
        } = self.state
        else {
            return None;
        };

        if now_ms.saturating_sub(started_at_ms) < HR_CAPTURE_WINDOW_MS {
            return None;
        }
        self.state = HrSessionState::Idle;
        Some(HrResult {
            bpm: last_bpm.unwrap_or(0),
            lap,
        })
    }
}

/// Bounded FIFO of session commands.
///
/// When full, a new `Start` is rejected and the queued ones are kept.
/// `Cancel` bypasses the FIFO: it drops every queued `Start` and is
/// delivered ahead of anything queued after it.
pub struct SessionQueue<M: RawMutex, const N: usize> {
    channel: Channel<M, HrSessionCommand, N>,
    cancel: Signal<M, ()>,
}

impl<M: RawMutex, const N: usize> Default for SessionQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const N: usize> SessionQueue<M, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
            cancel: Signal::new(),
        }
    }

    pub fn start(&self, lap: u8) -> Result<(), SessionError> {
        let cmd = HrSessionCommand::Start { lap };
        self.channel.try_send(cmd).map_err(|_| {
            warn!("session: queue full, dropping {}", cmd);
            SessionError::QueueFull
        })
    }

    /// Abort the running capture. Never refused.
    ///
    /// Starts still queued came from the link being torn down, so they go too.
    pub fn cancel(&self) {
        while let Ok(cmd) = self.channel.try_receive() {
            debug!("session: discarding queued {}", cmd);
        }
        self.cancel.signal(());
    }

    pub async fn receive(&self) -> HrSessionCommand {
        // `select` polls the cancel first.
        match select(self.cancel.wait(), self.channel.receive()).await {
            Either::First(()) => HrSessionCommand::Cancel,
            Either::Second(cmd) => cmd,
        }
    }

    pub fn try_receive(&self) -> Option<HrSessionCommand> {
        if self.cancel.try_take().is_some() {
            return Some(HrSessionCommand::Cancel);
        }
        self.channel.try_receive().ok()
    }
}

/// Write path as seen by the session.
pub trait MessageSink {
    /// Hand `msg` over for transmission. `Ok` means accepted, not delivered.
    fn send(&self, msg: &[u8]) -> Result<(), LinkError>;
}

/// Runs captures against a sensor and reports results through a sink.
pub struct SessionController<'a, S: HeartRateSensor, W: MessageSink> {
    session: HrSession,
    sensor: S,
    sink: &'a W,
}

impl<'a, S: HeartRateSensor, W: MessageSink> SessionController<'a, S, W> {
    pub fn new(sensor: S, sink: &'a W) -> Self {
        Self {
            session: HrSession::new(),
            sensor,
            sink,
        }
    }

    pub fn session(&self) -> &HrSession {
        &self.session
    }

    pub fn is_capturing(&self) -> bool {
        self.session.is_capturing()
    }

    pub fn handle(&mut self, cmd: HrSessionCommand, now_ms: u64) -> CommandOutcome {
        self.session.on_command(cmd, now_ms)
    }

    /// One capture cycle: poll the sensor, then check the window.
    ///
    /// Returns the result when this cycle closed the capture; it has
    /// already been handed to the sink by then.
    pub fn tick(&mut self, now_ms: u64) -> Option<HrResult> {
        if !self.session.is_capturing() {
            return None;
        }
        if let Some(reading) = self.sensor.poll() {
            self.session.on_reading(reading);
        }

        let result = self.session.poll(now_ms)?;
        let msg = result.encode();
        match self.sink.send(msg.as_bytes()) {
            Ok(()) => info!("session: sent hr_done (bpm={})", result.bpm),
            Err(e) => warn!("session: failed to send hr_done: {}", e),
        }
        Some(result)
    }
}
