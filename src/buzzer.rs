//! Piezo buzzer driven as a square wave on a GPIO.
//!
//! A trigger plays `BUZZER_BEEPS` beeps of `BUZZER_BEEP_MS` at
//! `BUZZER_TONE_HZ`, separated by `BUZZER_GAP_MS` of silence. Triggers
//! that arrive while a pattern plays are folded into one replay.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::signal::Signal;

use crate::config::{BUZZER_BEEP_MS, BUZZER_TONE_HZ};

pub trait Buzzer {
    fn trigger(&self);
}

/// Square-wave timing for one beep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToneTiming {
    /// Time the pin stays high, then low, per cycle.
    pub half_period_us: u64,
    /// Cycles per beep.
    pub cycles: u64,
}

pub const fn tone_timing(tone_hz: u32, beep_ms: u64) -> ToneTiming {
    ToneTiming {
        half_period_us: 500_000 / tone_hz as u64,
        cycles: beep_ms * tone_hz as u64 / 1_000,
    }
}

pub const BEEP: ToneTiming = tone_timing(BUZZER_TONE_HZ, BUZZER_BEEP_MS);

/// Trigger handed to other tasks; the buzzer task waits on it.
pub struct BuzzerRequest<M: RawMutex> {
    signal: Signal<M, ()>,
}

impl<M: RawMutex> Default for BuzzerRequest<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> BuzzerRequest<M> {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    pub async fn wait(&self) {
        self.signal.wait().await
    }

    pub fn is_pending(&self) -> bool {
        self.signal.signaled()
    }
}

impl<M: RawMutex> Buzzer for BuzzerRequest<M> {
    fn trigger(&self) {
        self.signal.signal(());
    }
}

#[cfg(feature = "embedded")]
pub use task::buzzer_task;

#[cfg(feature = "embedded")]
mod task {
    use embassy_nrf::gpio::Output;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_time::{Duration, Timer};

    use super::{BuzzerRequest, BEEP};
    use crate::config::{BUZZER_BEEPS, BUZZER_GAP_MS};

    #[embassy_executor::task]
    pub async fn buzzer_task(
        mut pin: Output<'static>,
        request: &'static BuzzerRequest<CriticalSectionRawMutex>,
    ) {
        pin.set_low();
        let half_period = Duration::from_micros(BEEP.half_period_us);

        loop {
            request.wait().await;
            info!("buzzer: on");
            for _ in 0..BUZZER_BEEPS {
                for _ in 0..BEEP.cycles {
                    pin.set_high();
                    Timer::after(half_period).await;
                    pin.set_low();
                    Timer::after(half_period).await;
                }
                Timer::after_millis(BUZZER_GAP_MS).await;
            }
            pin.set_low();
            info!("buzzer: off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn two_khz_beep_timing() {
        assert_eq!(
            BEEP,
            ToneTiming {
                half_period_us: 250,
                cycles: 400
            }
        );
    }

    #[test]
    fn triggers_coalesce() {
        let request: BuzzerRequest<NoopRawMutex> = BuzzerRequest::new();
        assert!(!request.is_pending());
        request.trigger();
        request.trigger();
        assert!(request.is_pending());
    }
}
