//! Threshold beat detector for an analog pulse sensor.
//!
//! Samples (millivolts) are smoothed with a 7:3 exponential moving
//! average. A rising edge across `PULSE_THRESHOLD_MV` is a beat; the
//! interval to the previous beat counts only inside
//! `PULSE_MIN_INTERVAL_MS..=PULSE_MAX_INTERVAL_MS`. Once
//! `PULSE_REQUIRED_BEATS` intervals are collected, BPM is 60000 divided by
//! the mean of the last `PULSE_HISTORY` intervals. `PULSE_STALE_MS`
//! without a beat drops the reading and the history.

use crate::config::{
    PULSE_HISTORY, PULSE_MAX_INTERVAL_MS, PULSE_MIN_INTERVAL_MS, PULSE_REQUIRED_BEATS,
    PULSE_STALE_MS, PULSE_THRESHOLD_MV,
};
use crate::sensor::Reading;

pub struct BeatDetector {
    /// 0 means "no sample since the last reset".
    smoothed_mv: u32,
    above: bool,
    last_beat_ms: Option<u64>,
    intervals: [u32; PULSE_HISTORY],
    next: usize,
    count: usize,
    bpm: u16,
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl BeatDetector {
    pub const fn new() -> Self {
        Self {
            smoothed_mv: 0,
            above: false,
            last_beat_ms: None,
            intervals: [0; PULSE_HISTORY],
            next: 0,
            count: 0,
            bpm: 0,
        }
    }

    /// Current BPM, 0 when unknown.
    pub fn bpm(&self) -> u16 {
        self.bpm
    }

    pub fn is_valid(&self) -> bool {
        self.bpm > 0
    }

    pub fn smoothed_mv(&self) -> u32 {
        self.smoothed_mv
    }

    /// Feed one sample taken at `now_ms`.
    ///
    /// Returns a reading when this sample completed a beat that updated
    /// the BPM figure.
    pub fn sample(&mut self, mv: u32, now_ms: u64) -> Option<Reading> {
        self.smoothed_mv = if self.smoothed_mv == 0 {
            mv
        } else {
            (self.smoothed_mv * 7 + mv * 3) / 10
        };

        let above = self.smoothed_mv > PULSE_THRESHOLD_MV;
        let mut reading = None;

        if above && !self.above {
            if let Some(last) = self.last_beat_ms {
                let interval = now_ms.saturating_sub(last);
                if (PULSE_MIN_INTERVAL_MS..=PULSE_MAX_INTERVAL_MS).contains(&interval) {
                    reading = self.record(interval as u32);
                } else {
                    trace!("pulse: interval {} ms rejected", interval);
                }
            }
            self.last_beat_ms = Some(now_ms);
        }
        self.above = above;

        if let Some(last) = self.last_beat_ms {
            let since_beat = now_ms.saturating_sub(last);
            if since_beat > PULSE_STALE_MS {
                debug!("pulse: no beat for {} ms, reading dropped", since_beat);
                self.reset();
            }
        }

        reading
    }

    fn reset(&mut self) {
        self.smoothed_mv = 0;
        self.last_beat_ms = None;
        self.next = 0;
        self.count = 0;
        self.bpm = 0;
    }

    fn record(&mut self, interval: u32) -> Option<Reading> {
        self.intervals[self.next] = interval;
        self.next = (self.next + 1) % PULSE_HISTORY;
        if self.count < PULSE_HISTORY {
            self.count += 1;
        }
        if self.count < PULSE_REQUIRED_BEATS {
            return None;
        }

        let total: u32 = self.intervals[..self.count].iter().sum();
        let mean = total / self.count as u32;
        self.bpm = (60_000 / mean) as u16;
        Some(Reading {
            bpm: self.bpm,
            valid: self.is_valid(),
        })
    }
}
