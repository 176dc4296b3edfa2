//! Pulse sampler: SAADC channel 0 (AIN0 / P0.02) into the beat detector.

use embassy_nrf::saadc::Saadc;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Ticker};

use crate::config::PULSE_SAMPLE_PERIOD_MS;
use crate::sensor::{BeatDetector, PulseFeed};

/// Full scale with the default gain (1/6) and internal 0.6 V reference.
const FULL_SCALE_MV: i32 = 3_600;
/// 12-bit conversion.
const ADC_COUNTS: i32 = 4_096;

fn to_millivolts(raw: i16) -> u32 {
    (i32::from(raw).max(0) * FULL_SCALE_MV / ADC_COUNTS) as u32
}

#[embassy_executor::task]
pub async fn pulse_task(
    mut saadc: Saadc<'static, 1>,
    feed: &'static PulseFeed<CriticalSectionRawMutex>,
) {
    let mut detector = BeatDetector::new();
    let mut ticker = Ticker::every(Duration::from_millis(PULSE_SAMPLE_PERIOD_MS));

    saadc.calibrate().await;
    info!("pulse: sampling every {} ms", PULSE_SAMPLE_PERIOD_MS);

    loop {
        ticker.next().await;

        let mut buf = [0i16; 1];
        saadc.sample(&mut buf).await;

        let now_ms = Instant::now().as_millis();
        if let Some(reading) = detector.sample(to_millivolts(buf[0]), now_ms) {
            debug!("pulse: {} BPM", reading.bpm);
            feed.publish(reading);
        }
    }
}
