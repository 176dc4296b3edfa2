//! Session task: drives the controller on the embassy timer.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{with_timeout, Duration, Instant};

use crate::ble::outbound::LinkOutbox;
use crate::config::{HR_POLL_INTERVAL_MS, HR_QUEUE_DEPTH};
use crate::sensor::PulseFeed;
use crate::session::{SessionController, SessionQueue};

pub type HrQueue = SessionQueue<CriticalSectionRawMutex, HR_QUEUE_DEPTH>;

fn now_ms() -> u64 {
    Instant::now().as_millis()
}

/// Blocks on the queue while idle; while capturing, polls every
/// `HR_POLL_INTERVAL_MS` so a `Cancel` lands within one interval.
#[embassy_executor::task]
pub async fn session_task(
    queue: &'static HrQueue,
    feed: &'static PulseFeed<CriticalSectionRawMutex>,
    outbox: &'static LinkOutbox<CriticalSectionRawMutex>,
) {
    let mut ctl = SessionController::new(feed.session_sensor(), outbox);
    info!("session: task running");

    loop {
        if !ctl.is_capturing() {
            let cmd = queue.receive().await;
            ctl.handle(cmd, now_ms());
            continue;
        }

        // Window check first, then wait for a cancel: a capture whose window
        // has closed reports even if a cancel is already queued.
        if ctl.tick(now_ms()).is_some() {
            continue;
        }

        let wait = Duration::from_millis(HR_POLL_INTERVAL_MS);
        if let Ok(cmd) = with_timeout(wait, queue.receive()).await {
            ctl.handle(cmd, now_ms());
        }
    }
}
