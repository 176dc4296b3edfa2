//! Telemetry publish/subscribe over a line-oriented transport.
//!
//! Every message is one line, `"<topic> <payload>\n"`, in both directions.
//! On the device the lines travel over USB CDC-ACM; a host-side bridge
//! relays them to the MQTT broker.
//!
//! Outbound topics: `pulsetracker/heartRate` (decimal BPM) and
//! `pulsetracker/workout` (raw tracker frames). Inbound topics:
//! `pulsetracker/mode` (current workout mode) and `pulsetracker/buzzer`
//! (`buzz` sounds the buzzer).

use core::cell::RefCell;
use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use heapless::{String, Vec};

use crate::config::{
    HR_PUBLISH_INTERVAL_MS, MAX_FRAME_LEN, TELEMETRY_QUEUE_DEPTH, TOPIC_BUZZER,
    TOPIC_HEART_RATE, TOPIC_MODE,
};
use crate::sensor::Reading;
use crate::workout::fields::{Label, LABEL_CAPACITY};

/// Room for the longest topic, a separator, a full frame and the newline.
pub const LINE_CAPACITY: usize = MAX_FRAME_LEN + 64;

pub type TelemetryLine = Vec<u8, LINE_CAPACITY>;

/// Payload that triggers the buzzer.
const BUZZ_PAYLOAD: &[u8] = b"buzz";

/// Publish side of the telemetry link plus the last received mode.
pub trait Transport {
    /// Queue a message. `false` when it was dropped.
    fn publish(&self, topic: &str, payload: &[u8]) -> bool;
    fn current_mode(&self) -> Label;
}

/// Build one outbound line.
pub fn encode_line(topic: &str, payload: &[u8]) -> Option<TelemetryLine> {
    if topic.is_empty() || topic.contains(' ') || payload.contains(&b'\n') {
        return None;
    }
    let mut line = TelemetryLine::new();
    line.extend_from_slice(topic.as_bytes()).ok()?;
    line.push(b' ').ok()?;
    line.extend_from_slice(payload).ok()?;
    line.push(b'\n').ok()?;
    Some(line)
}

/// Split an inbound line into topic and payload. Trailing `\r`/`\n` are
/// ignored; a line without a space has an empty payload.
pub fn parse_line(line: &[u8]) -> Option<(&str, &[u8])> {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    let line = &line[..end];

    let (topic, payload) = match line.iter().position(|&b| b == b' ') {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, &line[line.len()..]),
    };
    let topic = core::str::from_utf8(topic).ok()?;
    if topic.is_empty() {
        return None;
    }
    Some((topic, payload))
}

/// What an inbound message asks for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Mode(Label),
    Buzz,
    Ignored,
}

fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

pub fn route(topic: &str, payload: &[u8]) -> Inbound {
    if topic == TOPIC_MODE {
        let raw = &payload[..payload.len().min(LABEL_CAPACITY)];
        let text = match core::str::from_utf8(raw) {
            Ok(s) => s,
            Err(e) => core::str::from_utf8(&raw[..e.valid_up_to()]).unwrap_or(""),
        };
        let mut mode = Label::new();
        let _ = mode.push_str(text.trim());
        return Inbound::Mode(mode);
    }
    if topic == TOPIC_BUZZER && trim(payload) == BUZZ_PAYLOAD {
        return Inbound::Buzz;
    }
    Inbound::Ignored
}

/// Publishes a beat's BPM at most once per `HR_PUBLISH_INTERVAL_MS`.
#[derive(Debug, Default)]
pub struct HeartRatePublisher {
    last_publish_ms: Option<u64>,
}

impl HeartRatePublisher {
    pub const fn new() -> Self {
        Self {
            last_publish_ms: None,
        }
    }

    /// Returns true when the reading was published.
    pub fn on_beat<T: Transport>(&mut self, transport: &T, reading: Reading, now_ms: u64) -> bool {
        if let Some(last) = self.last_publish_ms {
            if now_ms.saturating_sub(last) < HR_PUBLISH_INTERVAL_MS {
                return false;
            }
        }
        self.last_publish_ms = Some(now_ms);

        let mut payload: String<8> = String::new();
        let _ = write!(payload, "{}", reading.bpm);
        let mode = transport.current_mode();
        info!("telemetry: mode={} | publishing BPM {}", mode.as_str(), reading.bpm);
        transport.publish(TOPIC_HEART_RATE, payload.as_bytes())
    }
}

/// [`Transport`] that queues encoded lines for a byte-stream bridge.
pub struct LineTransport<M: RawMutex> {
    outbound: Channel<M, TelemetryLine, TELEMETRY_QUEUE_DEPTH>,
    mode: Mutex<M, RefCell<Label>>,
}

impl<M: RawMutex> Default for LineTransport<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> LineTransport<M> {
    pub const fn new() -> Self {
        Self {
            outbound: Channel::new(),
            mode: Mutex::new(RefCell::new(String::new())),
        }
    }

    pub async fn next_line(&self) -> TelemetryLine {
        self.outbound.receive().await
    }

    pub fn try_next_line(&self) -> Option<TelemetryLine> {
        self.outbound.try_receive().ok()
    }

    /// Apply one inbound line. Mode updates are stored here; the caller
    /// acts on the rest.
    pub fn handle_inbound(&self, line: &[u8]) -> Inbound {
        let Some((topic, payload)) = parse_line(line) else {
            return Inbound::Ignored;
        };
        let inbound = route(topic, payload);
        match &inbound {
            Inbound::Mode(mode) => {
                info!("telemetry: mode updated to {}", mode.as_str());
                self.mode.lock(|m| *m.borrow_mut() = mode.clone());
            }
            Inbound::Buzz => info!("telemetry: buzzer requested"),
            Inbound::Ignored => debug!("telemetry: ignoring topic {}", topic),
        }
        inbound
    }
}

impl<M: RawMutex> Transport for LineTransport<M> {
    fn publish(&self, topic: &str, payload: &[u8]) -> bool {
        let Some(line) = encode_line(topic, payload) else {
            warn!("telemetry: cannot encode message for {}", topic);
            return false;
        };
        if self.outbound.try_send(line).is_err() {
            warn!("telemetry: queue full, dropping message for {}", topic);
            return false;
        }
        true
    }

    fn current_mode(&self) -> Label {
        self.mode.lock(|m| m.borrow().clone())
    }
}

/// Reassembles newline-terminated lines from arbitrary chunks.
///
/// A line longer than the buffer is discarded up to its newline.
pub struct LineAssembler<const N: usize> {
    buf: Vec<u8, N>,
    overflowed: bool,
}

impl<const N: usize> Default for LineAssembler<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> LineAssembler<N> {
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            overflowed: false,
        }
    }

    pub fn feed(&mut self, data: &[u8], mut on_line: impl FnMut(&[u8])) {
        for &b in data {
            if b == b'\n' {
                if !self.overflowed && !self.buf.is_empty() {
                    on_line(&self.buf);
                }
                self.buf.clear();
                self.overflowed = false;
            } else if self.buf.push(b).is_err() {
                self.overflowed = true;
            }
        }
    }
}

#[cfg(feature = "embedded")]
pub use task::heart_rate_task;

#[cfg(feature = "embedded")]
mod task {
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use embassy_time::Instant;

    use super::{HeartRatePublisher, LineTransport};
    use crate::sensor::PulseFeed;
    use crate::ui::status::{DisplayFeed, DisplayUpdate};

    /// Publish each detected beat's BPM, rate-limited, and show it.
    #[embassy_executor::task]
    pub async fn heart_rate_task(
        feed: &'static PulseFeed<CriticalSectionRawMutex>,
        transport: &'static LineTransport<CriticalSectionRawMutex>,
        display: &'static DisplayFeed<CriticalSectionRawMutex>,
    ) -> ! {
        let mut publisher = HeartRatePublisher::new();
        loop {
            let reading = feed.next_for_telemetry().await;
            if !reading.valid {
                continue;
            }
            if publisher.on_beat(transport, reading, Instant::now().as_millis()) {
                display.post(DisplayUpdate::HeartRate(reading.bpm));
            }
        }
    }
}
