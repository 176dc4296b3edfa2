//! Application-wide constants and compile-time configuration.
//!
//! All pin assignments, timing parameters, and protocol constants live
//! here so they can be tuned in one place.

// BLE - peer identity

/// Advertised name of the workout tracker we connect to (exact match).
pub const TARGET_DEVICE_NAME: &str = "MAX32655";

/// Our own GAP device name.
pub const OWN_DEVICE_NAME: &str = "PulseTracker-Rx";

/// Workout service UUID `12345678-1234-5678-1234-56789abcdef0`
/// (little-endian, as carried over the air).
pub const WORKOUT_SERVICE_UUID: [u8; 16] = [
    0xf0, 0xde, 0xbc, 0x9a, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12,
];

/// TX characteristic - the tracker notifies workout frames here.
pub const WORKOUT_TX_CHAR_UUID: [u8; 16] = [
    0xf1, 0xde, 0xbc, 0x9a, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12,
];

/// RX characteristic - we write command frames here.
pub const WORKOUT_RX_CHAR_UUID: [u8; 16] = [
    0xf2, 0xde, 0xbc, 0x9a, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12, 0x78, 0x56, 0x34, 0x12,
];

/// Client Characteristic Configuration Descriptor.
pub const CCCD_UUID: u16 = 0x2902;

/// CCCD value enabling notifications.
pub const CCCD_ENABLE_NOTIFICATIONS: [u8; 2] = [0x01, 0x00];

// BLE - timing

/// Scan interval / window (0.625 ms units).
pub const BLE_SCAN_INTERVAL: u32 = 0x0050;
pub const BLE_SCAN_WINDOW: u32 = 0x0030;

/// One scan pass lasts this long before the stack reports completion.
pub const BLE_SCAN_DURATION_MS: u32 = 30_000;

/// Pause between a fruitless scan pass and the next one.
pub const BLE_SCAN_BACKOFF_MS: u32 = 2_000;

/// Connection attempt timeout.
pub const BLE_CONNECT_TIMEOUT_MS: u32 = 30_000;

/// Delay between the MTU request and service discovery.
pub const BLE_DISCOVERY_SETTLE_MS: u32 = 100;

/// Delay after a disconnect before scanning resumes.
pub const BLE_RECONNECT_SETTLE_MS: u32 = 500;

/// BLE connection interval range (in 1.25 ms units).
/// 12 = 15 ms, 24 = 30 ms.
pub const BLE_CONN_INTERVAL_MIN: u16 = 12;
pub const BLE_CONN_INTERVAL_MAX: u16 = 24;

/// BLE slave latency (number of connection events the peripheral can skip).
pub const BLE_SLAVE_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// ATT MTU requested right after connecting.
pub const BLE_PREFERRED_MTU: u16 = 256;

/// ATT MTU every link starts with.
pub const BLE_DEFAULT_MTU: u16 = 23;

/// Notifications of this many bytes or more are dropped.
pub const MAX_FRAME_LEN: usize = 512;

/// Largest frame other tasks can queue for the RX characteristic.
pub const OUTBOUND_FRAME_LEN: usize = 64;

/// Outbound frames waiting for the link task.
pub const OUTBOUND_QUEUE_DEPTH: usize = 2;

// Heart-rate session

/// How long a capture collects beats before reporting back.
pub const HR_CAPTURE_WINDOW_MS: u64 = 5_000;

/// Wait granularity while capturing; bounds cancel latency.
pub const HR_POLL_INTERVAL_MS: u64 = 10;

/// Session command queue depth.
pub const HR_QUEUE_DEPTH: usize = 4;

// Pulse sensor (analog front end on AIN0 / P0.02)

/// Sampling period of the pulse sensor.
pub const PULSE_SAMPLE_PERIOD_MS: u64 = 50;

/// Smoothed voltage above this is "in a beat" (mV).
pub const PULSE_THRESHOLD_MV: u32 = 1_500;

/// Accepted beat-to-beat interval range (200 BPM max, 30 BPM min).
pub const PULSE_MIN_INTERVAL_MS: u64 = 300;
pub const PULSE_MAX_INTERVAL_MS: u64 = 2_000;

/// Beats needed before a BPM figure is reported.
pub const PULSE_REQUIRED_BEATS: usize = 3;

/// Intervals kept for averaging.
pub const PULSE_HISTORY: usize = 10;

/// Reading is discarded after this long without a beat.
pub const PULSE_STALE_MS: u64 = 5_000;

// Telemetry

/// Minimum spacing between heart-rate publications.
pub const HR_PUBLISH_INTERVAL_MS: u64 = 1_000;

pub const TOPIC_HEART_RATE: &str = "pulsetracker/heartRate";
pub const TOPIC_WORKOUT: &str = "pulsetracker/workout";
pub const TOPIC_MODE: &str = "pulsetracker/mode";
pub const TOPIC_BUZZER: &str = "pulsetracker/buzzer";

/// Depth of the outbound telemetry queue.
pub const TELEMETRY_QUEUE_DEPTH: usize = 8;

// USB (CDC-ACM telemetry bridge)

/// USB VID/PID - use the "pid.codes" open-source test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x1209;
pub const USB_PID: u16 = 0x0002;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "pulsetracker";
pub const USB_PRODUCT: &str = "PulseTracker Telemetry Bridge";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// CDC-ACM bulk packet size.
pub const USB_PACKET_SIZE: u16 = 64;

// Buzzer (GPIO P0.13, driven as a square wave)

pub const BUZZER_BEEPS: u8 = 5;
pub const BUZZER_TONE_HZ: u32 = 2_000;
pub const BUZZER_BEEP_MS: u64 = 200;
pub const BUZZER_GAP_MS: u64 = 100;

// GPIO pin assignments (nRF52840-DK defaults)
//
//   Pulse sensor   → P0.02 (AIN0)
//   Buzzer         → P0.13
//   I²C SDA        → P0.26
//   I²C SCL        → P0.27
