//! USB Device subsystem - presents a CDC-ACM serial port to the host.
//!
//! The nRF52840's built-in USB 2.0 Full-Speed controller is driven by
//! `embassy-usb`. Telemetry travels over the port as newline-terminated
//! `<topic> <payload>` lines in both directions.

pub mod serial_bridge;
