//! PulseTracker receiver.
//!
//! Links to a BLE workout tracker as GATT central, turns its notifications
//! into workout events, runs heart-rate capture sessions on request and
//! bridges telemetry to a host.
//!
//! Everything outside the `embedded` feature is plain logic that builds
//! and tests on the host: `cargo test --lib`. The firmware binary in
//! `main.rs` wires the same modules to the SoftDevice, SAADC, USB and
//! the OLED.

#![cfg_attr(not(test), no_std)]

// Must come first so the logging macros are visible to every module.
#[macro_use]
mod fmt;

pub mod ble;
pub mod buzzer;
pub mod config;
pub mod error;
pub mod sensor;
pub mod session;
pub mod telemetry;
pub mod ui;
pub mod workout;

#[cfg(feature = "embedded")]
pub mod usb;

pub use error::{LinkError, ParseError, SessionError};
