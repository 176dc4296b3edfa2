//! Bluetooth Low Energy subsystem.
//!
//! The receiver runs in **Central** role against a single workout tracker:
//!
//! 1. **Advertisement parser** - matches the tracker by its exact
//!    advertised name.
//! 2. **Negotiator** - an explicit state machine that walks scan →
//!    connect → parameter update → MTU exchange → service, characteristic
//!    and descriptor discovery → CCCD subscribe, and recovers from link
//!    loss at any step.
//! 3. **Link** - the handle set of the current connection and its write
//!    path; the outbox hands frames from other tasks to the link task.
//! 4. **SoftDevice driver** (`embedded` only) - executes the negotiator's
//!    commands on the Nordic S140 stack and feeds results back as events.

pub mod adv_parser;
pub mod link;
pub mod negotiator;
pub mod outbound;

#[cfg(feature = "embedded")]
pub mod softdevice;

/// GATT attribute UUID as seen by the negotiator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Uuid {
    /// SIG-assigned 16-bit UUID.
    Uuid16(u16),
    /// Vendor 128-bit UUID, little-endian.
    Uuid128([u8; 16]),
}

/// Raw BLE device address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PeerAddress {
    /// Address type as reported by the controller (public, random, ...).
    pub kind: u8,
    /// Address bytes, little-endian.
    pub bytes: [u8; 6],
}

/// Stack-assigned connection handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnHandle(pub u16);

/// Inclusive range of attribute handles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HandleRange {
    pub start: u16,
    pub end: u16,
}

/// Connection parameters requested after connecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    /// Interval bounds, 1.25 ms units.
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    /// Supervision timeout, 10 ms units.
    pub supervision_timeout: u16,
}
