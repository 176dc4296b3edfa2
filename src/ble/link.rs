//! Handle set of the current peripheral connection.
//!
//! A `PeripheralLink` is owned by the negotiator and mutated only on the
//! BLE event path. Other tasks see it through the `WriteTarget` snapshot
//! it hands out.

use crate::ble::{ConnHandle, HandleRange};
use crate::config::{BLE_DEFAULT_MTU, CCCD_UUID, OUTBOUND_FRAME_LEN};
use crate::error::LinkError;

/// ATT write request header (opcode + handle).
const ATT_WRITE_HEADER: u16 = 3;

/// Declaration and value handles of one characteristic.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CharHandles {
    /// Characteristic declaration ("definition") handle.
    pub def: u16,
    /// Characteristic value handle.
    pub value: u16,
}

/// Where a CCCD handle came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CccdSource {
    /// Found by descriptor discovery.
    Discovered,
    /// Guessed as `tx_value + 1`.
    AssumedNext,
    /// Guessed as `tx_value + 2` after the first guess was refused.
    AssumedAlternate,
}

/// Snapshot of what the write path needs: connection, RX value handle and MTU.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WriteTarget {
    pub conn: ConnHandle,
    pub handle: u16,
    pub mtu: u16,
    /// Set once the stack reported the negotiated MTU.
    pub mtu_confirmed: bool,
}

impl WriteTarget {
    /// Largest payload one write may carry.
    ///
    /// Only a confirmed MTU narrows the bound; until then the frame buffer
    /// is the limit and the stack has the last word.
    pub fn max_payload(&self) -> usize {
        if !self.mtu_confirmed {
            return OUTBOUND_FRAME_LEN;
        }
        (self.mtu.saturating_sub(ATT_WRITE_HEADER) as usize).min(OUTBOUND_FRAME_LEN)
    }

    /// Validate `msg` against this target.
    pub fn check(&self, msg: &[u8]) -> Result<(), LinkError> {
        if msg.is_empty() {
            return Err(LinkError::EmptyPayload);
        }
        if msg.len() > self.max_payload() {
            return Err(LinkError::PayloadTooLarge);
        }
        Ok(())
    }
}

/// The logical connection to the workout tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralLink {
    /// Present only while connected.
    pub conn: Option<ConnHandle>,
    pub mtu: u16,
    pub mtu_exchanged: bool,
    pub service: Option<HandleRange>,
    /// Notify ("TX") characteristic.
    pub tx: Option<CharHandles>,
    /// Write ("RX") characteristic.
    pub rx: Option<CharHandles>,
    /// CCCD found by descriptor discovery.
    pub cccd: Option<u16>,
    /// Set once descriptor discovery has finished, found or not.
    pub service_discovered: bool,
}

impl Default for PeripheralLink {
    fn default() -> Self {
        Self::new()
    }
}

impl PeripheralLink {
    pub const fn new() -> Self {
        Self {
            conn: None,
            mtu: BLE_DEFAULT_MTU,
            mtu_exchanged: false,
            service: None,
            tx: None,
            rx: None,
            cccd: None,
            service_discovered: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Start a fresh link on `conn`; everything discovered earlier is dropped.
    pub fn attach(&mut self, conn: ConnHandle) {
        *self = Self::new();
        self.conn = Some(conn);
    }

    /// Forget the connection and every handle.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Handle range to search for the TX characteristic's descriptors.
    ///
    /// Runs from just past the TX value to just before the RX declaration.
    /// When RX is missing or precedes TX the range ends at the service end.
    /// The end never falls below the start.
    pub fn descriptor_range(&self) -> Option<HandleRange> {
        let tx = self.tx?;
        let start = tx.value.saturating_add(1);
        let service_end = self.service.map(|s| s.end).unwrap_or(start);
        let end = match self.rx {
            Some(rx) if rx.def > tx.value => rx.def - 1,
            _ => service_end,
        };
        Some(HandleRange {
            start,
            end: end.max(start),
        })
    }

    /// CCCD handle for the first subscribe attempt.
    ///
    /// Uses the discovered descriptor when there is one; otherwise assumes
    /// the CCCD sits right after the TX value. The guess is a best-effort
    /// heuristic, not something the GATT layout guarantees.
    pub fn cccd_handle(&self) -> Option<(u16, CccdSource)> {
        if let Some(handle) = self.cccd {
            return Some((handle, CccdSource::Discovered));
        }
        let tx = self.tx?;
        Some((tx.value.saturating_add(1), CccdSource::AssumedNext))
    }

    /// Second guess after a refused subscribe, only when nothing was discovered.
    pub fn alternate_cccd_handle(&self) -> Option<u16> {
        if self.cccd.is_some() {
            return None;
        }
        self.tx.map(|tx| tx.value.saturating_add(2))
    }

    /// Current write path target, if the link can carry outbound frames.
    pub fn write_target(&self) -> Result<WriteTarget, LinkError> {
        let conn = self.conn.ok_or(LinkError::NotConnected)?;
        let rx = self.rx.ok_or(LinkError::NoWriteHandle)?;
        Ok(WriteTarget {
            conn,
            handle: rx.value,
            mtu: self.mtu,
            mtu_confirmed: self.mtu_exchanged,
        })
    }
}

/// True for the SIG "Client Characteristic Configuration" descriptor.
pub fn is_cccd(uuid: &crate::ble::Uuid) -> bool {
    *uuid == crate::ble::Uuid::Uuid16(CCCD_UUID)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered(tx: (u16, u16), rx: Option<(u16, u16)>, end: u16) -> PeripheralLink {
        let mut link = PeripheralLink::new();
        link.attach(ConnHandle(1));
        link.service = Some(HandleRange { start: 10, end });
        link.tx = Some(CharHandles {
            def: tx.0,
            value: tx.1,
        });
        link.rx = rx.map(|(def, value)| CharHandles { def, value });
        link
    }

    #[test]
    fn descriptor_range_ends_before_rx_declaration() {
        let link = discovered((11, 12), Some((14, 15)), 20);
        assert_eq!(link.descriptor_range(), Some(HandleRange { start: 13, end: 13 }));
    }

    #[test]
    fn descriptor_range_uses_service_end_without_rx() {
        let link = discovered((11, 12), None, 20);
        assert_eq!(link.descriptor_range(), Some(HandleRange { start: 13, end: 20 }));
    }

    #[test]
    fn descriptor_range_uses_service_end_when_rx_precedes_tx() {
        let link = discovered((14, 15), Some((11, 12)), 20);
        assert_eq!(link.descriptor_range(), Some(HandleRange { start: 16, end: 20 }));
    }

    #[test]
    fn descriptor_range_never_ends_before_start() {
        // RX declared right after the TX value: nothing in between.
        let link = discovered((11, 12), Some((13, 14)), 20);
        assert_eq!(link.descriptor_range(), Some(HandleRange { start: 13, end: 13 }));
    }

    #[test]
    fn cccd_falls_back_to_offsets() {
        let mut link = discovered((11, 12), Some((14, 15)), 20);
        assert_eq!(link.cccd_handle(), Some((13, CccdSource::AssumedNext)));
        assert_eq!(link.alternate_cccd_handle(), Some(14));

        link.cccd = Some(13);
        assert_eq!(link.cccd_handle(), Some((13, CccdSource::Discovered)));
        assert_eq!(link.alternate_cccd_handle(), None);
    }

    #[test]
    fn reset_clears_every_field() {
        let mut link = discovered((11, 12), Some((14, 15)), 20);
        link.cccd = Some(13);
        link.mtu = 256;
        link.mtu_exchanged = true;
        link.service_discovered = true;
        link.reset();
        assert_eq!(link, PeripheralLink::new());
        assert!(!link.is_connected());
    }

    #[test]
    fn write_target_requires_connection_and_rx() {
        let mut link = PeripheralLink::new();
        assert_eq!(link.write_target(), Err(LinkError::NotConnected));

        link.attach(ConnHandle(3));
        assert_eq!(link.write_target(), Err(LinkError::NoWriteHandle));

        link.rx = Some(CharHandles { def: 14, value: 15 });
        let target = link.write_target().unwrap();
        assert_eq!(target.conn, ConnHandle(3));
        assert_eq!(target.handle, 15);
        assert!(!target.mtu_confirmed);
        assert_eq!(target.max_payload(), OUTBOUND_FRAME_LEN);

        link.mtu = 185;
        link.mtu_exchanged = true;
        assert_eq!(link.write_target().unwrap().max_payload(), OUTBOUND_FRAME_LEN);
    }

    #[test]
    fn write_target_checks_payload_size() {
        let target = WriteTarget {
            conn: ConnHandle(1),
            handle: 15,
            mtu: 23,
            mtu_confirmed: true,
        };
        assert_eq!(target.check(b""), Err(LinkError::EmptyPayload));
        assert_eq!(target.check(&[b'x'; 21]), Err(LinkError::PayloadTooLarge));
        assert_eq!(target.check(b"{\"cmd\":\"hr_done\"}"), Ok(()));
    }

    #[test]
    fn unconfirmed_mtu_only_bounds_by_frame_buffer() {
        let target = WriteTarget {
            conn: ConnHandle(1),
            handle: 15,
            mtu: BLE_DEFAULT_MTU,
            mtu_confirmed: false,
        };
        assert_eq!(target.check(b"{\"cmd\":\"hr_done\",\"bpm\":72}"), Ok(()));
        assert_eq!(target.check(&[b'x'; OUTBOUND_FRAME_LEN]), Ok(()));
        assert_eq!(
            target.check(&[b'x'; OUTBOUND_FRAME_LEN + 1]),
            Err(LinkError::PayloadTooLarge)
        );
    }
}
