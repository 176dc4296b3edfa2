//! GATT negotiation state machine.
//!
//! The negotiator never touches the radio. It consumes `LinkEvent`s (scan
//! reports, connection results, discovery callbacks, timer expiries) and
//! answers with the `LinkCommand`s the driver must execute next. Every
//! transition is one arm of the table in [`Negotiator::handle`].
//!
//! ```text
//! Idle ─timer─▶ Scanning ─name match─▶ Connecting ─ok─▶ ParamsRequested
//!   ▲                                      │fail              │
//!   │                                      ▼                  ▼
//!   │                                  Scanning         MtuExchanging ─settle─▶ ServiceDiscovery
//!   │                                                                              │
//!   └── Disconnected (any connected state)      CharacteristicDiscovery ◀─found────┘
//!                                                        │ TX found
//!                                                        ▼
//!                              Ready ◀─ok─ Subscribed ◀─ DescriptorDiscovery
//! ```
//!
//! Discovery dead ends (service or TX characteristic missing, subscribe
//! refused twice) park the link in `Stalled` until the peripheral drops it.

use heapless::Vec;

use crate::ble::adv_parser::advertises_name;
use crate::ble::link::{is_cccd, CccdSource, CharHandles, PeripheralLink, WriteTarget};
use crate::ble::{ConnHandle, ConnParams, HandleRange, PeerAddress, Uuid};
use crate::config::{
    BLE_CONNECT_TIMEOUT_MS, BLE_CONN_INTERVAL_MAX, BLE_CONN_INTERVAL_MIN,
    BLE_DISCOVERY_SETTLE_MS, BLE_PREFERRED_MTU, BLE_RECONNECT_SETTLE_MS, BLE_SCAN_BACKOFF_MS,
    BLE_SLAVE_LATENCY, BLE_SUP_TIMEOUT, CCCD_ENABLE_NOTIFICATIONS, MAX_FRAME_LEN,
    TARGET_DEVICE_NAME, WORKOUT_RX_CHAR_UUID, WORKOUT_SERVICE_UUID, WORKOUT_TX_CHAR_UUID,
};
use crate::error::LinkError;

/// Connection parameters requested right after connecting.
pub const CONN_PARAMS: ConnParams = ConnParams {
    interval_min: BLE_CONN_INTERVAL_MIN,
    interval_max: BLE_CONN_INTERVAL_MAX,
    latency: BLE_SLAVE_LATENCY,
    supervision_timeout: BLE_SUP_TIMEOUT,
};

/// Progress through connection setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DiscoveryState {
    /// Not connected, not scanning; a backoff or settle timer is pending.
    Idle,
    Scanning,
    Connecting,
    ParamsRequested,
    MtuExchanging,
    ServiceDiscovery,
    CharacteristicDiscovery,
    DescriptorDiscovery,
    /// CCCD write in flight.
    Subscribed,
    /// Notifications enabled; workout frames flow.
    Ready,
    /// Connected but setup gave up; waits for the next disconnect.
    Stalled,
}

/// Timers the driver runs on the negotiator's behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkTimer {
    ScanBackoff,
    DiscoverySettle,
    Reconnect,
}

/// Everything the radio side reports back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkEvent<'a> {
    Advertisement { peer: PeerAddress, data: &'a [u8] },
    /// The scan pass ended on its own.
    ScanComplete,
    Connected { conn: ConnHandle },
    ConnectFailed { status: u32 },
    /// Submission result of the parameter update request.
    ConnParamsRequested { result: Result<(), u32> },
    MtuExchanged { mtu: u16 },
    MtuExchangeFailed { status: u32 },
    TimerFired(LinkTimer),
    ServiceFound { range: HandleRange },
    ServiceDiscoveryComplete,
    ServiceDiscoveryFailed { status: u32 },
    CharacteristicFound { uuid: Uuid, handles: CharHandles },
    CharacteristicDiscoveryComplete,
    CharacteristicDiscoveryFailed { status: u32 },
    DescriptorFound { uuid: Uuid, handle: u16 },
    DescriptorDiscoveryComplete,
    DescriptorDiscoveryFailed { status: u32 },
    CccdWritten { handle: u16, result: Result<(), u32> },
    Disconnected { reason: u8 },
}

impl LinkEvent<'_> {
    /// Short name for log lines.
    pub fn name(&self) -> &'static str {
        match self {
            LinkEvent::Advertisement { .. } => "advertisement",
            LinkEvent::ScanComplete => "scan-complete",
            LinkEvent::Connected { .. } => "connected",
            LinkEvent::ConnectFailed { .. } => "connect-failed",
            LinkEvent::ConnParamsRequested { .. } => "conn-params-requested",
            LinkEvent::MtuExchanged { .. } => "mtu-exchanged",
            LinkEvent::MtuExchangeFailed { .. } => "mtu-exchange-failed",
            LinkEvent::TimerFired(_) => "timer",
            LinkEvent::ServiceFound { .. } => "service-found",
            LinkEvent::ServiceDiscoveryComplete => "service-discovery-complete",
            LinkEvent::ServiceDiscoveryFailed { .. } => "service-discovery-failed",
            LinkEvent::CharacteristicFound { .. } => "characteristic-found",
            LinkEvent::CharacteristicDiscoveryComplete => "characteristic-discovery-complete",
            LinkEvent::CharacteristicDiscoveryFailed { .. } => "characteristic-discovery-failed",
            LinkEvent::DescriptorFound { .. } => "descriptor-found",
            LinkEvent::DescriptorDiscoveryComplete => "descriptor-discovery-complete",
            LinkEvent::DescriptorDiscoveryFailed { .. } => "descriptor-discovery-failed",
            LinkEvent::CccdWritten { .. } => "cccd-written",
            LinkEvent::Disconnected { .. } => "disconnected",
        }
    }
}

/// Work for the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkCommand {
    StartScan,
    CancelScan,
    Connect { peer: PeerAddress, timeout_ms: u32 },
    UpdateConnParams(ConnParams),
    ExchangeMtu { preferred: u16 },
    StartTimer { timer: LinkTimer, after_ms: u32 },
    DiscoverService { uuid: Uuid },
    DiscoverCharacteristics { range: HandleRange },
    DiscoverDescriptors { range: HandleRange },
    WriteCccd { handle: u16, value: [u8; 2] },
    /// Abort any heart-rate capture in flight.
    CancelCapture,
}

/// Commands produced by one event. No transition emits more than four.
pub type LinkCommands = Vec<LinkCommand, 4>;

/// A validated outbound write, ready for the driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteRequest<'m> {
    pub target: WriteTarget,
    pub payload: &'m [u8],
}

/// Bound a notification payload to a workout frame.
///
/// Empty frames and frames of `MAX_FRAME_LEN` bytes or more are dropped.
pub fn notification_frame(handle: u16, data: &[u8]) -> Option<&[u8]> {
    if data.is_empty() || data.len() >= MAX_FRAME_LEN {
        trace!("dropping notification: handle={}, len={}", handle, data.len());
        return None;
    }
    debug!("notification: handle={}, len={}", handle, data.len());
    Some(data)
}

/// Owns the peripheral link and drives it through setup.
pub struct Negotiator {
    state: DiscoveryState,
    link: PeripheralLink,
    /// Which guess the CCCD write in flight used.
    cccd_source: Option<CccdSource>,
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl Negotiator {
    pub const fn new() -> Self {
        Self {
            state: DiscoveryState::Idle,
            link: PeripheralLink::new(),
            cccd_source: None,
        }
    }

    pub fn state(&self) -> DiscoveryState {
        self.state
    }

    pub fn link(&self) -> &PeripheralLink {
        &self.link
    }

    /// Kick off the first scan.
    pub fn start(&mut self) -> LinkCommands {
        let mut out = LinkCommands::new();
        self.begin_scan(&mut out);
        out
    }

    /// Validate an outbound frame against the current link.
    ///
    /// Writes are fire-and-forget: success only means the request may be
    /// handed to the stack, not that the peripheral acknowledged it.
    pub fn send<'m>(&self, msg: &'m [u8]) -> Result<WriteRequest<'m>, LinkError> {
        let target = self.link.write_target()?;
        target.check(msg)?;
        Ok(WriteRequest {
            target,
            payload: msg,
        })
    }

    /// Current write target, for publication to other tasks.
    pub fn write_target(&self) -> Result<WriteTarget, LinkError> {
        self.link.write_target()
    }

    /// Advance the state machine by one event.
    pub fn handle(&mut self, event: LinkEvent<'_>) -> LinkCommands {
        use DiscoveryState as S;
        use LinkEvent as E;

        let mut out = LinkCommands::new();

        match (self.state, event) {
            (_, E::Disconnected { reason }) => self.on_disconnected(reason, &mut out),

            // Scan
            (S::Scanning, E::Advertisement { peer, data }) => {
                if advertises_name(data, TARGET_DEVICE_NAME) {
                    info!("link: found {}, connecting", TARGET_DEVICE_NAME);
                    let _ = out.push(LinkCommand::CancelScan);
                    let _ = out.push(LinkCommand::Connect {
                        peer,
                        timeout_ms: BLE_CONNECT_TIMEOUT_MS,
                    });
                    self.enter(S::Connecting);
                }
            }
            (S::Scanning, E::ScanComplete) => {
                info!("link: scan complete, retrying in {} ms", BLE_SCAN_BACKOFF_MS);
                self.enter(S::Idle);
                let _ = out.push(LinkCommand::StartTimer {
                    timer: LinkTimer::ScanBackoff,
                    after_ms: BLE_SCAN_BACKOFF_MS,
                });
            }
            (S::Idle, E::TimerFired(LinkTimer::ScanBackoff | LinkTimer::Reconnect)) => {
                self.begin_scan(&mut out);
            }

            // Connect
            (S::Connecting, E::Connected { conn }) => {
                info!("link: connected, handle {}", conn.0);
                self.link.attach(conn);
                let _ = out.push(LinkCommand::UpdateConnParams(CONN_PARAMS));
                self.enter(S::ParamsRequested);
            }
            (S::Connecting, E::ConnectFailed { status }) => {
                error!("link: connection failed: {}", status);
                self.begin_scan(&mut out);
            }
            (S::ParamsRequested, E::ConnParamsRequested { result }) => {
                if let Err(status) = result {
                    warn!("link: connection parameter update refused: {}", status);
                }
                info!("link: requesting MTU {}", BLE_PREFERRED_MTU);
                let _ = out.push(LinkCommand::ExchangeMtu {
                    preferred: BLE_PREFERRED_MTU,
                });
                let _ = out.push(LinkCommand::StartTimer {
                    timer: LinkTimer::DiscoverySettle,
                    after_ms: BLE_DISCOVERY_SETTLE_MS,
                });
                self.enter(S::MtuExchanging);
            }
            (_, E::MtuExchanged { mtu }) if self.link.is_connected() => {
                info!("link: MTU exchange complete: {}", mtu);
                self.link.mtu = mtu;
                self.link.mtu_exchanged = true;
            }
            (_, E::MtuExchangeFailed { status }) if self.link.is_connected() => {
                error!("link: MTU exchange failed: {}", status);
            }

            // Service discovery
            (S::MtuExchanging, E::TimerFired(LinkTimer::DiscoverySettle)) => {
                let _ = out.push(LinkCommand::DiscoverService {
                    uuid: Uuid::Uuid128(WORKOUT_SERVICE_UUID),
                });
                self.enter(S::ServiceDiscovery);
            }
            (S::ServiceDiscovery, E::ServiceFound { range }) => {
                info!("link: service found (handles {}-{})", range.start, range.end);
                self.link.service = Some(range);
                let _ = out.push(LinkCommand::DiscoverCharacteristics { range });
                self.enter(S::CharacteristicDiscovery);
            }
            (S::ServiceDiscovery, E::ServiceDiscoveryComplete) => {
                error!("link: workout service not found");
                self.stall();
            }
            (S::ServiceDiscovery, E::ServiceDiscoveryFailed { status }) => {
                error!("link: service discovery failed: {}", status);
                self.stall();
            }

            // Characteristic discovery
            (S::CharacteristicDiscovery, E::CharacteristicFound { uuid, handles }) => {
                if uuid == Uuid::Uuid128(WORKOUT_TX_CHAR_UUID) {
                    info!("link: TX characteristic def={} val={}", handles.def, handles.value);
                    self.link.tx = Some(handles);
                } else if uuid == Uuid::Uuid128(WORKOUT_RX_CHAR_UUID) {
                    info!("link: RX characteristic def={} val={}", handles.def, handles.value);
                    self.link.rx = Some(handles);
                } else {
                    debug!("link: skipping characteristic val={}", handles.value);
                }
            }
            (S::CharacteristicDiscovery, E::CharacteristicDiscoveryComplete) => {
                match self.link.descriptor_range() {
                    Some(range) => {
                        info!("link: discovering descriptors (handles {}-{})", range.start, range.end);
                        let _ = out.push(LinkCommand::DiscoverDescriptors { range });
                        self.enter(S::DescriptorDiscovery);
                    }
                    None => {
                        error!("link: TX characteristic not found");
                        self.stall();
                    }
                }
            }
            (S::CharacteristicDiscovery, E::CharacteristicDiscoveryFailed { status }) => {
                error!("link: characteristic discovery failed: {}", status);
                self.stall();
            }

            // Descriptor discovery
            (S::DescriptorDiscovery, E::DescriptorFound { uuid, handle }) => {
                if is_cccd(&uuid) {
                    info!("link: found CCCD at handle {}", handle);
                    self.link.cccd = Some(handle);
                } else {
                    debug!("link: skipping descriptor {}", handle);
                }
            }
            (S::DescriptorDiscovery, E::DescriptorDiscoveryComplete) => {
                self.link.service_discovered = true;
                self.subscribe(&mut out);
            }
            (S::DescriptorDiscovery, E::DescriptorDiscoveryFailed { status }) => {
                warn!("link: descriptor discovery failed: {}", status);
                self.subscribe(&mut out);
            }

            // Subscribe
            (S::Subscribed, E::CccdWritten { handle, result: Ok(()) }) => {
                info!("link: notifications enabled via handle {}", handle);
                self.enter(S::Ready);
            }
            (S::Subscribed, E::CccdWritten { handle, result: Err(status) }) => {
                error!("link: subscribe via handle {} failed: {}", handle, status);
                match (self.cccd_source, self.link.alternate_cccd_handle()) {
                    (Some(CccdSource::AssumedNext), Some(alternate)) => {
                        warn!("link: trying alternative CCCD handle {}", alternate);
                        self.cccd_source = Some(CccdSource::AssumedAlternate);
                        let _ = out.push(LinkCommand::WriteCccd {
                            handle: alternate,
                            value: CCCD_ENABLE_NOTIFICATIONS,
                        });
                    }
                    _ => self.stall(),
                }
            }

            (state, other) => {
                debug!("link: ignoring {} in {}", other.name(), state);
            }
        }

        out
    }

    fn enter(&mut self, next: DiscoveryState) {
        if next != self.state {
            info!("link: {} -> {}", self.state, next);
            self.state = next;
        }
    }

    fn begin_scan(&mut self, out: &mut LinkCommands) {
        info!("link: scanning for {}", TARGET_DEVICE_NAME);
        self.link.reset();
        self.cccd_source = None;
        let _ = out.push(LinkCommand::StartScan);
        self.enter(DiscoveryState::Scanning);
    }

    fn subscribe(&mut self, out: &mut LinkCommands) {
        let Some((handle, source)) = self.link.cccd_handle() else {
            error!("link: cannot subscribe without a TX characteristic");
            self.stall();
            return;
        };
        match source {
            CccdSource::Discovered => info!("link: using discovered CCCD {}", handle),
            _ => warn!("link: CCCD not discovered, assuming handle {}", handle),
        }
        self.cccd_source = Some(source);
        let _ = out.push(LinkCommand::WriteCccd {
            handle,
            value: CCCD_ENABLE_NOTIFICATIONS,
        });
        self.enter(DiscoveryState::Subscribed);
    }

    fn stall(&mut self) {
        warn!("link: setup abandoned, waiting for disconnect");
        self.enter(DiscoveryState::Stalled);
    }

    fn on_disconnected(&mut self, reason: u8, out: &mut LinkCommands) {
        if !self.link.is_connected() {
            debug!("link: disconnect while not connected ({})", reason);
            return;
        }
        warn!("link: disconnected (reason {}), reconnecting", reason);
        let _ = out.push(LinkCommand::CancelCapture);
        self.link.reset();
        self.cccd_source = None;
        self.enter(DiscoveryState::Idle);
        let _ = out.push(LinkCommand::StartTimer {
            timer: LinkTimer::Reconnect,
            after_ms: BLE_RECONNECT_SETTLE_MS,
        });
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests (run on host, not embedded)
// ═══════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: PeerAddress = PeerAddress {
        kind: 0,
        bytes: [1, 2, 3, 4, 5, 6],
    };

    const TRACKER_ADV: [u8; 13] = [
        0x02, 0x01, 0x06, 0x09, 0x09, b'M', b'A', b'X', b'3', b'2', b'6', b'5', b'5',
    ];

    const TX: CharHandles = CharHandles { def: 11, value: 12 };
    const RX: CharHandles = CharHandles { def: 14, value: 15 };

    fn cmds(list: &[LinkCommand]) -> LinkCommands {
        LinkCommands::from_slice(list).unwrap()
    }

    fn scanning() -> Negotiator {
        let mut n = Negotiator::new();
        assert_eq!(n.start(), cmds(&[LinkCommand::StartScan]));
        n
    }

    fn at_characteristic_discovery() -> Negotiator {
        let mut n = scanning();
        n.handle(LinkEvent::Advertisement {
            peer: PEER,
            data: &TRACKER_ADV,
        });
        n.handle(LinkEvent::Connected { conn: ConnHandle(7) });
        n.handle(LinkEvent::ConnParamsRequested { result: Ok(()) });
        n.handle(LinkEvent::MtuExchanged { mtu: 256 });
        n.handle(LinkEvent::TimerFired(LinkTimer::DiscoverySettle));
        n.handle(LinkEvent::ServiceFound {
            range: HandleRange { start: 10, end: 20 },
        });
        assert_eq!(n.state(), DiscoveryState::CharacteristicDiscovery);
        n
    }

    fn at_descriptor_discovery() -> Negotiator {
        let mut n = at_characteristic_discovery();
        n.handle(LinkEvent::CharacteristicFound {
            uuid: Uuid::Uuid128(WORKOUT_TX_CHAR_UUID),
            handles: TX,
        });
        n.handle(LinkEvent::CharacteristicFound {
            uuid: Uuid::Uuid128(WORKOUT_RX_CHAR_UUID),
            handles: RX,
        });
        let out = n.handle(LinkEvent::CharacteristicDiscoveryComplete);
        assert_eq!(
            out,
            cmds(&[LinkCommand::DiscoverDescriptors {
                range: HandleRange { start: 13, end: 13 }
            }])
        );
        n
    }

    fn ready() -> Negotiator {
        let mut n = at_descriptor_discovery();
        n.handle(LinkEvent::DescriptorFound {
            uuid: Uuid::Uuid16(0x2902),
            handle: 13,
        });
        n.handle(LinkEvent::DescriptorDiscoveryComplete);
        n.handle(LinkEvent::CccdWritten {
            handle: 13,
            result: Ok(()),
        });
        assert_eq!(n.state(), DiscoveryState::Ready);
        n
    }

    #[test]
    fn full_negotiation_emits_each_step() {
        let mut n = scanning();

        let out = n.handle(LinkEvent::Advertisement {
            peer: PEER,
            data: &TRACKER_ADV,
        });
        assert_eq!(
            out,
            cmds(&[
                LinkCommand::CancelScan,
                LinkCommand::Connect {
                    peer: PEER,
                    timeout_ms: 30_000
                },
            ])
        );
        assert_eq!(n.state(), DiscoveryState::Connecting);

        let out = n.handle(LinkEvent::Connected { conn: ConnHandle(7) });
        assert_eq!(out, cmds(&[LinkCommand::UpdateConnParams(CONN_PARAMS)]));
        assert_eq!(n.state(), DiscoveryState::ParamsRequested);
        assert!(n.link().is_connected());

        let out = n.handle(LinkEvent::ConnParamsRequested { result: Ok(()) });
        assert_eq!(
            out,
            cmds(&[
                LinkCommand::ExchangeMtu { preferred: 256 },
                LinkCommand::StartTimer {
                    timer: LinkTimer::DiscoverySettle,
                    after_ms: 100
                },
            ])
        );
        assert_eq!(n.state(), DiscoveryState::MtuExchanging);

        assert!(n.handle(LinkEvent::MtuExchanged { mtu: 256 }).is_empty());
        assert_eq!(n.link().mtu, 256);
        assert!(n.link().mtu_exchanged);

        let out = n.handle(LinkEvent::TimerFired(LinkTimer::DiscoverySettle));
        assert_eq!(
            out,
            cmds(&[LinkCommand::DiscoverService {
                uuid: Uuid::Uuid128(WORKOUT_SERVICE_UUID)
            }])
        );

        let range = HandleRange { start: 10, end: 20 };
        let out = n.handle(LinkEvent::ServiceFound { range });
        assert_eq!(out, cmds(&[LinkCommand::DiscoverCharacteristics { range }]));

        n.handle(LinkEvent::CharacteristicFound {
            uuid: Uuid::Uuid128(WORKOUT_TX_CHAR_UUID),
            handles: TX,
        });
        n.handle(LinkEvent::CharacteristicFound {
            uuid: Uuid::Uuid128(WORKOUT_RX_CHAR_UUID),
            handles: RX,
        });
        n.handle(LinkEvent::CharacteristicDiscoveryComplete);
        assert_eq!(n.state(), DiscoveryState::DescriptorDiscovery);

        n.handle(LinkEvent::DescriptorFound {
            uuid: Uuid::Uuid16(0x2902),
            handle: 13,
        });
        let out = n.handle(LinkEvent::DescriptorDiscoveryComplete);
        assert_eq!(
            out,
            cmds(&[LinkCommand::WriteCccd {
                handle: 13,
                value: [0x01, 0x00]
            }])
        );
        assert_eq!(n.state(), DiscoveryState::Subscribed);

        assert!(n
            .handle(LinkEvent::CccdWritten {
                handle: 13,
                result: Ok(())
            })
            .is_empty());
        assert_eq!(n.state(), DiscoveryState::Ready);
        assert!(n.link().service_discovered);
    }

    #[test]
    fn ignores_other_advertised_names() {
        let mut n = scanning();
        for adv in [
            &[0x04, 0x09, b'M', b'A', b'X'][..],
            &[0x0A, 0x09, b'M', b'A', b'X', b'3', b'2', b'6', b'5', b'5', b'!'][..],
            &[0x09, 0x09, b'm', b'a', b'x', b'3', b'2', b'6', b'5', b'5'][..],
            &[0x02, 0x01, 0x06][..],
        ] {
            let out = n.handle(LinkEvent::Advertisement {
                peer: PEER,
                data: adv,
            });
            assert!(out.is_empty());
            assert_eq!(n.state(), DiscoveryState::Scanning);
        }
    }

    #[test]
    fn scan_complete_backs_off_then_rescans() {
        let mut n = scanning();
        let out = n.handle(LinkEvent::ScanComplete);
        assert_eq!(
            out,
            cmds(&[LinkCommand::StartTimer {
                timer: LinkTimer::ScanBackoff,
                after_ms: 2_000
            }])
        );
        assert_eq!(n.state(), DiscoveryState::Idle);

        let out = n.handle(LinkEvent::TimerFired(LinkTimer::ScanBackoff));
        assert_eq!(out, cmds(&[LinkCommand::StartScan]));
        assert_eq!(n.state(), DiscoveryState::Scanning);
    }

    #[test]
    fn connect_failure_rescans_immediately() {
        let mut n = scanning();
        n.handle(LinkEvent::Advertisement {
            peer: PEER,
            data: &TRACKER_ADV,
        });
        let out = n.handle(LinkEvent::ConnectFailed { status: 13 });
        assert_eq!(out, cmds(&[LinkCommand::StartScan]));
        assert_eq!(n.state(), DiscoveryState::Scanning);
        assert!(!n.link().is_connected());
    }

    #[test]
    fn refused_param_update_still_continues() {
        let mut n = scanning();
        n.handle(LinkEvent::Advertisement {
            peer: PEER,
            data: &TRACKER_ADV,
        });
        n.handle(LinkEvent::Connected { conn: ConnHandle(1) });
        let out = n.handle(LinkEvent::ConnParamsRequested { result: Err(8) });
        assert_eq!(out.len(), 2);
        assert_eq!(n.state(), DiscoveryState::MtuExchanging);
    }

    #[test]
    fn disconnect_at_every_stage_resets_link_and_cancels_capture() {
        let stages: [fn() -> Negotiator; 4] = [
            at_characteristic_discovery,
            at_descriptor_discovery,
            ready,
            || {
                let mut n = at_descriptor_discovery();
                n.handle(LinkEvent::DescriptorDiscoveryComplete);
                n
            },
        ];

        for stage in stages {
            let mut n = stage();
            let out = n.handle(LinkEvent::Disconnected { reason: 0x13 });
            assert_eq!(
                out,
                cmds(&[
                    LinkCommand::CancelCapture,
                    LinkCommand::StartTimer {
                        timer: LinkTimer::Reconnect,
                        after_ms: 500
                    },
                ])
            );
            assert_eq!(n.state(), DiscoveryState::Idle);
            assert_eq!(*n.link(), PeripheralLink::new());
            assert_eq!(n.write_target(), Err(LinkError::NotConnected));

            let out = n.handle(LinkEvent::TimerFired(LinkTimer::Reconnect));
            assert_eq!(out, cmds(&[LinkCommand::StartScan]));
        }
    }

    #[test]
    fn disconnect_during_early_setup_also_resets() {
        let mut n = scanning();
        n.handle(LinkEvent::Advertisement {
            peer: PEER,
            data: &TRACKER_ADV,
        });
        n.handle(LinkEvent::Connected { conn: ConnHandle(2) });
        let out = n.handle(LinkEvent::Disconnected { reason: 8 });
        assert_eq!(out[0], LinkCommand::CancelCapture);
        assert_eq!(n.state(), DiscoveryState::Idle);

        // The settle timer of the dead link must not restart discovery.
        assert!(n
            .handle(LinkEvent::TimerFired(LinkTimer::DiscoverySettle))
            .is_empty());
        assert_eq!(n.state(), DiscoveryState::Idle);
    }

    #[test]
    fn stray_disconnect_while_scanning_is_ignored() {
        let mut n = scanning();
        assert!(n.handle(LinkEvent::Disconnected { reason: 8 }).is_empty());
        assert_eq!(n.state(), DiscoveryState::Scanning);
    }

    #[test]
    fn missing_service_stalls() {
        let mut n = scanning();
        n.handle(LinkEvent::Advertisement {
            peer: PEER,
            data: &TRACKER_ADV,
        });
        n.handle(LinkEvent::Connected { conn: ConnHandle(2) });
        n.handle(LinkEvent::ConnParamsRequested { result: Ok(()) });
        n.handle(LinkEvent::TimerFired(LinkTimer::DiscoverySettle));
        assert!(n.handle(LinkEvent::ServiceDiscoveryComplete).is_empty());
        assert_eq!(n.state(), DiscoveryState::Stalled);
        assert!(n.link().is_connected());
    }

    #[test]
    fn missing_tx_characteristic_stalls() {
        let mut n = at_characteristic_discovery();
        n.handle(LinkEvent::CharacteristicFound {
            uuid: Uuid::Uuid128(WORKOUT_RX_CHAR_UUID),
            handles: RX,
        });
        assert!(n.handle(LinkEvent::CharacteristicDiscoveryComplete).is_empty());
        assert_eq!(n.state(), DiscoveryState::Stalled);
    }

    #[test]
    fn unknown_characteristics_are_skipped() {
        let mut n = at_characteristic_discovery();
        n.handle(LinkEvent::CharacteristicFound {
            uuid: Uuid::Uuid16(0x2A37),
            handles: CharHandles { def: 16, value: 17 },
        });
        assert_eq!(n.link().tx, None);
        assert_eq!(n.link().rx, None);
    }

    #[test]
    fn missing_cccd_subscribes_at_next_handle_then_alternate() {
        let mut n = at_descriptor_discovery();
        n.handle(LinkEvent::DescriptorFound {
            uuid: Uuid::Uuid16(0x2901),
            handle: 13,
        });
        let out = n.handle(LinkEvent::DescriptorDiscoveryComplete);
        assert_eq!(
            out,
            cmds(&[LinkCommand::WriteCccd {
                handle: TX.value + 1,
                value: [0x01, 0x00]
            }])
        );

        let out = n.handle(LinkEvent::CccdWritten {
            handle: 13,
            result: Err(1),
        });
        assert_eq!(
            out,
            cmds(&[LinkCommand::WriteCccd {
                handle: TX.value + 2,
                value: [0x01, 0x00]
            }])
        );
        assert_eq!(n.state(), DiscoveryState::Subscribed);

        // Second refusal ends setup.
        let out = n.handle(LinkEvent::CccdWritten {
            handle: 14,
            result: Err(1),
        });
        assert!(out.is_empty());
        assert_eq!(n.state(), DiscoveryState::Stalled);
    }

    #[test]
    fn alternate_guess_can_succeed() {
        let mut n = at_descriptor_discovery();
        n.handle(LinkEvent::DescriptorDiscoveryComplete);
        n.handle(LinkEvent::CccdWritten {
            handle: 13,
            result: Err(1),
        });
        n.handle(LinkEvent::CccdWritten {
            handle: 14,
            result: Ok(()),
        });
        assert_eq!(n.state(), DiscoveryState::Ready);
    }

    #[test]
    fn discovered_cccd_is_not_second_guessed() {
        let mut n = at_descriptor_discovery();
        n.handle(LinkEvent::DescriptorFound {
            uuid: Uuid::Uuid16(0x2902),
            handle: 13,
        });
        n.handle(LinkEvent::DescriptorDiscoveryComplete);
        let out = n.handle(LinkEvent::CccdWritten {
            handle: 13,
            result: Err(3),
        });
        assert!(out.is_empty());
        assert_eq!(n.state(), DiscoveryState::Stalled);
    }

    #[test]
    fn descriptor_discovery_error_still_subscribes() {
        let mut n = at_descriptor_discovery();
        let out = n.handle(LinkEvent::DescriptorDiscoveryFailed { status: 5 });
        assert_eq!(
            out,
            cmds(&[LinkCommand::WriteCccd {
                handle: 13,
                value: [0x01, 0x00]
            }])
        );
        assert!(!n.link().service_discovered);
    }

    #[test]
    fn write_path_requires_rx_and_fitting_payload() {
        let n = scanning();
        assert_eq!(n.send(b"{}").unwrap_err(), LinkError::NotConnected);

        let n = ready();
        let req = n.send(b"{\"cmd\":\"hr_done\",\"bpm\":72}").unwrap();
        assert_eq!(req.target.conn, ConnHandle(7));
        assert_eq!(req.target.handle, RX.value);
        assert_eq!(n.send(b"").unwrap_err(), LinkError::EmptyPayload);
    }

    #[test]
    fn write_path_without_rx_characteristic() {
        let mut n = at_characteristic_discovery();
        n.handle(LinkEvent::CharacteristicFound {
            uuid: Uuid::Uuid128(WORKOUT_TX_CHAR_UUID),
            handles: TX,
        });
        assert_eq!(n.send(b"{}").unwrap_err(), LinkError::NoWriteHandle);
    }

    #[test]
    fn notification_frames_are_bounded() {
        assert_eq!(notification_frame(12, b""), None);
        assert_eq!(notification_frame(12, &[b'x'; MAX_FRAME_LEN]), None);
        let frame = [b'x'; MAX_FRAME_LEN - 1];
        assert_eq!(notification_frame(12, &frame).map(|f| f.len()), Some(511));
    }
}
