//! Nordic S140 driver for the negotiator.
//!
//! Executes each `LinkCommand` against the SoftDevice and feeds the
//! outcome back as a `LinkEvent`. Once the link is ready, notifications
//! are dispatched to the workout router and queued outbound frames are
//! written to the RX characteristic until the peripheral disconnects.
//!
//! nrf-softdevice discovers a whole service in one call, so
//! `DiscoverService` runs the discovery and the characteristic and
//! descriptor phases replay what it cached.

use core::slice;

use embassy_futures::select::select;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::{Duration, Instant, Timer};
use heapless::{Deque, Vec};
use nrf_softdevice::ble::gatt_client::{
    self, Characteristic, Client, Descriptor, DiscoverError, HvxType,
};
use nrf_softdevice::ble::{central, Address, Connection, Uuid as SdUuid};
use nrf_softdevice::{raw, Softdevice};

use crate::ble::link::CharHandles;
use crate::ble::negotiator::{
    notification_frame, DiscoveryState, LinkCommand, LinkCommands, LinkEvent, LinkTimer, Negotiator,
};
use crate::ble::outbound::LinkOutbox;
use crate::ble::{ConnHandle, ConnParams, HandleRange, PeerAddress, Uuid};
use crate::config::{
    BLE_SCAN_DURATION_MS, BLE_SCAN_INTERVAL, BLE_SCAN_WINDOW, CCCD_UUID, MAX_FRAME_LEN,
    WORKOUT_RX_CHAR_UUID, WORKOUT_SERVICE_UUID, WORKOUT_TX_CHAR_UUID,
};
use crate::session::task::HrQueue;
use crate::telemetry::LineTransport;
use crate::ui::status::{DisplayFeed, DisplayUpdate};
use crate::workout::dispatch::dispatch;

/// Status reported for stack failures that carry no numeric code.
const STATUS_STACK_ERROR: u32 = 1;

/// nrf-softdevice does not surface the HCI disconnect reason.
const REASON_UNKNOWN: u8 = 0;

const MAX_CHARACTERISTICS: usize = 8;
const MAX_DESCRIPTORS: usize = 16;

/// Shared state the link task talks to.
pub struct LinkResources {
    pub sessions: &'static HrQueue,
    pub outbox: &'static LinkOutbox<CriticalSectionRawMutex>,
    pub telemetry: &'static LineTransport<CriticalSectionRawMutex>,
    pub display: &'static DisplayFeed<CriticalSectionRawMutex>,
}

/// One notification from the TX characteristic.
pub struct Notification {
    data: Vec<u8, MAX_FRAME_LEN>,
}

/// Caches the workout service layout found by `gatt_client::discover`.
pub struct WorkoutClient {
    tx_uuid: SdUuid,
    rx_uuid: SdUuid,
    cccd_uuid: SdUuid,
    /// TX value handle; notifications from any other handle are ignored.
    tx_value: u16,
    characteristics: Vec<(Uuid, CharHandles), MAX_CHARACTERISTICS>,
    descriptors: Vec<(Uuid, u16), MAX_DESCRIPTORS>,
}

impl WorkoutClient {
    fn classify(&self, uuid: Option<SdUuid>) -> Uuid {
        match uuid {
            Some(u) if u == self.tx_uuid => Uuid::Uuid128(WORKOUT_TX_CHAR_UUID),
            Some(u) if u == self.rx_uuid => Uuid::Uuid128(WORKOUT_RX_CHAR_UUID),
            Some(u) if u == self.cccd_uuid => Uuid::Uuid16(CCCD_UUID),
            _ => Uuid::Uuid16(0),
        }
    }

    /// Handle span covered by the service, from the service declaration
    /// just before the first characteristic to the last attribute seen.
    fn service_range(&self) -> Option<HandleRange> {
        let first = self.characteristics.iter().map(|(_, h)| h.def).min()?;
        let last_value = self.characteristics.iter().map(|(_, h)| h.value).max()?;
        let last_descriptor = self.descriptors.iter().map(|(_, h)| *h).max().unwrap_or(0);
        Some(HandleRange {
            start: first.saturating_sub(1),
            end: last_value.max(last_descriptor),
        })
    }
}

impl Client for WorkoutClient {
    type Event = Notification;

    fn uuid() -> SdUuid {
        SdUuid::new_128(&WORKOUT_SERVICE_UUID)
    }

    fn new_undiscovered(_conn: Connection) -> Self {
        Self {
            tx_uuid: SdUuid::new_128(&WORKOUT_TX_CHAR_UUID),
            rx_uuid: SdUuid::new_128(&WORKOUT_RX_CHAR_UUID),
            cccd_uuid: SdUuid::new_16(CCCD_UUID),
            tx_value: 0,
            characteristics: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    fn discovered_characteristic(
        &mut self,
        characteristic: &Characteristic,
        descriptors: &[Descriptor],
    ) {
        let uuid = self.classify(characteristic.uuid);
        let handles = CharHandles {
            def: characteristic.handle_decl,
            value: characteristic.handle_value,
        };
        if self.characteristics.push((uuid, handles)).is_err() {
            warn!("ble: too many characteristics, ignoring handle {}", handles.def);
        }
        for d in descriptors {
            let uuid = self.classify(d.uuid);
            if self.descriptors.push((uuid, d.handle)).is_err() {
                warn!("ble: too many descriptors, ignoring handle {}", d.handle);
            }
        }
    }

    fn discovery_complete(&mut self) -> Result<(), DiscoverError> {
        Ok(())
    }

    fn on_hvx(
        &self,
        _conn: &Connection,
        type_: HvxType,
        handle: u16,
        data: &[u8],
    ) -> Option<Self::Event> {
        if !matches!(type_, HvxType::Notification) || handle != self.tx_value {
            return None;
        }
        let frame = notification_frame(handle, data)?;
        Vec::from_slice(frame).ok().map(|data| Notification { data })
    }
}

fn peer_address(peer: &PeerAddress) -> Address {
    Address::from_raw(raw::ble_gap_addr_t {
        _bitfield_1: raw::ble_gap_addr_t::new_bitfield_1(0, peer.kind),
        addr: peer.bytes,
    })
}

fn gap_conn_params(params: &ConnParams) -> raw::ble_gap_conn_params_t {
    raw::ble_gap_conn_params_t {
        min_conn_interval: params.interval_min,
        max_conn_interval: params.interval_max,
        slave_latency: params.latency,
        conn_sup_timeout: params.supervision_timeout,
    }
}

/// SoftDevice timeouts count in 10 ms units.
fn ticks_10ms(ms: u32) -> u16 {
    (ms / 10).min(u16::MAX as u32) as u16
}

struct LinkDriver {
    sd: &'static Softdevice,
    res: LinkResources,
    negotiator: Negotiator,
    conn: Option<Connection>,
    client: Option<WorkoutClient>,
    timer: Option<(LinkTimer, Instant)>,
    pending: Deque<LinkCommand, 8>,
}

impl LinkDriver {
    fn enqueue(&mut self, cmds: LinkCommands) {
        for cmd in cmds {
            if self.pending.push_back(cmd).is_err() {
                error!("ble: command queue full, dropping {}", cmd);
            }
        }
    }

    fn feed(&mut self, event: LinkEvent<'_>) {
        let before = self.negotiator.state();
        let cmds = self.negotiator.handle(event);
        self.res.outbox.publish_target(self.negotiator.write_target());
        let after = self.negotiator.state();
        if after != before {
            self.res.display.post(DisplayUpdate::Link(after));
        }
        self.enqueue(cmds);
    }

    async fn run(&mut self) -> ! {
        let cmds = self.negotiator.start();
        self.res.display.post(DisplayUpdate::Link(self.negotiator.state()));
        self.enqueue(cmds);

        loop {
            if let Some(cmd) = self.pending.pop_front() {
                self.execute(cmd).await;
                continue;
            }

            if let Some((timer, at)) = self.timer.take() {
                Timer::at(at).await;
                self.feed(LinkEvent::TimerFired(timer));
                continue;
            }

            match self.negotiator.state() {
                DiscoveryState::Ready | DiscoveryState::Stalled => self.serve_connection().await,
                state => {
                    // Nothing scheduled outside a settled state: start over.
                    warn!("ble: no work pending in {}, restarting", state);
                    if let Some(conn) = self.conn.take() {
                        if let Err(e) = conn.disconnect() {
                            warn!("ble: disconnect failed: {}", e);
                        }
                        self.client = None;
                        self.feed(LinkEvent::Disconnected {
                            reason: REASON_UNKNOWN,
                        });
                    } else {
                        self.feed(LinkEvent::TimerFired(LinkTimer::Reconnect));
                    }
                }
            }
        }
    }

    async fn execute(&mut self, cmd: LinkCommand) {
        debug!("ble: executing {}", cmd);
        match cmd {
            LinkCommand::StartScan => self.scan().await,
            // Scanning stops when the callback reports a match.
            LinkCommand::CancelScan => {}
            LinkCommand::Connect { peer, timeout_ms } => self.connect(peer, timeout_ms).await,
            LinkCommand::UpdateConnParams(params) => {
                let Some(conn) = self.conn.as_ref() else {
                    return self.lost();
                };
                let result = conn.set_conn_params(gap_conn_params(&params)).map_err(|e| {
                    warn!("ble: conn param update rejected: {}", e);
                    STATUS_STACK_ERROR
                });
                self.feed(LinkEvent::ConnParamsRequested { result });
            }
            LinkCommand::ExchangeMtu { preferred } => {
                let Some(conn) = self.conn.as_ref() else {
                    return self.lost();
                };
                match gatt_client::att_mtu_exchange(conn, preferred).await {
                    Ok(()) => {
                        let mtu = conn.att_mtu();
                        self.feed(LinkEvent::MtuExchanged { mtu });
                    }
                    Err(e) => {
                        warn!("ble: MTU exchange failed: {}", e);
                        self.feed(LinkEvent::MtuExchangeFailed {
                            status: STATUS_STACK_ERROR,
                        });
                    }
                }
            }
            LinkCommand::StartTimer { timer, after_ms } => {
                let at = Instant::now() + Duration::from_millis(after_ms as u64);
                self.timer = Some((timer, at));
            }
            LinkCommand::DiscoverService { .. } => self.discover_service().await,
            LinkCommand::DiscoverCharacteristics { range } => {
                let found: Vec<(Uuid, CharHandles), MAX_CHARACTERISTICS> = match &self.client {
                    Some(client) => client
                        .characteristics
                        .iter()
                        .filter(|(_, h)| h.def >= range.start && h.def <= range.end)
                        .copied()
                        .collect(),
                    None => Vec::new(),
                };
                for (uuid, handles) in found {
                    self.feed(LinkEvent::CharacteristicFound { uuid, handles });
                }
                self.feed(LinkEvent::CharacteristicDiscoveryComplete);
            }
            LinkCommand::DiscoverDescriptors { range } => {
                let found: Vec<(Uuid, u16), MAX_DESCRIPTORS> = match &self.client {
                    Some(client) => client
                        .descriptors
                        .iter()
                        .filter(|(_, h)| *h >= range.start && *h <= range.end)
                        .copied()
                        .collect(),
                    None => Vec::new(),
                };
                for (uuid, handle) in found {
                    self.feed(LinkEvent::DescriptorFound { uuid, handle });
                }
                self.feed(LinkEvent::DescriptorDiscoveryComplete);
            }
            LinkCommand::WriteCccd { handle, value } => {
                let Some(conn) = self.conn.as_ref() else {
                    return self.lost();
                };
                let result = gatt_client::write(conn, handle, &value).await.map_err(|e| {
                    warn!("ble: CCCD write to {} failed: {}", handle, e);
                    STATUS_STACK_ERROR
                });
                self.feed(LinkEvent::CccdWritten { handle, result });
            }
            LinkCommand::CancelCapture => self.res.sessions.cancel(),
        }

        if self.conn.as_ref().is_some_and(|c| c.handle().is_none()) {
            self.lost();
        }
    }

    /// The connection went away underneath a command.
    fn lost(&mut self) {
        if self.conn.take().is_some() || self.negotiator.link().is_connected() {
            self.client = None;
            self.feed(LinkEvent::Disconnected {
                reason: REASON_UNKNOWN,
            });
        }
    }

    async fn scan(&mut self) {
        let config = central::ScanConfig {
            active: true,
            interval: BLE_SCAN_INTERVAL,
            window: BLE_SCAN_WINDOW,
            timeout: ticks_10ms(BLE_SCAN_DURATION_MS),
            ..Default::default()
        };

        let negotiator = &mut self.negotiator;
        let mut matched = LinkCommands::new();
        let result = central::scan(self.sd, &config, |params| {
            let data =
                unsafe { slice::from_raw_parts(params.data.p_data, params.data.len as usize) };
            let peer = PeerAddress {
                kind: params.peer_addr.addr_type(),
                bytes: params.peer_addr.addr,
            };
            let cmds = negotiator.handle(LinkEvent::Advertisement { peer, data });
            if cmds.is_empty() {
                return None;
            }
            matched = cmds;
            Some(())
        })
        .await;

        match result {
            Ok(()) => {
                self.res.display.post(DisplayUpdate::Link(self.negotiator.state()));
                self.enqueue(matched);
            }
            Err(central::ScanError::Timeout) => self.feed(LinkEvent::ScanComplete),
            Err(e) => {
                warn!("ble: scan failed: {}", e);
                self.feed(LinkEvent::ScanComplete);
            }
        }
    }

    async fn connect(&mut self, peer: PeerAddress, timeout_ms: u32) {
        let address = peer_address(&peer);
        let whitelist = [&address];
        let config = central::ConnectConfig {
            scan_config: central::ScanConfig {
                whitelist: Some(&whitelist),
                timeout: ticks_10ms(timeout_ms),
                ..Default::default()
            },
            conn_params: gap_conn_params(&crate::ble::negotiator::CONN_PARAMS),
            ..Default::default()
        };

        match central::connect(self.sd, &config).await {
            Ok(conn) => {
                let handle = conn.handle().unwrap_or(0);
                self.conn = Some(conn);
                self.feed(LinkEvent::Connected {
                    conn: ConnHandle(handle),
                });
            }
            Err(e) => {
                warn!("ble: connect failed: {}", e);
                self.feed(LinkEvent::ConnectFailed {
                    status: STATUS_STACK_ERROR,
                });
            }
        }
    }

    async fn discover_service(&mut self) {
        let Some(conn) = self.conn.as_ref() else {
            return self.lost();
        };
        match gatt_client::discover::<WorkoutClient>(conn).await {
            Ok(client) => {
                let range = client.service_range();
                self.client = Some(client);
                match range {
                    Some(range) => self.feed(LinkEvent::ServiceFound { range }),
                    None => self.feed(LinkEvent::ServiceDiscoveryComplete),
                }
            }
            Err(DiscoverError::ServiceNotFound) => self.feed(LinkEvent::ServiceDiscoveryComplete),
            Err(e) => {
                warn!("ble: service discovery failed: {}", e);
                self.feed(LinkEvent::ServiceDiscoveryFailed {
                    status: STATUS_STACK_ERROR,
                });
            }
        }
    }

    /// Route notifications and drain outbound frames until disconnect.
    async fn serve_connection(&mut self) {
        let Some(conn) = self.conn.clone() else {
            return self.lost();
        };
        let res = &self.res;
        let negotiator = &self.negotiator;
        // Stalled before discovery finished: nothing to route, wait out the link.
        let client = self
            .client
            .get_or_insert_with(|| WorkoutClient::new_undiscovered(conn.clone()));
        client.tx_value = negotiator.link().tx.map(|h| h.value).unwrap_or(0);
        let client = &*client;

        let notifications = gatt_client::run(&conn, client, |n: Notification| {
            if let Some(event) = dispatch(&n.data, res.telemetry, res.sessions) {
                res.display.post(DisplayUpdate::Workout(event));
            }
        });
        let writes = async {
            loop {
                let frame = res.outbox.next_frame().await;
                match negotiator.send(&frame) {
                    Ok(req) => {
                        let handle = req.target.handle;
                        match gatt_client::write(&conn, handle, req.payload).await {
                            Ok(()) => debug!("ble: wrote {} bytes to {}", frame.len(), handle),
                            Err(e) => warn!("ble: write to {} failed: {}", handle, e),
                        }
                    }
                    Err(e) => warn!("ble: outbound frame dropped: {}", e),
                }
            }
        };
        select(notifications, writes).await;

        info!("ble: tracker disconnected");
        self.conn = None;
        self.client = None;
        self.feed(LinkEvent::Disconnected {
            reason: REASON_UNKNOWN,
        });
    }
}

/// BLE link task: owns the negotiator and the connection.
#[embassy_executor::task]
pub async fn link_task(sd: &'static Softdevice, res: LinkResources) -> ! {
    info!("ble: link task running");
    let mut driver = LinkDriver {
        sd,
        res,
        negotiator: Negotiator::new(),
        conn: None,
        client: None,
        timer: None,
        pending: Deque::new(),
    };
    driver.run().await
}

/// SoftDevice event pump.
#[embassy_executor::task]
pub async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}
