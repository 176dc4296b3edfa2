//! PulseTracker receiver firmware for the nRF52840.
//!
//! Task layout:
//!
//! - `softdevice_task`: SoftDevice event pump
//! - `link_task`: scan, connect, GATT discovery and the notification loop
//! - `session_task`: heart-rate capture sessions
//! - `pulse_task`: SAADC sampling and beat detection
//! - `heart_rate_task`: rate-limited BPM telemetry
//! - `usb_device_task`, `telemetry_tx_task`, `telemetry_rx_task`: USB CDC bridge
//! - `buzzer_task`, `display_task`: local feedback

#![no_std]
#![no_main]

use defmt::{info, unwrap};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_nrf::gpio::{Level, Output, OutputDrive};
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::saadc::{self, ChannelConfig, Saadc};
use embassy_nrf::{bind_interrupts, peripherals, twim};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use nrf_softdevice::{raw, Softdevice};
use panic_probe as _;

use pulsetracker::ble::outbound::LinkOutbox;
use pulsetracker::ble::softdevice::{link_task, softdevice_task, LinkResources};
use pulsetracker::buzzer::{buzzer_task, BuzzerRequest};
use pulsetracker::config;
use pulsetracker::sensor::saadc::pulse_task;
use pulsetracker::sensor::PulseFeed;
use pulsetracker::session::task::{session_task, HrQueue};
use pulsetracker::session::SessionQueue;
use pulsetracker::telemetry::{heart_rate_task, LineTransport};
use pulsetracker::ui::display::display_task;
use pulsetracker::ui::status::DisplayFeed;
use pulsetracker::usb::serial_bridge::{self, telemetry_rx_task, telemetry_tx_task, usb_device_task};

bind_interrupts!(struct Irqs {
    SAADC => saadc::InterruptHandler;
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<peripherals::TWISPI0>;
});

type CsMutex = CriticalSectionRawMutex;

static HR_QUEUE: HrQueue = SessionQueue::new();
static PULSE_FEED: PulseFeed<CsMutex> = PulseFeed::new();
static OUTBOX: LinkOutbox<CsMutex> = LinkOutbox::new();
static TELEMETRY: LineTransport<CsMutex> = LineTransport::new();
static DISPLAY: DisplayFeed<CsMutex> = DisplayFeed::new();
static BUZZER: BuzzerRequest<CsMutex> = BuzzerRequest::new();

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t {
            att_mtu: config::BLE_PREFERRED_MTU,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 0,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: config::OWN_DEVICE_NAME.as_ptr() as _,
            current_len: config::OWN_DEVICE_NAME.len() as u16,
            max_len: config::OWN_DEVICE_NAME.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        // Workout service, TX and RX characteristics.
        common_vs_uuid: Some(raw::ble_common_cfg_vs_uuid_t { vs_uuid_count: 4 }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("pulsetracker starting");

    // Keep HAL interrupts clear of the priorities the SoftDevice reserves.
    let mut nrf_config = embassy_nrf::config::Config::default();
    nrf_config.gpiote_interrupt_priority = Priority::P2;
    nrf_config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(nrf_config);
    interrupt::USBD.set_priority(Priority::P2);
    interrupt::CLOCK_POWER.set_priority(Priority::P2);
    interrupt::SAADC.set_priority(Priority::P3);
    interrupt::SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0.set_priority(Priority::P3);

    let sd: &'static Softdevice = Softdevice::enable(&softdevice_config());
    unwrap!(spawner.spawn(softdevice_task(sd)));

    // Pulse sensor on AIN0 / P0.02.
    let channel = ChannelConfig::single_ended(p.P0_02);
    let adc = Saadc::new(p.SAADC, Irqs, saadc::Config::default(), [channel]);
    unwrap!(spawner.spawn(pulse_task(adc, &PULSE_FEED)));

    unwrap!(spawner.spawn(session_task(&HR_QUEUE, &PULSE_FEED, &OUTBOX)));

    let usb = serial_bridge::init(p.USBD);
    unwrap!(spawner.spawn(usb_device_task(usb.device)));
    unwrap!(spawner.spawn(telemetry_tx_task(usb.sender, &TELEMETRY)));
    unwrap!(spawner.spawn(telemetry_rx_task(usb.receiver, &TELEMETRY, &BUZZER)));
    unwrap!(spawner.spawn(heart_rate_task(&PULSE_FEED, &TELEMETRY, &DISPLAY)));

    let buzzer = Output::new(p.P0_13, Level::Low, OutputDrive::Standard);
    unwrap!(spawner.spawn(buzzer_task(buzzer, &BUZZER)));

    let i2c = twim::Twim::new(p.TWISPI0, Irqs, p.P0_26, p.P0_27, twim::Config::default());
    unwrap!(spawner.spawn(display_task(i2c, &DISPLAY)));

    unwrap!(spawner.spawn(link_task(
        sd,
        LinkResources {
            sessions: &HR_QUEUE,
            outbox: &OUTBOX,
            telemetry: &TELEMETRY,
            display: &DISPLAY,
        },
    )));

    info!("all tasks spawned");
}
