//! USB CDC-ACM telemetry bridge.
//!
//! Initialises the Embassy USB stack on the nRF52840 USB peripheral with a
//! single serial function. Outbound telemetry lines are written to the
//! host as-is; inbound bytes are reassembled into lines and routed
//! (operating mode, buzzer trigger).

use embassy_nrf::usb::vbus_detect::HardwareVbusDetect;
use embassy_nrf::usb::Driver;
use embassy_nrf::{self, bind_interrupts, peripherals};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_usb::class::cdc_acm::{CdcAcmClass, Receiver, Sender, State};
use embassy_usb::driver::EndpointError;
use embassy_usb::{Builder, Config, UsbDevice};
use static_cell::StaticCell;

use crate::buzzer::{Buzzer, BuzzerRequest};
use crate::config;
use crate::telemetry::{Inbound, LineAssembler, LineTransport, LINE_CAPACITY};

bind_interrupts!(struct Irqs {
    USBD => embassy_nrf::usb::InterruptHandler<peripherals::USBD>;
    CLOCK_POWER => embassy_nrf::usb::vbus_detect::InterruptHandler;
});

pub type UsbDriver = Driver<'static, peripherals::USBD, HardwareVbusDetect>;

static CDC_STATE: StaticCell<State> = StaticCell::new();
static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 128]> = StaticCell::new();

/// Build result: the device runner and both halves of the serial port.
pub struct UsbSerialBridge {
    pub device: UsbDevice<'static, UsbDriver>,
    pub sender: Sender<'static, UsbDriver>,
    pub receiver: Receiver<'static, UsbDriver>,
}

/// Initialise the USB stack and create the CDC-ACM function.
///
/// Must be called exactly once.  All static buffers are consumed here.
pub fn init(usbd: peripherals::USBD) -> UsbSerialBridge {
    let driver = Driver::new(usbd, Irqs, HardwareVbusDetect::new(Irqs));

    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.max_power = 100; // mA
    usb_config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        driver,
        usb_config,
        USB_CONFIG_DESC.init([0u8; 256]),
        USB_BOS_DESC.init([0u8; 256]),
        USB_MSOS_DESC.init([0u8; 256]),
        USB_CTRL_BUF.init([0u8; 128]),
    );

    let class = CdcAcmClass::new(
        &mut builder,
        CDC_STATE.init(State::new()),
        config::USB_PACKET_SIZE,
    );
    let (sender, receiver) = class.split();
    let device = builder.build();

    info!("usb: CDC-ACM telemetry bridge initialised");

    UsbSerialBridge {
        device,
        sender,
        receiver,
    }
}

/// Run the USB device stack - must be spawned as a dedicated task.
#[embassy_executor::task]
pub async fn usb_device_task(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    info!("usb: device task started");
    device.run().await
}

async fn write_line(sender: &mut Sender<'static, UsbDriver>, line: &[u8]) -> Result<(), EndpointError> {
    let packet = config::USB_PACKET_SIZE as usize;
    for chunk in line.chunks(packet) {
        sender.write_packet(chunk).await?;
    }
    // A full-size final packet needs a ZLP to end the transfer.
    if line.len() % packet == 0 {
        sender.write_packet(&[]).await?;
    }
    Ok(())
}

/// Forward queued telemetry lines to the host.
///
/// Lines produced while no terminal is attached stay queued until the
/// queue fills, after which producers drop them.
#[embassy_executor::task]
pub async fn telemetry_tx_task(
    mut sender: Sender<'static, UsbDriver>,
    transport: &'static LineTransport<CriticalSectionRawMutex>,
) -> ! {
    loop {
        sender.wait_connection().await;
        info!("usb: host attached");
        loop {
            let line = transport.next_line().await;
            if let Err(e) = write_line(&mut sender, &line).await {
                warn!("usb: line dropped ({} bytes): {}", line.len(), e);
                break;
            }
        }
        info!("usb: host detached");
    }
}

/// Read inbound lines from the host and act on them.
#[embassy_executor::task]
pub async fn telemetry_rx_task(
    mut receiver: Receiver<'static, UsbDriver>,
    transport: &'static LineTransport<CriticalSectionRawMutex>,
    buzzer: &'static BuzzerRequest<CriticalSectionRawMutex>,
) -> ! {
    let mut assembler: LineAssembler<LINE_CAPACITY> = LineAssembler::new();
    let mut packet = [0u8; config::USB_PACKET_SIZE as usize];

    loop {
        receiver.wait_connection().await;
        loop {
            let n = match receiver.read_packet(&mut packet).await {
                Ok(n) => n,
                Err(EndpointError::Disabled) => break,
                Err(EndpointError::BufferOverflow) => {
                    warn!("usb: oversized packet dropped");
                    continue;
                }
            };
            assembler.feed(&packet[..n], |line| {
                if transport.handle_inbound(line) == Inbound::Buzz {
                    buzzer.trigger();
                }
            });
        }
    }
}
