//! SSD1306 OLED display wrapper.

use embassy_nrf::peripherals::TWISPI0;
use embassy_nrf::twim::Twim;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embedded_graphics::mono_font::ascii::FONT_6X10;
use embedded_graphics::mono_font::MonoTextStyleBuilder;
use embedded_graphics::pixelcolor::BinaryColor;
use embedded_graphics::prelude::*;
use embedded_graphics::text::Text;
use heapless::String;
use ssd1306::mode::BufferedGraphicsMode;
use ssd1306::prelude::*;
use ssd1306::I2CDisplayInterface;
use ssd1306::Ssd1306;

use core::fmt::Write;

use crate::ui::status::{DisplayFeed, StatusView};

/// Type alias for the concrete display driver.
///
/// Generic over the I²C implementation so callers pass in their HAL's
/// I²C peripheral.
pub type Display<I2C> =
    Ssd1306<I2CInterface<I2C>, DisplaySize128x64, BufferedGraphicsMode<DisplaySize128x64>>;

/// Initialise the SSD1306 display and clear the screen.
pub fn init<I2C>(i2c: I2C) -> Display<I2C>
where
    I2C: embedded_hal::i2c::I2c,
{
    let interface = I2CDisplayInterface::new(i2c);
    let mut display = Ssd1306::new(interface, DisplaySize128x64, DisplayRotation::Rotate0)
        .into_buffered_graphics_mode();
    let _ = display.init();
    display.clear_buffer();
    let _ = display.flush();
    display
}

fn text_style() -> embedded_graphics::mono_font::MonoTextStyle<'static, BinaryColor> {
    MonoTextStyleBuilder::new()
        .font(&FONT_6X10)
        .text_color(BinaryColor::On)
        .build()
}

/// Render the status screen: link state and heart rate on top, then the
/// latest workout banner.
pub fn draw_status<I2C>(display: &mut Display<I2C>, view: &StatusView)
where
    I2C: embedded_hal::i2c::I2c,
{
    display.clear_buffer();

    let _ = Text::new(view.link_label(), Point::new(0, 8), text_style()).draw(display);

    if let Some(bpm) = view.bpm {
        let mut hr: String<12> = String::new();
        let _ = write!(hr, "{} bpm", bpm);
        let _ = Text::new(hr.as_str(), Point::new(80, 8), text_style()).draw(display);
    }

    if !view.headline.is_empty() {
        let _ = Text::new(view.headline.as_str(), Point::new(0, 24), text_style()).draw(display);
    }

    for (row, line) in view.details.iter().enumerate() {
        let y = 36 + (row as i32 * 10);
        let _ = Text::new(line.as_str(), Point::new(0, y), text_style()).draw(display);
    }

    let _ = display.flush();
}

/// Fold display updates into the status view and redraw after each.
#[embassy_executor::task]
pub async fn display_task(
    i2c: Twim<'static, TWISPI0>,
    feed: &'static DisplayFeed<CriticalSectionRawMutex>,
) -> ! {
    let mut display = init(i2c);
    let mut view = StatusView::new();
    draw_status(&mut display, &view);
    info!("display: ready");

    loop {
        view.apply(feed.next().await);
        // Coalesce bursts into one redraw.
        while let Some(update) = feed.try_next() {
            view.apply(update);
        }
        draw_status(&mut display, &view);
    }
}
