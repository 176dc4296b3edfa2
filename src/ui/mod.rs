//! User interface subsystem - SSD1306 OLED status screen.
//!
//! ## Components
//!
//! - **Status**: the view model other tasks update through `DisplayFeed`
//! - **Display**: SSD1306 128×64 OLED via I²C (`embedded` only)

pub mod status;

#[cfg(feature = "embedded")]
pub mod display;
