//! What the OLED shows, independent of the panel driver.
//!
//! Other tasks post [`DisplayUpdate`]s; the display task folds them into a
//! [`StatusView`] and redraws.

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::ble::negotiator::DiscoveryState;
use crate::workout::{Line, WorkoutEvent};

/// Pending updates before new ones are dropped.
const DISPLAY_QUEUE_DEPTH: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayUpdate {
    Link(DiscoveryState),
    Workout(WorkoutEvent),
    HeartRate(u16),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusView {
    pub link: DiscoveryState,
    pub bpm: Option<u16>,
    pub headline: Line,
    pub details: Vec<Line, 3>,
}

impl Default for StatusView {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusView {
    pub const fn new() -> Self {
        Self {
            link: DiscoveryState::Idle,
            bpm: None,
            headline: Line::new(),
            details: Vec::new(),
        }
    }

    pub fn apply(&mut self, update: DisplayUpdate) {
        match update {
            DisplayUpdate::Link(state) => {
                // A new link starts with a clean slate.
                if state == DiscoveryState::Scanning {
                    self.headline.clear();
                    self.details.clear();
                }
                self.link = state;
            }
            DisplayUpdate::Workout(event) => {
                self.headline = event.headline();
                self.details = event.details();
            }
            DisplayUpdate::HeartRate(bpm) => self.bpm = Some(bpm).filter(|b| *b > 0),
        }
    }

    /// Short status for the top row.
    pub fn link_label(&self) -> &'static str {
        match self.link {
            DiscoveryState::Idle => "Waiting",
            DiscoveryState::Scanning => "Scanning",
            DiscoveryState::Connecting => "Connecting",
            DiscoveryState::ParamsRequested
            | DiscoveryState::MtuExchanging
            | DiscoveryState::ServiceDiscovery
            | DiscoveryState::CharacteristicDiscovery
            | DiscoveryState::DescriptorDiscovery
            | DiscoveryState::Subscribed => "Discovering",
            DiscoveryState::Ready => "Tracker ready",
            DiscoveryState::Stalled => "Tracker error",
        }
    }
}

/// Queue of display updates.
pub struct DisplayFeed<M: RawMutex> {
    channel: Channel<M, DisplayUpdate, DISPLAY_QUEUE_DEPTH>,
}

impl<M: RawMutex> Default for DisplayFeed<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> DisplayFeed<M> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Never blocks; a full queue drops the update.
    pub fn post(&self, update: DisplayUpdate) {
        if self.channel.try_send(update).is_err() {
            trace!("display: queue full, update dropped");
        }
    }

    pub async fn next(&self) -> DisplayUpdate {
        self.channel.receive().await
    }

    pub fn try_next(&self) -> Option<DisplayUpdate> {
        self.channel.try_receive().ok()
    }
}
