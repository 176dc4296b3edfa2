//! Hand-off of outbound frames from other tasks to the link task.
//!
//! The link task is the only owner of the negotiator. After every event it
//! publishes the current write target here; other tasks validate their
//! frames against that snapshot and queue them. The link task re-checks
//! each frame against the live link before writing it.

use core::cell::Cell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use heapless::Vec;

use crate::ble::link::WriteTarget;
use crate::config::{OUTBOUND_FRAME_LEN, OUTBOUND_QUEUE_DEPTH};
use crate::error::LinkError;
use crate::session::MessageSink;

pub type OutboundFrame = Vec<u8, OUTBOUND_FRAME_LEN>;

pub struct LinkOutbox<M: RawMutex> {
    target: Mutex<M, Cell<Result<WriteTarget, LinkError>>>,
    frames: Channel<M, OutboundFrame, OUTBOUND_QUEUE_DEPTH>,
}

impl<M: RawMutex> Default for LinkOutbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> LinkOutbox<M> {
    pub const fn new() -> Self {
        Self {
            target: Mutex::new(Cell::new(Err(LinkError::NotConnected))),
            frames: Channel::new(),
        }
    }

    /// Record the link's current write target. Losing the target drops
    /// every frame still queued for the old link.
    pub fn publish_target(&self, target: Result<WriteTarget, LinkError>) {
        self.target.lock(|t| t.set(target));
        if target.is_err() {
            while self.frames.try_receive().is_ok() {}
        }
    }

    pub fn target(&self) -> Result<WriteTarget, LinkError> {
        self.target.lock(|t| t.get())
    }

    /// Validate `msg` against the published target and queue it.
    pub fn submit(&self, msg: &[u8]) -> Result<(), LinkError> {
        let target = self.target()?;
        target.check(msg)?;
        let frame = OutboundFrame::from_slice(msg).map_err(|_| LinkError::PayloadTooLarge)?;
        self.frames.try_send(frame).map_err(|_| LinkError::Busy)
    }

    pub async fn next_frame(&self) -> OutboundFrame {
        self.frames.receive().await
    }

    pub fn try_next_frame(&self) -> Option<OutboundFrame> {
        self.frames.try_receive().ok()
    }
}

impl<M: RawMutex> MessageSink for LinkOutbox<M> {
    fn send(&self, msg: &[u8]) -> Result<(), LinkError> {
        self.submit(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::ConnHandle;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    const TARGET: WriteTarget = WriteTarget {
        conn: ConnHandle(1),
        handle: 15,
        mtu: 247,
        mtu_confirmed: true,
    };

    #[test]
    fn rejects_until_a_target_is_published() {
        let outbox: LinkOutbox<NoopRawMutex> = LinkOutbox::new();
        assert_eq!(outbox.submit(b"{}"), Err(LinkError::NotConnected));

        outbox.publish_target(Err(LinkError::NoWriteHandle));
        assert_eq!(outbox.submit(b"{}"), Err(LinkError::NoWriteHandle));

        outbox.publish_target(Ok(TARGET));
        assert_eq!(outbox.submit(b"{}"), Ok(()));
        assert_eq!(outbox.try_next_frame().as_deref(), Some(&b"{}"[..]));
    }

    #[test]
    fn queue_depth_is_bounded() {
        let outbox: LinkOutbox<NoopRawMutex> = LinkOutbox::new();
        outbox.publish_target(Ok(TARGET));
        for _ in 0..OUTBOUND_QUEUE_DEPTH {
            assert_eq!(outbox.submit(b"x"), Ok(()));
        }
        assert_eq!(outbox.submit(b"x"), Err(LinkError::Busy));
    }

    #[test]
    fn oversize_frames_are_refused() {
        let outbox: LinkOutbox<NoopRawMutex> = LinkOutbox::new();
        outbox.publish_target(Ok(TARGET));
        assert_eq!(
            outbox.submit(&[b'x'; OUTBOUND_FRAME_LEN + 1]),
            Err(LinkError::PayloadTooLarge)
        );
        assert_eq!(outbox.submit(b""), Err(LinkError::EmptyPayload));
    }

    #[test]
    fn losing_the_link_drops_queued_frames() {
        let outbox: LinkOutbox<NoopRawMutex> = LinkOutbox::new();
        outbox.publish_target(Ok(TARGET));
        outbox.submit(b"{}").unwrap();
        outbox.publish_target(Err(LinkError::NotConnected));
        assert_eq!(outbox.try_next_frame(), None);
    }
}
