//! Routing of inbound workout frames.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::config::TOPIC_WORKOUT;
use crate::session::SessionQueue;
use crate::telemetry::Transport;
use crate::workout::{parse, WorkoutEvent};

/// Handle one notification frame from the tracker.
///
/// The raw frame always goes to telemetry first. A heart-rate request
/// starts a capture for lap 0; other events are logged and returned for
/// display. Frames that do not parse are dropped.
pub fn dispatch<T, M, const N: usize>(
    frame: &[u8],
    transport: &T,
    sessions: &SessionQueue<M, N>,
) -> Option<WorkoutEvent>
where
    T: Transport,
    M: RawMutex,
{
    if !transport.publish(TOPIC_WORKOUT, frame) {
        debug!("workout: raw frame not forwarded");
    }

    let event = match parse(frame) {
        Ok(event) => event,
        Err(e) => {
            warn!("workout: dropping frame ({} bytes): {}", frame.len(), e);
            return None;
        }
    };

    if event == WorkoutEvent::HrRequest {
        info!("workout: HR request, starting capture");
        if sessions.start(0).is_err() {
            error!("workout: could not start HR capture");
        }
    } else {
        info!("workout: {}", event.headline().as_str());
        for line in event.details() {
            info!("workout:   {}", line.as_str());
        }
    }
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::HrSessionCommand;
    use crate::telemetry::LineTransport;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    #[test]
    fn hr_request_starts_lap_zero_capture() {
        let transport: LineTransport<NoopRawMutex> = LineTransport::new();
        let sessions: SessionQueue<NoopRawMutex, 4> = SessionQueue::new();

        let event = dispatch(br#"{"cmd":"hr_req"}"#, &transport, &sessions);
        assert_eq!(event, Some(WorkoutEvent::HrRequest));
        assert_eq!(sessions.try_receive(), Some(HrSessionCommand::Start { lap: 0 }));
    }

    #[test]
    fn every_frame_is_forwarded_raw() {
        let transport: LineTransport<NoopRawMutex> = LineTransport::new();
        let sessions: SessionQueue<NoopRawMutex, 4> = SessionQueue::new();

        dispatch(br#"{"cmd":"hr_req"}"#, &transport, &sessions);
        dispatch(b"not a frame", &transport, &sessions);

        assert_eq!(
            transport.try_next_line().as_deref(),
            Some(&b"pulsetracker/workout {\"cmd\":\"hr_req\"}\n"[..])
        );
        assert_eq!(
            transport.try_next_line().as_deref(),
            Some(&b"pulsetracker/workout not a frame\n"[..])
        );
    }

    #[test]
    fn workout_events_do_not_touch_the_session() {
        let transport: LineTransport<NoopRawMutex> = LineTransport::new();
        let sessions: SessionQueue<NoopRawMutex, 4> = SessionQueue::new();

        let event = dispatch(
            br#"{"event":"lap","lap":1,"lap_ms":65230,"split_ms":65230}"#,
            &transport,
            &sessions,
        );
        assert!(matches!(event, Some(WorkoutEvent::Lap { lap_number: 1, .. })));
        assert_eq!(sessions.try_receive(), None);
    }

    #[test]
    fn unparseable_frames_are_dropped() {
        let transport: LineTransport<NoopRawMutex> = LineTransport::new();
        let sessions: SessionQueue<NoopRawMutex, 4> = SessionQueue::new();
        assert_eq!(dispatch(br#"{"lap":1}"#, &transport, &sessions), None);
    }
}
