//! Workout frames from the tracker.
//!
//! The tracker notifies compact, flat JSON-like frames on the TX
//! characteristic:
//!
//! ```text
//! {"cmd":"hr_req"}
//! {"event":"start","mode":"intervals","laps":8}
//! {"event":"lap","lap":3,"lap_ms":65230,"split_ms":196000}
//! {"event":"done","laps":8,"total_ms":540000}
//! {"event":"stop","laps":2,"total_ms":130000}
//! {"event":"status","state":"running","lap":4,"elapsed_ms":250000}
//! ```
//!
//! [`parse`] turns a frame into a [`WorkoutEvent`]; [`dispatch`] routes it.

pub mod dispatch;
pub mod fields;

use core::fmt::Write;

use heapless::{String, Vec};

use crate::error::ParseError;
pub use fields::Label;

/// Marker of a heart-rate request frame.
const HR_REQUEST_MARKER: &[u8] = br#"cmd":"hr_req""#;

/// A display line (headline or detail).
pub type Line = String<32>;

/// A decoded workout frame.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WorkoutEvent {
    /// The tracker asks for a heart-rate capture.
    HrRequest,
    Start {
        mode: Label,
        total_laps: u32,
    },
    Lap {
        lap_number: u32,
        lap_ms: u32,
        split_ms: u32,
    },
    Done {
        total_laps: u32,
        total_ms: u32,
    },
    Stop {
        laps_completed: u32,
        total_ms: u32,
    },
    Status {
        state: Label,
        current_lap: u32,
        elapsed_ms: u32,
    },
    Unknown {
        raw_type: Label,
    },
}

/// Decode one frame.
///
/// A heart-rate request is recognised anywhere in the frame and wins over
/// every other content. Otherwise the frame must carry an `"event"` string.
pub fn parse(frame: &[u8]) -> Result<WorkoutEvent, ParseError> {
    if fields::contains(frame, HR_REQUEST_MARKER) {
        return Ok(WorkoutEvent::HrRequest);
    }

    let event = fields::string(frame, "event").ok_or(ParseError::MissingEvent)?;

    let parsed = match event.as_str() {
        "start" => WorkoutEvent::Start {
            mode: fields::string(frame, "mode").unwrap_or_default(),
            total_laps: fields::integer(frame, "laps"),
        },
        "lap" => WorkoutEvent::Lap {
            lap_number: fields::integer(frame, "lap"),
            lap_ms: fields::integer(frame, "lap_ms"),
            split_ms: fields::integer(frame, "split_ms"),
        },
        "done" => WorkoutEvent::Done {
            total_laps: fields::integer(frame, "laps"),
            total_ms: fields::integer(frame, "total_ms"),
        },
        "stop" => WorkoutEvent::Stop {
            laps_completed: fields::integer(frame, "laps"),
            total_ms: fields::integer(frame, "total_ms"),
        },
        "status" => WorkoutEvent::Status {
            state: fields::string(frame, "state").unwrap_or_default(),
            current_lap: fields::integer(frame, "lap"),
            elapsed_ms: fields::integer(frame, "elapsed_ms"),
        },
        _ => WorkoutEvent::Unknown { raw_type: event },
    };
    Ok(parsed)
}

/// Render milliseconds as `MM:SS.mmm`. Minutes keep counting past 99.
pub fn format_duration(ms: u32) -> Label {
    let minutes = ms / 60_000;
    let seconds = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;

    let mut out = Label::new();
    // Longest output ("71582:47.295") fits the label.
    let _ = write!(out, "{:02}:{:02}.{:03}", minutes, seconds, millis);
    out
}

impl WorkoutEvent {
    /// One-line banner for the display and logs.
    pub fn headline(&self) -> Line {
        let mut line = Line::new();
        let _ = match self {
            WorkoutEvent::HrRequest => line.push_str("HR REQUEST"),
            WorkoutEvent::Start { .. } => line.push_str("WORKOUT STARTED"),
            WorkoutEvent::Lap { lap_number, .. } => {
                write!(line, "LAP {} COMPLETE", lap_number).map_err(|_| ())
            }
            WorkoutEvent::Done { .. } => line.push_str("WORKOUT COMPLETE"),
            WorkoutEvent::Stop { .. } => line.push_str("WORKOUT STOPPED"),
            WorkoutEvent::Status { .. } => line.push_str("STATUS UPDATE"),
            WorkoutEvent::Unknown { raw_type } => {
                write!(line, "Unknown: {}", raw_type.as_str()).map_err(|_| ())
            }
        };
        line
    }

    /// Supporting lines under the headline.
    pub fn details(&self) -> Vec<Line, 3> {
        let mut lines = Vec::new();
        let mut add = |args: core::fmt::Arguments<'_>| {
            let mut line = Line::new();
            let _ = line.write_fmt(args);
            let _ = lines.push(line);
        };

        match self {
            WorkoutEvent::HrRequest => add(format_args!("Capturing 5 s")),
            WorkoutEvent::Start { mode, total_laps } => {
                add(format_args!("Mode: {} ({} laps)", mode.as_str(), total_laps));
            }
            WorkoutEvent::Lap { lap_ms, split_ms, .. } => {
                add(format_args!("Lap:   {}", format_duration(*lap_ms).as_str()));
                add(format_args!("Split: {}", format_duration(*split_ms).as_str()));
            }
            WorkoutEvent::Done {
                total_laps,
                total_ms,
            } => {
                add(format_args!("Laps: {}", total_laps));
                add(format_args!("Time: {}", format_duration(*total_ms).as_str()));
            }
            WorkoutEvent::Stop {
                laps_completed,
                total_ms,
            } => {
                add(format_args!("Laps: {}", laps_completed));
                add(format_args!("Time: {}", format_duration(*total_ms).as_str()));
            }
            WorkoutEvent::Status {
                state,
                current_lap,
                elapsed_ms,
            } => {
                add(format_args!("State: {}", state.as_str()));
                add(format_args!("Lap: {}", current_lap));
                add(format_args!("Elapsed: {}", format_duration(*elapsed_ms).as_str()));
            }
            WorkoutEvent::Unknown { .. } => {}
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(s: &str) -> Label {
        let mut l = Label::new();
        l.push_str(s).unwrap();
        l
    }

    #[test]
    fn hr_request_short_circuits() {
        assert_eq!(parse(br#"{"cmd":"hr_req"}"#), Ok(WorkoutEvent::HrRequest));
        // Wins even when an event is present.
        assert_eq!(
            parse(br#"{"event":"lap","cmd":"hr_req","lap":2}"#),
            Ok(WorkoutEvent::HrRequest)
        );
    }

    #[test]
    fn start_event() {
        assert_eq!(
            parse(br#"{"event":"start","mode":"intervals","laps":8}"#),
            Ok(WorkoutEvent::Start {
                mode: label("intervals"),
                total_laps: 8
            })
        );
    }

    #[test]
    fn lap_event() {
        assert_eq!(
            parse(br#"{"event":"lap","lap":3,"lap_ms":65230,"split_ms":196000}"#),
            Ok(WorkoutEvent::Lap {
                lap_number: 3,
                lap_ms: 65_230,
                split_ms: 196_000
            })
        );
    }

    #[test]
    fn done_stop_and_status_events() {
        assert_eq!(
            parse(br#"{"event":"done","laps":8,"total_ms":540000}"#),
            Ok(WorkoutEvent::Done {
                total_laps: 8,
                total_ms: 540_000
            })
        );
        assert_eq!(
            parse(br#"{"event":"stop","laps":2,"total_ms":130000}"#),
            Ok(WorkoutEvent::Stop {
                laps_completed: 2,
                total_ms: 130_000
            })
        );
        assert_eq!(
            parse(br#"{"event":"status","state":"running","lap":4,"elapsed_ms":250000}"#),
            Ok(WorkoutEvent::Status {
                state: label("running"),
                current_lap: 4,
                elapsed_ms: 250_000
            })
        );
    }

    #[test]
    fn missing_fields_default() {
        assert_eq!(
            parse(br#"{"event":"start"}"#),
            Ok(WorkoutEvent::Start {
                mode: Label::new(),
                total_laps: 0
            })
        );
    }

    #[test]
    fn unknown_event_keeps_its_type() {
        assert_eq!(
            parse(br#"{"event":"pause"}"#),
            Ok(WorkoutEvent::Unknown {
                raw_type: label("pause")
            })
        );
    }

    #[test]
    fn frame_without_event_is_an_error() {
        assert_eq!(parse(br#"{"lap":3}"#), Err(ParseError::MissingEvent));
        assert_eq!(parse(b"garbage"), Err(ParseError::MissingEvent));
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(65_230).as_str(), "01:05.230");
        assert_eq!(format_duration(0).as_str(), "00:00.000");
        assert_eq!(format_duration(540_000).as_str(), "09:00.000");
        assert_eq!(format_duration(6_000_000).as_str(), "100:00.000");
        assert_eq!(format_duration(u32::MAX).as_str(), "71582:47.295");
    }

    #[test]
    fn banners() {
        let lap = WorkoutEvent::Lap {
            lap_number: 3,
            lap_ms: 65_230,
            split_ms: 196_000,
        };
        assert_eq!(lap.headline().as_str(), "LAP 3 COMPLETE");
        let details = lap.details();
        assert_eq!(details[0].as_str(), "Lap:   01:05.230");
        assert_eq!(details[1].as_str(), "Split: 03:16.000");

        let start = WorkoutEvent::Start {
            mode: label("intervals"),
            total_laps: 8,
        };
        assert_eq!(start.headline().as_str(), "WORKOUT STARTED");
        assert_eq!(start.details()[0].as_str(), "Mode: intervals (8 laps)");

        let unknown = WorkoutEvent::Unknown {
            raw_type: label("pause"),
        };
        assert_eq!(unknown.headline().as_str(), "Unknown: pause");
        assert!(unknown.details().is_empty());
    }
}
