//! Pure session transition function
//!
//! `apply(state, event)` returns the next state and performs no I/O. The
//! controller feeds it every event in arrival order, one at a time, and
//! publishes the differences reported by `changes`.

use chrono::Utc;
use cocomd_common::api::{diagnosis_label, DetectionFrame, LinkState, Mode, UploadKind};
use cocomd_common::events::{ClientEvent, FrameSource};
use cocomd_common::CountAggregator;

use super::state::{DisplayedFrame, SessionState};
use crate::counting::CountingRequest;
use crate::stream::StreamEvent;
use crate::upload::UploadOutcome;

/// Inputs to the session state machine
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Operator picked a mode
    ModeSelected(Mode),
    /// Operator returned to mode selection
    ModeCleared,
    /// A new push-channel connection was requested
    StreamRequested { connection: u64 },
    /// Something happened on a push-channel connection
    Stream { connection: u64, event: StreamEvent },
    /// Operator stopped the stream; the connection is already closed
    StreamStopped,
    /// `/start-counting` succeeded
    CountingStarted,
    /// `/stop-counting` succeeded
    CountingStopped,
    /// A counting request was refused or never arrived; never changes state
    CountingFailed {
        request: CountingRequest,
        status: Option<u16>,
        message: String,
    },
    /// An upload of this kind is about to be sent
    UploadDispatched(UploadKind),
    /// An upload response arrived, tagged with its dispatch generation
    UploadCompleted { generation: u64, outcome: UploadOutcome },
    /// An endpoint call failed; never changes state
    RequestFailed {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },
}

/// Compute the state that follows `event`
pub fn apply(state: &SessionState, event: &SessionEvent) -> SessionState {
    let mut next = state.clone();

    match event {
        SessionEvent::ModeSelected(mode) => {
            if state.mode != Mode::Unselected || *mode == Mode::Unselected {
                return next;
            }
            next.mode = *mode;
            reset_display(&mut next);
            next.generations.bump_all();
        }

        SessionEvent::ModeCleared => {
            next.mode = Mode::Unselected;
            next.streaming = false;
            next.link = LinkState::Down;
            reset_display(&mut next);
            next.generations.bump_all();
        }

        SessionEvent::StreamRequested { connection } => {
            next.streaming = true;
            next.link = LinkState::Connecting;
            next.connection = *connection;
        }

        SessionEvent::Stream { connection, event } => {
            // Late events from a stopped or replaced connection are dropped
            if !state.streaming || *connection != state.connection {
                return next;
            }
            match event {
                StreamEvent::Connected => {
                    if state.link == LinkState::Connecting {
                        next.link = LinkState::Up;
                    }
                }
                StreamEvent::Frame(frame) => {
                    apply_detection(&mut next, frame, FrameSource::Stream);
                }
                StreamEvent::Dropped(_) => {}
                StreamEvent::Failed(_) => {
                    next.link = LinkState::Broken;
                }
            }
        }

        SessionEvent::StreamStopped => {
            next.streaming = false;
            next.link = LinkState::Down;
            set_frame(&mut next, None);
        }

        SessionEvent::CountingStarted => {
            // Zero first so an increment applied after this event always
            // lands on fresh totals
            next.counts = CountAggregator::reset();
            next.counting = true;
        }

        SessionEvent::CountingStopped => {
            next.counting = false;
        }

        SessionEvent::UploadDispatched(kind) => {
            next.generations.bump(*kind);
        }

        SessionEvent::UploadCompleted {
            generation,
            outcome,
        } => {
            if !state.generations.is_current(outcome.kind(), *generation) {
                return next;
            }
            match outcome {
                UploadOutcome::Maturity(frame) => {
                    apply_detection(&mut next, frame, FrameSource::Upload);
                }
                UploadOutcome::Disease {
                    image,
                    classifications,
                } => {
                    set_frame(
                        &mut next,
                        Some(DisplayedFrame {
                            image: image.clone(),
                            source: FrameSource::Upload,
                        }),
                    );
                    next.diagnosis = Some(diagnosis_label(classifications));
                }
            }
        }

        SessionEvent::CountingFailed { .. } | SessionEvent::RequestFailed { .. } => {}
    }

    next
}

/// Display always follows the newest frame; counts only while counting
fn apply_detection(next: &mut SessionState, frame: &DetectionFrame, source: FrameSource) {
    set_frame(
        next,
        Some(DisplayedFrame {
            image: frame.image.clone(),
            source,
        }),
    );

    if next.counting {
        if let Some(increment) = frame.increment(next.tally_detections) {
            next.counts = CountAggregator::merge(&next.counts, &increment);
        }
    }
}

fn set_frame(next: &mut SessionState, frame: Option<DisplayedFrame>) {
    if next.frame.is_none() && frame.is_none() {
        return;
    }
    next.frame = frame;
    next.frame_seq += 1;
}

fn reset_display(next: &mut SessionState) {
    set_frame(next, None);
    next.diagnosis = None;
    next.counts = CountAggregator::reset();
}

/// Events describing what differs between two states
pub fn changes(old: &SessionState, new: &SessionState) -> Vec<ClientEvent> {
    let timestamp = Utc::now();
    let mut events = Vec::new();

    if old.mode != new.mode {
        events.push(ClientEvent::ModeChanged {
            mode: new.mode,
            timestamp,
        });
    }

    if old.streaming != new.streaming || old.link != new.link || old.connection != new.connection {
        events.push(ClientEvent::StreamStateChanged {
            streaming: new.streaming,
            link: new.link,
            connection: new.connection,
            timestamp,
        });
    }

    if old.counting != new.counting {
        events.push(ClientEvent::CountingStateChanged {
            counting: new.counting,
            timestamp,
        });
    }

    if old.counts != new.counts {
        events.push(ClientEvent::CountsUpdated {
            counts: new.counts,
            timestamp,
        });
    }

    if old.frame_seq != new.frame_seq {
        events.push(ClientEvent::FrameUpdated {
            source: new.frame.as_ref().map(|f| f.source),
            size_bytes: new.frame.as_ref().map(|f| f.image.len()).unwrap_or(0),
            timestamp,
        });
    }

    if old.diagnosis != new.diagnosis {
        events.push(ClientEvent::DiagnosisUpdated {
            label: new.diagnosis.clone(),
            timestamp,
        });
    }

    events
}
