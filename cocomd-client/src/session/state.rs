//! Session state record and command admission rules
//!
//! `SessionState` is never mutated in place by the controller; each event
//! produces a new record through `transition::apply`.

use cocomd_common::api::{LinkState, Mode, UploadKind};
use cocomd_common::events::FrameSource;
use cocomd_common::MaturityCounts;
use std::fmt;

/// Per-kind request generation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generations {
    pub maturity: u64,
    pub disease: u64,
}

impl Generations {
    pub fn get(&self, kind: UploadKind) -> u64 {
        match kind {
            UploadKind::Maturity => self.maturity,
            UploadKind::Disease => self.disease,
        }
    }

    /// A response tagged `generation` may still be applied
    pub fn is_current(&self, kind: UploadKind, generation: u64) -> bool {
        self.get(kind) == generation
    }

    pub(crate) fn bump(&mut self, kind: UploadKind) {
        match kind {
            UploadKind::Maturity => self.maturity += 1,
            UploadKind::Disease => self.disease += 1,
        }
    }

    pub(crate) fn bump_all(&mut self) {
        self.bump(UploadKind::Maturity);
        self.bump(UploadKind::Disease);
    }
}

/// Annotated image currently on display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayedFrame {
    pub image: Vec<u8>,
    pub source: FrameSource,
}

/// Complete session state owned by the controller
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub mode: Mode,
    pub streaming: bool,
    pub counting: bool,
    pub link: LinkState,
    /// Id of the current (or most recent) stream connection
    pub connection: u64,
    pub counts: MaturityCounts,
    pub frame: Option<DisplayedFrame>,
    /// Bumped every time the displayed frame is replaced or cleared
    pub frame_seq: u64,
    pub diagnosis: Option<String>,
    pub generations: Generations,
    /// Derive increments from detection labels when counts are absent
    pub tally_detections: bool,
}

/// Outcome of checking a command against the current state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Perform the command
    Proceed,
    /// Silently ignore (already in the requested state, nothing to do)
    Skip(&'static str),
    /// Refuse and tell the operator why
    Reject(String),
}

impl SessionState {
    pub fn new(tally_detections: bool) -> Self {
        Self {
            tally_detections,
            ..Self::default()
        }
    }

    pub fn admit_select_mode(&self, mode: Mode) -> Admission {
        if mode == Mode::Unselected {
            return Admission::Reject("use deselect to leave the current mode".to_string());
        }
        if self.mode != Mode::Unselected {
            return Admission::Reject(format!(
                "mode {} already selected; deselect first",
                self.mode
            ));
        }
        Admission::Proceed
    }

    pub fn admit_deselect_mode(&self) -> Admission {
        if self.mode == Mode::Unselected {
            return Admission::Skip("no mode selected");
        }
        Admission::Proceed
    }

    pub fn admit_start_stream(&self) -> Admission {
        if self.mode != Mode::Maturity {
            return Admission::Reject("streaming requires maturity mode".to_string());
        }
        if self.streaming {
            return Admission::Skip("already streaming");
        }
        Admission::Proceed
    }

    pub fn admit_stop_stream(&self) -> Admission {
        if !self.streaming {
            return Admission::Skip("not streaming");
        }
        Admission::Proceed
    }

    pub fn admit_start_counting(&self) -> Admission {
        if self.mode != Mode::Maturity {
            return Admission::Reject("counting requires maturity mode".to_string());
        }
        if self.counting {
            return Admission::Skip("already counting");
        }
        Admission::Proceed
    }

    pub fn admit_stop_counting(&self) -> Admission {
        if !self.counting {
            return Admission::Skip("not counting");
        }
        Admission::Proceed
    }

    pub fn admit_upload(&self, kind: UploadKind) -> Admission {
        if self.mode != kind.mode() {
            return Admission::Reject(format!(
                "{} uploads require {} mode (current: {})",
                kind,
                kind.mode(),
                self.mode
            ));
        }
        Admission::Proceed
    }

    pub fn admit_capture_frame(&self) -> Admission {
        if !self.streaming {
            return Admission::Skip("not streaming");
        }
        if self.frame.is_none() {
            return Admission::Skip("no frame displayed");
        }
        Admission::Proceed
    }
}

/// Read-only view handed to the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub mode: Mode,
    pub streaming: bool,
    pub counting: bool,
    pub link: LinkState,
    pub counts: MaturityCounts,
    pub frame: Option<DisplayedFrame>,
    pub diagnosis: Option<String>,
}

impl From<&SessionState> for SessionView {
    fn from(state: &SessionState) -> Self {
        Self {
            mode: state.mode,
            streaming: state.streaming,
            counting: state.counting,
            link: state.link,
            counts: state.counts,
            frame: state.frame.clone(),
            diagnosis: state.diagnosis.clone(),
        }
    }
}

impl fmt::Display for SessionView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on_off = |b: bool| if b { "on" } else { "off" };
        write!(
            f,
            "mode={} streaming={} link={} counting={} [{}]",
            self.mode,
            on_off(self.streaming),
            self.link,
            on_off(self.counting),
            self.counts
        )?;
        match &self.frame {
            Some(frame) => write!(f, " frame={}B", frame.image.len())?,
            None => write!(f, " frame=none")?,
        }
        if let Some(label) = &self.diagnosis {
            write!(f, " diagnosis=\"{}\"", label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_mode_requires_unselected() {
        let state = SessionState::default();
        assert_eq!(state.admit_select_mode(Mode::Maturity), Admission::Proceed);

        let selected = SessionState {
            mode: Mode::Disease,
            ..SessionState::default()
        };
        assert!(matches!(
            selected.admit_select_mode(Mode::Maturity),
            Admission::Reject(_)
        ));
        assert!(matches!(
            state.admit_select_mode(Mode::Unselected),
            Admission::Reject(_)
        ));
    }

    #[test]
    fn test_stream_and_counting_need_maturity_mode() {
        let disease = SessionState {
            mode: Mode::Disease,
            ..SessionState::default()
        };
        assert!(matches!(disease.admit_start_stream(), Admission::Reject(_)));
        assert!(matches!(disease.admit_start_counting(), Admission::Reject(_)));
        assert!(matches!(
            disease.admit_upload(UploadKind::Maturity),
            Admission::Reject(_)
        ));
        assert_eq!(disease.admit_upload(UploadKind::Disease), Admission::Proceed);
    }

    #[test]
    fn test_repeated_toggles_are_skipped() {
        let streaming = SessionState {
            mode: Mode::Maturity,
            streaming: true,
            counting: true,
            ..SessionState::default()
        };
        assert!(matches!(streaming.admit_start_stream(), Admission::Skip(_)));
        assert!(matches!(streaming.admit_start_counting(), Admission::Skip(_)));

        let idle = SessionState {
            mode: Mode::Maturity,
            ..SessionState::default()
        };
        assert!(matches!(idle.admit_stop_stream(), Admission::Skip(_)));
        assert!(matches!(idle.admit_stop_counting(), Admission::Skip(_)));
    }

    #[test]
    fn test_capture_needs_stream_and_frame() {
        let mut state = SessionState {
            mode: Mode::Maturity,
            ..SessionState::default()
        };
        assert!(matches!(state.admit_capture_frame(), Admission::Skip(_)));

        state.streaming = true;
        assert!(matches!(state.admit_capture_frame(), Admission::Skip(_)));

        state.frame = Some(DisplayedFrame {
            image: vec![1, 2, 3],
            source: FrameSource::Stream,
        });
        assert_eq!(state.admit_capture_frame(), Admission::Proceed);
    }

    #[test]
    fn test_generations() {
        let mut generations = Generations::default();
        generations.bump(UploadKind::Disease);
        assert!(generations.is_current(UploadKind::Disease, 1));
        assert!(generations.is_current(UploadKind::Maturity, 0));

        generations.bump_all();
        assert!(!generations.is_current(UploadKind::Disease, 1));
        assert_eq!(generations.get(UploadKind::Maturity), 1);
    }

    #[test]
    fn test_view_display() {
        let view = SessionView {
            mode: Mode::Disease,
            streaming: false,
            counting: false,
            link: LinkState::Down,
            counts: MaturityCounts::default(),
            frame: None,
            diagnosis: Some("BudRot".to_string()),
        };
        let text = view.to_string();
        assert!(text.contains("mode=disease"));
        assert!(text.contains("diagnosis=\"BudRot\""));
    }
}
