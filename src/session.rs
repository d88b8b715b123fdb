//! Capture session state and its transition function.
//!
//! Everything that decides *what happens next* lives here and is
//! synchronous. Talking to the camera, timers, analyzers and the network is
//! left to [`crate::controller`], which executes the [`Effect`]s returned by
//! [`transition`] and feeds their outcomes back in as [`Event`]s.

use image::RgbaImage;
use std::sync::Arc;

use crate::analysis::{AnalysisResult, PipelineVerdict, RejectionReason};
use crate::errors::{CameraError, TransitionError, VerifyError};
use crate::frame::{FacingMode, Frame, FrameId};
use crate::preview::{GateSignal, PreviewGate};
use crate::upload::UploadOutcome;
use crate::wizard::PublishedImage;

#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    CameraInitializing,
    CameraActive,
    CountdownArmed,
    Captured,
    Analyzing,
    Accepted,
    Previewing,
    Approved,
    Uploading,
    Done,
    RetakeRequested,
    Rejected(RejectionReason),
    CameraError(CameraError),
    /// Torn down; no further events are accepted.
    Closed,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::CameraInitializing => "CameraInitializing",
            Phase::CameraActive => "CameraActive",
            Phase::CountdownArmed => "CountdownArmed",
            Phase::Captured => "Captured",
            Phase::Analyzing => "Analyzing",
            Phase::Accepted => "Accepted",
            Phase::Previewing => "Previewing",
            Phase::Approved => "Approved",
            Phase::Uploading => "Uploading",
            Phase::Done => "Done",
            Phase::RetakeRequested => "RetakeRequested",
            Phase::Rejected(_) => "Rejected",
            Phase::CameraError(_) => "CameraError",
            Phase::Closed => "Closed",
        }
    }

    /// Phases in which a frame may be alive.
    pub fn may_hold_frame(&self) -> bool {
        matches!(
            self,
            Phase::Captured | Phase::Analyzing | Phase::Accepted | Phase::Previewing | Phase::Approved | Phase::Uploading
        )
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Rejected(reason) => write!(f, "Rejected({})", reason),
            Phase::CameraError(e) => write!(f, "CameraError({})", e),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Mount,
    StreamReady,
    DeviceFailed(CameraError),
    SettleElapsed,
    CountdownTick,
    FrameCaptured(Frame),
    CaptureFailed,
    AnalysisComplete(PipelineVerdict),
    Approve,
    Retake,
    DismissRejection,
    UploadFinished(UploadOutcome),
    EncodeFailed,
    Retry,
    SwitchFacing,
    Unmount,
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Mount => "Mount",
            Event::StreamReady => "StreamReady",
            Event::DeviceFailed(_) => "DeviceFailed",
            Event::SettleElapsed => "SettleElapsed",
            Event::CountdownTick => "CountdownTick",
            Event::FrameCaptured(_) => "FrameCaptured",
            Event::CaptureFailed => "CaptureFailed",
            Event::AnalysisComplete(_) => "AnalysisComplete",
            Event::Approve => "Approve",
            Event::Retake => "Retake",
            Event::DismissRejection => "DismissRejection",
            Event::UploadFinished(_) => "UploadFinished",
            Event::EncodeFailed => "EncodeFailed",
            Event::Retry => "Retry",
            Event::SwitchFacing => "SwitchFacing",
            Event::Unmount => "Unmount",
        }
    }
}

/// Work the controller must carry out after a transition, in order.
#[derive(Debug, Clone)]
pub enum Effect {
    /// Stop any open stream, then open one facing this way.
    AcquireCamera(FacingMode),
    ReleaseCamera,
    ArmSettleTimer,
    /// Grab a still now; it becomes the frame with this id.
    CaptureStill(FrameId),
    /// Visual 3-2-1 ticks. Has no bearing on when the still is taken.
    StartCountdown,
    /// Abort pending timers and in-flight work; late results are dropped.
    CancelTimers,
    Analyze(Frame),
    Upload(Frame),
    Publish(PublishedImage),
}

/// Mutable state of one visit to the verification screen.
#[derive(Debug)]
pub struct CaptureSession {
    phase: Phase,
    facing: FacingMode,
    /// Frame in `Captured`/`Analyzing`/`Approved`/`Uploading`. While
    /// previewing it lives in the gate instead.
    frame: Option<Frame>,
    gate: PreviewGate,
    last_analysis: Option<AnalysisResult>,
    attempt_count: u32,
    next_frame_id: u64,
    pending_capture: Option<FrameId>,
    countdown_from: u8,
    countdown: Option<u8>,
    notice: Option<VerifyError>,
    published: Option<PublishedImage>,
}

impl CaptureSession {
    pub fn new(facing: FacingMode, countdown_from: u8) -> Self {
        Self {
            phase: Phase::Idle,
            facing,
            frame: None,
            gate: PreviewGate::new(),
            last_analysis: None,
            attempt_count: 1,
            next_frame_id: 1,
            pending_capture: None,
            countdown_from,
            countdown: None,
            notice: None,
            published: None,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn last_analysis(&self) -> Option<&AnalysisResult> {
        self.last_analysis.as_ref()
    }

    pub fn countdown(&self) -> Option<u8> {
        self.countdown
    }

    pub fn notice(&self) -> Option<&VerifyError> {
        self.notice.as_ref()
    }

    pub fn published(&self) -> Option<&PublishedImage> {
        self.published.as_ref()
    }

    pub fn gate(&self) -> &PreviewGate {
        &self.gate
    }

    /// Frame currently being worked on, wherever it is held.
    pub fn current_frame(&self) -> Option<&Frame> {
        self.frame.as_ref().or_else(|| self.gate.current().map(|(f, _)| f))
    }

    /// Never more than one.
    pub fn frames_held(&self) -> usize {
        usize::from(self.frame.is_some()) + usize::from(self.gate.is_holding())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase.clone(),
            facing: self.facing,
            attempt_count: self.attempt_count,
            countdown: self.countdown,
            last_analysis: self.last_analysis.clone(),
            notice: self.notice.clone(),
            preview: self
                .gate
                .current()
                .map(|(frame, analysis)| (frame.shared_pixels(), analysis.clone())),
            published: self.published.clone(),
            frames_held: self.frames_held(),
        }
    }

    fn allocate_frame_id(&mut self) -> FrameId {
        let id = FrameId(self.next_frame_id);
        self.next_frame_id += 1;
        id
    }

    fn enter(&mut self, phase: Phase) {
        log::debug!("Capture phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    fn drop_frames(&mut self) {
        self.frame = None;
        self.gate.clear();
        self.pending_capture = None;
        self.countdown = None;
    }

    /// Leave for `CameraInitializing` with a fresh camera instance.
    fn reacquire(&mut self) -> Vec<Effect> {
        self.drop_frames();
        self.enter(Phase::CameraInitializing);
        vec![Effect::CancelTimers, Effect::ReleaseCamera, Effect::AcquireCamera(self.facing)]
    }
}

/// Read-only view published to whoever renders the session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub facing: FacingMode,
    pub attempt_count: u32,
    pub countdown: Option<u8>,
    pub last_analysis: Option<AnalysisResult>,
    pub notice: Option<VerifyError>,
    pub preview: Option<(Arc<RgbaImage>, AnalysisResult)>,
    pub published: Option<PublishedImage>,
    pub frames_held: usize,
}

/// Applies one event. On error the session is left untouched.
pub fn transition(session: &mut CaptureSession, event: Event) -> Result<Vec<Effect>, TransitionError> {
    let invalid = TransitionError {
        phase: session.phase.name(),
        event: event.name(),
    };

    // Teardown is valid from everywhere except after teardown.
    if let Event::Unmount = event {
        if session.phase == Phase::Closed {
            return Err(invalid);
        }
        session.drop_frames();
        session.enter(Phase::Closed);
        return Ok(vec![Effect::CancelTimers, Effect::ReleaseCamera]);
    }

    // Visual ticks never move the phase.
    if let Event::CountdownTick = event {
        session.countdown = match session.countdown {
            Some(n) if n > 1 => Some(n - 1),
            _ => None,
        };
        return Ok(Vec::new());
    }

    let phase = session.phase.clone();
    let effects = match (phase, event) {
        (Phase::Idle, Event::Mount) => {
            session.enter(Phase::CameraInitializing);
            vec![Effect::AcquireCamera(session.facing)]
        }

        (Phase::CameraInitializing, Event::StreamReady) => {
            session.enter(Phase::CameraActive);
            vec![Effect::ArmSettleTimer]
        }

        (Phase::CameraInitializing | Phase::CameraActive | Phase::CountdownArmed, Event::DeviceFailed(error)) => {
            log::warn!("Camera failure: {}", error);
            session.drop_frames();
            session.notice = Some(VerifyError::from(error.clone()));
            session.enter(Phase::CameraError(error));
            vec![Effect::CancelTimers, Effect::ReleaseCamera]
        }

        (Phase::CameraError(_), Event::Retry) => {
            session.notice = None;
            session.enter(Phase::CameraInitializing);
            vec![Effect::ReleaseCamera, Effect::AcquireCamera(session.facing)]
        }

        (Phase::CameraActive | Phase::CountdownArmed, Event::SwitchFacing) => {
            session.facing = session.facing.toggled();
            log::info!("Switching to {} camera", session.facing);
            session.reacquire()
        }

        (Phase::CameraActive, Event::SettleElapsed) => {
            let id = session.allocate_frame_id();
            session.pending_capture = Some(id);
            session.countdown = Some(session.countdown_from).filter(|n| *n > 0);
            session.enter(Phase::CountdownArmed);
            vec![Effect::StartCountdown, Effect::CaptureStill(id)]
        }

        (Phase::CountdownArmed, Event::FrameCaptured(frame)) => {
            if session.pending_capture != Some(frame.id()) {
                return Err(invalid);
            }
            session.pending_capture = None;
            session.notice = None;
            session.frame = Some(frame.clone());
            session.enter(Phase::Captured);
            session.enter(Phase::Analyzing);
            vec![Effect::Analyze(frame)]
        }

        (Phase::CountdownArmed, Event::CaptureFailed) => {
            log::warn!("Capture attempt {} produced no frame", session.attempt_count);
            session.pending_capture = None;
            session.countdown = None;
            session.notice = Some(VerifyError::CaptureFailed);
            session.enter(Phase::CameraActive);
            vec![Effect::CancelTimers, Effect::ArmSettleTimer]
        }

        (Phase::Analyzing, Event::AnalysisComplete(verdict)) => {
            let Some(frame) = session.frame.take() else {
                return Err(invalid);
            };
            if verdict.frame_id() != frame.id() {
                log::warn!("Discarding verdict for frame {} while analyzing {}", verdict.frame_id(), frame.id());
                session.frame = Some(frame);
                return Err(invalid);
            }
            session.countdown = None;

            if verdict.accepted() {
                let decisive = verdict.decisive().clone();
                log::info!(
                    "Frame {} accepted by {:?} with confidence {:.2}",
                    frame.id(),
                    decisive.analyzer,
                    decisive.confidence
                );
                session.last_analysis = Some(decisive.clone());
                session.enter(Phase::Accepted);
                if !session.gate.hold(frame, decisive) {
                    return Ok(session.reacquire());
                }
                session.enter(Phase::Previewing);
            } else {
                let reason = verdict.rejection_reason().unwrap_or(RejectionReason::LowConfidence);
                log::info!("Frame {} rejected: {}", frame.id(), reason);
                session.last_analysis = Some(verdict.primary.clone());
                session.attempt_count += 1;
                session.notice = Some(VerifyError::AnalysisRejected(reason));
                session.enter(Phase::Rejected(reason));
            }
            vec![Effect::CancelTimers]
        }

        (Phase::Rejected(_), Event::DismissRejection) => {
            session.notice = None;
            session.reacquire()
        }

        (Phase::Previewing, Event::Approve) => match session.gate.approve() {
            Some(GateSignal::Approved { frame, .. }) => {
                session.enter(Phase::Approved);
                session.frame = Some(frame.clone());
                session.enter(Phase::Uploading);
                vec![Effect::ReleaseCamera, Effect::Upload(frame)]
            }
            _ => return Err(invalid),
        },

        (Phase::Previewing, Event::Retake) => {
            session.gate.retake();
            session.last_analysis = None;
            session.enter(Phase::RetakeRequested);
            session.reacquire()
        }

        (Phase::Uploading, Event::UploadFinished(outcome)) => {
            let Some(frame) = session.frame.take() else {
                return Err(invalid);
            };
            if outcome.upload_failed {
                session.notice = Some(VerifyError::UploadFailed);
            }
            let published = PublishedImage {
                frame_id: frame.id(),
                reference: outcome.reference,
                upload_failed: outcome.upload_failed,
                captured_at: frame.captured_at(),
            };
            session.published = Some(published.clone());
            session.enter(Phase::Done);
            vec![Effect::Publish(published)]
        }

        (Phase::Uploading, Event::EncodeFailed) => {
            session.attempt_count += 1;
            let effects = session.reacquire();
            session.notice = Some(VerifyError::CaptureFailed);
            effects
        }

        _ => return Err(invalid),
    };

    Ok(effects)
}
