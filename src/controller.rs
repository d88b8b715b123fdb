//! Runs a [`CaptureSession`] against real (or scripted) collaborators.
//!
//! One task owns the session, the camera and every timer. User actions come
//! in over an unbounded channel, timer and worker results over a second one,
//! and each resulting state is published on a `watch` channel.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::analysis::{AnalysisPipeline, PipelineVerdict};
use crate::config::Config;
use crate::errors::CaptureError;
use crate::frame::Frame;
use crate::frame_source::{FrameSource, StreamConstraints};
use crate::session::{self, CaptureSession, Effect, Event, Phase, SessionSnapshot};
use crate::upload::{upload_or_fallback, UploadBridge};
use crate::wizard::{PublishedImage, WizardSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserAction {
    Approve,
    Retake,
    DismissRejection,
    Retry,
    SwitchFacing,
    Unmount,
}

impl UserAction {
    pub fn description(&self) -> &'static str {
        match self {
            UserAction::Approve => "Use this photo",
            UserAction::Retake => "Retake",
            UserAction::DismissRejection => "Try again",
            UserAction::Retry => "Retry camera",
            UserAction::SwitchFacing => "Switch camera",
            UserAction::Unmount => "Leave",
        }
    }
}

impl From<UserAction> for Event {
    fn from(action: UserAction) -> Self {
        match action {
            UserAction::Approve => Event::Approve,
            UserAction::Retake => Event::Retake,
            UserAction::DismissRejection => Event::DismissRejection,
            UserAction::Retry => Event::Retry,
            UserAction::SwitchFacing => Event::SwitchFacing,
            UserAction::Unmount => Event::Unmount,
        }
    }
}

/// Timings and encoder settings the controller needs from [`Config`].
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub constraints: StreamConstraints,
    pub settle_delay: Duration,
    pub countdown_from: u8,
    pub countdown_tick: Duration,
    pub processing_floor: Duration,
    pub jpeg_quality: u8,
}

impl From<&Config> for ControllerSettings {
    fn from(config: &Config) -> Self {
        Self {
            constraints: config.stream_constraints(),
            settle_delay: config.settle_delay(),
            countdown_from: config.timing.countdown_from,
            countdown_tick: config.countdown_tick(),
            processing_floor: config.processing_floor(),
            jpeg_quality: config.upload.jpeg_quality,
        }
    }
}

/// Event produced off the controller task, stamped with the generation that
/// was current when the work was started.
struct Tagged {
    generation: u64,
    event: Event,
}

pub struct CaptureController {
    session: CaptureSession,
    settings: ControllerSettings,
    source: Box<dyn FrameSource>,
    pipeline: AnalysisPipeline,
    uploader: Arc<dyn UploadBridge>,
    sink: Arc<dyn WizardSink>,
    internal_tx: mpsc::UnboundedSender<Tagged>,
    internal_rx: mpsc::UnboundedReceiver<Tagged>,
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl CaptureController {
    pub fn new(
        settings: ControllerSettings,
        source: Box<dyn FrameSource>,
        pipeline: AnalysisPipeline,
        uploader: Arc<dyn UploadBridge>,
        sink: Arc<dyn WizardSink>,
    ) -> Self {
        let session = CaptureSession::new(settings.constraints.facing, settings.countdown_from);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(session.snapshot());
        Self {
            session,
            settings,
            source,
            pipeline,
            uploader,
            sink,
            internal_tx,
            internal_rx,
            generation: 0,
            tasks: Vec::new(),
            snapshot_tx,
        }
    }

    /// Mounts the session on the current runtime.
    pub fn spawn(self) -> SessionHandle {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let snapshots = self.snapshot_tx.subscribe();
        let task = tokio::spawn(self.run(action_rx));
        SessionHandle {
            actions: action_tx,
            snapshots,
            task,
        }
    }

    async fn run(mut self, mut actions: mpsc::UnboundedReceiver<UserAction>) {
        info!("Verification session started");
        self.dispatch(Event::Mount).await;

        while *self.session.phase() != Phase::Closed {
            tokio::select! {
                action = actions.recv() => {
                    let event = match action {
                        Some(action) => {
                            debug!("User action: {:?}", action);
                            Event::from(action)
                        }
                        None => Event::Unmount,
                    };
                    self.dispatch(event).await;
                }
                Some(tagged) = self.internal_rx.recv() => {
                    if tagged.generation == self.generation {
                        self.dispatch(tagged.event).await;
                    } else {
                        debug!("Dropping stale {} from generation {}", tagged.event.name(), tagged.generation);
                    }
                }
            }
        }

        info!("Verification session closed after {} attempt(s)", self.session.attempt_count());
    }

    async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            match session::transition(&mut self.session, event) {
                Ok(effects) => {
                    for effect in effects {
                        if let Some(follow_up) = self.execute(effect).await {
                            queue.push_back(follow_up);
                        }
                    }
                }
                Err(e) => debug!("Ignored: {}", e),
            }
        }
        self.snapshot_tx.send_replace(self.session.snapshot());
    }

    /// Camera work runs inline and hands its outcome straight back; the
    /// rest is spawned and reports through the internal channel.
    async fn execute(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AcquireCamera(facing) => {
                self.release_camera();
                let constraints = self.settings.constraints.with_facing(facing);
                info!("Opening {} camera", facing);
                match self.source.open(&constraints).await {
                    Ok(()) => Some(Event::StreamReady),
                    Err(e) => Some(Event::DeviceFailed(e)),
                }
            }
            Effect::ReleaseCamera => {
                self.release_camera();
                None
            }
            Effect::CaptureStill(id) => match self.source.grab_still().await {
                Ok(pixels) => Some(Event::FrameCaptured(Frame::new(id, pixels))),
                Err(CaptureError::NoFrame) => {
                    warn!("Capture {} produced no frame", id);
                    Some(Event::CaptureFailed)
                }
                Err(CaptureError::Device(e)) => Some(Event::DeviceFailed(e)),
            },
            Effect::ArmSettleTimer => {
                self.spawn_after(self.settings.settle_delay, Event::SettleElapsed);
                None
            }
            Effect::StartCountdown => {
                self.start_countdown();
                None
            }
            Effect::CancelTimers => {
                self.cancel_tasks();
                None
            }
            Effect::Analyze(frame) => {
                self.spawn_analysis(frame);
                None
            }
            Effect::Upload(frame) => {
                self.spawn_upload(frame);
                None
            }
            Effect::Publish(image) => {
                self.publish(image).await;
                None
            }
        }
    }

    fn release_camera(&mut self) {
        if self.source.is_open() {
            info!("Releasing camera");
            self.source.close();
        }
    }

    fn cancel_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.generation += 1;
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    fn spawn_after(&mut self, delay: Duration, event: Event) {
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        self.track(tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let _ = tx.send(Tagged { generation, event });
        }));
    }

    fn start_countdown(&mut self) {
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let tick = self.settings.countdown_tick;
        let ticks = self.settings.countdown_from;
        self.track(tokio::spawn(async move {
            for _ in 0..ticks {
                tokio::time::sleep(tick).await;
                if tx.send(Tagged { generation, event: Event::CountdownTick }).is_err() {
                    break;
                }
            }
        }));
    }

    fn spawn_analysis(&mut self, frame: Frame) {
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let pipeline = self.pipeline.clone();
        let floor = self.settings.processing_floor;
        let frame_id = frame.id();
        self.track(tokio::spawn(async move {
            let scan = tokio::task::spawn_blocking(move || pipeline.run(&frame));
            let (verdict, _) = tokio::join!(scan, tokio::time::sleep(floor));
            let verdict = verdict.unwrap_or_else(|e| {
                error!("Analysis of frame {} did not complete: {}", frame_id, e);
                PipelineVerdict::failed(frame_id)
            });
            let _ = tx.send(Tagged {
                generation,
                event: Event::AnalysisComplete(verdict),
            });
        }));
    }

    fn spawn_upload(&mut self, frame: Frame) {
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        let uploader = Arc::clone(&self.uploader);
        let quality = self.settings.jpeg_quality;
        self.track(tokio::spawn(async move {
            let event = match upload_or_fallback(uploader.as_ref(), &frame, quality).await {
                Ok(outcome) => Event::UploadFinished(outcome),
                Err(e) => {
                    error!("Could not prepare frame {} for upload: {}", frame.id(), e);
                    Event::EncodeFailed
                }
            };
            let _ = tx.send(Tagged { generation, event });
        }));
    }

    /// Sinks may do file I/O, so the hand-off runs on the blocking pool.
    /// It is awaited so the wizard has the photo before `Done` is published.
    async fn publish(&mut self, image: PublishedImage) {
        if image.upload_failed {
            warn!("Publishing frame {} with local fallback", image.frame_id);
        }
        let sink = Arc::clone(&self.sink);
        match tokio::task::spawn_blocking(move || sink.publish(&image)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Failed to hand photo to wizard: {:#}", e),
            Err(e) => error!("Wizard hand-off task failed: {}", e),
        }
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.source.close();
    }
}

/// What a UI holds on to while the session runs.
pub struct SessionHandle {
    actions: mpsc::UnboundedSender<UserAction>,
    snapshots: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Returns false once the session has closed.
    pub fn send(&self, action: UserAction) -> bool {
        self.actions.send(action).is_ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Waits for the next published state. False when the session is gone.
    pub async fn changed(&mut self) -> bool {
        self.snapshots.changed().await.is_ok()
    }

    /// Waits until a published state satisfies `predicate`.
    pub async fn wait_until<F>(&mut self, mut predicate: F) -> Option<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        loop {
            {
                let current = self.snapshots.borrow_and_update();
                if predicate(&current) {
                    return Some(current.clone());
                }
            }
            if self.snapshots.changed().await.is_err() {
                let last = self.snapshots.borrow().clone();
                return predicate(&last).then_some(last);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Unmounts the session and waits for the camera to be released.
    pub async fn shutdown(self) {
        let _ = self.actions.send(UserAction::Unmount);
        if let Err(e) = self.task.await {
            error!("Verification session task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisResult, AnalyzerKind, FrameAnalyzer, Metrics, RejectionReason};
    use crate::config::ConfigBuilder;
    use crate::errors::{CameraError, CaptureError, UploadError, VerifyError};
    use crate::frame::{FacingMode, FrameId};
    use crate::frame_source::{SyntheticSource, SyntheticState};
    use crate::upload::ImageReference;
    use crate::wizard::MemorySink;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::thread::ThreadId;

    /// Replays a list of outcomes, repeating the last one.
    struct Scripted {
        kind: AnalyzerKind,
        outcomes: Mutex<VecDeque<(bool, f64, RejectionReason)>>,
        last: Mutex<(bool, f64, RejectionReason)>,
    }

    impl Scripted {
        fn new(outcomes: &[(bool, f64, RejectionReason)]) -> Self {
            Self {
                kind: AnalyzerKind::Heuristic,
                outcomes: Mutex::new(outcomes.iter().copied().collect()),
                last: Mutex::new(outcomes[outcomes.len() - 1]),
            }
        }

        fn accepting(confidence: f64) -> Self {
            Self::new(&[(true, confidence, RejectionReason::LowConfidence)])
        }

        fn rejecting(reason: RejectionReason) -> Self {
            Self::new(&[(false, 0.1, reason)])
        }

        /// Stands in for the analyzer in the given pipeline slot.
        fn into_slot(mut self, kind: AnalyzerKind) -> Arc<dyn FrameAnalyzer> {
            self.kind = kind;
            Arc::new(self)
        }
    }

    impl FrameAnalyzer for Scripted {
        fn kind(&self) -> AnalyzerKind {
            self.kind
        }

        fn analyze(&self, frame: &Frame) -> AnalysisResult {
            let next = self.outcomes.lock().unwrap().pop_front();
            let (accepted, confidence, reason) = next.unwrap_or(*self.last.lock().unwrap());
            if accepted {
                AnalysisResult::accept(frame.id(), self.kind(), confidence, Metrics::None)
            } else {
                AnalysisResult::reject(frame.id(), self.kind(), confidence, reason, Metrics::None)
            }
        }
    }

    struct FixedUpload(Result<&'static str, ()>);

    #[async_trait]
    impl UploadBridge for FixedUpload {
        async fn upload(&self, _jpeg: Vec<u8>) -> Result<String, UploadError> {
            self.0
                .map(str::to_string)
                .map_err(|_| UploadError::Request("503 Service Unavailable".into()))
        }
    }

    struct Harness {
        handle: SessionHandle,
        camera: Arc<Mutex<SyntheticState>>,
        sink: Arc<MemorySink>,
    }

    fn settings() -> ControllerSettings {
        let config = ConfigBuilder::new()
            .synthetic_camera(true)
            .timings(0, 0, 0)
            .build()
            .unwrap();
        ControllerSettings::from(&config)
    }

    fn spawn_controller(
        settings: ControllerSettings,
        source: SyntheticSource,
        primary: Scripted,
        fallback: Scripted,
        upload: FixedUpload,
        sink: Arc<dyn WizardSink>,
    ) -> SessionHandle {
        CaptureController::new(
            settings,
            Box::new(source),
            AnalysisPipeline::new(
                primary.into_slot(AnalyzerKind::Heuristic),
                fallback.into_slot(AnalyzerKind::QualityFallback),
            ),
            Arc::new(upload),
            sink,
        )
        .spawn()
    }

    fn start_with(
        settings: ControllerSettings,
        source: SyntheticSource,
        primary: Scripted,
        fallback: Scripted,
        upload: FixedUpload,
    ) -> Harness {
        let camera = source.state();
        let sink = Arc::new(MemorySink::new());
        Harness {
            handle: spawn_controller(settings, source, primary, fallback, upload, sink.clone()),
            camera,
            sink,
        }
    }

    fn start(primary: Scripted, fallback: Scripted, upload: FixedUpload) -> Harness {
        start_with(settings(), SyntheticSource::portrait(), primary, fallback, upload)
    }

    async fn wait_for<F>(handle: &mut SessionHandle, predicate: F) -> SessionSnapshot
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), handle.wait_until(predicate))
            .await
            .expect("timed out waiting for session state")
            .expect("session closed before reaching state")
    }

    fn is_previewing(s: &SessionSnapshot) -> bool {
        s.phase == Phase::Previewing
    }

    #[tokio::test]
    async fn test_happy_path_publishes_url() {
        let mut h = start(
            Scripted::accepting(0.52),
            Scripted::rejecting(RejectionReason::LowConfidence),
            FixedUpload(Ok("https://cdn.example.com/selfies/1.jpg")),
        );

        let preview = wait_for(&mut h.handle, is_previewing).await;
        let (pixels, analysis) = preview.preview.expect("preview frame");
        assert_eq!((pixels.width(), pixels.height()), (640, 480));
        assert!(analysis.accepted);
        assert_eq!(analysis.confidence, 0.52);
        assert_eq!(preview.attempt_count, 1);
        assert_eq!(preview.frames_held, 1);

        assert!(h.handle.send(UserAction::Approve));
        let done = wait_for(&mut h.handle, |s| s.phase == Phase::Done).await;
        let published = done.published.expect("published image");
        assert_eq!(published.reference, ImageReference::Url("https://cdn.example.com/selfies/1.jpg".into()));
        assert!(!published.upload_failed);
        assert!(done.notice.is_none());
        assert_eq!(done.frames_held, 0);

        assert_eq!(h.sink.published(), vec![published]);
        {
            let camera = h.camera.lock().unwrap();
            assert!(!camera.open);
            assert_eq!(camera.captures, 1);
            assert_eq!(camera.overlapping_opens, 0);
        }
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_fallback_rescues_primary_rejection() {
        let mut h = start(
            Scripted::rejecting(RejectionReason::OutOfFocus),
            Scripted::accepting(0.9),
            FixedUpload(Ok("https://cdn/2.jpg")),
        );

        let preview = wait_for(&mut h.handle, is_previewing).await;
        let analysis = preview.last_analysis.unwrap();
        assert!(analysis.accepted);
        assert_eq!(analysis.confidence, 0.9);
        assert_eq!(analysis.analyzer, AnalyzerKind::QualityFallback);
        assert_eq!(preview.attempt_count, 1);
        h.handle.shutdown().await;
    }

    /// Records which thread each hand-off ran on.
    #[derive(Default)]
    struct ThreadRecordingSink {
        threads: Mutex<Vec<ThreadId>>,
    }

    impl WizardSink for ThreadRecordingSink {
        fn publish(&self, _image: &PublishedImage) -> anyhow::Result<()> {
            self.threads.lock().unwrap().push(std::thread::current().id());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_wizard_hand_off_runs_off_the_session_thread() {
        let sink = Arc::new(ThreadRecordingSink::default());
        let mut handle = spawn_controller(
            settings(),
            SyntheticSource::portrait(),
            Scripted::accepting(0.8),
            Scripted::accepting(0.8),
            FixedUpload(Ok("https://cdn/4.jpg")),
            sink.clone(),
        );

        wait_for(&mut handle, is_previewing).await;
        handle.send(UserAction::Approve);
        wait_for(&mut handle, |s| s.phase == Phase::Done).await;

        // The single-threaded test runtime drives the session task on this thread.
        let threads = sink.threads.lock().unwrap().clone();
        assert_eq!(threads.len(), 1);
        assert_ne!(threads[0], std::thread::current().id());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_double_rejection_then_success() {
        let primary = Scripted::new(&[
            (false, 0.1, RejectionReason::TooDark),
            (true, 0.6, RejectionReason::LowConfidence),
        ]);
        let mut h = start(
            primary,
            Scripted::rejecting(RejectionReason::LowConfidence),
            FixedUpload(Ok("https://cdn/3.jpg")),
        );

        let rejected = wait_for(&mut h.handle, |s| matches!(s.phase, Phase::Rejected(_))).await;
        assert_eq!(rejected.phase, Phase::Rejected(RejectionReason::TooDark));
        assert_eq!(rejected.attempt_count, 2);
        assert_eq!(rejected.frames_held, 0);
        assert_eq!(rejected.notice, Some(VerifyError::AnalysisRejected(RejectionReason::TooDark)));

        h.handle.send(UserAction::DismissRejection);
        let preview = wait_for(&mut h.handle, is_previewing).await;
        assert_eq!(preview.attempt_count, 2);
        assert!(preview.notice.is_none());

        let camera = h.camera.lock().unwrap();
        assert_eq!(camera.opens, 2);
        assert_eq!(camera.overlapping_opens, 0);
        drop(camera);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_upload_failure_still_completes() {
        let mut h = start(
            Scripted::accepting(0.52),
            Scripted::rejecting(RejectionReason::LowConfidence),
            FixedUpload(Err(())),
        );

        wait_for(&mut h.handle, is_previewing).await;
        h.handle.send(UserAction::Approve);
        let done = wait_for(&mut h.handle, |s| s.phase == Phase::Done).await;

        assert_eq!(done.notice, Some(VerifyError::UploadFailed));
        let published = done.published.unwrap();
        assert!(published.upload_failed);
        assert!(published.reference.as_str().starts_with("data:image/jpeg;base64,"));
        assert!(h.sink.published()[0].upload_failed);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_camera_error_and_retry() {
        let source = SyntheticSource::portrait();
        source.push_open_result(Err(CameraError::AccessDenied));
        let mut h = start_with(
            settings(),
            source,
            Scripted::accepting(0.5),
            Scripted::accepting(0.5),
            FixedUpload(Ok("u")),
        );

        let failed = wait_for(&mut h.handle, |s| matches!(s.phase, Phase::CameraError(_))).await;
        assert_eq!(failed.phase, Phase::CameraError(CameraError::AccessDenied));
        assert_eq!(failed.notice, Some(VerifyError::CameraAccessDenied));
        assert_eq!(failed.frames_held, 0);

        h.handle.send(UserAction::Retry);
        wait_for(&mut h.handle, is_previewing).await;
        assert_eq!(h.camera.lock().unwrap().opens, 2);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_device_loss_during_capture() {
        let source = SyntheticSource::portrait();
        source.push_capture_result(Err(CaptureError::Device(CameraError::NotFound)));
        let mut h = start_with(
            settings(),
            source,
            Scripted::accepting(0.5),
            Scripted::accepting(0.5),
            FixedUpload(Ok("u")),
        );

        let failed = wait_for(&mut h.handle, |s| matches!(s.phase, Phase::CameraError(_))).await;
        assert_eq!(failed.phase, Phase::CameraError(CameraError::NotFound));
        assert_eq!(failed.frames_held, 0);
        assert!(!h.camera.lock().unwrap().open);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_capture_retries_automatically() {
        let source = SyntheticSource::portrait();
        source.push_capture_result(Err(CaptureError::NoFrame));
        let mut h = start_with(
            settings(),
            source,
            Scripted::accepting(0.5),
            Scripted::accepting(0.5),
            FixedUpload(Ok("u")),
        );

        let preview = wait_for(&mut h.handle, is_previewing).await;
        assert_eq!(preview.attempt_count, 1);
        assert_eq!(h.camera.lock().unwrap().captures, 2);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_switch_facing_reacquires() {
        // Long settle keeps the session parked in CameraActive.
        let mut slow = settings();
        slow.settle_delay = Duration::from_secs(60);
        let mut h = start_with(
            slow,
            SyntheticSource::portrait(),
            Scripted::accepting(0.5),
            Scripted::accepting(0.5),
            FixedUpload(Ok("u")),
        );

        wait_for(&mut h.handle, |s| s.phase == Phase::CameraActive).await;
        h.handle.send(UserAction::SwitchFacing);
        let active = wait_for(&mut h.handle, |s| s.phase == Phase::CameraActive && s.facing == FacingMode::Back).await;
        assert_eq!(active.frames_held, 0);

        let camera = h.camera.lock().unwrap();
        assert_eq!(camera.opens, 2);
        assert_eq!(camera.closes, 1);
        assert_eq!(camera.overlapping_opens, 0);
        assert_eq!(camera.last_facing, Some(FacingMode::Back));
        assert_eq!(camera.captures, 0);
        drop(camera);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_retake_reacquires_camera() {
        let mut h = start(
            Scripted::accepting(0.7),
            Scripted::accepting(0.7),
            FixedUpload(Ok("u")),
        );

        let first = wait_for(&mut h.handle, is_previewing).await;
        assert_eq!(first.last_analysis.unwrap().frame_id, FrameId(1));
        h.handle.send(UserAction::Retake);
        let second = wait_for(&mut h.handle, |s| {
            s.phase == Phase::Previewing && s.last_analysis.as_ref().map(|a| a.frame_id) == Some(FrameId(2))
        })
        .await;
        assert_eq!(second.attempt_count, 1);
        assert_eq!(second.frames_held, 1);

        let camera = h.camera.lock().unwrap();
        assert_eq!(camera.opens, 2);
        assert_eq!(camera.overlapping_opens, 0);
        drop(camera);
        h.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_unmount_releases_everything() {
        let mut slow = settings();
        slow.processing_floor = Duration::from_secs(60);
        let mut h = start_with(
            slow,
            SyntheticSource::portrait(),
            Scripted::accepting(0.5),
            Scripted::accepting(0.5),
            FixedUpload(Ok("u")),
        );

        wait_for(&mut h.handle, |s| s.phase == Phase::Analyzing).await;
        let camera = h.camera.clone();
        let sink = h.sink.clone();
        tokio::time::timeout(Duration::from_secs(5), h.handle.shutdown())
            .await
            .expect("shutdown should not wait for pending analysis");

        assert!(!camera.lock().unwrap().open);
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_session() {
        let mut h = start(
            Scripted::accepting(0.5),
            Scripted::accepting(0.5),
            FixedUpload(Ok("u")),
        );
        wait_for(&mut h.handle, is_previewing).await;
        let camera = h.camera.clone();
        let SessionHandle { actions, task, .. } = h.handle;
        drop(actions);
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(!camera.lock().unwrap().open);
    }
}
