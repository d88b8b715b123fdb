use async_trait::async_trait;
use image::{ImageBuffer, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
#[cfg(feature = "camera")]
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::errors::{CameraError, CaptureError};
use crate::frame::FacingMode;

/// Stream request handed to a [`FrameSource`] when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConstraints {
    pub min_width: u32,
    pub ideal_width: u32,
    pub min_height: u32,
    pub ideal_height: u32,
    /// Width:height, 4:3 for the verification screen.
    pub aspect_ratio: (u32, u32),
    pub facing: FacingMode,
}

impl Default for StreamConstraints {
    fn default() -> Self {
        Self {
            min_width: 640,
            ideal_width: 1280,
            min_height: 480,
            ideal_height: 960,
            aspect_ratio: (4, 3),
            facing: FacingMode::Front,
        }
    }
}

impl StreamConstraints {
    pub fn with_facing(mut self, facing: FacingMode) -> Self {
        self.facing = facing;
        self
    }
}

/// Exclusive handle on a camera.
///
/// Callers must `close` before `open`ing again; implementations are free to
/// report [`CameraError::Busy`] on a second open.
#[async_trait]
pub trait FrameSource: Send {
    /// Resolves once the first frame of the stream has been decoded.
    async fn open(&mut self, constraints: &StreamConstraints) -> Result<(), CameraError>;

    /// [`CaptureError::NoFrame`] when the device is healthy but produced
    /// nothing usable, [`CaptureError::Device`] when it went away.
    async fn grab_still(&mut self) -> Result<RgbaImage, CaptureError>;

    /// Stops the stream. Safe to call when already closed.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Maps libcamera tool output onto the closed camera error set.
pub fn classify_camera_failure(stderr: &str) -> CameraError {
    let lower = stderr.to_lowercase();
    if lower.contains("permission denied") || lower.contains("not permitted") {
        CameraError::AccessDenied
    } else if lower.contains("no cameras available") || lower.contains("no such device") {
        CameraError::NotFound
    } else if lower.contains("busy") || lower.contains("in use") {
        CameraError::Busy
    } else {
        let first_line = stderr.lines().find(|l| !l.trim().is_empty()).unwrap_or("unknown failure");
        CameraError::Other(first_line.trim().to_string())
    }
}

/// Raspberry Pi camera driven through `rpicam-still`, with legacy
/// `raspistill` as a fallback.
#[cfg(feature = "camera")]
pub struct LibcameraSource {
    width: u32,
    height: u32,
    quality: u8,
    front_camera_index: u32,
    back_camera_index: u32,
    facing: FacingMode,
    temp_image_path: PathBuf,
    is_open: bool,
}

#[cfg(feature = "camera")]
impl LibcameraSource {
    pub fn new(front_camera_index: u32, back_camera_index: u32) -> Self {
        Self {
            width: 1280,
            height: 960,
            quality: 90,
            front_camera_index,
            back_camera_index,
            facing: FacingMode::Front,
            temp_image_path: std::env::temp_dir().join("selfie_verify_capture.jpg"),
            is_open: false,
        }
    }

    fn camera_index(&self) -> u32 {
        match self.facing {
            FacingMode::Front => self.front_camera_index,
            FacingMode::Back => self.back_camera_index,
        }
    }

    async fn run_capture(&self) -> Result<(), CameraError> {
        let path = self.temp_image_path.to_string_lossy().to_string();
        let width = self.width.to_string();
        let height = self.height.to_string();
        let quality = self.quality.to_string();
        let camera = self.camera_index().to_string();
        let args = [
            "-o", path.as_str(),
            "--camera", camera.as_str(),
            "--width", width.as_str(),
            "--height", height.as_str(),
            "--quality", quality.as_str(),
            "--immediate",
            "--nopreview",
            "--timeout", "100",
        ];
        log::debug!("Capture command: rpicam-still {}", args.join(" "));

        match tokio::process::Command::new("rpicam-still").args(args).output().await {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(classify_camera_failure(&String::from_utf8_lossy(&output.stderr))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("rpicam-still not found, trying raspistill");
                self.run_legacy_capture(&path, &width, &height, &quality).await
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => Err(CameraError::AccessDenied),
            Err(e) => Err(CameraError::Other(e.to_string())),
        }
    }

    async fn run_legacy_capture(&self, path: &str, width: &str, height: &str, quality: &str) -> Result<(), CameraError> {
        let result = tokio::process::Command::new("raspistill")
            .args(["-o", path, "-w", width, "-h", height, "-q", quality, "-t", "100", "-n"])
            .output()
            .await;
        match result {
            Ok(output) if output.status.success() => Ok(()),
            Ok(output) => Err(classify_camera_failure(&String::from_utf8_lossy(&output.stderr))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CameraError::NotFound),
            Err(e) => Err(CameraError::Other(e.to_string())),
        }
    }

    async fn load_capture(&self) -> Option<RgbaImage> {
        let path = self.temp_image_path.clone();
        let decoded = match tokio::task::spawn_blocking(move || decode_capture(&path)).await {
            Ok(decoded) => decoded,
            Err(e) => {
                log::error!("Capture decode task failed: {}", e);
                None
            }
        };
        let _ = tokio::fs::remove_file(&self.temp_image_path).await;
        decoded
    }
}

/// Synchronous JPEG decode; run it off the async executor.
#[cfg(feature = "camera")]
fn decode_capture(path: &Path) -> Option<RgbaImage> {
    match image::open(path) {
        Ok(img) => Some(img.to_rgba8()),
        Err(e) => {
            log::warn!("Failed to decode capture {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(feature = "camera")]
#[async_trait]
impl FrameSource for LibcameraSource {
    async fn open(&mut self, constraints: &StreamConstraints) -> Result<(), CameraError> {
        if self.is_open {
            return Err(CameraError::Busy);
        }
        self.facing = constraints.facing;
        self.width = constraints.ideal_width.max(constraints.min_width);
        self.height = constraints.ideal_height.max(constraints.min_height);
        log::info!(
            "Opening {} camera (index {}) at {}x{}",
            self.facing,
            self.camera_index(),
            self.width,
            self.height
        );

        // The first decodable still doubles as the "stream is live" signal.
        self.run_capture().await?;
        if self.load_capture().await.is_none() {
            return Err(CameraError::Other("first frame could not be decoded".into()));
        }
        self.is_open = true;
        log::info!("Camera ready");
        Ok(())
    }

    async fn grab_still(&mut self) -> Result<RgbaImage, CaptureError> {
        if !self.is_open {
            return Err(CaptureError::NoFrame);
        }
        self.run_capture().await?;
        self.load_capture().await.ok_or(CaptureError::NoFrame)
    }

    fn close(&mut self) {
        if self.is_open {
            log::info!("Camera released");
        }
        self.is_open = false;
        if self.temp_image_path.exists() {
            let _ = std::fs::remove_file(&self.temp_image_path);
        }
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(feature = "camera")]
impl Drop for LibcameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Counters shared between a [`SyntheticSource`] and whoever inspects it.
#[derive(Debug, Default)]
pub struct SyntheticState {
    pub opens: usize,
    pub closes: usize,
    pub captures: usize,
    /// Opens attempted while a stream was already open.
    pub overlapping_opens: usize,
    pub open: bool,
    pub last_facing: Option<FacingMode>,
    open_results: VecDeque<Result<(), CameraError>>,
    capture_results: VecDeque<Result<RgbaImage, CaptureError>>,
}

/// Camera stand-in that renders a generated picture, with scriptable failures.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    render: fn(u32, u32) -> RgbaImage,
    state: Arc<Mutex<SyntheticState>>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, render: fn(u32, u32) -> RgbaImage) -> Self {
        Self {
            width,
            height,
            render,
            state: Arc::new(Mutex::new(SyntheticState::default())),
        }
    }

    /// A camera that always sees a centered face-like subject.
    pub fn portrait() -> Self {
        Self::new(640, 480, synthetic_portrait)
    }

    pub fn state(&self) -> Arc<Mutex<SyntheticState>> {
        Arc::clone(&self.state)
    }

    /// Queue the result of a future `open`. Unqueued opens succeed.
    pub fn push_open_result(&self, result: Result<(), CameraError>) {
        if let Ok(mut state) = self.state.lock() {
            state.open_results.push_back(result);
        }
    }

    /// Queue the result of a future `grab_still`. Unqueued captures render.
    pub fn push_capture_result(&self, result: Result<RgbaImage, CaptureError>) {
        if let Ok(mut state) = self.state.lock() {
            state.capture_results.push_back(result);
        }
    }
}

#[async_trait]
impl FrameSource for SyntheticSource {
    async fn open(&mut self, constraints: &StreamConstraints) -> Result<(), CameraError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| CameraError::Other("synthetic camera state poisoned".into()))?;
        state.opens += 1;
        if state.open {
            state.overlapping_opens += 1;
            return Err(CameraError::Busy);
        }
        state.last_facing = Some(constraints.facing);
        let result = state.open_results.pop_front().unwrap_or(Ok(()));
        state.open = result.is_ok();
        result
    }

    async fn grab_still(&mut self) -> Result<RgbaImage, CaptureError> {
        let scripted = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| CameraError::Other("synthetic camera state poisoned".into()))?;
            if !state.open {
                return Err(CaptureError::NoFrame);
            }
            state.captures += 1;
            state.capture_results.pop_front()
        };
        match scripted {
            Some(result) => result,
            None => Ok((self.render)(self.width, self.height)),
        }
    }

    fn close(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            if state.open {
                state.closes += 1;
            }
            state.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.state.lock().map(|s| s.open).unwrap_or(false)
    }
}

/// Skin-toned ellipse with darker eye and mouth marks on a striped backdrop.
pub fn synthetic_portrait(width: u32, height: u32) -> RgbaImage {
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let (rx, ry) = (width as f32 * 0.27, height as f32 * 0.33);
    ImageBuffer::from_fn(width, height, |x, y| {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        let dx = (px - cx) / rx;
        let dy = (py - cy) / ry;
        let inside = dx * dx + dy * dy <= 1.0;
        let eye_row = dy > -0.75 && dy < -0.5;
        let eye_col = (dx > -0.6 && dx < -0.2) || (dx > 0.2 && dx < 0.6);
        let mouth = dy > 0.55 && dy < 0.75 && dx.abs() < 0.35;

        if (eye_row && eye_col) || mouth {
            if x % 2 == 0 { Rgba([45, 30, 30, 255]) } else { Rgba([120, 80, 70, 255]) }
        } else if inside {
            Rgba([205, 155, 125, 255])
        } else if (x / 6) % 2 == 0 {
            Rgba([70, 75, 90, 255])
        } else {
            Rgba([150, 155, 170, 255])
        }
    })
}

/// Nothing but mid-grey. Fails both analyzers.
pub fn synthetic_blank(width: u32, height: u32) -> RgbaImage {
    ImageBuffer::from_pixel(width, height, Rgba([128, 128, 128, 255]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{FrameAnalyzer, HeuristicAnalyzer};
    use crate::frame::{Frame, FrameId};

    #[test]
    fn test_classify_camera_failure() {
        assert_eq!(classify_camera_failure("ERROR: Permission denied"), CameraError::AccessDenied);
        assert_eq!(classify_camera_failure("ERROR: *** no cameras available ***"), CameraError::NotFound);
        assert_eq!(classify_camera_failure("Device or resource busy"), CameraError::Busy);
        assert_eq!(
            classify_camera_failure("\nsomething odd happened\nmore"),
            CameraError::Other("something odd happened".into())
        );
    }

    #[test]
    fn test_default_constraints() {
        let c = StreamConstraints::default();
        assert_eq!((c.min_width, c.ideal_width, c.min_height, c.ideal_height), (640, 1280, 480, 960));
        assert_eq!(c.aspect_ratio, (4, 3));
        assert_eq!(c.with_facing(FacingMode::Back).facing, FacingMode::Back);
    }

    #[tokio::test]
    async fn test_synthetic_source_is_exclusive() {
        let mut source = SyntheticSource::portrait();
        let state = source.state();
        source.open(&StreamConstraints::default()).await.unwrap();
        assert_eq!(source.open(&StreamConstraints::default()).await, Err(CameraError::Busy));
        assert_eq!(state.lock().unwrap().overlapping_opens, 1);

        source.close();
        source.open(&StreamConstraints::default()).await.unwrap();
        assert_eq!(state.lock().unwrap().closes, 1);
    }

    #[tokio::test]
    async fn test_synthetic_scripted_results() {
        let mut source = SyntheticSource::portrait();
        source.push_open_result(Err(CameraError::AccessDenied));
        source.push_capture_result(Err(CaptureError::NoFrame));
        source.push_capture_result(Err(CaptureError::Device(CameraError::NotFound)));

        assert_eq!(source.open(&StreamConstraints::default()).await, Err(CameraError::AccessDenied));
        assert!(!source.is_open());
        assert!(matches!(source.grab_still().await, Err(CaptureError::NoFrame)));

        source.open(&StreamConstraints::default()).await.unwrap();
        assert!(matches!(source.grab_still().await, Err(CaptureError::NoFrame)));
        assert!(matches!(
            source.grab_still().await,
            Err(CaptureError::Device(CameraError::NotFound))
        ));
        let still = source.grab_still().await.unwrap();
        assert_eq!(still.dimensions(), (640, 480));
    }

    #[cfg(feature = "camera")]
    #[test]
    fn test_decode_capture_reads_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("still.jpg");
        image::DynamicImage::ImageRgba8(synthetic_portrait(64, 48))
            .to_rgb8()
            .save(&path)
            .unwrap();

        let decoded = decode_capture(&path).unwrap();
        assert_eq!(decoded.dimensions(), (64, 48));
        assert!(decode_capture(&dir.path().join("missing.jpg")).is_none());
    }

    #[cfg(feature = "camera")]
    #[tokio::test]
    async fn test_closed_libcamera_source_yields_no_frame() {
        let mut source = LibcameraSource::new(0, 1);
        assert!(matches!(source.grab_still().await, Err(CaptureError::NoFrame)));
    }

    #[test]
    fn test_synthetic_portrait_passes_heuristic() {
        let frame = Frame::new(FrameId(1), synthetic_portrait(320, 240));
        let result = HeuristicAnalyzer::default().analyze(&frame);
        assert!(result.accepted, "{:?}", result);
    }

    #[test]
    fn test_synthetic_blank_fails_heuristic() {
        let frame = Frame::new(FrameId(1), synthetic_blank(320, 240));
        assert!(!HeuristicAnalyzer::default().analyze(&frame).accepted);
    }
}
