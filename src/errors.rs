//! Error types for the capture-and-verify pipeline

use thiserror::Error;

use crate::analysis::RejectionReason;

/// Device-level failures surfaced by a [`crate::frame_source::FrameSource`].
///
/// This set is closed: every backend maps its native failures onto one of
/// these four variants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("camera access denied")]
    AccessDenied,
    #[error("no camera found")]
    NotFound,
    #[error("camera is busy")]
    Busy,
    #[error("camera error: {0}")]
    Other(String),
}

/// Failure to obtain a still from an open stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The source produced nothing decodable.
    #[error("capture returned no frame")]
    NoFrame,
    /// The device went away mid-capture.
    #[error("device lost during capture: {0}")]
    Device(#[from] CameraError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    #[error("frame has no pixels")]
    EmptyFrame,
    #[error("pixel buffer length {actual} does not match {width}x{height}")]
    BufferMismatch { width: u32, height: u32, actual: usize },
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload disabled")]
    Disabled,
    #[error("failed to encode frame: {0}")]
    Encode(String),
    #[error("upload request failed: {0}")]
    Request(String),
    #[error("upload response missing url")]
    MissingUrl,
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::Request(e.to_string())
    }
}

/// An event arrived in a phase that has no transition for it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event {event} not valid in phase {phase}")]
pub struct TransitionError {
    pub phase: &'static str,
    pub event: &'static str,
}

/// User-facing error taxonomy. Every notice shown by the verification screen
/// is one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("camera access was denied")]
    CameraAccessDenied,
    #[error("no camera was found")]
    CameraNotFound,
    #[error("the camera is in use by another application")]
    CameraBusy,
    #[error("camera failure: {0}")]
    CameraOther(String),
    #[error("could not capture a photo")]
    CaptureFailed,
    #[error("photo rejected: {0}")]
    AnalysisRejected(RejectionReason),
    #[error("upload failed, kept a local copy")]
    UploadFailed,
}

impl VerifyError {
    /// Only camera failures stop the session until the user retries the
    /// device. A rejected photo can be retaken any number of times.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VerifyError::CameraAccessDenied
                | VerifyError::CameraNotFound
                | VerifyError::CameraBusy
                | VerifyError::CameraOther(_)
        )
    }

    /// Shown as a blocking notice the user dismisses, rather than a banner
    /// the session carries on past.
    pub fn needs_acknowledgement(&self) -> bool {
        self.is_fatal() || matches!(self, VerifyError::AnalysisRejected(_))
    }
}

impl From<CameraError> for VerifyError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::AccessDenied => VerifyError::CameraAccessDenied,
            CameraError::NotFound => VerifyError::CameraNotFound,
            CameraError::Busy => VerifyError::CameraBusy,
            CameraError::Other(msg) => VerifyError::CameraOther(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_error_maps_to_user_error() {
        assert_eq!(VerifyError::from(CameraError::AccessDenied), VerifyError::CameraAccessDenied);
        assert_eq!(VerifyError::from(CameraError::NotFound), VerifyError::CameraNotFound);
        assert_eq!(VerifyError::from(CameraError::Busy), VerifyError::CameraBusy);
        assert_eq!(
            VerifyError::from(CameraError::Other("usb reset".into())),
            VerifyError::CameraOther("usb reset".into())
        );
    }

    #[test]
    fn test_only_camera_failures_are_fatal() {
        assert!(!VerifyError::UploadFailed.is_fatal());
        assert!(!VerifyError::CaptureFailed.is_fatal());
        assert!(!VerifyError::AnalysisRejected(RejectionReason::TooDark).is_fatal());
        assert!(VerifyError::CameraBusy.is_fatal());
        assert!(VerifyError::CameraOther("usb reset".into()).is_fatal());
    }

    #[test]
    fn test_rejection_needs_acknowledgement() {
        assert!(VerifyError::AnalysisRejected(RejectionReason::NoFace).needs_acknowledgement());
        assert!(VerifyError::CameraAccessDenied.needs_acknowledgement());
        assert!(!VerifyError::UploadFailed.needs_acknowledgement());
        assert!(!VerifyError::CaptureFailed.needs_acknowledgement());
    }

    #[test]
    fn test_rejection_message() {
        let e = VerifyError::AnalysisRejected(RejectionReason::OffCenter);
        assert_eq!(e.to_string(), "photo rejected: face not centered");
    }
}
