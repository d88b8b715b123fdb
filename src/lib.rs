//! Selfie capture and on-device plausibility check for partner registration.
//!
//! The camera is opened, a single still is taken after a short settle delay,
//! two local analyzers decide whether it plausibly shows a face, and an
//! approved photo is uploaded (or kept inline when the upload fails) and
//! handed to the registration wizard.

pub mod analysis;
pub mod config;
pub mod controller;
pub mod errors;
pub mod frame;
pub mod frame_source;
pub mod preview;
pub mod session;
pub mod upload;
pub mod wizard;

pub use analysis::{AnalysisPipeline, AnalysisResult, PipelineVerdict, RejectionReason};
pub use config::{Config, ConfigBuilder};
pub use controller::{CaptureController, ControllerSettings, SessionHandle, UserAction};
pub use errors::{CameraError, CaptureError, VerifyError};
pub use frame::{FacingMode, Frame, FrameId};
pub use session::{Phase, SessionSnapshot};
