//! Face plausibility analysis.
//!
//! Two rule-based analyzers run in a fixed order: the strict
//! [`HeuristicAnalyzer`] first, and the permissive [`QualityFallbackAnalyzer`]
//! only when the strict one rejects. Neither is a statistical model; every
//! threshold is a hand-tuned constant carried in the config.

mod fallback;
mod heuristic;

pub use fallback::{FallbackMetrics, FallbackThresholds, QualityFallbackAnalyzer};
pub use heuristic::{HeuristicAnalyzer, HeuristicMetrics, HeuristicThresholds, ScoreWeights, SkinRule};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::frame::{Frame, FrameId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectionReason {
    TooDark,
    TooBright,
    NoFace,
    OffCenter,
    OutOfFocus,
    LowConfidence,
}

impl RejectionReason {
    pub fn description(&self) -> &'static str {
        match self {
            RejectionReason::TooDark => "too dark",
            RejectionReason::TooBright => "too bright",
            RejectionReason::NoFace => "no face detected",
            RejectionReason::OffCenter => "face not centered",
            RejectionReason::OutOfFocus => "insufficient detail / out of focus",
            RejectionReason::LowConfidence => "confidence too low",
        }
    }

    /// Advice shown alongside the rejection notice.
    pub fn hint(&self) -> &'static str {
        match self {
            RejectionReason::TooDark => "Move somewhere with more light.",
            RejectionReason::TooBright => "Avoid direct light behind or on the camera.",
            RejectionReason::NoFace => "Make sure your face is visible to the camera.",
            RejectionReason::OffCenter => "Center your face inside the outline.",
            RejectionReason::OutOfFocus => "Hold still and wipe the lens.",
            RejectionReason::LowConfidence => "Face the camera directly and try again.",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalyzerKind {
    Heuristic,
    QualityFallback,
}

/// Raw measurements behind a verdict, kept for logging and display.
#[derive(Debug, Clone, PartialEq)]
pub enum Metrics {
    Heuristic(HeuristicMetrics),
    Fallback(FallbackMetrics),
    None,
}

/// Verdict of a single analyzer on a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    /// The frame this verdict was computed from.
    pub frame_id: FrameId,
    pub analyzer: AnalyzerKind,
    pub accepted: bool,
    /// In `[0, 1]`.
    pub confidence: f64,
    pub rejection_reason: Option<RejectionReason>,
    pub metrics: Metrics,
}

impl AnalysisResult {
    pub fn accept(frame_id: FrameId, analyzer: AnalyzerKind, confidence: f64, metrics: Metrics) -> Self {
        Self {
            frame_id,
            analyzer,
            accepted: true,
            confidence: confidence.clamp(0.0, 1.0),
            rejection_reason: None,
            metrics,
        }
    }

    pub fn reject(
        frame_id: FrameId,
        analyzer: AnalyzerKind,
        confidence: f64,
        reason: RejectionReason,
        metrics: Metrics,
    ) -> Self {
        Self {
            frame_id,
            analyzer,
            accepted: false,
            confidence: confidence.clamp(0.0, 1.0),
            rejection_reason: Some(reason),
            metrics,
        }
    }
}

pub trait FrameAnalyzer: Send + Sync {
    fn kind(&self) -> AnalyzerKind;

    /// Must be deterministic: the same frame always yields the same result.
    fn analyze(&self, frame: &Frame) -> AnalysisResult;
}

/// Outcome of running the analyzers in order on one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineVerdict {
    pub primary: AnalysisResult,
    /// Present only when the primary analyzer rejected.
    pub fallback: Option<AnalysisResult>,
}

impl PipelineVerdict {
    pub fn accepted(&self) -> bool {
        self.primary.accepted || self.fallback.as_ref().is_some_and(|r| r.accepted)
    }

    /// The result that decided the verdict. On a double rejection the primary
    /// result is reported since its reason is the more specific one.
    pub fn decisive(&self) -> &AnalysisResult {
        match &self.fallback {
            Some(fallback) if !self.primary.accepted && fallback.accepted => fallback,
            _ => &self.primary,
        }
    }

    pub fn rejection_reason(&self) -> Option<RejectionReason> {
        if self.accepted() {
            None
        } else {
            self.primary.rejection_reason.or(Some(RejectionReason::LowConfidence))
        }
    }

    pub fn frame_id(&self) -> FrameId {
        self.primary.frame_id
    }

    /// Verdict for a frame whose analysis could not run to completion.
    pub fn failed(frame_id: FrameId) -> Self {
        let reject = |kind| AnalysisResult::reject(frame_id, kind, 0.0, RejectionReason::LowConfidence, Metrics::None);
        Self {
            primary: reject(AnalyzerKind::Heuristic),
            fallback: Some(reject(AnalyzerKind::QualityFallback)),
        }
    }
}

#[derive(Clone)]
pub struct AnalysisPipeline {
    primary: Arc<dyn FrameAnalyzer>,
    fallback: Arc<dyn FrameAnalyzer>,
}

impl AnalysisPipeline {
    pub fn new(primary: Arc<dyn FrameAnalyzer>, fallback: Arc<dyn FrameAnalyzer>) -> Self {
        Self { primary, fallback }
    }

    pub fn from_thresholds(heuristic: HeuristicThresholds, fallback: FallbackThresholds) -> Self {
        Self::new(
            Arc::new(HeuristicAnalyzer::new(heuristic)),
            Arc::new(QualityFallbackAnalyzer::new(fallback)),
        )
    }

    pub fn run(&self, frame: &Frame) -> PipelineVerdict {
        let primary = self.primary.analyze(frame);
        if primary.accepted {
            log::debug!("Frame {} accepted by {:?} ({:.2})", frame.id(), primary.analyzer, primary.confidence);
            return PipelineVerdict { primary, fallback: None };
        }

        log::debug!(
            "Frame {} rejected by {:?}: {:?} ({:.2}), trying fallback",
            frame.id(),
            primary.analyzer,
            primary.rejection_reason,
            primary.confidence
        );
        let fallback = self.fallback.analyze(frame);
        log::debug!(
            "Fallback verdict for frame {}: accepted={} ({:.2})",
            frame.id(),
            fallback.accepted,
            fallback.confidence
        );
        PipelineVerdict {
            primary,
            fallback: Some(fallback),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        kind: AnalyzerKind,
        accepted: bool,
        confidence: f64,
        reason: RejectionReason,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(kind: AnalyzerKind, accepted: bool, confidence: f64, reason: RejectionReason) -> Arc<Self> {
            Arc::new(Self { kind, accepted, confidence, reason, calls: AtomicUsize::new(0) })
        }

        fn primary(accepted: bool, confidence: f64, reason: RejectionReason) -> Arc<Self> {
            Self::new(AnalyzerKind::Heuristic, accepted, confidence, reason)
        }

        fn fallback(accepted: bool, confidence: f64, reason: RejectionReason) -> Arc<Self> {
            Self::new(AnalyzerKind::QualityFallback, accepted, confidence, reason)
        }
    }

    impl FrameAnalyzer for Fixed {
        fn kind(&self) -> AnalyzerKind {
            self.kind
        }

        fn analyze(&self, frame: &Frame) -> AnalysisResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.accepted {
                AnalysisResult::accept(frame.id(), self.kind(), self.confidence, Metrics::None)
            } else {
                AnalysisResult::reject(frame.id(), self.kind(), self.confidence, self.reason, Metrics::None)
            }
        }
    }

    fn frame() -> Frame {
        Frame::new(FrameId(7), RgbaImage::new(4, 4))
    }

    #[test]
    fn test_fallback_skipped_when_primary_accepts() {
        let primary = Fixed::primary(true, 0.52, RejectionReason::LowConfidence);
        let fallback = Fixed::fallback(false, 0.0, RejectionReason::LowConfidence);
        let pipeline = AnalysisPipeline::new(primary.clone(), fallback.clone());

        let verdict = pipeline.run(&frame());
        assert!(verdict.accepted());
        assert!(verdict.fallback.is_none());
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 0);
        assert_eq!(verdict.decisive().confidence, 0.52);
    }

    #[test]
    fn test_fallback_rescues_primary_rejection() {
        let primary = Fixed::primary(false, 0.20, RejectionReason::OutOfFocus);
        let fallback = Fixed::fallback(true, 0.8, RejectionReason::LowConfidence);
        let verdict = AnalysisPipeline::new(primary, fallback).run(&frame());

        assert!(verdict.accepted());
        assert_eq!(verdict.rejection_reason(), None);
        assert!(verdict.decisive().accepted);
        assert_eq!(verdict.decisive().analyzer, AnalyzerKind::QualityFallback);
        assert_eq!(verdict.primary.rejection_reason, Some(RejectionReason::OutOfFocus));
    }

    #[test]
    fn test_double_rejection_reports_primary_reason() {
        let primary = Fixed::primary(false, 0.20, RejectionReason::OffCenter);
        let fallback = Fixed::fallback(false, 0.1, RejectionReason::LowConfidence);
        let verdict = AnalysisPipeline::new(primary, fallback).run(&frame());

        assert!(!verdict.accepted());
        assert_eq!(verdict.decisive().analyzer, AnalyzerKind::Heuristic);
        assert_eq!(verdict.rejection_reason(), Some(RejectionReason::OffCenter));
        assert_eq!(verdict.frame_id(), FrameId(7));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let r = AnalysisResult::accept(FrameId(1), AnalyzerKind::Heuristic, 1.7, Metrics::None);
        assert_eq!(r.confidence, 1.0);
        let r = AnalysisResult::reject(FrameId(1), AnalyzerKind::Heuristic, -0.1, RejectionReason::NoFace, Metrics::None);
        assert_eq!(r.confidence, 0.0);
    }
}
