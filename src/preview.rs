use crate::analysis::AnalysisResult;
use crate::frame::Frame;

/// What the gate emits when a user acts on the held frame.
#[derive(Debug, Clone)]
pub enum GateSignal {
    Approved { frame: Frame, analysis: AnalysisResult },
    Reset,
}

/// Holds one accepted frame until a person confirms or rejects it.
///
/// There is no timeout. Reading the held pair does not consume it, so any
/// number of redraws can show it.
#[derive(Debug, Default)]
pub struct PreviewGate {
    held: Option<(Frame, AnalysisResult)>,
}

impl PreviewGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces anything already held. Returns `false` when the analysis
    /// belongs to another frame, in which case nothing is held.
    pub fn hold(&mut self, frame: Frame, analysis: AnalysisResult) -> bool {
        if analysis.frame_id != frame.id() {
            log::warn!(
                "Refusing preview: analysis for frame {} paired with frame {}",
                analysis.frame_id,
                frame.id()
            );
            self.held = None;
            return false;
        }
        self.held = Some((frame, analysis));
        true
    }

    pub fn current(&self) -> Option<(&Frame, &AnalysisResult)> {
        self.held.as_ref().map(|(f, a)| (f, a))
    }

    pub fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    /// Emits the held pair downstream and empties the gate.
    pub fn approve(&mut self) -> Option<GateSignal> {
        self.held
            .take()
            .map(|(frame, analysis)| GateSignal::Approved { frame, analysis })
    }

    /// Drops the held pair.
    pub fn retake(&mut self) -> GateSignal {
        if let Some((frame, _)) = self.held.take() {
            log::debug!("Discarding previewed frame {}", frame.id());
        }
        GateSignal::Reset
    }

    pub fn clear(&mut self) {
        self.held = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalyzerKind, Metrics};
    use crate::frame::FrameId;
    use image::RgbaImage;

    fn pair(id: u64) -> (Frame, AnalysisResult) {
        let frame = Frame::new(FrameId(id), RgbaImage::new(2, 2));
        let analysis = AnalysisResult::accept(FrameId(id), AnalyzerKind::Heuristic, 0.6, Metrics::None);
        (frame, analysis)
    }

    #[test]
    fn test_hold_is_stable_across_reads() {
        let mut gate = PreviewGate::new();
        let (frame, analysis) = pair(1);
        assert!(gate.hold(frame, analysis));
        for _ in 0..3 {
            let (f, a) = gate.current().unwrap();
            assert_eq!(f.id(), FrameId(1));
            assert_eq!(a.confidence, 0.6);
        }
        assert!(gate.is_holding());
    }

    #[test]
    fn test_approve_emits_and_clears() {
        let mut gate = PreviewGate::new();
        let (frame, analysis) = pair(2);
        gate.hold(frame, analysis);

        match gate.approve() {
            Some(GateSignal::Approved { frame, analysis }) => {
                assert_eq!(frame.id(), FrameId(2));
                assert_eq!(analysis.frame_id, FrameId(2));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!gate.is_holding());
        assert!(gate.approve().is_none());
    }

    #[test]
    fn test_retake_discards() {
        let mut gate = PreviewGate::new();
        let (frame, analysis) = pair(3);
        gate.hold(frame, analysis);
        assert!(matches!(gate.retake(), GateSignal::Reset));
        assert!(gate.current().is_none());
    }

    #[test]
    fn test_mismatched_pair_is_refused() {
        let mut gate = PreviewGate::new();
        let (frame, _) = pair(4);
        let (_, stale) = pair(3);
        assert!(!gate.hold(frame, stale));
        assert!(!gate.is_holding());
    }
}
