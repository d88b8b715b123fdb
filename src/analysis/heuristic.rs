use serde::{Deserialize, Serialize};

use super::{AnalysisResult, AnalyzerKind, FrameAnalyzer, Metrics, RejectionReason};
use crate::frame::{Frame, FrameId};

// Eye and mouth boxes, as fractions of the face region's bounding box.
const EYE_BAND_TOP: f64 = 0.10;
const EYE_BAND_BOTTOM: f64 = 0.25;
const LEFT_EYE_X: (f64, f64) = (0.20, 0.45);
const RIGHT_EYE_X: (f64, f64) = (0.55, 0.80);
const MOUTH_BAND_TOP: f64 = 0.75;
const MOUTH_BAND_BOTTOM: f64 = 0.90;
const MOUTH_X: (f64, f64) = (0.30, 0.70);

/// RGB conjunction deciding whether a pixel looks like skin.
///
/// All comparisons are strict. `r > b` is always required on top of the
/// configured bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkinRule {
    pub r_above: u8,
    pub g_above: u8,
    pub b_above: u8,
    /// `r - g` must exceed this.
    pub red_green_gap_above: i16,
    /// `r - g` must stay below this.
    pub red_green_gap_below: i16,
    /// `max(r,g,b) - min(r,g,b)` must exceed this.
    pub spread_above: u8,
}

impl SkinRule {
    pub fn matches(&self, r: u8, g: u8, b: u8) -> bool {
        if r <= self.r_above || g <= self.g_above || b <= self.b_above || r <= b {
            return false;
        }
        let gap = r as i16 - g as i16;
        if gap <= self.red_green_gap_above || gap >= self.red_green_gap_below {
            return false;
        }
        let spread = r.max(g).max(b) - r.min(g).min(b);
        spread > self.spread_above
    }
}

impl Default for SkinRule {
    fn default() -> Self {
        Self {
            r_above: 95,
            g_above: 40,
            b_above: 20,
            red_green_gap_above: 15,
            red_green_gap_below: 100,
            spread_above: 15,
        }
    }
}

/// Weight and saturation point of each composite term. A term contributes
/// `weight * min(percent / saturation, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub skin: (f64, f64),
    pub face_shape: (f64, f64),
    pub eye_region: (f64, f64),
    pub mouth_region: (f64, f64),
    pub edge: (f64, f64),
    pub mid_tone: (f64, f64),
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            skin: (0.30, 3.0),
            face_shape: (0.25, 2.0),
            eye_region: (0.10, 0.2),
            mouth_region: (0.05, 0.05),
            edge: (0.20, 5.0),
            mid_tone: (0.10, 20.0),
        }
    }
}

impl ScoreWeights {
    fn terms(&self) -> [(f64, f64); 6] {
        [self.skin, self.face_shape, self.eye_region, self.mouth_region, self.edge, self.mid_tone]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicThresholds {
    pub bright_above: f64,
    pub dark_below: f64,
    pub mid_tone_min: f64,
    pub mid_tone_max: f64,
    pub skin: SkinRule,
    /// Ellipse axes as fractions of frame width and height.
    pub face_width_fraction: f64,
    pub face_height_fraction: f64,
    pub eye_dark_below: f64,
    pub mouth_dark_below: f64,
    /// Sum of left and top brightness deltas that marks an edge pixel.
    pub edge_delta_above: f64,
    pub reject_dark_pct_above: f64,
    pub reject_bright_pct_above: f64,
    pub reject_skin_pct_below: f64,
    pub reject_face_shape_pct_below: f64,
    pub reject_edge_pct_below: f64,
    pub weights: ScoreWeights,
    pub accept_confidence_above: f64,
    /// A metric at or above this fraction of its saturation point is not
    /// blamed for a low score.
    pub deficiency_ratio_below: f64,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            bright_above: 200.0,
            dark_below: 40.0,
            mid_tone_min: 80.0,
            mid_tone_max: 200.0,
            skin: SkinRule::default(),
            face_width_fraction: 0.6,
            face_height_fraction: 0.7,
            eye_dark_below: 80.0,
            mouth_dark_below: 100.0,
            edge_delta_above: 30.0,
            reject_dark_pct_above: 95.0,
            reject_bright_pct_above: 85.0,
            reject_skin_pct_below: 0.8,
            reject_face_shape_pct_below: 0.5,
            reject_edge_pct_below: 2.0,
            weights: ScoreWeights::default(),
            accept_confidence_above: 0.35,
            deficiency_ratio_below: 0.5,
        }
    }
}

/// Pixel statistics of one frame, all as percentages of the total pixel count.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeuristicMetrics {
    pub total_pixels: usize,
    pub dark_pct: f64,
    pub bright_pct: f64,
    pub mid_tone_pct: f64,
    pub skin_pct: f64,
    pub face_shape_pct: f64,
    pub eye_region_pct: f64,
    pub mouth_region_pct: f64,
    pub edge_pct: f64,
}

/// Centered ellipse where a face is expected, plus its feature boxes.
struct FaceRegion {
    cx: f64,
    cy: f64,
    rx: f64,
    ry: f64,
    left: f64,
    top: f64,
}

impl FaceRegion {
    fn for_frame(width: u32, height: u32, t: &HeuristicThresholds) -> Self {
        let rx = width as f64 * t.face_width_fraction / 2.0;
        let ry = height as f64 * t.face_height_fraction / 2.0;
        let cx = width as f64 / 2.0;
        let cy = height as f64 / 2.0;
        Self { cx, cy, rx, ry, left: cx - rx, top: cy - ry }
    }

    fn contains(&self, px: f64, py: f64) -> bool {
        if self.rx <= 0.0 || self.ry <= 0.0 {
            return false;
        }
        let dx = (px - self.cx) / self.rx;
        let dy = (py - self.cy) / self.ry;
        dx * dx + dy * dy <= 1.0
    }

    fn in_box(&self, px: f64, py: f64, x_span: (f64, f64), y_span: (f64, f64)) -> bool {
        let fx = (px - self.left) / (2.0 * self.rx);
        let fy = (py - self.top) / (2.0 * self.ry);
        fx >= x_span.0 && fx < x_span.1 && fy >= y_span.0 && fy < y_span.1
    }

    fn in_eye_box(&self, px: f64, py: f64) -> bool {
        let band = (EYE_BAND_TOP, EYE_BAND_BOTTOM);
        self.in_box(px, py, LEFT_EYE_X, band) || self.in_box(px, py, RIGHT_EYE_X, band)
    }

    fn in_mouth_box(&self, px: f64, py: f64) -> bool {
        self.in_box(px, py, MOUTH_X, (MOUTH_BAND_TOP, MOUTH_BAND_BOTTOM))
    }
}

/// Primary face plausibility check: brightness, skin tone, geometry and
/// edge density scored against fixed thresholds.
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalyzer {
    thresholds: HeuristicThresholds,
}

impl HeuristicAnalyzer {
    pub fn new(thresholds: HeuristicThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &HeuristicThresholds {
        &self.thresholds
    }

    /// One pass over every pixel.
    pub fn measure(&self, frame: &Frame) -> HeuristicMetrics {
        let t = &self.thresholds;
        let image = frame.pixels();
        let (width, height) = image.dimensions();
        let total = width as usize * height as usize;
        if total == 0 {
            return HeuristicMetrics::default();
        }

        let region = FaceRegion::for_frame(width, height, t);
        let mut previous_row = vec![0.0f64; width as usize];
        let mut row = vec![0.0f64; width as usize];

        let (mut dark, mut bright, mut mid_tone) = (0usize, 0usize, 0usize);
        let (mut skin, mut face_shape) = (0usize, 0usize);
        let (mut eye, mut mouth, mut edges) = (0usize, 0usize, 0usize);

        for y in 0..height {
            let py = y as f64 + 0.5;
            for x in 0..width {
                let [r, g, b, _] = image.get_pixel(x, y).0;
                let brightness = (r as f64 + g as f64 + b as f64) / 3.0;
                let xi = x as usize;
                row[xi] = brightness;
                let px = x as f64 + 0.5;

                if brightness > t.bright_above {
                    bright += 1;
                } else if brightness < t.dark_below {
                    dark += 1;
                }
                if brightness >= t.mid_tone_min && brightness <= t.mid_tone_max {
                    mid_tone += 1;
                }

                if t.skin.matches(r, g, b) {
                    skin += 1;
                    if region.contains(px, py) {
                        face_shape += 1;
                    }
                }

                if brightness < t.eye_dark_below && region.in_eye_box(px, py) {
                    eye += 1;
                }
                if brightness < t.mouth_dark_below && region.in_mouth_box(px, py) {
                    mouth += 1;
                }

                if x > 0 && y > 0 {
                    let delta = (brightness - row[xi - 1]).abs() + (brightness - previous_row[xi]).abs();
                    if delta > t.edge_delta_above {
                        edges += 1;
                    }
                }
            }
            std::mem::swap(&mut previous_row, &mut row);
        }

        let pct = |count: usize| count as f64 * 100.0 / total as f64;
        HeuristicMetrics {
            total_pixels: total,
            dark_pct: pct(dark),
            bright_pct: pct(bright),
            mid_tone_pct: pct(mid_tone),
            skin_pct: pct(skin),
            face_shape_pct: pct(face_shape),
            eye_region_pct: pct(eye),
            mouth_region_pct: pct(mouth),
            edge_pct: pct(edges),
        }
    }

    /// Weighted sum of the saturating terms, in `[0, 1]` for the default weights.
    pub fn composite_confidence(&self, m: &HeuristicMetrics) -> f64 {
        let values = [
            m.skin_pct,
            m.face_shape_pct,
            m.eye_region_pct,
            m.mouth_region_pct,
            m.edge_pct,
            m.mid_tone_pct,
        ];
        self.thresholds
            .weights
            .terms()
            .iter()
            .zip(values)
            .map(|(&(weight, saturation), value)| weight * saturation_ratio(value, saturation))
            .sum()
    }

    /// Hard rejections in order, then the composite score.
    pub fn score(&self, frame_id: FrameId, m: &HeuristicMetrics) -> AnalysisResult {
        let t = &self.thresholds;
        let kind = AnalyzerKind::Heuristic;
        let metrics = Metrics::Heuristic(*m);

        let hard_rejection = if m.dark_pct > t.reject_dark_pct_above {
            Some(RejectionReason::TooDark)
        } else if m.bright_pct > t.reject_bright_pct_above {
            Some(RejectionReason::TooBright)
        } else if m.skin_pct < t.reject_skin_pct_below {
            Some(RejectionReason::NoFace)
        } else if m.face_shape_pct < t.reject_face_shape_pct_below {
            Some(RejectionReason::OffCenter)
        } else if m.edge_pct < t.reject_edge_pct_below {
            Some(RejectionReason::OutOfFocus)
        } else {
            None
        };
        if let Some(reason) = hard_rejection {
            return AnalysisResult::reject(frame_id, kind, 0.0, reason, metrics);
        }

        let confidence = self.composite_confidence(m);
        if confidence > t.accept_confidence_above {
            AnalysisResult::accept(frame_id, kind, confidence, metrics)
        } else {
            let reason = self.most_deficient(m);
            AnalysisResult::reject(frame_id, kind, confidence, reason, metrics)
        }
    }

    /// Lowest saturation ratio among skin, face shape and edge; earlier
    /// metrics win ties.
    fn most_deficient(&self, m: &HeuristicMetrics) -> RejectionReason {
        let w = &self.thresholds.weights;
        let candidates = [
            (saturation_ratio(m.skin_pct, w.skin.1), RejectionReason::NoFace),
            (saturation_ratio(m.face_shape_pct, w.face_shape.1), RejectionReason::OffCenter),
            (saturation_ratio(m.edge_pct, w.edge.1), RejectionReason::OutOfFocus),
        ];

        let mut worst: Option<(f64, RejectionReason)> = None;
        for (ratio, reason) in candidates {
            if ratio >= self.thresholds.deficiency_ratio_below {
                continue;
            }
            match worst {
                Some((lowest, _)) if ratio >= lowest => {}
                _ => worst = Some((ratio, reason)),
            }
        }
        worst.map(|(_, reason)| reason).unwrap_or(RejectionReason::LowConfidence)
    }
}

impl FrameAnalyzer for HeuristicAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::Heuristic
    }

    fn analyze(&self, frame: &Frame) -> AnalysisResult {
        let metrics = self.measure(frame);
        self.score(frame.id(), &metrics)
    }
}

fn saturation_ratio(value: f64, saturation: f64) -> f64 {
    if saturation <= 0.0 {
        return 1.0;
    }
    (value / saturation).clamp(0.0, 1.0)
}
