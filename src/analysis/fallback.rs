use image::imageops::FilterType;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use super::heuristic::SkinRule;
use super::{AnalysisResult, AnalyzerKind, FrameAnalyzer, Metrics, RejectionReason};
use crate::errors::AnalysisError;
use crate::frame::{Frame, FrameId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackThresholds {
    /// Frames are downscaled to fit this square before measuring.
    pub max_dimension: u32,
    pub min_brightness: f64,
    pub max_brightness: f64,
    pub skin: SkinRule,
    pub min_skin_pct: f64,
    /// Channel delta to the previous pixel that counts as color variation.
    pub color_delta_above: u8,
    pub min_color_variation_pct: f64,
    /// Brightness delta to the pixel above that counts as an edge.
    pub vertical_edge_delta_above: f64,
    pub min_edge_pct: f64,
}

impl Default for FallbackThresholds {
    fn default() -> Self {
        Self {
            max_dimension: 400,
            min_brightness: 20.0,
            max_brightness: 240.0,
            skin: SkinRule {
                r_above: 60,
                g_above: 30,
                b_above: 15,
                red_green_gap_above: -1,
                red_green_gap_below: 256,
                spread_above: 10,
            },
            min_skin_pct: 1.0,
            color_delta_above: 30,
            min_color_variation_pct: 4.0,
            vertical_edge_delta_above: 20.0,
            min_edge_pct: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FallbackMetrics {
    pub mean_brightness: f64,
    pub skin_pct: f64,
    pub color_variation_pct: f64,
    pub edge_pct: f64,
    /// Dimensions actually measured after downscaling.
    pub measured_width: u32,
    pub measured_height: u32,
}

/// Safety net for frames the strict analyzer turns down: accepts anything
/// with ordinary photographic characteristics.
#[derive(Debug, Clone, Default)]
pub struct QualityFallbackAnalyzer {
    thresholds: FallbackThresholds,
}

impl QualityFallbackAnalyzer {
    pub fn new(thresholds: FallbackThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &FallbackThresholds {
        &self.thresholds
    }

    pub fn measure(&self, frame: &Frame) -> Result<FallbackMetrics, AnalysisError> {
        let source = frame.pixels();
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(AnalysisError::EmptyFrame);
        }
        let expected = width as usize * height as usize * 4;
        if source.as_raw().len() != expected {
            return Err(AnalysisError::BufferMismatch {
                width,
                height,
                actual: source.as_raw().len(),
            });
        }

        let image = downscale_to_fit(source, self.thresholds.max_dimension);
        Ok(self.measure_pixels(&image))
    }

    fn measure_pixels(&self, image: &RgbaImage) -> FallbackMetrics {
        let t = &self.thresholds;
        let (width, height) = image.dimensions();
        let total = width as usize * height as usize;

        let mut brightness_sum = 0.0f64;
        let (mut skin, mut variation, mut edges) = (0usize, 0usize, 0usize);
        let mut previous: Option<[u8; 4]> = None;
        let mut row_above = vec![0.0f64; width as usize];

        for y in 0..height {
            for x in 0..width {
                let pixel = image.get_pixel(x, y).0;
                let [r, g, b, _] = pixel;
                let brightness = (r as f64 + g as f64 + b as f64) / 3.0;
                brightness_sum += brightness;

                if t.skin.matches(r, g, b) {
                    skin += 1;
                }

                // Row-major predecessor, so this wraps across row ends.
                if let Some(prev) = previous {
                    let varies = (0..3).any(|c| pixel[c].abs_diff(prev[c]) > t.color_delta_above);
                    if varies {
                        variation += 1;
                    }
                }
                previous = Some(pixel);

                let xi = x as usize;
                if y > 0 && (brightness - row_above[xi]).abs() > t.vertical_edge_delta_above {
                    edges += 1;
                }
                row_above[xi] = brightness;
            }
        }

        let pct = |count: usize| count as f64 * 100.0 / total as f64;
        FallbackMetrics {
            mean_brightness: brightness_sum / total as f64,
            skin_pct: pct(skin),
            color_variation_pct: pct(variation),
            edge_pct: pct(edges),
            measured_width: width,
            measured_height: height,
        }
    }

    /// All four criteria must hold.
    pub fn evaluate(&self, frame_id: FrameId, m: &FallbackMetrics) -> AnalysisResult {
        let t = &self.thresholds;
        let kind = AnalyzerKind::QualityFallback;
        let brightness_ok = m.mean_brightness >= t.min_brightness && m.mean_brightness <= t.max_brightness;

        let confidence = (f64::from(u8::from(brightness_ok))
            + ratio(m.skin_pct, t.min_skin_pct)
            + ratio(m.color_variation_pct, t.min_color_variation_pct)
            + ratio(m.edge_pct, t.min_edge_pct))
            / 4.0;

        let reason = if m.mean_brightness < t.min_brightness {
            Some(RejectionReason::TooDark)
        } else if m.mean_brightness > t.max_brightness {
            Some(RejectionReason::TooBright)
        } else if m.skin_pct < t.min_skin_pct {
            Some(RejectionReason::NoFace)
        } else if m.color_variation_pct < t.min_color_variation_pct {
            Some(RejectionReason::LowConfidence)
        } else if m.edge_pct < t.min_edge_pct {
            Some(RejectionReason::OutOfFocus)
        } else {
            None
        };

        let metrics = Metrics::Fallback(*m);
        match reason {
            None => AnalysisResult::accept(frame_id, kind, confidence, metrics),
            Some(reason) => AnalysisResult::reject(frame_id, kind, confidence, reason, metrics),
        }
    }
}

impl FrameAnalyzer for QualityFallbackAnalyzer {
    fn kind(&self) -> AnalyzerKind {
        AnalyzerKind::QualityFallback
    }

    fn analyze(&self, frame: &Frame) -> AnalysisResult {
        match self.measure(frame) {
            Ok(metrics) => self.evaluate(frame.id(), &metrics),
            Err(e) => {
                log::warn!("Fallback analysis of frame {} failed: {}", frame.id(), e);
                AnalysisResult::reject(frame.id(), self.kind(), 0.0, RejectionReason::LowConfidence, Metrics::None)
            }
        }
    }
}

/// Aspect-preserving downscale; frames already small enough are borrowed as-is.
fn downscale_to_fit(image: &RgbaImage, max_dimension: u32) -> Cow<'_, RgbaImage> {
    let (width, height) = image.dimensions();
    if max_dimension == 0 || (width <= max_dimension && height <= max_dimension) {
        return Cow::Borrowed(image);
    }

    let scale = (max_dimension as f64 / width as f64).min(max_dimension as f64 / height as f64);
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_dimension);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_dimension);
    Cow::Owned(image::imageops::resize(image, new_width, new_height, FilterType::Triangle))
}

fn ratio(value: f64, minimum: f64) -> f64 {
    if minimum <= 0.0 {
        return 1.0;
    }
    (value / minimum).clamp(0.0, 1.0)
}
