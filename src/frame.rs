use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, Local};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which way the camera faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    #[default]
    Front,
    Back,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Front => FacingMode::Back,
            FacingMode::Back => FacingMode::Front,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FacingMode::Front => "front",
            FacingMode::Back => "back",
        }
    }
}

impl std::fmt::Display for FacingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of one capture attempt within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A captured still. Immutable once built; a retake produces a new `Frame`
/// with a new id rather than editing this one.
#[derive(Debug, Clone)]
pub struct Frame {
    id: FrameId,
    pixels: Arc<RgbaImage>,
    captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(id: FrameId, pixels: RgbaImage) -> Self {
        Self::with_timestamp(id, pixels, Local::now())
    }

    pub fn with_timestamp(id: FrameId, pixels: RgbaImage, captured_at: DateTime<Local>) -> Self {
        Self {
            id,
            pixels: Arc::new(pixels),
            captured_at,
        }
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Shared handle to the pixel buffer, for display without copying.
    pub fn shared_pixels(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.pixels)
    }

    pub fn captured_at(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// Encode as baseline JPEG. Alpha is dropped.
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        let rgb = image::DynamicImage::ImageRgba8((*self.pixels).clone()).to_rgb8();
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100))
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
            .with_context(|| format!("Failed to encode frame {} as JPEG", self.id))?;
        Ok(out)
    }

    /// `data:image/jpeg;base64,...` form used when the upload does not go through.
    pub fn to_data_uri(&self, quality: u8) -> Result<String> {
        let jpeg = self.encode_jpeg(quality)?;
        Ok(jpeg_data_uri(&jpeg))
    }
}

pub fn jpeg_data_uri(jpeg: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(jpeg)
    )
}
