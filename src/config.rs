use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analysis::{FallbackThresholds, HeuristicThresholds};
use crate::frame::FacingMode;
use crate::frame_source::StreamConstraints;

pub const DEFAULT_CONFIG_FILE: &str = "selfie_verify.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub heuristic: HeuristicThresholds,
    #[serde(default)]
    pub fallback: FallbackThresholds,
    pub upload: UploadConfig,
    pub paths: PathConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub facing: FacingMode,
    pub min_width: u32,
    pub ideal_width: u32,
    pub min_height: u32,
    pub ideal_height: u32,
    pub aspect_ratio: (u32, u32),
    /// libcamera index of the user-facing and environment-facing sensors.
    pub front_camera_index: u32,
    pub back_camera_index: u32,
    /// Use generated frames instead of real hardware.
    pub synthetic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Time the stream is given to settle before the still is taken.
    pub settle_delay_ms: u64,
    pub countdown_from: u8,
    pub countdown_tick_ms: u64,
    /// Minimum time the "processing" state stays visible.
    pub processing_floor_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_ms: u64,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    pub config_file: PathBuf,
    /// JSON record of the registration wizard the photo reference goes into.
    pub wizard_record: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let constraints = StreamConstraints::default();
        Self {
            camera: CameraConfig {
                facing: FacingMode::Front,
                min_width: constraints.min_width,
                ideal_width: constraints.ideal_width,
                min_height: constraints.min_height,
                ideal_height: constraints.ideal_height,
                aspect_ratio: constraints.aspect_ratio,
                front_camera_index: 0,
                back_camera_index: 1,
                synthetic: false,
            },
            timing: TimingConfig {
                settle_delay_ms: 2000,
                countdown_from: 3,
                countdown_tick_ms: 1000,
                processing_floor_ms: 2000,
            },
            heuristic: HeuristicThresholds::default(),
            fallback: FallbackThresholds::default(),
            upload: UploadConfig {
                enabled: true,
                endpoint: "http://localhost:8080/api/uploads/selfie".to_string(),
                timeout_ms: 15_000,
                jpeg_quality: 85,
            },
            paths: PathConfig {
                config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
                wizard_record: PathBuf::from("wizard/partner_registration.json"),
            },
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = PathBuf::from(DEFAULT_CONFIG_FILE);

        if config_path.exists() {
            Self::load_from_file(&config_path)
        } else {
            log::info!("Config file not found, creating default configuration");
            let default_config = Self::default();
            default_config.save()?;
            Ok(default_config)
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&contents).with_context(|| "Failed to parse configuration file")?;

        log::info!("Configuration loaded from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to_file(&self.paths.config_file)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
            }
        }

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        log::info!("Configuration saved to {}", path.as_ref().display());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let camera = &self.camera;
        if camera.min_width == 0 || camera.min_height == 0 {
            return Err(anyhow::anyhow!("Invalid camera dimensions"));
        }
        if camera.ideal_width < camera.min_width || camera.ideal_height < camera.min_height {
            return Err(anyhow::anyhow!(
                "Ideal resolution {}x{} below minimum {}x{}",
                camera.ideal_width,
                camera.ideal_height,
                camera.min_width,
                camera.min_height
            ));
        }
        if camera.aspect_ratio != (4, 3) {
            return Err(anyhow::anyhow!(
                "Unsupported aspect ratio {}:{}, expected 4:3",
                camera.aspect_ratio.0,
                camera.aspect_ratio.1
            ));
        }
        if camera.front_camera_index == camera.back_camera_index {
            return Err(anyhow::anyhow!("Front and back camera share index {}", camera.front_camera_index));
        }

        if self.timing.countdown_from == 0 && self.timing.countdown_tick_ms > 0 {
            log::warn!("Countdown disabled, ticks will never be shown");
        }

        let h = &self.heuristic;
        let percentages = [
            h.bright_above,
            h.dark_below,
            h.mid_tone_min,
            h.mid_tone_max,
            h.face_width_fraction,
            h.face_height_fraction,
            h.eye_dark_below,
            h.mouth_dark_below,
            h.edge_delta_above,
            h.reject_dark_pct_above,
            h.reject_bright_pct_above,
            h.reject_skin_pct_below,
            h.reject_face_shape_pct_below,
            h.reject_edge_pct_below,
            h.accept_confidence_above,
            h.deficiency_ratio_below,
        ];
        if percentages.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(anyhow::anyhow!("Heuristic thresholds must be finite and non-negative"));
        }
        if h.mid_tone_min > h.mid_tone_max {
            return Err(anyhow::anyhow!("Mid-tone range inverted"));
        }
        let w = &h.weights;
        let weights = [w.skin, w.face_shape, w.eye_region, w.mouth_region, w.edge, w.mid_tone];
        if weights.iter().any(|(weight, saturation)| *weight <= 0.0 || *saturation <= 0.0) {
            return Err(anyhow::anyhow!("Score weights and saturation points must be positive"));
        }

        let f = &self.fallback;
        if f.max_dimension == 0 {
            return Err(anyhow::anyhow!("Fallback downscale dimension must be positive"));
        }
        if f.min_brightness > f.max_brightness {
            return Err(anyhow::anyhow!(
                "Fallback brightness range inverted: {} > {}",
                f.min_brightness,
                f.max_brightness
            ));
        }
        let fallback_values = [
            f.min_brightness,
            f.min_skin_pct,
            f.min_color_variation_pct,
            f.vertical_edge_delta_above,
            f.min_edge_pct,
        ];
        if fallback_values.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(anyhow::anyhow!("Fallback thresholds must be finite and non-negative"));
        }

        if self.upload.enabled && self.upload.endpoint.trim().is_empty() {
            return Err(anyhow::anyhow!("Upload enabled without an endpoint"));
        }
        if self.upload.jpeg_quality == 0 || self.upload.jpeg_quality > 100 {
            return Err(anyhow::anyhow!("Invalid JPEG quality: {}", self.upload.jpeg_quality));
        }

        Ok(())
    }

    pub fn stream_constraints(&self) -> StreamConstraints {
        StreamConstraints {
            min_width: self.camera.min_width,
            ideal_width: self.camera.ideal_width,
            min_height: self.camera.min_height,
            ideal_height: self.camera.ideal_height,
            aspect_ratio: self.camera.aspect_ratio,
            facing: self.camera.facing,
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.timing.settle_delay_ms)
    }

    pub fn countdown_tick(&self) -> Duration {
        Duration::from_millis(self.timing.countdown_tick_ms)
    }

    pub fn processing_floor(&self) -> Duration {
        Duration::from_millis(self.timing.processing_floor_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload.timeout_ms)
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn facing(mut self, facing: FacingMode) -> Self {
        self.config.camera.facing = facing;
        self
    }

    pub fn synthetic_camera(mut self, enabled: bool) -> Self {
        self.config.camera.synthetic = enabled;
        self
    }

    pub fn resolution(mut self, ideal_width: u32, ideal_height: u32) -> Self {
        self.config.camera.ideal_width = ideal_width;
        self.config.camera.ideal_height = ideal_height;
        self
    }

    /// Zero everywhere is what the tests run with.
    pub fn timings(mut self, settle_ms: u64, tick_ms: u64, processing_floor_ms: u64) -> Self {
        self.config.timing.settle_delay_ms = settle_ms;
        self.config.timing.countdown_tick_ms = tick_ms;
        self.config.timing.processing_floor_ms = processing_floor_ms;
        self
    }

    pub fn upload_endpoint(mut self, endpoint: &str) -> Self {
        self.config.upload.enabled = true;
        self.config.upload.endpoint = endpoint.to_string();
        self
    }

    pub fn upload_disabled(mut self) -> Self {
        self.config.upload.enabled = false;
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.upload.jpeg_quality = quality;
        self
    }

    pub fn heuristic(mut self, thresholds: HeuristicThresholds) -> Self {
        self.config.heuristic = thresholds;
        self
    }

    pub fn fallback(mut self, thresholds: FallbackThresholds) -> Self {
        self.config.fallback = thresholds;
        self
    }

    pub fn wizard_record<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config.paths.wizard_record = path.as_ref().to_path_buf();
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// Environment-specific configuration presets
impl Config {
    pub fn development_desktop() -> Self {
        let defaults = Config::default();
        Config {
            camera: CameraConfig {
                synthetic: true,
                ..defaults.camera
            },
            upload: UploadConfig {
                enabled: false,
                endpoint: String::new(),
                ..defaults.upload
            },
            paths: PathConfig {
                wizard_record: PathBuf::from("output/partner_registration.json"),
                ..defaults.paths
            },
            ..Config::default()
        }
    }

    /// Raspberry Pi kiosk with the camera module attached.
    pub fn kiosk() -> Self {
        let defaults = Config::default();
        Config {
            camera: CameraConfig {
                ideal_width: 1640,
                ideal_height: 1230,
                ..defaults.camera
            },
            upload: UploadConfig {
                timeout_ms: 30_000,
                ..defaults.upload
            },
            ..Config::default()
        }
    }
}
