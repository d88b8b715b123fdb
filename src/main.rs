use anyhow::Result;
use eframe::egui;
use log::info;
use std::sync::Arc;

mod texture;
mod ui;

use selfie_verify::analysis::AnalysisPipeline;
use selfie_verify::frame_source::{FrameSource, SyntheticSource};
use selfie_verify::upload::{DisabledUpload, HttpUploadBridge, UploadBridge};
use selfie_verify::wizard::JsonRecordSink;
use selfie_verify::{CaptureController, Config, ControllerSettings};

use crate::ui::VerificationApp;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting selfie verification");

    let config = Config::load()?;
    config.validate()?;
    info!(
        "Configuration loaded: {} camera, {}x{} ideal",
        config.camera.facing, config.camera.ideal_width, config.camera.ideal_height
    );

    let source = build_frame_source(&config);
    let pipeline = AnalysisPipeline::from_thresholds(config.heuristic.clone(), config.fallback.clone());
    let uploader: Arc<dyn UploadBridge> = if config.upload.enabled {
        Arc::new(HttpUploadBridge::new(config.upload.endpoint.clone(), config.upload_timeout())?)
    } else {
        log::warn!("Upload disabled, approved photos will be kept inline");
        Arc::new(DisabledUpload)
    };
    let sink = Arc::new(JsonRecordSink::new(&config.paths.wizard_record));

    let handle = CaptureController::new(ControllerSettings::from(&config), source, pipeline, uploader, sink).spawn();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1024.0, 768.0])
            .with_min_inner_size([640.0, 480.0])
            .with_fullscreen(!config.camera.synthetic),
        ..Default::default()
    };

    info!("Launching GUI application...");

    eframe::run_native(
        "Selfie Verification",
        options,
        Box::new(|cc| {
            setup_touch_style(&cc.egui_ctx);
            Box::new(VerificationApp::new(handle))
        }),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e))?;

    info!("Application shut down gracefully");
    Ok(())
}

fn build_frame_source(config: &Config) -> Box<dyn FrameSource> {
    if config.camera.synthetic {
        info!("Using synthetic camera");
        return Box::new(SyntheticSource::portrait());
    }

    #[cfg(feature = "camera")]
    {
        Box::new(selfie_verify::frame_source::LibcameraSource::new(
            config.camera.front_camera_index,
            config.camera.back_camera_index,
        ))
    }

    #[cfg(not(feature = "camera"))]
    {
        log::warn!("Built without camera support, falling back to synthetic frames");
        Box::new(SyntheticSource::portrait())
    }
}

fn setup_touch_style(ctx: &egui::Context) {
    let mut style = (*ctx.style()).clone();

    // Larger UI elements for touch interaction
    style.spacing.button_padding = egui::vec2(16.0, 12.0);
    style.spacing.item_spacing = egui::vec2(12.0, 8.0);
    style.spacing.window_margin = egui::Margin::same(16.0);

    style.text_styles.insert(
        egui::TextStyle::Button,
        egui::FontId::new(18.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Body,
        egui::FontId::new(16.0, egui::FontFamily::Proportional),
    );
    style.text_styles.insert(
        egui::TextStyle::Heading,
        egui::FontId::new(24.0, egui::FontFamily::Proportional),
    );

    ctx.set_style(style);
}
