use std::time::Duration;

use eframe::egui;
use selfie_verify::{Phase, SessionHandle, SessionSnapshot, UserAction, VerifyError};

use crate::texture::PreviewTexture;

// ============================================================================
// CONSTANTS FOR UI STYLING
// ============================================================================
const UI_PADDING: f32 = 20.0;
const BUTTON_RADIUS: f32 = 70.0;
const BACKGROUND: egui::Color32 = egui::Color32::from_rgb(40, 40, 40);
const GUIDE_COLOR: egui::Color32 = egui::Color32::from_rgb(120, 200, 140);
const NEUTRAL_FILL: egui::Color32 = egui::Color32::from_rgb(60, 60, 70);
const CONFIRM_FILL: egui::Color32 = egui::Color32::from_rgb(40, 120, 40);

// ============================================================================
// MAIN APP STRUCT
// ============================================================================

pub struct VerificationApp {
    handle: SessionHandle,
    preview: PreviewTexture,
}

impl VerificationApp {
    pub fn new(handle: SessionHandle) -> Self {
        Self {
            handle,
            preview: PreviewTexture::default(),
        }
    }

    fn act(&self, action: UserAction) {
        log::debug!("Button pressed: {}", action.description());
        if !self.handle.send(action) {
            log::warn!("Session already closed, ignoring {:?}", action);
        }
    }
}

// ============================================================================
// MAIN UPDATE LOOP
// ============================================================================

impl eframe::App for VerificationApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // ESC key to exit (for debugging in kiosk mode with keyboard)
        if ctx.input(|i| i.key_pressed(egui::Key::Escape)) {
            self.act(UserAction::Unmount);
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
        }

        let snapshot = self.handle.snapshot();
        if snapshot.preview.is_none() {
            self.preview.clear();
        }

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| {
                let full_rect = ui.max_rect();
                ui.painter().rect_filled(full_rect, 0.0, BACKGROUND);

                self.render_viewport(ui, ctx, full_rect, &snapshot);
                self.render_buttons(ctx, full_rect, &snapshot);
                render_notice(ctx, &snapshot);
                render_attempt(ctx, full_rect, &snapshot);
            });

        // Timers run on the session task; poll for the next state.
        ctx.request_repaint_after(Duration::from_millis(100));
    }
}

impl Drop for VerificationApp {
    fn drop(&mut self) {
        let _ = self.handle.send(UserAction::Unmount);
    }
}

// ============================================================================
// VIEWPORT RENDERING
// ============================================================================

impl VerificationApp {
    fn render_viewport(&mut self, ui: &mut egui::Ui, ctx: &egui::Context, rect: egui::Rect, snapshot: &SessionSnapshot) {
        match &snapshot.phase {
            Phase::Idle | Phase::CameraInitializing | Phase::RetakeRequested => {
                centered_message(ui, rect, "Starting camera…", 28.0);
            }
            Phase::CameraActive => {
                draw_face_guide(ui, rect);
                centered_message(ui, rect, "Look at the camera and hold still", 24.0);
            }
            Phase::CountdownArmed | Phase::Captured | Phase::Analyzing => {
                draw_face_guide(ui, rect);
                match snapshot.countdown {
                    Some(n) => centered_message(ui, rect, &n.to_string(), 120.0),
                    None => centered_message(ui, rect, "Checking photo…", 28.0),
                }
            }
            Phase::Accepted | Phase::Previewing => self.render_preview(ui, ctx, rect, snapshot),
            Phase::Approved | Phase::Uploading => centered_message(ui, rect, "Saving photo…", 28.0),
            Phase::Done => {
                let text = match &snapshot.published {
                    Some(image) if image.upload_failed => "Photo saved on this device",
                    _ => "Photo saved",
                };
                centered_message(ui, rect, text, 32.0);
            }
            Phase::Rejected(reason) => {
                let text = format!("Photo not accepted: {}\n{}", reason, reason.hint());
                centered_message(ui, rect, &text, 26.0);
            }
            Phase::CameraError(error) => {
                let text = format!("{}\nCheck the camera and try again.", VerifyError::from(error.clone()));
                centered_message(ui, rect, &text, 26.0);
            }
            Phase::Closed => centered_message(ui, rect, "Closed", 24.0),
        }
    }

    fn render_preview(&mut self, ui: &mut egui::Ui, ctx: &egui::Context, rect: egui::Rect, snapshot: &SessionSnapshot) {
        let Some((pixels, analysis)) = &snapshot.preview else {
            return;
        };
        let Some(texture) = self.preview.update(ctx, analysis.frame_id, pixels) else {
            return;
        };

        let area = rect.shrink(UI_PADDING * 2.0);
        let display_size = fit_image_in_rect(texture.size_vec2(), area.size());
        let centered_rect = center_rect_in_rect(display_size, area);
        ui.allocate_ui_at_rect(centered_rect, |ui| {
            ui.add(egui::Image::new(texture).fit_to_exact_size(display_size));
        });

        let caption = format!("Confidence {:.0}%", analysis.confidence * 100.0);
        ui.painter().text(
            egui::pos2(rect.center().x, centered_rect.max.y + UI_PADDING),
            egui::Align2::CENTER_CENTER,
            caption,
            egui::FontId::proportional(18.0),
            egui::Color32::LIGHT_GRAY,
        );
    }

    // ============================================================================
    // BUTTONS - bottom right corner, primary action lowest
    // ============================================================================
    fn render_buttons(&mut self, ctx: &egui::Context, screen_rect: egui::Rect, snapshot: &SessionSnapshot) {
        let buttons: &[(&'static str, UserAction, egui::Color32)] = match &snapshot.phase {
            Phase::CameraActive | Phase::CountdownArmed => &[("Switch", UserAction::SwitchFacing, NEUTRAL_FILL)],
            Phase::Previewing => &[
                ("Use photo", UserAction::Approve, CONFIRM_FILL),
                ("Retake", UserAction::Retake, NEUTRAL_FILL),
            ],
            Phase::Rejected(_) => &[("Try again", UserAction::DismissRejection, NEUTRAL_FILL)],
            Phase::CameraError(_) => &[("Retry", UserAction::Retry, NEUTRAL_FILL)],
            Phase::Done => &[("Close", UserAction::Unmount, CONFIRM_FILL)],
            _ => &[],
        };

        for (index, (label, action, fill)) in buttons.iter().enumerate() {
            let center = egui::pos2(
                screen_rect.max.x - BUTTON_RADIUS - UI_PADDING,
                screen_rect.max.y - BUTTON_RADIUS - UI_PADDING - index as f32 * (BUTTON_RADIUS * 2.0 + UI_PADDING),
            );
            egui::Area::new(egui::Id::new(*label))
                .fixed_pos(center - egui::vec2(BUTTON_RADIUS, BUTTON_RADIUS))
                .order(egui::Order::Foreground)
                .show(ctx, |ui| {
                    if circular_button(ui, BUTTON_RADIUS, label, *fill) {
                        self.act(*action);
                        if *action == UserAction::Unmount {
                            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                        }
                    }
                });
        }
    }
}

/// Soft notices (capture retry, upload fallback) shown as a banner.
fn render_notice(ctx: &egui::Context, snapshot: &SessionSnapshot) {
    let Some(notice) = snapshot.notice.as_ref().filter(|n| !n.needs_acknowledgement()) else {
        return;
    };

    egui::Area::new("notice")
        .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, UI_PADDING * 3.0))
        .order(egui::Order::Tooltip)
        .show(ctx, |ui| {
            egui::Frame::none()
                .fill(egui::Color32::from_rgb(180, 120, 40))
                .rounding(8.0)
                .inner_margin(egui::Margin::symmetric(20.0, 15.0))
                .show(ui, |ui| {
                    ui.label(egui::RichText::new(notice.to_string()).color(egui::Color32::WHITE).size(20.0));
                });
        });
}

fn render_attempt(ctx: &egui::Context, screen_rect: egui::Rect, snapshot: &SessionSnapshot) {
    egui::Area::new("attempt")
        .fixed_pos(egui::pos2(screen_rect.min.x + UI_PADDING, screen_rect.max.y - UI_PADDING * 2.0))
        .order(egui::Order::Foreground)
        .show(ctx, |ui| {
            ui.label(
                egui::RichText::new(format!("Attempt {} · {} camera", snapshot.attempt_count, snapshot.facing))
                    .color(egui::Color32::GRAY)
                    .size(16.0),
            );
        });
}

fn centered_message(ui: &mut egui::Ui, rect: egui::Rect, text: &str, size: f32) {
    ui.painter().text(
        rect.center(),
        egui::Align2::CENTER_CENTER,
        text,
        egui::FontId::proportional(size),
        egui::Color32::WHITE,
    );
}

/// Oval the user lines their face up with, matching the analyzer's face region.
fn draw_face_guide(ui: &mut egui::Ui, rect: egui::Rect) {
    let guide = egui::Rect::from_center_size(
        rect.center(),
        egui::vec2(rect.height() * 0.6 * 0.75, rect.height() * 0.7),
    );
    ui.painter()
        .rect_stroke(guide, guide.width() / 2.0, egui::Stroke::new(4.0, GUIDE_COLOR));
}

fn circular_button(ui: &mut egui::Ui, radius: f32, text: &str, base_fill: egui::Color32) -> bool {
    let size = egui::vec2(radius * 2.0, radius * 2.0);
    let (rect, response) = ui.allocate_exact_size(size, egui::Sense::click());

    if ui.is_rect_visible(rect) {
        let painter = ui.painter();
        let center = rect.center();

        let (fill_color, stroke_color) = if response.is_pointer_button_down_on() {
            let r = base_fill.r().saturating_sub(30);
            let g = base_fill.g().saturating_sub(30);
            let b = base_fill.b().saturating_sub(30);
            (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(120, 120, 130))
        } else if response.hovered() {
            let r = base_fill.r().saturating_add(20);
            let g = base_fill.g().saturating_add(20);
            let b = base_fill.b().saturating_add(20);
            (egui::Color32::from_rgb(r, g, b), egui::Color32::from_rgb(150, 150, 160))
        } else {
            (base_fill, egui::Color32::from_rgb(100, 100, 110))
        };

        // Shadow
        painter.circle(
            center + egui::vec2(3.0, 3.0),
            radius,
            egui::Color32::from_black_alpha(80),
            egui::Stroke::NONE,
        );
        painter.circle(center, radius, fill_color, egui::Stroke::new(3.0, stroke_color));

        let font_id = egui::FontId::proportional(radius / 3.5);
        painter.text(center, egui::Align2::CENTER_CENTER, text, font_id, egui::Color32::WHITE);
    }

    response.clicked()
}

fn fit_image_in_rect(image_size: egui::Vec2, container_size: egui::Vec2) -> egui::Vec2 {
    let scale = (container_size.x / image_size.x).min(container_size.y / image_size.y);
    image_size * scale
}

fn center_rect_in_rect(content_size: egui::Vec2, container: egui::Rect) -> egui::Rect {
    let offset = (container.size() - content_size) * 0.5;
    egui::Rect::from_min_size(container.min + offset, content_size)
}
