use egui::{Context, TextureHandle, TextureOptions};
use image::RgbaImage;
use selfie_verify::FrameId;

/// GPU copy of the frame under review, uploaded once per frame.
#[derive(Default)]
pub struct PreviewTexture {
    frame_id: Option<FrameId>,
    handle: Option<TextureHandle>,
}

impl PreviewTexture {
    pub fn update(&mut self, ctx: &Context, frame_id: FrameId, image: &RgbaImage) -> Option<&TextureHandle> {
        // Skip empty buffers to avoid a white flash
        if image.width() == 0 || image.height() == 0 {
            return None;
        }

        if self.frame_id != Some(frame_id) {
            let size = [image.width() as usize, image.height() as usize];
            let color_image = egui::ColorImage::from_rgba_unmultiplied(size, image.as_raw());

            let reuse = self.handle.as_ref().is_some_and(|t| t.size() == size);
            if reuse {
                if let Some(texture) = self.handle.as_mut() {
                    texture.set(color_image, TextureOptions::LINEAR);
                }
            } else {
                self.handle = Some(ctx.load_texture("selfie_preview", color_image, TextureOptions::LINEAR));
            }
            self.frame_id = Some(frame_id);
        }

        self.handle.as_ref()
    }

    /// Drops the texture so a rejected or retaken frame is not kept on the GPU.
    pub fn clear(&mut self) {
        self.frame_id = None;
        self.handle = None;
    }
}
