use anyhow::{bail, Context, Result};
use minifb::{Key, ScaleMode, Window, WindowOptions};
use palette::{rgb::channels::Argb, Srgb};

use crate::{
    common::{Frame, PixelOrder, BYTES_PER_PIXEL},
    user_config::DisplayConfig,
};

/**
 * A surface frames can be shown on.
 */
pub(crate) trait FrameSink {
    fn present(&mut self, frame: &Frame) -> Result<()>;

    /**
     * False once the user has asked to quit.
     */
    fn is_open(&self) -> bool {
        true
    }

    /**
     * Called instead of `present` when there is no frame to show, so the
     * surface keeps handling close and resize requests.
     */
    fn idle(&mut self) -> Result<()> {
        Ok(())
    }
}

/**
 * Resizable window that stretches the feed while keeping its aspect ratio.
 */
pub(crate) struct WindowDisplay {
    window: Window,
    buffer: Vec<u32>,
}

impl WindowDisplay {
    pub(crate) fn new(config: &DisplayConfig) -> Result<Self> {
        let window = Window::new(
            &config.title,
            config.width,
            config.height,
            WindowOptions {
                resize: true,
                scale_mode: ScaleMode::AspectRatioStretch,
                ..WindowOptions::default()
            },
        )
        .with_context(|| format!("Could not open {}x{} window", config.width, config.height))?;

        log::info!(
            "Opened window '{}' at {}x{}",
            config.title,
            config.width,
            config.height
        );
        Ok(Self {
            window,
            buffer: Vec::new(),
        })
    }
}

impl FrameSink for WindowDisplay {
    fn present(&mut self, frame: &Frame) -> Result<()> {
        if frame.order != PixelOrder::Rgb {
            bail!("Display expects rgb frames, got {}", frame.order.as_str());
        }
        pack_rgb(&frame.pixels, &mut self.buffer);
        self.window
            .update_with_buffer(&self.buffer, frame.geometry.width, frame.geometry.height)
            .context("Could not update window")
    }

    fn is_open(&self) -> bool {
        self.window.is_open() && !self.window.is_key_down(Key::Escape)
    }

    fn idle(&mut self) -> Result<()> {
        self.window.update();
        Ok(())
    }
}

/**
 * Packs RGB triplets into the 0RGB words the window takes. `out` is reused
 * between frames.
 */
pub(crate) fn pack_rgb(pixels: &[u8], out: &mut Vec<u32>) {
    out.clear();
    out.extend(
        pixels
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|px| Srgb::new(px[0], px[1], px[2]).into_u32::<Argb>()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_into_0rgb_words() {
        let mut out = Vec::new();
        pack_rgb(&[0x60, 0x7F, 0x00, 0x01, 0x02, 0x03], &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0] & 0x00FF_FFFF, 0x0060_7F00);
        assert_eq!(out[1] & 0x00FF_FFFF, 0x0001_0203);
    }

    #[test]
    fn pack_reuses_buffer() {
        let mut out = vec![7; 10];
        pack_rgb(&[1, 2, 3], &mut out);
        assert_eq!(out.len(), 1);
    }
}
