//! Watermark Processor - Tiled Rotated Text Overlay
//!
//! The overlay is drawn on a transparent canvas the size of the source,
//! rotated in place (no expansion), composited, then flattened to JPEG.

use ab_glyph::{FontVec, PxScale};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops, DynamicImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::rect::Rect;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::WatermarkConfig;

pub const JPEG_QUALITY: u8 = 95;

/// Tried in order after the configured font path.
const PREFERRED_FONTS: [&str; 5] = [
    "msyh.ttc",
    "C:\\Windows\\Fonts\\msyh.ttc",
    "/System/Library/Fonts/PingFang.ttc",
    "/usr/share/fonts/opentype/noto/NotoSansCJK-Regular.ttc",
    "/usr/share/fonts/truetype/wqy/wqy-microhei.ttc",
];

const TRANSPARENT: Rgba<u8> = Rgba([255, 255, 255, 0]);

#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("Image error on {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

enum GlyphSource {
    TrueType(FontVec),
    /// 5x7 bitmap glyphs; characters outside the set draw as boxes.
    Builtin,
}

pub struct WatermarkProcessor {
    config: WatermarkConfig,
    glyphs: GlyphSource,
}

impl WatermarkProcessor {
    pub fn new(config: WatermarkConfig) -> Self {
        let glyphs = load_font(config.font_path.as_deref());
        Self { config, glyphs }
    }

    /// Skip font discovery and draw with the bitmap glyphs.
    pub fn with_builtin_glyphs(config: WatermarkConfig) -> Self {
        Self { config, glyphs: GlyphSource::Builtin }
    }

    pub fn uses_builtin_glyphs(&self) -> bool {
        matches!(self.glyphs, GlyphSource::Builtin)
    }

    pub fn apply_to(&self, input: &Path, output: &Path) -> Result<(), WatermarkError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| WatermarkError::Io { path, source }
        };

        let mut base = image::open(input)
            .map_err(|source| WatermarkError::Image { path: input.to_path_buf(), source })?
            .to_rgba8();
        let overlay = self.build_overlay(base.width(), base.height());
        imageops::overlay(&mut base, &overlay, 0, 0);
        let flattened = DynamicImage::ImageRgba8(base).to_rgb8();

        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut writer = BufWriter::new(File::create(output).map_err(io_err(output))?);
        let encoder = JpegEncoder::new_with_quality(&mut writer, JPEG_QUALITY);
        flattened
            .write_with_encoder(encoder)
            .map_err(|source| WatermarkError::Image { path: output.to_path_buf(), source })?;
        writer.flush().map_err(io_err(output))?;

        debug!(input = %input.display(), output = %output.display(), "Watermarked image");
        Ok(())
    }

    /// Transparent canvas with the text tiled every `spacing` pixels,
    /// starting one step before each edge, then rotated.
    pub fn build_overlay(&self, width: u32, height: u32) -> RgbaImage {
        let mut canvas = RgbaImage::from_pixel(width, height, TRANSPARENT);
        let color = self.fill_color();
        let step = self.config.spacing.max(1) as i64;
        let (w, h) = (i64::from(width), i64::from(height));

        let mut x = -step;
        while x < w + step {
            let mut y = -step;
            while y < h + step {
                self.draw_label(&mut canvas, color, x as i32, y as i32);
                y += step;
            }
            x += step;
        }

        rotate_about_center(
            &canvas,
            -self.config.angle.to_radians(),
            Interpolation::Bilinear,
            TRANSPARENT,
        )
    }

    fn draw_label(&self, canvas: &mut RgbaImage, color: Rgba<u8>, x: i32, y: i32) {
        match &self.glyphs {
            GlyphSource::TrueType(font) => {
                let scale = PxScale::from(self.config.font_size as f32);
                draw_text_mut(canvas, color, x, y, scale, font, &self.config.text);
            }
            GlyphSource::Builtin => {
                let cell = (self.config.font_size / 7).max(1);
                let mut pen_x = x;
                for c in self.config.text.chars() {
                    for (row, bits) in builtin_glyph(c).iter().enumerate() {
                        for col in 0..5 {
                            if (*bits >> (4 - col)) & 1 == 0 {
                                continue;
                            }
                            let px = pen_x + (col * cell) as i32;
                            let py = y + (row as u32 * cell) as i32;
                            draw_filled_rect_mut(canvas, Rect::at(px, py).of_size(cell, cell), color);
                        }
                    }
                    pen_x += (6 * cell) as i32;
                }
            }
        }
    }

    fn fill_color(&self) -> Rgba<u8> {
        let [r, g, b] = self.config.color;
        let alpha = (255.0 * self.config.opacity.clamp(0.0, 1.0)) as u8;
        Rgba([r, g, b, alpha])
    }
}

fn load_font(configured: Option<&Path>) -> GlyphSource {
    let candidates = configured
        .into_iter()
        .map(Path::to_path_buf)
        .chain(PREFERRED_FONTS.iter().map(PathBuf::from));

    for path in candidates {
        let Ok(data) = fs::read(&path) else { continue };
        if let Ok(font) = FontVec::try_from_vec_and_index(data, 0) {
            info!(font = %path.display(), "Watermark font loaded");
            return GlyphSource::TrueType(font);
        }
    }
    debug!("No watermark font found, using built-in glyphs");
    GlyphSource::Builtin
}

fn builtin_glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        ' ' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn config(opacity: f32, angle: f32) -> WatermarkConfig {
        WatermarkConfig {
            text: "CK 01".to_string(),
            opacity,
            angle,
            spacing: 80,
            font_size: 35,
            ..WatermarkConfig::default()
        }
    }

    fn sample(dir: &Path) -> PathBuf {
        let path = dir.join("main_1.jpg");
        RgbImage::from_pixel(200, 120, Rgb([40, 40, 40])).save(&path).unwrap();
        path
    }

    #[test]
    fn test_overlay_alpha_bounded_by_opacity() {
        let processor = WatermarkProcessor::with_builtin_glyphs(config(0.5, 0.0));
        let overlay = processor.build_overlay(160, 160);
        assert_eq!(overlay.dimensions(), (160, 160));
        assert!(overlay.pixels().any(|p| p[3] > 0));
        assert!(overlay.pixels().all(|p| p[3] <= 127));
    }

    #[test]
    fn test_rotation_keeps_canvas_size() {
        let processor = WatermarkProcessor::with_builtin_glyphs(config(0.5, 30.0));
        assert_eq!(processor.build_overlay(123, 77).dimensions(), (123, 77));
    }

    #[test]
    fn test_apply_writes_same_size_jpeg() {
        let tmp = TempDir::new().unwrap();
        let input = sample(tmp.path());
        let output = tmp.path().join("out").join("main_1.jpg");
        let processor = WatermarkProcessor::with_builtin_glyphs(config(1.0, 30.0));

        processor.apply_to(&input, &output).unwrap();
        let written = image::open(&output).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (200, 120));
        assert!(written.pixels().any(|p| p[0] > 150));
    }

    #[test]
    fn test_rerun_overwrites_identically() {
        let tmp = TempDir::new().unwrap();
        let input = sample(tmp.path());
        let first = tmp.path().join("a.jpg");
        let second = tmp.path().join("b.jpg");
        let processor = WatermarkProcessor::with_builtin_glyphs(config(0.3, 30.0));

        processor.apply_to(&input, &first).unwrap();
        processor.apply_to(&input, &second).unwrap();
        processor.apply_to(&input, &first).unwrap();
        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
    }

    #[test]
    fn test_missing_font_never_fails() {
        let cfg = WatermarkConfig {
            font_path: Some(PathBuf::from("/definitely/not/a/font.ttf")),
            ..WatermarkConfig::default()
        };
        let processor = WatermarkProcessor::new(cfg);
        assert_eq!(processor.build_overlay(50, 50).dimensions(), (50, 50));
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let processor = WatermarkProcessor::with_builtin_glyphs(config(0.3, 0.0));
        let err = processor
            .apply_to(&tmp.path().join("nope.jpg"), &tmp.path().join("out.jpg"))
            .unwrap_err();
        assert!(matches!(err, WatermarkError::Image { .. }));
    }
}
