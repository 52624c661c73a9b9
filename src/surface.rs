//! Offscreen RGBA drawing surface and PNG export.

use std::io::Cursor;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{imageops, ExtendedColorType, ImageEncoder, RgbaImage};
use thiserror::Error;

use crate::pdf::Viewport;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("Render surface of {width}x{height} exceeds the {max_pixels} pixel limit")]
    TooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },
}

/// A pixel buffer sized to a viewport, used as the render target.
#[derive(Debug, Clone)]
pub struct RenderSurface {
    pixels: RgbaImage,
    image_smoothing: bool,
    max_pixels: u64,
}

impl RenderSurface {
    /// Allocate a transparent surface for `viewport`, refusing anything above
    /// `max_pixels`.
    pub fn allocate(viewport: Viewport, max_pixels: u64) -> Result<Self, SurfaceError> {
        check_size(viewport, max_pixels)?;
        Ok(Self {
            pixels: RgbaImage::new(viewport.width, viewport.height),
            image_smoothing: true,
            max_pixels,
        })
    }

    /// Resize to `viewport`. Like a canvas, resizing clears the contents.
    pub fn resize(&mut self, viewport: Viewport) -> Result<(), SurfaceError> {
        check_size(viewport, self.max_pixels)?;
        self.pixels = RgbaImage::new(viewport.width, viewport.height);
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Whether the library should smooth text, images and paths when drawing.
    pub fn image_smoothing(&self) -> bool {
        self.image_smoothing
    }

    pub fn set_image_smoothing(&mut self, enabled: bool) {
        self.image_smoothing = enabled;
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Copy `image` onto the surface at the origin. Anything outside the
    /// surface is clipped.
    pub fn draw(&mut self, image: &RgbaImage) {
        imageops::replace(&mut self.pixels, image, 0, 0);
    }

    /// Encode the surface as PNG at the best compression level.
    ///
    /// Returns `None` when there is nothing to encode (a zero-area surface) or
    /// the encoder fails.
    pub fn encode_png(&self) -> Option<Vec<u8>> {
        if self.width() == 0 || self.height() == 0 {
            return None;
        }

        let mut png_bytes = Vec::new();
        let encoder = PngEncoder::new_with_quality(
            Cursor::new(&mut png_bytes),
            CompressionType::Best,
            FilterType::Adaptive,
        );
        match encoder.write_image(
            self.pixels.as_raw(),
            self.width(),
            self.height(),
            ExtendedColorType::Rgba8,
        ) {
            Ok(()) => Some(png_bytes),
            Err(e) => {
                tracing::warn!(error = %e, "PNG encoding failed");
                None
            }
        }
    }
}

fn check_size(viewport: Viewport, max_pixels: u64) -> Result<(), SurfaceError> {
    if viewport.pixel_count() > max_pixels {
        return Err(SurfaceError::TooLarge {
            width: viewport.width,
            height: viewport.height,
            max_pixels,
        });
    }
    Ok(())
}
