//! PDF rendering library interface and its PDFium-backed implementation.
//!
//! The converter only sees the rendering library through three narrow traits:
//! - [`RenderingLibrary::get_document`] parses raw document bytes
//! - [`PdfDocumentHandle::get_page`] loads a page by its 1-based number
//! - [`PdfPageHandle::viewport`] and [`PdfPageHandle::render`] size and draw
//!   the page onto a [`RenderSurface`]

mod loader;
mod renderer;
mod worker;

use async_trait::async_trait;

use crate::surface::RenderSurface;

pub use loader::{LibraryCell, LibraryLoader};
pub use renderer::PdfError;
pub use worker::PdfiumLoader;

/// Page metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    /// Page number (1-based)
    pub number: u16,
    /// Page width in PDF points
    pub width: f32,
    /// Page height in PDF points
    pub height: f32,
    /// Page rotation in degrees (0, 90, 180, 270)
    pub rotation: i32,
}

/// Pixel dimensions of a page drawn at a given zoom scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl Viewport {
    /// Viewport for a page of `width` x `height` points at `scale`.
    ///
    /// Fractional pixels are truncated, the way a canvas truncates the
    /// dimensions it is given.
    pub fn for_page(width: f32, height: f32, scale: f32) -> Self {
        Self {
            width: (width * scale).max(0.0) as u32,
            height: (height * scale).max(0.0) as u32,
            scale,
        }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A loaded rendering library.
#[async_trait]
pub trait RenderingLibrary: Send + Sync {
    /// Whether the library can still serve requests. A dead library is
    /// dropped by [`LibraryCell`] and loaded again on next use.
    fn is_alive(&self) -> bool {
        true
    }

    /// Parse a PDF document from its raw bytes.
    async fn get_document(&self, bytes: Vec<u8>) -> Result<Box<dyn PdfDocumentHandle>, PdfError>;
}

/// A parsed document. Dropping the handle releases it in the library.
#[async_trait]
pub trait PdfDocumentHandle: Send + Sync {
    fn page_count(&self) -> u32;

    /// Load page `number` (1-based).
    async fn get_page(&self, number: u16) -> Result<Box<dyn PdfPageHandle>, PdfError>;
}

/// A page of a parsed document.
#[async_trait]
pub trait PdfPageHandle: Send + Sync {
    fn info(&self) -> &PageInfo;

    fn viewport(&self, scale: f32) -> Viewport {
        let info = self.info();
        Viewport::for_page(info.width, info.height, scale)
    }

    /// Draw the page onto `surface` at `viewport`'s dimensions.
    async fn render(&self, surface: &mut RenderSurface, viewport: Viewport) -> Result<(), PdfError>;
}
