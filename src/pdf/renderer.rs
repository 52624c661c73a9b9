//! Blocking PDFium calls used by the worker thread.
//!
//! Note: pdfium-render's Pdfium struct is not Send+Sync, so everything in this
//! file runs on the worker thread that owns the bindings.

use std::path::Path;

use image::RgbaImage;
use pdfium_render::prelude::*;
use thiserror::Error;

use super::{PageInfo, Viewport};
use crate::surface::SurfaceError;
use crate::timeout::TimeoutError;

/// Errors that can occur during PDF operations.
#[derive(Error, Debug)]
pub enum PdfError {
    #[error("Failed to initialize PDFium: {0}")]
    InitError(String),

    #[error("Failed to load PDF: {0}")]
    LoadError(String),

    #[error("No document loaded")]
    NoDocument,

    #[error("Invalid page number: {0}")]
    InvalidPage(u16),

    #[error("Rendering failed: {0}")]
    RenderError(String),

    #[error(transparent)]
    Surface(#[from] SurfaceError),

    #[error("PDFium worker is no longer running")]
    WorkerGone,

    #[error("Failed to read PDF: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

#[cfg(target_os = "windows")]
const PDFIUM_LIBRARY_NAME: &str = "pdfium.dll";
#[cfg(target_os = "macos")]
const PDFIUM_LIBRARY_NAME: &str = "libpdfium.dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const PDFIUM_LIBRARY_NAME: &str = "libpdfium.so";

/// Bind to the PDFium library and return a usable Pdfium instance.
///
/// An explicitly configured path is tried first, then the usual install
/// locations.
pub(super) fn bind_pdfium(configured: Option<&Path>) -> Result<Pdfium, PdfError> {
    if let Some(path) = configured {
        match Pdfium::bind_to_library(path) {
            Ok(bindings) => {
                tracing::info!(path = %path.display(), "Loaded configured PDFium library");
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = ?e, "Failed to load configured PDFium library");
            }
        }
    }

    // Bundled next to the executable
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let bundled = exe_dir.join(PDFIUM_LIBRARY_NAME);
            if bundled.exists() {
                match Pdfium::bind_to_library(&bundled) {
                    Ok(bindings) => {
                        tracing::info!(path = %bundled.display(), "Loaded bundled PDFium library");
                        return Ok(Pdfium::new(bindings));
                    }
                    Err(e) => {
                        tracing::warn!(path = %bundled.display(), error = ?e, "Failed bundled PDFium library");
                    }
                }
            }
        }
    }

    if let Ok(bindings) = Pdfium::bind_to_system_library() {
        tracing::info!("Loaded system PDFium library");
        return Ok(Pdfium::new(bindings));
    }

    // Common development location
    let dev_path = Path::new("./lib").join(PDFIUM_LIBRARY_NAME);
    if let Ok(bindings) = Pdfium::bind_to_library(&dev_path) {
        tracing::info!("Loaded PDFium library from ./lib");
        return Ok(Pdfium::new(bindings));
    }

    Err(PdfError::InitError(
        "Could not load PDFium library. Set PDFIUM_LIBRARY_PATH or install libpdfium.".to_string(),
    ))
}

fn page_rotation(page: &PdfPage) -> i32 {
    match page.rotation() {
        Ok(PdfPageRenderRotation::None) | Err(_) => 0,
        Ok(PdfPageRenderRotation::Degrees90) => 90,
        Ok(PdfPageRenderRotation::Degrees180) => 180,
        Ok(PdfPageRenderRotation::Degrees270) => 270,
    }
}

/// Number of pages in a parsed document.
pub(super) fn page_count(document: &PdfDocument) -> u32 {
    u32::try_from(document.pages().len()).unwrap_or_default()
}

/// Get page info for page `number` (1-based).
pub(super) fn page_info(document: &PdfDocument, number: u16) -> Result<PageInfo, PdfError> {
    let index = number.checked_sub(1).ok_or(PdfError::InvalidPage(number))?;
    let page = document
        .pages()
        .get(index.into())
        .map_err(|_| PdfError::InvalidPage(number))?;

    Ok(PageInfo {
        number,
        width: page.width().value,
        height: page.height().value,
        rotation: page_rotation(&page),
    })
}

/// Render page `number` (1-based) to an RGBA buffer of the viewport's size.
pub(super) fn render_page(
    document: &PdfDocument,
    number: u16,
    viewport: Viewport,
    smoothing: bool,
) -> Result<RgbaImage, PdfError> {
    let index = number.checked_sub(1).ok_or(PdfError::InvalidPage(number))?;
    let page = document
        .pages()
        .get(index.into())
        .map_err(|_| PdfError::InvalidPage(number))?;

    let config = PdfRenderConfig::new()
        .set_target_width(viewport.width as i32)
        .set_target_height(viewport.height as i32)
        .render_form_data(true)
        .render_annotations(true)
        .set_text_smoothing(smoothing)
        .set_image_smoothing(smoothing)
        .set_path_smoothing(smoothing);

    let bitmap = page
        .render_with_config(&config)
        .map_err(|e| PdfError::RenderError(e.to_string()))?;

    Ok(bitmap.as_image().into_rgba8())
}
