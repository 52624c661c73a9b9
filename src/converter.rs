//! The PDF to PNG conversion pipeline.
//!
//! Stages run in a fixed order, each under its own deadline:
//! load library → parse document → load page 1 → render (with one
//! reduced-scale fallback) → encode PNG → publish as a named file and object
//! URL. Every failure is turned into a [`ConversionResult::Failed`] value.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::Instrument;

use crate::blob::{output_file_name, BlobStore, ImageFile};
use crate::config::ConverterConfig;
use crate::pdf::{
    LibraryCell, LibraryLoader, PdfError, PdfPageHandle, PdfiumLoader, RenderingLibrary, Viewport,
};
use crate::result::{
    ConversionErrorKind, ConversionFailure, ConversionResult, ConversionStage, ConvertedImage,
};
use crate::surface::RenderSurface;
use crate::timeout::with_timeout;

const LOAD_TIMED_OUT: &str = "PDF library loading timed out";
const PARSE_TIMED_OUT: &str = "PDF document loading timed out";
const PAGE_TIMED_OUT: &str = "PDF page loading timed out";
const RENDER_TIMED_OUT: &str = "PDF rendering timed out";
const FALLBACK_TIMED_OUT: &str = "Fallback rendering timed out";

/// Only the first page is ever rendered.
const FIRST_PAGE: u16 = 1;

enum SourceContent {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

/// The caller's input: a name plus PDF bytes, either in memory or on disk.
pub struct SourceDocument {
    name: String,
    content: SourceContent,
}

impl SourceDocument {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            content: SourceContent::Bytes(bytes),
        }
    }

    /// A file on disk, read when the conversion reaches the parse stage.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        Self {
            name,
            content: SourceContent::Path(path.to_path_buf()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn read(self) -> Result<Vec<u8>, PdfError> {
        match self.content {
            SourceContent::Bytes(bytes) => Ok(bytes),
            SourceContent::Path(path) => Ok(tokio::fs::read(&path).await?),
        }
    }
}

/// Rasterizes the first page of a PDF into a PNG.
pub struct PdfToImageConverter {
    library: LibraryCell,
    blobs: BlobStore,
    config: ConverterConfig,
}

impl PdfToImageConverter {
    /// A converter backed by PDFium.
    pub fn new(config: ConverterConfig) -> Self {
        let loader = PdfiumLoader::new(config.pdfium_library_path.clone());
        Self::with_loader(config, loader)
    }

    pub fn with_loader(config: ConverterConfig, loader: impl LibraryLoader + 'static) -> Self {
        Self {
            library: LibraryCell::new(loader),
            blobs: BlobStore::new(&config.blob_origin),
            config,
        }
    }

    /// Process-wide converter configured from the environment.
    pub fn shared() -> &'static PdfToImageConverter {
        static SHARED: OnceLock<PdfToImageConverter> = OnceLock::new();
        SHARED.get_or_init(|| PdfToImageConverter::new(ConverterConfig::from_env()))
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Registry holding the object URLs of produced images.
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Convert the first page of `source` into a PNG.
    pub async fn convert(&self, source: SourceDocument) -> ConversionResult {
        let span = tracing::info_span!("convert", file = %source.name());
        async move {
            match self.run(source).await {
                Ok(image) => {
                    tracing::info!(
                        output = image.file.name(),
                        width = image.width,
                        height = image.height,
                        scale = image.scale,
                        "PDF converted"
                    );
                    ConversionResult::Converted(image)
                }
                Err(failure) => {
                    tracing::error!(kind = ?failure.kind, stage = ?failure.stage, "{}", failure.message);
                    ConversionResult::Failed(failure)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, source: SourceDocument) -> Result<ConvertedImage, ConversionFailure> {
        let output_name = output_file_name(source.name());

        tracing::debug!(stage = ?ConversionStage::LoadingLibrary, "Entering stage");
        let library = with_timeout(
            self.library.ensure_loaded(),
            self.config.load_timeout(),
            LOAD_TIMED_OUT,
        )
        .await
        .map_err(|e| ConversionFailure::at(ConversionStage::LoadingLibrary, e))?;

        tracing::debug!(stage = ?ConversionStage::ParsingDocument, "Entering stage");
        let document = with_timeout(
            async {
                let bytes = source.read().await?;
                library.get_document(bytes).await
            },
            self.config.parse_timeout(),
            PARSE_TIMED_OUT,
        )
        .await
        .map_err(|e| self.fail(&library, ConversionStage::ParsingDocument, e))?;

        if document.page_count() > 1 {
            tracing::debug!(
                pages = document.page_count(),
                "Only the first page of the document is rendered"
            );
        }

        tracing::debug!(stage = ?ConversionStage::LoadingPage, "Entering stage");
        let page = with_timeout(
            document.get_page(FIRST_PAGE),
            self.config.page_timeout(),
            PAGE_TIMED_OUT,
        )
        .await
        .map_err(|e| self.fail(&library, ConversionStage::LoadingPage, e))?;

        let (surface, viewport) = self.render(&library, page.as_ref()).await?;

        tracing::debug!(stage = ?ConversionStage::Encoding, "Entering stage");
        let png = surface.encode_png().ok_or_else(ConversionFailure::encoding)?;
        drop(surface);

        let file = ImageFile::png(output_name, png);
        let image_url = self.blobs.create_object_url(&file).map_err(|e| {
            ConversionFailure::new(
                ConversionErrorKind::GenericFailure,
                ConversionStage::Publishing,
                format!("Failed to create image URL: {e}"),
            )
        })?;

        Ok(ConvertedImage {
            image_url,
            file,
            width: viewport.width,
            height: viewport.height,
            scale: viewport.scale,
        })
    }

    /// Render at the configured scale, falling back once to half of it.
    ///
    /// PDFium draws on a single worker thread and cannot abandon a render it
    /// has started. When the primary render times out it keeps running, and
    /// the fallback (like any concurrent conversion) queues behind it, so part
    /// of the fallback's deadline may be spent waiting for the abandoned
    /// render to finish.
    async fn render(
        &self,
        library: &Arc<dyn RenderingLibrary>,
        page: &dyn PdfPageHandle,
    ) -> Result<(RenderSurface, Viewport), ConversionFailure> {
        let mut slot = None;

        tracing::debug!(stage = ?ConversionStage::Rendering, "Entering stage");
        let primary = page.viewport(self.config.render_scale);
        let primary_result = self
            .draw_page(page, &mut slot, primary, self.config.render_timeout(), RENDER_TIMED_OUT)
            .await;
        let drawn = match primary_result {
            Ok(()) => primary,
            Err(error) => {
                tracing::warn!(%error, scale = primary.scale, "PDF render failed, retrying at reduced scale");
                self.forget_if_gone(library, &error);

                tracing::debug!(stage = ?ConversionStage::FallbackRendering, "Entering stage");
                let fallback = page.viewport(self.config.fallback_scale());
                self.draw_page(
                    page,
                    &mut slot,
                    fallback,
                    self.config.fallback_timeout(),
                    FALLBACK_TIMED_OUT,
                )
                .await
                .map_err(|e| self.fail(library, ConversionStage::FallbackRendering, e))?;
                fallback
            }
        };

        let surface = slot.ok_or_else(|| {
            ConversionFailure::new(
                ConversionErrorKind::GenericFailure,
                ConversionStage::Rendering,
                "Render surface is unavailable",
            )
        })?;
        Ok((surface, drawn))
    }

    fn fail(
        &self,
        library: &Arc<dyn RenderingLibrary>,
        stage: ConversionStage,
        error: PdfError,
    ) -> ConversionFailure {
        self.forget_if_gone(library, &error);
        ConversionFailure::at(stage, error)
    }

    /// A library whose worker has died stays dead; drop it so the next
    /// conversion loads a fresh one.
    fn forget_if_gone(&self, library: &Arc<dyn RenderingLibrary>, error: &PdfError) {
        if matches!(error, PdfError::WorkerGone) {
            self.library.invalidate(library);
        }
    }

    /// Size the surface in `slot` to `viewport` (allocating it on first use)
    /// and draw the page onto it within `limit`.
    async fn draw_page(
        &self,
        page: &dyn PdfPageHandle,
        slot: &mut Option<RenderSurface>,
        viewport: Viewport,
        limit: Duration,
        timeout_message: &str,
    ) -> Result<(), PdfError> {
        let mut surface = match slot.take() {
            Some(mut existing) => {
                existing.resize(viewport)?;
                existing
            }
            None => RenderSurface::allocate(viewport, self.config.max_surface_pixels)?,
        };
        surface.set_image_smoothing(true);

        let surface = slot.insert(surface);
        with_timeout(page.render(surface, viewport), limit, timeout_message).await
    }
}
