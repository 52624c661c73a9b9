// pdf-raster - single-page PDF to PNG rasterizer
//
// Renders the first page of a PDF through PDFium at high resolution, with a
// deadline on every step and one reduced-scale retry when the render fails.

mod blob;
mod config;
mod converter;
pub mod pdf;
mod result;
mod surface;
mod timeout;

pub use blob::{output_file_name, Blob, BlobStore, ImageFile, PNG_MIME_TYPE};
pub use config::{ConfigError, ConverterConfig};
pub use converter::{PdfToImageConverter, SourceDocument};
pub use result::{
    ConversionErrorKind, ConversionFailure, ConversionReport, ConversionResult, ConversionStage,
    ConvertedImage, ENCODING_FAILED,
};
pub use surface::{RenderSurface, SurfaceError};
pub use timeout::{with_timeout, TimeoutError};
