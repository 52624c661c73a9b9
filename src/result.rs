//! Conversion outcomes.
//!
//! A conversion always produces a [`ConversionResult`] value, never an error.
//! [`ConversionReport`] is the flat `{ imageUrl, file, error }` shape for JSON
//! consumers.

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::blob::ImageFile;
use crate::pdf::PdfError;

/// Message reported when the surface yields no PNG data.
pub const ENCODING_FAILED: &str = "Failed to create image blob";

/// Pipeline stage a conversion was in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStage {
    LoadingLibrary,
    ParsingDocument,
    LoadingPage,
    Rendering,
    FallbackRendering,
    Encoding,
    Publishing,
}

impl ConversionStage {
    fn failure_message(self) -> &'static str {
        match self {
            ConversionStage::LoadingLibrary => "Failed to load PDF library",
            ConversionStage::ParsingDocument => "Failed to load PDF document",
            ConversionStage::LoadingPage => "Failed to load PDF page",
            ConversionStage::Rendering => "Failed to render PDF page",
            ConversionStage::FallbackRendering => "Fallback rendering failed",
            ConversionStage::Encoding => ENCODING_FAILED,
            ConversionStage::Publishing => "Failed to create image URL",
        }
    }

    fn timeout_kind(self) -> ConversionErrorKind {
        match self {
            ConversionStage::LoadingLibrary => ConversionErrorKind::LoadTimeout,
            ConversionStage::ParsingDocument => ConversionErrorKind::ParseTimeout,
            ConversionStage::LoadingPage => ConversionErrorKind::PageTimeout,
            ConversionStage::Rendering | ConversionStage::FallbackRendering => {
                ConversionErrorKind::RenderTimeout
            }
            ConversionStage::Encoding | ConversionStage::Publishing => {
                ConversionErrorKind::GenericFailure
            }
        }
    }
}

/// What went wrong, for callers that handle failures programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionErrorKind {
    LoadTimeout,
    ParseTimeout,
    PageTimeout,
    RenderTimeout,
    RenderFailure,
    EncodingFailure,
    GenericFailure,
}

/// A failed conversion.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{message}")]
pub struct ConversionFailure {
    pub kind: ConversionErrorKind,
    pub stage: ConversionStage,
    pub message: String,
}

impl ConversionFailure {
    pub fn new(kind: ConversionErrorKind, stage: ConversionStage, message: impl Into<String>) -> Self {
        Self {
            kind,
            stage,
            message: message.into(),
        }
    }

    /// Classify a library error raised while in `stage`.
    pub fn at(stage: ConversionStage, error: PdfError) -> Self {
        match error {
            PdfError::Timeout(timeout) => Self::new(stage.timeout_kind(), stage, timeout.message()),
            other => {
                let kind = match stage {
                    ConversionStage::Rendering | ConversionStage::FallbackRendering => {
                        ConversionErrorKind::RenderFailure
                    }
                    ConversionStage::Encoding => ConversionErrorKind::EncodingFailure,
                    _ => ConversionErrorKind::GenericFailure,
                };
                Self::new(kind, stage, format!("{}: {}", stage.failure_message(), other))
            }
        }
    }

    pub fn encoding() -> Self {
        Self::new(
            ConversionErrorKind::EncodingFailure,
            ConversionStage::Encoding,
            ENCODING_FAILED,
        )
    }
}

/// A successfully rasterized page.
#[derive(Debug, Clone)]
pub struct ConvertedImage {
    pub image_url: Url,
    pub file: ImageFile,
    pub width: u32,
    pub height: u32,
    /// Scale the page was rendered at; lower than requested after a fallback.
    pub scale: f32,
}

#[derive(Debug, Clone)]
pub enum ConversionResult {
    Converted(ConvertedImage),
    Failed(ConversionFailure),
}

impl ConversionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionResult::Converted(_))
    }

    pub fn image(&self) -> Option<&ConvertedImage> {
        match self {
            ConversionResult::Converted(image) => Some(image),
            ConversionResult::Failed(_) => None,
        }
    }

    pub fn file(&self) -> Option<&ImageFile> {
        self.image().map(|image| &image.file)
    }

    pub fn error(&self) -> Option<&ConversionFailure> {
        match self {
            ConversionResult::Converted(_) => None,
            ConversionResult::Failed(failure) => Some(failure),
        }
    }

    pub fn into_report(self) -> ConversionReport {
        match self {
            ConversionResult::Converted(image) => ConversionReport {
                image_url: image.image_url.to_string(),
                file: Some(image.file),
                error: None,
            },
            ConversionResult::Failed(failure) => ConversionReport {
                image_url: String::new(),
                file: None,
                error: Some(failure.message),
            },
        }
    }
}

impl From<ConversionResult> for ConversionReport {
    fn from(result: ConversionResult) -> Self {
        result.into_report()
    }
}

/// Flat view of a [`ConversionResult`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionReport {
    /// Empty on failure.
    pub image_url: String,
    pub file: Option<ImageFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
