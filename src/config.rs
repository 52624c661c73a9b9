//! Configuration for the converter.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Stage deadlines, render scale and resource limits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub load_timeout_ms: u64,
    pub parse_timeout_ms: u64,
    pub page_timeout_ms: u64,
    pub render_timeout_ms: u64,
    pub fallback_timeout_ms: u64,
    /// Primary render scale. The fallback renders at half of it.
    pub render_scale: f32,
    /// Largest surface (width x height) that will be allocated.
    pub max_surface_pixels: u64,
    /// Origin used in `blob:` URLs.
    pub blob_origin: String,
    /// Explicit PDFium shared library to bind, if any.
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            load_timeout_ms: 10_000,
            parse_timeout_ms: 15_000,
            page_timeout_ms: 5_000,
            render_timeout_ms: 20_000,
            fallback_timeout_ms: 15_000,
            render_scale: 4.0,
            // 16384 x 16384, the usual browser canvas area limit
            max_surface_pixels: 268_435_456,
            blob_origin: "pdf-raster".to_string(),
            pdfium_library_path: None,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring invalid config value");
            default
        }),
        Err(_) => default,
    }
}

impl ConverterConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            load_timeout_ms: env_or("PDF_RASTER_LOAD_TIMEOUT_MS", defaults.load_timeout_ms),
            parse_timeout_ms: env_or("PDF_RASTER_PARSE_TIMEOUT_MS", defaults.parse_timeout_ms),
            page_timeout_ms: env_or("PDF_RASTER_PAGE_TIMEOUT_MS", defaults.page_timeout_ms),
            render_timeout_ms: env_or("PDF_RASTER_RENDER_TIMEOUT_MS", defaults.render_timeout_ms),
            fallback_timeout_ms: env_or(
                "PDF_RASTER_FALLBACK_TIMEOUT_MS",
                defaults.fallback_timeout_ms,
            ),
            render_scale: env_or("PDF_RASTER_RENDER_SCALE", defaults.render_scale),
            max_surface_pixels: env_or(
                "PDF_RASTER_MAX_SURFACE_PIXELS",
                defaults.max_surface_pixels,
            ),
            blob_origin: env::var("PDF_RASTER_BLOB_ORIGIN").unwrap_or(defaults.blob_origin),
            pdfium_library_path: env::var_os("PDFIUM_LIBRARY_PATH").map(PathBuf::from),
        }
        .validated()
    }

    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        Ok(config.validated())
    }

    /// Replace values the pipeline cannot work with by their defaults.
    pub fn validated(mut self) -> Self {
        if !(self.render_scale.is_finite() && self.render_scale > 0.0) {
            tracing::warn!(render_scale = self.render_scale, "Invalid render scale, using default");
            self.render_scale = Self::default().render_scale;
        }
        self
    }

    pub fn fallback_scale(&self) -> f32 {
        self.render_scale / 2.0
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn parse_timeout(&self) -> Duration {
        Duration::from_millis(self.parse_timeout_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout_ms)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }

    pub fn fallback_timeout(&self) -> Duration {
        Duration::from_millis(self.fallback_timeout_ms)
    }
}
