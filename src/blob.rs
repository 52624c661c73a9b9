//! Produced image files and the object-URL registry that hands them out.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine;
use parking_lot::Mutex;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use url::Url;
use uuid::Uuid;

pub const PNG_MIME_TYPE: &str = "image/png";

/// Check if a name looks like a PDF (extension check only).
fn looks_like_pdf(name: &str) -> bool {
    name.len() >= 4 && name.as_bytes()[name.len() - 4..].eq_ignore_ascii_case(b".pdf")
}

/// Name of the PNG produced from `source_name`: a trailing `.pdf` (any case)
/// is replaced with `.png`, anything else just gets `.png` appended.
pub fn output_file_name(source_name: &str) -> String {
    let base = if looks_like_pdf(source_name) {
        // ASCII suffix, so this is a char boundary
        &source_name[..source_name.len() - 4]
    } else {
        source_name
    };
    format!("{base}.png")
}

/// A named in-memory image file.
#[derive(Clone)]
pub struct ImageFile {
    name: String,
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl ImageFile {
    pub fn png(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: PNG_MIME_TYPE.to_string(),
            bytes: bytes.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Inline `data:` URL for the file contents.
    pub fn to_data_url(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.mime_type, encoded)
    }

    /// Write the file into `dir` under its own name.
    pub async fn write_to_dir(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(&self.name);
        tokio::fs::write(&path, &self.bytes).await?;
        Ok(path)
    }
}

impl fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("size", &self.size())
            .finish()
    }
}

impl Serialize for ImageFile {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ImageFile", 3)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("type", &self.mime_type)?;
        state.serialize_field("size", &self.size())?;
        state.end()
    }
}

/// Blob contents behind an object URL.
#[derive(Debug, Clone)]
pub struct Blob {
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

/// Process-local registry of `blob:` URLs.
///
/// URLs stay resolvable until revoked; the owner of a URL is responsible for
/// revoking it.
#[derive(Clone)]
pub struct BlobStore {
    origin: Arc<str>,
    blobs: Arc<Mutex<HashMap<String, Blob>>>,
}

impl BlobStore {
    pub fn new(origin: &str) -> Self {
        Self {
            origin: origin.into(),
            blobs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register `file`'s contents and return a `blob:<origin>/<uuid>` URL.
    pub fn create_object_url(&self, file: &ImageFile) -> Result<Url, url::ParseError> {
        let url = Url::parse(&format!("blob:{}/{}", self.origin, Uuid::new_v4()))?;
        self.blobs.lock().insert(
            url.to_string(),
            Blob {
                mime_type: file.mime_type.clone(),
                bytes: Arc::clone(&file.bytes),
            },
        );
        Ok(url)
    }

    pub fn resolve(&self, url: &Url) -> Option<Blob> {
        self.blobs.lock().get(url.as_str()).cloned()
    }

    /// Release the blob behind `url`. Returns false if it was not registered.
    pub fn revoke_object_url(&self, url: &Url) -> bool {
        self.blobs.lock().remove(url.as_str()).is_some()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl Default for BlobStore {
    fn default() -> Self {
        Self::new("pdf-raster")
    }
}
