//! Lazy, load-once access to the rendering library.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::OnceCell;

use super::{PdfError, RenderingLibrary};

/// Produces a ready-to-use rendering library.
#[async_trait]
pub trait LibraryLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn RenderingLibrary>, PdfError>;
}

/// Holds the loaded rendering library once the first load succeeds.
///
/// Concurrent callers wait on the load already in flight instead of starting
/// their own. A failed (or abandoned) load leaves the cell empty, so the next
/// caller tries again. A library that has died is dropped by
/// [`LibraryCell::invalidate`], or on the next [`LibraryCell::ensure_loaded`]
/// once it stops reporting itself alive, and the following call loads a new
/// one.
pub struct LibraryCell {
    loader: Arc<dyn LibraryLoader>,
    library: RwLock<Arc<OnceCell<Arc<dyn RenderingLibrary>>>>,
}

impl LibraryCell {
    pub fn new(loader: impl LibraryLoader + 'static) -> Self {
        Self {
            loader: Arc::new(loader),
            library: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.library.read().initialized()
    }

    pub async fn ensure_loaded(&self) -> Result<Arc<dyn RenderingLibrary>, PdfError> {
        loop {
            let cell = Arc::clone(&self.library.read());
            match cell.get() {
                Some(library) if library.is_alive() => return Ok(Arc::clone(library)),
                Some(dead) => {
                    self.invalidate(dead);
                }
                None => {
                    let library = cell
                        .get_or_try_init(|| async {
                            tracing::debug!("Loading rendering library");
                            let loaded = self.loader.load().await;
                            if let Err(e) = &loaded {
                                tracing::warn!(error = %e, "Rendering library failed to load");
                            }
                            loaded
                        })
                        .await?;
                    return Ok(Arc::clone(library));
                }
            }
        }
    }

    /// Forget `library` if it is the one currently held, so the next
    /// [`ensure_loaded`](Self::ensure_loaded) loads a fresh one.
    ///
    /// Returns `false` when the cell already moved on to another library.
    pub fn invalidate(&self, library: &Arc<dyn RenderingLibrary>) -> bool {
        let mut current = self.library.write();
        let held = current
            .get()
            .is_some_and(|loaded| same_library(loaded, library));
        if held {
            tracing::warn!("Rendering library is no longer usable, it will be loaded again");
            *current = Arc::new(OnceCell::new());
        }
        held
    }
}

fn same_library(a: &Arc<dyn RenderingLibrary>, b: &Arc<dyn RenderingLibrary>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
