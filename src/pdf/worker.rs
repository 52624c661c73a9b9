//! PDFium worker thread and the handles that talk to it.
//!
//! Pdfium is not Send+Sync, so a single dedicated thread owns the bindings and
//! every parsed document. Async callers send requests over a channel and await
//! a oneshot reply. A caller that stops waiting (for example after a timeout)
//! drops its reply receiver; the worker skips any request whose receiver is
//! already gone, but cannot interrupt one that PDFium is already running.
//!
//! If the thread dies (a panic inside PDFium ends it), every later request
//! fails with [`PdfError::WorkerGone`] and the library reports itself dead.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use image::RgbaImage;
use pdfium_render::prelude::*;
use tokio::sync::{mpsc, oneshot};

use super::renderer::{self, PdfError};
use super::{LibraryLoader, PageInfo, PdfDocumentHandle, PdfPageHandle, RenderingLibrary, Viewport};
use crate::surface::RenderSurface;

type DocumentId = u64;
type Reply<T> = oneshot::Sender<Result<T, PdfError>>;

struct OpenedDocument {
    id: DocumentId,
    page_count: u32,
}

enum WorkerRequest {
    Open {
        bytes: Vec<u8>,
        reply: Reply<OpenedDocument>,
    },
    Page {
        document: DocumentId,
        number: u16,
        reply: Reply<PageInfo>,
    },
    Render {
        document: DocumentId,
        number: u16,
        viewport: Viewport,
        smoothing: bool,
        reply: Reply<RgbaImage>,
    },
    Close {
        document: DocumentId,
    },
}

#[derive(Clone)]
struct WorkerClient {
    requests: mpsc::UnboundedSender<WorkerRequest>,
}

impl WorkerClient {
    /// Start the worker thread and wait until PDFium is bound.
    async fn start(library_path: Option<PathBuf>) -> Result<Self, PdfError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (requests, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("pdfium-worker".to_string())
            .spawn(move || {
                let pdfium = match renderer::bind_pdfium(library_path.as_deref()) {
                    Ok(pdfium) => pdfium,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    tracing::debug!("PDFium loader went away before the worker was ready");
                    return;
                }
                serve(&PdfiumBackend { pdfium: &pdfium }, rx);
            })
            .map_err(|e| PdfError::InitError(e.to_string()))?;

        ready_rx.await.map_err(|_| PdfError::WorkerGone)??;
        Ok(Self { requests })
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(Reply<T>) -> WorkerRequest,
    ) -> Result<T, PdfError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(request(reply))
            .map_err(|_| PdfError::WorkerGone)?;
        response.await.map_err(|_| PdfError::WorkerGone)?
    }

    fn close(&self, document: DocumentId) {
        // The worker may already be gone at shutdown; nothing left to release then.
        let _ = self.requests.send(WorkerRequest::Close { document });
    }
}

/// The document operations the worker runs on behalf of its callers.
trait DocumentBackend {
    type Document;

    fn open(&self, bytes: Vec<u8>) -> Result<Self::Document, PdfError>;

    fn page_count(&self, document: &Self::Document) -> u32;

    fn page_info(&self, document: &Self::Document, number: u16) -> Result<PageInfo, PdfError>;

    fn render(
        &self,
        document: &Self::Document,
        number: u16,
        viewport: Viewport,
        smoothing: bool,
    ) -> Result<RgbaImage, PdfError>;
}

struct PdfiumBackend<'a> {
    pdfium: &'a Pdfium,
}

impl<'a> DocumentBackend for PdfiumBackend<'a> {
    type Document = PdfDocument<'a>;

    fn open(&self, bytes: Vec<u8>) -> Result<PdfDocument<'a>, PdfError> {
        self.pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .map_err(|e| PdfError::LoadError(e.to_string()))
    }

    fn page_count(&self, document: &PdfDocument<'a>) -> u32 {
        renderer::page_count(document)
    }

    fn page_info(&self, document: &PdfDocument<'a>, number: u16) -> Result<PageInfo, PdfError> {
        renderer::page_info(document, number)
    }

    fn render(
        &self,
        document: &PdfDocument<'a>,
        number: u16,
        viewport: Viewport,
        smoothing: bool,
    ) -> Result<RgbaImage, PdfError> {
        renderer::render_page(document, number, viewport, smoothing)
    }
}

fn serve<B: DocumentBackend>(backend: &B, mut requests: mpsc::UnboundedReceiver<WorkerRequest>) {
    let mut documents: HashMap<DocumentId, B::Document> = HashMap::new();
    let mut next_id: DocumentId = 0;

    while let Some(request) = requests.blocking_recv() {
        match request {
            WorkerRequest::Open { bytes, reply } => {
                if reply.is_closed() {
                    tracing::debug!("Skipping document parse, caller went away");
                    continue;
                }
                match backend.open(bytes) {
                    Ok(document) => {
                        next_id += 1;
                        let id = next_id;
                        let page_count = backend.page_count(&document);
                        documents.insert(id, document);
                        if reply.send(Ok(OpenedDocument { id, page_count })).is_err() {
                            tracing::debug!(document = id, "Caller went away, closing document");
                            documents.remove(&id);
                        }
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            WorkerRequest::Page {
                document,
                number,
                reply,
            } => {
                if reply.is_closed() {
                    continue;
                }
                let info = documents
                    .get(&document)
                    .ok_or(PdfError::NoDocument)
                    .and_then(|doc| backend.page_info(doc, number));
                let _ = reply.send(info);
            }
            WorkerRequest::Render {
                document,
                number,
                viewport,
                smoothing,
                reply,
            } => {
                if reply.is_closed() {
                    tracing::debug!(document, "Skipping render, caller went away");
                    continue;
                }
                let pixels = documents
                    .get(&document)
                    .ok_or(PdfError::NoDocument)
                    .and_then(|doc| backend.render(doc, number, viewport, smoothing));
                let _ = reply.send(pixels);
            }
            WorkerRequest::Close { document } => {
                documents.remove(&document);
            }
        }
    }

    tracing::debug!("PDFium worker shutting down");
}

/// Loads PDFium onto a dedicated worker thread.
#[derive(Debug, Clone, Default)]
pub struct PdfiumLoader {
    library_path: Option<PathBuf>,
}

impl PdfiumLoader {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }
}

#[async_trait]
impl LibraryLoader for PdfiumLoader {
    async fn load(&self) -> Result<Arc<dyn RenderingLibrary>, PdfError> {
        let client = WorkerClient::start(self.library_path.clone()).await?;
        Ok(Arc::new(PdfiumLibrary { client }))
    }
}

struct PdfiumLibrary {
    client: WorkerClient,
}

#[async_trait]
impl RenderingLibrary for PdfiumLibrary {
    fn is_alive(&self) -> bool {
        !self.client.requests.is_closed()
    }

    async fn get_document(&self, bytes: Vec<u8>) -> Result<Box<dyn PdfDocumentHandle>, PdfError> {
        let opened = self
            .client
            .call(|reply| WorkerRequest::Open { bytes, reply })
            .await?;

        Ok(Box::new(PdfiumDocument {
            client: self.client.clone(),
            id: opened.id,
            page_count: opened.page_count,
        }))
    }
}

struct PdfiumDocument {
    client: WorkerClient,
    id: DocumentId,
    page_count: u32,
}

impl Drop for PdfiumDocument {
    fn drop(&mut self) {
        self.client.close(self.id);
    }
}

#[async_trait]
impl PdfDocumentHandle for PdfiumDocument {
    fn page_count(&self) -> u32 {
        self.page_count
    }

    async fn get_page(&self, number: u16) -> Result<Box<dyn PdfPageHandle>, PdfError> {
        let document = self.id;
        let info = self
            .client
            .call(|reply| WorkerRequest::Page {
                document,
                number,
                reply,
            })
            .await?;

        Ok(Box::new(PdfiumPage {
            client: self.client.clone(),
            document,
            info,
        }))
    }
}

struct PdfiumPage {
    client: WorkerClient,
    document: DocumentId,
    info: PageInfo,
}

#[async_trait]
impl PdfPageHandle for PdfiumPage {
    fn info(&self) -> &PageInfo {
        &self.info
    }

    async fn render(&self, surface: &mut RenderSurface, viewport: Viewport) -> Result<(), PdfError> {
        let smoothing = surface.image_smoothing();
        let pixels = self
            .client
            .call(|reply| WorkerRequest::Render {
                document: self.document,
                number: self.info.number,
                viewport,
                smoothing,
                reply,
            })
            .await?;

        surface.draw(&pixels);
        Ok(())
    }
}
