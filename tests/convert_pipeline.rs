//! End-to-end pipeline behaviour against a scripted rendering library.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use pdf_raster::pdf::{
    LibraryLoader, PageInfo, PdfDocumentHandle, PdfError, PdfPageHandle, RenderingLibrary,
    Viewport,
};
use pdf_raster::{
    ConversionErrorKind, ConversionResult, ConversionStage, ConverterConfig, PdfToImageConverter,
    RenderSurface, SourceDocument,
};

#[derive(Clone, Copy, Debug)]
enum Step {
    Succeed,
    Fail,
    Hang,
    /// The library's worker is gone. At parse and page stages only the
    /// first loaded library is affected.
    WorkerDies,
}

async fn hang() {
    std::future::pending::<()>().await;
}

/// What the fake library does at each stage.
struct Script {
    load: Step,
    parse: Step,
    page: Step,
    /// One entry per render attempt; attempts past the end succeed.
    renders: Vec<Step>,
    page_size: (f32, f32),
}

impl Default for Script {
    fn default() -> Self {
        Self {
            load: Step::Succeed,
            parse: Step::Succeed,
            page: Step::Succeed,
            renders: Vec::new(),
            page_size: (10.0, 20.0),
        }
    }
}

#[derive(Default)]
struct Calls {
    loads: AtomicUsize,
    parses: AtomicUsize,
    closed: AtomicUsize,
    render_scales: Mutex<Vec<f32>>,
}

struct FakeLoader {
    script: Arc<Script>,
    calls: Arc<Calls>,
}

#[async_trait]
impl LibraryLoader for FakeLoader {
    async fn load(&self) -> Result<Arc<dyn RenderingLibrary>, PdfError> {
        let attempt = self.calls.loads.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        match self.script.load {
            Step::Hang => hang().await,
            // Only the first load fails, so retries can succeed
            Step::Fail if attempt == 0 => {
                return Err(PdfError::InitError("library not found".into()))
            }
            _ => {}
        }
        Ok(Arc::new(FakeLibrary {
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
            generation: attempt,
        }))
    }
}

struct FakeLibrary {
    script: Arc<Script>,
    calls: Arc<Calls>,
    generation: usize,
}

#[async_trait]
impl RenderingLibrary for FakeLibrary {
    async fn get_document(&self, bytes: Vec<u8>) -> Result<Box<dyn PdfDocumentHandle>, PdfError> {
        self.calls.parses.fetch_add(1, Ordering::SeqCst);
        match self.script.parse {
            Step::Succeed => {}
            Step::Fail => return Err(PdfError::LoadError("not a PDF".into())),
            Step::Hang => hang().await,
            Step::WorkerDies if self.generation == 0 => return Err(PdfError::WorkerGone),
            Step::WorkerDies => {}
        }
        if !bytes.starts_with(b"%PDF") {
            return Err(PdfError::LoadError("missing header".into()));
        }
        Ok(Box::new(FakeDocument {
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
            generation: self.generation,
        }))
    }
}

struct FakeDocument {
    script: Arc<Script>,
    calls: Arc<Calls>,
    generation: usize,
}

impl Drop for FakeDocument {
    fn drop(&mut self) {
        self.calls.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PdfDocumentHandle for FakeDocument {
    fn page_count(&self) -> u32 {
        3
    }

    async fn get_page(&self, number: u16) -> Result<Box<dyn PdfPageHandle>, PdfError> {
        match self.script.page {
            Step::Succeed => {}
            Step::Fail => return Err(PdfError::InvalidPage(number)),
            Step::Hang => hang().await,
            Step::WorkerDies if self.generation == 0 => return Err(PdfError::WorkerGone),
            Step::WorkerDies => {}
        }
        let (width, height) = self.script.page_size;
        Ok(Box::new(FakePage {
            info: PageInfo {
                number,
                width,
                height,
                rotation: 0,
            },
            script: Arc::clone(&self.script),
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct FakePage {
    info: PageInfo,
    script: Arc<Script>,
    calls: Arc<Calls>,
}

#[async_trait]
impl PdfPageHandle for FakePage {
    fn info(&self) -> &PageInfo {
        &self.info
    }

    async fn render(&self, surface: &mut RenderSurface, viewport: Viewport) -> Result<(), PdfError> {
        let attempt = {
            let mut scales = self.calls.render_scales.lock();
            scales.push(viewport.scale);
            scales.len() - 1
        };
        match self.script.renders.get(attempt).copied().unwrap_or(Step::Succeed) {
            Step::Succeed => {}
            Step::Fail => return Err(PdfError::RenderError("canvas exhausted".into())),
            Step::Hang => hang().await,
            Step::WorkerDies => return Err(PdfError::WorkerGone),
        }
        surface.draw(&RgbaImage::from_pixel(
            viewport.width,
            viewport.height,
            Rgba([20, 40, 60, 255]),
        ));
        Ok(())
    }
}

fn converter_with(script: Script, config: ConverterConfig) -> (PdfToImageConverter, Arc<Calls>) {
    let calls = Arc::new(Calls::default());
    let loader = FakeLoader {
        script: Arc::new(script),
        calls: Arc::clone(&calls),
    };
    (PdfToImageConverter::with_loader(config, loader), calls)
}

fn converter(script: Script) -> (PdfToImageConverter, Arc<Calls>) {
    converter_with(script, ConverterConfig::default())
}

fn pdf(name: &str) -> SourceDocument {
    SourceDocument::from_bytes(name, b"%PDF-1.7 fake".to_vec())
}

fn render_scales(calls: &Calls) -> Vec<f32> {
    calls.render_scales.lock().clone()
}

#[tokio::test(start_paused = true)]
async fn converts_first_page_to_png() {
    let (converter, calls) = converter(Script::default());

    let result = converter.convert(pdf("Report.PDF")).await;

    let image = result.image().expect("conversion should succeed");
    assert_eq!(image.file.name(), "Report.png");
    assert_eq!(image.file.mime_type(), "image/png");
    assert_eq!((image.width, image.height, image.scale), (40, 80, 4.0));
    assert_eq!(image.image_url.scheme(), "blob");

    let decoded = image::load_from_memory(image.file.bytes()).unwrap().into_rgba8();
    assert_eq!(decoded.dimensions(), (40, 80));
    assert_eq!(decoded.get_pixel(0, 0), &Rgba([20, 40, 60, 255]));

    let blob = converter.blobs().resolve(&image.image_url).unwrap();
    assert_eq!(&*blob.bytes, image.file.bytes());

    assert_eq!(render_scales(&calls), vec![4.0]);
    assert_eq!(calls.closed.load(Ordering::SeqCst), 1);

    let report = result.into_report();
    assert!(!report.image_url.is_empty());
    assert!(report.file.unwrap().name().ends_with(".png"));
    assert!(report.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn failed_render_falls_back_to_half_scale() {
    let (converter, calls) = converter(Script {
        renders: vec![Step::Fail],
        ..Default::default()
    });

    let result = converter.convert(pdf("scan.pdf")).await;

    let image = result.image().expect("fallback should succeed");
    assert_eq!((image.width, image.height, image.scale), (20, 40, 2.0));
    assert_eq!(render_scales(&calls), vec![4.0, 2.0]);
    assert!(result.into_report().error.is_none());
}

#[tokio::test(start_paused = true)]
async fn render_timeout_falls_back() {
    let (converter, calls) = converter(Script {
        renders: vec![Step::Hang],
        ..Default::default()
    });

    let started = tokio::time::Instant::now();
    let result = converter.convert(pdf("slow.pdf")).await;

    assert!(result.is_success());
    assert_eq!(render_scales(&calls), vec![4.0, 2.0]);
    assert!(started.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn oversized_surface_falls_back() {
    // 40x80 at 4x does not fit, 20x40 at 2x does
    let config = ConverterConfig {
        max_surface_pixels: 1_000,
        ..Default::default()
    };
    let (converter, calls) = converter_with(Script::default(), config);

    let result = converter.convert(pdf("big.pdf")).await;

    let image = result.image().expect("fallback should succeed");
    assert_eq!(image.scale, 2.0);
    assert_eq!(render_scales(&calls), vec![2.0]);
}

#[tokio::test(start_paused = true)]
async fn both_renders_failing_is_reported() {
    let (converter, calls) = converter(Script {
        renders: vec![Step::Fail, Step::Fail],
        ..Default::default()
    });

    let result = converter.convert(pdf("broken.pdf")).await;

    let failure = result.error().cloned().unwrap();
    assert_eq!(failure.kind, ConversionErrorKind::RenderFailure);
    assert_eq!(failure.stage, ConversionStage::FallbackRendering);
    assert!(failure.message.contains("canvas exhausted"));
    assert_eq!(render_scales(&calls), vec![4.0, 2.0]);
    assert!(converter.blobs().is_empty());

    let report = result.into_report();
    assert_eq!(report.image_url, "");
    assert!(report.file.is_none());
    assert!(!report.error.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn both_renders_timing_out_is_reported() {
    let (converter, calls) = converter(Script {
        renders: vec![Step::Hang, Step::Hang],
        ..Default::default()
    });

    let result = converter.convert(pdf("stuck.pdf")).await;

    let failure = result.error().unwrap();
    assert_eq!(failure.kind, ConversionErrorKind::RenderTimeout);
    assert_eq!(failure.message, "Fallback rendering timed out");
    assert_eq!(render_scales(&calls).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn parse_timeout_skips_rendering() {
    let (converter, calls) = converter(Script {
        parse: Step::Hang,
        ..Default::default()
    });

    let started = tokio::time::Instant::now();
    let result = converter.convert(pdf("huge.pdf")).await;

    let failure = result.error().unwrap();
    assert_eq!(failure.kind, ConversionErrorKind::ParseTimeout);
    assert!(failure.message.contains("PDF document loading timed out"));
    assert!(render_scales(&calls).is_empty());
    assert!(started.elapsed() >= Duration::from_millis(15_000));
}

#[tokio::test(start_paused = true)]
async fn malformed_document_is_reported() {
    let (converter, _calls) = converter(Script::default());

    let result = converter
        .convert(SourceDocument::from_bytes("notes.pdf", b"hello".to_vec()))
        .await;

    let failure = result.error().unwrap();
    assert_eq!(failure.kind, ConversionErrorKind::GenericFailure);
    assert_eq!(failure.stage, ConversionStage::ParsingDocument);
    assert!(failure.message.contains("missing header"));
}

#[tokio::test(start_paused = true)]
async fn page_timeout_is_reported() {
    let (converter, calls) = converter(Script {
        page: Step::Hang,
        ..Default::default()
    });

    let result = converter.convert(pdf("doc.pdf")).await;

    let failure = result.error().unwrap();
    assert_eq!(failure.kind, ConversionErrorKind::PageTimeout);
    assert_eq!(failure.message, "PDF page loading timed out");
    assert!(render_scales(&calls).is_empty());
    // The parsed document is released even when a later stage fails
    assert_eq!(calls.closed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_surface_reports_blob_failure() {
    let (converter, _calls) = converter(Script {
        page_size: (0.0, 0.0),
        ..Default::default()
    });

    let result = converter.convert(pdf("empty.pdf")).await;

    assert_eq!(result.error().unwrap().kind, ConversionErrorKind::EncodingFailure);
    let report = serde_json::to_value(result.into_report()).unwrap();
    assert_eq!(
        report,
        serde_json::json!({ "imageUrl": "", "file": null, "error": "Failed to create image blob" })
    );
}

#[tokio::test(start_paused = true)]
async fn load_timeout_is_reported() {
    let (converter, calls) = converter(Script {
        load: Step::Hang,
        ..Default::default()
    });

    let result = converter.convert(pdf("a.pdf")).await;

    let failure = result.error().unwrap();
    assert_eq!(failure.kind, ConversionErrorKind::LoadTimeout);
    assert_eq!(failure.message, "PDF library loading timed out");
    assert_eq!(calls.parses.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_library_load_is_retried() {
    let (converter, calls) = converter(Script {
        load: Step::Fail,
        ..Default::default()
    });

    let first = converter.convert(pdf("a.pdf")).await;
    let failure = first.error().unwrap();
    assert_eq!(failure.stage, ConversionStage::LoadingLibrary);
    assert!(failure.message.starts_with("Failed to load PDF library"));
    assert!(failure.message.contains("library not found"));

    let second = converter.convert(pdf("a.pdf")).await;
    assert!(second.is_success());
    assert_eq!(calls.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn dead_library_is_reloaded_after_parse_failure() {
    let (converter, calls) = converter(Script {
        parse: Step::WorkerDies,
        ..Default::default()
    });

    let first = converter.convert(pdf("a.pdf")).await;
    let failure = first.error().unwrap();
    assert_eq!(failure.stage, ConversionStage::ParsingDocument);
    assert_eq!(
        failure.message,
        "Failed to load PDF document: PDFium worker is no longer running"
    );

    for _ in 0..2 {
        assert!(converter.convert(pdf("a.pdf")).await.is_success());
    }
    assert_eq!(calls.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn dead_library_is_reloaded_after_page_failure() {
    let (converter, calls) = converter(Script {
        page: Step::WorkerDies,
        ..Default::default()
    });

    let first = converter.convert(pdf("a.pdf")).await;
    assert_eq!(first.error().unwrap().stage, ConversionStage::LoadingPage);

    assert!(converter.convert(pdf("a.pdf")).await.is_success());
    assert_eq!(calls.loads.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn dead_library_is_reloaded_after_render_failure() {
    let (converter, calls) = converter(Script {
        renders: vec![Step::WorkerDies, Step::WorkerDies],
        ..Default::default()
    });

    let first = converter.convert(pdf("a.pdf")).await;
    let failure = first.error().unwrap();
    assert_eq!(failure.stage, ConversionStage::FallbackRendering);
    assert_eq!(failure.kind, ConversionErrorKind::RenderFailure);

    assert!(converter.convert(pdf("a.pdf")).await.is_success());
    assert_eq!(calls.loads.load(Ordering::SeqCst), 2);
    assert_eq!(render_scales(&calls), vec![4.0, 2.0, 4.0]);
}

#[tokio::test(start_paused = true)]
async fn ordinary_failures_keep_the_library() {
    let (converter, calls) = converter(Script {
        renders: vec![Step::Fail, Step::Fail],
        ..Default::default()
    });

    assert!(!converter.convert(pdf("a.pdf")).await.is_success());
    assert!(converter.convert(pdf("a.pdf")).await.is_success());
    assert_eq!(calls.loads.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_conversions_load_library_once() {
    let (converter, calls) = converter(Script::default());
    let converter = Arc::new(converter);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..6 {
        let converter = Arc::clone(&converter);
        tasks.spawn(async move { converter.convert(pdf(&format!("doc-{i}.pdf"))).await });
    }

    let mut results: Vec<ConversionResult> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        results.push(joined.unwrap());
    }

    assert!(results.iter().all(ConversionResult::is_success));
    assert_eq!(calls.loads.load(Ordering::SeqCst), 1);
    assert_eq!(converter.blobs().len(), 6);
}

#[tokio::test]
async fn missing_input_file_is_reported() {
    let (converter, _calls) = converter(Script::default());
    let dir = tempfile::tempdir().unwrap();

    let result = converter
        .convert(SourceDocument::from_path(dir.path().join("absent.pdf")))
        .await;

    let failure = result.error().unwrap();
    assert_eq!(failure.stage, ConversionStage::ParsingDocument);
    assert_eq!(failure.kind, ConversionErrorKind::GenericFailure);
    assert!(failure.message.starts_with("Failed to load PDF document: Failed to read PDF"));
}

#[tokio::test]
async fn reads_input_from_disk() {
    let (converter, _calls) = converter(Script::default());
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Invoice.Pdf");
    std::fs::write(&path, b"%PDF-1.4 fake").unwrap();

    let result = converter.convert(SourceDocument::from_path(&path)).await;

    let image = result.image().expect("conversion should succeed");
    assert_eq!(image.file.name(), "Invoice.png");

    let written = image.file.write_to_dir(dir.path()).await.unwrap();
    assert_eq!(written, dir.path().join("Invoice.png"));
    assert!(converter.blobs().revoke_object_url(&image.image_url));
}
