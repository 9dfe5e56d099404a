//! Rasterize-rebuild strategy
//!
//! Opens the encrypted PDF with a password-aware renderer, draws every page
//! to a bitmap and builds a brand new, unencrypted PDF with one full-page
//! image per page. No subprocess and no filesystem access.
//!
//! The result is visually equivalent page for page, but text is no longer
//! selectable.

mod assemble;
#[cfg(feature = "pdfium")]
pub mod pdfium;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

pub use assemble::PdfAssembler;
#[cfg(feature = "pdfium")]
pub use pdfium::PdfiumBackend;

use crate::error::UnlockError;
use crate::input::{Limits, UnlockInput};
use crate::progress::{CancelFlag, Progress};
use crate::{StrategyKind, UnlockResult, Unlocker};

/// Render scale relative to 72 dpi page units. 2.0 trades file size for
/// legibility; it has no effect on correctness.
pub const DEFAULT_RENDER_SCALE: f32 = 2.0;

const DECODED_PERCENT: u8 = 30;
const RENDERED_PERCENT: u8 = 80;
const FINALIZING_PERCENT: u8 = 90;

/// Failure reported by a [`RasterBackend`].
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Password rejected")]
    PasswordRejected,

    #[error("Renderer unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Failed(String),
}

impl From<BackendError> for UnlockError {
    /// Structured password failures map directly. Backends that only give us
    /// a message are classified by looking for "password" in it.
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::PasswordRejected => UnlockError::WrongPassword,
            BackendError::Failed(msg) if msg.to_lowercase().contains("password") => {
                UnlockError::WrongPassword
            }
            BackendError::Failed(msg) => UnlockError::Render(msg),
            BackendError::Unavailable(msg) => UnlockError::Render(msg),
        }
    }
}

/// One decoded page as packed 8-bit RGB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRaster {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl PageRaster {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::Failed(format!(
                "Empty page raster ({}x{})",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(BackendError::Failed(format!(
                "Raster buffer has {} bytes, expected {} for {}x{} RGB",
                pixels.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

/// A renderer able to open password-protected PDFs.
pub trait RasterBackend: Send + Sync + 'static {
    /// Open `document`, authenticating with `password`.
    fn open<'a>(
        &'a self,
        document: &'a [u8],
        password: &'a str,
    ) -> Result<Box<dyn RasterDocument + 'a>, BackendError>;
}

/// An opened document. Owned by a single unlock call.
pub trait RasterDocument {
    fn page_count(&self) -> usize;

    /// Render the page at zero-based `index`, `scale` pixels per page unit.
    fn render_page(&self, index: usize, scale: f32) -> Result<PageRaster, BackendError>;
}

#[derive(Debug, Clone)]
pub struct RasterConfig {
    pub scale: f32,
    pub limits: Limits,
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_RENDER_SCALE,
            limits: Limits::default(),
        }
    }
}

/// Unlocks PDFs by rendering every page and rebuilding the document.
pub struct RasterizeRebuildUnlocker<B> {
    backend: Arc<B>,
    config: RasterConfig,
}

impl<B: RasterBackend> RasterizeRebuildUnlocker<B> {
    pub fn new(backend: B, config: RasterConfig) -> Self {
        Self {
            backend: Arc::new(backend),
            config,
        }
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    /// Synchronous unlock; [`Unlocker::unlock`] runs this on the blocking pool.
    pub fn unlock_blocking(
        &self,
        input: &UnlockInput,
        progress: &mut Progress,
        cancel: &CancelFlag,
    ) -> Result<UnlockResult, UnlockError> {
        rebuild(self.backend.as_ref(), &self.config, input, progress, cancel)
    }
}

#[async_trait]
impl<B: RasterBackend> Unlocker for RasterizeRebuildUnlocker<B> {
    fn strategy(&self) -> StrategyKind {
        StrategyKind::RasterizeRebuild
    }

    async fn unlock(
        &self,
        input: UnlockInput,
        mut progress: Progress,
        cancel: CancelFlag,
    ) -> Result<UnlockResult, UnlockError> {
        input.validate(&self.config.limits)?;

        let backend = Arc::clone(&self.backend);
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            rebuild(backend.as_ref(), &config, &input, &mut progress, &cancel)
        })
        .await
        .map_err(|e| UnlockError::Internal(format!("Rasterize task failed: {}", e)))?
    }
}

/// Decode, render page by page, and assemble the new document.
///
/// Pages are processed strictly in order and each raster is dropped as soon
/// as it has been embedded. The first failing page aborts the whole call.
fn rebuild<B: RasterBackend>(
    backend: &B,
    config: &RasterConfig,
    input: &UnlockInput,
    progress: &mut Progress,
    cancel: &CancelFlag,
) -> Result<UnlockResult, UnlockError> {
    input.validate(&config.limits)?;
    if !(config.scale.is_finite() && config.scale > 0.0) {
        return Err(UnlockError::Internal(format!(
            "Invalid render scale {}",
            config.scale
        )));
    }

    progress.emit(10, "Loading PDF...");
    let document = backend.open(&input.document, input.password.expose())?;

    let total = document.page_count();
    if total == 0 {
        return Err(UnlockError::Render("PDF has no pages".into()));
    }
    progress.emit(DECODED_PERCENT, "Decrypting...");

    let mut assembler = PdfAssembler::new();
    for index in 0..total {
        if cancel.is_cancelled() {
            info!(page = index + 1, total, "Unlock cancelled between pages");
            return Err(UnlockError::Cancelled);
        }

        let raster = document.render_page(index, config.scale).map_err(|e| {
            debug!(page = index + 1, error = %e, "Page render failed");
            UnlockError::from(e)
        })?;
        assembler.add_page(&raster)?;
        drop(raster);

        progress.emit_fraction(
            DECODED_PERCENT,
            RENDERED_PERCENT,
            index + 1,
            total,
            &format!("Rendering page {} of {}", index + 1, total),
        );
    }

    progress.emit(FINALIZING_PERCENT, "Preparing output...");
    let bytes = assembler.finish()?;

    info!(
        input_bytes = input.document.len(),
        output_bytes = bytes.len(),
        page_count = total,
        scale = config.scale,
        "Rebuilt PDF from page rasters"
    );
    progress.emit(100, "Complete");

    Ok(UnlockResult {
        bytes,
        page_count: total as u32,
        strategy: StrategyKind::RasterizeRebuild,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressEvent;
    use lopdf::Document;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const PASSWORD: &str = "open sesame";

    /// Pages are (width, height) in page units.
    struct FakeBackend {
        pages: Vec<(f32, f32)>,
        fail_page: Option<(usize, &'static str)>,
        open_calls: AtomicUsize,
        render_calls: Mutex<Vec<usize>>,
    }

    impl FakeBackend {
        fn with_pages(pages: Vec<(f32, f32)>) -> Self {
            Self {
                pages,
                fail_page: None,
                open_calls: AtomicUsize::new(0),
                render_calls: Mutex::new(Vec::new()),
            }
        }
    }

    struct FakeDocument<'a> {
        backend: &'a FakeBackend,
    }

    impl RasterBackend for FakeBackend {
        fn open<'a>(
            &'a self,
            _document: &'a [u8],
            password: &'a str,
        ) -> Result<Box<dyn RasterDocument + 'a>, BackendError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            if password != PASSWORD {
                return Err(BackendError::PasswordRejected);
            }
            Ok(Box::new(FakeDocument { backend: self }))
        }
    }

    impl RasterDocument for FakeDocument<'_> {
        fn page_count(&self) -> usize {
            self.backend.pages.len()
        }

        fn render_page(&self, index: usize, scale: f32) -> Result<PageRaster, BackendError> {
            self.backend.render_calls.lock().unwrap().push(index);
            if let Some((fail, msg)) = self.backend.fail_page {
                if fail == index {
                    return Err(BackendError::Failed(msg.to_string()));
                }
            }
            let (w, h) = self.backend.pages[index];
            let width = (w * scale).round() as u32;
            let height = (h * scale).round() as u32;
            let shade = (index * 40 % 256) as u8;
            PageRaster::new(
                width,
                height,
                vec![shade; width as usize * height as usize * 3],
            )
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<ProgressEvent>>>, Progress) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let progress = Progress::new(Arc::new(move |e: ProgressEvent| {
            sink.lock().unwrap().push(e);
        }));
        (events, progress)
    }

    fn media_box(doc: &Document, page_id: lopdf::ObjectId) -> Vec<i64> {
        doc.get_dictionary(page_id)
            .unwrap()
            .get(b"MediaBox")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o.as_i64().unwrap())
            .collect()
    }

    fn input(password: &str) -> UnlockInput {
        UnlockInput::new(b"%PDF-1.7 encrypted".to_vec(), password)
    }

    #[tokio::test]
    async fn test_three_pages_rebuilt_at_scale() {
        let pages = vec![(100.0, 50.0), (30.0, 40.0), (61.5, 20.0)];
        let unlocker = RasterizeRebuildUnlocker::new(
            FakeBackend::with_pages(pages.clone()),
            RasterConfig::default(),
        );
        let (events, progress) = recorder();

        let result = unlocker
            .unlock(input(PASSWORD), progress, CancelFlag::new())
            .await
            .unwrap();

        assert_eq!(result.page_count, 3);
        assert_eq!(result.strategy, StrategyKind::RasterizeRebuild);

        let doc = Document::load_mem(&result.bytes).unwrap();
        assert!(doc.trailer.get(b"Encrypt").is_err());
        let page_ids: Vec<_> = doc.get_pages().values().copied().collect();
        assert_eq!(page_ids.len(), 3);
        for (page_id, (w, h)) in page_ids.iter().zip(pages) {
            let expected = vec![
                0,
                0,
                (w * DEFAULT_RENDER_SCALE).round() as i64,
                (h * DEFAULT_RENDER_SCALE).round() as i64,
            ];
            assert_eq!(media_box(&doc, *page_id), expected);
        }

        let events = events.lock().unwrap();
        let percents: Vec<u8> = events.iter().map(|e| e.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*percents.last().unwrap(), 100);
        assert_eq!(events.last().unwrap().label, "Complete");
        let mid_band = percents.iter().filter(|&&p| p > 30 && p < 90).count();
        assert!(mid_band >= 3, "expected per-page events, got {:?}", percents);
    }

    #[test]
    fn test_pages_rendered_in_order_once() {
        let backend = FakeBackend::with_pages(vec![(10.0, 10.0); 5]);
        let unlocker = RasterizeRebuildUnlocker::new(backend, RasterConfig::default());

        unlocker
            .unlock_blocking(&input(PASSWORD), &mut Progress::none(), &CancelFlag::new())
            .unwrap();

        let calls = unlocker.backend.render_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_wrong_password_returns_no_document() {
        let unlocker = RasterizeRebuildUnlocker::new(
            FakeBackend::with_pages(vec![(10.0, 10.0)]),
            RasterConfig::default(),
        );
        let (events, progress) = recorder();

        let err = unlocker
            .unlock(input("guess"), progress, CancelFlag::new())
            .await
            .unwrap_err();

        assert!(matches!(err, UnlockError::WrongPassword));
        assert_eq!(unlocker.backend.open_calls.load(Ordering::SeqCst), 1);
        assert!(unlocker.backend.render_calls.lock().unwrap().is_empty());
        assert!(events.lock().unwrap().iter().all(|e| e.percent < 100));
    }

    #[test]
    fn test_validation_skips_decoder() {
        let unlocker = RasterizeRebuildUnlocker::new(
            FakeBackend::with_pages(vec![(10.0, 10.0)]),
            RasterConfig::default(),
        );

        let empty = UnlockInput::new(Vec::new(), PASSWORD);
        let err = unlocker
            .unlock_blocking(&empty, &mut Progress::none(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, UnlockError::Validation(_)));

        let no_password = UnlockInput::new(b"%PDF".to_vec(), "");
        let err = unlocker
            .unlock_blocking(&no_password, &mut Progress::none(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, UnlockError::Validation(_)));

        assert_eq!(unlocker.backend.open_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_page_failure_aborts_whole_document() {
        let mut backend = FakeBackend::with_pages(vec![(10.0, 10.0); 4]);
        backend.fail_page = Some((2, "canvas context lost"));
        let unlocker = RasterizeRebuildUnlocker::new(backend, RasterConfig::default());
        let (events, mut progress) = recorder();

        let err = unlocker
            .unlock_blocking(&input(PASSWORD), &mut progress, &CancelFlag::new())
            .unwrap_err();

        assert!(matches!(err, UnlockError::Render(ref m) if m.contains("canvas")));
        assert_eq!(*unlocker.backend.render_calls.lock().unwrap(), vec![0, 1, 2]);
        assert!(events.lock().unwrap().iter().all(|e| e.percent < 100));
    }

    #[test]
    fn test_late_password_failure_is_wrong_password() {
        let mut backend = FakeBackend::with_pages(vec![(10.0, 10.0); 2]);
        backend.fail_page = Some((1, "Incorrect PASSWORD for page stream"));
        let unlocker = RasterizeRebuildUnlocker::new(backend, RasterConfig::default());

        let err = unlocker
            .unlock_blocking(&input(PASSWORD), &mut Progress::none(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, UnlockError::WrongPassword));
    }

    #[test]
    fn test_cancel_stops_between_pages() {
        let unlocker = RasterizeRebuildUnlocker::new(
            FakeBackend::with_pages(vec![(10.0, 10.0); 3]),
            RasterConfig::default(),
        );
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let mut progress = Progress::new(Arc::new(move |e: ProgressEvent| {
            if e.percent > 30 {
                trigger.cancel();
            }
        }));

        let err = unlocker
            .unlock_blocking(&input(PASSWORD), &mut progress, &cancel)
            .unwrap_err();

        assert!(matches!(err, UnlockError::Cancelled));
        assert_eq!(*unlocker.backend.render_calls.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_custom_scale() {
        let unlocker = RasterizeRebuildUnlocker::new(
            FakeBackend::with_pages(vec![(100.0, 200.0)]),
            RasterConfig {
                scale: 0.5,
                ..RasterConfig::default()
            },
        );

        let result = unlocker
            .unlock_blocking(&input(PASSWORD), &mut Progress::none(), &CancelFlag::new())
            .unwrap();

        let doc = Document::load_mem(&result.bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        assert_eq!(media_box(&doc, page_id), vec![0, 0, 50, 100]);
    }

    #[test]
    fn test_invalid_scale_rejected() {
        let unlocker = RasterizeRebuildUnlocker::new(
            FakeBackend::with_pages(vec![(10.0, 10.0)]),
            RasterConfig {
                scale: 0.0,
                ..RasterConfig::default()
            },
        );
        let err = unlocker
            .unlock_blocking(&input(PASSWORD), &mut Progress::none(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, UnlockError::Internal(_)));
    }

    #[tokio::test]
    async fn test_repeated_calls_are_independent() {
        let unlocker = Arc::new(RasterizeRebuildUnlocker::new(
            FakeBackend::with_pages(vec![(20.0, 10.0); 2]),
            RasterConfig::default(),
        ));

        let (events_a, progress_a) = recorder();
        let (events_b, progress_b) = recorder();
        let (a, b) = tokio::join!(
            unlocker.unlock(input(PASSWORD), progress_a, CancelFlag::new()),
            unlocker.unlock(input(PASSWORD), progress_b, CancelFlag::new()),
        );

        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a.page_count, 2);
        assert_eq!(b.page_count, 2);
        assert_eq!(a.bytes.len(), b.bytes.len());

        for events in [events_a, events_b] {
            let events = events.lock().unwrap();
            let completes = events.iter().filter(|e| e.percent == 100).count();
            assert_eq!(completes, 1);
        }
    }

    #[test]
    fn test_backend_error_classification() {
        assert!(matches!(
            UnlockError::from(BackendError::PasswordRejected),
            UnlockError::WrongPassword
        ));
        assert!(matches!(
            UnlockError::from(BackendError::Failed("Need a password".into())),
            UnlockError::WrongPassword
        ));
        assert!(matches!(
            UnlockError::from(BackendError::Failed("bad xref".into())),
            UnlockError::Render(_)
        ));
        assert!(matches!(
            UnlockError::from(BackendError::Unavailable("no libpdfium".into())),
            UnlockError::Render(_)
        ));
    }

    #[test]
    fn test_raster_buffer_checked() {
        assert!(PageRaster::new(2, 2, vec![0; 12]).is_ok());
        assert!(PageRaster::new(2, 2, vec![0; 11]).is_err());
        assert!(PageRaster::new(0, 2, vec![]).is_err());
    }
}
