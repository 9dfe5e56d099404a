//! PDFium-backed renderer.
//!
//! The shared library is bound once per process and reused by every call.
//! Binding happens on first use; a failed bind is retried on the next call
//! so that a library installed after startup is still picked up.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use pdfium_render::prelude::*;
use tracing::{debug, info};

use super::{BackendError, PageRaster, RasterBackend, RasterDocument};

/// Environment variable pointing at the directory holding the pdfium library.
pub const LIBRARY_PATH_ENV: &str = "PDFIUM_LIB_PATH";

static PDFIUM: OnceLock<Pdfium> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

/// Directories searched for the pdfium shared library, in order.
fn library_search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(dir) = explicit {
        paths.push(dir.to_path_buf());
    }
    if let Some(dir) = std::env::var_os(LIBRARY_PATH_ENV).filter(|v| !v.is_empty()) {
        paths.push(PathBuf::from(dir));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            paths.push(exe_dir.join("libs"));
            paths.push(exe_dir.to_path_buf());

            #[cfg(target_os = "macos")]
            {
                // .app/Contents/MacOS/<bin> -> .app/Contents/Resources
                if let Some(contents_dir) = exe_dir.parent() {
                    paths.push(contents_dir.join("Resources").join("libs"));
                    paths.push(contents_dir.join("Resources"));
                }
            }
        }
    }

    paths.push(PathBuf::from("libs"));
    paths.push(PathBuf::from("./"));
    paths
}

fn bind_pdfium(explicit: Option<&Path>) -> Result<Pdfium, BackendError> {
    for path in library_search_paths(explicit) {
        let lib_path = Pdfium::pdfium_platform_library_name_at_path(&path);
        debug!(path = ?lib_path, "Trying to bind pdfium");

        if let Ok(bindings) = Pdfium::bind_to_library(&lib_path) {
            info!(path = ?path, "Bound pdfium");
            return Ok(Pdfium::new(bindings));
        }
    }

    debug!("Trying system pdfium library");
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| BackendError::Unavailable(format!("pdfium library not found: {}", e)))
}

/// Process-wide pdfium instance, bound on first use.
fn shared_pdfium(explicit: Option<&Path>) -> Result<&'static Pdfium, BackendError> {
    if let Some(pdfium) = PDFIUM.get() {
        return Ok(pdfium);
    }

    // A poisoned lock only means another initializer panicked; the
    // OnceLock is still consistent.
    let _guard = INIT_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if let Some(pdfium) = PDFIUM.get() {
        return Ok(pdfium);
    }

    let pdfium = bind_pdfium(explicit)?;
    Ok(PDFIUM.get_or_init(|| pdfium))
}

/// [`RasterBackend`] rendering through PDFium.
#[derive(Clone, Copy)]
pub struct PdfiumBackend {
    pdfium: &'static Pdfium,
}

impl PdfiumBackend {
    /// Bind (or reuse) the pdfium library. `library_dir` is searched before
    /// the default locations.
    pub fn new(library_dir: Option<&Path>) -> Result<Self, BackendError> {
        Ok(Self {
            pdfium: shared_pdfium(library_dir)?,
        })
    }
}

impl RasterBackend for PdfiumBackend {
    fn open<'a>(
        &'a self,
        document: &'a [u8],
        password: &'a str,
    ) -> Result<Box<dyn RasterDocument + 'a>, BackendError> {
        let doc = self
            .pdfium
            .load_pdf_from_byte_slice(document, Some(password))
            .map_err(map_pdfium_error)?;
        Ok(Box::new(PdfiumDocument { doc }))
    }
}

struct PdfiumDocument<'a> {
    doc: PdfDocument<'a>,
}

impl RasterDocument for PdfiumDocument<'_> {
    fn page_count(&self) -> usize {
        self.doc.pages().len() as usize
    }

    fn render_page(&self, index: usize, scale: f32) -> Result<PageRaster, BackendError> {
        let page_index = u16::try_from(index)
            .map_err(|_| BackendError::Failed(format!("Page index {} out of range", index)))?;
        let page = self
            .doc
            .pages()
            .get(page_index)
            .map_err(map_pdfium_error)?;

        let target_width = ((page.width().value * scale).round() as i32).max(1);
        let target_height = ((page.height().value * scale).round() as i32).max(1);

        let render_config = PdfRenderConfig::new()
            .set_target_width(target_width)
            .set_target_height(target_height);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(map_pdfium_error)?;

        let image = bitmap.as_image().to_rgb8();
        let (width, height) = image.dimensions();
        PageRaster::new(width, height, image.into_raw())
    }
}

fn map_pdfium_error(err: PdfiumError) -> BackendError {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            BackendError::PasswordRejected
        }
        other => BackendError::Failed(other.to_string()),
    }
}
