//! PDF password removal
//!
//! Produces a copy of an encrypted PDF that opens without a password. Two
//! strategies implement the same [`Unlocker`] contract:
//!
//! - [`ExternalToolUnlocker`]: hands the file to a decrypt tool (qpdf) through
//!   scoped temporary files. Needs a server that can run the tool.
//! - [`RasterizeRebuildUnlocker`]: opens the file with a password-aware
//!   renderer and rebuilds a new PDF from page images. Runs fully in-process,
//!   at the cost of text selectability.
//!
//! Both return either a complete unencrypted document or exactly one
//! [`UnlockError`]; partial output is never handed back.

pub mod error;
pub mod external;
pub mod input;
pub mod inspect;
pub mod progress;
pub mod raster;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;

pub use error::{ErrorKind, UnlockError};
pub use external::{ExternalToolUnlocker, ToolConfig};
pub use input::{Limits, Password, UnlockInput};
pub use inspect::{inspect, DocumentInfo};
pub use progress::{CancelFlag, Progress, ProgressEvent, ProgressSink};
pub use raster::{
    BackendError, PageRaster, RasterBackend, RasterConfig, RasterDocument,
    RasterizeRebuildUnlocker,
};

/// Which unlock strategy produced (or will produce) a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    ExternalTool,
    #[serde(rename = "rasterize")]
    RasterizeRebuild,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::ExternalTool => "external-tool",
            StrategyKind::RasterizeRebuild => "rasterize",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "external-tool" | "external" | "qpdf" => Ok(StrategyKind::ExternalTool),
            "rasterize" | "rasterize-rebuild" | "raster" => Ok(StrategyKind::RasterizeRebuild),
            other => Err(format!(
                "Unknown strategy '{}'. Must be 'external-tool' or 'rasterize'",
                other
            )),
        }
    }
}

/// A successfully unlocked document. Owned by the caller.
#[derive(Debug, Clone)]
pub struct UnlockResult {
    /// Complete PDF that opens without a password
    pub bytes: Vec<u8>,
    pub page_count: u32,
    pub strategy: StrategyKind,
}

/// The unlock contract shared by both strategies.
#[async_trait]
pub trait Unlocker: Send + Sync {
    fn strategy(&self) -> StrategyKind;

    /// Remove the password from `input.document`.
    ///
    /// Validation failures are returned before any temp file, process or
    /// decoder is touched. On success the last progress event is 100.
    async fn unlock(
        &self,
        input: UnlockInput,
        progress: Progress,
        cancel: CancelFlag,
    ) -> Result<UnlockResult, UnlockError>;
}
