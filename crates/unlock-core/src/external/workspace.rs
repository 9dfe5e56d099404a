//! Scoped temporary files for one decrypt-tool invocation.

use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

const WORKSPACE_PREFIX: &str = "pdf-unlock-";

/// A private directory holding one attempt's input and output files.
///
/// Both files live in a freshly created, randomly named directory and carry
/// a random id, so concurrent attempts never share a path. The directory is
/// removed when the workspace is dropped, on every exit path; a failed
/// removal is logged and otherwise ignored.
pub struct TempWorkspace {
    dir: Option<TempDir>,
    input: PathBuf,
    output: PathBuf,
}

impl TempWorkspace {
    /// Create a workspace under `root`, or the system temp dir if `None`.
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };

        let id = Uuid::new_v4();
        let input = dir.path().join(format!("{}-input.pdf", id));
        let output = dir.path().join(format!("{}-output.pdf", id));

        Ok(Self {
            dir: Some(dir),
            input,
            output,
        })
    }

    pub fn input_path(&self) -> &Path {
        &self.input
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(TempDir::path)
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!(path = %path.display(), "Removed unlock workspace"),
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Failed to remove unlock workspace"
            ),
        }
    }
}
