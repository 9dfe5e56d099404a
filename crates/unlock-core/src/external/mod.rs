//! External-tool strategy
//!
//! Decryption is delegated to qpdf (or anything with the same command line):
//!
//! ```text
//! <tool> --password=<password> --decrypt <input> <output>
//! ```
//!
//! The password travels as a process argument and is therefore visible in
//! process listings while the tool runs. That is a known limitation of this
//! strategy.

mod workspace;

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use lopdf::Document;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

pub use workspace::TempWorkspace;

use crate::error::UnlockError;
use crate::input::{Limits, UnlockInput};
use crate::progress::{CancelFlag, Progress};
use crate::{StrategyKind, UnlockResult, Unlocker};

/// qpdf exits with 3 when it succeeded but printed warnings.
const EXIT_SUCCESS_WITH_WARNINGS: i32 = 3;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for [`ExternalToolUnlocker`].
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Decrypt tool executable (absolute path or a name looked up on PATH)
    pub program: PathBuf,
    /// The tool is killed once this elapses
    pub timeout: Duration,
    /// Where per-call workspaces are created; system temp dir if `None`
    pub temp_root: Option<PathBuf>,
    pub limits: Limits,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            timeout: DEFAULT_TIMEOUT,
            temp_root: None,
            limits: Limits::default(),
        }
    }
}

/// Platform default: the copy bundled next to the executable on Windows,
/// a bare `qpdf` resolved through PATH everywhere else.
pub fn default_program() -> PathBuf {
    if cfg!(windows) {
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("bin").join("qpdf.exe")))
            .unwrap_or_else(|| PathBuf::from("qpdf.exe"))
    } else {
        PathBuf::from("qpdf")
    }
}

/// Unlocks PDFs by running an external decrypt tool on temporary files.
#[derive(Debug, Clone, Default)]
pub struct ExternalToolUnlocker {
    config: ToolConfig,
}

impl ExternalToolUnlocker {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ToolConfig {
        &self.config
    }

    /// Run the tool inside `workspace` and return the decrypted bytes.
    async fn decrypt_in(
        &self,
        workspace: &TempWorkspace,
        input: &UnlockInput,
        progress: &mut Progress,
        cancel: &CancelFlag,
    ) -> Result<Vec<u8>, UnlockError> {
        tokio::fs::write(workspace.input_path(), &input.document)
            .await
            .map_err(|e| UnlockError::Internal(format!("Failed to write temporary input: {}", e)))?;

        progress.emit(30, "Decrypting...");

        let password_arg = Zeroizing::new(format!("--password={}", input.password.expose()));
        let mut command = Command::new(&self.config.program);
        command
            .arg(password_arg.as_str())
            .arg("--decrypt")
            .arg(workspace.input_path())
            .arg(workspace.output_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(program = %self.config.program.display(), "Spawning decrypt tool");
        let mut child = command
            .spawn()
            .map_err(|e| classify_spawn_error(&self.config.program, e))?;

        // Drained on the side so a chatty tool cannot block on a full pipe.
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                buf
            })
        });

        let timeout_ms = self.config.timeout.as_millis() as u64;
        let outcome = tokio::select! {
            waited = tokio::time::timeout(self.config.timeout, child.wait()) => match waited {
                Ok(status) => Waited::Exited(status),
                Err(_elapsed) => Waited::TimedOut,
            },
            _ = cancelled(cancel) => Waited::Cancelled,
        };

        let status = match outcome {
            Waited::Exited(Ok(status)) => status,
            Waited::Exited(Err(e)) => {
                kill_and_reap(&mut child).await;
                return Err(UnlockError::Internal(format!(
                    "Failed to wait for decrypt tool: {}",
                    e
                )));
            }
            Waited::TimedOut => {
                warn!(timeout_ms, "Decrypt tool timed out, killing it");
                kill_and_reap(&mut child).await;
                return Err(UnlockError::Timeout(timeout_ms));
            }
            Waited::Cancelled => {
                info!("Unlock cancelled while decrypt tool was running");
                kill_and_reap(&mut child).await;
                return Err(UnlockError::Cancelled);
            }
        };

        let output_exists = tokio::fs::try_exists(workspace.output_path())
            .await
            .unwrap_or(false);
        if let Err(err) = classify_exit(status, output_exists) {
            let stderr = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => Vec::new(),
            };
            debug!(
                status = ?status.code(),
                stderr = %String::from_utf8_lossy(&stderr).trim(),
                "Decrypt tool failed"
            );
            return Err(err);
        }

        progress.emit(90, "Reading output...");
        tokio::fs::read(workspace.output_path())
            .await
            .map_err(|e| UnlockError::Internal(format!("Failed to read decrypted output: {}", e)))
    }
}

#[async_trait]
impl Unlocker for ExternalToolUnlocker {
    fn strategy(&self) -> StrategyKind {
        StrategyKind::ExternalTool
    }

    async fn unlock(
        &self,
        input: UnlockInput,
        mut progress: Progress,
        cancel: CancelFlag,
    ) -> Result<UnlockResult, UnlockError> {
        input.validate(&self.config.limits)?;
        if cancel.is_cancelled() {
            return Err(UnlockError::Cancelled);
        }

        progress.emit(10, "Preparing files...");
        let workspace = TempWorkspace::create(self.config.temp_root.as_deref()).map_err(|e| {
            UnlockError::Internal(format!("Failed to create temporary workspace: {}", e))
        })?;

        let decrypted = self
            .decrypt_in(&workspace, &input, &mut progress, &cancel)
            .await;
        drop(workspace);
        let bytes = decrypted?;

        let page_count = verify_decrypted(&bytes)?;

        info!(
            input_bytes = input.document.len(),
            output_bytes = bytes.len(),
            page_count,
            "Unlocked PDF with external tool"
        );
        progress.emit(100, "Complete");

        Ok(UnlockResult {
            bytes,
            page_count,
            strategy: StrategyKind::ExternalTool,
        })
    }
}

/// How waiting on the tool ended.
enum Waited {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Kill the tool and wait for it, so no process still holds the workspace
/// files when they are removed.
async fn kill_and_reap(child: &mut Child) {
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "Decrypt tool already gone");
    }
    if let Err(e) = child.wait().await {
        warn!(error = %e, "Failed to reap decrypt tool");
    }
}

/// Parse the tool's output and return its page count. Output that does not
/// parse, or still carries an encryption dictionary, is never handed back.
fn verify_decrypted(bytes: &[u8]) -> Result<u32, UnlockError> {
    let doc = Document::load_mem(bytes).map_err(|e| {
        UnlockError::Internal(format!("Decrypt tool output is not a readable PDF: {}", e))
    })?;
    if doc.is_encrypted() {
        return Err(UnlockError::Internal(
            "Decrypt tool output is still encrypted".into(),
        ));
    }
    Ok(doc.get_pages().len() as u32)
}

/// Resolves once `cancel` is raised.
async fn cancelled(cancel: &CancelFlag) {
    while !cancel.is_cancelled() {
        tokio::time::sleep(CANCEL_POLL_INTERVAL).await;
    }
}

/// Map a spawn failure: a missing or non-executable tool is an operator
/// problem, anything else is internal.
fn classify_spawn_error(program: &Path, err: io::Error) -> UnlockError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
            warn!(program = %program.display(), error = %err, "Decrypt tool cannot be started");
            UnlockError::ToolUnavailable(format!("{}: {}", program.display(), err))
        }
        _ => UnlockError::Internal(format!("Failed to start decrypt tool: {}", err)),
    }
}

/// Map the tool's exit status.
///
/// Every failing exit is reported as a password failure: the tool does not
/// reliably separate "wrong password" from "not encrypted" or other decrypt
/// errors.
fn classify_exit(status: ExitStatus, output_exists: bool) -> Result<(), UnlockError> {
    match status.code() {
        Some(0) | Some(EXIT_SUCCESS_WITH_WARNINGS) if output_exists => Ok(()),
        Some(0) | Some(EXIT_SUCCESS_WITH_WARNINGS) => Err(UnlockError::Internal(
            "Decrypt tool reported success but wrote no output".into(),
        )),
        _ => Err(UnlockError::WrongPassword),
    }
}
