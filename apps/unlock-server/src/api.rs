//! API handlers for the unlock server
//!
//! Provides REST endpoints for:
//! - Health check
//! - Inspecting an upload (encrypted? how many pages?)
//! - Unlocking an upload with its password

use std::sync::Arc;

use axum::{
    extract::{Multipart, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, info};
use unlock_core::{
    inspect, CancelFlag, DocumentInfo, Password, Progress, ProgressEvent, StrategyKind,
    UnlockError, UnlockInput,
};
use uuid::Uuid;

use crate::error::ServerError;
use crate::AppState;

/// Header carrying the unlocked document's page count.
pub const PAGE_COUNT_HEADER: &str = "x-page-count";

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub strategy: StrategyKind,
}

/// Handler: GET /health
pub async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "unlock-server",
        version: env!("CARGO_PKG_VERSION"),
        strategy: state.unlocker.strategy(),
    })
}

/// Inspect response
#[derive(Serialize)]
pub struct InspectResponse {
    pub success: bool,
    #[serde(flatten)]
    pub info: DocumentInfo,
}

/// Handler: POST /api/inspect
pub async fn handle_inspect(multipart: Multipart) -> Result<Json<InspectResponse>, ServerError> {
    let upload = read_upload(multipart).await?;
    let document = upload
        .document
        .ok_or_else(|| UnlockError::Validation("No PDF file provided".into()))?;

    let info = inspect(&document);
    debug!(
        size_bytes = info.size_bytes,
        encrypted = info.encrypted,
        "Inspected upload"
    );

    Ok(Json(InspectResponse {
        success: true,
        info,
    }))
}

/// Handler: POST /api/unlock
///
/// Responds with the unlocked PDF as an attachment. If the client goes away
/// mid-request the handler future is dropped, which raises the call's cancel
/// flag through [`CancelOnDrop`].
pub async fn handle_unlock(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ServerError> {
    let upload = read_upload(multipart).await?;
    let request_id = Uuid::new_v4();

    let input = UnlockInput::new(
        upload.document.unwrap_or_default(),
        upload.password.unwrap_or_else(|| Password::new("")),
    );
    info!(
        %request_id,
        size_bytes = input.document.len(),
        strategy = %state.unlocker.strategy(),
        "Unlock requested"
    );

    let progress = Progress::new(Arc::new(move |event: ProgressEvent| {
        debug!(%request_id, percent = event.percent, label = %event.label, "Unlock progress");
    }));

    let cancel = CancelFlag::new();
    let guard = CancelOnDrop::new(cancel.clone());
    let result = state.unlocker.unlock(input, progress, cancel).await;
    guard.disarm();
    let result = result?;

    info!(
        %request_id,
        page_count = result.page_count,
        output_bytes = result.bytes.len(),
        "Unlock complete"
    );

    let disposition = format!(
        "attachment; filename=\"{}\"",
        output_filename(upload.file_name.as_deref())
    );
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (
                header::HeaderName::from_static(PAGE_COUNT_HEADER),
                result.page_count.to_string(),
            ),
        ],
        result.bytes,
    )
        .into_response())
}

/// Fields pulled out of a multipart upload.
#[derive(Default)]
struct Upload {
    document: Option<Vec<u8>>,
    file_name: Option<String>,
    password: Option<Password>,
}

/// Read the `file` and `password` fields; anything else is skipped.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, ServerError> {
    let mut upload = Upload::default();

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("file") => {
                upload.file_name = field.file_name().map(|s| s.to_string());
                let data = field.bytes().await?;
                debug!("Read {} bytes of file data", data.len());
                upload.document = Some(data.to_vec());
            }
            Some("password") => {
                upload.password = Some(Password::new(field.text().await?));
            }
            other => {
                debug!(field = ?other, "Ignoring multipart field");
            }
        }
    }

    Ok(upload)
}

/// Download name for the unlocked copy: `<stem>-unlocked.pdf`.
///
/// Only a conservative character set survives so the name can be placed in
/// a quoted header value as-is.
pub fn output_filename(original: Option<&str>) -> String {
    let base = original
        .and_then(|name| name.rsplit(['/', '\\']).next())
        .unwrap_or("");
    let stem = match base.len().checked_sub(4) {
        Some(cut) if base.is_char_boundary(cut) && base[cut..].eq_ignore_ascii_case(".pdf") => {
            &base[..cut]
        }
        _ => base,
    };

    let clean: String = stem
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        .collect();
    let clean = clean.trim_matches(|c| c == '.' || c == ' ');

    if clean.is_empty() {
        "document-unlocked.pdf".to_string()
    } else {
        format!("{}-unlocked.pdf", clean)
    }
}

/// Raises a cancel flag when dropped, unless disarmed first.
pub struct CancelOnDrop {
    flag: Option<CancelFlag>,
}

impl CancelOnDrop {
    pub fn new(flag: CancelFlag) -> Self {
        Self { flag: Some(flag) }
    }

    /// The call finished; dropping no longer cancels.
    pub fn disarm(mut self) {
        self.flag = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.flag.take() {
            debug!("Request dropped before unlock finished, cancelling");
            flag.cancel();
        }
    }
}
