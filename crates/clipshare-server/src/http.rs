//! REST endpoints: HTTP join, code generation, upload, download, preview.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use clipshare_core::{ClipboardItem, ItemId, SessionCode, SessionError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::controller::{FileUpload, SessionController};
use crate::server::AppState;

/// Multipart field carrying the upload.
pub const UPLOAD_FIELD: &str = "file";

const FALLBACK_MIME: &str = "application/octet-stream";

/// Error returned by REST handlers, rendered as `{"error", "kind"}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid upload: {0}")]
    Multipart(#[from] MultipartError),

    #[error("No file uploaded")]
    MissingFile,

    #[error("Session not found")]
    UnknownSession,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Session(err) => match err {
                SessionError::SessionNotFound(_) | SessionError::ItemNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                SessionError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
                SessionError::CodeFormat(_)
                | SessionError::NotJoined
                | SessionError::EmptyContent
                | SessionError::MalformedFrame(_) => StatusCode::BAD_REQUEST,
                SessionError::ShuttingDown | SessionError::ConnectionClosed => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            },
            Self::Multipart(err) => err.status(),
            Self::MissingFile => StatusCode::BAD_REQUEST,
            Self::UnknownSession => StatusCode::NOT_FOUND,
        }
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Session(err) => err.error_kind(),
            Self::Multipart(_) => "invalid_upload",
            Self::MissingFile => "missing_file",
            Self::UnknownSession => "session_not_found",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        debug!(status = status.as_u16(), kind = self.error_kind(), error = %self, "request failed");
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.error_kind(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub code: SessionCode,
    pub items: Vec<ClipboardItem>,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CodeResponse {
    pub code: SessionCode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: &'static str,
    pub file_id: ItemId,
}

/// Preview body: item metadata plus base64 payload.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePreview {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub data: String,
    pub timestamp: DateTime<Utc>,
}

impl FilePreview {
    /// `None` for text items.
    pub fn from_item(item: &ClipboardItem) -> Option<Self> {
        let attachment = item.attachment()?;
        Some(Self {
            id: item.id.clone(),
            kind: item.kind().as_str(),
            name: attachment.name.clone(),
            size: attachment.size_bytes,
            mime_type: attachment.mime_type.clone(),
            data: BASE64.encode(&attachment.payload),
            timestamp: item.timestamp,
        })
    }
}

/// `POST /api/session/join`
pub async fn join_session(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> Result<Json<JoinResponse>, ApiError> {
    let (code, items) = state.controller.touch(&request.code)?;
    Ok(Json(JoinResponse {
        code,
        items,
        message: "Session joined successfully",
    }))
}

/// `GET /api/session/code`
pub async fn generate_code(State(state): State<AppState>) -> Json<CodeResponse> {
    Json(CodeResponse {
        code: state.controller.fresh_code(),
    })
}

/// `POST /api/upload/{code}`
pub async fn upload_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    // Reject a bad code before reading the body.
    SessionCode::parse(&code)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let name = field.file_name().unwrap_or(UPLOAD_FIELD).to_owned();
        let mime_type = field.content_type().unwrap_or(FALLBACK_MIME).to_owned();
        let payload = field.bytes().await?;
        upload = Some(FileUpload {
            name,
            mime_type,
            payload,
        });
        break;
    }
    let upload = upload.ok_or(ApiError::MissingFile)?;

    let item = state.controller.add_file(&code, upload)?;
    Ok(Json(UploadResponse {
        message: "File uploaded successfully",
        file_id: item.id,
    }))
}

/// `GET /api/download/{code}/{file_id}`: raw bytes as an attachment.
pub async fn download_file(
    State(state): State<AppState>,
    Path((code, file_id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let item = read_attachment(&state.controller, &code, file_id)?;
    let Some(attachment) = item.attachment() else {
        return Err(ApiError::Session(SessionError::ItemNotFound(item.id.clone())));
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&attachment.mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_MIME)),
    );
    headers.insert(CONTENT_DISPOSITION, content_disposition(&attachment.name));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(attachment.payload.len()));
    Ok((headers, attachment.payload.clone()).into_response())
}

/// `GET /api/file/{code}/{file_id}`: JSON preview with base64 data.
pub async fn preview_file(
    State(state): State<AppState>,
    Path((code, file_id)): Path<(String, String)>,
) -> Result<Json<FilePreview>, ApiError> {
    let item = read_attachment(&state.controller, &code, file_id)?;
    FilePreview::from_item(&item)
        .map(Json)
        .ok_or_else(|| ApiError::Session(SessionError::ItemNotFound(item.id.clone())))
}

/// Reads treat a malformed code as an unknown session.
fn read_attachment(
    controller: &SessionController,
    code: &str,
    file_id: String,
) -> Result<ClipboardItem, ApiError> {
    match controller.read_item(code, &ItemId::from(file_id)) {
        Ok(item) => Ok(item),
        Err(SessionError::CodeFormat(_)) => Err(ApiError::UnknownSession),
        Err(err) => Err(err.into()),
    }
}

fn content_disposition(name: &str) -> HeaderValue {
    let safe: String = name
        .chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
