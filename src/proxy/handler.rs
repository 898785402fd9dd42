use super::error::ProxyError;
use super::upstream::{self, Upload};
use super::ProxyState;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Multipart field carrying the file.
pub const FILE_FIELD: &str = "file";

/// `POST /api/convert`: one file in, the conversion service's JSON out.
pub async fn convert_handler(
    State(state): State<Arc<ProxyState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Value>, ProxyError> {
    let mut multipart = multipart.map_err(|e| ProxyError::Internal {
        details: e.to_string(),
    })?;

    let upload = read_file_field(&mut multipart, state.config.max_upload_bytes)
        .await?
        .ok_or(ProxyError::MissingFile)?;

    let data = upstream::forward(&state, upload).await?;
    Ok(Json(data))
}

/// Find the `file` field and read it fully, enforcing `limit`.
async fn read_file_field(
    multipart: &mut Multipart,
    limit: usize,
) -> Result<Option<Upload>, ProxyError> {
    let field_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ProxyError::PayloadTooLarge { limit }
        } else {
            ProxyError::Internal {
                details: e.body_text(),
            }
        }
    };

    while let Some(field) = multipart.next_field().await.map_err(field_error)? {
        if field.name() != Some(FILE_FIELD) {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let file_name = field
            .file_name()
            .filter(|n| !n.is_empty())
            .unwrap_or("upload.jfif")
            .to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(field_error)?;

        if bytes.len() > limit {
            return Err(ProxyError::PayloadTooLarge { limit });
        }

        return Ok(Some(Upload {
            file_name,
            content_type,
            bytes,
        }));
    }

    Ok(None)
}
