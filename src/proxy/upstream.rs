//! Forwarding one upload to the external conversion service.
//!
//! The upstream body is read as text first and only then parsed, so a
//! gateway error page or an empty body is reported as such (502) instead of
//! being confused with a credential problem.

use super::error::ProxyError;
use super::ProxyState;
use crate::config::ENV_API_KEY;
use axum::body::Bytes;
use axum::http::header::{ACCEPT, ORIGIN, USER_AGENT};
use axum::http::StatusCode;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Header carrying the conversion service credential.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// One file pulled out of the incoming multipart request.
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Re-post `upload` to the conversion service and interpret its answer.
///
/// Returns the parsed success body verbatim.
pub async fn forward(state: &ProxyState, upload: Upload) -> Result<Value, ProxyError> {
    let internal = |e: reqwest::Error| ProxyError::Internal {
        details: e.to_string(),
    };

    let upstream = state.config.upstream.resolve();
    let url = upstream.convert_url();
    info!(
        "Forwarding {} ({} bytes) to {} [key {}]",
        upload.file_name,
        upload.bytes.len(),
        url,
        upstream.api_key_prefix()
    );
    if upstream.api_key.is_none() {
        warn!("{} is not set; the conversion service will likely refuse the request", ENV_API_KEY);
    }

    let part = Part::bytes(upload.bytes.to_vec()).file_name(upload.file_name.clone());
    let part = match upload.content_type.as_deref() {
        Some(mime) => part.mime_str(mime).map_err(internal)?,
        None => part,
    };
    let form = Form::new().part("file", part);

    let mut request = state
        .http
        .post(&url)
        .multipart(form)
        .header(API_KEY_HEADER, upstream.api_key.as_deref().unwrap_or(""))
        .header(ACCEPT, "application/json")
        .header(USER_AGENT, state.config.user_agent.as_str());
    if let Some(origin) = &state.config.origin {
        request = request.header(ORIGIN, origin.as_str());
    }

    let response = request.send().await.map_err(internal)?;
    let status = response.status();
    let text = response.text().await.map_err(internal)?;
    debug!("Upstream answered {} ({} bytes)", status, text.len());

    if status == StatusCode::FORBIDDEN {
        return Err(ProxyError::AccessDenied);
    }

    let data: Value = serde_json::from_str(&text).map_err(|_| ProxyError::InvalidUpstreamResponse {
        raw: text.clone(),
    })?;

    if !status.is_success() {
        let message = data
            .get("detail")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("Conversion failed")
            .to_string();
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            message,
            details: data,
        });
    }

    Ok(data)
}
