//! Submitting one file to the proxy and decoding what comes back.
//!
//! [`Transport`] is the seam between the orchestrator and the network: the
//! orchestrator only needs "give me a [`ConversionResult`] for this file".
//! [`ProxyClient`] is the real implementation (multipart POST with
//! `reqwest`); tests plug in their own.

use crate::config::OrchestratorConfig;
use crate::error::{ItemError, Jfif2JpgError};
use crate::model::{ConversionResult, SourceFile};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::multipart::{Form, Part};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Sends a file somewhere that converts it.
///
/// Implementations must be cheap to share: the orchestrator holds one
/// instance and calls it from many concurrent tasks.
pub trait Transport: Send + Sync + 'static {
    /// Convert one file. Errors are per-file and never abort other work.
    fn submit(
        &self,
        file: SourceFile,
    ) -> impl Future<Output = Result<ConversionResult, ItemError>> + Send;
}

/// HTTP client for the proxy's `POST /api/convert` route.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ProxyClient {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, Jfif2JpgError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder
            .build()
            .map_err(|e| Jfif2JpgError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for ProxyClient {
    async fn submit(&self, file: SourceFile) -> Result<ConversionResult, ItemError> {
        let transport = |e: reqwest::Error| ItemError::Transport {
            detail: e.to_string(),
        };

        let part = Part::bytes(file.bytes.to_vec()).file_name(file.name.clone());
        let part = match file.media_type.as_deref() {
            Some(mime) => part.mime_str(mime).map_err(transport)?,
            None => part,
        };
        let form = Form::new().part("file", part);

        debug!("POST {} ({}, {} bytes)", self.endpoint, file.name, file.len());
        let response = self
            .http
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        debug!("{}: HTTP {} ({} bytes)", file.name, status, body.len());

        if !status.is_success() {
            return Err(ItemError::Rejected {
                status: status.as_u16(),
                message: error_message(&body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ItemError::MalformedResponse {
            detail: e.to_string(),
        })
    }
}

/// Pull a human-readable message out of an error body.
///
/// The proxy puts it in `error`; the conversion service itself uses
/// `message`. Anything else falls back to a generic text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["error", "message"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(str::to_string))
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| "Conversion failed".to_string())
}

/// A successfully decoded conversion payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Turn a [`ConversionResult`] into image bytes.
pub fn decode_result(result: ConversionResult) -> Result<DecodedImage, ItemError> {
    if !result.success {
        let message = if result.message.is_empty() {
            "Conversion failed".to_string()
        } else {
            result.message
        };
        return Err(ItemError::Unsuccessful { message });
    }

    let bytes = STANDARD
        .decode(result.data.base64_data.trim())
        .map_err(|e| ItemError::Decode {
            detail: e.to_string(),
        })?;

    Ok(DecodedImage {
        file_name: result.data.filename,
        content_type: result.data.content_type,
        bytes,
    })
}
