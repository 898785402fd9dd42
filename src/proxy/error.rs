use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

/// Everything the convert route can answer besides success.
///
/// Each variant maps to one status code and one JSON body shape; the
/// upstream credential never appears in either.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("No file provided")]
    MissingFile,

    #[error("File too large")]
    PayloadTooLarge { limit: usize },

    /// The conversion service refused our credential.
    #[error("Access denied")]
    AccessDenied,

    /// The conversion service answered with something that is not JSON.
    #[error("Invalid response format")]
    InvalidUpstreamResponse { raw: String },

    /// The conversion service answered with a JSON error.
    #[error("{message}")]
    Upstream {
        status: u16,
        message: String,
        details: Value,
    },

    #[error("Internal server error")]
    Internal { details: String },
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingFile => StatusCode::BAD_REQUEST,
            ProxyError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::AccessDenied => StatusCode::FORBIDDEN,
            ProxyError::InvalidUpstreamResponse { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            ProxyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn body(&self) -> Value {
        let error = self.to_string();
        match self {
            ProxyError::MissingFile => json!({ "error": error }),
            ProxyError::PayloadTooLarge { limit } => json!({
                "error": error,
                "details": format!("Maximum upload size is {limit} bytes"),
            }),
            ProxyError::AccessDenied => json!({
                "error": error,
                "details": "API key verification failed",
            }),
            ProxyError::InvalidUpstreamResponse { raw } => json!({
                "error": error,
                "details": raw,
            }),
            ProxyError::Upstream {
                status, details, ..
            } => json!({
                "error": error,
                "status": status,
                "details": details,
            }),
            ProxyError::Internal { details } => json!({
                "error": error,
                "details": details,
            }),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Conversion error ({}): {:?}", status.as_u16(), self);
        } else {
            warn!("Conversion rejected ({}): {}", status.as_u16(), self);
        }

        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_400() {
        let e = ProxyError::MissingFile;
        assert_eq!(e.status(), StatusCode::BAD_REQUEST);
        assert_eq!(e.body(), json!({ "error": "No file provided" }));
    }

    #[test]
    fn unparsable_upstream_is_502_with_raw_text() {
        let e = ProxyError::InvalidUpstreamResponse {
            raw: "<html>Bad Gateway</html>".into(),
        };
        assert_eq!(e.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(e.body()["details"], "<html>Bad Gateway</html>");
    }

    #[test]
    fn upstream_status_is_relayed() {
        let e = ProxyError::Upstream {
            status: 422,
            message: "Not an image".into(),
            details: json!({ "detail": "Not an image" }),
        };
        assert_eq!(e.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = e.body();
        assert_eq!(body["error"], "Not an image");
        assert_eq!(body["status"], 422);
        assert_eq!(body["details"]["detail"], "Not an image");
    }

    #[test]
    fn nonsense_upstream_status_becomes_502() {
        let e = ProxyError::Upstream {
            status: 42,
            message: "?".into(),
            details: Value::Null,
        };
        assert_eq!(e.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn access_denied_is_403() {
        let e = ProxyError::AccessDenied;
        assert_eq!(e.status(), StatusCode::FORBIDDEN);
        assert_eq!(e.body()["details"], "API key verification failed");
    }
}
