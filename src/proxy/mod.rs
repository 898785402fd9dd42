//! The proxy endpoint: a same-origin HTTP route in front of the conversion
//! service.
//!
//! The browser (or [`crate::client::ProxyClient`]) never learns where the
//! conversion service lives or which key it takes. The proxy accepts one
//! file per request, re-posts it upstream with the credential attached and
//! relays the answer, mapping failures to the statuses listed on
//! [`ProxyError`].
//!
//! ```text
//! POST /api/convert (multipart "file")
//!   │
//!   ├─ handler   pull the file field, enforce the size cap
//!   ├─ upstream  POST {base}/convert with X-API-Key, read body as text
//!   └─ response  relay JSON, or a normalised error body
//! ```

mod error;
mod handler;
pub mod upstream;

pub use error::ProxyError;
pub use handler::{convert_handler, FILE_FIELD};

use crate::config::ProxyConfig;
use crate::error::Jfif2JpgError;
use axum::extract::DefaultBodyLimit;
use axum::routing::post;
use axum::Router;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

/// Route the convert handler is mounted on.
pub const CONVERT_ROUTE: &str = "/api/convert";

/// Room for multipart boundaries and headers on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state for every request.
pub struct ProxyState {
    pub config: ProxyConfig,
    pub http: reqwest::Client,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Result<Arc<Self>, Jfif2JpgError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Jfif2JpgError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Arc::new(Self { config, http }))
    }
}

/// The proxy's router, ready to be served.
pub fn router(state: Arc<ProxyState>) -> Router {
    let body_limit = state.config.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .route(CONVERT_ROUTE, post(convert_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind `config.bind_addr` and serve until Ctrl+C or SIGTERM.
pub async fn serve(config: ProxyConfig) -> Result<(), Jfif2JpgError> {
    let address = config.bind_addr.clone();
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|e| Jfif2JpgError::BindFailed {
            addr: address.clone(),
            source: e,
        })?;

    let state = ProxyState::new(config)?;
    serve_on(listener, state, shutdown_signal()).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<ProxyState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), Jfif2JpgError> {
    let address = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    info!(
        "Proxy running on {address} (max upload {} bytes, upstream {:?})",
        state.config.max_upload_bytes, state.config.upstream
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Jfif2JpgError::Internal(format!("Server error: {e}")))?;

    info!("Proxy shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                warn!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
