//! Configuration types for the orchestrator and the proxy.
//!
//! Both halves are configured through a struct plus builder, like
//! [`OrchestratorConfig::builder()`] and [`ProxyConfig::builder()`]. The
//! builders clamp or validate values and `build()` reports anything it
//! cannot fix as [`Jfif2JpgError::InvalidConfig`].
//!
//! The upstream credential is deliberately *not* a builder field read once
//! at start-up: with [`UpstreamSource::Env`] the proxy reads
//! `JFIF2JPG_UPSTREAM_URL` and `JFIF2JPG_API_KEY` on every request.

use crate::error::Jfif2JpgError;
use crate::events::EventsCallback;
use std::fmt;

/// Environment variable holding the conversion service base URL.
pub const ENV_UPSTREAM_URL: &str = "JFIF2JPG_UPSTREAM_URL";

/// Environment variable holding the conversion service API key.
pub const ENV_API_KEY: &str = "JFIF2JPG_API_KEY";

/// Base URL used when [`ENV_UPSTREAM_URL`] is unset (local development).
pub const DEFAULT_UPSTREAM_URL: &str = "http://127.0.0.1:8000/api";

/// Name of the archive produced when several results are downloaded at once.
pub const DEFAULT_ARCHIVE_NAME: &str = "converted_images.zip";

/// Upload size cap enforced by the proxy. Default: 10 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

// ── Orchestrator ─────────────────────────────────────────────────────────

/// Configuration for the upload [`crate::orchestrator::Orchestrator`].
///
/// # Example
/// ```rust
/// use jfif2jpg::OrchestratorConfig;
///
/// let config = OrchestratorConfig::builder()
///     .endpoint("http://localhost:3000/api/convert")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct OrchestratorConfig {
    /// Full URL of the proxy's convert route.
    /// Default: `http://127.0.0.1:3000/api/convert`.
    pub endpoint: String,

    /// Per-request timeout in seconds. Default: none.
    ///
    /// Conversions are left to the network stack's own limits unless this
    /// is set.
    pub request_timeout_secs: Option<u64>,

    /// File name of the batch archive. Default: `converted_images.zip`.
    pub archive_name: String,

    /// Receives status changes and notifications.
    pub events: Option<EventsCallback>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:3000/api/convert".to_string(),
            request_timeout_secs: None,
            archive_name: DEFAULT_ARCHIVE_NAME.to_string(),
            events: None,
        }
    }
}

impl fmt::Debug for OrchestratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrchestratorConfig")
            .field("endpoint", &self.endpoint)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("archive_name", &self.archive_name)
            .field("events", &self.events.as_ref().map(|_| "<dyn ConversionEvents>"))
            .finish()
    }
}

impl OrchestratorConfig {
    /// Create a new builder for `OrchestratorConfig`.
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`OrchestratorConfig`].
#[derive(Debug)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.endpoint = url.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs.max(1));
        self
    }

    pub fn archive_name(mut self, name: impl Into<String>) -> Self {
        self.config.archive_name = name.into();
        self
    }

    pub fn events(mut self, events: EventsCallback) -> Self {
        self.config.events = Some(events);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OrchestratorConfig, Jfif2JpgError> {
        let c = &self.config;
        if !is_http_url(&c.endpoint) {
            return Err(Jfif2JpgError::InvalidConfig(format!(
                "endpoint must be an http(s) URL, got '{}'",
                c.endpoint
            )));
        }
        if c.archive_name.is_empty() || c.archive_name.contains(['/', '\\']) {
            return Err(Jfif2JpgError::InvalidConfig(format!(
                "archive name must be a plain file name, got '{}'",
                c.archive_name
            )));
        }
        Ok(self.config)
    }
}

// ── Proxy ────────────────────────────────────────────────────────────────

/// Where the proxy finds the conversion service and its credential.
#[derive(Clone, Default)]
pub enum UpstreamSource {
    /// Read [`ENV_UPSTREAM_URL`] and [`ENV_API_KEY`] on every request. (default)
    #[default]
    Env,
    /// Use this base URL, but read [`ENV_API_KEY`] on every request.
    FixedUrl { base_url: String },
    /// Use these values for every request.
    Fixed {
        base_url: String,
        api_key: Option<String>,
    },
}

fn env_api_key() -> Option<String> {
    std::env::var(ENV_API_KEY).ok().filter(|s| !s.is_empty())
}

impl UpstreamSource {
    /// Resolve the upstream for one request.
    pub fn resolve(&self) -> Upstream {
        match self {
            UpstreamSource::Env => Upstream {
                base_url: std::env::var(ENV_UPSTREAM_URL)
                    .ok()
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_UPSTREAM_URL.to_string()),
                api_key: env_api_key(),
            },
            UpstreamSource::FixedUrl { base_url } => Upstream {
                base_url: base_url.clone(),
                api_key: env_api_key(),
            },
            UpstreamSource::Fixed { base_url, api_key } => Upstream {
                base_url: base_url.clone(),
                api_key: api_key.clone(),
            },
        }
    }
}

impl fmt::Debug for UpstreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamSource::Env => f.write_str("Env"),
            UpstreamSource::FixedUrl { base_url } => f
                .debug_struct("FixedUrl")
                .field("base_url", base_url)
                .finish(),
            UpstreamSource::Fixed { base_url, api_key } => f
                .debug_struct("Fixed")
                .field("base_url", base_url)
                .field("api_key", &api_key.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// A resolved upstream: base URL plus optional credential.
#[derive(Clone)]
pub struct Upstream {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl Upstream {
    /// URL of the upstream convert route.
    pub fn convert_url(&self) -> String {
        format!("{}/convert", self.base_url.trim_end_matches('/'))
    }

    /// First four characters of the key, for logs. Never the whole key.
    pub fn api_key_prefix(&self) -> String {
        match &self.api_key {
            Some(key) => {
                let prefix: String = key.chars().take(4).collect();
                format!("{prefix}…")
            }
            None => "<unset>".to_string(),
        }
    }
}

impl fmt::Debug for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upstream")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key_prefix())
            .finish()
    }
}

/// Configuration for the proxy server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Socket address to listen on. Default: `127.0.0.1:3000`.
    pub bind_addr: String,

    /// Largest accepted request body in bytes. Default: 10 MiB.
    pub max_upload_bytes: usize,

    /// Where the conversion service is. Default: [`UpstreamSource::Env`].
    pub upstream: UpstreamSource,

    /// `Origin` header sent upstream, if the service checks one.
    pub origin: Option<String>,

    /// `User-Agent` header sent upstream.
    pub user_agent: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upstream: UpstreamSource::default(),
            origin: None,
            user_agent: concat!("jfif2jpg-proxy/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ProxyConfig {
    /// Create a new builder for `ProxyConfig`.
    pub fn builder() -> ProxyConfigBuilder {
        ProxyConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ProxyConfig`].
#[derive(Debug)]
pub struct ProxyConfigBuilder {
    config: ProxyConfig,
}

impl ProxyConfigBuilder {
    pub fn bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.bind_addr = addr.into();
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n;
        self
    }

    pub fn upstream(mut self, source: UpstreamSource) -> Self {
        self.config.upstream = source;
        self
    }

    /// Shorthand for a fixed [`UpstreamSource`].
    pub fn fixed_upstream(mut self, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        self.config.upstream = UpstreamSource::Fixed {
            base_url: base_url.into(),
            api_key,
        };
        self
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.config.origin = Some(origin.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ProxyConfig, Jfif2JpgError> {
        let c = &self.config;
        if c.max_upload_bytes == 0 {
            return Err(Jfif2JpgError::InvalidConfig(
                "max upload size must be ≥ 1 byte".into(),
            ));
        }
        if let UpstreamSource::Fixed { base_url, .. } | UpstreamSource::FixedUrl { base_url } =
            &c.upstream
        {
            if !is_http_url(base_url) {
                return Err(Jfif2JpgError::InvalidConfig(format!(
                    "upstream URL must be http(s), got '{base_url}'"
                )));
            }
        }
        Ok(self.config)
    }
}
