//! # jfif2jpg
//!
//! Convert JFIF images to JPEG through a remote conversion service.
//!
//! The crate has two halves that meet over HTTP:
//!
//! * the **proxy** ([`proxy`]) — an axum route, `POST /api/convert`, that
//!   takes one uploaded file, forwards it to the external conversion service
//!   with a server-held API key, and relays the JSON answer;
//! * the **orchestrator** ([`Orchestrator`]) — a client-side queue that
//!   validates selected files, converts each one concurrently through the
//!   proxy, tracks per-file status and saves results singly or as one zip.
//!
//! The image decoding itself happens in the external service; nothing here
//! touches pixels.
//!
//! ## Flow
//!
//! ```text
//! files
//!  │
//!  ├─ 1. Validate  .jfif / image/jfif only, no duplicate names
//!  ├─ 2. Queue     one UploadItem per file, status = pending
//!  ├─ 3. Convert   one task per file → proxy → conversion service
//!  ├─ 4. Decode    base64 payload → bytes + local copy, status = done | error
//!  └─ 5. Download  one file, or converted_images.zip for several
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jfif2jpg::{Orchestrator, OrchestratorConfig, SourceFile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = OrchestratorConfig::builder()
//!         .endpoint("http://localhost:3000/api/convert")
//!         .build()?;
//!     let queue = Orchestrator::new(config)?;
//!
//!     let file = SourceFile::from_path("holiday.jfif").await?;
//!     let report = queue.add_files(vec![file]);
//!     eprintln!("queued {}", report.added.len());
//!
//!     queue.settle().await;
//!     let saved = queue.download_all("out").await?;
//!     println!("{}", saved.path().display());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `jfif2jpg` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod proxy;
pub mod validate;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use client::{ProxyClient, Transport};
pub use config::{
    OrchestratorConfig, OrchestratorConfigBuilder, ProxyConfig, ProxyConfigBuilder, UpstreamSource,
};
pub use error::{ItemError, Jfif2JpgError};
pub use events::{ConversionEvents, EventsCallback, Notice, NoopEvents};
pub use model::{
    ConversionData, ConversionResult, ConvertedImage, ItemId, ItemState, ItemStatus, LocalRef,
    SourceFile, UploadItem,
};
pub use orchestrator::{AddReport, Download, Orchestrator};
pub use proxy::{ProxyError, ProxyState};
