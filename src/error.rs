//! Error types for the jfif2jpg library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Jfif2JpgError`] — **Fatal** for the operation that returned it (bad
//!   input path, nothing to download, archive could not be written, proxy
//!   could not bind). Returned as `Err(Jfif2JpgError)`.
//!
//! * [`ItemError`] — **Non-fatal**: a single file failed to convert
//!   (transport error, rejected by the proxy, undecodable payload) but every
//!   other file keeps going. Its text is stored on the
//!   [`crate::model::UploadItem`] as the item's error message.
//!
//! Proxy-side failures have their own type, [`crate::proxy::ProxyError`],
//! because they are rendered as HTTP responses rather than returned.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the jfif2jpg library.
///
/// Per-file conversion failures use [`ItemError`] and are stored on the
/// item rather than propagated here.
#[derive(Debug, Error)]
pub enum Jfif2JpgError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// Any other I/O failure while reading an input file.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Queue errors ──────────────────────────────────────────────────────
    /// No item with this id is in the queue.
    #[error("No queued file with id '{id}'")]
    UnknownItem { id: String },

    /// The item exists but has not finished converting.
    #[error("'{name}' is not converted yet (status: {status})")]
    NotReady { name: String, status: String },

    /// `download_all` was called with no finished items.
    #[error("No converted files to download")]
    NothingToDownload,

    // ── Output errors ─────────────────────────────────────────────────────
    /// Building the zip archive failed.
    #[error("Failed to build archive: {0}")]
    ArchiveFailed(String),

    /// Could not create or write a downloaded file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Server errors ─────────────────────────────────────────────────────
    /// The proxy could not bind its listening socket.
    #[error("Failed to bind proxy to '{addr}': {source}\nIs another process using the port?")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single file.
///
/// The `Display` text is what ends up in the item's error message, so it is
/// written for the person looking at the queue.
#[derive(Debug, Clone, Error, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The request never produced a response (connection refused, reset, timeout).
    #[error("Network error: {detail}")]
    Transport { detail: String },

    /// The proxy answered with a non-2xx status.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    /// The proxy answered 2xx but the body is not a conversion result.
    #[error("Malformed response: {detail}")]
    MalformedResponse { detail: String },

    /// The result reported `success: false`.
    #[error("{message}")]
    Unsuccessful { message: String },

    /// The base64 payload could not be decoded or stored.
    #[error("Failed to process converted image")]
    Decode { detail: String },
}
