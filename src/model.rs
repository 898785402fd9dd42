//! Data model: source files, queue items and the conversion wire payload.
//!
//! An [`UploadItem`] is one row in the orchestrator's queue. Its
//! [`ItemState`] carries the result or the error message inside the variant,
//! so "result present only when done" and "error present only when failed"
//! hold by construction instead of by convention.

use crate::error::Jfif2JpgError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tempfile::TempPath;

// ── Source files ─────────────────────────────────────────────────────────

/// A file selected by the user: its name, bytes and optional metadata.
///
/// Cloning is cheap; the bytes are shared.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// File name as selected (no directory component).
    pub name: String,
    /// Declared media type, if the host knows one (e.g. `image/jfif`).
    pub media_type: Option<String>,
    /// Last-modified time in milliseconds since the Unix epoch.
    pub last_modified_ms: u64,
    /// Raw file contents.
    pub bytes: Arc<[u8]>,
}

impl SourceFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            media_type: None,
            last_modified_ms: 0,
            bytes: bytes.into(),
        }
    }

    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    pub fn with_last_modified_ms(mut self, ms: u64) -> Self {
        self.last_modified_ms = ms;
        self
    }

    /// Read a file from disk, taking its name and modification time from the
    /// file system.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, Jfif2JpgError> {
        let path = path.as_ref();
        let read_err = |e: std::io::Error| match e.kind() {
            std::io::ErrorKind::NotFound => Jfif2JpgError::FileNotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => Jfif2JpgError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => Jfif2JpgError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            },
        };

        let metadata = tokio::fs::metadata(path).await.map_err(read_err)?;
        let bytes = tokio::fs::read(path).await.map_err(read_err)?;

        let last_modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Jfif2JpgError::FileNotFound {
                path: path.to_path_buf(),
            })?;

        Ok(Self {
            name,
            media_type: None,
            last_modified_ms,
            bytes: bytes.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for SourceFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFile")
            .field("name", &self.name)
            .field("media_type", &self.media_type)
            .field("last_modified_ms", &self.last_modified_ms)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

// ── Identity ─────────────────────────────────────────────────────────────

/// Queue key: file name plus last-modified timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

impl ItemId {
    pub fn for_file(file: &SourceFile) -> Self {
        Self(format!("{}-{}", file.name, file.last_modified_ms))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// ── Local references ─────────────────────────────────────────────────────

/// A temporary on-disk copy of some bytes that a UI can point at.
///
/// The file is deleted when the last clone is dropped, which is what
/// happens to previews and results when their item leaves the queue.
#[derive(Clone)]
pub struct LocalRef(Arc<TempPath>);

impl LocalRef {
    /// Write `bytes` to a fresh temp file whose name ends in `suffix`.
    pub fn create(bytes: &[u8], suffix: &str) -> std::io::Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("jfif2jpg-")
            .suffix(suffix)
            .tempfile()?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(Self(Arc::new(file.into_temp_path())))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Debug for LocalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalRef").field(&self.path()).finish()
    }
}

// ── Status ───────────────────────────────────────────────────────────────

/// Where an item is in its conversion.
///
/// Transitions only move forward: `pending → converting → done | error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Converting,
    Done,
    Error,
}

impl ItemStatus {
    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: ItemStatus) -> bool {
        matches!(
            (self, next),
            (ItemStatus::Pending, ItemStatus::Converting)
                | (ItemStatus::Converting, ItemStatus::Done)
                | (ItemStatus::Converting, ItemStatus::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Error)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Converting => "converting",
            ItemStatus::Done => "done",
            ItemStatus::Error => "error",
        })
    }
}

/// A finished conversion: the decoded image and a local copy of it.
#[derive(Debug, Clone)]
pub struct ConvertedImage {
    /// Output file name suggested by the conversion service.
    pub file_name: String,
    /// Media type reported by the conversion service.
    pub content_type: String,
    /// Decoded image bytes.
    pub bytes: Arc<[u8]>,
    /// Temp-file copy for display.
    pub location: LocalRef,
}

/// Item state with its payload.
#[derive(Debug, Clone)]
pub enum ItemState {
    Pending,
    Converting,
    Done(ConvertedImage),
    Error(String),
}

impl ItemState {
    pub fn status(&self) -> ItemStatus {
        match self {
            ItemState::Pending => ItemStatus::Pending,
            ItemState::Converting => ItemStatus::Converting,
            ItemState::Done(_) => ItemStatus::Done,
            ItemState::Error(_) => ItemStatus::Error,
        }
    }
}

// ── Queue item ───────────────────────────────────────────────────────────

/// One file in the orchestrator's queue.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: ItemId,
    pub source: SourceFile,
    /// Temp-file copy of the original. Written by the item's own task just
    /// before it starts converting, so it can be absent while `Pending`.
    pub preview: Option<LocalRef>,
    pub state: ItemState,
    /// Distinguishes this insertion from an earlier one with the same id.
    pub(crate) ticket: u64,
}

impl UploadItem {
    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn status(&self) -> ItemStatus {
        self.state.status()
    }

    pub fn preview_path(&self) -> Option<&Path> {
        self.preview.as_ref().map(LocalRef::path)
    }

    pub fn result(&self) -> Option<&ConvertedImage> {
        match &self.state {
            ItemState::Done(image) => Some(image),
            _ => None,
        }
    }

    pub fn result_path(&self) -> Option<PathBuf> {
        self.result().map(|r| r.location.path().to_path_buf())
    }

    pub fn result_file_name(&self) -> Option<&str> {
        self.result().map(|r| r.file_name.as_str())
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            ItemState::Error(msg) => Some(msg),
            _ => None,
        }
    }
}

// ── Wire payload ─────────────────────────────────────────────────────────

/// Body returned by the conversion service and relayed by the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub success: bool,
    #[serde(default)]
    pub message: String,
    /// Absent from failure replies.
    #[serde(default)]
    pub data: ConversionData,
}

/// The converted file inside a [`ConversionResult`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionData {
    pub filename: String,
    pub content_type: String,
    pub base64_data: String,
}
