//! Event-callback trait for queue changes and user notifications.
//!
//! Inject an [`Arc<dyn ConversionEvents>`] via
//! [`crate::config::OrchestratorConfigBuilder::events`] to observe every
//! status transition and every transient notification the orchestrator
//! raises (rejected files, finished or failed conversions, empty downloads).
//!
//! # Example
//!
//! ```rust
//! use jfif2jpg::{ConversionEvents, Notice, OrchestratorConfig};
//! use std::sync::Arc;
//!
//! struct Toasts;
//!
//! impl ConversionEvents for Toasts {
//!     fn on_notice(&self, notice: &Notice) {
//!         eprintln!("{notice}");
//!     }
//! }
//!
//! let config = OrchestratorConfig::builder()
//!     .events(Arc::new(Toasts) as Arc<dyn ConversionEvents>)
//!     .build()
//!     .unwrap();
//! ```

use crate::model::{ItemId, ItemStatus};
use std::fmt;
use std::sync::Arc;

/// A short, user-facing message about something that just happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Files dropped because they are not JFIF.
    Rejected { count: usize },
    /// Files dropped because their name is already queued.
    Duplicates { count: usize },
    /// A conversion finished.
    Converted { name: String },
    /// A conversion failed.
    ConversionFailed { name: String, reason: String },
    /// `download_all` found nothing finished.
    NothingToDownload,
}

impl Notice {
    /// Whether this notice reports a problem.
    pub fn is_error(&self) -> bool {
        !matches!(self, Notice::Converted { .. })
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Rejected { count: 1 } => f.write_str("1 file rejected (only JFIF allowed)"),
            Notice::Rejected { count } => write!(f, "{count} files rejected (only JFIF allowed)"),
            Notice::Duplicates { count: 1 } => f.write_str("File already exists"),
            Notice::Duplicates { count } => write!(f, "{count} files already exist"),
            Notice::Converted { name } => write!(f, "Converted {name} successfully"),
            Notice::ConversionFailed { name, .. } => write!(f, "Failed to convert {name}"),
            Notice::NothingToDownload => f.write_str("No converted files to download"),
        }
    }
}

/// Called by the orchestrator as items move through the queue.
///
/// Conversions run as concurrent tasks, so methods may be called from
/// several threads at once. All methods have no-op defaults.
pub trait ConversionEvents: Send + Sync {
    /// An item entered a new status. Called once per transition, in order
    /// for any single item.
    fn on_status_change(&self, id: &ItemId, name: &str, status: ItemStatus) {
        let _ = (id, name, status);
    }

    /// A transient notification for the user.
    fn on_notice(&self, notice: &Notice) {
        let _ = notice;
    }
}

/// A no-op implementation; the default when nothing is configured.
pub struct NoopEvents;

impl ConversionEvents for NoopEvents {}

/// Convenience alias matching the type stored in [`crate::config::OrchestratorConfig`].
pub type EventsCallback = Arc<dyn ConversionEvents>;
