//! The upload orchestrator: a queue of files, each converting on its own.
//!
//! ## Concurrency model
//!
//! Every accepted file gets its own `tokio::spawn`ed task; nothing caps how
//! many run at once and completions arrive in any order. All tasks share one
//! queue behind a mutex. The queue is a map keyed by [`ItemId`], and each
//! insertion also gets a *ticket* number. A task only ever touches the item
//! whose id **and** ticket match the ones it was started with, so:
//!
//! * a task whose item was removed (or the queue cleared) finds nothing and
//!   drops its result on the floor;
//! * a task whose item was removed and then re-added (same name and mtime,
//!   so same id) does not write into the newer item.
//!
//! In-flight requests are never aborted; their results are simply ignored.
//!
//! ## Flow per file
//!
//! ```text
//! add_files ──▶ pending ──▶ converting ──▶ done  (result + local copy)
//!                                     └──▶ error (message)
//! ```

use crate::archive::{build_zip, dedupe_names, sanitize_file_name};
use crate::client::{decode_result, DecodedImage, ProxyClient, Transport};
use crate::config::OrchestratorConfig;
use crate::error::{ItemError, Jfif2JpgError};
use crate::events::{ConversionEvents, EventsCallback, Notice, NoopEvents};
use crate::model::{
    ConvertedImage, ItemId, ItemState, ItemStatus, LocalRef, SourceFile, UploadItem,
};
use crate::validate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What [`Orchestrator::add_files`] did with a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddReport {
    /// Ids of the new items, in selection order.
    pub added: Vec<ItemId>,
    /// Files dropped for not being JFIF.
    pub rejected_format: usize,
    /// Files dropped because their name was already queued.
    pub rejected_duplicate: usize,
}

/// Where [`Orchestrator::download_all`] put the results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
    /// Exactly one result, saved as itself.
    Single(PathBuf),
    /// Several results packed into one archive.
    Archive { path: PathBuf, entries: Vec<String> },
}

impl Download {
    pub fn path(&self) -> &Path {
        match self {
            Download::Single(p) => p,
            Download::Archive { path, .. } => path,
        }
    }
}

/// Insertion-ordered map of queue items.
#[derive(Default)]
struct Queue {
    order: Vec<ItemId>,
    items: HashMap<ItemId, UploadItem>,
}

impl Queue {
    fn names(&self) -> impl Iterator<Item = &str> {
        self.items.values().map(UploadItem::name)
    }

    fn insert(&mut self, item: UploadItem) {
        self.order.push(item.id.clone());
        self.items.insert(item.id.clone(), item);
    }

    fn remove(&mut self, id: &ItemId) -> Option<UploadItem> {
        let item = self.items.remove(id)?;
        self.order.retain(|o| o != id);
        Some(item)
    }

    fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.order.clear();
        self.items.clear();
        n
    }

    fn ordered(&self) -> impl Iterator<Item = &UploadItem> {
        self.order.iter().filter_map(|id| self.items.get(id))
    }

    /// The item for `id`, but only if it is still the insertion `ticket` refers to.
    fn live_mut(&mut self, id: &ItemId, ticket: u64) -> Option<&mut UploadItem> {
        self.items.get_mut(id).filter(|item| item.ticket == ticket)
    }
}

struct Shared<T> {
    transport: T,
    config: OrchestratorConfig,
    events: EventsCallback,
    queue: Mutex<Queue>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    next_ticket: AtomicU64,
}

/// Manages the queue of files and their conversions.
///
/// Cheap to clone; clones share the same queue.
pub struct Orchestrator<T: Transport = ProxyClient> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for Orchestrator<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Orchestrator<ProxyClient> {
    /// Orchestrator that talks to the proxy at `config.endpoint`.
    pub fn new(config: OrchestratorConfig) -> Result<Self, Jfif2JpgError> {
        let transport = ProxyClient::new(&config)?;
        Ok(Self::with_transport(transport, config))
    }
}

impl<T: Transport> Orchestrator<T> {
    pub fn with_transport(transport: T, config: OrchestratorConfig) -> Self {
        let events = config
            .events
            .clone()
            .unwrap_or_else(|| Arc::new(NoopEvents) as Arc<dyn ConversionEvents>);

        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                events,
                queue: Mutex::new(Queue::default()),
                tasks: Mutex::new(Vec::new()),
                next_ticket: AtomicU64::new(1),
            }),
        }
    }

    // ── Queue operations ────────────────────────────────────────────────

    /// Validate `candidates`, queue the survivors and start converting them.
    ///
    /// Non-JFIF files and files whose name is already queued are dropped and
    /// reported through [`Notice::Rejected`] / [`Notice::Duplicates`]. Each
    /// new item starts its own conversion immediately.
    ///
    /// # Panics
    /// Must be called from within a Tokio runtime (conversions are spawned).
    pub fn add_files(&self, candidates: Vec<SourceFile>) -> AddReport {
        let shared = &self.shared;
        let submitted = candidates.len();

        let (report, started) = {
            let mut queue = shared.lock_queue();
            let screened = validate::screen(candidates, queue.names());

            let mut added = Vec::with_capacity(screened.accepted.len());
            let mut started = Vec::with_capacity(screened.accepted.len());

            for file in screened.accepted {
                let id = ItemId::for_file(&file);
                let ticket = shared.next_ticket.fetch_add(1, Ordering::Relaxed);

                queue.insert(UploadItem {
                    id: id.clone(),
                    source: file.clone(),
                    preview: None,
                    state: ItemState::Pending,
                    ticket,
                });
                added.push(id.clone());
                started.push((id, ticket, file));
            }

            let report = AddReport {
                added,
                rejected_format: screened.rejected_format,
                rejected_duplicate: screened.rejected_duplicate,
            };
            (report, started)
        };

        info!(
            "Queued {}/{} files ({} not JFIF, {} duplicate)",
            report.added.len(),
            submitted,
            report.rejected_format,
            report.rejected_duplicate
        );
        if report.rejected_format > 0 {
            shared.notify(Notice::Rejected {
                count: report.rejected_format,
            });
        }
        if report.rejected_duplicate > 0 {
            shared.notify(Notice::Duplicates {
                count: report.rejected_duplicate,
            });
        }

        for (id, ticket, file) in started {
            shared
                .events
                .on_status_change(&id, &file.name, ItemStatus::Pending);

            let task_shared = Arc::clone(shared);
            let handle = tokio::spawn(async move {
                task_shared.run_conversion(id, ticket, file).await;
            });

            let mut tasks = shared.lock_tasks();
            tasks.retain(|h| !h.is_finished());
            tasks.push(handle);
        }

        report
    }

    /// Remove one item. Returns `false` if no such item is queued.
    ///
    /// A conversion still running for it keeps running; its result is dropped.
    pub fn remove(&self, id: &ItemId) -> bool {
        let removed = self.shared.lock_queue().remove(id);
        match removed {
            Some(item) => {
                debug!("Removed {} ({})", item.name(), item.status());
                true
            }
            None => false,
        }
    }

    /// Empty the queue regardless of item status. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let n = self.shared.lock_queue().clear();
        debug!("Cleared {} items", n);
        n
    }

    /// Snapshot of every item, in the order they were added.
    pub fn items(&self) -> Vec<UploadItem> {
        self.shared.lock_queue().ordered().cloned().collect()
    }

    /// Snapshot of one item.
    pub fn get(&self, id: &ItemId) -> Option<UploadItem> {
        self.shared.lock_queue().items.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.lock_queue().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether at least one item has finished converting.
    pub fn has_finished(&self) -> bool {
        self.shared
            .lock_queue()
            .items
            .values()
            .any(|i| i.status() == ItemStatus::Done)
    }

    /// Wait until every conversion started so far has completed.
    ///
    /// This waits; it never cancels. Conversions started while waiting are
    /// waited for too.
    pub async fn settle(&self) {
        loop {
            let handles = std::mem::take(&mut *self.shared.lock_tasks());
            if handles.is_empty() {
                break;
            }
            for joined in futures::future::join_all(handles).await {
                if let Err(e) = joined {
                    warn!("Conversion task ended abnormally: {}", e);
                }
            }
        }
    }

    // ── Downloads ───────────────────────────────────────────────────────

    /// Save one finished result into `dest_dir` under its output name.
    pub async fn download_one(
        &self,
        id: &ItemId,
        dest_dir: impl AsRef<Path>,
    ) -> Result<PathBuf, Jfif2JpgError> {
        let item = self.get(id).ok_or_else(|| Jfif2JpgError::UnknownItem {
            id: id.to_string(),
        })?;
        save_result(&item, dest_dir.as_ref()).await
    }

    /// Save every finished result into `dest_dir`.
    ///
    /// * none finished → [`Jfif2JpgError::NothingToDownload`] (and a notice)
    /// * one finished → same as [`Self::download_one`]
    /// * several → one zip archive named by `config.archive_name`
    pub async fn download_all(
        &self,
        dest_dir: impl AsRef<Path>,
    ) -> Result<Download, Jfif2JpgError> {
        let dest_dir = dest_dir.as_ref();
        let finished: Vec<UploadItem> = self
            .items()
            .into_iter()
            .filter(|i| i.status() == ItemStatus::Done)
            .collect();

        match finished.as_slice() {
            [] => {
                self.shared.notify(Notice::NothingToDownload);
                Err(Jfif2JpgError::NothingToDownload)
            }
            [only] => save_result(only, dest_dir).await.map(Download::Single),
            many => {
                let results: Vec<&ConvertedImage> =
                    many.iter().filter_map(UploadItem::result).collect();
                let names: Vec<String> = many
                    .iter()
                    .zip(&results)
                    .map(|(item, r)| sanitize_file_name(&r.file_name, &fallback_name(item)))
                    .collect();
                let names = dedupe_names(&names);
                let entries: Vec<(String, Arc<[u8]>)> = names
                    .iter()
                    .cloned()
                    .zip(results.iter().map(|r| Arc::clone(&r.bytes)))
                    .collect();

                info!("Packaging {} results", entries.len());
                let archive = tokio::task::spawn_blocking(move || build_zip(&entries))
                    .await
                    .map_err(|e| Jfif2JpgError::Internal(format!("Archive task failed: {e}")))??;

                let path = dest_dir.join(&self.shared.config.archive_name);
                write_atomic(&path, &archive).await?;
                info!("Wrote {} ({} bytes)", path.display(), archive.len());

                Ok(Download::Archive {
                    path,
                    entries: names,
                })
            }
        }
    }
}

impl<T: Transport> Shared<T> {
    fn lock_queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, notice: Notice) {
        if notice.is_error() {
            warn!("{}", notice);
        } else {
            info!("{}", notice);
        }
        self.events.on_notice(&notice);
    }

    /// Attach a preview written after insertion, unless the item is gone.
    fn attach_preview(&self, id: &ItemId, ticket: u64, preview: LocalRef) {
        if let Some(item) = self.lock_queue().live_mut(id, ticket) {
            item.preview = Some(preview);
        }
    }

    /// Move the item to `next` if it is still the same insertion and the
    /// transition is legal. Returns whether anything changed.
    fn advance(&self, id: &ItemId, ticket: u64, next: ItemState) -> bool {
        let to = next.status();
        let name = {
            let mut queue = self.lock_queue();
            let Some(item) = queue.live_mut(id, ticket) else {
                debug!("{}: no longer queued, dropping '{}' update", id, to);
                return false;
            };
            let from = item.status();
            if !from.can_advance_to(to) {
                warn!("{}: ignoring illegal transition {} → {}", id, from, to);
                return false;
            }
            item.state = next;
            item.name().to_string()
        };

        self.events.on_status_change(id, &name, to);
        true
    }

    async fn run_conversion(self: Arc<Self>, id: ItemId, ticket: u64, file: SourceFile) {
        if let Some(preview) = write_preview(&file).await {
            self.attach_preview(&id, ticket, preview);
        }
        if !self.advance(&id, ticket, ItemState::Converting) {
            return;
        }
        let name = file.name.clone();

        let outcome = match self.transport.submit(file).await {
            Ok(result) => match decode_result(result) {
                Ok(decoded) => store_result(decoded).await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        match outcome {
            Ok(image) => {
                let output = image.file_name.clone();
                if self.advance(&id, ticket, ItemState::Done(image)) {
                    info!("{} → {}", name, output);
                    self.notify(Notice::Converted { name });
                }
            }
            Err(e) => {
                warn!("{}: conversion failed: {:?}", name, e);
                if self.advance(&id, ticket, ItemState::Error(e.to_string())) {
                    self.notify(Notice::ConversionFailed {
                        name,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

/// Local copy of the source for display. A failed write only costs the preview.
async fn write_preview(file: &SourceFile) -> Option<LocalRef> {
    let bytes = Arc::clone(&file.bytes);
    match tokio::task::spawn_blocking(move || LocalRef::create(&bytes, ".jfif")).await {
        Ok(Ok(preview)) => Some(preview),
        Ok(Err(e)) => {
            warn!("{}: could not write preview: {}", file.name, e);
            None
        }
        Err(e) => {
            warn!("{}: preview task failed: {}", file.name, e);
            None
        }
    }
}

/// Temp-file suffix for a suggested output name: the extension of its final
/// path component, dot included.
fn local_suffix(file_name: &str) -> String {
    Path::new(&sanitize_file_name(file_name, ""))
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Keep the decoded bytes and write a local copy for display.
async fn store_result(decoded: DecodedImage) -> Result<ConvertedImage, ItemError> {
    let bytes: Arc<[u8]> = decoded.bytes.into();
    let suffix = local_suffix(&decoded.file_name);

    let for_disk = Arc::clone(&bytes);
    let location = tokio::task::spawn_blocking(move || LocalRef::create(&for_disk, &suffix))
        .await
        .map_err(|e| ItemError::Decode {
            detail: e.to_string(),
        })?
        .map_err(|e| ItemError::Decode {
            detail: e.to_string(),
        })?;

    Ok(ConvertedImage {
        file_name: decoded.file_name,
        content_type: decoded.content_type,
        bytes,
        location,
    })
}

/// Output name used when the service suggested nothing usable: `<stem>.jpg`.
fn fallback_name(item: &UploadItem) -> String {
    let stem = item
        .name()
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .filter(|s| !s.is_empty())
        .unwrap_or(item.name());
    format!("{stem}.jpg")
}

async fn save_result(item: &UploadItem, dest_dir: &Path) -> Result<PathBuf, Jfif2JpgError> {
    let image = item.result().ok_or_else(|| Jfif2JpgError::NotReady {
        name: item.name().to_string(),
        status: item.status().to_string(),
    })?;

    let path = dest_dir.join(sanitize_file_name(&image.file_name, &fallback_name(item)));
    write_atomic(&path, &image.bytes).await?;
    info!("Saved {}", path.display());
    Ok(path)
}

/// Atomic write: write to a hidden temp file next to `path`, then rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Jfif2JpgError> {
    let write_err = |e: std::io::Error| Jfif2JpgError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
