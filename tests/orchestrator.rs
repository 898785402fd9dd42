//! Behavioural tests for the upload orchestrator.
//!
//! The network is replaced by in-process [`Transport`] fakes so completion
//! order can be controlled: a gate (semaphore with zero permits) holds every
//! conversion until the test releases it.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use jfif2jpg::{
    ConversionData, ConversionEvents, ConversionResult, Download, ItemError, ItemId, ItemStatus,
    Jfif2JpgError, Notice, Orchestrator, OrchestratorConfig, SourceFile, Transport,
};
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_test::{assert_err, assert_ok};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn jfif(name: &str) -> SourceFile {
    SourceFile::new(name, format!("jfif:{name}").into_bytes()).with_last_modified_ms(1_700_000)
}

fn jpg_name(name: &str) -> String {
    let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
    format!("{stem}.jpg")
}

fn ok_result(file_name: &str, payload: &[u8]) -> ConversionResult {
    ConversionResult {
        success: true,
        message: "ok".into(),
        data: ConversionData {
            filename: file_name.into(),
            content_type: "image/jpeg".into(),
            base64_data: STANDARD.encode(payload),
        },
    }
}

/// Answers every file with `<stem>.jpg` containing `jpeg:<name>`, unless a
/// scripted answer exists for that name. Optionally waits on a gate first.
#[derive(Default)]
struct FakeTransport {
    scripted: HashMap<String, Result<ConversionResult, ItemError>>,
    gate: Option<Arc<Semaphore>>,
    entered: AtomicUsize,
}

impl FakeTransport {
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn script(mut self, name: &str, answer: Result<ConversionResult, ItemError>) -> Self {
        self.scripted.insert(name.to_string(), answer);
        self
    }
}

impl Transport for FakeTransport {
    async fn submit(&self, file: SourceFile) -> Result<ConversionResult, ItemError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }
        match self.scripted.get(&file.name) {
            Some(answer) => answer.clone(),
            None => Ok(ok_result(
                &jpg_name(&file.name),
                format!("jpeg:{}", file.name).as_bytes(),
            )),
        }
    }
}

/// Hands out a different answer per call, in call order.
struct SequencedTransport {
    gate: Arc<Semaphore>,
    calls: AtomicUsize,
    answers: Vec<ConversionResult>,
}

impl Transport for SequencedTransport {
    async fn submit(&self, _file: SourceFile) -> Result<ConversionResult, ItemError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await.expect("gate closed").forget();
        Ok(self.answers[n].clone())
    }
}

#[derive(Default)]
struct Recorder {
    statuses: Mutex<Vec<(String, ItemStatus)>>,
    notices: Mutex<Vec<Notice>>,
}

impl Recorder {
    fn statuses_for(&self, name: &str) -> Vec<ItemStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, s)| *s)
            .collect()
    }

    fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

impl ConversionEvents for Recorder {
    fn on_status_change(&self, _id: &ItemId, name: &str, status: ItemStatus) {
        self.statuses.lock().unwrap().push((name.to_string(), status));
    }

    fn on_notice(&self, notice: &Notice) {
        self.notices.lock().unwrap().push(notice.clone());
    }
}

fn orchestrator<T: Transport>(transport: T) -> (Orchestrator<T>, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let config = OrchestratorConfig::builder()
        .events(Arc::clone(&recorder) as Arc<dyn ConversionEvents>)
        .build()
        .unwrap();
    (Orchestrator::with_transport(transport, config), recorder)
}

/// Poll `cond` until it holds or two seconds pass.
async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

fn status_of<T: Transport>(queue: &Orchestrator<T>, name: &str) -> Option<ItemStatus> {
    queue
        .items()
        .into_iter()
        .find(|i| i.name() == name)
        .map(|i| i.status())
}

// ── add_files ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejects_non_jfif_with_exact_count() {
    let (queue, rec) = orchestrator(FakeTransport::default());

    let report = queue.add_files(vec![
        jfif("a.jfif"),
        SourceFile::new("b.png", vec![1u8]),
        SourceFile::new("c.jpg", vec![1u8]),
    ]);

    assert_eq!(report.added.len(), 1);
    assert_eq!(report.rejected_format, 2);
    assert_eq!(report.rejected_duplicate, 0);
    assert_eq!(queue.len(), 1);
    assert!(rec.notices().contains(&Notice::Rejected { count: 2 }));

    queue.settle().await;
}

#[tokio::test]
async fn accepts_declared_media_type() {
    let (queue, _rec) = orchestrator(FakeTransport::default());
    let report = queue.add_files(vec![
        SourceFile::new("from-clipboard", vec![1u8]).with_media_type("image/jfif")
    ]);
    assert_eq!(report.added.len(), 1);
    queue.settle().await;
}

#[tokio::test]
async fn duplicate_name_adds_nothing() {
    let (queue, rec) = orchestrator(FakeTransport::default());
    queue.add_files(vec![jfif("a.jfif")]);
    queue.settle().await;

    let again = jfif("a.jfif").with_last_modified_ms(42);
    let report = queue.add_files(vec![again]);

    assert!(report.added.is_empty());
    assert_eq!(report.rejected_duplicate, 1);
    assert_eq!(queue.len(), 1);
    assert!(rec.notices().contains(&Notice::Duplicates { count: 1 }));
    // The existing item was not restarted.
    assert_eq!(
        rec.statuses_for("a.jfif"),
        [ItemStatus::Pending, ItemStatus::Converting, ItemStatus::Done]
    );
}

#[tokio::test]
async fn items_keep_selection_order() {
    let (queue, _rec) = orchestrator(FakeTransport::default());
    queue.add_files(vec![jfif("z.jfif"), jfif("m.jfif"), jfif("a.jfif")]);
    queue.settle().await;

    let names: Vec<_> = queue.items().iter().map(|i| i.name().to_string()).collect();
    assert_eq!(names, ["z.jfif", "m.jfif", "a.jfif"]);
}

#[tokio::test]
async fn previews_are_local_copies_of_the_source() {
    let (queue, _rec) = orchestrator(FakeTransport::default());
    let report = queue.add_files(vec![jfif("a.jfif")]);
    queue.settle().await;

    let item = queue.get(&report.added[0]).unwrap();
    let preview = item.preview_path().expect("preview written");
    assert_eq!(std::fs::read(preview).unwrap(), b"jfif:a.jfif");
}

#[tokio::test]
async fn preview_is_in_place_before_the_request_goes_out() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(FakeTransport::gated(Arc::clone(&gate)));
    let (queue, _rec) = orchestrator(ArcTransport(Arc::clone(&transport)));

    let report = queue.add_files(vec![jfif("a.jfif")]);
    wait_until(|| transport.entered.load(Ordering::SeqCst) == 1).await;

    let item = queue.get(&report.added[0]).unwrap();
    assert_eq!(item.status(), ItemStatus::Converting);
    let preview = item.preview_path().expect("preview written");
    assert_eq!(std::fs::read(preview).unwrap(), b"jfif:a.jfif");

    gate.add_permits(1);
    queue.settle().await;
}

// ── convert ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn every_item_walks_pending_converting_then_terminal() {
    let transport = FakeTransport::default().script(
        "bad.jfif",
        Err(ItemError::Rejected {
            status: 502,
            message: "Invalid response format".into(),
        }),
    );
    let (queue, rec) = orchestrator(transport);

    queue.add_files(vec![jfif("good.jfif"), jfif("bad.jfif")]);
    queue.settle().await;

    assert_eq!(
        rec.statuses_for("good.jfif"),
        [ItemStatus::Pending, ItemStatus::Converting, ItemStatus::Done]
    );
    assert_eq!(
        rec.statuses_for("bad.jfif"),
        [ItemStatus::Pending, ItemStatus::Converting, ItemStatus::Error]
    );
}

#[tokio::test]
async fn failure_is_contained_to_its_item() {
    let transport = FakeTransport::default().script(
        "bad.jfif",
        Err(ItemError::Transport {
            detail: "connection refused".into(),
        }),
    );
    let (queue, rec) = orchestrator(transport);

    queue.add_files(vec![jfif("bad.jfif"), jfif("good.jfif")]);
    queue.settle().await;

    let items = queue.items();
    let bad = items.iter().find(|i| i.name() == "bad.jfif").unwrap();
    let good = items.iter().find(|i| i.name() == "good.jfif").unwrap();

    assert_eq!(bad.status(), ItemStatus::Error);
    assert_eq!(bad.error_message(), Some("Network error: connection refused"));
    assert!(bad.result().is_none());

    assert_eq!(good.status(), ItemStatus::Done);
    assert_eq!(good.result_file_name(), Some("good.jpg"));
    assert!(good.error_message().is_none());
    let local = good.result_path().unwrap();
    assert_eq!(std::fs::read(local).unwrap(), b"jpeg:good.jfif");

    let notices = rec.notices();
    assert!(notices.contains(&Notice::ConversionFailed {
        name: "bad.jfif".into(),
        reason: "Network error: connection refused".into(),
    }));
    assert!(notices.contains(&Notice::Converted {
        name: "good.jfif".into()
    }));
}

#[tokio::test]
async fn malformed_base64_fails_the_item() {
    let mut broken = ok_result("x.jpg", b"");
    broken.data.base64_data = "%%% not base64 %%%".into();
    let transport = FakeTransport::default().script("x.jfif", Ok(broken));
    let (queue, _rec) = orchestrator(transport);

    queue.add_files(vec![jfif("x.jfif")]);
    queue.settle().await;

    let item = &queue.items()[0];
    assert_eq!(item.status(), ItemStatus::Error);
    assert_eq!(item.error_message(), Some("Failed to process converted image"));
}

#[tokio::test]
async fn suggested_name_with_dotted_directory_still_converts() {
    let transport =
        FakeTransport::default().script("x.jfif", Ok(ok_result("out.v2/photo", b"img")));
    let (queue, _rec) = orchestrator(transport);

    let report = queue.add_files(vec![jfif("x.jfif")]);
    queue.settle().await;

    let item = queue.get(&report.added[0]).unwrap();
    assert_eq!(item.status(), ItemStatus::Done, "{:?}", item.error_message());
    assert_eq!(item.result_file_name(), Some("out.v2/photo"));
    assert_eq!(std::fs::read(item.result_path().unwrap()).unwrap(), b"img");

    let dir = tempfile::tempdir().unwrap();
    let saved = assert_ok!(queue.download_one(&report.added[0], dir.path()).await);
    assert_eq!(saved, dir.path().join("photo"));
}

#[tokio::test]
async fn conversions_run_concurrently() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(FakeTransport::gated(Arc::clone(&gate)));
    let (queue, _rec) = orchestrator(ArcTransport(Arc::clone(&transport)));

    let files: Vec<_> = (0..5).map(|i| jfif(&format!("{i}.jfif"))).collect();
    queue.add_files(files);

    // All five are inside the transport before any is allowed to finish.
    wait_until(|| transport.entered.load(Ordering::SeqCst) == 5).await;
    assert!(queue
        .items()
        .iter()
        .all(|i| i.status() == ItemStatus::Converting));

    gate.add_permits(5);
    queue.settle().await;
    assert!(queue.items().iter().all(|i| i.status() == ItemStatus::Done));
}

/// Lets a test keep a handle on the transport it gave away.
struct ArcTransport(Arc<FakeTransport>);

impl Transport for ArcTransport {
    async fn submit(&self, file: SourceFile) -> Result<ConversionResult, ItemError> {
        self.0.submit(file).await
    }
}

// ── remove / clear ───────────────────────────────────────────────────────────

#[tokio::test]
async fn removed_item_is_not_brought_back_by_late_result() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(FakeTransport::gated(Arc::clone(&gate)));
    let (queue, rec) = orchestrator(ArcTransport(Arc::clone(&transport)));

    let report = queue.add_files(vec![jfif("a.jfif"), jfif("b.jfif")]);
    wait_until(|| transport.entered.load(Ordering::SeqCst) == 2).await;

    assert!(queue.remove(&report.added[0]));
    assert!(!queue.remove(&report.added[0]), "second remove is a no-op");

    gate.add_permits(2);
    queue.settle().await;

    let names: Vec<_> = queue.items().iter().map(|i| i.name().to_string()).collect();
    assert_eq!(names, ["b.jfif"]);
    assert_eq!(status_of(&queue, "b.jfif"), Some(ItemStatus::Done));
    assert!(!rec.notices().contains(&Notice::Converted {
        name: "a.jfif".into()
    }));
    assert_eq!(
        rec.statuses_for("a.jfif"),
        [ItemStatus::Pending, ItemStatus::Converting]
    );
}

#[tokio::test]
async fn clear_empties_queue_and_drops_in_flight_results() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(FakeTransport::gated(Arc::clone(&gate)));
    let (queue, _rec) = orchestrator(ArcTransport(Arc::clone(&transport)));

    queue.add_files(vec![jfif("a.jfif"), jfif("b.jfif"), jfif("c.jfif")]);
    wait_until(|| transport.entered.load(Ordering::SeqCst) == 3).await;

    assert_eq!(queue.clear(), 3);
    assert!(queue.is_empty());

    gate.add_permits(3);
    queue.settle().await;
    assert!(queue.is_empty());
}

#[tokio::test]
async fn readded_file_ignores_result_of_its_earlier_insertion() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = SequencedTransport {
        gate: Arc::clone(&gate),
        calls: AtomicUsize::new(0),
        answers: vec![ok_result("old.jpg", b"old"), ok_result("new.jpg", b"new")],
    };
    let (queue, _rec) = orchestrator(transport);

    let first = queue.add_files(vec![jfif("a.jfif")]);
    wait_until(|| status_of(&queue, "a.jfif") == Some(ItemStatus::Converting)).await;

    queue.clear();
    let second = queue.add_files(vec![jfif("a.jfif")]);
    assert_eq!(first.added, second.added, "same name and mtime give the same id");
    wait_until(|| status_of(&queue, "a.jfif") == Some(ItemStatus::Converting)).await;

    gate.add_permits(2);
    queue.settle().await;

    let item = &queue.items()[0];
    assert_eq!(item.status(), ItemStatus::Done);
    assert_eq!(item.result_file_name(), Some("new.jpg"));
    assert_eq!(&*item.result().unwrap().bytes, b"new");
}

// ── downloads ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn download_all_with_nothing_finished_is_an_error() {
    let transport = FakeTransport::default().script(
        "a.jfif",
        Err(ItemError::Rejected {
            status: 500,
            message: "Internal server error".into(),
        }),
    );
    let (queue, rec) = orchestrator(transport);
    queue.add_files(vec![jfif("a.jfif")]);
    queue.settle().await;

    let dir = tempfile::tempdir().unwrap();
    let err = assert_err!(queue.download_all(dir.path()).await);
    assert!(matches!(err, Jfif2JpgError::NothingToDownload));
    assert!(rec.notices().contains(&Notice::NothingToDownload));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn download_all_with_one_result_matches_download_one() {
    let (queue, _rec) = orchestrator(FakeTransport::default());
    let report = queue.add_files(vec![jfif("a.jfif")]);
    queue.settle().await;

    let all_dir = tempfile::tempdir().unwrap();
    let one_dir = tempfile::tempdir().unwrap();

    let all = assert_ok!(queue.download_all(all_dir.path()).await);
    let one = assert_ok!(queue.download_one(&report.added[0], one_dir.path()).await);

    let Download::Single(all_path) = &all else {
        panic!("expected a single file, got {all:?}");
    };
    assert_eq!(all_path.file_name(), one.file_name());
    assert_eq!(all_path.file_name().unwrap(), "a.jpg");
    assert_eq!(
        std::fs::read(all_path).unwrap(),
        std::fs::read(&one).unwrap()
    );
    assert_eq!(std::fs::read_dir(all_dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn download_all_with_several_results_builds_one_archive() {
    let transport = FakeTransport::default().script(
        "broken.jfif",
        Err(ItemError::Transport {
            detail: "reset".into(),
        }),
    );
    let (queue, _rec) = orchestrator(transport);
    queue.add_files(vec![
        jfif("a.jfif"),
        jfif("broken.jfif"),
        jfif("b.jfif"),
        jfif("c.jfif"),
    ]);
    queue.settle().await;

    let dir = tempfile::tempdir().unwrap();
    let saved = assert_ok!(queue.download_all(dir.path()).await);

    let Download::Archive { path, entries } = &saved else {
        panic!("expected an archive, got {saved:?}");
    };
    assert_eq!(path.file_name().unwrap(), "converted_images.zip");
    assert_eq!(entries, &["a.jpg", "b.jpg", "c.jpg"]);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

    let bytes = std::fs::read(path).unwrap();
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 3);
    for name in ["a", "b", "c"] {
        let mut content = String::new();
        archive
            .by_name(&format!("{name}.jpg"))
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, format!("jpeg:{name}.jfif"));
    }
}

#[tokio::test]
async fn archive_entries_with_same_output_name_are_kept_apart() {
    let transport = FakeTransport::default()
        .script("one.jfif", Ok(ok_result("photo.jpg", b"1")))
        .script("two.jfif", Ok(ok_result("nested/photo.jpg", b"2")));
    let (queue, _rec) = orchestrator(transport);
    queue.add_files(vec![jfif("one.jfif"), jfif("two.jfif")]);
    queue.settle().await;

    let dir = tempfile::tempdir().unwrap();
    let saved = assert_ok!(queue.download_all(dir.path()).await);
    let Download::Archive { entries, .. } = saved else {
        panic!("expected an archive");
    };
    assert_eq!(entries, ["photo.jpg", "photo (1).jpg"]);
}

#[tokio::test]
async fn download_one_needs_a_finished_item() {
    let gate = Arc::new(Semaphore::new(0));
    let (queue, _rec) = orchestrator(FakeTransport::gated(Arc::clone(&gate)));
    let report = queue.add_files(vec![jfif("a.jfif")]);
    let dir = tempfile::tempdir().unwrap();

    let err = assert_err!(queue.download_one(&report.added[0], dir.path()).await);
    assert!(matches!(err, Jfif2JpgError::NotReady { .. }), "got {err:?}");

    let err = assert_err!(queue.download_one(&ItemId::from("nope-0"), dir.path()).await);
    assert!(matches!(err, Jfif2JpgError::UnknownItem { .. }), "got {err:?}");

    gate.add_permits(1);
    queue.settle().await;
    assert_ok!(queue.download_one(&report.added[0], dir.path()).await);
}

#[tokio::test]
async fn has_finished_tracks_successful_results_only() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(
        FakeTransport::gated(Arc::clone(&gate)).script(
            "bad.jfif",
            Err(ItemError::Transport {
                detail: "reset".into(),
            }),
        ),
    );
    let (queue, _rec) = orchestrator(ArcTransport(Arc::clone(&transport)));
    assert!(!queue.has_finished());

    queue.add_files(vec![jfif("bad.jfif")]);
    gate.add_permits(1);
    queue.settle().await;
    assert_eq!(status_of(&queue, "bad.jfif"), Some(ItemStatus::Error));
    assert!(!queue.has_finished(), "a failed item is not a result");

    queue.add_files(vec![jfif("good.jfif")]);
    wait_until(|| transport.entered.load(Ordering::SeqCst) == 2).await;
    assert!(!queue.has_finished());

    gate.add_permits(1);
    queue.settle().await;
    assert!(queue.has_finished());
}
