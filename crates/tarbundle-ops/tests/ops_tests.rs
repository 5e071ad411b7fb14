use std::fs;
use std::path::{Path, PathBuf};

use tarbundle_core::{Category, ErrorKind, FilterMode, OperationKind};
use tarbundle_ops::{
    ArchiveConfig, ArchiveError, Archiver, CommitSummary, CompressionLevel, ModificationOutcome,
    ModificationRequest, ModifyEvent,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

struct Fixture {
    source: TempDir,
    out: TempDir,
}

impl Fixture {
    fn new(files: &[(&str, &str)]) -> Self {
        let source = TempDir::new().unwrap();
        for (rel, contents) in files {
            let path = source.path().join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, contents).unwrap();
        }
        Self {
            source,
            out: TempDir::new().unwrap(),
        }
    }

    fn output(&self) -> PathBuf {
        self.out.path().join("bundle.tar.gz")
    }

    fn config(&self) -> ArchiveConfig {
        ArchiveConfig::new(self.source.path(), self.output())
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.source.path().join(rel)
    }
}

async fn drain(
    mut rx: mpsc::Receiver<ModifyEvent>,
) -> (Vec<ModificationOutcome>, Result<CommitSummary, ArchiveError>) {
    let mut outcomes = Vec::new();
    let mut terminal = None;
    while let Some(event) = rx.recv().await {
        match event {
            ModifyEvent::Outcome(outcome) => {
                assert!(terminal.is_none(), "outcome after terminal event");
                outcomes.push(outcome);
            }
            ModifyEvent::Committed(summary) => terminal = Some(Ok(summary)),
            ModifyEvent::Aborted(err) => terminal = Some(Err(err)),
        }
    }
    (outcomes, terminal.expect("no terminal event"))
}

async fn sorted_names(archiver: &Archiver) -> Vec<String> {
    let mut names = archiver.list_files().await.unwrap();
    names.sort();
    names
}

fn temp_files(dir: &Path) -> Vec<PathBuf> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|e| e == "tmp"))
        .collect()
}

#[tokio::test]
async fn test_photo_archive_concrete_tree() {
    let fixture = Fixture::new(&[
        ("images/a.jpg", "abc"),
        ("images/b.png", "def"),
        ("videos/c.mp4", "ghi"),
        ("docs/d.txt", "jkl"),
    ]);
    let mut config = fixture.config();
    config.filter_mode = FilterMode::Photos;
    let archiver = Archiver::new(config);

    let summary = archiver.archive().await.unwrap();

    assert_eq!(summary.files_written, 2);
    assert_eq!(sorted_names(&archiver).await, vec!["a.jpg", "b.png"]);
    for name in ["a.jpg", "b.png"] {
        let info = archiver.get_file_info(name).await.unwrap();
        assert_eq!(info.size, 3);
        assert_eq!(info.mode, tarbundle_ops::FRESH_ENTRY_MODE);
    }

    let state = archiver.finish();
    assert_eq!(state.files_processed, 2);
    assert_eq!(state.total_bytes, 6);
    assert_eq!(state.category_counts[&Category::Photo].len(), 2);
    assert!(state.is_finished());
}

#[tokio::test]
async fn test_non_recursive_archive() {
    let fixture = Fixture::new(&[("top.jpg", "1"), ("nested/deep.jpg", "2")]);
    let mut config = fixture.config();
    config.recursive = false;
    let archiver = Archiver::new(config);

    archiver.archive().await.unwrap();
    assert_eq!(sorted_names(&archiver).await, vec!["top.jpg"]);
}

#[tokio::test]
async fn test_same_base_name_collapses() {
    let fixture = Fixture::new(&[("one/a.jpg", "1"), ("two/a.jpg", "22")]);
    let archiver = Archiver::new(fixture.config());

    let summary = archiver.archive().await.unwrap();

    assert_eq!(summary.files_written, 2);
    assert_eq!(archiver.list_files().await.unwrap(), vec!["a.jpg"]);
}

#[tokio::test]
async fn test_archive_of_missing_source_fails() {
    let fixture = Fixture::new(&[]);
    let config = ArchiveConfig::new(fixture.source.path().join("nope"), fixture.output());
    let err = Archiver::new(config).archive().await.unwrap_err();
    assert!(matches!(err, ArchiveError::Scan(_)));
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[tokio::test]
async fn test_remove_and_add_in_one_batch() {
    let fixture = Fixture::new(&[("x", "1"), ("y", "22")]);
    let archiver = Archiver::new(fixture.config());
    archiver.archive().await.unwrap();

    let extra = TempDir::new().unwrap();
    let z = extra.path().join("z");
    fs::write(&z, "333").unwrap();

    let rx = archiver
        .modify(
            vec![ModificationRequest::remove("x"), ModificationRequest::add(&z)],
            CompressionLevel::Default,
        )
        .unwrap();
    let (outcomes, committed) = drain(rx).await;

    let summary = committed.unwrap();
    assert_eq!(summary.entries_dropped, 1);
    assert_eq!(summary.entries_copied, 1);
    assert_eq!(summary.entries_written, 1);

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.succeeded));
    assert_eq!(outcomes[0].operation, OperationKind::Remove);
    assert_eq!(outcomes[1].operation, OperationKind::Add);
    assert_eq!(outcomes[1].name, "z");

    assert_eq!(sorted_names(&archiver).await, vec!["y", "z"]);
    assert_eq!(archiver.get_file_info("z").await.unwrap().size, 3);
    assert!(temp_files(fixture.out.path()).is_empty());
}

#[tokio::test]
async fn test_not_modifiable_leaves_archive_untouched() {
    let fixture = Fixture::new(&[("x", "1")]);
    Archiver::new(fixture.config()).archive().await.unwrap();
    let before = fs::read(fixture.output()).unwrap();

    let mut config = fixture.config();
    config.modifiable = false;
    let archiver = Archiver::new(config);

    let err = archiver
        .modify(
            vec![ModificationRequest::add(fixture.path("x"))],
            CompressionLevel::Default,
        )
        .unwrap_err();
    assert!(matches!(err, ArchiveError::NotModifiable { .. }));

    let report = archiver
        .batch_remove(vec!["x".into()], 0, CompressionLevel::Default)
        .await;
    assert_eq!(report.failed_count, 1);
    assert_eq!(
        report.outcomes[0].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::NotModifiable)
    );

    assert_eq!(fs::read(fixture.output()).unwrap(), before);
}

#[tokio::test]
async fn test_update_of_absent_name() {
    let fixture = Fixture::new(&[("x", "1"), ("w", "4444"), ("x.v2", "55555")]);
    let archiver = Archiver::new(fixture.config());
    let seeded = archiver
        .modify(
            vec![ModificationRequest::add(fixture.path("x"))],
            CompressionLevel::Fast,
        )
        .unwrap();
    drain(seeded).await.1.unwrap();

    let rx = archiver
        .modify(
            vec![
                ModificationRequest::update("missing", fixture.path("x.v2")),
                ModificationRequest::add(fixture.path("w")),
            ],
            CompressionLevel::Best,
        )
        .unwrap();
    let (outcomes, committed) = drain(rx).await;

    assert!(committed.is_ok());
    assert!(!outcomes[0].succeeded);
    assert_eq!(
        outcomes[0].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::EntryNotFound)
    );
    assert!(outcomes[1].succeeded);
    assert_eq!(sorted_names(&archiver).await, vec!["w", "x"]);
}

#[tokio::test]
async fn test_update_replaces_entry_in_place() {
    let fixture = Fixture::new(&[("a", "1"), ("b", "22"), ("c", "333"), ("b.new", "4444")]);
    let archiver = Archiver::new(fixture.config());
    archiver
        .bulk_modify(
            vec![
                ModificationRequest::add(fixture.path("a")),
                ModificationRequest::add(fixture.path("b")),
                ModificationRequest::add(fixture.path("c")),
            ],
            0,
            CompressionLevel::Default,
        )
        .await;

    let rx = archiver
        .modify(
            vec![ModificationRequest::update("b", fixture.path("b.new"))],
            CompressionLevel::Default,
        )
        .unwrap();
    let (outcomes, committed) = drain(rx).await;

    assert!(outcomes[0].succeeded);
    assert_eq!(committed.unwrap().entries_written, 1);
    assert_eq!(archiver.list_files().await.unwrap(), vec!["a", "b.new", "c"]);
    assert_eq!(archiver.get_file_info("b.new").await.unwrap().size, 4);
}

#[tokio::test]
async fn test_add_then_remove_restores_names() {
    let fixture = Fixture::new(&[("x", "1"), ("y", "22")]);
    let archiver = Archiver::new(fixture.config());
    archiver.archive().await.unwrap();
    let before = sorted_names(&archiver).await;

    let extra = TempDir::new().unwrap();
    let n = extra.path().join("n.mp4");
    fs::write(&n, "video").unwrap();

    let added = archiver
        .batch_add(vec![n.clone()], 10, CompressionLevel::Fast)
        .await;
    assert!(added.is_success());
    assert!(sorted_names(&archiver).await.contains(&"n.mp4".to_string()));

    let removed = archiver
        .batch_remove(
            vec![n.to_string_lossy().into_owned()],
            10,
            CompressionLevel::Fast,
        )
        .await;
    assert!(removed.is_success());
    assert_eq!(sorted_names(&archiver).await, before);
}

#[tokio::test]
async fn test_unavailable_source_keeps_archive_byte_identical() {
    let fixture = Fixture::new(&[("x", "1"), ("y", "22")]);
    let archiver = Archiver::new(fixture.config());
    archiver.archive().await.unwrap();
    let before = fs::read(fixture.output()).unwrap();

    let err = archiver
        .modify(
            vec![
                ModificationRequest::remove("x"),
                ModificationRequest::add(fixture.path("does-not-exist")),
            ],
            CompressionLevel::Default,
        )
        .unwrap_err();

    assert!(matches!(err, ArchiveError::SourceFileUnavailable { .. }));
    assert_eq!(fs::read(fixture.output()).unwrap(), before);
    assert!(temp_files(fixture.out.path()).is_empty());
}

#[tokio::test]
async fn test_remove_from_missing_archive() {
    let fixture = Fixture::new(&[]);
    let archiver = Archiver::new(fixture.config());

    let rx = archiver
        .modify(
            vec![ModificationRequest::remove("ghost")],
            CompressionLevel::Default,
        )
        .unwrap();
    let (outcomes, committed) = drain(rx).await;

    assert!(committed.is_ok());
    assert_eq!(
        outcomes[0].error.as_ref().map(|e| e.kind),
        Some(ErrorKind::EntryNotFound)
    );
}

#[tokio::test]
async fn test_bulk_modify_preserves_request_order() {
    let names: Vec<String> = (0..25).map(|i| format!("f{i:02}.jpg")).collect();
    let files: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "data")).collect();
    let fixture = Fixture::new(&files);
    let archiver = Archiver::new(fixture.config());

    let requests = names
        .iter()
        .map(|n| ModificationRequest::add(fixture.path(n)))
        .collect();
    let report = archiver
        .bulk_modify(requests, 10, CompressionLevel::Fast)
        .await;

    assert!(report.is_success());
    assert_eq!(report.succeeded_count, 25);
    let reported: Vec<&str> = report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(reported, names.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(archiver.list_files().await.unwrap(), names);
    assert_eq!(archiver.progress().files_processed(), 25);
}

#[tokio::test]
async fn test_bulk_modify_isolates_rejected_batch() {
    let fixture = Fixture::new(&[("a", "1"), ("b", "2"), ("c", "3")]);
    let archiver = Archiver::new(fixture.config());

    let report = archiver
        .bulk_modify(
            vec![
                ModificationRequest::add(fixture.path("a")),
                ModificationRequest::add(fixture.path("b")),
                ModificationRequest::add(fixture.path("c")),
                ModificationRequest::add(fixture.path("missing")),
            ],
            2,
            CompressionLevel::Default,
        )
        .await;

    assert_eq!(report.outcomes.len(), 4);
    assert_eq!(report.succeeded_count, 2);
    assert_eq!(report.failed_count, 2);
    assert!(report.batch_failures.is_empty());
    assert!(report.outcomes[2..].iter().all(|o| {
        o.error.as_ref().map(|e| e.kind) == Some(ErrorKind::SourceFileUnavailable)
    }));
    assert_eq!(archiver.list_files().await.unwrap(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_cancelled_session_rejects_work() {
    let fixture = Fixture::new(&[("x", "1")]);
    let archiver = Archiver::new(fixture.config());
    archiver.cancel();

    let report = archiver
        .batch_add(vec![fixture.path("x")], 1, CompressionLevel::Default)
        .await;

    assert_eq!(report.failed_count, 1);
    assert_eq!(report.batch_failures.len(), 1);
    assert_eq!(report.batch_failures[0].error.kind, ErrorKind::Cancelled);
    assert!(!fixture.output().exists());
}

#[tokio::test]
async fn test_progress_total_covers_mutation_then_fresh_build() {
    let fixture = Fixture::new(&[("x.jpg", "x"), ("y.jpg", "yy")]);
    let archiver = Archiver::new(fixture.config());

    let report = archiver
        .batch_add(vec![fixture.path("x.jpg")], 10, CompressionLevel::Fast)
        .await;
    assert!(report.is_success());
    archiver.archive().await.unwrap();

    let state = archiver.finish();
    assert_eq!(state.files_processed, 3);
    assert!(state.total_files_expected.is_some_and(|t| t >= state.files_processed));
    assert_eq!(state.percentage(), 100.0);
}
