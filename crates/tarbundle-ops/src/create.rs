//! Fresh archive builds from a stream of scan results.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use flate2::write::GzEncoder;
use tar::Builder;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tarbundle_core::{
    ArchiveConfig, ArchiveError, CompressionLevel, FileDescriptor, ProgressTracker, ScanError,
    ScanResult,
};

use crate::entry::{SourceFile, bundle_writer, finish_bundle, fresh_header};
use crate::run_blocking;

type BundleBuilder = Builder<GzEncoder<BufWriter<File>>>;

/// Totals for a completed fresh build.
#[derive(Debug, Default)]
pub struct CreateSummary {
    /// Entries written to the archive.
    pub files_written: u64,
    /// Payload bytes written.
    pub bytes_written: u64,
    /// Scan errors that arrived on the input stream; those files were skipped.
    pub skipped: Vec<ScanError>,
}

/// Build a gzip-compressed tar archive at `config.output_path` from `input`.
///
/// Entries are written by up to `config.entry_workers` blocking workers that
/// take turns on a single tar writer, so each entry's header and payload stay
/// contiguous. Entry order is unspecified. The first write failure stops
/// intake and is returned; the output file may then be partial.
pub async fn create(
    config: &ArchiveConfig,
    mut input: mpsc::Receiver<ScanResult>,
    progress: &ProgressTracker,
    cancel: CancellationToken,
) -> Result<CreateSummary, ArchiveError> {
    let output = config.output_path.clone();
    let file = {
        let output = output.clone();
        run_blocking(move || File::create(&output).map_err(|e| ArchiveError::io(&output, e)))
            .await?
    };

    let writer: Arc<Mutex<BundleBuilder>> = Arc::new(Mutex::new(bundle_writer(
        BufWriter::new(file),
        CompressionLevel::Default,
    )));
    let permits = Arc::new(Semaphore::new(config.entry_workers.max(1)));
    let files = Arc::new(AtomicU64::new(0));
    let bytes = Arc::new(AtomicU64::new(0));
    let first_error: Arc<OnceLock<ArchiveError>> = Arc::new(OnceLock::new());
    let halt = cancel.child_token();

    let mut workers = JoinSet::new();
    let mut skipped = Vec::new();

    loop {
        let item = tokio::select! {
            biased;
            _ = halt.cancelled() => break,
            item = input.recv() => item,
        };
        let Some(item) = item else { break };

        let descriptor = match item {
            Ok(descriptor) => descriptor,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                progress.record_error(err.to_string());
                skipped.push(err);
                continue;
            }
        };

        let permit = tokio::select! {
            biased;
            _ = halt.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        while let Some(joined) = workers.try_join_next() {
            reap(joined, &first_error, &halt);
        }

        let writer = writer.clone();
        let files = files.clone();
        let bytes = bytes.clone();
        let progress = progress.clone();
        let first_error = first_error.clone();
        let halt = halt.clone();
        workers.spawn_blocking(move || {
            let _permit = permit;
            if halt.is_cancelled() {
                return;
            }
            match write_entry(&writer, &descriptor) {
                Ok(written) => {
                    files.fetch_add(1, Ordering::Relaxed);
                    bytes.fetch_add(written, Ordering::Relaxed);
                    progress.record(1, written, &descriptor.extension());
                }
                Err(err) => {
                    warn!(path = %descriptor.path.display(), error = %err, "entry write failed");
                    progress.record_error(err.to_string());
                    let _ = first_error.set(err);
                    halt.cancel();
                }
            }
        });
    }

    while let Some(joined) = workers.join_next().await {
        reap(joined, &first_error, &halt);
    }
    drop(input);

    if let Some(err) = Arc::into_inner(first_error).and_then(OnceLock::into_inner) {
        return Err(err);
    }
    if cancel.is_cancelled() {
        return Err(ArchiveError::Cancelled);
    }

    let builder = Arc::into_inner(writer)
        .ok_or_else(|| ArchiveError::Other {
            message: "archive writer still shared after all workers finished".into(),
        })?
        .into_inner();
    run_blocking(move || finalize(builder, &output)).await?;

    let summary = CreateSummary {
        files_written: files.load(Ordering::Relaxed),
        bytes_written: bytes.load(Ordering::Relaxed),
        skipped,
    };
    info!(
        path = %config.output_path.display(),
        files = summary.files_written,
        bytes = summary.bytes_written,
        skipped = summary.skipped.len(),
        "archive created"
    );
    Ok(summary)
}

fn reap(
    joined: Result<(), tokio::task::JoinError>,
    first_error: &OnceLock<ArchiveError>,
    halt: &CancellationToken,
) {
    if let Err(err) = joined {
        let _ = first_error.set(ArchiveError::Other {
            message: format!("Task failed: {err}"),
        });
        halt.cancel();
    }
}

fn write_entry(writer: &Mutex<BundleBuilder>, descriptor: &FileDescriptor) -> Result<u64, ArchiveError> {
    let source = SourceFile::open(&descriptor.path)?;
    let header = fresh_header(source.size());
    let path = descriptor.path.clone();

    let mut builder = writer.blocking_lock();
    let written = source
        .append_to(&mut builder, header)
        .map_err(|e| ArchiveError::io(&path, e))?;
    debug!(path = %path.display(), bytes = written, "entry written");
    Ok(written)
}

fn finalize(builder: BundleBuilder, output: &Path) -> Result<(), ArchiveError> {
    let buffered = finish_bundle(builder, output)?;
    let file = buffered
        .into_inner()
        .map_err(|e| ArchiveError::io(output, e.into_error()))?;
    file.sync_all().map_err(|e| ArchiveError::io(output, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    async fn feed(items: Vec<ScanResult>) -> mpsc::Receiver<ScanResult> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.send(item).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_create_from_stream() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.jpg");
        let b = temp.path().join("b.mp4");
        fs::write(&a, "abc").unwrap();
        fs::write(&b, "12345").unwrap();

        let config = ArchiveConfig::new(temp.path(), temp.path().join("out.tar.gz"));
        let input = feed(vec![
            Ok(FileDescriptor::file(&a, 3)),
            Ok(FileDescriptor::file(&b, 5)),
        ])
        .await;
        let progress = ProgressTracker::new();

        let summary = create(&config, input, &progress, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.files_written, 2);
        assert_eq!(summary.bytes_written, 8);
        assert!(summary.skipped.is_empty());
        assert_eq!(progress.files_processed(), 2);
        assert_eq!(progress.total_bytes(), 8);
        assert!(config.output_path.exists());
    }

    #[tokio::test]
    async fn test_scan_errors_are_skipped() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.txt");
        fs::write(&a, "x").unwrap();

        let config = ArchiveConfig::new(temp.path(), temp.path().join("out.tar.gz"));
        let input = feed(vec![
            Err(ScanError::Other {
                message: "unreadable".into(),
            }),
            Ok(FileDescriptor::file(&a, 1)),
        ])
        .await;
        let progress = ProgressTracker::new();

        let summary = create(&config, input, &progress, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.files_written, 1);
        assert_eq!(summary.skipped.len(), 1);
        assert!(progress.last_error().is_some());
    }

    #[tokio::test]
    async fn test_missing_source_fails_build() {
        let temp = TempDir::new().unwrap();
        let config = ArchiveConfig::new(temp.path(), temp.path().join("out.tar.gz"));
        let input = feed(vec![Ok(FileDescriptor::file(temp.path().join("gone.jpg"), 1))]).await;

        let err = create(&config, input, &ProgressTracker::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::SourceFileUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_unwritable_output() {
        let temp = TempDir::new().unwrap();
        let config = ArchiveConfig::new(temp.path(), temp.path().join("no/such/dir/out.tar.gz"));
        let input = feed(Vec::new()).await;

        let err = create(&config, input, &ProgressTracker::new(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_build() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.txt");
        fs::write(&a, "x").unwrap();
        let config = ArchiveConfig::new(temp.path(), temp.path().join("out.tar.gz"));
        let input = feed(vec![Ok(FileDescriptor::file(&a, 1))]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = create(&config, input, &ProgressTracker::new(), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Cancelled));
    }
}
