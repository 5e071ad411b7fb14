//! A configured archiving session tying the pipelines together.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tarbundle_core::{
    ArchiveConfig, ArchiveEntryMetadata, ArchiveError, ArchiveIndex, BatchReport,
    CompressionLevel, ModificationRequest, ProgressState, ProgressTracker, ScanError, ScanResult,
};
use tarbundle_scan::{start_filter, start_scan};

use crate::batch;
use crate::create::{CreateSummary, create};
use crate::index::read_index;
use crate::modify::{ModifyEvent, Mutator};
use crate::run_blocking;

/// One archive, one configuration, one progress tracker.
///
/// Clones share the tracker and the cancellation token.
#[derive(Debug, Clone)]
pub struct Archiver {
    config: Arc<ArchiveConfig>,
    progress: ProgressTracker,
    cancel: CancellationToken,
}

impl Archiver {
    /// Create a session for `config`.
    pub fn new(config: ArchiveConfig) -> Self {
        Self {
            config: Arc::new(config),
            progress: ProgressTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// The session's progress tracker.
    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    /// Token observed by every pipeline this session starts.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop in-flight work at its next check point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Start scanning the source directory.
    pub fn scan(&self) -> Result<mpsc::Receiver<ScanResult>, ScanError> {
        start_scan(&self.config, self.cancel.clone())
    }

    /// Apply the configured selection policy to a scan stream.
    pub fn filter(&self, input: mpsc::Receiver<ScanResult>) -> mpsc::Receiver<ScanResult> {
        start_filter(
            input,
            self.config.selection_policy(),
            self.config.channel_capacity,
        )
    }

    /// Write the archive from an already filtered stream.
    pub async fn create(
        &self,
        input: mpsc::Receiver<ScanResult>,
    ) -> Result<CreateSummary, ArchiveError> {
        create(&self.config, input, &self.progress, self.cancel.clone()).await
    }

    /// Scan, filter and build in one call.
    ///
    /// Unlike [`Archiver::create`], a scan error anywhere in the tree fails
    /// the call, although the archive has still been written without the
    /// affected files.
    pub async fn archive(&self) -> Result<CreateSummary, ArchiveError> {
        let scanned = self.scan()?;
        let selected = self.filter(scanned);
        let CreateSummary {
            files_written,
            bytes_written,
            skipped,
        } = self.create(selected).await?;
        self.progress.finish();
        match skipped.into_iter().next() {
            Some(err) => Err(ArchiveError::Scan(err)),
            None => Ok(CreateSummary {
                files_written,
                bytes_written,
                skipped: Vec::new(),
            }),
        }
    }

    /// Read the archive's table of contents.
    pub async fn index(&self) -> Result<ArchiveIndex, ArchiveError> {
        let path = self.config.output_path.clone();
        run_blocking(move || read_index(&path)).await
    }

    /// Entry names in archive order.
    pub async fn list_files(&self) -> Result<Vec<String>, ArchiveError> {
        Ok(self.index().await?.names().map(str::to_owned).collect())
    }

    /// Metadata for one named entry.
    pub async fn get_file_info(&self, name: &str) -> Result<ArchiveEntryMetadata, ArchiveError> {
        self.index().await?.require(name).cloned()
    }

    /// A mutator bound to this session's archive, tracker and token.
    pub fn mutator(&self, level: CompressionLevel) -> Mutator {
        Mutator::new(self.config.clone())
            .with_level(level)
            .with_progress(self.progress.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Validate and apply one batch. See [`Mutator::start`].
    pub fn modify(
        &self,
        requests: Vec<ModificationRequest>,
        level: CompressionLevel,
    ) -> Result<mpsc::Receiver<ModifyEvent>, ArchiveError> {
        self.expect_writes(write_count(&requests));
        self.mutator(level).start(requests)
    }

    /// Apply `requests` in independently committed chunks.
    pub async fn bulk_modify(
        &self,
        requests: Vec<ModificationRequest>,
        batch_size: usize,
        level: CompressionLevel,
    ) -> BatchReport {
        self.expect_writes(write_count(&requests));
        batch::bulk_modify(&self.mutator(level), requests, batch_size).await
    }

    /// Add each file in `paths`.
    pub async fn batch_add(
        &self,
        paths: Vec<PathBuf>,
        batch_size: usize,
        level: CompressionLevel,
    ) -> BatchReport {
        self.expect_writes(paths.len() as u64);
        batch::batch_add(&self.mutator(level), paths, batch_size).await
    }

    /// Remove the entries named by each argument's final path component.
    pub async fn batch_remove(
        &self,
        names: Vec<String>,
        batch_size: usize,
        level: CompressionLevel,
    ) -> BatchReport {
        batch::batch_remove(&self.mutator(level), names, batch_size).await
    }

    /// Mark the session finished and return the final progress state.
    pub fn finish(&self) -> ProgressState {
        self.progress.finish();
        self.progress.snapshot()
    }

    /// Extend the expected total by `writes` entries still to be written.
    fn expect_writes(&self, writes: u64) {
        if writes > 0 {
            self.progress
                .set_total_files(self.progress.files_processed() + writes);
        }
    }
}

fn write_count(requests: &[ModificationRequest]) -> u64 {
    requests
        .iter()
        .filter(|r| !matches!(r, ModificationRequest::Remove { .. }))
        .count() as u64
}
