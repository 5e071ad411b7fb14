//! In-place archive mutation.
//!
//! A batch of requests is applied in a single pass: the old archive is
//! streamed into a temporary file in the same directory with removed entries
//! skipped and updated entries substituted, added files are appended, and the
//! temporary file is renamed over the existing archive. Until that rename the
//! archive is never touched, so any failure or cancellation leaves it
//! byte-identical.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tar::Builder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tarbundle_core::{
    ArchiveConfig, ArchiveError, CompressionLevel, ModificationOutcome, ModificationRequest,
    ProgressTracker,
};

use crate::OPERATION_CHANNEL_SIZE;
use crate::entry::{
    BundleReader, SourceFile, bundle_writer, check_source, finish_bundle, live_header,
    open_bundle, read_error,
};

/// Permission bits of an archive first created by a mutation.
#[cfg(unix)]
const FRESH_ARCHIVE_MODE: u32 = 0o644;

/// Events emitted by a running mutation.
#[derive(Debug)]
pub enum ModifyEvent {
    /// Outcome of one request, delivered in request order.
    Outcome(ModificationOutcome),
    /// The rewritten archive replaced the existing one. Always the last event.
    Committed(CommitSummary),
    /// The batch was abandoned and the existing archive left as it was.
    /// Always the last event.
    Aborted(ArchiveError),
}

/// What a committed batch did to the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    /// Old entries carried over unchanged.
    pub entries_copied: u64,
    /// Entries written from source files (adds and replacements).
    pub entries_written: u64,
    /// Old entries dropped by removals.
    pub entries_dropped: u64,
}

/// Applies batches of [`ModificationRequest`]s to the archive at
/// `config.output_path`.
#[derive(Debug, Clone)]
pub struct Mutator {
    config: Arc<ArchiveConfig>,
    level: CompressionLevel,
    progress: Option<ProgressTracker>,
    cancel: CancellationToken,
}

impl Mutator {
    /// Create a mutator with default compression and no progress reporting.
    pub fn new(config: Arc<ArchiveConfig>) -> Self {
        Self {
            config,
            level: CompressionLevel::Default,
            progress: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Compression level for rewritten archives.
    pub fn with_level(mut self, level: CompressionLevel) -> Self {
        self.level = level;
        self
    }

    /// Record successful adds and updates on `progress`.
    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Abandon the batch when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    pub fn level(&self) -> CompressionLevel {
        self.level
    }

    /// Check a batch without touching the archive.
    pub fn validate(&self, requests: &[ModificationRequest]) -> Result<(), ArchiveError> {
        if !self.config.modifiable {
            return Err(ArchiveError::NotModifiable {
                path: self.config.output_path.clone(),
            });
        }
        requests.iter().try_for_each(validate_request)
    }

    /// Validate `requests` and, if they pass, apply them on a blocking worker.
    ///
    /// Validation errors are returned directly and nothing is spawned. Once
    /// started, the receiver yields one [`ModifyEvent::Outcome`] per request
    /// followed by exactly one `Committed` or `Aborted`. Must be called from
    /// within a tokio runtime.
    pub fn start(
        &self,
        requests: Vec<ModificationRequest>,
    ) -> Result<mpsc::Receiver<ModifyEvent>, ArchiveError> {
        self.validate(&requests)?;

        let (tx, rx) = mpsc::channel(OPERATION_CHANNEL_SIZE);
        let mutator = self.clone();

        tokio::task::spawn_blocking(move || {
            let result = mutator.rewrite(&requests, |outcome| {
                let _ = tx.blocking_send(ModifyEvent::Outcome(outcome));
            });
            let event = match result {
                Ok(summary) => ModifyEvent::Committed(summary),
                Err(err) => ModifyEvent::Aborted(err),
            };
            let _ = tx.blocking_send(event);
        });

        Ok(rx)
    }

    /// Validate and apply `requests` on the current thread, handing each
    /// outcome to `on_outcome` as soon as it is decided.
    pub fn apply(
        &self,
        requests: &[ModificationRequest],
        on_outcome: impl FnMut(ModificationOutcome),
    ) -> Result<CommitSummary, ArchiveError> {
        self.validate(requests)?;
        self.rewrite(requests, on_outcome)
    }

    fn rewrite(
        &self,
        requests: &[ModificationRequest],
        mut on_outcome: impl FnMut(ModificationOutcome),
    ) -> Result<CommitSummary, ArchiveError> {
        let target = self.config.output_path.as_path();
        let dir = parent_dir(target);

        let temp = tempfile::Builder::new()
            .prefix(".tarbundle-")
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| ArchiveError::io(&dir, e))?;

        let existing = open_bundle(target)?;
        if existing.is_some() {
            carry_permissions(target, temp.path());
        } else {
            fresh_permissions(temp.path());
        }

        let mut pass = Pass::new(self, requests, existing.is_some());
        {
            let mut builder = bundle_writer(BufWriter::new(temp.as_file()), self.level);
            if let Some(archive) = existing {
                pass.stream_existing(archive, &mut builder)?;
            }
            pass.resolve(&mut builder, &mut on_outcome)?;
            finish_bundle(builder, temp.path())?;
        }

        self.check_cancelled()?;
        temp.as_file()
            .sync_all()
            .map_err(|e| ArchiveError::io(temp.path(), e))?;
        temp.persist(target)
            .map_err(|e| ArchiveError::io(target, e.error))?;

        info!(
            path = %target.display(),
            copied = pass.summary.entries_copied,
            written = pass.summary.entries_written,
            dropped = pass.summary.entries_dropped,
            "archive rewritten"
        );
        Ok(pass.summary)
    }

    fn check_cancelled(&self) -> Result<(), ArchiveError> {
        if self.cancel.is_cancelled() {
            Err(ArchiveError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn record(&self, extension: &str, bytes: u64) {
        if let Some(progress) = &self.progress {
            progress.record(1, bytes, extension);
        }
    }
}

/// Validate, then apply `requests` in the background.
pub fn start_modify(
    config: Arc<ArchiveConfig>,
    requests: Vec<ModificationRequest>,
    level: CompressionLevel,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ModifyEvent>, ArchiveError> {
    Mutator::new(config)
        .with_level(level)
        .with_cancellation(cancel)
        .start(requests)
}

fn validate_request(request: &ModificationRequest) -> Result<(), ArchiveError> {
    match request {
        ModificationRequest::Add { source } => validate_source(source),
        ModificationRequest::Remove { name } => validate_name(name),
        ModificationRequest::Update { name, source } => {
            validate_name(name)?;
            validate_source(source)
        }
    }
}

fn validate_name(name: &str) -> Result<(), ArchiveError> {
    if name.is_empty() {
        return Err(ArchiveError::invalid("entry name must not be empty"));
    }
    Ok(())
}

fn validate_source(source: &Path) -> Result<(), ArchiveError> {
    if source.as_os_str().is_empty() {
        return Err(ArchiveError::invalid("source path must not be empty"));
    }
    if tarbundle_core::entry_name(source).is_none() {
        return Err(ArchiveError::invalid(format!(
            "{} has no file name",
            source.display()
        )));
    }
    check_source(source)
}

fn parent_dir(target: &Path) -> PathBuf {
    match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn carry_permissions(from: &Path, to: &Path) {
    let Ok(metadata) = fs::metadata(from) else {
        return;
    };
    if let Err(err) = fs::set_permissions(to, metadata.permissions()) {
        debug!(path = %to.display(), error = %err, "could not copy archive permissions");
    }
}

/// Mode for an archive created by a mutation, matching a fresh build.
#[cfg(unix)]
fn fresh_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(err) = fs::set_permissions(path, fs::Permissions::from_mode(FRESH_ARCHIVE_MODE)) {
        debug!(path = %path.display(), error = %err, "could not set archive permissions");
    }
}

#[cfg(not(unix))]
fn fresh_permissions(_path: &Path) {}

/// Notes whether the wrapped reader ever failed, so a copy error can be
/// blamed on the old archive or on the temporary file.
struct WatchedReader<R> {
    inner: R,
    failed: bool,
}

impl<R> WatchedReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            failed: false,
        }
    }
}

impl<R: Read> Read for WatchedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let result = self.inner.read(buf);
        if result.is_err() {
            self.failed = true;
        }
        result
    }
}

/// What happens to a pre-existing entry during the copy.
#[derive(Debug, Clone, Copy)]
enum Fate {
    Drop,
    Replace(usize),
}

/// State of one rewrite pass.
struct Pass<'a> {
    mutator: &'a Mutator,
    requests: &'a [ModificationRequest],
    had_archive: bool,
    fates: HashMap<&'a str, Fate>,
    /// Updates that follow a removal of the same name.
    blocked: HashSet<usize>,
    /// Names present in the old archive.
    seen: HashSet<String>,
    /// Replacements whose source could not be opened during the copy.
    failed_replacements: HashMap<usize, ArchiveError>,
    summary: CommitSummary,
}

impl<'a> Pass<'a> {
    fn new(mutator: &'a Mutator, requests: &'a [ModificationRequest], had_archive: bool) -> Self {
        let mut fates = HashMap::new();
        let mut blocked = HashSet::new();

        for (index, request) in requests.iter().enumerate() {
            match request {
                ModificationRequest::Add { .. } => {}
                ModificationRequest::Remove { name } => {
                    fates.insert(name.as_str(), Fate::Drop);
                }
                ModificationRequest::Update { name, .. } => match fates.get(name.as_str()) {
                    Some(Fate::Drop) => {
                        blocked.insert(index);
                    }
                    _ => {
                        fates.insert(name.as_str(), Fate::Replace(index));
                    }
                },
            }
        }

        Self {
            mutator,
            requests,
            had_archive,
            fates,
            blocked,
            seen: HashSet::new(),
            failed_replacements: HashMap::new(),
            summary: CommitSummary::default(),
        }
    }

    /// Copy the old archive into `builder`, applying removals and replacements.
    fn stream_existing<W: Write>(
        &mut self,
        mut archive: BundleReader,
        builder: &mut Builder<W>,
    ) -> Result<(), ArchiveError> {
        let mutator = self.mutator;
        let requests = self.requests;
        let target = mutator.config.output_path.as_path();
        let write_err = |e| ArchiveError::io(target, e);

        let entries = archive.entries().map_err(|e| read_error(target, e))?;
        for entry in entries {
            mutator.check_cancelled()?;

            let mut entry = entry.map_err(|e| read_error(target, e))?;
            let name = entry
                .path()
                .map_err(|e| read_error(target, e))?
                .to_string_lossy()
                .into_owned();
            let fate = self.fates.get(name.as_str()).copied();
            self.seen.insert(name.clone());

            match fate {
                Some(Fate::Drop) => {
                    debug!(name = %name, "dropping entry");
                    self.summary.entries_dropped += 1;
                }
                Some(Fate::Replace(index)) => {
                    let source = request_source(&requests[index]);
                    match SourceFile::open(source) {
                        Ok(file) => {
                            let extension = file.extension();
                            let header = live_header(&file.metadata);
                            let written = file.append_to(builder, header).map_err(write_err)?;
                            mutator.record(&extension, written);
                            self.summary.entries_written += 1;
                        }
                        Err(err) => {
                            warn!(name = %name, error = %err, "replacement unavailable, keeping entry");
                            self.failed_replacements.entry(index).or_insert(err);
                            self.copy_entry(builder, &mut entry, &name)?;
                        }
                    }
                }
                None => self.copy_entry(builder, &mut entry, &name)?,
            }
        }
        Ok(())
    }

    fn copy_entry<W: Write>(
        &mut self,
        builder: &mut Builder<W>,
        entry: &mut tar::Entry<'_, impl Read>,
        name: &str,
    ) -> Result<(), ArchiveError> {
        let target = self.mutator.config.output_path.as_path();
        let mut header = entry.header().clone();
        let mut payload = WatchedReader::new(entry);
        builder
            .append_data(&mut header, name, &mut payload)
            .map_err(|e| {
                if payload.failed {
                    read_error(target, e)
                } else {
                    ArchiveError::io(target, e)
                }
            })?;
        self.summary.entries_copied += 1;
        Ok(())
    }

    /// Append added files and report every request's outcome in order.
    fn resolve<W: Write>(
        &mut self,
        builder: &mut Builder<W>,
        on_outcome: &mut impl FnMut(ModificationOutcome),
    ) -> Result<(), ArchiveError> {
        let mutator = self.mutator;
        let target = mutator.config.output_path.as_path();

        let requests = self.requests;
        for (index, request) in requests.iter().enumerate() {
            mutator.check_cancelled()?;

            let result = match request {
                ModificationRequest::Add { source } => match SourceFile::open(source) {
                    Ok(file) => {
                        let extension = file.extension();
                        let header = live_header(&file.metadata);
                        let written = file
                            .append_to(builder, header)
                            .map_err(|e| ArchiveError::io(target, e))?;
                        mutator.record(&extension, written);
                        self.summary.entries_written += 1;
                        Ok(())
                    }
                    Err(err) => Err(err),
                },
                ModificationRequest::Remove { name } => {
                    if self.had_archive {
                        Ok(())
                    } else {
                        Err(not_found(name))
                    }
                }
                ModificationRequest::Update { name, .. } => self.update_result(index, name),
            };

            let outcome = match result {
                Ok(()) => ModificationOutcome::success(request),
                Err(err) => {
                    debug!(name = %request.target_name(), error = %err, "request failed");
                    ModificationOutcome::failure(request, err)
                }
            };
            on_outcome(outcome);
        }
        Ok(())
    }

    fn update_result(&mut self, index: usize, name: &str) -> Result<(), ArchiveError> {
        if !self.had_archive || self.blocked.contains(&index) || !self.seen.contains(name) {
            return Err(not_found(name));
        }
        match self.failed_replacements.remove(&index) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn request_source(request: &ModificationRequest) -> &Path {
    match request {
        ModificationRequest::Add { source } | ModificationRequest::Update { source, .. } => source,
        ModificationRequest::Remove { .. } => Path::new(""),
    }
}

fn not_found(name: &str) -> ArchiveError {
    ArchiveError::EntryNotFound {
        name: name.to_string(),
    }
}
