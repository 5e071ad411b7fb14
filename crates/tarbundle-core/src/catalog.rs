//! Value types shared by the scan, build and maintenance pipelines.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{ArchiveError, OutcomeError, ScanError};
use crate::formats::{extension_of, mime_for_extension};

/// Item produced by the scanner and relayed by the filter.
pub type ScanResult = Result<FileDescriptor, ScanError>;

/// A single filesystem entry discovered by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path as discovered (rooted at the configured source path).
    pub path: PathBuf,
    /// Size in bytes.
    pub size: u64,
    /// Whether the entry is a directory.
    pub is_directory: bool,
    /// MIME type from the static format tables, when known.
    pub mime_type: Option<String>,
}

impl FileDescriptor {
    /// Describe a regular file.
    pub fn file(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let mime_type = mime_for_extension(&extension_of(&path)).map(str::to_string);
        Self {
            path,
            size,
            is_directory: false,
            mime_type,
        }
    }

    /// Name under which this file is stored in an archive.
    pub fn entry_name(&self) -> Option<String> {
        entry_name(&self.path)
    }

    /// Lower-cased extension without the leading dot.
    pub fn extension(&self) -> String {
        extension_of(&self.path)
    }
}

/// Archive entry name for a source path: its final component.
pub fn entry_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Header metadata of one entry in an existing archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntryMetadata {
    /// Entry name as stored.
    pub name: String,
    /// Payload size in bytes.
    pub size: u64,
    /// Modification time recorded in the header.
    pub mod_time: DateTime<Utc>,
    /// Permission bits recorded in the header.
    pub mode: u32,
    /// The raw 512-byte header block.
    #[serde(skip)]
    pub raw_header: Vec<u8>,
}

/// Name-keyed view of an archive's table of contents, in archive order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveIndex {
    entries: IndexMap<String, ArchiveEntryMetadata>,
}

impl ArchiveIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry. A repeated name keeps its first position and takes the latest metadata.
    pub fn insert(&mut self, entry: ArchiveEntryMetadata) {
        self.entries.insert(entry.name.clone(), entry);
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&ArchiveEntryMetadata> {
        self.entries.get(name)
    }

    /// Look up an entry, failing with [`ArchiveError::EntryNotFound`].
    pub fn require(&self, name: &str) -> Result<&ArchiveEntryMetadata, ArchiveError> {
        self.get(name).ok_or_else(|| ArchiveError::EntryNotFound {
            name: name.to_string(),
        })
    }

    /// Whether an entry with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Entry names in archive order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries in archive order.
    pub fn iter(&self) -> impl Iterator<Item = &ArchiveEntryMetadata> {
        self.entries.values()
    }

    /// Number of distinct entry names.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of entry payload sizes.
    pub fn total_size(&self) -> u64 {
        self.entries.values().map(|e| e.size).sum()
    }
}

/// Kind of a modification request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Add,
    Remove,
    Update,
}

/// A single change to apply to an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum ModificationRequest {
    /// Append a file, stored under its base name.
    Add { source: PathBuf },
    /// Drop the entry with this name.
    Remove { name: String },
    /// Replace the entry with this name by the contents of `source`.
    Update { name: String, source: PathBuf },
}

impl ModificationRequest {
    /// Create an add request.
    pub fn add(source: impl Into<PathBuf>) -> Self {
        Self::Add {
            source: source.into(),
        }
    }

    /// Create a remove request.
    pub fn remove(name: impl Into<String>) -> Self {
        Self::Remove { name: name.into() }
    }

    /// Create an update request.
    pub fn update(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self::Update {
            name: name.into(),
            source: source.into(),
        }
    }

    /// The kind of this request.
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Add { .. } => OperationKind::Add,
            Self::Remove { .. } => OperationKind::Remove,
            Self::Update { .. } => OperationKind::Update,
        }
    }

    /// The entry name this request targets.
    pub fn target_name(&self) -> String {
        match self {
            Self::Add { source } => entry_name(source).unwrap_or_default(),
            Self::Remove { name } | Self::Update { name, .. } => name.clone(),
        }
    }
}

/// Result of applying one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationOutcome {
    /// Kind of the originating request.
    pub operation: OperationKind,
    /// Entry name the request targeted.
    pub name: String,
    /// Whether the request was applied.
    pub succeeded: bool,
    /// Failure detail when `succeeded` is false.
    pub error: Option<OutcomeError>,
}

impl ModificationOutcome {
    /// Successful outcome for a request.
    pub fn success(request: &ModificationRequest) -> Self {
        Self {
            operation: request.kind(),
            name: request.target_name(),
            succeeded: true,
            error: None,
        }
    }

    /// Failed outcome for a request.
    pub fn failure(request: &ModificationRequest, error: impl Into<OutcomeError>) -> Self {
        Self {
            operation: request.kind(),
            name: request.target_name(),
            succeeded: false,
            error: Some(error.into()),
        }
    }
}

/// A sub-batch whose commit failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Zero-based index of the sub-batch.
    pub batch_index: usize,
    /// Why the commit failed.
    pub error: OutcomeError,
}

/// Aggregated result of a bulk modification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Number of successful outcomes.
    pub succeeded_count: usize,
    /// Number of failed outcomes.
    pub failed_count: usize,
    /// One outcome per request, in request order.
    pub outcomes: Vec<ModificationOutcome>,
    /// Sub-batches that did not commit.
    pub batch_failures: Vec<BatchFailure>,
}

impl BatchReport {
    /// Record an outcome.
    pub fn push(&mut self, outcome: ModificationOutcome) {
        if outcome.succeeded {
            self.succeeded_count += 1;
        } else {
            self.failed_count += 1;
        }
        self.outcomes.push(outcome);
    }

    /// Record a failed commit.
    pub fn push_batch_failure(&mut self, batch_index: usize, error: impl Into<OutcomeError>) {
        self.batch_failures.push(BatchFailure {
            batch_index,
            error: error.into(),
        });
    }

    /// True when every item succeeded and every sub-batch committed.
    pub fn is_success(&self) -> bool {
        self.failed_count == 0 && self.batch_failures.is_empty()
    }
}
