//! Core types for tarbundle.
//!
//! This crate provides the data model shared by the scan, build and
//! maintenance pipelines: file descriptors, the selection policy, archive
//! configuration, the error taxonomy and the thread-safe progress tracker.

mod catalog;
mod config;
mod error;
pub mod formats;
mod policy;
mod progress;

pub use catalog::{
    ArchiveEntryMetadata, ArchiveIndex, BatchFailure, BatchReport, FileDescriptor,
    ModificationOutcome, ModificationRequest, OperationKind, ScanResult, entry_name,
};
pub use config::{
    ArchiveConfig, ArchiveConfigBuilder, CompressionLevel, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_ENTRY_WORKERS, DEFAULT_SCAN_WORKERS,
};
pub use error::{ArchiveError, ErrorKind, OutcomeError, ScanError};
pub use formats::Category;
pub use policy::{FilterMode, PHOTO_EXTENSIONS, SelectionPolicy, VIDEO_EXTENSIONS};
pub use progress::{ProgressState, ProgressTracker, TypeCounts};
