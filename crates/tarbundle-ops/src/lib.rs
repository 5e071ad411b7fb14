//! Archive operations engine for tarbundle.
//!
//! This crate builds gzip-compressed tar bundles from scanned directories and
//! maintains them in place afterwards:
//!
//! - [`create`] writes a fresh bundle from a stream of scan results using a
//!   bounded pool of blocking entry writers
//! - [`read_index`] lists an existing bundle's entries and header metadata
//! - [`Mutator`] applies add/remove/update batches through a temporary file
//!   that is atomically renamed over the existing archive
//! - [`bulk_modify`] splits large request lists into committed sub-batches
//!
//! [`Archiver`] bundles all of it behind one configuration, progress tracker
//! and cancellation token.

mod batch;
mod create;
mod entry;
mod index;
mod modify;
mod session;

pub use batch::{DEFAULT_BATCH_SIZE, batch_add, batch_remove, bulk_modify};
pub use create::{CreateSummary, create};
pub use entry::FRESH_ENTRY_MODE;
pub use index::{entry_info, list_entries, read_index};
pub use modify::{CommitSummary, ModifyEvent, Mutator, start_modify};
pub use session::Archiver;

pub use tarbundle_core::{
    ArchiveConfig, ArchiveEntryMetadata, ArchiveError, ArchiveIndex, BatchReport,
    CompressionLevel, ModificationOutcome, ModificationRequest, ProgressState, ProgressTracker,
};

/// Default channel buffer size for mutation events.
pub const OPERATION_CHANNEL_SIZE: usize = 100;

/// Run blocking archive work off the async executor.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, ArchiveError>
where
    F: FnOnce() -> Result<T, ArchiveError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ArchiveError::Other {
            message: format!("Task failed: {e}"),
        })?
}
