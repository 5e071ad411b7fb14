//! Directory scanning and selection filtering for tarbundle.
//!
//! This crate provides the front half of the fresh-build pipeline:
//!
//! - **Parallel traversal** via jwalk on a bounded rayon pool
//! - **Streaming hand-off** through bounded tokio channels (backpressure)
//! - **Selection filtering** by extension policy, errors passed through
//!
//! # Example
//!
//! ```rust,no_run
//! use tarbundle_scan::{ArchiveConfig, JwalkScanner, start_filter};
//!
//! # async fn run() -> Result<(), tarbundle_scan::ScanError> {
//! let config = ArchiveConfig::new("/path/to/photos", "/tmp/photos.tar.gz");
//! let scanned = JwalkScanner::new().start(&config)?;
//! let mut selected = start_filter(scanned, config.selection_policy(), config.channel_capacity);
//!
//! while let Some(item) = selected.recv().await {
//!     match item {
//!         Ok(file) => println!("{} ({} bytes)", file.path.display(), file.size),
//!         Err(err) => eprintln!("{err}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod filter;
mod scanner;

pub use filter::start_filter;
pub use scanner::{JwalkScanner, start_scan};

// Re-export core types for convenience
pub use tarbundle_core::{
    ArchiveConfig, FileDescriptor, FilterMode, ScanError, ScanResult, SelectionPolicy,
};
