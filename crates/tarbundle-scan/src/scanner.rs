//! JWalk-based parallel directory scanner.

use std::path::{Path, PathBuf};

use jwalk::{DirEntry, Parallelism, WalkDir};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use tarbundle_core::{ArchiveConfig, FileDescriptor, ScanError, ScanResult};

/// Parallel scanner delivering file descriptors as they are discovered.
///
/// Directory expansion runs on a dedicated rayon pool sized by
/// [`ArchiveConfig::scan_workers`]; descriptors are handed over through a
/// bounded channel so a slow consumer holds the walk back.
#[derive(Debug, Clone, Default)]
pub struct JwalkScanner {
    cancel: CancellationToken,
}

impl JwalkScanner {
    /// Create a new scanner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scanner that stops when `cancel` fires.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Start scanning `config.source_path`.
    ///
    /// The root is validated before anything is spawned. Must be called from
    /// within a tokio runtime.
    pub fn start(&self, config: &ArchiveConfig) -> Result<mpsc::Receiver<ScanResult>, ScanError> {
        let root = config.source_path.clone();
        validate_root(&root)?;

        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let options = WalkOptions {
            root,
            recursive: config.recursive,
            workers: config.scan_workers,
        };
        let cancel = self.cancel.clone();

        tokio::task::spawn_blocking(move || walk(options, &cancel, &tx));

        Ok(rx)
    }
}

/// Start a scan with a fresh scanner.
pub fn start_scan(
    config: &ArchiveConfig,
    cancel: CancellationToken,
) -> Result<mpsc::Receiver<ScanResult>, ScanError> {
    JwalkScanner::with_cancellation(cancel).start(config)
}

fn validate_root(root: &Path) -> Result<(), ScanError> {
    let metadata = std::fs::metadata(root).map_err(|e| ScanError::io(root, e))?;
    if !metadata.is_dir() {
        return Err(ScanError::NotADirectory {
            path: root.to_path_buf(),
        });
    }
    Ok(())
}

struct WalkOptions {
    root: PathBuf,
    recursive: bool,
    workers: usize,
}

/// Blocking walk loop. Returns once the tree is exhausted, the receiver is
/// dropped, or the token is cancelled.
fn walk(options: WalkOptions, cancel: &CancellationToken, tx: &mpsc::Sender<ScanResult>) {
    let parallelism = match options.workers {
        0 | 1 => Parallelism::Serial,
        n => Parallelism::RayonNewPool(n),
    };

    let walker = WalkDir::new(&options.root)
        .parallelism(parallelism)
        .skip_hidden(false)
        .follow_links(false)
        .min_depth(1)
        .max_depth(if options.recursive { usize::MAX } else { 1 });

    let mut files = 0u64;
    let mut errors = 0u64;

    for entry_result in walker {
        if cancel.is_cancelled() {
            let _ = tx.blocking_send(Err(ScanError::Interrupted));
            break;
        }

        let item = match entry_result {
            Ok(entry) => {
                let path = entry.path();
                if entry.file_type().is_dir() {
                    // An unreadable directory is still yielded; its read
                    // failure rides along on the entry.
                    match &entry.read_children_error {
                        Some(err) => Err(ScanError::Walk {
                            message: err.to_string(),
                            path: Some(path),
                        }),
                        None => continue,
                    }
                } else {
                    descriptor(&entry, path)
                }
            }
            Err(err) => Err(ScanError::Walk {
                path: err.path().map(|p| p.to_path_buf()),
                message: err.to_string(),
            }),
        };

        match item {
            Ok(_) => files += 1,
            Err(ref err) => {
                errors += 1;
                debug!(error = %err, "scan error");
            }
        }

        if tx.blocking_send(item).is_err() {
            debug!("scan receiver dropped, stopping walk");
            break;
        }
    }

    info!(root = %options.root.display(), files, errors, "scan finished");
}

/// Describe a non-directory entry. Symlinks are not followed, so a link
/// reports its own size.
fn descriptor(entry: &DirEntry<((), ())>, path: PathBuf) -> ScanResult {
    match entry.metadata() {
        Ok(metadata) => Ok(FileDescriptor::file(path, metadata.len())),
        Err(err) => Err(ScanError::Walk {
            message: err.to_string(),
            path: Some(path),
        }),
    }
}
