//! Streaming selection filter.

use tokio::sync::mpsc;
use tracing::debug;

use tarbundle_core::{ScanResult, SelectionPolicy};

/// Relay scan results that pass `policy`, in the order received.
///
/// Errors pass through untouched. Output is produced as input arrives; the
/// stage holds at most one element. Must be called from within a tokio runtime.
pub fn start_filter(
    mut input: mpsc::Receiver<ScanResult>,
    policy: SelectionPolicy,
    capacity: usize,
) -> mpsc::Receiver<ScanResult> {
    let (tx, rx) = mpsc::channel(capacity.max(1));

    tokio::spawn(async move {
        let mut kept = 0u64;
        let mut dropped = 0u64;

        while let Some(item) = input.recv().await {
            let forward = match &item {
                Ok(descriptor) => policy.matches(&descriptor.path),
                Err(_) => true,
            };
            if !forward {
                dropped += 1;
                continue;
            }
            if item.is_ok() {
                kept += 1;
            }
            if tx.send(item).await.is_err() {
                break;
            }
        }

        debug!(kept, dropped, mode = %policy.mode, "filter finished");
    });

    rx
}
