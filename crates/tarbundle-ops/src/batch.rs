//! Chunked mutation: large request lists applied as a sequence of
//! independently committed sub-batches.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use tarbundle_core::{
    ArchiveError, BatchReport, ModificationOutcome, ModificationRequest, OutcomeError,
};

use crate::modify::{ModifyEvent, Mutator};

/// Sub-batch size used when the caller passes zero.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Apply `requests` in chunks of `batch_size`, one atomic commit per chunk.
///
/// Outcomes are reported in request order, one per request. A chunk that
/// fails validation marks each of its requests failed with the validation
/// error; a chunk whose commit fails is also listed in
/// [`BatchReport::batch_failures`]. Chunks are processed in order and a
/// failed chunk does not stop the ones after it.
pub async fn bulk_modify(
    mutator: &Mutator,
    requests: Vec<ModificationRequest>,
    batch_size: usize,
) -> BatchReport {
    let batch_size = if batch_size == 0 {
        DEFAULT_BATCH_SIZE
    } else {
        batch_size
    };
    let mut report = BatchReport::default();

    for (batch_index, chunk) in requests.chunks(batch_size).enumerate() {
        let mut events = match mutator.start(chunk.to_vec()) {
            Ok(events) => events,
            Err(err) => {
                warn!(batch = batch_index, error = %err, "batch rejected");
                fail_all(&mut report, chunk, &err);
                continue;
            }
        };

        let mut reported = 0;
        let mut terminal = None;
        while let Some(event) = events.recv().await {
            match event {
                ModifyEvent::Outcome(outcome) => {
                    report.push(outcome);
                    reported += 1;
                }
                ModifyEvent::Committed(summary) => {
                    debug!(batch = batch_index, ?summary, "batch committed");
                    terminal = Some(Ok(()));
                }
                ModifyEvent::Aborted(err) => terminal = Some(Err(err)),
            }
        }

        let failure = match terminal {
            Some(Ok(())) => continue,
            Some(Err(err)) => err,
            None => ArchiveError::Other {
                message: "mutation worker exited without committing".into(),
            },
        };
        warn!(batch = batch_index, error = %failure, "batch commit failed");
        fail_all(&mut report, &chunk[reported.min(chunk.len())..], &failure);
        report.push_batch_failure(batch_index, &failure);
    }

    report
}

/// Add every path in `paths`.
pub async fn batch_add(mutator: &Mutator, paths: Vec<PathBuf>, batch_size: usize) -> BatchReport {
    let requests = paths.into_iter().map(ModificationRequest::add).collect();
    bulk_modify(mutator, requests, batch_size).await
}

/// Remove the entry named by the last component of each argument.
pub async fn batch_remove(
    mutator: &Mutator,
    names: Vec<String>,
    batch_size: usize,
) -> BatchReport {
    let requests = names
        .into_iter()
        .map(|name| ModificationRequest::remove(base_name(&name)))
        .collect();
    bulk_modify(mutator, requests, batch_size).await
}

fn base_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

fn fail_all(report: &mut BatchReport, requests: &[ModificationRequest], err: &ArchiveError) {
    let error = OutcomeError::from(err);
    for request in requests {
        report.push(ModificationOutcome::failure(request, error.clone()));
    }
}
