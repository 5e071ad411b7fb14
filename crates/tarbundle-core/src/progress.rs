//! Shared progress state for archiving sessions.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::formats::Category;

/// Per-category, per-extension file counts.
pub type TypeCounts = HashMap<Category, BTreeMap<String, u64>>;

/// Progress of a session, as observed at one point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressState {
    /// Wall-clock start of the session.
    pub started_at: DateTime<Utc>,
    /// Wall-clock end of the session, once finished.
    pub finished_at: Option<DateTime<Utc>>,
    /// Files processed so far.
    pub files_processed: u64,
    /// Bytes processed so far.
    pub total_bytes: u64,
    /// Expected number of files, when known.
    pub total_files_expected: Option<u64>,
    /// Counts by category and extension.
    pub category_counts: TypeCounts,
    /// Most recent error message.
    pub last_error: Option<String>,
    /// Time elapsed between start and finish (or now).
    pub elapsed: Duration,
}

impl ProgressState {
    /// Completion as a percentage (0.0 to 100.0). Zero while the total is unknown.
    pub fn percentage(&self) -> f64 {
        match self.total_files_expected {
            Some(total) if total > 0 => {
                (self.files_processed as f64 / total as f64 * 100.0).min(100.0)
            }
            _ => 0.0,
        }
    }

    /// Whether the session has been finished.
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

#[derive(Debug)]
struct Inner {
    start: Instant,
    end: Option<Instant>,
    state: ProgressState,
}

/// Thread-safe progress tracker.
///
/// Cloning yields another handle to the same state. All fields live behind a
/// single lock so counts and the derived percentage are read consistently.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    inner: Arc<RwLock<Inner>>,
}

impl ProgressTracker {
    /// Start tracking now.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                start: Instant::now(),
                end: None,
                state: ProgressState {
                    started_at: Utc::now(),
                    finished_at: None,
                    files_processed: 0,
                    total_bytes: 0,
                    total_files_expected: None,
                    category_counts: TypeCounts::new(),
                    last_error: None,
                    elapsed: Duration::ZERO,
                },
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record processed files of one extension.
    ///
    /// A known total is raised to keep pace with the processed count.
    pub fn record(&self, files: u64, bytes: u64, extension: &str) {
        let mut inner = self.write();
        let state = &mut inner.state;
        state.files_processed += files;
        state.total_bytes += bytes;
        if let Some(total) = state.total_files_expected.as_mut() {
            *total = (*total).max(state.files_processed);
        }
        *state
            .category_counts
            .entry(Category::of(extension))
            .or_default()
            .entry(extension.to_string())
            .or_insert(0) += files;
    }

    /// Remember an error. Counters are left untouched.
    pub fn record_error(&self, message: impl Into<String>) {
        self.write().state.last_error = Some(message.into());
    }

    /// Set the number of files expected. Never lower than what was already processed.
    pub fn set_total_files(&self, total: u64) {
        let mut inner = self.write();
        let processed = inner.state.files_processed;
        inner.state.total_files_expected = Some(total.max(processed));
    }

    /// Completion percentage.
    pub fn percentage(&self) -> f64 {
        self.read().state.percentage()
    }

    /// Files processed so far.
    pub fn files_processed(&self) -> u64 {
        self.read().state.files_processed
    }

    /// Bytes processed so far.
    pub fn total_bytes(&self) -> u64 {
        self.read().state.total_bytes
    }

    /// Counts by category and extension.
    pub fn type_counts(&self) -> TypeCounts {
        self.read().state.category_counts.clone()
    }

    /// Most recent error message.
    pub fn last_error(&self) -> Option<String> {
        self.read().state.last_error.clone()
    }

    /// Elapsed time; frozen once [`finish`](Self::finish) has been called.
    pub fn elapsed(&self) -> Duration {
        let inner = self.read();
        match inner.end {
            Some(end) => end.duration_since(inner.start),
            None => inner.start.elapsed(),
        }
    }

    /// Mark the session finished. Only the first call has an effect.
    pub fn finish(&self) {
        let mut inner = self.write();
        if inner.end.is_none() {
            inner.end = Some(Instant::now());
            inner.state.finished_at = Some(Utc::now());
        }
    }

    /// Consistent copy of the current state.
    pub fn snapshot(&self) -> ProgressState {
        let inner = self.read();
        let mut state = inner.state.clone();
        state.elapsed = match inner.end {
            Some(end) => end.duration_since(inner.start),
            None => inner.start.elapsed(),
        };
        state
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_record_categorizes() {
        let tracker = ProgressTracker::new();
        tracker.record(1, 10, "jpg");
        tracker.record(1, 20, "jpg");
        tracker.record(1, 5, "avi");
        tracker.record(1, 1, "txt");

        let counts = tracker.type_counts();
        assert_eq!(counts[&Category::Photo]["jpg"], 2);
        assert_eq!(counts[&Category::Video]["avi"], 1);
        assert_eq!(counts[&Category::Other]["txt"], 1);
        assert_eq!(tracker.files_processed(), 4);
        assert_eq!(tracker.total_bytes(), 36);
    }

    #[test]
    fn test_percentage() {
        let tracker = ProgressTracker::new();
        assert_eq!(tracker.percentage(), 0.0);
        tracker.set_total_files(4);
        tracker.record(1, 0, "jpg");
        assert_eq!(tracker.percentage(), 25.0);
    }

    #[test]
    fn test_total_never_below_processed() {
        let tracker = ProgressTracker::new();
        tracker.record(3, 0, "png");
        tracker.set_total_files(1);
        assert_eq!(tracker.snapshot().total_files_expected, Some(3));
        assert_eq!(tracker.percentage(), 100.0);
    }

    #[test]
    fn test_recording_past_total_raises_it() {
        let tracker = ProgressTracker::new();
        tracker.set_total_files(1);
        tracker.record(1, 0, "jpg");
        tracker.record(2, 0, "jpg");
        let state = tracker.snapshot();
        assert_eq!(state.files_processed, 3);
        assert_eq!(state.total_files_expected, Some(3));
    }

    #[test]
    fn test_record_error_keeps_counters() {
        let tracker = ProgressTracker::new();
        tracker.record(1, 3, "mp4");
        tracker.record_error("boom");
        assert_eq!(tracker.last_error().as_deref(), Some("boom"));
        assert_eq!(tracker.files_processed(), 1);
    }

    #[test]
    fn test_finish_freezes_elapsed() {
        let tracker = ProgressTracker::new();
        tracker.finish();
        let first = tracker.elapsed();
        let finished_at = tracker.snapshot().finished_at;
        thread::sleep(Duration::from_millis(10));
        tracker.finish();
        assert_eq!(tracker.elapsed(), first);
        assert_eq!(tracker.snapshot().finished_at, finished_at);
        assert!(tracker.snapshot().is_finished());
    }

    #[test]
    fn test_concurrent_updates() {
        let tracker = ProgressTracker::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = tracker.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        t.record(1, 2, "png");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.files_processed(), 800);
        assert_eq!(tracker.total_bytes(), 1600);
        assert_eq!(tracker.type_counts()[&Category::Photo]["png"], 800);
    }
}
