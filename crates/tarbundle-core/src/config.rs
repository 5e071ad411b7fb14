//! Archive session configuration.

use std::collections::BTreeSet;
use std::path::PathBuf;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::formats::normalize_extension;
use crate::policy::{FilterMode, SelectionPolicy};

/// Default number of concurrent directory expansions.
pub const DEFAULT_SCAN_WORKERS: usize = 10;

/// Default number of concurrent entry writers.
pub const DEFAULT_ENTRY_WORKERS: usize = 5;

/// Default capacity of the channels between pipeline stages.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Configuration for one archiving session.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ArchiveConfig {
    /// Directory to scan.
    pub source_path: PathBuf,

    /// Archive file to create or mutate.
    pub output_path: PathBuf,

    /// Descend into subdirectories.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Base selection mode.
    #[builder(default)]
    #[serde(default)]
    pub filter_mode: FilterMode,

    /// Extensions allowed when `filter_mode` is `All` (empty = no restriction).
    #[builder(default, setter(custom))]
    #[serde(default)]
    pub allowed_extensions: BTreeSet<String>,

    /// Whether mutation operations are permitted.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub modifiable: bool,

    /// Concurrent directory expansions during a scan.
    #[builder(default = "DEFAULT_SCAN_WORKERS")]
    #[serde(default = "default_scan_workers")]
    pub scan_workers: usize,

    /// Concurrent entry writers during a fresh build.
    #[builder(default = "DEFAULT_ENTRY_WORKERS")]
    #[serde(default = "default_entry_workers")]
    pub entry_workers: usize,

    /// Capacity of the channels between pipeline stages.
    #[builder(default = "DEFAULT_CHANNEL_CAPACITY")]
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_scan_workers() -> usize {
    DEFAULT_SCAN_WORKERS
}

fn default_entry_workers() -> usize {
    DEFAULT_ENTRY_WORKERS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

impl ArchiveConfigBuilder {
    /// Set the extension allow-list. Entries are lower-cased and stripped of a leading dot.
    pub fn allowed_extensions<I, S>(&mut self, extensions: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.allowed_extensions = Some(
            extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
        );
        self
    }

    fn validate(&self) -> Result<(), String> {
        match self.source_path {
            Some(ref p) if p.as_os_str().is_empty() => {
                return Err("Source path cannot be empty".to_string());
            }
            None => return Err("Source path is required".to_string()),
            _ => {}
        }
        match self.output_path {
            Some(ref p) if p.as_os_str().is_empty() => {
                return Err("Output path cannot be empty".to_string());
            }
            None => return Err("Output path is required".to_string()),
            _ => {}
        }
        for (name, value) in [
            ("scan_workers", self.scan_workers),
            ("entry_workers", self.entry_workers),
            ("channel_capacity", self.channel_capacity),
        ] {
            if value == Some(0) {
                return Err(format!("{name} must be at least 1"));
            }
        }
        Ok(())
    }
}

impl ArchiveConfig {
    /// Create a new config builder.
    pub fn builder() -> ArchiveConfigBuilder {
        ArchiveConfigBuilder::default()
    }

    /// Create a recursive, unfiltered, modifiable config.
    pub fn new(source_path: impl Into<PathBuf>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            output_path: output_path.into(),
            recursive: true,
            filter_mode: FilterMode::All,
            allowed_extensions: BTreeSet::new(),
            modifiable: true,
            scan_workers: DEFAULT_SCAN_WORKERS,
            entry_workers: DEFAULT_ENTRY_WORKERS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    /// Selection policy derived from the filter settings.
    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy::new(self.filter_mode, &self.allowed_extensions)
    }
}

/// Gzip compression level used when rewriting an archive.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    /// Store without compression.
    None,
    /// Fastest compression.
    Fast,
    /// Balanced default.
    #[default]
    Default,
    /// Smallest output.
    Best,
}

impl CompressionLevel {
    /// Numeric gzip level (0-9).
    pub fn level(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Fast => 1,
            Self::Default => 6,
            Self::Best => 9,
        }
    }
}
