//! File selection policy.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::formats::{extension_of, normalize_extension};

/// Extensions accepted by [`FilterMode::Photos`].
pub const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Extensions accepted by [`FilterMode::Videos`].
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "webm", "flv"];

/// Which family of files to select.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Every file, optionally narrowed by an allow-list.
    #[default]
    All,
    /// Photo extensions only.
    Photos,
    /// Video extensions only.
    Videos,
}

/// Decides whether a scanned path is eligible for archiving.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPolicy {
    /// Base selection.
    pub mode: FilterMode,
    /// Allow-list that narrows [`FilterMode::All`]; ignored by the other modes.
    pub allowed_extensions: BTreeSet<String>,
}

impl SelectionPolicy {
    /// Create a policy, normalizing the allow-list.
    pub fn new<I, S>(mode: FilterMode, allowed_extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            mode,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| normalize_extension(e.as_ref()))
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Policy accepting everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Whether any restriction is active.
    pub fn is_restricted(&self) -> bool {
        self.mode != FilterMode::All || !self.allowed_extensions.is_empty()
    }

    /// Check a normalized extension against the policy.
    pub fn matches_extension(&self, ext: &str) -> bool {
        match self.mode {
            FilterMode::All if self.allowed_extensions.is_empty() => true,
            FilterMode::All => self.allowed_extensions.contains(ext),
            FilterMode::Photos => PHOTO_EXTENSIONS.contains(&ext),
            FilterMode::Videos => VIDEO_EXTENSIONS.contains(&ext),
        }
    }

    /// Check a path against the policy.
    pub fn matches(&self, path: &Path) -> bool {
        let ext = extension_of(path);
        if ext.is_empty() {
            return !self.is_restricted();
        }
        self.matches_extension(&ext)
    }
}
