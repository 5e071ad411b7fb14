//! Static media format tables and extension helpers.
//!
//! These tables drive progress categorization and MIME lookup. Selection
//! filtering uses the narrower sets in [`crate::policy`] instead.

use std::path::Path;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A known file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileType {
    /// Lower-case extension without the leading dot.
    pub extension: &'static str,
    /// MIME type.
    pub mime_type: &'static str,
}

/// Photo formats recognized for categorization.
pub const PHOTO_FORMATS: &[FileType] = &[
    FileType { extension: "jpg", mime_type: "image/jpeg" },
    FileType { extension: "jpeg", mime_type: "image/jpeg" },
    FileType { extension: "png", mime_type: "image/png" },
    FileType { extension: "webp", mime_type: "image/webp" },
    FileType { extension: "heic", mime_type: "image/heic" },
    FileType { extension: "heif", mime_type: "image/heif" },
];

/// Video formats recognized for categorization.
pub const VIDEO_FORMATS: &[FileType] = &[
    FileType { extension: "mp4", mime_type: "video/mp4" },
    FileType { extension: "webm", mime_type: "video/webm" },
    FileType { extension: "avi", mime_type: "video/x-msvideo" },
    FileType { extension: "heif", mime_type: "video/heif" },
    FileType { extension: "heic", mime_type: "video/heic" },
];

/// Progress category of a file.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Photo,
    Video,
    Other,
}

impl Category {
    /// Categorize a normalized extension. Photo formats take precedence.
    pub fn of(extension: &str) -> Self {
        if lookup(PHOTO_FORMATS, extension).is_some() {
            Self::Photo
        } else if lookup(VIDEO_FORMATS, extension).is_some() {
            Self::Video
        } else {
            Self::Other
        }
    }
}

fn lookup(table: &'static [FileType], extension: &str) -> Option<&'static FileType> {
    table.iter().find(|t| t.extension == extension)
}

/// MIME type for a normalized extension, if known.
pub fn mime_for_extension(extension: &str) -> Option<&'static str> {
    lookup(PHOTO_FORMATS, extension)
        .or_else(|| lookup(VIDEO_FORMATS, extension))
        .map(|t| t.mime_type)
}

/// Lower-cased text of `path`'s file name after its last `.`.
///
/// A leading dot counts, so `.jpg` has extension `jpg`. Returns an empty
/// string when the file name has no dot.
pub fn extension_of(path: &Path) -> String {
    path.file_name()
        .and_then(|name| {
            name.to_string_lossy()
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_lowercase())
        })
        .unwrap_or_default()
}

/// Normalize a user-supplied extension (`".JPG"` -> `"jpg"`).
pub fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}
