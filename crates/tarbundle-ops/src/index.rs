//! Reading an archive's table of contents.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use tar::{Archive, Entry};
use tracing::debug;

use tarbundle_core::{ArchiveEntryMetadata, ArchiveError, ArchiveIndex};

use crate::entry::read_error;

/// Index every entry of the archive at `path`.
///
/// Entries sharing a name collapse to the last one read, keeping the first
/// position.
pub fn read_index(path: &Path) -> Result<ArchiveIndex, ArchiveError> {
    let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut index = ArchiveIndex::new();

    let entries = archive.entries().map_err(|e| read_error(path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| read_error(path, e))?;
        let metadata = entry_metadata(&entry).map_err(|e| read_error(path, e))?;
        index.insert(metadata);
    }

    debug!(path = %path.display(), entries = index.len(), "archive indexed");
    Ok(index)
}

/// Entry names in archive order.
pub fn list_entries(path: &Path) -> Result<Vec<String>, ArchiveError> {
    Ok(read_index(path)?.names().map(str::to_owned).collect())
}

/// Metadata for one named entry.
pub fn entry_info(path: &Path, name: &str) -> Result<ArchiveEntryMetadata, ArchiveError> {
    read_index(path)?.require(name).cloned()
}

fn entry_metadata<R: Read>(entry: &Entry<'_, R>) -> io::Result<ArchiveEntryMetadata> {
    let header = entry.header();
    let name = entry.path()?.to_string_lossy().into_owned();
    let mtime = i64::try_from(header.mtime()?).unwrap_or(i64::MAX);

    Ok(ArchiveEntryMetadata {
        name,
        size: entry.size(),
        mod_time: DateTime::from_timestamp(mtime, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        mode: header.mode()?,
        raw_header: header.as_bytes().to_vec(),
    })
}
