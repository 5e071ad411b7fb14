//! Entry header construction and gzip/tar stream plumbing shared by the
//! creator, indexer and mutator.

use std::fs::{self, File, Metadata};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType, Header};

use tarbundle_core::{ArchiveError, CompressionLevel, entry_name};

/// Permission bits stored for freshly built entries.
pub const FRESH_ENTRY_MODE: u32 = 0o644;

/// Reader over an existing bundle.
pub(crate) type BundleReader = Archive<GzDecoder<BufReader<File>>>;

/// Open an existing bundle for sequential reading. `Ok(None)` when it does not exist.
pub(crate) fn open_bundle(path: &Path) -> Result<Option<BundleReader>, ArchiveError> {
    match File::open(path) {
        Ok(file) => Ok(Some(Archive::new(GzDecoder::new(BufReader::new(file))))),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(ArchiveError::io(path, err)),
    }
}

/// Wrap a writer in gzip and tar layers.
pub(crate) fn bundle_writer<W: Write>(inner: W, level: CompressionLevel) -> Builder<GzEncoder<W>> {
    Builder::new(GzEncoder::new(inner, Compression::new(level.level())))
}

/// Flush the tar trailer and the gzip footer, returning the inner writer.
pub(crate) fn finish_bundle<W: Write>(
    builder: Builder<GzEncoder<W>>,
    path: &Path,
) -> Result<W, ArchiveError> {
    let encoder = builder.into_inner().map_err(|e| ArchiveError::io(path, e))?;
    let mut inner = encoder.finish().map_err(|e| ArchiveError::io(path, e))?;
    inner.flush().map_err(|e| ArchiveError::io(path, e))?;
    Ok(inner)
}

/// Classify an error raised while decoding a bundle.
pub(crate) fn read_error(path: &Path, err: io::Error) -> ArchiveError {
    match err.kind() {
        io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied | io::ErrorKind::Interrupted => {
            ArchiveError::io(path, err)
        }
        _ => ArchiveError::format(path, err.to_string()),
    }
}

/// Header for a fresh build: fixed mode, stamped with the current time.
pub(crate) fn fresh_header(size: u64) -> Header {
    regular_header(size, FRESH_ENTRY_MODE, unix_seconds(SystemTime::now()))
}

/// Header carrying the source file's live mode and modification time.
pub(crate) fn live_header(metadata: &Metadata) -> Header {
    let mtime = metadata.modified().map(unix_seconds).unwrap_or(0);
    regular_header(metadata.len(), permission_bits(metadata), mtime)
}

fn regular_header(size: u64, mode: u32, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Regular);
    header.set_size(size);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(_metadata: &Metadata) -> u32 {
    FRESH_ENTRY_MODE
}

/// An opened source file, ready to be streamed into an entry.
#[derive(Debug)]
pub(crate) struct SourceFile {
    pub path: PathBuf,
    pub name: String,
    pub metadata: Metadata,
    file: File,
}

impl SourceFile {
    /// Open and stat a regular file.
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let name = entry_name(path).ok_or_else(|| {
            ArchiveError::invalid(format!("{} has no file name", path.display()))
        })?;
        let file = File::open(path).map_err(|e| ArchiveError::source_unavailable(path, e))?;
        let metadata = file
            .metadata()
            .map_err(|e| ArchiveError::source_unavailable(path, e))?;
        if !metadata.is_file() {
            return Err(ArchiveError::source_unavailable(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            name,
            metadata,
            file,
        })
    }

    /// Size recorded at open time.
    pub fn size(&self) -> u64 {
        self.metadata.len()
    }

    /// Lower-cased extension of the source.
    pub fn extension(&self) -> String {
        tarbundle_core::formats::extension_of(&self.path)
    }

    /// Append this file under its base name with `header`, streaming exactly
    /// `header.size()` bytes.
    pub fn append_to<W: Write>(self, builder: &mut Builder<W>, mut header: Header) -> io::Result<u64> {
        let size = header.size()?;
        let reader = ExactReader {
            inner: self.file,
            remaining: size,
        };
        builder.append_data(&mut header, &self.name, reader)?;
        Ok(size)
    }
}

/// Check that `path` names a readable regular file without keeping it open.
pub(crate) fn check_source(path: &Path) -> Result<(), ArchiveError> {
    let metadata = fs::metadata(path).map_err(|e| ArchiveError::source_unavailable(path, e))?;
    if !metadata.is_file() {
        return Err(ArchiveError::source_unavailable(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
        ));
    }
    File::open(path).map_err(|e| ArchiveError::source_unavailable(path, e))?;
    Ok(())
}

/// Yields exactly `remaining` bytes, failing if the source runs short.
///
/// A short payload would leave the tar stream misaligned, so truncation is an
/// error rather than silent padding.
struct ExactReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = usize::try_from(self.remaining)
            .unwrap_or(usize::MAX)
            .min(buf.len());
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "source file shrank while being archived",
            ));
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_header() {
        let header = fresh_header(42);
        assert_eq!(header.size().unwrap(), 42);
        assert_eq!(header.mode().unwrap(), FRESH_ENTRY_MODE);
        assert!(header.mtime().unwrap() > 0);
        assert_eq!(header.entry_type(), EntryType::Regular);
    }

    #[test]
    fn test_exact_reader_truncates_long_source() {
        let mut reader = ExactReader {
            inner: Cursor::new(b"abcdef".to_vec()),
            remaining: 3,
        };
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_exact_reader_rejects_short_source() {
        let mut reader = ExactReader {
            inner: Cursor::new(b"ab".to_vec()),
            remaining: 3,
        };
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_source_file_rejects_directories() {
        let temp = TempDir::new().unwrap();
        let err = SourceFile::open(temp.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::SourceFileUnavailable { .. }));
        assert!(check_source(temp.path()).is_err());
        assert!(check_source(&temp.path().join("missing")).is_err());
    }

    #[test]
    fn test_open_missing_bundle_is_none() {
        let temp = TempDir::new().unwrap();
        assert!(open_bundle(&temp.path().join("none.tar.gz")).unwrap().is_none());
    }

    #[test]
    fn test_read_error_classification() {
        let path = Path::new("/x.tar.gz");
        let err = read_error(path, io::Error::new(io::ErrorKind::InvalidInput, "bad header"));
        assert!(matches!(err, ArchiveError::Format { .. }));
        let err = read_error(path, io::Error::new(io::ErrorKind::PermissionDenied, "no"));
        assert!(matches!(err, ArchiveError::Io { .. }));
    }
}
