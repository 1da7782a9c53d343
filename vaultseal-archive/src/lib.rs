//! Tape-archive packing for vaultseal.
//!
//! Serializes a file or directory tree into a deterministic tar stream:
//! entries are visited in file-name order and carry zeroed mtime/uid/gid, so
//! the same tree always yields the same bytes. Only relative paths, modes,
//! directories and regular-file contents are recorded. The stream may be
//! wrapped in gzip.
//!
//! Unpacking creates directories before regular files and refuses entries
//! that would escape the output directory.

mod control;
mod error;

pub use control::Cancellation;
pub use error::{ArchiveError, ArchiveResult};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Counts reported by [`unpack`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub directories: u64,
    pub files: u64,
    pub bytes: u64,
}

/// Returns true if `bytes` start with the gzip magic number.
pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.starts_with(&GZIP_MAGIC)
}

/// Packs `source` into an in-memory tar stream, gzip-compressed if requested.
///
/// When `source` is a directory its own entry is omitted and every path is
/// relative to it. A single file is stored under its base name.
pub fn pack(source: &Path, compressed: bool, cancel: &Cancellation) -> ArchiveResult<Vec<u8>> {
    let meta = fs::metadata(source).map_err(ArchiveError::io(source))?;

    let bytes = if compressed {
        let encoder = GzEncoder::new(Vec::new(), Compression::default());
        write_tree(encoder, source, &meta, cancel)?
            .finish()
            .map_err(ArchiveError::io(source))?
    } else {
        write_tree(Vec::new(), source, &meta, cancel)?
    };

    debug!(
        source = %source.display(),
        compressed,
        size = bytes.len(),
        "packed source tree"
    );
    Ok(bytes)
}

fn write_tree<W: Write>(
    sink: W,
    source: &Path,
    meta: &Metadata,
    cancel: &Cancellation,
) -> ArchiveResult<W> {
    let mut builder = Builder::new(sink);

    if meta.is_file() {
        cancel.check()?;
        let name = source.file_name().ok_or_else(|| {
            ArchiveError::InvalidSource(format!("{} has no file name", source.display()))
        })?;
        append_file(&mut builder, source, Path::new(name), meta)?;
    } else if meta.is_dir() {
        let walker = WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            cancel.check()?;
            let entry = entry.map_err(|e| walk_error(source, e))?;
            let relative = entry.path().strip_prefix(source).map_err(|_| {
                ArchiveError::InvalidSource(format!(
                    "{} is outside {}",
                    entry.path().display(),
                    source.display()
                ))
            })?;

            let file_type = entry.file_type();
            if file_type.is_dir() {
                let meta = entry.metadata().map_err(|e| walk_error(source, e))?;
                append_dir(&mut builder, entry.path(), relative, &meta)?;
            } else if file_type.is_file() {
                let meta = entry.metadata().map_err(|e| walk_error(source, e))?;
                append_file(&mut builder, entry.path(), relative, &meta)?;
            } else {
                debug!(path = %entry.path().display(), "skipping non-regular entry");
            }
        }
    } else {
        return Err(ArchiveError::InvalidSource(format!(
            "{} is neither a regular file nor a directory",
            source.display()
        )));
    }

    builder.into_inner().map_err(ArchiveError::io(source))
}

fn header_for(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_dir<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    relative: &Path,
    meta: &Metadata,
) -> ArchiveResult<()> {
    let mut header = header_for(EntryType::Directory, mode_of(meta), 0);
    builder
        .append_data(&mut header, relative, io::empty())
        .map_err(ArchiveError::io(path))
}

fn append_file<W: Write>(
    builder: &mut Builder<W>,
    path: &Path,
    relative: &Path,
    meta: &Metadata,
) -> ArchiveResult<()> {
    let mut header = header_for(EntryType::Regular, mode_of(meta), meta.len());
    let file = File::open(path).map_err(ArchiveError::io(path))?;
    builder
        .append_data(&mut header, relative, file)
        .map_err(ArchiveError::io(path))
}

fn walk_error(root: &Path, err: walkdir::Error) -> ArchiveError {
    let path = err.path().map_or_else(|| root.to_path_buf(), Path::to_path_buf);
    match err.into_io_error() {
        Some(source) => ArchiveError::Io { path, source },
        None => ArchiveError::InvalidSource(format!("filesystem loop at {}", path.display())),
    }
}

#[cfg(unix)]
fn mode_of(meta: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(meta: &Metadata) -> u32 {
    if meta.is_dir() {
        0o755
    } else if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Unpacks a stream produced by [`pack`] into `output`.
///
/// `compressed` must match the flag given to [`pack`]. Directories are
/// created (mode 0755) in a first pass, regular files are written in a second
/// pass with their recorded mode. Other entry types are ignored.
pub fn unpack(
    archive: &[u8],
    output: &Path,
    compressed: bool,
    cancel: &Cancellation,
) -> ArchiveResult<UnpackSummary> {
    let mut summary = UnpackSummary::default();
    create_dir(output)?;

    let mut dirs = open_archive(archive, compressed);
    for entry in dirs.entries().map_err(ArchiveError::io(output))? {
        cancel.check()?;
        let entry = entry.map_err(ArchiveError::io(output))?;
        if entry.header().entry_type() != EntryType::Directory {
            continue;
        }
        let relative = safe_relative_path(&entry)?;
        create_dir(&output.join(relative))?;
        summary.directories += 1;
    }

    let mut files = open_archive(archive, compressed);
    for entry in files.entries().map_err(ArchiveError::io(output))? {
        cancel.check()?;
        let mut entry = entry.map_err(ArchiveError::io(output))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let relative = safe_relative_path(&entry)?;
        let target = output.join(relative);
        if let Some(parent) = target.parent() {
            create_dir(parent)?;
        }

        let mode = entry.header().mode().unwrap_or(0o644);
        let mut file = File::create(&target).map_err(ArchiveError::io(&target))?;
        let written = io::copy(&mut entry, &mut file).map_err(ArchiveError::io(&target))?;
        set_mode(&target, mode)?;

        summary.files += 1;
        summary.bytes += written;
    }

    debug!(
        output = %output.display(),
        directories = summary.directories,
        files = summary.files,
        bytes = summary.bytes,
        "unpacked archive"
    );
    Ok(summary)
}

fn open_archive(bytes: &[u8], compressed: bool) -> Archive<Box<dyn Read + '_>> {
    let reader: Box<dyn Read + '_> = if compressed {
        Box::new(GzDecoder::new(bytes))
    } else {
        Box::new(bytes)
    };
    Archive::new(reader)
}

fn safe_relative_path<R: Read>(entry: &tar::Entry<'_, R>) -> ArchiveResult<PathBuf> {
    let path = entry
        .path()
        .map_err(|e| ArchiveError::UnsafePath(e.to_string()))?
        .into_owned();

    let normal = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !normal || path.as_os_str().is_empty() {
        return Err(ArchiveError::UnsafePath(path.display().to_string()));
    }
    Ok(path)
}

#[cfg(unix)]
fn create_dir(path: &Path) -> ArchiveResult<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(ArchiveError::io(path))
}

#[cfg(not(unix))]
fn create_dir(path: &Path) -> ArchiveResult<()> {
    fs::create_dir_all(path).map_err(ArchiveError::io(path))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> ArchiveResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777))
        .map_err(ArchiveError::io(path))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> ArchiveResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_magic_detection() {
        assert!(is_gzip(&[0x1f, 0x8b, 0x08]));
        assert!(!is_gzip(b"ustar"));
        assert!(!is_gzip(&[]));
    }

    #[test]
    fn missing_source_is_io_error() {
        let err = pack(
            Path::new("/definitely/not/here"),
            false,
            &Cancellation::new(),
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[test]
    fn garbage_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = vec![0x42u8; 1024];
        assert!(unpack(&garbage, dir.path(), false, &Cancellation::new()).is_err());
    }
}
