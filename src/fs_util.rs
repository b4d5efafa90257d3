use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::ZipArchive;

use crate::error::TciaError;
use crate::tcia::ArchiveBlob;

/// Exclusively owned extraction target of one archive. The directory and
/// everything left inside it are removed on drop.
#[derive(Debug)]
pub struct StagingDirectory {
    dir: TempDir,
    files: Vec<PathBuf>,
}

impl StagingDirectory {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Regular files extracted from the archive, in archive order.
    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }
}

/// Expand `blob` into a fresh staging directory under `staging_root` (or the
/// system temp directory). The blob is released when this returns.
pub fn extract_archive(
    blob: ArchiveBlob,
    staging_root: Option<&Path>,
) -> Result<StagingDirectory, TciaError> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("tcia-dl-");
    let dir = match staging_root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
    .map_err(|err| TciaError::Filesystem(format!("create staging directory: {err}")))?;

    let files = extract_zip(blob.into_file(), dir.path())?;
    Ok(StagingDirectory { dir, files })
}

pub fn extract_zip<R: io::Read + io::Seek>(
    reader: R,
    target_dir: &Path,
) -> Result<Vec<PathBuf>, TciaError> {
    let mut archive =
        ZipArchive::new(reader).map_err(|err| TciaError::CorruptArchive(err.to_string()))?;

    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| TciaError::CorruptArchive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(TciaError::CorruptArchive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| TciaError::Filesystem(err.to_string()))?;
            continue;
        }

        ensure_parent(&entry_path)?;
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| TciaError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| TciaError::CorruptArchive(format!("{}: {err}", entry.name())))?;
        files.push(entry_path);
    }
    Ok(files)
}

/// Create `path` if needed and require it to be empty.
pub fn mkdir_safe(path: &Path) -> Result<(), TciaError> {
    fs::create_dir_all(path).map_err(|err| {
        TciaError::Filesystem(format!("create {}: {err}", path.display()))
    })?;
    if !is_empty(path)? {
        return Err(TciaError::DirectoryNotEmpty(path.to_path_buf()));
    }
    Ok(())
}

pub fn is_empty(directory: &Path) -> Result<bool, TciaError> {
    let mut entries = fs::read_dir(directory)
        .map_err(|err| TciaError::Filesystem(format!("read {}: {err}", directory.display())))?;
    Ok(entries.next().is_none())
}

/// Create the parent directories of `path`; succeeds when they already exist.
pub fn ensure_parent(path: &Path) -> Result<(), TciaError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| {
            TciaError::Filesystem(format!("create {}: {err}", parent.display()))
        })?;
    }
    Ok(())
}

/// Move `source` to `destination`, never replacing an existing file.
///
/// Uses a hard link on the same filesystem; otherwise copies into a sibling
/// temp file and persists it without clobbering.
pub fn move_no_clobber(source: &Path, destination: &Path) -> Result<(), TciaError> {
    match fs::hard_link(source, destination) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(TciaError::DestinationExists(destination.to_path_buf()));
        }
        Err(_) => copy_no_clobber(source, destination)?,
    }
    fs::remove_file(source).map_err(|err| {
        TciaError::Filesystem(format!("remove {}: {err}", source.display()))
    })
}

fn copy_no_clobber(source: &Path, destination: &Path) -> Result<(), TciaError> {
    let parent = destination
        .parent()
        .ok_or_else(|| TciaError::Filesystem("invalid destination path".to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".tcia-dl-move")
        .tempfile_in(parent)
        .map_err(|err| TciaError::Filesystem(err.to_string()))?;
    let mut input = fs::File::open(source).map_err(|err| TciaError::Filesystem(err.to_string()))?;
    io::copy(&mut input, temp.as_file_mut())
        .map_err(|err| TciaError::Filesystem(err.to_string()))?;
    temp.persist_noclobber(destination).map_err(|err| {
        if err.error.kind() == io::ErrorKind::AlreadyExists {
            TciaError::DestinationExists(destination.to_path_buf())
        } else {
            TciaError::Filesystem(err.error.to_string())
        }
    })?;
    Ok(())
}

/// Every regular file below `root`, sorted.
pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, TciaError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| TciaError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| TciaError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                items.push(path);
            }
        }
    }
    items.sort();
    Ok(items)
}
