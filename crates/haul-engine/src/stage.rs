//! Local filesystem helpers: idempotent directory creation and promotion
//! of finished entries from the staging root into the target root.
//!
//! Staging and target must share a filesystem; promotion is a series of
//! renames.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Create `path` if absent. Returns `true` if it was created.
///
/// An existing directory is not an error, including one created by a
/// concurrent caller between the check and the create.
pub fn ensure_dir(path: &Path) -> io::Result<bool> {
    match fs::create_dir(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(path)?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

/// Move a staged file or directory tree onto `target`.
///
/// Files replace whatever file is at the target. Directories are merged:
/// existing target directories are kept, staged files are renamed into
/// them, and the emptied staging directories are removed.
pub fn promote(staged: &Path, target: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(staged)?;
    if !meta.is_dir() {
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        return fs::rename(staged, target);
    }

    ensure_dir(target)?;
    for child in fs::read_dir(staged)? {
        let child = child?;
        promote(&child.path(), &target.join(child.file_name()))?;
    }
    fs::remove_dir(staged)
}

/// Remove whatever `path` holds, file or tree. Absent is fine.
pub fn clear(path: &Path) -> io::Result<()> {
    let result = match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Whether renames between `a` and `b` stay on one filesystem.
#[cfg(unix)]
pub fn same_filesystem(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(a)?.dev() == fs::metadata(b)?.dev())
}

#[cfg(not(unix))]
pub fn same_filesystem(a: &Path, b: &Path) -> io::Result<bool> {
    fs::metadata(a)?;
    fs::metadata(b)?;
    Ok(true)
}

/// Turn a `/`-separated relative remote path into a local relative path.
///
/// Returns `None` for anything that could escape the root (`..`, absolute
/// components).
pub fn local_relative(rel: &str) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for part in rel.split('/').filter(|p| !p.is_empty()) {
        let mut components = Path::new(part).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(c)), None) => out.push(c),
            _ => return None,
        }
    }
    Some(out)
}
