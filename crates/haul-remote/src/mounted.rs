//! Remote tree mounted into the local namespace (sshfs, NFS, SMB).
//!
//! Remote path `/data/x` resolves to `<mount>/data/x`.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::{join_remote, Entry, RemoteError, RemoteFile, RemoteFs, Result, Walk, WalkEntry};

#[derive(Debug, Clone)]
pub struct MountedFs {
    mount: PathBuf,
}

impl MountedFs {
    /// Attach to a mounted remote.
    ///
    /// Fails with [`RemoteError::Unreachable`] if the mount point is not a
    /// readable directory, which is how a dropped mount shows up.
    pub fn new<P: AsRef<Path>>(mount: P) -> Result<Self> {
        let mount = mount.as_ref().to_path_buf();
        let unreachable = |reason: String| RemoteError::Unreachable {
            location: mount.display().to_string(),
            reason,
        };

        let meta = fs::metadata(&mount).map_err(|e| unreachable(e.to_string()))?;
        if !meta.is_dir() {
            return Err(unreachable("not a directory".to_string()));
        }
        fs::read_dir(&mount).map_err(|e| unreachable(e.to_string()))?;

        debug!(mount = %mount.display(), "Attached mounted remote");
        Ok(Self { mount })
    }

    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// Local path backing a remote path.
    pub fn local_path(&self, remote: &str) -> PathBuf {
        let trimmed = remote.trim_matches('/');
        if trimmed.is_empty() {
            self.mount.clone()
        } else {
            self.mount.join(trimmed)
        }
    }

    fn remote_path(&self, base_remote: &str, base_local: &Path, local: &Path) -> String {
        match local.strip_prefix(base_local) {
            Ok(rel) if rel.as_os_str().is_empty() => join_remote(base_remote, ""),
            Ok(rel) => {
                let rel: Vec<_> = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                join_remote(base_remote, &rel.join("/"))
            }
            Err(_) => local.to_string_lossy().into_owned(),
        }
    }
}

impl RemoteFs for MountedFs {
    fn read_dir(&self, path: &str) -> Result<Vec<Entry>> {
        let local = self.local_path(path);
        let mut entries = Vec::new();

        for item in fs::read_dir(&local).map_err(|e| RemoteError::io(path, e))? {
            let item = item.map_err(|e| RemoteError::io(path, e))?;
            let name = item.file_name().to_string_lossy().into_owned();
            let meta = item
                .metadata()
                .map_err(|e| RemoteError::io(join_remote(path, &name), e))?;
            entries.push(Entry {
                name,
                is_dir: meta.is_dir(),
                size: if meta.is_dir() { 0 } else { meta.len() },
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn walk(&self, path: &str) -> Walk<'_> {
        let base_remote = path.to_string();
        let base_local = self.local_path(path);
        let walker = WalkDir::new(&base_local)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Box::new(walker.map(move |item| {
            let item = item.map_err(|e| {
                let at = e
                    .path()
                    .map(|p| self.remote_path(&base_remote, &base_local, p))
                    .unwrap_or_else(|| base_remote.clone());
                RemoteError::io(at, io::Error::from(e))
            })?;
            let remote = self.remote_path(&base_remote, &base_local, item.path());
            let is_dir = item.file_type().is_dir();
            let size = if is_dir {
                0
            } else {
                item.metadata()
                    .map_err(|e| RemoteError::io(remote.clone(), io::Error::from(e)))?
                    .len()
            };
            Ok(WalkEntry {
                path: remote,
                is_dir,
                size,
            })
        }))
    }

    fn open(&self, path: &str) -> Result<Box<dyn RemoteFile>> {
        let file = File::open(self.local_path(path)).map_err(|e| RemoteError::io(path, e))?;
        Ok(Box::new(MountedFile {
            path: path.to_string(),
            file,
        }))
    }
}

struct MountedFile {
    path: String,
    file: File,
}

impl Read for MountedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl RemoteFile for MountedFile {
    fn size(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| RemoteError::io(self.path.clone(), e))
    }
}
