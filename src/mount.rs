//! Detection of shares that are already mounted into the local filesystem.

use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::location::ShareLocation;

/// Finds a local path at which a share location is already reachable.
pub trait MountResolver: Send + Sync {
    /// The existing local file or directory for `location`, if there is one.
    fn resolve(&self, location: &ShareLocation) -> Option<PathBuf>;
}

/// How share locations map onto paths below [`LocalMounts::root`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MountLayout {
    /// `<root>/<host>/<share>/<path>`
    #[default]
    HostShare,
    /// `<root>/<share>/<path>`
    Share,
}

/// Looks for mounted shares below a root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalMounts {
    root: PathBuf,
    layout: MountLayout,
}

impl Default for LocalMounts {
    fn default() -> Self {
        Self::new("/", MountLayout::default())
    }
}

impl LocalMounts {
    pub fn new<P: Into<PathBuf>>(root: P, layout: MountLayout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> MountLayout {
        self.layout
    }

    /// The path where `location` would be found if its share were mounted.
    pub fn candidate(&self, location: &ShareLocation) -> PathBuf {
        let mut path = self.root.clone();
        if self.layout == MountLayout::HostShare {
            path.push(location.host());
        }
        path.push(location.share());
        path.extend(location.path());
        path
    }
}

impl MountResolver for LocalMounts {
    fn resolve(&self, location: &ShareLocation) -> Option<PathBuf> {
        let candidate = self.candidate(location);
        match std::fs::metadata(&candidate) {
            Ok(meta) if meta.is_file() || meta.is_dir() => Some(candidate),
            _ => None,
        }
    }
}

/// Never finds a mount, so every request goes through the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoMounts;

impl MountResolver for NoMounts {
    fn resolve(&self, _: &ShareLocation) -> Option<PathBuf> {
        None
    }
}

/// Replace whatever is at `destination` with a symbolic link to `target`.
///
/// Symlinks, files and empty directories are removed first. A non-empty directory is left
/// alone and reported as an error.
pub(crate) fn link_destination(target: &Path, destination: &Path) -> Result<(), Error> {
    match std::fs::symlink_metadata(destination) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir(destination)
            .map_err(|err| Error::io("replace directory", destination, err))?,
        Ok(_) => std::fs::remove_file(destination)
            .map_err(|err| Error::io("replace", destination, err))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            if let Some(parent) = destination.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)
                    .map_err(|err| Error::io("create directory", parent, err))?;
            }
        }
        Err(err) => return Err(Error::io("inspect", destination, err)),
    }
    symlink(target, destination).map_err(|err| Error::io("create symlink at", destination, err))
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    if target.is_dir() {
        std::os::windows::fs::symlink_dir(target, link)
    } else {
        std::os::windows::fs::symlink_file(target, link)
    }
}
