//! Configuration of a [`SmbFetcher`](crate::SmbFetcher).

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::client::DEFAULT_PROGRAM;
use crate::error::Error;
use crate::mount::MountLayout;

/// Overrides [`Config::client`].
pub const CLIENT_ENV: &str = "FETCH_SMB_CLIENT";
/// Overrides [`Config::mount_root`].
pub const MOUNT_ROOT_ENV: &str = "FETCH_SMB_MOUNT_ROOT";

/// Settings for fetching from SMB shares. Every key is optional:
///
/// ```toml
/// client = "/usr/bin/smbclient"
/// mount-root = "/mnt"
/// mount-layout = "share"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Config {
    /// The client program used for transfers.
    pub client: PathBuf,
    /// Directory below which mounted shares are looked for.
    pub mount_root: PathBuf,
    pub mount_layout: MountLayout,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client: PathBuf::from(DEFAULT_PROGRAM),
            mount_root: PathBuf::from("/"),
            mount_layout: MountLayout::default(),
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn try_parse_toml<S: AsRef<str>>(toml_str: S) -> Result<Self, Error> {
        Ok(toml::from_str(toml_str.as_ref())?)
    }

    /// Read and parse a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path)
            .map_err(|err| Error::io("read configuration file", path, err))?;
        Self::try_parse_toml(document)
    }

    /// Apply the `FETCH_SMB_CLIENT` and `FETCH_SMB_MOUNT_ROOT` environment variables, if set.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var_os(name))
    }

    fn with_overrides_from<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        if let Some(client) = var(CLIENT_ENV).filter(|v| !v.is_empty()) {
            self.client = PathBuf::from(client);
        }
        if let Some(root) = var(MOUNT_ROOT_ENV).filter(|v| !v.is_empty()) {
            self.mount_root = PathBuf::from(root);
        }
        self
    }
}
