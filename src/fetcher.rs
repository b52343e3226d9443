//! Classification and retrieval of remote paths.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::client::{
    ClientCommand, ClientError, ClientOutput, Failure, Invocation, SmbClient, Smbclient,
};
use crate::config::Config;
use crate::error::Error;
use crate::location::{ShareLocation, redacted};
use crate::mount::{LocalMounts, MountResolver, link_destination};

/// Whether a remote path is a single file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    File,
    Dir,
}

/// The public operation an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Mode,
    GetFile,
    Get,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mode => write!(f, "mode"),
            Self::GetFile => write!(f, "get-file"),
            Self::Get => write!(f, "get"),
        }
    }
}

/// A source URL to fetch and where to put it.
#[derive(Clone, PartialEq, Eq)]
pub struct Request {
    pub source: Url,
    pub destination: PathBuf,
}

impl Request {
    pub fn new<P: Into<PathBuf>>(source: Url, destination: P) -> Self {
        Self {
            source,
            destination: destination.into(),
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("source", &redacted(&self.source))
            .field("destination", &self.destination)
            .finish()
    }
}

/// Fetches files and directories from SMB shares.
///
/// Holds no state between calls, so one fetcher may serve any number of concurrent requests.
/// Requests for the same destination are not coordinated.
#[derive(Debug, Clone, Default)]
pub struct SmbFetcher<C = Smbclient, M = LocalMounts> {
    client: C,
    mounts: M,
}

impl SmbFetcher {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Smbclient::new(&config.client),
            LocalMounts::new(&config.mount_root, config.mount_layout),
        )
    }
}

impl<C: SmbClient, M: MountResolver> SmbFetcher<C, M> {
    pub fn new(client: C, mounts: M) -> Self {
        Self { client, mounts }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn mounts(&self) -> &M {
        &self.mounts
    }

    /// Determine whether `url` names a file or a directory.
    ///
    /// A path inside a locally mounted share is classified from the local filesystem without
    /// running the client.
    #[instrument(skip_all, name = "smb-mode", fields(url = %redacted(url)))]
    pub async fn mode(&self, cancel: &CancellationToken, url: &Url) -> Result<Mode, Error> {
        let location = ShareLocation::try_from(url)?;
        if let Some(local) = self.mounts.resolve(&location) {
            let meta =
                std::fs::metadata(&local).map_err(|err| Error::io("inspect", &local, err))?;
            debug!(path = %local.display(), "classified from local mount");
            return Ok(if meta.is_dir() { Mode::Dir } else { Mode::File });
        }
        self.remote_mode(Operation::Mode, cancel, &location).await
    }

    /// Fetch a single file to `request.destination`.
    ///
    /// If the destination is an existing directory the file is written inside it under its
    /// remote name. Nothing is left at the destination when the fetch fails, and a file that
    /// was already there is only replaced on success.
    #[instrument(skip_all, name = "smb-get-file", fields(url = %redacted(&request.source)))]
    pub async fn get_file(
        &self,
        cancel: &CancellationToken,
        request: &Request,
    ) -> Result<(), Error> {
        let op = Operation::GetFile;
        let location = ShareLocation::try_from(&request.source)?;
        if let Some(local) = self.mounts.resolve(&location) {
            return link_mounted(&local, &request.destination);
        }
        if self.remote_mode(op, cancel, &location).await? == Mode::Dir {
            return Err(Error::NotAFile {
                op,
                url: location.to_string(),
            });
        }
        let target = if request.destination.is_dir() {
            request.destination.join(location.file_name())
        } else {
            request.destination.clone()
        };
        self.download_file(op, cancel, &location, &target).await
    }

    /// Fetch a directory, recursively, into `request.destination`.
    ///
    /// A remote file is also accepted and is written inside the destination directory under its
    /// remote name. If a directory transfer fails, files copied before the failure are kept.
    #[instrument(skip_all, name = "smb-get", fields(url = %redacted(&request.source)))]
    pub async fn get(&self, cancel: &CancellationToken, request: &Request) -> Result<(), Error> {
        let op = Operation::Get;
        let location = ShareLocation::try_from(&request.source)?;
        if let Some(local) = self.mounts.resolve(&location) {
            return link_mounted(&local, &request.destination);
        }
        match self.remote_mode(op, cancel, &location).await? {
            Mode::File => {
                let target = request.destination.join(location.file_name());
                self.download_file(op, cancel, &location, &target).await
            }
            Mode::Dir => {
                let destination = &request.destination;
                self.download_dir(op, cancel, &location, destination).await
            }
        }
    }

    async fn remote_mode(
        &self,
        op: Operation,
        cancel: &CancellationToken,
        location: &ShareLocation,
    ) -> Result<Mode, Error> {
        let info = ClientCommand::AllInfo {
            name: location.file_name().to_string(),
        };
        let invocation = Invocation::new(location, location.parent_dir(), info);
        let output = self.run(op, cancel, location, &invocation).await?;
        let mode = match output.is_directory() {
            Some(true) => Mode::Dir,
            Some(false) => Mode::File,
            None => {
                return Err(Error::TransferFailed {
                    op,
                    url: location.to_string(),
                    command: invocation.to_string(),
                    status: output.code,
                    diagnostic: format!("no attributes in client output\n{}", output.text()),
                });
            }
        };
        debug!(?mode, "classified remote path");
        Ok(mode)
    }

    async fn download_file(
        &self,
        op: Operation,
        cancel: &CancellationToken,
        location: &ShareLocation,
        target: &Path,
    ) -> Result<(), Error> {
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(|err| Error::io("create directory", &parent, err))?;
        // The client writes to a temporary sibling which is renamed onto `target` only once the
        // transfer succeeded. Dropping `partial` on any other path deletes it.
        let partial = tempfile::Builder::new()
            .prefix(".fetch-smb-")
            .suffix(".partial")
            .tempfile_in(&parent)
            .map_err(|err| Error::io("create temporary file in", &parent, err))?
            .into_temp_path();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&partial, std::fs::Permissions::from_mode(0o644))
                .map_err(|err| Error::io("set permissions of", &*partial, err))?;
        }
        // The client runs in `parent` so only the generated file name enters the command
        let get = ClientCommand::Get {
            name: location.file_name().to_string(),
            local: PathBuf::from(partial.file_name().unwrap_or_default()),
        };
        let invocation = Invocation::new(location, location.parent_dir(), get).in_dir(&parent);
        self.run(op, cancel, location, &invocation).await?;
        partial
            .persist(target)
            .map_err(|err| Error::io("move downloaded file to", target, err.error))?;
        info!(path = %target.display(), "fetched file");
        Ok(())
    }

    async fn download_dir(
        &self,
        op: Operation,
        cancel: &CancellationToken,
        location: &ShareLocation,
        destination: &Path,
    ) -> Result<(), Error> {
        let existed = tokio::fs::symlink_metadata(destination).await.is_ok();
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|err| Error::io("create directory", destination, err))?;
        let invocation =
            Invocation::new(location, location.remote_path(), ClientCommand::GetRecursive)
                .in_dir(destination);
        if let Err(err) = self.run(op, cancel, location, &invocation).await {
            // Only succeeds while the directory is still empty
            if !existed && tokio::fs::remove_dir(destination).await.is_ok() {
                debug!(path = %destination.display(), "removed empty destination");
            } else {
                warn!(
                    path = %destination.display(),
                    "directory fetch failed, partial content may remain"
                );
            }
            return Err(err);
        }
        info!(path = %destination.display(), "fetched directory");
        Ok(())
    }

    /// Run the client and turn anything other than a clean run into an error.
    async fn run(
        &self,
        op: Operation,
        cancel: &CancellationToken,
        location: &ShareLocation,
        invocation: &Invocation,
    ) -> Result<ClientOutput, Error> {
        if cancel.is_cancelled() {
            return Err(Error::Canceled {
                op,
                url: location.to_string(),
            });
        }
        debug!(%invocation, "running smb client");
        let output = match self.client.run(invocation, cancel).await {
            Ok(output) => output,
            Err(ClientError::Canceled) => {
                return Err(Error::Canceled {
                    op,
                    url: location.to_string(),
                });
            }
            Err(err) => {
                let diagnostic = match std::error::Error::source(&err) {
                    Some(source) => format!("{err}: {source}"),
                    None => err.to_string(),
                };
                return Err(Error::TransferFailed {
                    op,
                    url: location.to_string(),
                    command: invocation.to_string(),
                    status: None,
                    diagnostic,
                });
            }
        };
        match output.failure() {
            None => Ok(output),
            Some(failure) => Err(failure_error(failure, op, location, invocation, &output)),
        }
    }
}

fn failure_error(
    failure: Failure,
    op: Operation,
    location: &ShareLocation,
    invocation: &Invocation,
    output: &ClientOutput,
) -> Error {
    let url = location.to_string();
    let diagnostic = output.text().trim().to_string();
    match failure {
        Failure::NotFound => Error::RemoteNotFound { op, url, diagnostic },
        Failure::AccessDenied => Error::RemoteAccessDenied { op, url, diagnostic },
        Failure::IsDirectory => Error::NotAFile { op, url },
        Failure::Other => Error::TransferFailed {
            op,
            url,
            command: invocation.to_string(),
            status: output.code,
            diagnostic,
        },
    }
}

fn link_mounted(local: &Path, destination: &Path) -> Result<(), Error> {
    link_destination(local, destination)?;
    info!(
        mount = %local.display(),
        link = %destination.display(),
        "share is mounted locally, linked instead of copying"
    );
    Ok(())
}
