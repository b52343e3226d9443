#![allow(dead_code)]

//! A fake `smbclient` backed by a local directory tree.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use fetch_smb::client::{ClientCommand, ClientError, ClientOutput, Invocation, SmbClient};
use fetch_smb::mount::NoMounts;
use fetch_smb::{MountResolver, Request, SmbFetcher};
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

pub const SERVICE: &str = "//samba/shared";

/// Which commands a [`FakeShare`] stalls on until it is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hang {
    Never,
    Always,
    Transfer,
}

/// Emulates the subset of `smbclient` that the fetcher uses. The contents of the share are the
/// contents of `root`.
pub struct FakeShare {
    root: PathBuf,
    credentials: Option<(String, String)>,
    hang: Hang,
    fail_after_first_file: bool,
    invocations: Mutex<Vec<Invocation>>,
}

impl FakeShare {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            credentials: None,
            hang: Hang::Never,
            fail_after_first_file: false,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Reject sessions that authenticate as anyone other than `username` with `password`.
    /// Guest sessions are still accepted.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.credentials = Some((username.to_string(), password.to_string()));
        self
    }

    /// Never finish a run until it is cancelled.
    pub fn hanging(mut self) -> Self {
        self.hang = Hang::Always;
        self
    }

    /// Answer `allinfo` normally but stall on `get` and `mget` until cancelled.
    pub fn hanging_in_transfer(mut self) -> Self {
        self.hang = Hang::Transfer;
        self
    }

    fn hangs_on(&self, command: &ClientCommand) -> bool {
        match self.hang {
            Hang::Never => false,
            Hang::Always => true,
            Hang::Transfer => !matches!(command, ClientCommand::AllInfo { .. }),
        }
    }

    /// Drop the connection after the first file of a recursive transfer.
    pub fn failing_midway(mut self) -> Self {
        self.fail_after_first_file = true;
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    fn failed(stderr: &str) -> ClientOutput {
        ClientOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: format!("{stderr}\n"),
        }
    }

    fn ok(stdout: String) -> ClientOutput {
        ClientOutput {
            code: Some(0),
            stdout,
            stderr: String::new(),
        }
    }

    fn respond(&self, invocation: &Invocation) -> ClientOutput {
        if invocation.service != SERVICE {
            return Self::failed("tree connect failed: NT_STATUS_BAD_NETWORK_NAME");
        }
        if let (Some((username, password)), Some(given)) =
            (&self.credentials, invocation.username.as_ref())
            && (given != username || invocation.password.as_ref() != Some(password))
        {
            return Self::failed("session setup failed: NT_STATUS_LOGON_FAILURE");
        }
        let dir = self.root.join(&invocation.directory);
        if !dir.is_dir() {
            return Self::failed("cd \\: NT_STATUS_OBJECT_PATH_NOT_FOUND");
        }
        match &invocation.command {
            ClientCommand::AllInfo { name } => {
                let path = dir.join(name);
                if path.is_dir() {
                    Self::ok(format!("altname: {name}\nattributes: D (10)\n"))
                } else if path.is_file() {
                    Self::ok(format!("altname: {name}\nattributes: A (20)\n"))
                } else {
                    Self::failed(&format!(
                        "NT_STATUS_OBJECT_NAME_NOT_FOUND listing \\{name}"
                    ))
                }
            }
            ClientCommand::Get { name, local } => {
                let path = dir.join(name);
                if path.is_dir() {
                    Self::failed(&format!(
                        "NT_STATUS_FILE_IS_A_DIRECTORY opening remote file \\{name}"
                    ))
                } else if !path.is_file() {
                    Self::failed(&format!(
                        "NT_STATUS_OBJECT_NAME_NOT_FOUND opening remote file \\{name}"
                    ))
                } else {
                    let local = match &invocation.working_dir {
                        Some(cwd) => cwd.join(local),
                        None => local.clone(),
                    };
                    match std::fs::copy(&path, &local) {
                        Ok(size) => Self::ok(format!(
                            "getting file \\{name} of size {size} as {}\n",
                            local.display()
                        )),
                        Err(err) => Self::failed(&format!("Error opening local file: {err}")),
                    }
                }
            }
            ClientCommand::GetRecursive => {
                let Some(into) = invocation.working_dir.as_ref() else {
                    return Self::failed("no working directory");
                };
                let limit = self.fail_after_first_file.then_some(1);
                match copy_tree(&dir, into, limit) {
                    Ok(true) => Self::ok(String::new()),
                    Ok(false) => Self::failed("NT_STATUS_CONNECTION_RESET"),
                    Err(err) => Self::failed(&format!("Error writing local file: {err}")),
                }
            }
        }
    }
}

impl SmbClient for FakeShare {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ClientOutput, ClientError>> {
        Box::pin(async move {
            self.invocations.lock().unwrap().push(invocation.clone());
            if self.hangs_on(&invocation.command) {
                cancel.cancelled().await;
                return Err(ClientError::Canceled);
            }
            Ok(self.respond(invocation))
        })
    }
}

/// Copy everything below `from` into `into`. Copies at most `limit` files and reports whether
/// the whole tree was copied.
fn copy_tree(from: &Path, into: &Path, limit: Option<usize>) -> std::io::Result<bool> {
    let mut copied = 0usize;
    for relative in relative_files(from) {
        if limit.is_some_and(|limit| copied >= limit) {
            return Ok(false);
        }
        let dest = into.join(&relative);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(from.join(&relative), dest)?;
        copied += 1;
    }
    Ok(true)
}

/// Paths of all files below `root`, relative to `root`.
pub fn relative_files(root: &Path) -> BTreeSet<PathBuf> {
    fn walk(root: &Path, dir: &Path, files: &mut BTreeSet<PathBuf>) {
        for entry in std::fs::read_dir(dir).expect("Failed to read directory") {
            let path = entry.expect("Failed to read directory entry").path();
            if path.is_dir() {
                walk(root, &path, files);
            } else {
                files.insert(path.strip_prefix(root).unwrap().to_path_buf());
            }
        }
    }
    let mut files = BTreeSet::new();
    walk(root, root, &mut files);
    files
}

/// A share containing:
///
/// ```text
/// file.txt
/// subdir/file.txt
/// subdir/deeper/leaf.txt
/// ```
pub fn seeded_share_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().expect("Failed to create share directory");
    let root = dir.path();
    std::fs::create_dir_all(root.join("subdir/deeper")).unwrap();
    std::fs::write(root.join("file.txt"), "top level\n").unwrap();
    std::fs::write(root.join("subdir/file.txt"), "in subdir\n").unwrap();
    std::fs::write(root.join("subdir/deeper/leaf.txt"), "leaf\n").unwrap();
    dir
}

pub fn fetcher<M: MountResolver>(
    share: &Arc<FakeShare>,
    mounts: M,
) -> SmbFetcher<Arc<FakeShare>, M> {
    SmbFetcher::new(Arc::clone(share), mounts)
}

pub fn unmounted(share: &Arc<FakeShare>) -> SmbFetcher<Arc<FakeShare>, NoMounts> {
    fetcher(share, NoMounts)
}

pub fn request<P: Into<PathBuf>>(url: &str, destination: P) -> Request {
    Request::new(url::Url::parse(url).expect("Failed to parse test URL"), destination)
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
