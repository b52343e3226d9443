//! Support for driving the external `smbclient` program.
//!
//! The fetcher never speaks SMB itself. It describes what it wants as an [`Invocation`], hands
//! it to an [`SmbClient`] and classifies the [`ClientOutput`] that comes back.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::location::ShareLocation;

/// The program run by [`Smbclient::default`].
pub const DEFAULT_PROGRAM: &str = "smbclient";

const NOT_FOUND: &[&str] = &[
    "NT_STATUS_OBJECT_NAME_NOT_FOUND",
    "NT_STATUS_OBJECT_PATH_NOT_FOUND",
    "NT_STATUS_NO_SUCH_FILE",
    "NT_STATUS_BAD_NETWORK_NAME",
];
const ACCESS_DENIED: &[&str] = &["NT_STATUS_ACCESS_DENIED"];
const IS_A_DIRECTORY: &[&str] = &["NT_STATUS_FILE_IS_A_DIRECTORY"];

/// A command run inside the share with `-c`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Print the attributes of `name` in the current remote directory.
    AllInfo { name: String },
    /// Copy the file `name` in the current remote directory to `local`.
    Get { name: String, local: PathBuf },
    /// Copy everything below the current remote directory into the working directory.
    GetRecursive,
}

impl std::fmt::Display for ClientCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllInfo { name } => write!(f, "allinfo \"{name}\""),
            Self::Get { name, local } => write!(f, "get \"{name}\" \"{}\"", local.display()),
            Self::GetRecursive => write!(f, "prompt OFF; recurse ON; mget *"),
        }
    }
}

/// One run of the client against a share.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    /// `//host/share`
    pub service: String,
    /// Remote directory the command runs in, relative to the share root.
    pub directory: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub command: ClientCommand,
    /// Local working directory of the client process, if any.
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new<D: Into<String>>(
        location: &ShareLocation,
        directory: D,
        command: ClientCommand,
    ) -> Self {
        Self {
            service: location.service(),
            directory: directory.into(),
            username: location.username().map(String::from),
            password: location.password().map(String::from),
            command,
            working_dir: None,
        }
    }

    /// Run the client process inside `dir`.
    pub fn in_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// The arguments passed to the client program.
    pub fn args(&self) -> Vec<String> {
        self.render_args(self.password.as_deref())
    }

    fn render_args(&self, password: Option<&str>) -> Vec<String> {
        let mut args = vec!["-N".to_string()];
        if let Some(username) = &self.username {
            let auth = match password {
                Some(password) => format!("{username}%{password}"),
                None => username.clone(),
            };
            args.push("-U".to_string());
            args.push(auth);
        }
        args.push(self.service.clone());
        args.push("--directory".to_string());
        args.push(self.directory.clone());
        args.push("-c".to_string());
        args.push(self.command.to_string());
        args
    }
}

/// Renders the arguments with the password masked.
impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked = self.password.as_ref().map(|_| "***");
        let args = self.render_args(masked);
        write!(f, "{}", args.join(" "))
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("service", &self.service)
            .field("directory", &self.directory)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .finish()
    }
}

/// How a run that reported a problem should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    NotFound,
    AccessDenied,
    IsDirectory,
    Other,
}

/// What the client printed and how it exited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ClientOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// stdout followed by stderr.
    pub fn text(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }

    /// Whether the run failed, and how. The output is checked for known status codes even when
    /// the client exited successfully, since a failing `-c` command does not always change the
    /// exit status.
    pub fn failure(&self) -> Option<Failure> {
        let text = self.text();
        let mentions = |codes: &[&str]| codes.iter().any(|code| text.contains(code));
        if mentions(NOT_FOUND) {
            Some(Failure::NotFound)
        } else if mentions(ACCESS_DENIED) {
            Some(Failure::AccessDenied)
        } else if mentions(IS_A_DIRECTORY) {
            Some(Failure::IsDirectory)
        } else if !self.success() {
            Some(Failure::Other)
        } else {
            None
        }
    }

    /// Interpret the output of [`ClientCommand::AllInfo`]. Returns `None` if it has no
    /// `attributes:` line.
    pub fn is_directory(&self) -> Option<bool> {
        self.stdout.lines().find_map(|line| {
            let flags = line.trim().strip_prefix("attributes:")?;
            let flags = flags.split_whitespace().next().unwrap_or_default();
            Some(flags.contains('D'))
        })
    }
}

impl From<std::process::Output> for ClientOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Errors which stop the client from producing any output at all.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cancelled")]
    Canceled,
    #[error("failed to run '{program}'")]
    Io {
        program: String,
        #[source]
        err: std::io::Error,
    },
}

/// Something that can carry out an [`Invocation`].
///
/// When `cancel` fires before the run finishes, implementations stop any work they started and
/// return [`ClientError::Canceled`].
pub trait SmbClient: Send + Sync {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ClientOutput, ClientError>>;
}

impl<C: SmbClient + ?Sized> SmbClient for std::sync::Arc<C> {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ClientOutput, ClientError>> {
        (**self).run(invocation, cancel)
    }
}

/// Runs the `smbclient` program as a subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Smbclient {
    program: PathBuf,
}

impl Default for Smbclient {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl Smbclient {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn command(&self, invocation: &Invocation) -> tokio::process::Command {
        let mut smbclient = tokio::process::Command::new(&self.program);
        smbclient.args(invocation.args());
        if let Some(dir) = &invocation.working_dir {
            smbclient.current_dir(dir);
        }
        smbclient
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        smbclient
    }

    async fn run_to_completion(
        &self,
        invocation: &Invocation,
        cancel: &CancellationToken,
    ) -> Result<ClientOutput, ClientError> {
        let io_error = |err| ClientError::Io {
            program: self.program.display().to_string(),
            err,
        };
        if cancel.is_cancelled() {
            return Err(ClientError::Canceled);
        }
        let child = self.command(invocation).spawn().map_err(io_error)?;
        tokio::select! {
            output = child.wait_with_output() => Ok(output.map_err(io_error)?.into()),
            // Dropping the pending wait drops the child, which kills it.
            _ = cancel.cancelled() => {
                tracing::debug!(program = %self.program.display(), "killing cancelled smb client");
                Err(ClientError::Canceled)
            }
        }
    }
}

impl SmbClient for Smbclient {
    fn run<'a>(
        &'a self,
        invocation: &'a Invocation,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ClientOutput, ClientError>> {
        Box::pin(self.run_to_completion(invocation, cancel))
    }
}
