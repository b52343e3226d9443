use crate::fetcher::Operation;

/// Categories of errors that can be matched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The URL has no host or could not be parsed at all
    InvalidUrl,
    /// The URL names a host (and maybe a share) but no path inside the share
    MissingPath,
    /// The remote path does not exist
    RemoteNotFound,
    /// The remote path exists but may not be read
    RemoteAccessDenied,
    /// A single file was requested but the remote path is a directory
    NotAFile,
    /// The external client failed for any other reason
    TransferFailed,
    /// The operation was cancelled before it completed
    Canceled,
    /// Local filesystem errors
    Io,
    /// Configuration errors
    Config,
}

/// The main error enum for this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid smb url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("smb url '{url}' does not name a path inside the share")]
    MissingPath { url: String },

    #[error("{op} {url}: remote path not found\n{diagnostic}")]
    RemoteNotFound {
        op: Operation,
        url: String,
        diagnostic: String,
    },

    #[error("{op} {url}: access denied\n{diagnostic}")]
    RemoteAccessDenied {
        op: Operation,
        url: String,
        diagnostic: String,
    },

    #[error("{op} {url}: remote path is a directory, not a file")]
    NotAFile { op: Operation, url: String },

    #[error("{op} {url}: command '{command}' failed{}\n{diagnostic}", fmt_status(.status))]
    TransferFailed {
        op: Operation,
        url: String,
        command: String,
        status: Option<i32>,
        diagnostic: String,
    },

    #[error("{op} {url}: cancelled")]
    Canceled { op: Operation, url: String },

    #[error("failed to {action} {}", path.display())]
    Io {
        action: &'static str,
        path: std::path::PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to read configuration")]
    Config(#[from] toml::de::Error),
}

fn fmt_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!(" with exit status {code}"),
        None => String::new(),
    }
}

impl Error {
    /// Get the error kind for pattern matching
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Error::MissingPath { .. } => ErrorKind::MissingPath,
            Error::RemoteNotFound { .. } => ErrorKind::RemoteNotFound,
            Error::RemoteAccessDenied { .. } => ErrorKind::RemoteAccessDenied,
            Error::NotAFile { .. } => ErrorKind::NotAFile,
            Error::TransferFailed { .. } => ErrorKind::TransferFailed,
            Error::Canceled { .. } => ErrorKind::Canceled,
            Error::Io { .. } => ErrorKind::Io,
            Error::Config(_) => ErrorKind::Config,
        }
    }

    pub(crate) fn invalid_url<U: ToString, R: ToString>(url: U, reason: R) -> Self {
        Self::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn io<P: Into<std::path::PathBuf>>(
        action: &'static str,
        path: P,
        err: std::io::Error,
    ) -> Self {
        Self::Io {
            action,
            path: path.into(),
            err,
        }
    }
}
