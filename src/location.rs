//! Parsing of `smb://` URLs into the parameters needed to reach a share.

use url::Url;

use crate::error::Error;

/// A path inside an SMB share, together with how to reach and authenticate against it.
///
/// Built from URLs of the form `smb://[user[:password]@]host/share/path...`. The first path
/// segment names the share and the remaining segments the path inside it.
#[derive(Clone, PartialEq, Eq)]
pub struct ShareLocation {
    host: String,
    share: String,
    path: Vec<String>,
    username: Option<String>,
    password: Option<String>,
}

impl ShareLocation {
    /// Parse a URL string into a `ShareLocation`.
    pub fn parse<S: AsRef<str>>(url: S) -> Result<Self, Error> {
        let url = url.as_ref();
        let parsed = Url::parse(url).map_err(|err| Error::invalid_url(url, err))?;
        Self::try_from(&parsed)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn share(&self) -> &str {
        &self.share
    }

    /// The segments of the path inside the share. Never empty.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// The service name passed to the client, i.e. `//host/share`.
    pub fn service(&self) -> String {
        format!("//{}/{}", self.host, self.share)
    }

    /// The path inside the share joined with `/`.
    pub fn remote_path(&self) -> String {
        self.path.join("/")
    }

    /// The last path segment.
    pub fn file_name(&self) -> &str {
        // `path` is non-empty once constructed
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// The directory containing [`file_name`](Self::file_name), or `.` at the root of the share.
    pub fn parent_dir(&self) -> String {
        match self.path.split_last() {
            Some((_, parent)) if !parent.is_empty() => parent.join("/"),
            _ => ".".to_string(),
        }
    }
}

/// Render `url` with any password replaced by `***`.
pub(crate) fn redacted(url: &Url) -> String {
    if url.password().is_none() {
        return url.to_string();
    }
    let mut url = url.clone();
    // Only fails for URLs without a host, which cannot carry a password
    url.set_password(Some("***")).ok();
    url.to_string()
}

fn decode(component: &str, url: &Url) -> Result<String, Error> {
    urlencoding::decode(component)
        .map(|decoded| decoded.into_owned())
        .map_err(|err| Error::invalid_url(redacted(url), err))
}

/// Path segments end up in local paths, so they must not escape their parent. They are also
/// quoted inside client commands, which are split on `;` regardless of quoting.
fn decode_segment(segment: &str, url: &Url) -> Result<String, Error> {
    let decoded = decode(segment, url)?;
    if decoded == "."
        || decoded == ".."
        || decoded.contains(['/', '\\', ';', '"'])
        || decoded.chars().any(char::is_control)
    {
        return Err(Error::invalid_url(
            redacted(url),
            format!("invalid path segment '{decoded}'"),
        ));
    }
    Ok(decoded)
}

impl TryFrom<&Url> for ShareLocation {
    type Error = Error;

    fn try_from(url: &Url) -> Result<Self, Self::Error> {
        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(Error::invalid_url(redacted(url), "no host given")),
        };
        let mut segments = url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|segment| !segment.is_empty())
            .map(|segment| decode_segment(segment, url))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter();
        let Some(share) = segments.next() else {
            return Err(Error::MissingPath { url: redacted(url) });
        };
        let path: Vec<String> = segments.collect();
        if path.is_empty() {
            return Err(Error::MissingPath { url: redacted(url) });
        }
        let username = match url.username() {
            "" => None,
            name => Some(decode(name, url)?),
        };
        let password = url.password().map(|p| decode(p, url)).transpose()?;
        Ok(Self {
            host,
            share,
            path,
            username,
            password,
        })
    }
}

impl std::fmt::Display for ShareLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "smb://")?;
        if let Some(username) = &self.username {
            write!(f, "{username}")?;
            if self.password.is_some() {
                write!(f, ":***")?;
            }
            write!(f, "@")?;
        }
        write!(f, "{}/{}/{}", self.host, self.share, self.remote_path())
    }
}

impl std::fmt::Debug for ShareLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareLocation")
            .field("host", &self.host)
            .field("share", &self.share)
            .field("path", &self.path)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}
