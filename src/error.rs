use nix::errno::Errno;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures fall into two categories: misuse of the library (bad arguments,
/// violated invariants, a relayed child-side exec failure) and syscalls that
/// failed against the inferior. OS errors keep the call-site prefix so a
/// front-end can print `"Could not resume: Operation not permitted"` as-is.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Usage(String),

    #[error("{prefix}: {}", .source.desc())]
    Os { prefix: String, source: Errno },
}

impl Error {
    pub(crate) fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    pub(crate) fn os(prefix: impl Into<String>, source: Errno) -> Self {
        Error::Os { prefix: prefix.into(), source }
    }

    /// The errno behind an OS error, if this is one.
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Error::Usage(_) => None,
            Error::Os { source, .. } => Some(*source),
        }
    }
}

/// Attaches a call-site prefix to a failed nix call.
pub(crate) trait ErrnoExt<T> {
    fn os_context(self, prefix: &str) -> Result<T>;
}

impl<T> ErrnoExt<T> for nix::Result<T> {
    fn os_context(self, prefix: &str) -> Result<T> {
        self.map_err(|errno| Error::os(prefix, errno))
    }
}
