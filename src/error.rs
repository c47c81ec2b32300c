//! Error types for PTY operations

use std::fmt;
use std::io;

use thiserror::Error;

/// PTY error type
#[derive(Error, Debug)]
pub enum Error {
    /// The backend does not exist on this platform
    #[error("operation not supported on this platform")]
    Unsupported,

    /// The PTY has already been closed
    #[error("pty is closed")]
    Closed,

    /// Allocating the Unix master/slave pair failed
    #[error("failed to open pty: {0}")]
    OpenPty(#[source] io::Error),

    /// Creating one of the ConPTY pipe pairs failed
    #[error("failed to create pipe: {0}")]
    CreatePipe(#[source] io::Error),

    /// CreatePseudoConsole failed
    #[error("failed to create pseudo console: {0}")]
    CreatePseudoConsole(#[source] io::Error),

    /// Allocating or initializing the process attribute list failed
    #[error("failed to initialize attribute list: {0}")]
    AttributeList(#[source] io::Error),

    /// Attaching the pseudo console to the attribute list failed
    #[error("failed to update attribute list: {0}")]
    UpdateAttribute(#[source] io::Error),

    /// Applying a window size failed
    #[error("failed to resize pty: {0}")]
    Resize(#[source] io::Error),

    /// Reading the window size back from the kernel failed
    #[error("failed to query window size: {0}")]
    WindowSize(#[source] io::Error),

    /// Executable search found nothing
    #[error("executable not found: {0}")]
    NotFound(String),

    /// A path could not be resolved or qualified
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The native process-creation call failed
    #[error("failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    /// `wait` was called before a process was started
    #[error("process not started")]
    NotStarted,

    /// The wait was cancelled by the caller
    #[error("wait cancelled")]
    Cancelled,

    /// The wait ran past the context deadline
    #[error("wait deadline exceeded")]
    DeadlineExceeded,

    /// Waiting on the process handle failed
    #[error("failed to wait for process: {0}")]
    Wait(#[source] io::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Nix error
    #[cfg(unix)]
    #[error("System error: {0}")]
    Nix(#[from] nix::Error),

    /// Several teardown steps failed
    #[error("{}", JoinedErrors(.0))]
    Multiple(Vec<Error>),
}

/// Result type for PTY operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Collapse the errors of a multi-step teardown into one value.
    ///
    /// Returns `None` when nothing failed, the error itself when exactly one
    /// step failed, and `Error::Multiple` otherwise.
    pub fn join(mut errors: Vec<Error>) -> Option<Error> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Multiple(errors)),
        }
    }

    /// Whether this error means the PTY was already closed
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }

    /// Whether this error means the backend is unavailable on this platform
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported)
    }
}

struct JoinedErrors<'a>(&'a [Error]);

impl fmt::Display for JoinedErrors<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(e) => e,
            Error::Closed => io::Error::new(io::ErrorKind::NotConnected, err),
            Error::Unsupported => io::Error::new(io::ErrorKind::Unsupported, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
