//! Error type shared by every layer of the editor.
//!
//! Each variant carries the already-formatted message that the command shell
//! prints. `Exhausted` and `Corrupt` are the fatal class: they abort the
//! current command outright instead of merely failing it.

use std::error;
use std::fmt;
use std::io;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(Debug)]
pub enum FsError {
    /// Path does not resolve.
    NotFound(String),
    /// Operation applied to the wrong file type.
    WrongType(String),
    /// Name already present.
    AlreadyExists(String),
    /// Directory still holds entries besides "." and "..".
    NotEmpty(String),
    /// Malformed argument (empty name, unlink of "." or "..", ...).
    InvalidArgument(String),
    /// Offset past end of file, or offset arithmetic overflow.
    IoBounds(String),
    /// Request beyond the maximum file size.
    Capacity(String),
    /// No free inode or data block left.
    Exhausted(String),
    /// The image contradicts its own metadata.
    Corrupt(String),
    /// Host-side I/O failure.
    Io(io::Error),
}

impl FsError {
    /// Fatal errors unwind the whole command; the entry point prefixes them
    /// with `FATAL:` on the way out.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Exhausted(_) | FsError::Corrupt(_))
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound(m)
            | FsError::WrongType(m)
            | FsError::AlreadyExists(m)
            | FsError::NotEmpty(m)
            | FsError::InvalidArgument(m)
            | FsError::IoBounds(m)
            | FsError::Capacity(m)
            | FsError::Exhausted(m)
            | FsError::Corrupt(m) => f.write_str(m),
            FsError::Io(e) => write!(f, "{e}"),
        }
    }
}

impl error::Error for FsError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            FsError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FsError {
    fn from(e: io::Error) -> Self {
        FsError::Io(e)
    }
}
