use core::fmt;

/// Errors surfaced by the decoder.
///
/// Every structural violation in [`crate::coff`], [`crate::optional`],
/// [`crate::section`], [`crate::cor20`], [`crate::directory`] and
/// [`crate::imports`] collapses into [`Error::BadFormat`] with a short,
/// static reason string identifying the check that fired. The more
/// specific variants exist only at the boundary the caller actually
/// cares about: did the path exist, did the OS call fail, or did the
/// bytes not parse.
#[derive(Debug)]
pub enum Error {
    /// The image path passed to [`crate::pe::decode_full_headers`] does not exist.
    FileNotFound,
    /// Opening, sizing, or mapping the file failed. Carries the raw OS error.
    IoError(std::io::Error),
    /// A read exceeded the bounds of the region being decoded.
    OutOfBounds,
    /// A structural rule from the PE/COFF/CLR layout was violated.
    BadFormat(&'static str),
    /// A byte range that was supposed to hold ASCII text contained a byte outside the ASCII range.
    NonAsciiName,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FileNotFound => write!(f, "image path does not exist"),
            Error::IoError(e) => write!(f, "I/O error: {e}"),
            Error::OutOfBounds => write!(f, "read exceeded the bounds of the region"),
            Error::BadFormat(reason) => write!(f, "bad format: {reason}"),
            Error::NonAsciiName => write!(f, "expected ASCII bytes in a name field"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

/// Shorthand used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
