//! Error handling stuff
use displaydoc::Display;
use nix::errno::Errno;
use std::io;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for everything the simulated kernel and its modules report.
///
/// Each variant corresponds to a kernel errno, see [`Error::errno`].
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid argument
    InvalidArgument,

    /// Bad address
    Fault,

    /// Cannot allocate memory
    ResourceExhausted,

    /// Registration failed: {0}
    Registration(Errno),

    /// No such file or directory: `{0}`
    NotFound(String),

    /// No such device or address: `{0}`
    NoDevice(String),

    /// Already exists: `{0}`
    AlreadyExists(String),

    /// Permission denied: `{0}`
    PermissionDenied(String),
}

impl Error {
    /// The errno a kernel function would have returned for this error.
    pub fn errno(&self) -> Errno {
        match self {
            Self::InvalidArgument => Errno::EINVAL,
            Self::Fault => Errno::EFAULT,
            Self::ResourceExhausted => Errno::ENOMEM,
            Self::Registration(e) => *e,
            Self::NotFound(_) => Errno::ENOENT,
            Self::NoDevice(_) => Errno::ENXIO,
            Self::AlreadyExists(_) => Errno::EEXIST,
            Self::PermissionDenied(_) => Errno::EACCES,
        }
    }

    /// Kernel return convention, `-errno`.
    ///
    /// Always negative, so it can never be confused with a byte count.
    pub fn to_ret(&self) -> isize {
        -(self.errno() as isize)
    }

    /// Turn a `-errno` return value back into an [`Error`].
    ///
    /// Errnos without a dedicated variant become [`Error::Registration`],
    /// values that are no errno at all become [`Errno::UnknownErrno`].
    pub fn from_ret(ret: isize) -> Self {
        let errno = ret
            .checked_neg()
            .and_then(|e| i32::try_from(e).ok())
            .map_or(Errno::UnknownErrno, Errno::from_i32);
        match errno {
            Errno::EINVAL => Self::InvalidArgument,
            Errno::EFAULT => Self::Fault,
            Errno::ENOMEM => Self::ResourceExhausted,
            e => Self::Registration(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        io::Error::from_raw_os_error(e.errno() as i32)
    }
}
