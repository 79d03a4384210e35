//! The error vocabulary shared by every internal component (C2-C5).
//!
//! Nothing in this crate panics on a reachable failure path; every fallible
//! operation returns `Result<T>` and the C5 patch layer is the only place
//! that ever collapses an `Error` into a POSIX errno or an `EAI_*` code.

use failure::Fail;
use std::os::raw::c_int;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Fail, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A write-capable open mode was requested against a virtual path.
    #[fail(display = "virtual path is read-only")]
    Rofs,
    /// A virtual fd/stream was used after `close`/`fclose`, or an operation
    /// was attempted against an fd no table recognizes.
    #[fail(display = "bad file descriptor")]
    Badf,
    /// A caller-supplied argument fails validation (bad `whence`, bad
    /// family, truncated `sockaddr`, malformed proxy-conf line reaching a
    /// context that doesn't tolerate it, ...).
    #[fail(display = "invalid argument")]
    Inval,
    /// The host shim ABI returned a negative ("error") result.
    #[fail(display = "host shim reported failure")]
    HostFailure,
    /// A destination buffer was too small to hold the formatted result.
    #[fail(display = "result did not fit in the supplied buffer")]
    Overflow,
    /// Arithmetic on an offset/length would not fit the target type.
    #[fail(display = "value out of range")]
    Range,
}

impl Error {
    /// The POSIX errno this error should be surfaced as when a plain
    /// int-returning syscall (`open`, `read`, `lseek`, `close`, `connect`,
    /// `send`, `recv`, `write`) fails.
    pub fn to_errno(self) -> c_int {
        match self {
            Error::Rofs => libc::EROFS,
            Error::Badf => libc::EBADF,
            Error::Inval => libc::EINVAL,
            Error::HostFailure => libc::EIO,
            Error::Overflow => libc::EOVERFLOW,
            Error::Range => libc::EOVERFLOW,
        }
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Error::Range
    }
}

/// Sets the thread's `errno` to the errno this error maps to, the way every
/// patched libc entry point is required to on failure, and returns -1 for
/// convenience at call sites that follow the usual C `return -1` idiom.
pub fn fail_with_errno(err: Error) -> c_int {
    unsafe {
        *libc::__errno_location() = err.to_errno();
    }
    -1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rofs_maps_to_erofs() {
        assert_eq!(Error::Rofs.to_errno(), libc::EROFS);
    }

    #[test]
    fn badf_maps_to_ebadf() {
        assert_eq!(Error::Badf.to_errno(), libc::EBADF);
    }

    #[test]
    fn fail_with_errno_sets_global_errno_and_returns_minus_one() {
        let ret = fail_with_errno(Error::Inval);
        assert_eq!(ret, -1);
        assert_eq!(std::io::Error::last_os_error().raw_os_error(), Some(libc::EINVAL));
    }
}
