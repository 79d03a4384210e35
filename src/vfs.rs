//! C2: the virtual filesystem table.
//!
//! Exposes host-delivered bytes as read-only files with independent,
//! per-open cursors. Two disjoint-range allocators back two independent
//! tables: one for raw virtual fds (`open`/`read`/`lseek`/`close`), one for
//! virtual `FILE*` streams (`fopen`/`fread`/`fgets`/`fgetc`/`feof`/`fclose`).
//! Both ranges are chosen far above any fd/pointer a real WASI program
//! would otherwise produce, so a patched entry point's claim test is a
//! simple range-and-presence check before it ever has to reason about
//! aliasing with a genuine WASI fd.

use crate::error::{Error, Result};
use crate::shim;
use std::collections::HashMap;
use std::convert::TryFrom;
use std::os::raw::c_int;
use std::sync::Mutex;

/// First fd handed out for a virtual file. WASI fd space is small
/// (stdio + a handful of preopens); this is comfortably disjoint.
const VIRTUAL_FD_BASE: i32 = 0x4000_0000;
/// First opaque token handed out for a virtual `FILE*` stream, kept in a
/// separate range from virtual fds so the two tables never collide even
/// though they're looked up through differently-typed handles.
const VIRTUAL_STREAM_BASE: usize = 0x8000_0000;

struct VirtualBuffer {
    #[allow(dead_code)] // kept for diagnostics / trace! logging at call sites
    path: String,
    bytes: Vec<u8>,
    cursor: usize,
}

impl VirtualBuffer {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let remaining = self.len() - self.cursor;
        let n = out.len().min(remaining);
        out[..n].copy_from_slice(&self.bytes[self.cursor..self.cursor + n]);
        self.cursor += n;
        n
    }

    fn at_eof(&self) -> bool {
        self.cursor >= self.len()
    }
}

struct VfsState {
    fds: HashMap<i32, VirtualBuffer>,
    next_fd: i32,
    streams: HashMap<usize, VirtualBuffer>,
    next_stream: usize,
}

impl Default for VfsState {
    fn default() -> Self {
        Self {
            fds: HashMap::new(),
            next_fd: VIRTUAL_FD_BASE,
            streams: HashMap::new(),
            next_stream: VIRTUAL_STREAM_BASE,
        }
    }
}

lazy_static::lazy_static! {
    static ref STATE: Mutex<VfsState> = Mutex::new(VfsState::default());
}

/// Fetches the host's current bytes for `path`, or `None` if `path` is not
/// a virtual path (the 0-byte "not managed" sentinel from `fs_read_virtual`).
/// Re-queries the host on every call: the spec requires only that an open
/// observe a stable snapshot *within its own lifetime*, not that repeated
/// opens see the same bytes, so there is no guest-side cache to invalidate.
fn fetch(path: &str) -> Option<Vec<u8>> {
    shim::read_virtual_to_vec(path)
}

/// `true` if any of the POSIX open/fopen flags requested write access.
pub fn wants_write(oflags: c_int) -> bool {
    let write_mask = libc::O_WRONLY | libc::O_RDWR | libc::O_APPEND | libc::O_CREAT | libc::O_TRUNC;
    (oflags & write_mask) != 0
}

/// `true` if an fopen mode string (`"r"`, `"w"`, `"a"`, `"r+"`, ...) implies
/// write access.
pub fn mode_wants_write(mode: &str) -> bool {
    mode.contains('w') || mode.contains('a') || mode.contains('+')
}

/// Outcome of a claim test against a virtual path.
pub enum OpenOutcome<H> {
    /// Not a virtual path; fall through to the stock WASI implementation.
    NotManaged,
    /// A virtual path, opened successfully.
    Opened(H),
}

/// `open()`-side claim/route: `Err(Rofs)` if a write-capable mode was
/// requested against a path the host manages.
pub fn open(path: &str, writable: bool) -> Result<OpenOutcome<i32>> {
    let bytes = match fetch(path) {
        Some(b) => b,
        None => return Ok(OpenOutcome::NotManaged),
    };
    if writable {
        return Err(Error::Rofs);
    }
    let mut state = STATE.lock().unwrap();
    let fd = state.next_fd;
    state.next_fd += 1;
    state.fds.insert(
        fd,
        VirtualBuffer {
            path: path.to_owned(),
            bytes,
            cursor: 0,
        },
    );
    Ok(OpenOutcome::Opened(fd))
}

pub fn is_virtual_fd(fd: i32) -> bool {
    STATE.lock().unwrap().fds.contains_key(&fd)
}

pub fn read(fd: i32, out: &mut [u8]) -> Result<usize> {
    let mut state = STATE.lock().unwrap();
    let buf = state.fds.get_mut(&fd).ok_or(Error::Badf)?;
    Ok(buf.read(out))
}

pub const SEEK_SET: c_int = libc::SEEK_SET;
pub const SEEK_CUR: c_int = libc::SEEK_CUR;
pub const SEEK_END: c_int = libc::SEEK_END;

pub fn lseek(fd: i32, offset: i64, whence: c_int) -> Result<i64> {
    let mut state = STATE.lock().unwrap();
    let buf = state.fds.get_mut(&fd).ok_or(Error::Badf)?;
    let len = i64::try_from(buf.len())?;
    let base = match whence {
        SEEK_SET => 0,
        SEEK_CUR => i64::try_from(buf.cursor)?,
        SEEK_END => len,
        _ => return Err(Error::Inval),
    };
    let target = base.checked_add(offset).ok_or(Error::Range)?;
    if target < 0 || target > len {
        return Err(Error::Inval);
    }
    buf.cursor = usize::try_from(target)?;
    Ok(target)
}

pub fn close(fd: i32) -> bool {
    STATE.lock().unwrap().fds.remove(&fd).is_some()
}

// ---- FILE*-level virtual streams ------------------------------------------

pub fn stream_open(path: &str, writable: bool) -> Result<OpenOutcome<usize>> {
    let bytes = match fetch(path) {
        Some(b) => b,
        None => return Ok(OpenOutcome::NotManaged),
    };
    if writable {
        return Err(Error::Rofs);
    }
    let mut state = STATE.lock().unwrap();
    let token = state.next_stream;
    state.next_stream += 1;
    state.streams.insert(
        token,
        VirtualBuffer {
            path: path.to_owned(),
            bytes,
            cursor: 0,
        },
    );
    Ok(OpenOutcome::Opened(token))
}

pub fn is_virtual_stream(token: usize) -> bool {
    STATE.lock().unwrap().streams.contains_key(&token)
}

pub fn stream_read(token: usize, out: &mut [u8]) -> Result<usize> {
    let mut state = STATE.lock().unwrap();
    let buf = state.streams.get_mut(&token).ok_or(Error::Badf)?;
    Ok(buf.read(out))
}

/// `fgetc` semantics: `Ok(None)` at EOF.
pub fn stream_getc(token: usize) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    let n = stream_read(token, &mut byte)?;
    Ok(if n == 0 { None } else { Some(byte[0]) })
}

/// `fgets` semantics: reads up to `out.len() - 1` bytes, stopping after a
/// `\n` if one is seen, and always NUL-terminating. Returns the number of
/// bytes written (excluding the NUL), or `Ok(None)` if the stream was
/// already at EOF before anything was read (signals `fgets` should return
/// `NULL`).
pub fn stream_gets(token: usize, out: &mut [u8]) -> Result<Option<usize>> {
    if out.is_empty() {
        return Ok(Some(0));
    }
    let cap = out.len() - 1;
    let mut state = STATE.lock().unwrap();
    let buf = state.streams.get_mut(&token).ok_or(Error::Badf)?;
    if buf.at_eof() {
        return Ok(None);
    }
    let mut n = 0;
    while n < cap {
        let mut byte = [0u8; 1];
        if buf.read(&mut byte) == 0 {
            break;
        }
        out[n] = byte[0];
        n += 1;
        if byte[0] == b'\n' {
            break;
        }
    }
    out[n] = 0;
    Ok(Some(n))
}

pub fn stream_eof(token: usize) -> Result<bool> {
    let state = STATE.lock().unwrap();
    let buf = state.streams.get(&token).ok_or(Error::Badf)?;
    Ok(buf.at_eof())
}

pub fn stream_close(token: usize) -> bool {
    STATE.lock().unwrap().streams.remove(&token).is_some()
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    let mut state = STATE.lock().unwrap();
    *state = VfsState::default();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_uchar;

    unsafe extern "C" fn fake_fs_read_virtual(
        path: *const c_uchar,
        out_buf: *mut c_uchar,
        out_len: c_int,
    ) -> c_int {
        let path = std::ffi::CStr::from_ptr(path as *const i8).to_str().unwrap();
        let content: &[u8] = match path {
            "/etc/resolv.conf" => b"ABCDEFGHIJ",
            _ => return shim::NOT_MANAGED,
        };
        let n = content.len().min(out_len as usize);
        std::ptr::copy_nonoverlapping(content.as_ptr(), out_buf, n);
        n as c_int
    }

    fn with_shim<T>(f: impl FnOnce() -> T) -> T {
        shim::reset_for_test();
        shim::install_fs_read_virtual(fake_fs_read_virtual);
        reset_for_test();
        let result = f();
        shim::reset_for_test();
        reset_for_test();
        result
    }

    #[test]
    fn non_virtual_path_falls_through() {
        with_shim(|| {
            let outcome = open("/tmp/not-virtual", false).unwrap();
            assert!(matches!(outcome, OpenOutcome::NotManaged));
        });
    }

    #[test]
    fn write_mode_on_virtual_path_is_rofs() {
        with_shim(|| {
            let err = open("/etc/resolv.conf", true).unwrap_err();
            assert_eq!(err, Error::Rofs);
        });
    }

    #[test]
    fn partial_reads_match_scenario_2() {
        with_shim(|| {
            let fd = match open("/etc/resolv.conf", false).unwrap() {
                OpenOutcome::Opened(fd) => fd,
                OpenOutcome::NotManaged => panic!("expected a hit"),
            };
            let mut buf = [0u8; 3];
            assert_eq!(read(fd, &mut buf).unwrap(), 3);
            assert_eq!(&buf, b"ABC");
            assert_eq!(read(fd, &mut buf).unwrap(), 3);
            assert_eq!(&buf, b"DEF");
            assert_eq!(read(fd, &mut buf).unwrap(), 3);
            assert_eq!(&buf, b"GHI");
            assert_eq!(read(fd, &mut buf).unwrap(), 1);
            assert_eq!(&buf[..1], b"J");
            assert_eq!(read(fd, &mut buf).unwrap(), 0);
            close(fd);
        });
    }

    #[test]
    fn independent_cursors_for_same_path() {
        with_shim(|| {
            let fd1 = match open("/etc/resolv.conf", false).unwrap() {
                OpenOutcome::Opened(fd) => fd,
                _ => unreachable!(),
            };
            let fd2 = match open("/etc/resolv.conf", false).unwrap() {
                OpenOutcome::Opened(fd) => fd,
                _ => unreachable!(),
            };
            let mut buf = [0u8; 4];
            read(fd1, &mut buf).unwrap();
            assert_eq!(&buf, b"ABCD");
            // fd2's cursor must be untouched by fd1's read.
            read(fd2, &mut buf).unwrap();
            assert_eq!(&buf, b"ABCD");
            close(fd1);
            close(fd2);
        });
    }

    #[test]
    fn read_after_close_is_badf() {
        with_shim(|| {
            let fd = match open("/etc/resolv.conf", false).unwrap() {
                OpenOutcome::Opened(fd) => fd,
                _ => unreachable!(),
            };
            assert!(close(fd));
            let mut buf = [0u8; 1];
            assert_eq!(read(fd, &mut buf).unwrap_err(), Error::Badf);
        });
    }

    #[test]
    fn lseek_set_cur_end_and_bounds() {
        with_shim(|| {
            let fd = match open("/etc/resolv.conf", false).unwrap() {
                OpenOutcome::Opened(fd) => fd,
                _ => unreachable!(),
            };
            assert_eq!(lseek(fd, 0, SEEK_END).unwrap(), 10);
            assert_eq!(lseek(fd, -10, SEEK_CUR).unwrap(), 0);
            assert_eq!(lseek(fd, 5, SEEK_SET).unwrap(), 5);
            assert_eq!(lseek(fd, 100, SEEK_SET).unwrap_err(), Error::Inval);
            assert_eq!(lseek(fd, -1, SEEK_SET).unwrap_err(), Error::Inval);
            close(fd);
        });
    }

    #[test]
    fn fgets_splits_on_newline_and_nul_terminates() {
        with_shim(|| {
            let token = match stream_open("/etc/resolv.conf", false).unwrap() {
                OpenOutcome::Opened(t) => t,
                _ => unreachable!(),
            };
            let mut buf = [0xFFu8; 8];
            let n = stream_gets(token, &mut buf).unwrap().unwrap();
            assert_eq!(&buf[..n], b"ABCDEFG");
            assert_eq!(buf[n], 0);
            stream_close(token);
        });
    }

    #[test]
    fn virtual_fd_and_stream_ranges_never_collide() {
        with_shim(|| {
            let fd = match open("/etc/resolv.conf", false).unwrap() {
                OpenOutcome::Opened(fd) => fd,
                _ => unreachable!(),
            };
            let token = match stream_open("/etc/resolv.conf", false).unwrap() {
                OpenOutcome::Opened(t) => t,
                _ => unreachable!(),
            };
            assert!(is_virtual_fd(fd));
            assert!(!is_virtual_stream(fd as usize));
            assert!(is_virtual_stream(token));
            close(fd);
            stream_close(token);
        });
    }
}
