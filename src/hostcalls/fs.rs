//! C5, virtual-filesystem side: the `open`/`fopen` family.
//!
//! Each function here is the same three-phase shape as the teacher's
//! `hostcalls/fs.rs`: decode raw arguments, `trace!` them, delegate to the
//! logic module (`crate::vfs`), and encode the result back into the C ABI
//! (an errno-bearing `-1`, a `NULL`, or the plain success value).

use crate::error::fail_with_errno;
use crate::sys_orig;
use crate::vfs::{self, OpenOutcome};
use log::trace;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};

unsafe fn decode_path<'a>(path: *const c_char) -> Option<&'a str> {
    if path.is_null() {
        return None;
    }
    CStr::from_ptr(path).to_str().ok()
}

/// `int open(const char *path, int flags, ...)`.
///
/// Rust has no stable way to *define* a variadic extern function, so the
/// optional `mode` argument C callers may omit is collapsed into a fixed
/// third parameter; on the wasm32 target this is call-site compatible
/// because there is no fixed/variadic calling-convention split the way
/// there is on e.g. x86 varargs.
#[no_mangle]
pub unsafe extern "C" fn open(path: *const c_char, flags: c_int, mode: c_int) -> c_int {
    trace!("open(path={:?}, flags={:#x})", path, flags);

    let path_str = match decode_path(path) {
        Some(p) => p,
        None => return sys_orig::__warpgrid_orig_open(path, flags, mode),
    };

    match vfs::open(path_str, vfs::wants_write(flags)) {
        Ok(OpenOutcome::Opened(fd)) => fd,
        Ok(OpenOutcome::NotManaged) => sys_orig::__warpgrid_orig_open(path, flags, mode),
        Err(e) => fail_with_errno(e),
    }
}

/// `FILE *fopen(const char *path, const char *mode)`.
#[no_mangle]
pub unsafe extern "C" fn fopen(path: *const c_char, mode: *const c_char) -> *mut libc::FILE {
    trace!("fopen(path={:?}, mode={:?})", path, mode);

    let path_str = match decode_path(path) {
        Some(p) => p,
        None => return sys_orig::__warpgrid_orig_fopen(path, mode),
    };
    let mode_str = match decode_path(mode) {
        Some(m) => m,
        None => return sys_orig::__warpgrid_orig_fopen(path, mode),
    };

    match vfs::stream_open(path_str, vfs::mode_wants_write(mode_str)) {
        Ok(OpenOutcome::Opened(token)) => token as *mut libc::FILE,
        Ok(OpenOutcome::NotManaged) => sys_orig::__warpgrid_orig_fopen(path, mode),
        Err(e) => {
            *libc::__errno_location() = e.to_errno();
            std::ptr::null_mut()
        }
    }
}

fn token_of(stream: *mut libc::FILE) -> usize {
    stream as usize
}

/// `size_t fread(void *ptr, size_t size, size_t nmemb, FILE *stream)`.
#[no_mangle]
pub unsafe extern "C" fn fread(
    ptr: *mut c_void,
    size: usize,
    nmemb: usize,
    stream: *mut libc::FILE,
) -> usize {
    let token = token_of(stream);
    if !vfs::is_virtual_stream(token) {
        return sys_orig::__warpgrid_orig_fread(ptr, size, nmemb, stream);
    }
    let total = size.saturating_mul(nmemb);
    let out = std::slice::from_raw_parts_mut(ptr as *mut u8, total);
    match vfs::stream_read(token, out) {
        Ok(n) => n / size.max(1),
        Err(_) => 0,
    }
}

/// `char *fgets(char *s, int size, FILE *stream)`.
#[no_mangle]
pub unsafe extern "C" fn fgets(s: *mut c_char, size: c_int, stream: *mut libc::FILE) -> *mut c_char {
    let token = token_of(stream);
    if !vfs::is_virtual_stream(token) || size <= 0 {
        return sys_orig::__warpgrid_orig_fgets(s, size, stream);
    }
    let out = std::slice::from_raw_parts_mut(s as *mut u8, size as usize);
    match vfs::stream_gets(token, out) {
        Ok(Some(_)) => s,
        Ok(None) => std::ptr::null_mut(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// `int fgetc(FILE *stream)`.
#[no_mangle]
pub unsafe extern "C" fn fgetc(stream: *mut libc::FILE) -> c_int {
    let token = token_of(stream);
    if !vfs::is_virtual_stream(token) {
        return sys_orig::__warpgrid_orig_fgetc(stream);
    }
    match vfs::stream_getc(token) {
        Ok(Some(byte)) => byte as c_int,
        Ok(None) => libc::EOF,
        Err(_) => libc::EOF,
    }
}

/// `int feof(FILE *stream)`.
#[no_mangle]
pub unsafe extern "C" fn feof(stream: *mut libc::FILE) -> c_int {
    let token = token_of(stream);
    if !vfs::is_virtual_stream(token) {
        return sys_orig::__warpgrid_orig_feof(stream);
    }
    match vfs::stream_eof(token) {
        Ok(true) => 1,
        _ => 0,
    }
}

/// `int fclose(FILE *stream)`.
#[no_mangle]
pub unsafe extern "C" fn fclose(stream: *mut libc::FILE) -> c_int {
    let token = token_of(stream);
    if vfs::stream_close(token) {
        return 0;
    }
    sys_orig::__warpgrid_orig_fclose(stream)
}

/// `off_t lseek(int fd, off_t offset, int whence)`. Virtual-fd only; a
/// proxied socket is never seekable and a plain WASI fd falls straight
/// through.
#[no_mangle]
pub unsafe extern "C" fn lseek(fd: c_int, offset: libc::off_t, whence: c_int) -> libc::off_t {
    trace!("lseek(fd={}, offset={}, whence={})", fd, offset, whence);
    if !vfs::is_virtual_fd(fd) {
        return sys_orig::__warpgrid_orig_lseek(fd, offset, whence);
    }
    match vfs::lseek(fd, offset as i64, whence) {
        Ok(pos) => pos as libc::off_t,
        Err(e) => fail_with_errno(e) as libc::off_t,
    }
}
