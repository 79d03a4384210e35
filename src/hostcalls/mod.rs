//! The thin FFI layer: one module per intercepted libc surface area, each a
//! set of `#[no_mangle] pub unsafe extern "C"` functions that decode C
//! arguments, `trace!`/`debug!` them, and delegate to the pure-Rust logic
//! modules at the crate root.
//!
//! `read`, `write`, and `close` are each a single libc symbol shared by the
//! virtual-fs side (`fs`) and the socket side (`socket`), so they live here
//! instead of being duplicated in (or arbitrarily owned by) either leaf
//! module. The §3 invariant that a given fd is virtual, proxied, or plain —
//! never more than one — is what makes "ask the virtual table, then the
//! proxy table, then fall through" unambiguous.

pub mod dns;
pub mod fs;
pub mod socket;

use crate::error::fail_with_errno;
use crate::{proxy, sys_orig, vfs};
use log::trace;
use std::os::raw::{c_int, c_void};

/// `ssize_t read(int fd, void *buf, size_t count)`.
#[no_mangle]
pub unsafe extern "C" fn read(fd: c_int, buf: *mut c_void, count: usize) -> isize {
    trace!("read(fd={}, count={})", fd, count);

    if vfs::is_virtual_fd(fd) {
        let out = std::slice::from_raw_parts_mut(buf as *mut u8, count);
        return match vfs::read(fd, out) {
            Ok(n) => n as isize,
            Err(e) => fail_with_errno(e) as isize,
        };
    }

    if proxy::is_proxied(fd) {
        let out = std::slice::from_raw_parts_mut(buf as *mut u8, count);
        let n = proxy::recv(fd, out, false);
        return if n < 0 {
            fail_with_errno(crate::error::Error::HostFailure) as isize
        } else {
            n as isize
        };
    }

    sys_orig::__warpgrid_orig_read(fd, buf, count)
}

/// `ssize_t write(int fd, const void *buf, size_t count)`.
#[no_mangle]
pub unsafe extern "C" fn write(fd: c_int, buf: *const c_void, count: usize) -> isize {
    trace!("write(fd={}, count={})", fd, count);

    if vfs::is_virtual_fd(fd) {
        return fail_with_errno(crate::error::Error::Rofs) as isize;
    }

    if proxy::is_proxied(fd) {
        let data = std::slice::from_raw_parts(buf as *const u8, count);
        let n = proxy::send(fd, data);
        return if n < 0 {
            fail_with_errno(crate::error::Error::HostFailure) as isize
        } else {
            n as isize
        };
    }

    sys_orig::__warpgrid_orig_write(fd, buf, count)
}

/// `int close(int fd)`.
#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    trace!("close(fd={})", fd);

    if vfs::is_virtual_fd(fd) {
        vfs::close(fd);
        return 0;
    }

    if proxy::is_proxied(fd) {
        let ret = proxy::close(fd);
        // `fd` is still a real WASI socket reserved for this connection;
        // the host-side close result does not excuse closing it too.
        let wasi_ret = sys_orig::__warpgrid_orig_close(fd);
        return if ret < 0 { ret } else { wasi_ret };
    }

    sys_orig::__warpgrid_orig_close(fd)
}
