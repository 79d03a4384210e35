//! C1: the host shim ABI contract.
//!
//! The source specification describes this as six symbols declared `weak`
//! in the patched libc, each with a default stub that returns a "not
//! managed, fall through" sentinel, so that a host runtime which never
//! links a strong override sees no behavior change. Rust has no stable
//! equivalent of C weak-symbol overriding (`#[linkage = "weak"]` is
//! nightly-only), so this module realizes the same contract the way the
//! spec's own design notes suggest for "a language without weak symbols": a
//! process-wide table of function-valued fields, initialized to the default
//! stubs, that a host installs real implementations into before any patched
//! libc call runs. The six *names* below are the stable contract surface;
//! the table is merely this crate's mechanism for expressing "installed or
//! not" in safe Rust.

use std::os::raw::{c_int, c_uchar};
use std::sync::RwLock;

pub type DnsResolveFn =
    unsafe extern "C" fn(name: *const c_uchar, family: c_int, out_buf: *mut c_uchar, out_len: c_int) -> c_int;
pub type FsReadVirtualFn =
    unsafe extern "C" fn(path: *const c_uchar, out_buf: *mut c_uchar, out_len: c_int) -> c_int;
pub type DbProxyConnectFn = unsafe extern "C" fn(host: *const c_uchar, port: c_int) -> c_int;
pub type DbProxySendFn =
    unsafe extern "C" fn(handle: c_int, data: *const c_uchar, len: c_int) -> c_int;
pub type DbProxyRecvFn =
    unsafe extern "C" fn(handle: c_int, buf: *mut c_uchar, max: c_int, peek: c_int) -> c_int;
pub type DbProxyCloseFn = unsafe extern "C" fn(handle: c_int) -> c_int;

/// "0 records / 0 bytes / not managed" — the universal "fall through to
/// stock WASI" sentinel shared by every entry except `db_proxy_recv`, where
/// 0 additionally means EOF (both readings fall through to ordinary libc
/// behavior: nothing host-managed happened).
pub const NOT_MANAGED: c_int = 0;

unsafe extern "C" fn default_dns_resolve(
    _name: *const c_uchar,
    _family: c_int,
    _out_buf: *mut c_uchar,
    _out_len: c_int,
) -> c_int {
    NOT_MANAGED
}

unsafe extern "C" fn default_fs_read_virtual(
    _path: *const c_uchar,
    _out_buf: *mut c_uchar,
    _out_len: c_int,
) -> c_int {
    NOT_MANAGED
}

unsafe extern "C" fn default_db_proxy_connect(_host: *const c_uchar, _port: c_int) -> c_int {
    NOT_MANAGED
}

unsafe extern "C" fn default_db_proxy_send(
    _handle: c_int,
    _data: *const c_uchar,
    _len: c_int,
) -> c_int {
    NOT_MANAGED
}

unsafe extern "C" fn default_db_proxy_recv(
    _handle: c_int,
    _buf: *mut c_uchar,
    _max: c_int,
    _peek: c_int,
) -> c_int {
    NOT_MANAGED
}

unsafe extern "C" fn default_db_proxy_close(_handle: c_int) -> c_int {
    NOT_MANAGED
}

struct ShimTable {
    dns_resolve: DnsResolveFn,
    fs_read_virtual: FsReadVirtualFn,
    db_proxy_connect: DbProxyConnectFn,
    db_proxy_send: DbProxySendFn,
    db_proxy_recv: DbProxyRecvFn,
    db_proxy_close: DbProxyCloseFn,
}

impl Default for ShimTable {
    fn default() -> Self {
        Self {
            dns_resolve: default_dns_resolve,
            fs_read_virtual: default_fs_read_virtual,
            db_proxy_connect: default_db_proxy_connect,
            db_proxy_send: default_db_proxy_send,
            db_proxy_recv: default_db_proxy_recv,
            db_proxy_close: default_db_proxy_close,
        }
    }
}

lazy_static::lazy_static! {
    static ref SHIM: RwLock<ShimTable> = RwLock::new(ShimTable::default());
}

/// Installs a strong `dns_resolve`. Intended to be called once, at host
/// startup, before any patched libc entry point runs.
pub fn install_dns_resolve(f: DnsResolveFn) {
    SHIM.write().unwrap().dns_resolve = f;
}

pub fn install_fs_read_virtual(f: FsReadVirtualFn) {
    SHIM.write().unwrap().fs_read_virtual = f;
}

pub fn install_db_proxy_connect(f: DbProxyConnectFn) {
    SHIM.write().unwrap().db_proxy_connect = f;
}

pub fn install_db_proxy_send(f: DbProxySendFn) {
    SHIM.write().unwrap().db_proxy_send = f;
}

pub fn install_db_proxy_recv(f: DbProxyRecvFn) {
    SHIM.write().unwrap().db_proxy_recv = f;
}

pub fn install_db_proxy_close(f: DbProxyCloseFn) {
    SHIM.write().unwrap().db_proxy_close = f;
}

/// Restores every entry to the default "not managed" stub. Test-only: the
/// real process installs once and never tears down.
#[cfg(test)]
pub fn reset_for_test() {
    *SHIM.write().unwrap() = ShimTable::default();
}

pub(crate) fn dns_resolve(name: *const c_uchar, family: c_int, out_buf: *mut c_uchar, out_len: c_int) -> c_int {
    let f = SHIM.read().unwrap().dns_resolve;
    unsafe { f(name, family, out_buf, out_len) }
}

pub(crate) fn fs_read_virtual(path: *const c_uchar, out_buf: *mut c_uchar, out_len: c_int) -> c_int {
    let f = SHIM.read().unwrap().fs_read_virtual;
    unsafe { f(path, out_buf, out_len) }
}

pub(crate) fn db_proxy_connect(host: *const c_uchar, port: c_int) -> c_int {
    let f = SHIM.read().unwrap().db_proxy_connect;
    unsafe { f(host, port) }
}

pub(crate) fn db_proxy_send(handle: c_int, data: *const c_uchar, len: c_int) -> c_int {
    let f = SHIM.read().unwrap().db_proxy_send;
    unsafe { f(handle, data, len) }
}

pub(crate) fn db_proxy_recv(handle: c_int, buf: *mut c_uchar, max: c_int, peek: c_int) -> c_int {
    let f = SHIM.read().unwrap().db_proxy_recv;
    unsafe { f(handle, buf, max, peek) }
}

pub(crate) fn db_proxy_close(handle: c_int) -> c_int {
    let f = SHIM.read().unwrap().db_proxy_close;
    unsafe { f(handle) }
}

/// Convenience wrapper used by `registry.rs`/`vfs.rs`: reads an entire
/// virtual path through the shim into an owned buffer, growing the
/// destination buffer if the host reports more bytes than fit (the real
/// ABI has no "tell me the size first" step, so callers retry with a
/// larger buffer on a full read).
pub(crate) fn read_virtual_to_vec(path: &str) -> Option<Vec<u8>> {
    let mut cpath = path.as_bytes().to_vec();
    cpath.push(0);

    let mut cap: usize = 4096;
    loop {
        let mut buf = vec![0u8; cap];
        let n = fs_read_virtual(cpath.as_ptr(), buf.as_mut_ptr(), buf.len() as c_int);
        if n == NOT_MANAGED {
            return None;
        }
        if n < 0 {
            return None;
        }
        let n = n as usize;
        if n < cap {
            buf.truncate(n);
            return Some(buf);
        }
        // Host filled the buffer exactly; it may have more. Grow and retry.
        cap *= 2;
    }
}
