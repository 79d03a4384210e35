//! The fall-through target: the sysroot's *original*, unpatched libc
//! entry points.
//!
//! §1 treats "sysroot assembly, compiler flags, packaging" as an external
//! collaborator out of this crate's scope. The one place that collaborator
//! and this crate must agree is naming: when a patched entry point decides
//! a call isn't host-managed, it needs to reach the real implementation of
//! the same symbol it just shadowed. The convention this crate assumes —
//! and which the sysroot build is expected to honor when it links this
//! crate's `#[no_mangle]` definitions in place of the stock ones — is that
//! the original definition of `foo` remains reachable under
//! `__warpgrid_orig_foo` (for example via `objcopy --redefine-sym` on the
//! stock libc archive before this crate's staticlib is linked over it).
//!
//! Every signature here matches its libc counterpart exactly so the call
//! sites in `hostcalls/` are straight pass-throughs.

use libc::{c_char, c_int, c_void, sockaddr, socklen_t, ssize_t, FILE};

extern "C" {
    pub fn __warpgrid_orig_open(path: *const c_char, flags: c_int, ...) -> c_int;
    pub fn __warpgrid_orig_fopen(path: *const c_char, mode: *const c_char) -> *mut FILE;
    pub fn __warpgrid_orig_read(fd: c_int, buf: *mut c_void, count: usize) -> ssize_t;
    pub fn __warpgrid_orig_write(fd: c_int, buf: *const c_void, count: usize) -> ssize_t;
    pub fn __warpgrid_orig_close(fd: c_int) -> c_int;
    pub fn __warpgrid_orig_lseek(fd: c_int, offset: libc::off_t, whence: c_int) -> libc::off_t;

    pub fn __warpgrid_orig_fread(ptr: *mut c_void, size: usize, nmemb: usize, stream: *mut FILE) -> usize;
    pub fn __warpgrid_orig_fgets(s: *mut c_char, size: c_int, stream: *mut FILE) -> *mut c_char;
    pub fn __warpgrid_orig_fgetc(stream: *mut FILE) -> c_int;
    pub fn __warpgrid_orig_feof(stream: *mut FILE) -> c_int;
    pub fn __warpgrid_orig_fclose(stream: *mut FILE) -> c_int;

    pub fn __warpgrid_orig_connect(fd: c_int, addr: *const sockaddr, len: socklen_t) -> c_int;
    pub fn __warpgrid_orig_send(fd: c_int, buf: *const c_void, len: usize, flags: c_int) -> ssize_t;
    pub fn __warpgrid_orig_recv(fd: c_int, buf: *mut c_void, len: usize, flags: c_int) -> ssize_t;

    pub fn __warpgrid_orig_getaddrinfo(
        node: *const c_char,
        service: *const c_char,
        hints: *const libc::addrinfo,
        res: *mut *mut libc::addrinfo,
    ) -> c_int;
    pub fn __warpgrid_orig_gethostbyname(name: *const c_char) -> *mut libc::hostent;
    pub fn __warpgrid_orig_gethostbyaddr(
        addr: *const c_void,
        len: socklen_t,
        af: c_int,
    ) -> *mut libc::hostent;
    pub fn __warpgrid_orig_getnameinfo(
        sa: *const sockaddr,
        salen: socklen_t,
        host: *mut c_char,
        hostlen: socklen_t,
        serv: *mut c_char,
        servlen: socklen_t,
        flags: c_int,
    ) -> c_int;
}
