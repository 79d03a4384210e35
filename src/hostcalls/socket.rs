//! Socket side of C4/C5: `connect`/`send`/`recv` claim-route-fall-through,
//! plus the `read`/`write`/`close` symbols this module shares with
//! `hostcalls::fs` (each of those three is a single libc entry point used by
//! both worlds, so it lives at the crate root of `hostcalls` rather than in
//! either leaf module — see `hostcalls::read`/`write`/`close`).

use crate::error::fail_with_errno;
use crate::proxy::{self, ConnectOutcome};
use crate::sys_orig;
use log::trace;
use std::os::raw::{c_int, c_void};

unsafe fn decode_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<(std::net::IpAddr, u16)> {
    if addr.is_null() {
        return None;
    }
    match (*addr).sa_family as c_int {
        libc::AF_INET if len as usize >= std::mem::size_of::<libc::sockaddr_in>() => {
            let sin = &*(addr as *const libc::sockaddr_in);
            let ip = std::net::Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
            let port = u16::from_be(sin.sin_port);
            Some((std::net::IpAddr::V4(ip), port))
        }
        libc::AF_INET6 if len as usize >= std::mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = &*(addr as *const libc::sockaddr_in6);
            let ip = std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let port = u16::from_be(sin6.sin6_port);
            Some((std::net::IpAddr::V6(ip), port))
        }
        _ => None,
    }
}

/// `int connect(int fd, const struct sockaddr *addr, socklen_t len)`.
#[no_mangle]
pub unsafe extern "C" fn connect(fd: c_int, addr: *const libc::sockaddr, len: libc::socklen_t) -> c_int {
    let (host, port) = match decode_sockaddr(addr, len) {
        Some(hp) => hp,
        None => return sys_orig::__warpgrid_orig_connect(fd, addr, len),
    };
    trace!("connect(fd={}, host={}, port={})", fd, host, port);

    match proxy::connect_outcome(host, port) {
        ConnectOutcome::NotManaged => sys_orig::__warpgrid_orig_connect(fd, addr, len),
        ConnectOutcome::Connected(handle) => {
            proxy::record_connect(fd, handle);
            0
        }
        ConnectOutcome::HostRejected => fail_with_errno(crate::error::Error::HostFailure),
    }
}

/// `ssize_t send(int fd, const void *buf, size_t len, int flags)`.
#[no_mangle]
pub unsafe extern "C" fn send(fd: c_int, buf: *const c_void, len: usize, flags: c_int) -> isize {
    if !proxy::is_proxied(fd) {
        return sys_orig::__warpgrid_orig_send(fd, buf, len, flags);
    }
    let data = std::slice::from_raw_parts(buf as *const u8, len);
    let n = proxy::send(fd, data);
    if n < 0 {
        fail_with_errno(crate::error::Error::HostFailure) as isize
    } else {
        n as isize
    }
}

/// `ssize_t recv(int fd, void *buf, size_t len, int flags)`.
#[no_mangle]
pub unsafe extern "C" fn recv(fd: c_int, buf: *mut c_void, len: usize, flags: c_int) -> isize {
    if !proxy::is_proxied(fd) {
        return sys_orig::__warpgrid_orig_recv(fd, buf, len, flags);
    }
    let out = std::slice::from_raw_parts_mut(buf as *mut u8, len);
    let peek = flags & libc::MSG_PEEK != 0;
    let n = proxy::recv(fd, out, peek);
    if n < 0 {
        fail_with_errno(crate::error::Error::HostFailure) as isize
    } else {
        n as isize
    }
}
