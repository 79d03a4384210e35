//! C4 (the proxy fd-tracking table) and the socket side of C5 (the
//! `connect`/`send`/`recv`/`write`/`close` claim-route-fall-through logic).
//!
//! Kept in one module because the table and the dispatch logic over it are
//! always used together, the way the original C implementation pairs
//! `__warpgrid_proxy_connect` with the fd table it populates.

use crate::registry;
use crate::shim;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::net::IpAddr;
use std::os::raw::c_int;
use std::sync::Mutex;

/// The internal fall-through marker (§GLOSSARY): "this call was not ours to
/// handle, invoke the stock WASI path." Distinct from `-1`, which is a real
/// host-reported error.
pub const NOT_PROXIED: c_int = -2;

lazy_static! {
    static ref TABLE: Mutex<HashMap<i32, i32>> = Mutex::new(HashMap::new());
}

pub fn is_proxied(fd: i32) -> bool {
    TABLE.lock().unwrap().contains_key(&fd)
}

pub fn get_handle(fd: i32) -> Option<i32> {
    TABLE.lock().unwrap().get(&fd).copied()
}

fn insert(fd: i32, handle: i32) {
    TABLE.lock().unwrap().insert(fd, handle);
}

/// Removes `fd` unconditionally; `true` if an entry was actually present.
/// Called from every `close` path regardless of the host's own close
/// result, so a guest-side leak never survives a host-side error.
pub fn remove(fd: i32) -> bool {
    TABLE.lock().unwrap().remove(&fd).is_some()
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    TABLE.lock().unwrap().clear();
}

/// Outcome of `connect`'s claim test against the registry.
pub enum ConnectOutcome {
    /// `(host, port)` is not a registered endpoint; fall through to WASI.
    NotManaged,
    /// The host accepted the connection; the caller must `insert(fd, handle)`
    /// and report success without touching the underlying WASI socket.
    Connected(i32),
    /// The host rejected the connection (negative handle); the caller must
    /// propagate a connect failure and must not insert a table entry.
    HostRejected,
}

/// `connect(fd, host, port)`'s claim/route decision. Does not touch the fd
/// table itself (handled by `record_connect`) so the FFI layer can log the
/// decision before committing it, matching the teacher's trace-then-act
/// shape.
pub fn connect_outcome(host: IpAddr, port: u16) -> ConnectOutcome {
    if !registry::contains(host, port) {
        return ConnectOutcome::NotManaged;
    }
    let host_cstr = std::ffi::CString::new(host.to_string()).expect("IpAddr never contains a NUL");
    let handle = shim::db_proxy_connect(host_cstr.as_ptr() as *const u8, port as c_int);
    if handle > 0 {
        ConnectOutcome::Connected(handle)
    } else if handle == shim::NOT_MANAGED {
        ConnectOutcome::NotManaged
    } else {
        ConnectOutcome::HostRejected
    }
}

/// Commits a successful `ConnectOutcome::Connected` into the fd table. Kept
/// separate from `connect_outcome` so a caller that only wants to observe
/// the routing decision (tests, logging) doesn't have to mutate state.
pub fn record_connect(fd: i32, handle: i32) {
    insert(fd, handle);
}

/// `send`/`write` claim/route. Returns the host's byte count, `-1` mapped
/// from a host error, or `NOT_PROXIED` if `fd` isn't in the table.
pub fn send(fd: i32, data: &[u8]) -> c_int {
    let handle = match get_handle(fd) {
        Some(h) => h,
        None => return NOT_PROXIED,
    };
    let n = shim::db_proxy_send(handle, data.as_ptr(), data.len() as c_int);
    if n < 0 {
        -1
    } else {
        n
    }
}

/// `recv`/`read` claim/route. `peek` mirrors `MSG_PEEK`: the host must not
/// advance its own read position. A partial result is returned verbatim;
/// this function never loops to fill `buf`.
pub fn recv(fd: i32, buf: &mut [u8], peek: bool) -> c_int {
    let handle = match get_handle(fd) {
        Some(h) => h,
        None => return NOT_PROXIED,
    };
    let n = shim::db_proxy_recv(handle, buf.as_mut_ptr(), buf.len() as c_int, peek as c_int);
    if n < 0 {
        -1
    } else {
        n
    }
}

/// `close` claim/route. Always removes the table entry when `fd` was
/// proxied, even if the host's own close reports failure, so the guest
/// never leaks a table slot. Returns `NOT_PROXIED` if `fd` wasn't proxied
/// (idempotent double-close lands here on the second call).
pub fn close(fd: i32) -> c_int {
    let handle = match get_handle(fd) {
        Some(h) => h,
        None => return NOT_PROXIED,
    };
    let ret = shim::db_proxy_close(handle);
    remove(fd);
    if ret < 0 {
        log::warn!("db_proxy_close(handle={}) returned host error {}", handle, ret);
        -1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_uchar;

    struct Fixture;

    impl Fixture {
        fn install() -> Self {
            shim::reset_for_test();
            registry::reset_for_test();
            reset_for_test();
            Fixture
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            shim::reset_for_test();
            reset_for_test();
        }
    }

    static mut CONNECT_CALLS: i32 = 0;
    static mut LAST_HOST: [u8; 64] = [0; 64];
    static mut LAST_PORT: c_int = 0;
    static mut NEXT_HANDLE: c_int = 100;

    unsafe extern "C" fn counting_db_proxy_connect(host: *const c_uchar, port: c_int) -> c_int {
        CONNECT_CALLS += 1;
        let bytes = std::ffi::CStr::from_ptr(host as *const i8).to_bytes();
        let n = bytes.len().min(LAST_HOST.len());
        LAST_HOST[..n].copy_from_slice(&bytes[..n]);
        LAST_PORT = port;
        let h = NEXT_HANDLE;
        NEXT_HANDLE += 1;
        h
    }

    unsafe extern "C" fn fake_fs_read_virtual(
        path: *const c_uchar,
        out_buf: *mut c_uchar,
        out_len: c_int,
    ) -> c_int {
        let path = std::ffi::CStr::from_ptr(path as *const i8).to_str().unwrap();
        if path != "/etc/warpgrid/proxy.conf" {
            return shim::NOT_MANAGED;
        }
        let content = b"127.0.0.1:54321\n10.0.0.99:5432\n";
        let n = content.len().min(out_len as usize);
        std::ptr::copy_nonoverlapping(content.as_ptr(), out_buf, n);
        n as c_int
    }

    #[test]
    fn connect_on_exact_match_invokes_shim_exactly_once() {
        let _fx = Fixture::install();
        unsafe {
            CONNECT_CALLS = 0;
        }
        shim::install_fs_read_virtual(fake_fs_read_virtual);
        shim::install_db_proxy_connect(counting_db_proxy_connect);

        let outcome = connect_outcome("127.0.0.1".parse().unwrap(), 54321);
        match outcome {
            ConnectOutcome::Connected(handle) => {
                record_connect(42, handle);
            }
            _ => panic!("expected a managed connect"),
        }
        unsafe {
            assert_eq!(CONNECT_CALLS, 1);
            assert_eq!(&LAST_HOST[..9], b"127.0.0.1");
            assert_eq!(LAST_PORT, 54321);
        }
        assert!(is_proxied(42));

        // A host not in the registry never reaches the shim.
        let before = unsafe { CONNECT_CALLS };
        let miss = connect_outcome("93.184.216.34".parse().unwrap(), 80);
        assert!(matches!(miss, ConnectOutcome::NotManaged));
        assert_eq!(unsafe { CONNECT_CALLS }, before);
    }

    #[test]
    fn send_recv_close_lifecycle_matches_scenario_4() {
        static mut SEND_CALLS: i32 = 0;
        static mut SEND_LEN: i32 = 0;
        static mut RECV_CALLS: i32 = 0;
        static mut CLOSE_CALLS: i32 = 0;

        unsafe extern "C" fn connect_ok(_host: *const c_uchar, _port: c_int) -> c_int {
            7
        }
        unsafe extern "C" fn send_counting(_h: c_int, _d: *const c_uchar, len: c_int) -> c_int {
            SEND_CALLS += 1;
            SEND_LEN = len;
            len
        }
        unsafe extern "C" fn recv_counting(_h: c_int, buf: *mut c_uchar, max: c_int, _peek: c_int) -> c_int {
            RECV_CALLS += 1;
            let reply = b"reply-bytes";
            let n = reply.len().min(max as usize);
            std::ptr::copy_nonoverlapping(reply.as_ptr(), buf, n);
            n as c_int
        }
        unsafe extern "C" fn close_counting(_h: c_int) -> c_int {
            CLOSE_CALLS += 1;
            0
        }

        let _fx = Fixture::install();
        shim::install_fs_read_virtual(fake_fs_read_virtual);
        shim::install_db_proxy_connect(connect_ok);
        shim::install_db_proxy_send(send_counting);
        shim::install_db_proxy_recv(recv_counting);
        shim::install_db_proxy_close(close_counting);

        let fd = 9;
        match connect_outcome("127.0.0.1".parse().unwrap(), 54321) {
            ConnectOutcome::Connected(handle) => record_connect(fd, handle),
            _ => panic!(),
        }

        let sent = send(fd, &[0u8; 16]);
        assert_eq!(sent, 16);

        let mut buf = [0u8; 64];
        let n = recv(fd, &mut buf, false);
        assert!(n > 0);

        assert_eq!(close(fd), 0);
        assert!(!is_proxied(fd));

        unsafe {
            assert_eq!(SEND_CALLS, 1);
            assert_eq!(SEND_LEN, 16);
            assert!(RECV_CALLS >= 1);
            assert_eq!(CLOSE_CALLS, 1);
        }
    }

    #[test]
    fn double_close_is_idempotent_and_calls_host_close_once() {
        static mut CLOSE_CALLS: i32 = 0;
        unsafe extern "C" fn connect_ok(_host: *const c_uchar, _port: c_int) -> c_int {
            55
        }
        unsafe extern "C" fn close_counting(_h: c_int) -> c_int {
            CLOSE_CALLS += 1;
            0
        }

        let _fx = Fixture::install();
        shim::install_fs_read_virtual(fake_fs_read_virtual);
        shim::install_db_proxy_connect(connect_ok);
        shim::install_db_proxy_close(close_counting);

        match connect_outcome("10.0.0.99".parse().unwrap(), 5432) {
            ConnectOutcome::Connected(handle) => record_connect(3, handle),
            _ => panic!(),
        }

        assert_eq!(close(3), 0);
        assert_eq!(close(3), NOT_PROXIED);
        unsafe {
            assert_eq!(CLOSE_CALLS, 1);
        }
    }

    #[test]
    fn close_removes_local_entry_even_on_host_error() {
        unsafe extern "C" fn connect_ok(_host: *const c_uchar, _port: c_int) -> c_int {
            9
        }
        unsafe extern "C" fn close_fails(_h: c_int) -> c_int {
            -1
        }

        let _fx = Fixture::install();
        shim::install_fs_read_virtual(fake_fs_read_virtual);
        shim::install_db_proxy_connect(connect_ok);
        shim::install_db_proxy_close(close_fails);

        match connect_outcome("127.0.0.1".parse().unwrap(), 54321) {
            ConnectOutcome::Connected(handle) => record_connect(4, handle),
            _ => panic!(),
        }

        assert_eq!(close(4), -1);
        assert!(!is_proxied(4));
    }

    #[test]
    fn unproxied_fd_falls_through_on_every_data_op() {
        let _fx = Fixture::install();
        assert!(!is_proxied(123));
        assert_eq!(send(123, b"x"), NOT_PROXIED);
        assert_eq!(recv(123, &mut [0u8; 4], false), NOT_PROXIED);
        assert_eq!(close(123), NOT_PROXIED);
    }

    #[test]
    fn peek_does_not_advance_matches_scenario_7() {
        static mut LAST_PEEK: c_int = -1;
        static mut HOST_POS: usize = 0;
        const QUEUE: &[u8] = b"PEEKTEST";

        unsafe extern "C" fn connect_ok(_host: *const c_uchar, _port: c_int) -> c_int {
            1
        }
        unsafe extern "C" fn recv_from_queue(_h: c_int, buf: *mut c_uchar, max: c_int, peek: c_int) -> c_int {
            LAST_PEEK = peek;
            let remaining = &QUEUE[HOST_POS..];
            let n = remaining.len().min(max as usize);
            std::ptr::copy_nonoverlapping(remaining.as_ptr(), buf, n);
            if peek == 0 {
                HOST_POS += n;
            }
            n as c_int
        }

        let _fx = Fixture::install();
        shim::install_fs_read_virtual(fake_fs_read_virtual);
        shim::install_db_proxy_connect(connect_ok);
        shim::install_db_proxy_recv(recv_from_queue);
        unsafe {
            HOST_POS = 0;
        }

        match connect_outcome("127.0.0.1".parse().unwrap(), 54321) {
            ConnectOutcome::Connected(handle) => record_connect(1, handle),
            _ => panic!(),
        }

        let mut buf = [0u8; 4];

        // Peek-read 4: "PEEK", host position unchanged.
        assert_eq!(recv(1, &mut buf, true), 4);
        assert_eq!(&buf, b"PEEK");
        unsafe { assert_eq!(LAST_PEEK, 1) };

        // Normal read 4: "PEEK" again, since the peek never advanced.
        assert_eq!(recv(1, &mut buf, false), 4);
        assert_eq!(&buf, b"PEEK");
        unsafe { assert_eq!(LAST_PEEK, 0) };

        // Normal read 4: "TEST", now that the prior normal read advanced.
        assert_eq!(recv(1, &mut buf, false), 4);
        assert_eq!(&buf, b"TEST");
    }
}
