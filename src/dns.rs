//! The DNS side of C5: hostname resolution and numeric formatting triage
//! shared by `getaddrinfo`, `gethostbyname`, and `getnameinfo`.
//!
//! This module only ever talks to C1 (the shim) directly — there is no
//! table to consult, unlike the fs/socket patches. The FFI-facing structure
//! marshalling (`addrinfo`/`hostent` construction) lives in
//! `hostcalls/dns.rs`; this module carries the part that's worth unit
//! testing without a real libc: "did the shim get called, and with what,
//! and how do we read its answer."

use crate::shim;
use std::ffi::CString;
use std::net::IpAddr;
use std::os::raw::c_int;

/// The wire format this implementation chose for `dns_resolve`'s packed
/// address records, since the source contract fixes only the return-value
/// semantics ("record count", not byte count) and leaves the encoding to
/// the host/guest pair: a record is `family_size` raw address bytes
/// (4 for AF_INET, 16 for AF_INET6), back to back, no padding.
fn record_size(family: c_int) -> Option<usize> {
    match family {
        libc::AF_INET => Some(4),
        libc::AF_INET6 => Some(16),
        _ => None,
    }
}

/// How many records a single `dns_resolve` call will ever ask the host to
/// produce. A generous, fixed cap keeps the stack buffer small and bounded;
/// nothing in the spec calls for unbounded results.
const MAX_RECORDS: usize = 32;

pub enum ResolveOutcome {
    /// `dns_resolve` returned 0: fall through to the stock WASI resolver.
    NotManaged,
    /// `dns_resolve` returned a positive record count.
    Records(Vec<IpAddr>),
    /// `dns_resolve` returned a negative value: host-side failure.
    Failed,
}

/// `true` for any string that parses as a numeric IPv4/IPv6 literal —
/// exactly the condition under which `AI_NUMERICHOST`'s stock path (and
/// `getnameinfo`'s `NI_NUMERICHOST` fallback) never needs the DNS shim.
pub fn is_numeric_host(s: &str) -> bool {
    s.parse::<IpAddr>().is_ok()
}

/// Queries `dns_resolve` for `name` under `family` (`AF_INET`, `AF_INET6`,
/// or `AF_UNSPEC` to ask for IPv4). Never called when `AI_NUMERICHOST` is
/// set — that bypass happens one layer up, in the FFI wrapper, before this
/// function is even reached (see §8: "`AI_NUMERICHOST` never invokes
/// `dns_resolve`").
pub fn resolve(name: &str, family: c_int) -> ResolveOutcome {
    let family = if family == libc::AF_UNSPEC { libc::AF_INET } else { family };
    let size = match record_size(family) {
        Some(s) => s,
        None => return ResolveOutcome::Failed,
    };

    let cname = match CString::new(name) {
        Ok(c) => c,
        Err(_) => return ResolveOutcome::Failed,
    };
    let mut buf = vec![0u8; size * MAX_RECORDS];
    let n = shim::dns_resolve(cname.as_ptr() as *const u8, family, buf.as_mut_ptr(), buf.len() as c_int);

    if n == shim::NOT_MANAGED {
        return ResolveOutcome::NotManaged;
    }
    if n < 0 {
        return ResolveOutcome::Failed;
    }

    let count = (n as usize).min(MAX_RECORDS);
    let mut records = Vec::with_capacity(count);
    for i in 0..count {
        let chunk = &buf[i * size..(i + 1) * size];
        let addr = if family == libc::AF_INET {
            IpAddr::from([chunk[0], chunk[1], chunk[2], chunk[3]])
        } else {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(chunk);
            IpAddr::from(octets)
        };
        records.push(addr);
    }
    ResolveOutcome::Records(records)
}

/// Writes the textual form of `addr` into `out` (which must have room for
/// the trailing NUL). Returns the number of bytes written, not counting the
/// NUL, or `Err(())` if it doesn't fit (maps to `EAI_OVERFLOW` one layer up).
pub fn format_numeric_host(addr: IpAddr, out: &mut [u8]) -> Result<usize, ()> {
    let text = addr.to_string();
    let bytes = text.as_bytes();
    if bytes.len() + 1 > out.len() {
        return Err(());
    }
    out[..bytes.len()].copy_from_slice(bytes);
    out[bytes.len()] = 0;
    Ok(bytes.len())
}

/// Writes the decimal textual form of `port` into `out`. Same overflow
/// contract as `format_numeric_host`.
pub fn format_port(port: u16, out: &mut [u8]) -> Result<usize, ()> {
    let text = port.to_string();
    let bytes = text.as_bytes();
    if bytes.len() + 1 > out.len() {
        return Err(());
    }
    out[..bytes.len()].copy_from_slice(bytes);
    out[bytes.len()] = 0;
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_uchar;

    #[test]
    fn numeric_host_detection() {
        assert!(is_numeric_host("192.168.1.100"));
        assert!(is_numeric_host("::1"));
        assert!(!is_numeric_host("db.prod.warp.local"));
    }

    #[test]
    fn format_numeric_host_overflow() {
        let addr: IpAddr = "172.16.0.5".parse().unwrap();
        let mut tiny = [0u8; 4];
        assert!(format_numeric_host(addr, &mut tiny).is_err());
        let mut ok = [0u8; 32];
        let n = format_numeric_host(addr, &mut ok).unwrap();
        assert_eq!(&ok[..n], b"172.16.0.5");
    }

    #[test]
    fn format_port_decimal() {
        let mut buf = [0u8; 16];
        let n = format_port(3306, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"3306");
    }

    unsafe extern "C" fn fake_dns_resolve(
        name: *const c_uchar,
        family: c_int,
        out_buf: *mut c_uchar,
        _out_len: c_int,
    ) -> c_int {
        let name = std::ffi::CStr::from_ptr(name as *const i8).to_str().unwrap();
        if name != "db.prod.warp.local" {
            return shim::NOT_MANAGED;
        }
        assert_eq!(family, libc::AF_INET);
        let record = [10u8, 0, 0, 5];
        std::ptr::copy_nonoverlapping(record.as_ptr(), out_buf, 4);
        1
    }

    #[test]
    fn resolve_hit_returns_parsed_records() {
        shim::reset_for_test();
        shim::install_dns_resolve(fake_dns_resolve);
        match resolve("db.prod.warp.local", libc::AF_INET) {
            ResolveOutcome::Records(addrs) => {
                assert_eq!(addrs, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);
            }
            _ => panic!("expected a hit"),
        }
        match resolve("example.com", libc::AF_INET) {
            ResolveOutcome::NotManaged => {}
            _ => panic!("expected fall-through"),
        }
        shim::reset_for_test();
    }
}
