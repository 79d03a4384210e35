//! DNS side of C5: `getaddrinfo`/`gethostbyname`/`gethostbyaddr`/`getnameinfo`.
//!
//! Each function marshals raw C structures and delegates its decision logic
//! to `crate::dns`, which is what owns the "did the shim answer, and how do
//! we read it" rules worth unit testing.

use crate::dns::{self, ResolveOutcome};
use crate::sys_orig;
use log::trace;
use std::ffi::CStr;
use std::net::IpAddr;
use std::os::raw::{c_char, c_int, c_void};

unsafe fn cstr_opt<'a>(p: *const c_char) -> Option<&'a str> {
    if p.is_null() {
        None
    } else {
        CStr::from_ptr(p).to_str().ok()
    }
}

unsafe fn build_addrinfo(addr: IpAddr, port: u16, hints: *const libc::addrinfo) -> *mut libc::addrinfo {
    let (socktype, protocol) = if hints.is_null() {
        (libc::SOCK_STREAM, libc::IPPROTO_TCP)
    } else {
        let h = &*hints;
        let socktype = if h.ai_socktype != 0 { h.ai_socktype } else { libc::SOCK_STREAM };
        let protocol = if h.ai_protocol != 0 { h.ai_protocol } else { libc::IPPROTO_TCP };
        (socktype, protocol)
    };

    match addr {
        IpAddr::V4(v4) => {
            let sin = Box::new(libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: port.to_be(),
                sin_addr: libc::in_addr { s_addr: u32::from_ne_bytes(v4.octets()) },
                sin_zero: [0; 8],
            });
            let ai = Box::new(libc::addrinfo {
                ai_flags: 0,
                ai_family: libc::AF_INET,
                ai_socktype: socktype,
                ai_protocol: protocol,
                ai_addrlen: std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
                ai_addr: Box::into_raw(sin) as *mut libc::sockaddr,
                ai_canonname: std::ptr::null_mut(),
                ai_next: std::ptr::null_mut(),
            });
            Box::into_raw(ai)
        }
        IpAddr::V6(v6) => {
            let sin6 = Box::new(libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: port.to_be(),
                sin6_flowinfo: 0,
                sin6_addr: libc::in6_addr { s6_addr: v6.octets() },
                sin6_scope_id: 0,
            });
            let ai = Box::new(libc::addrinfo {
                ai_flags: 0,
                ai_family: libc::AF_INET6,
                ai_socktype: socktype,
                ai_protocol: protocol,
                ai_addrlen: std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t,
                ai_addr: Box::into_raw(sin6) as *mut libc::sockaddr,
                ai_canonname: std::ptr::null_mut(),
                ai_next: std::ptr::null_mut(),
            });
            Box::into_raw(ai)
        }
    }
}

fn parse_service_port(service: Option<&str>) -> u16 {
    service.and_then(|s| s.parse::<u16>().ok()).unwrap_or(0)
}

/// `int getaddrinfo(const char *node, const char *service, const struct addrinfo *hints, struct addrinfo **res)`.
#[no_mangle]
pub unsafe extern "C" fn getaddrinfo(
    node: *const c_char,
    service: *const c_char,
    hints: *const libc::addrinfo,
    res: *mut *mut libc::addrinfo,
) -> c_int {
    let node_str = match cstr_opt(node) {
        Some(n) => n,
        None => return sys_orig::__warpgrid_orig_getaddrinfo(node, service, hints, res),
    };
    trace!("getaddrinfo(node={:?})", node_str);

    let numeric_host = !hints.is_null() && (*hints).ai_flags & libc::AI_NUMERICHOST != 0;
    if numeric_host || dns::is_numeric_host(node_str) {
        return sys_orig::__warpgrid_orig_getaddrinfo(node, service, hints, res);
    }

    let family = if hints.is_null() { libc::AF_UNSPEC } else { (*hints).ai_family };
    let port = parse_service_port(cstr_opt(service));

    match dns::resolve(node_str, family) {
        ResolveOutcome::NotManaged => sys_orig::__warpgrid_orig_getaddrinfo(node, service, hints, res),
        ResolveOutcome::Failed => libc::EAI_FAIL,
        ResolveOutcome::Records(addrs) => {
            let mut head: *mut libc::addrinfo = std::ptr::null_mut();
            let mut tail: *mut libc::addrinfo = std::ptr::null_mut();
            for addr in addrs {
                let node_ptr = build_addrinfo(addr, port, hints);
                if head.is_null() {
                    head = node_ptr;
                } else {
                    (*tail).ai_next = node_ptr;
                }
                tail = node_ptr;
            }
            *res = head;
            0
        }
    }
}

/// `void freeaddrinfo(struct addrinfo *res)`. Releases the boxes allocated
/// in `build_addrinfo`; a chain obtained from the stock resolver is never
/// passed here (its own `freeaddrinfo` handles that case upstream of this
/// patch, since the fall-through path returns directly from the original
/// call and never touches guest memory on its own).
#[no_mangle]
pub unsafe extern "C" fn freeaddrinfo(res: *mut libc::addrinfo) {
    let mut cur = res;
    while !cur.is_null() {
        let node = Box::from_raw(cur);
        if !node.ai_addr.is_null() {
            match node.ai_family {
                libc::AF_INET => drop(Box::from_raw(node.ai_addr as *mut libc::sockaddr_in)),
                libc::AF_INET6 => drop(Box::from_raw(node.ai_addr as *mut libc::sockaddr_in6)),
                _ => {}
            }
        }
        cur = node.ai_next;
    }
}

const H_ALIASES: [*mut c_char; 1] = [std::ptr::null_mut()];

thread_local! {
    static HOSTENT_NAME: std::cell::RefCell<Vec<u8>> = std::cell::RefCell::new(Vec::new());
    static HOSTENT_ADDR: std::cell::RefCell<Vec<u8>> = std::cell::RefCell::new(Vec::new());
    static HOSTENT_ADDR_LIST: std::cell::RefCell<[*mut c_char; 2]> = std::cell::RefCell::new([std::ptr::null_mut(); 2]);
    static HOSTENT: std::cell::RefCell<libc::hostent> = std::cell::RefCell::new(libc::hostent {
        h_name: std::ptr::null_mut(),
        h_aliases: std::ptr::null_mut(),
        h_addrtype: 0,
        h_length: 0,
        h_addr_list: std::ptr::null_mut(),
    });
}

/// `struct hostent *gethostbyname(const char *name)`. Backed by thread-local
/// storage, matching the stock libc contract that the result is valid only
/// until the next call on the same thread.
#[no_mangle]
pub unsafe extern "C" fn gethostbyname(name: *const c_char) -> *mut libc::hostent {
    let name_str = match cstr_opt(name) {
        Some(n) => n,
        None => return std::ptr::null_mut(),
    };
    trace!("gethostbyname(name={:?})", name_str);

    match dns::resolve(name_str, libc::AF_INET) {
        // Unlike every other DNS entry point, a 0 return here is not "fall
        // through to the stock resolver" — there is no stock WASI resolver
        // to fall through to, so it means the name is unresolvable.
        ResolveOutcome::NotManaged => {
            *libc::h_errno_location() = libc::HOST_NOT_FOUND;
            std::ptr::null_mut()
        }
        ResolveOutcome::Failed => {
            *libc::h_errno_location() = libc::HOST_NOT_FOUND;
            std::ptr::null_mut()
        }
        ResolveOutcome::Records(addrs) => {
            let addr = match addrs.into_iter().next() {
                Some(IpAddr::V4(v4)) => v4,
                _ => return std::ptr::null_mut(),
            };

            HOSTENT_NAME.with(|n| {
                let mut n = n.borrow_mut();
                n.clear();
                n.extend_from_slice(name_str.as_bytes());
                n.push(0);
            });
            HOSTENT_ADDR.with(|a| {
                *a.borrow_mut() = addr.octets().to_vec();
            });

            HOSTENT.with(|h| {
                let mut h = h.borrow_mut();
                HOSTENT_NAME.with(|n| h.h_name = n.borrow_mut().as_mut_ptr() as *mut c_char);
                h.h_aliases = H_ALIASES.as_ptr() as *mut *mut c_char;
                h.h_addrtype = libc::AF_INET;
                h.h_length = 4;
                HOSTENT_ADDR_LIST.with(|list| {
                    let mut list = list.borrow_mut();
                    HOSTENT_ADDR.with(|a| {
                        list[0] = a.borrow_mut().as_mut_ptr() as *mut c_char;
                    });
                    list[1] = std::ptr::null_mut();
                    h.h_addr_list = list.as_mut_ptr();
                });
                &mut *h as *mut libc::hostent
            })
        }
    }
}

/// `struct hostent *gethostbyaddr(const void *addr, socklen_t len, int type)`.
/// Reverse lookup is never part of this shim's contract; always falls
/// through, intercepted only so this module owns the full DNS surface.
#[no_mangle]
pub unsafe extern "C" fn gethostbyaddr(addr: *const c_void, len: libc::socklen_t, af: c_int) -> *mut libc::hostent {
    sys_orig::__warpgrid_orig_gethostbyaddr(addr, len, af)
}

/// `int getnameinfo(const struct sockaddr *sa, socklen_t salen, char *host, socklen_t hostlen, char *serv, socklen_t servlen, int flags)`.
#[no_mangle]
pub unsafe extern "C" fn getnameinfo(
    sa: *const libc::sockaddr,
    salen: libc::socklen_t,
    host: *mut c_char,
    hostlen: libc::socklen_t,
    serv: *mut c_char,
    servlen: libc::socklen_t,
    flags: c_int,
) -> c_int {
    if sa.is_null() {
        return libc::EAI_FAMILY;
    }
    let family = (*sa).sa_family as c_int;

    let (addr, port) = match family {
        libc::AF_INET if salen as usize >= std::mem::size_of::<libc::sockaddr_in>() => {
            let sin = &*(sa as *const libc::sockaddr_in);
            (
                IpAddr::V4(std::net::Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))),
                u16::from_be(sin.sin_port),
            )
        }
        libc::AF_INET6 if salen as usize >= std::mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = &*(sa as *const libc::sockaddr_in6);
            (IpAddr::V6(std::net::Ipv6Addr::from(sin6.sin6_addr.s6_addr)), u16::from_be(sin6.sin6_port))
        }
        _ => return libc::EAI_FAMILY,
    };

    if !host.is_null() && hostlen > 0 {
        let numeric = flags & libc::NI_NUMERICHOST != 0;
        let out = std::slice::from_raw_parts_mut(host as *mut u8, hostlen as usize);
        if numeric {
            if crate::dns::format_numeric_host(addr, out).is_err() {
                return libc::EAI_OVERFLOW;
            }
        } else {
            // No forward-reverse lookup shim exists in this contract; the
            // host-name branch and the numeric branch converge on the same
            // formatting path.
            if crate::dns::format_numeric_host(addr, out).is_err() {
                return libc::EAI_OVERFLOW;
            }
        }
    }

    if !serv.is_null() && servlen > 0 {
        let out = std::slice::from_raw_parts_mut(serv as *mut u8, servlen as usize);
        let numeric_serv = flags & libc::NI_NUMERICSERV != 0;

        let name = if numeric_serv {
            None
        } else {
            // `getservbyport` is ordinary, un-intercepted libc (there is no
            // shim hook for service-name lookup in this contract); a miss
            // just means the port isn't in the host's services database.
            let ent = libc::getservbyport(port.to_be() as c_int, std::ptr::null());
            if ent.is_null() {
                None
            } else {
                Some(CStr::from_ptr((*ent).s_name).to_bytes())
            }
        };

        match name {
            Some(bytes) if bytes.len() + 1 <= out.len() => {
                out[..bytes.len()].copy_from_slice(bytes);
                out[bytes.len()] = 0;
            }
            Some(_) => return libc::EAI_OVERFLOW,
            None => {
                if crate::dns::format_port(port, out).is_err() {
                    return libc::EAI_OVERFLOW;
                }
            }
        }
    }

    0
}
