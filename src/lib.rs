//! `libc` patches that let a WASI guest reach host-managed services — a
//! virtual filesystem, a DNS shim, and proxied database sockets — through a
//! small host-provided ABI (`crate::shim`) instead of sandboxed WASI
//! primitives, falling back to stock WASI/libc behavior wherever the host
//! declines to manage a call.
//!
//! # Layout
//!
//! - [`error`] — the shared `Error` type and its errno mapping.
//! - [`shim`] — C1: the host ABI contract (a table of installable function
//!   pointers, since stable Rust has no weak-symbol linkage).
//! - [`vfs`] — C2: the virtual filesystem table backing `open`/`fopen`.
//! - [`registry`] — C3: the proxy endpoint registry (`/etc/warpgrid/proxy.conf`).
//! - [`proxy`] — C4 and the socket side of C5: the proxy fd table and its
//!   `connect`/`send`/`recv`/`close` logic.
//! - [`dns`] — the DNS triage logic shared by `getaddrinfo`/`gethostbyname`/`getnameinfo`.
//! - [`sys_orig`] — declarations of the renamed original libc entry points
//!   every patch falls through to.
//! - [`hostcalls`] — the `#[no_mangle] extern "C"` FFI layer itself.

pub mod dns;
pub mod error;
pub mod hostcalls;
pub mod proxy;
pub mod registry;
pub mod shim;
pub mod sys_orig;
pub mod vfs;
