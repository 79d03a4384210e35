//! C3: the proxy-endpoint registry.
//!
//! Parsed exactly once, lazily, from `/etc/warpgrid/proxy.conf` (read
//! through C2 so the host can supply it virtually). A `connect` destination
//! that matches an entry here is host-managed; everything else falls
//! through to stock WASI networking.

use crate::shim;
use lazy_static::lazy_static;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Once;
use std::sync::RwLock;

const PROXY_CONF_PATH: &str = "/etc/warpgrid/proxy.conf";

lazy_static! {
    static ref ENTRIES: RwLock<HashSet<(IpAddr, u16)>> = RwLock::new(HashSet::new());
}
static LOAD_ONCE: Once = Once::new();

/// Parses one `HOST:PORT` line. Accepts a bracketed `[host]:port` form for
/// IPv6 literals (to disambiguate the port separator from the address's own
/// colons) as well as the unbracketed `host:port` form for IPv4. Returns
/// `None` for anything that doesn't parse as `(IpAddr, u16)` — malformed
/// lines are skipped, never fatal to the rest of the file.
fn parse_line(line: &str) -> Option<(IpAddr, u16)> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(rest) = line.strip_prefix('[') {
        let (host, rest) = rest.split_once(']')?;
        let rest = rest.strip_prefix(':')?;
        let ip: IpAddr = host.parse().ok()?;
        let port: u16 = rest.parse().ok()?;
        return Some((ip, port));
    }

    let (host, port) = line.rsplit_once(':')?;
    let ip: IpAddr = host.parse().ok()?;
    let port: u16 = port.parse().ok()?;
    Some((ip, port))
}

fn parse_conf(contents: &str) -> HashSet<(IpAddr, u16)> {
    contents.lines().filter_map(parse_line).collect()
}

fn load() {
    let parsed = match shim::read_virtual_to_vec(PROXY_CONF_PATH) {
        Some(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => parse_conf(text),
            Err(_) => {
                log::warn!("{} is not valid UTF-8; treating registry as empty", PROXY_CONF_PATH);
                HashSet::new()
            }
        },
        None => {
            log::debug!("{} not provided by host; proxy registry is empty", PROXY_CONF_PATH);
            HashSet::new()
        }
    };
    log::debug!("loaded {} proxy registry entries", parsed.len());
    *ENTRIES.write().unwrap() = parsed;
}

fn ensure_loaded() {
    LOAD_ONCE.call_once(load);
}

/// `true` if `(host, port)` is a registered proxy endpoint. `host` must
/// already be a numeric literal (the caller has it from a `sockaddr`, not
/// free text), so no DNS or hostname canonicization happens here.
pub fn contains(host: IpAddr, port: u16) -> bool {
    ensure_loaded();
    ENTRIES.read().unwrap().contains(&(host, port))
}

#[cfg(test)]
pub(crate) fn reset_for_test() {
    // `Once` can't be un-fired once this process's test binary has loaded
    // the registry for the first time, so tests that need a specific
    // proxy.conf bypass `contains`/`ensure_loaded` entirely and call `load`
    // directly, then inspect `ENTRIES` through `contains_loaded`.
    load();
}

/// Test-only: checks the already-loaded table without going through the
/// process-wide `Once`, so each test can `load()` its own fixture first.
#[cfg(test)]
pub(crate) fn contains_loaded(host: IpAddr, port: u16) -> bool {
    ENTRIES.read().unwrap().contains(&(host, port))
}
