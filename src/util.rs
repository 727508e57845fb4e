//! Internal utilities.

use crate::error::{ManagerError, Result};
use std::net::Ipv4Addr;
use std::time::Duration;

/// Environment variable that overrides public address discovery.
pub const PUBLIC_IPV4_ENV: &str = "SMARTDNS_SELF_PUBLIC_IPV4";

/// Echo services queried for the public address, in order.
const IP_ECHO_URLS: &[&str] = &["https://api.ipify.org", "https://ifconfig.co/ip"];

const IP_ECHO_TIMEOUT: Duration = Duration::from_secs(4);

/// Checks whether the current process runs as root.
#[must_use]
pub fn is_root() -> bool {
    // SAFETY: `geteuid` has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Returns `true` for private, CGNAT, loopback, and link-local addresses.
#[must_use]
pub fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    ip.is_private() || ip.is_loopback() || ip.is_link_local() || (a == 100 && (64..=127).contains(&b))
}

/// Discovers this host's public IPv4 address.
///
/// Tries [`PUBLIC_IPV4_ENV`] first, then each echo service with a short
/// timeout, then the addresses of local interfaces. Private answers are
/// rejected.
///
/// # Errors
///
/// Returns [`ManagerError::NotFound`] if no source yields a public address.
pub fn public_ipv4() -> Result<Ipv4Addr> {
    if let Ok(value) = std::env::var(PUBLIC_IPV4_ENV) {
        match value.trim().parse::<Ipv4Addr>() {
            Ok(ip) => return Ok(ip),
            Err(_) => tracing::warn!(value = %value, "Ignoring invalid {PUBLIC_IPV4_ENV}"),
        }
    }

    match echo_public_ipv4() {
        Ok(Some(ip)) => return Ok(ip),
        Ok(None) => {}
        Err(e) => tracing::debug!(error = %e, "HTTP client unavailable"),
    }

    if let Some(ip) = interface_public_ipv4() {
        tracing::info!(ip = %ip, source = "interfaces", "Discovered public IPv4");
        return Ok(ip);
    }
    Err(ManagerError::NotFound("public IPv4 address".into()))
}

fn echo_public_ipv4() -> Result<Option<Ipv4Addr>> {
    let client = reqwest::blocking::Client::builder()
        .timeout(IP_ECHO_TIMEOUT)
        .build()?;
    for url in IP_ECHO_URLS {
        let body = match client
            .get(*url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .and_then(reqwest::blocking::Response::text)
        {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Address lookup failed");
                continue;
            }
        };
        match body.trim().parse::<Ipv4Addr>() {
            Ok(ip) if !is_private_ipv4(ip) => {
                tracing::info!(ip = %ip, source = %url, "Discovered public IPv4");
                return Ok(Some(ip));
            }
            _ => tracing::debug!(url = %url, body = %body.trim(), "Unusable address answer"),
        }
    }
    Ok(None)
}

/// First public IPv4 bound to an up, non-loopback interface.
#[must_use]
pub fn interface_public_ipv4() -> Option<Ipv4Addr> {
    interface_ipv4s().into_iter().find(|ip| !is_private_ipv4(*ip))
}

/// IPv4 addresses of up, non-loopback interfaces, in kernel order.
#[allow(clippy::cast_sign_loss)]
fn interface_ipv4s() -> Vec<Ipv4Addr> {
    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: on success `getifaddrs` stores a list head that is released
    // with `freeifaddrs` below.
    if unsafe { libc::getifaddrs(&raw mut head) } != 0 {
        tracing::debug!(error = %std::io::Error::last_os_error(), "getifaddrs failed");
        return Vec::new();
    }

    let wanted = libc::IFF_UP as libc::c_uint;
    let skipped = libc::IFF_LOOPBACK as libc::c_uint;
    let mut found = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: `cursor` is a live node of the list returned above.
        let ifa = unsafe { &*cursor };
        cursor = ifa.ifa_next;
        if ifa.ifa_flags & wanted == 0 || ifa.ifa_flags & skipped != 0 || ifa.ifa_addr.is_null() {
            continue;
        }
        // SAFETY: `ifa_addr` is non-null and points at a sockaddr.
        let family = unsafe { (*ifa.ifa_addr).sa_family };
        if i32::from(family) != libc::AF_INET {
            continue;
        }
        // SAFETY: an `AF_INET` address is a `sockaddr_in`; the read is
        // unaligned-safe.
        let sin = unsafe { std::ptr::read_unaligned(ifa.ifa_addr.cast::<libc::sockaddr_in>()) };
        found.push(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)));
    }

    // SAFETY: `head` came from a successful `getifaddrs` and is freed once.
    unsafe { libc::freeifaddrs(head) };
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_ranges() {
        for ip in ["10.1.2.3", "172.16.0.1", "192.168.1.1", "100.64.0.1", "127.0.0.1", "169.254.9.9"] {
            assert!(is_private_ipv4(ip.parse().unwrap()), "{ip}");
        }
        for ip in ["8.8.8.8", "100.128.0.1", "172.32.0.1", "203.0.113.5"] {
            assert!(!is_private_ipv4(ip.parse().unwrap()), "{ip}");
        }
    }

    #[test]
    fn interface_addresses_are_public_only() {
        // Loopback is always up but never returned.
        assert!(interface_ipv4s().iter().all(|ip| !ip.is_loopback()));
        if let Some(ip) = interface_public_ipv4() {
            assert!(!is_private_ipv4(ip));
        }
    }

    #[test]
    fn env_override_wins() {
        // SAFETY: no other test in this binary reads or writes the variable.
        unsafe { std::env::set_var(PUBLIC_IPV4_ENV, " 203.0.113.9 ") };
        let ip = public_ipv4();
        // SAFETY: as above.
        unsafe { std::env::remove_var(PUBLIC_IPV4_ENV) };
        assert_eq!(ip.unwrap(), Ipv4Addr::new(203, 0, 113, 9));
    }

    #[test]
    #[ignore = "requires network access"]
    fn discovers_public_address() {
        assert!(!is_private_ipv4(public_ipv4().unwrap()));
    }
}
