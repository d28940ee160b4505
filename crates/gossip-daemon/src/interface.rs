//! Resolve the node's own address from a network interface name.

use std::io;
use std::net::IpAddr;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum InterfaceError {
    #[error("Failed to list network interfaces: {0}")]
    Enumerate(#[from] io::Error),

    #[error("Interface {0:?} not found or has no IPv4 address")]
    NotFound(String),
}

/// Address to bind for `interface`.
///
/// An IP literal is used as-is. Otherwise the first IPv4 address of the
/// named interface is chosen.
pub fn resolve_node_ip(interface: &str) -> Result<IpAddr, InterfaceError> {
    if let Ok(ip) = interface.parse::<IpAddr>() {
        debug!("Using literal node address {}", ip);
        return Ok(ip);
    }

    let addrs: Vec<(String, IpAddr)> = get_if_addrs::get_if_addrs()?
        .into_iter()
        .map(|iface| {
            let ip = iface.ip();
            (iface.name, ip)
        })
        .collect();

    select_ipv4(interface, &addrs)
}

fn select_ipv4(interface: &str, addrs: &[(String, IpAddr)]) -> Result<IpAddr, InterfaceError> {
    let mut candidates = addrs
        .iter()
        .filter(|(name, ip)| name == interface && ip.is_ipv4())
        .map(|(_, ip)| *ip);

    let ip = candidates
        .next()
        .ok_or_else(|| InterfaceError::NotFound(interface.to_string()))?;
    let extra = candidates.count();
    if extra > 0 {
        warn!(
            "Interface {} has {} more IPv4 addresses, using {}",
            interface, extra, ip
        );
    }
    debug!("Resolved interface {} to {}", interface, ip);
    Ok(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<(String, IpAddr)> {
        vec![
            ("lo".to_string(), "127.0.0.1".parse().unwrap()),
            ("eth0".to_string(), "fe80::1".parse().unwrap()),
            ("eth0".to_string(), "10.0.0.5".parse().unwrap()),
            ("eth0".to_string(), "10.0.0.6".parse().unwrap()),
            ("wlan0".to_string(), "fe80::2".parse().unwrap()),
        ]
    }

    #[test]
    fn test_literal_address_is_used_directly() {
        assert_eq!(
            resolve_node_ip("192.168.1.20").unwrap(),
            "192.168.1.20".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_node_ip("::1").unwrap(),
            "::1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_first_ipv4_of_interface_wins() {
        let ip = select_ipv4("eth0", &table()).unwrap();
        assert_eq!(ip, "10.0.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn test_interface_without_ipv4_fails() {
        assert!(matches!(
            select_ipv4("wlan0", &table()),
            Err(InterfaceError::NotFound(name)) if name == "wlan0"
        ));
    }

    #[test]
    fn test_unknown_interface_fails() {
        assert!(matches!(
            select_ipv4("eth9", &table()),
            Err(InterfaceError::NotFound(_))
        ));
    }
}
