//! Interface registry: maps configured interface names to their runtime
//! descriptor (name, MAC, link-local IPv6).

use std::collections::HashMap;
use std::net::Ipv6Addr;

use pnet::datalink;
use pnet::util::MacAddr;

use crate::error::ProxyError;

/// An Ethernet-like interface this proxy relays NDP across. Immutable once
/// constructed; identity is the name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    name: String,
    mac: MacAddr,
    link_local: Ipv6Addr,
}

impl Interface {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn link_local(&self) -> Ipv6Addr {
        self.link_local
    }

    /// RFC 4291 EUI-64 derivation of the link-local address from a MAC,
    /// with the universal/local bit of the first MAC byte flipped:
    /// `fe80::` + MAC[0..3] (bit 1 flipped) + `ff:fe` + MAC[3..6].
    fn link_local_from_mac(mac: MacAddr) -> Ipv6Addr {
        let octets = [mac.0, mac.1, mac.2, mac.3, mac.4, mac.5];
        let first = octets[0] ^ 0x02;
        Ipv6Addr::new(
            0xfe80,
            0,
            0,
            0,
            u16::from_be_bytes([first, octets[1]]),
            u16::from_be_bytes([octets[2], 0xff]),
            u16::from_be_bytes([0xfe, octets[3]]),
            u16::from_be_bytes([octets[4], octets[5]]),
        )
    }
}

/// Holds every configured interface, keyed by name. Populated once during
/// startup; never modified thereafter.
#[derive(Debug, Default)]
pub struct InterfaceRegistry {
    by_name: HashMap<String, Interface>,
    order: Vec<String>,
}

impl InterfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the named system interface via `pnet`, reject loopback and
    /// interfaces with no MAC, and register it. Fails if the name is
    /// unknown, has no MAC, is loopback, or was already registered.
    pub fn register(&mut self, name: &str) -> Result<(), ProxyError> {
        if self.by_name.contains_key(name) {
            return Err(ProxyError::DuplicateInterface(name.to_string()));
        }
        if name == "lo" {
            return Err(ProxyError::LoopbackRefused);
        }

        let found = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| ProxyError::InvalidInterface(name.to_string()))?;

        if found.is_loopback() {
            return Err(ProxyError::LoopbackRefused);
        }

        let mac = found
            .mac
            .ok_or_else(|| ProxyError::InvalidInterface(name.to_string()))?;

        let link_local = Interface::link_local_from_mac(mac);
        self.by_name.insert(
            name.to_string(),
            Interface {
                name: name.to_string(),
                mac,
                link_local,
            },
        );
        self.order.push(name.to_string());
        Ok(())
    }

    pub fn all(&self) -> impl Iterator<Item = &Interface> {
        self.order.iter().map(move |n| &self.by_name[n])
    }

    pub fn lookup(&self, name: &str) -> Option<&Interface> {
        self.by_name.get(name)
    }

    /// Every interface except the one named, in registration order.
    pub fn all_except<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Interface> {
        self.all().filter(move |iface| iface.name() != name)
    }
}

/// Test-only helper for building an `Interface` without going through
/// `InterfaceRegistry::register` (which requires a real system interface).
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;

    pub fn make(name: &str, mac: [u8; 6]) -> Interface {
        let mac = MacAddr::new(mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]);
        Interface {
            name: name.to_string(),
            link_local: Interface::link_local_from_mac(mac),
            mac,
        }
    }

    /// Inserts an already-built `Interface` directly into a registry,
    /// bypassing the real-system lookup `register` performs.
    pub fn insert(registry: &mut InterfaceRegistry, iface: Interface) {
        let name = iface.name.clone();
        registry.by_name.insert(name.clone(), iface);
        registry.order.push(name);
    }
}
