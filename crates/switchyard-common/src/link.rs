//! Link-layer state carried by a live bearer.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Activity status of the underlying radio link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    #[default]
    Unknown,
    /// Link up and moving traffic.
    Active,
    /// Link up but the radio has gone dormant.
    Dormant,
    /// Link down.
    Inactive,
}

/// Addressing and routing state for a bearer's interface.
///
/// Produced by the data service on setup and on mid-life link changes.
/// Whether a change can be applied to the externally visible handle in
/// place depends on [`LinkProperties::socket_compatible`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkProperties {
    /// OS interface name, e.g. `rmnet0` or `wlan0`.
    pub interface: String,
    /// Local addresses assigned to the interface.
    pub addresses: Vec<IpAddr>,
    /// DNS servers to install for this link.
    pub dns_servers: Vec<IpAddr>,
    /// Gateway addresses.
    pub gateways: Vec<IpAddr>,
    /// Maximum transmission unit. 0 = unspecified, take the default.
    pub mtu: u32,
}

impl LinkProperties {
    /// True when sockets opened against `old` survive a move to `new`:
    /// every address present in `old` must still be present in `new`.
    /// Added addresses, DNS and gateway changes are compatible; a lost or
    /// replaced address is not.
    pub fn socket_compatible(old: &LinkProperties, new: &LinkProperties) -> bool {
        old.interface == new.interface
            && old.addresses.iter().all(|a| new.addresses.contains(a))
    }

    /// Basic sanity of a setup result: an interface name and at least one
    /// address.
    pub fn is_well_formed(&self) -> bool {
        !self.interface.is_empty() && !self.addresses.is_empty()
    }
}

/// Down/up throughput estimate for a link, in kbps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkBandwidth {
    pub downlink_kbps: u32,
    pub uplink_kbps: u32,
}

impl LinkBandwidth {
    pub fn new(downlink_kbps: u32, uplink_kbps: u32) -> Self {
        LinkBandwidth { downlink_kbps, uplink_kbps }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(iface: &str, addrs: &[&str]) -> LinkProperties {
        LinkProperties {
            interface: iface.to_string(),
            addresses: addrs.iter().map(|a| a.parse().unwrap()).collect(),
            dns_servers: vec![],
            gateways: vec![],
            mtu: 0,
        }
    }

    #[test]
    fn added_address_is_compatible() {
        let old = props("rmnet0", &["10.0.0.1"]);
        let new = props("rmnet0", &["10.0.0.1", "2001:db8::1"]);
        assert!(LinkProperties::socket_compatible(&old, &new));
    }

    #[test]
    fn lost_address_is_incompatible() {
        let old = props("rmnet0", &["10.0.0.1", "2001:db8::1"]);
        let new = props("rmnet0", &["10.0.0.1"]);
        assert!(!LinkProperties::socket_compatible(&old, &new));
    }

    #[test]
    fn replaced_address_is_incompatible() {
        let old = props("rmnet0", &["10.0.0.1"]);
        let new = props("rmnet0", &["10.0.0.2"]);
        assert!(!LinkProperties::socket_compatible(&old, &new));
    }

    #[test]
    fn interface_change_is_incompatible() {
        let old = props("rmnet0", &["10.0.0.1"]);
        let new = props("rmnet1", &["10.0.0.1"]);
        assert!(!LinkProperties::socket_compatible(&old, &new));
    }

    #[test]
    fn dns_change_is_compatible() {
        let old = props("rmnet0", &["10.0.0.1"]);
        let mut new = props("rmnet0", &["10.0.0.1"]);
        new.dns_servers.push("8.8.8.8".parse().unwrap());
        assert!(LinkProperties::socket_compatible(&old, &new));
    }

    #[test]
    fn well_formed_requires_iface_and_address() {
        assert!(props("rmnet0", &["10.0.0.1"]).is_well_formed());
        assert!(!props("", &["10.0.0.1"]).is_well_formed());
        assert!(!props("rmnet0", &[]).is_well_formed());
    }
}
