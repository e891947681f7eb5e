//! Network address derivation for inventory nodes

use super::InventoryNode;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Capability to find the IPv4 address of an inventory node
pub trait AddressDeriver: Send + Sync {
    fn derive_address(&self, node: &InventoryNode) -> Option<Ipv4Addr>;
}

/// Reads the address embedded in names like `ip-10-0-1-5.ec2.internal`
///
/// Dashes are read as dots and the first dotted quad is taken. Names that
/// carry other dash-separated numbers ahead of the address will mislead it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeNameAddress;

fn dotted_quad() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        regex::Regex::new(r"[0-9]+(?:\.[0-9]+){3}").expect("static pattern is valid")
    })
}

impl AddressDeriver for NodeNameAddress {
    fn derive_address(&self, node: &InventoryNode) -> Option<Ipv4Addr> {
        let dotted = node.name.replace('-', ".");
        let found = dotted_quad().find(&dotted)?;
        found.as_str().parse().ok()
    }
}

/// Reads an address of the given type from the node status
#[derive(Debug, Clone)]
pub struct StatusAddress {
    kind: String,
}

impl StatusAddress {
    pub const INTERNAL_IP: &'static str = "InternalIP";

    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into() }
    }
}

impl Default for StatusAddress {
    fn default() -> Self {
        Self::new(Self::INTERNAL_IP)
    }
}

impl AddressDeriver for StatusAddress {
    fn derive_address(&self, node: &InventoryNode) -> Option<Ipv4Addr> {
        node.addresses
            .iter()
            .filter(|a| a.kind == self.kind)
            .find_map(|a| a.address.parse().ok())
    }
}

/// Configured source of node addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressSource {
    /// Parse the node name
    #[default]
    Name,
    /// Use the `InternalIP` status address
    Status,
}

impl AddressSource {
    pub fn deriver(&self) -> Arc<dyn AddressDeriver> {
        match self {
            AddressSource::Name => Arc::new(NodeNameAddress),
            AddressSource::Status => Arc::new(StatusAddress::default()),
        }
    }
}

impl FromStr for AddressSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "name" => Ok(AddressSource::Name),
            "status" => Ok(AddressSource::Status),
            other => Err(format!("unknown address source '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::NodeAddress;

    fn node(name: &str) -> InventoryNode {
        InventoryNode {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_name_address() {
        let deriver = NodeNameAddress;
        assert_eq!(
            deriver.derive_address(&node("ip-10-0-1-5.ec2.internal")),
            Some(Ipv4Addr::new(10, 0, 1, 5))
        );
        assert_eq!(
            deriver.derive_address(&node("ip-192-168-33-7.us-west-2.compute.internal")),
            Some(Ipv4Addr::new(192, 168, 33, 7))
        );
        assert_eq!(
            deriver.derive_address(&node("10.0.1.5")),
            Some(Ipv4Addr::new(10, 0, 1, 5))
        );
    }

    #[test]
    fn test_name_without_address() {
        let deriver = NodeNameAddress;
        assert_eq!(deriver.derive_address(&node("worker-a")), None);
        assert_eq!(deriver.derive_address(&node("node-1-2")), None);
        // Octets out of range are not an address
        assert_eq!(deriver.derive_address(&node("ip-300-0-1-5")), None);
    }

    #[test]
    fn test_status_address() {
        let mut n = node("worker-a");
        n.addresses = vec![
            NodeAddress {
                kind: "Hostname".into(),
                address: "worker-a".into(),
            },
            NodeAddress {
                kind: "InternalIP".into(),
                address: "10.0.2.14".into(),
            },
        ];

        assert_eq!(
            StatusAddress::default().derive_address(&n),
            Some(Ipv4Addr::new(10, 0, 2, 14))
        );
        assert_eq!(StatusAddress::new("ExternalIP").derive_address(&n), None);
    }

    #[test]
    fn test_address_source_parse() {
        assert_eq!("status".parse::<AddressSource>(), Ok(AddressSource::Status));
        assert_eq!("Name".parse::<AddressSource>(), Ok(AddressSource::Name));
        assert!("dns".parse::<AddressSource>().is_err());
        assert_eq!(AddressSource::default(), AddressSource::Name);
    }
}
