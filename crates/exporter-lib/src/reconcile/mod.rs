//! Identity reconciliation between metrics instances and cluster nodes
//!
//! The metrics backend identifies nodes by scrape address (`host:port`),
//! the orchestration API by node name. Each inventory node's IPv4 address
//! is derived and matched against the instance addresses:
//!
//! 1. exact address match;
//! 2. otherwise the numerically smallest unclaimed instance address inside
//!    the node's /24 network;
//! 3. otherwise the node is skipped.
//!
//! The /24 fallback assumes single-homed nodes and contiguous subnetting.
//! On other address plans it can pair a node with a neighbour's series.

mod address;
mod inventory;

pub use address::{AddressDeriver, AddressSource, NodeNameAddress, StatusAddress};
pub use inventory::{inventory_node, KubeInventory, NodeInventory};

use crate::error::{ExporterError, Result};
use crate::models::{instance_address, NodeIdentity};
use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Instance type labels, newest first
pub const INSTANCE_TYPE_LABELS: [&str; 2] = [
    "node.kubernetes.io/instance-type",
    "beta.kubernetes.io/instance-type",
];

pub const REGION_LABEL: &str = "topology.kubernetes.io/region";

/// Address entry from a node's status
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeAddress {
    pub kind: String,
    pub address: String,
}

/// A cluster node as listed by the orchestration API
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryNode {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub addresses: Vec<NodeAddress>,
}

impl InventoryNode {
    /// First present instance type label
    pub fn instance_type(&self) -> Option<&str> {
        INSTANCE_TYPE_LABELS
            .iter()
            .find_map(|key| self.labels.get(*key))
            .map(String::as_str)
    }

    /// Region label, empty when absent
    pub fn region(&self) -> &str {
        self.labels.get(REGION_LABEL).map(String::as_str).unwrap_or("")
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Resolved identities keyed by instance identifier
    pub identities: BTreeMap<String, NodeIdentity>,
    /// Nodes that could not be resolved, with the reason
    pub skipped: Vec<ExporterError>,
}

/// Match an address against the candidate instance addresses
///
/// `candidates` maps instance address to instance identifier.
pub fn match_instance<'a>(
    node_address: Ipv4Addr,
    candidates: &'a BTreeMap<String, String>,
) -> Option<&'a str> {
    if let Some(instance) = candidates.get(&node_address.to_string()) {
        return Some(instance);
    }
    subnet_match(node_address, candidates)
}

/// Smallest candidate address in the same /24 as `node_address`
fn subnet_match<'a>(
    node_address: Ipv4Addr,
    candidates: &'a BTreeMap<String, String>,
) -> Option<&'a str> {
    let network = slash24(node_address);
    candidates
        .iter()
        .filter_map(|(addr, instance)| addr.parse::<Ipv4Addr>().ok().map(|ip| (ip, instance)))
        .filter(|(ip, _)| slash24(*ip) == network)
        .min_by_key(|(ip, _)| *ip)
        .map(|(_, instance)| instance.as_str())
}

fn slash24(addr: Ipv4Addr) -> u32 {
    u32::from(addr) & 0xFFFF_FF00
}

/// Resolves instance identifiers to node hardware identity
pub struct IdentityReconciler {
    inventory: Arc<dyn NodeInventory>,
    deriver: Arc<dyn AddressDeriver>,
}

impl IdentityReconciler {
    pub fn new(inventory: Arc<dyn NodeInventory>, deriver: Arc<dyn AddressDeriver>) -> Self {
        Self { inventory, deriver }
    }

    /// Map each instance identifier to the identity of its cluster node
    ///
    /// Fails only when the inventory cannot be listed. Unresolvable nodes
    /// are reported in [`Reconciliation::skipped`].
    pub async fn reconcile(&self, instance_ids: &BTreeSet<String>) -> Result<Reconciliation> {
        let mut nodes = self.inventory.list_nodes().await?;
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(self.resolve(&nodes, instance_ids))
    }

    fn resolve(&self, nodes: &[InventoryNode], instance_ids: &BTreeSet<String>) -> Reconciliation {
        let mut result = Reconciliation::default();

        // Instance address -> instance id, first id wins for a shared address
        let mut candidates: BTreeMap<String, String> = BTreeMap::new();
        for id in instance_ids {
            candidates
                .entry(instance_address(id).to_string())
                .or_insert_with(|| id.clone());
        }

        let mut pending = Vec::new();
        for node in nodes {
            let Some(instance_type) = node.instance_type() else {
                result.skipped.push(self.skip(node, None, "no instance type label".into()));
                continue;
            };
            let Some(address) = self.deriver.derive_address(node) else {
                result.skipped.push(self.skip(
                    node,
                    Some(instance_type),
                    "no IPv4 address derivable".into(),
                ));
                continue;
            };
            pending.push((node, instance_type, address));
        }

        // Exact matches claim their instances before any subnet fallback
        let mut unmatched = Vec::new();
        for (node, instance_type, address) in pending {
            if let Some(instance) = candidates.remove(&address.to_string()) {
                result
                    .identities
                    .insert(instance, identity(node, instance_type));
            } else {
                unmatched.push((node, instance_type, address));
            }
        }

        for (node, instance_type, address) in unmatched {
            let Some(instance) = match_instance(address, &candidates).map(str::to_string) else {
                let reason = format!(
                    "address {} matches no instance in {:?}",
                    address,
                    instance_ids
                );
                result.skipped.push(self.skip(node, Some(instance_type), reason));
                continue;
            };

            debug!(
                node = %node.name,
                address = %address,
                instance = %instance,
                "Matched node by /24 subnet"
            );
            candidates.remove(instance_address(&instance));
            result
                .identities
                .insert(instance, identity(node, instance_type));
        }

        result
    }

    fn skip(&self, node: &InventoryNode, instance_type: Option<&str>, reason: String) -> ExporterError {
        warn!(
            node = %node.name,
            instance_type = instance_type.unwrap_or(""),
            reason = %reason,
            "Node skipped, cannot be estimated"
        );
        ExporterError::Reconciliation {
            node: node.name.clone(),
            reason,
        }
    }
}

fn identity(node: &InventoryNode, instance_type: &str) -> NodeIdentity {
    NodeIdentity {
        node_name: node.name.clone(),
        instance_type: instance_type.to_string(),
        region: node.region().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct StaticInventory(Vec<InventoryNode>);

    #[async_trait]
    impl NodeInventory for StaticInventory {
        async fn list_nodes(&self) -> Result<Vec<InventoryNode>> {
            Ok(self.0.clone())
        }
    }

    struct FailingInventory;

    #[async_trait]
    impl NodeInventory for FailingInventory {
        async fn list_nodes(&self) -> Result<Vec<InventoryNode>> {
            Err(ExporterError::Inventory("forbidden".into()))
        }
    }

    fn node(name: &str, labels: &[(&str, &str)]) -> InventoryNode {
        InventoryNode {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            addresses: vec![],
        }
    }

    fn typed(name: &str, instance_type: &str) -> InventoryNode {
        node(
            name,
            &[
                ("node.kubernetes.io/instance-type", instance_type),
                ("topology.kubernetes.io/region", "us-west-2"),
            ],
        )
    }

    fn ids(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn candidates(items: &[&str]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|id| (instance_address(id).to_string(), id.to_string()))
            .collect()
    }

    fn reconciler(nodes: Vec<InventoryNode>) -> IdentityReconciler {
        IdentityReconciler::new(Arc::new(StaticInventory(nodes)), Arc::new(NodeNameAddress))
    }

    #[test]
    fn test_exact_match() {
        let c = candidates(&["10.0.1.5:9100"]);
        assert_eq!(
            match_instance(Ipv4Addr::new(10, 0, 1, 5), &c),
            Some("10.0.1.5:9100")
        );
    }

    #[test]
    fn test_subnet_fallback() {
        let c = candidates(&["10.0.1.99:9100"]);
        assert_eq!(
            match_instance(Ipv4Addr::new(10, 0, 1, 5), &c),
            Some("10.0.1.99:9100")
        );
    }

    #[test]
    fn test_different_subnet_no_match() {
        let c = candidates(&["10.0.2.99:9100"]);
        assert_eq!(match_instance(Ipv4Addr::new(10, 0, 1, 5), &c), None);
    }

    #[test]
    fn test_subnet_tie_break_is_numeric() {
        // "10.0.1.100" sorts before "10.0.1.20" as text
        let c = candidates(&["10.0.1.100:9100", "10.0.1.20:9100", "10.0.1.9:9100"]);
        assert_eq!(
            match_instance(Ipv4Addr::new(10, 0, 1, 5), &c),
            Some("10.0.1.9:9100")
        );
    }

    #[test]
    fn test_hostname_instances_ignored_by_subnet() {
        let c = candidates(&["worker-a:9100"]);
        assert_eq!(match_instance(Ipv4Addr::new(10, 0, 1, 5), &c), None);
    }

    #[test]
    fn test_label_precedence() {
        let n = node(
            "n",
            &[
                ("beta.kubernetes.io/instance-type", "old"),
                ("node.kubernetes.io/instance-type", "new"),
            ],
        );
        assert_eq!(n.instance_type(), Some("new"));

        let n = node("n", &[("beta.kubernetes.io/instance-type", "old")]);
        assert_eq!(n.instance_type(), Some("old"));
        assert_eq!(n.region(), "");

        assert_eq!(node("n", &[]).instance_type(), None);
    }

    #[tokio::test]
    async fn test_reconcile_resolves_identities() {
        let r = reconciler(vec![
            typed("ip-10-0-1-5.ec2.internal", "m5.large"),
            typed("ip-10-0-3-7.ec2.internal", "c5.xlarge"),
        ]);

        let result = r
            .reconcile(&ids(&["10.0.1.5:9100", "10.0.3.200:9100"]))
            .await
            .unwrap();

        assert!(result.skipped.is_empty());
        let exact = &result.identities["10.0.1.5:9100"];
        assert_eq!(exact.instance_type, "m5.large");
        assert_eq!(exact.region, "us-west-2");
        assert_eq!(exact.node_name, "ip-10-0-1-5.ec2.internal");

        let fallback = &result.identities["10.0.3.200:9100"];
        assert_eq!(fallback.instance_type, "c5.xlarge");
    }

    #[tokio::test]
    async fn test_reconcile_skips_unresolvable_nodes() {
        let r = reconciler(vec![
            node("ip-10-0-1-6.ec2.internal", &[]),
            typed("worker-without-address", "m5.large"),
            typed("ip-10-9-9-9.ec2.internal", "m5.large"),
        ]);

        let result = r.reconcile(&ids(&["10.0.1.6:9100"])).await.unwrap();

        assert!(result.identities.is_empty());
        assert_eq!(result.skipped.len(), 3);
        assert!(result.skipped.iter().all(|e| e.code() == "reconciliation"));
    }

    #[tokio::test]
    async fn test_exact_match_wins_over_earlier_subnet_fallback() {
        // ip-10-0-1-4 sorts first but has no series of its own
        let r = reconciler(vec![
            typed("ip-10-0-1-4.ec2.internal", "t3.small"),
            typed("ip-10-0-1-5.ec2.internal", "m5.large"),
        ]);

        let result = r
            .reconcile(&ids(&["10.0.1.5:9100", "10.0.1.8:9100"]))
            .await
            .unwrap();

        assert_eq!(result.identities["10.0.1.5:9100"].instance_type, "m5.large");
        assert_eq!(result.identities["10.0.1.8:9100"].instance_type, "t3.small");
    }

    #[tokio::test]
    async fn test_instance_claimed_once() {
        let r = reconciler(vec![
            typed("ip-10-0-1-4.ec2.internal", "t3.small"),
            typed("ip-10-0-1-7.ec2.internal", "m5.large"),
        ]);

        let result = r.reconcile(&ids(&["10.0.1.9:9100"])).await.unwrap();

        assert_eq!(result.identities.len(), 1);
        assert_eq!(result.identities["10.0.1.9:9100"].instance_type, "t3.small");
        assert_eq!(result.skipped.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_inventory() {
        let r = reconciler(vec![]);
        let result = r.reconcile(&ids(&["10.0.1.5:9100"])).await.unwrap();
        assert!(result.identities.is_empty());
        assert!(result.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_inventory_failure_propagates() {
        let r = IdentityReconciler::new(Arc::new(FailingInventory), Arc::new(NodeNameAddress));
        let err = r.reconcile(&ids(&["10.0.1.5:9100"])).await.unwrap_err();
        assert_eq!(err.code(), "inventory");
    }

    #[tokio::test]
    async fn test_status_address_deriver() {
        let mut n = typed("worker-a", "m5.large");
        n.addresses.push(NodeAddress {
            kind: "InternalIP".into(),
            address: "10.0.1.5".into(),
        });
        let r = IdentityReconciler::new(
            Arc::new(StaticInventory(vec![n])),
            AddressSource::Status.deriver(),
        );

        let result = r.reconcile(&ids(&["10.0.1.5:9100"])).await.unwrap();
        assert_eq!(result.identities["10.0.1.5:9100"].node_name, "worker-a");
    }
}
