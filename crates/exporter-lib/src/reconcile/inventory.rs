//! Node inventory from the orchestration API

use super::{InventoryNode, NodeAddress};
use crate::error::{ExporterError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Trait for sources of cluster node records
#[async_trait]
pub trait NodeInventory: Send + Sync {
    async fn list_nodes(&self) -> Result<Vec<InventoryNode>>;
}

/// Lists nodes through the Kubernetes API
pub struct KubeInventory {
    client: Client,
    timeout: Duration,
}

impl KubeInventory {
    /// Connect with in-cluster credentials, falling back to the local kubeconfig
    ///
    /// Called once at startup; the resulting client is reused by every cycle.
    pub async fn connect(timeout: Duration) -> Result<Self> {
        let config = match Config::incluster() {
            Ok(config) => {
                info!("Using in-cluster Kubernetes credentials");
                config
            }
            Err(e) => {
                warn!(error = %e, "In-cluster credentials unavailable, trying kubeconfig");
                Config::from_kubeconfig(&KubeConfigOptions::default())
                    .await
                    .map_err(|e| ExporterError::Inventory(format!("no usable kubeconfig: {}", e)))?
            }
        };

        let client = Client::try_from(config)?;
        Ok(Self::with_client(client, timeout))
    }

    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl NodeInventory for KubeInventory {
    async fn list_nodes(&self) -> Result<Vec<InventoryNode>> {
        let api: Api<Node> = Api::all(self.client.clone());
        let nodes = tokio::time::timeout(self.timeout, api.list(&ListParams::default()))
            .await
            .map_err(|_| {
                ExporterError::Inventory(format!(
                    "node list timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        debug!(count = nodes.items.len(), "Listed cluster nodes");
        Ok(nodes.items.into_iter().map(inventory_node).collect())
    }
}

/// Keep the parts of a Node the reconciler reads
pub fn inventory_node(node: Node) -> InventoryNode {
    let addresses = node
        .status
        .and_then(|status| status.addresses)
        .unwrap_or_default()
        .into_iter()
        .map(|a| NodeAddress {
            kind: a.type_,
            address: a.address,
        })
        .collect();

    InventoryNode {
        name: node.metadata.name.unwrap_or_default(),
        labels: node.metadata.labels.unwrap_or_default(),
        addresses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress as K8sNodeAddress, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_inventory_node_from_k8s() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("ip-10-0-1-5.ec2.internal".into()),
                labels: Some(
                    [(
                        "node.kubernetes.io/instance-type".to_string(),
                        "m5.large".to_string(),
                    )]
                    .into(),
                ),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(vec![K8sNodeAddress {
                    address: "10.0.1.5".into(),
                    type_: "InternalIP".into(),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let inv = inventory_node(node);
        assert_eq!(inv.name, "ip-10-0-1-5.ec2.internal");
        assert_eq!(
            inv.labels.get("node.kubernetes.io/instance-type").map(String::as_str),
            Some("m5.large")
        );
        assert_eq!(inv.addresses.len(), 1);
        assert_eq!(inv.addresses[0].kind, "InternalIP");
    }

    #[test]
    fn test_inventory_node_without_status() {
        let inv = inventory_node(Node::default());
        assert!(inv.name.is_empty());
        assert!(inv.labels.is_empty());
        assert!(inv.addresses.is_empty());
    }
}
