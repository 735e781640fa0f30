use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};

use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;

use crate::addr::{Mac, Vip};

/// One node of the deployment: a human-readable name, the virtual IP and MAC
/// it answers to, and the real UDP endpoint the substrate delivers to.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub vip: Vip,
    pub mac: Mac,
    pub endpoint: SocketAddr,
}

impl NodeSpec {
    pub fn new(name: &str, vip: &str, mac: &str, endpoint: SocketAddr) -> NodeSpec {
        NodeSpec {
            name: name.to_string(),
            vip: Vip::new(vip),
            mac: Mac::new(mac),
            endpoint,
        }
    }
}

/// The process-wide node table, identical across all nodes, plus the derived
/// ARP and routing tables.
///
/// The deployment of record is [`Topology::standard`]; tests build smaller or
/// differently-ported topologies to exercise routing edge cases without
/// touching the fixed ports.
#[derive(Debug)]
pub struct Topology {
    nodes: Vec<NodeSpec>,
    router: usize,
}

static STANDARD: LazyLock<Arc<Topology>> = LazyLock::new(|| {
    Arc::new(
        Topology::new(
            vec![
                NodeSpec::new("Alice", "HOST_A", "AA:AA:AA:AA:AA:AA", ([127, 0, 0, 1], 10000).into()),
                NodeSpec::new("Bob", "HOST_B", "BB:BB:BB:BB:BB:BB", ([127, 0, 0, 1], 10001).into()),
                NodeSpec::new("Server", "HOST_S", "CC:CC:CC:CC:CC:CC", ([127, 0, 0, 1], 10002).into()),
                NodeSpec::new("Router", "HOST_R", "DD:DD:DD:DD:DD:DD", ([127, 0, 0, 1], 10003).into()),
            ],
            "Router",
        )
        .expect("standard topology is well-formed"),
    )
});

impl Topology {
    pub fn new(nodes: Vec<NodeSpec>, router_name: &str) -> anyhow::Result<Topology> {
        let router = nodes
            .iter()
            .position(|n| n.name == router_name)
            .ok_or_else(|| anyhow!("router node {:?} is not part of the topology", router_name))?;

        for node in &nodes {
            if !node.mac.is_well_formed() {
                bail!("node {:?} has a malformed MAC address {:?}", node.name, node.mac);
            }
            if nodes.iter().filter(|n| n.vip == node.vip).count() > 1 {
                bail!("duplicate VIP {:?} in topology", node.vip);
            }
            if nodes.iter().filter(|n| n.mac == node.mac).count() > 1 {
                bail!("duplicate MAC {:?} in topology", node.mac);
            }
        }

        Ok(Topology { nodes, router })
    }

    /// The fixed four-node deployment: Alice, Bob, the chat server and the
    /// router, all on loopback ports 10000-10003.
    pub fn standard() -> Arc<Topology> {
        STANDARD.clone()
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn router(&self) -> &NodeSpec {
        &self.nodes[self.router]
    }

    pub fn is_router(&self, vip: &Vip) -> bool {
        &self.router().vip == vip
    }

    pub fn node(&self, name: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_by_vip(&self, vip: &Vip) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| &n.vip == vip)
    }

    /// Resolves a MAC to the real UDP endpoint behind it.
    pub fn endpoint_for_mac(&self, mac: &Mac) -> Option<SocketAddr> {
        self.nodes.iter().find(|n| &n.mac == mac).map(|n| n.endpoint)
    }

    /// The static ARP table of a node: next-hop VIP to next-hop MAC.
    ///
    /// Hosts resolve every non-local VIP to the router's MAC; the router
    /// resolves each host VIP to that host's own MAC.
    pub fn arp_table(&self, local_vip: &Vip) -> FxHashMap<Vip, Mac> {
        if self.is_router(local_vip) {
            self.nodes
                .iter()
                .filter(|n| &n.vip != local_vip)
                .map(|n| (n.vip.clone(), n.mac.clone()))
                .collect()
        } else {
            let router_mac = self.router().mac.clone();
            self.nodes
                .iter()
                .filter(|n| &n.vip != local_vip)
                .map(|n| (n.vip.clone(), router_mac.clone()))
                .collect()
        }
    }

    /// The static routing table of a node: destination VIP to next-hop VIP.
    ///
    /// Hosts route every non-local destination through the router; the
    /// router delivers each host destination directly.
    pub fn routing_table(&self, local_vip: &Vip) -> FxHashMap<Vip, Vip> {
        if self.is_router(local_vip) {
            self.nodes
                .iter()
                .filter(|n| &n.vip != local_vip)
                .map(|n| (n.vip.clone(), n.vip.clone()))
                .collect()
        } else {
            let router_vip = self.router().vip.clone();
            self.nodes
                .iter()
                .filter(|n| &n.vip != local_vip)
                .map(|n| (n.vip.clone(), router_vip.clone()))
                .collect()
        }
    }
}
