use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::addr::Vip;
use crate::config::NoiseConfig;
use crate::link::SimpleLink;
use crate::phys::SimulatedUdp;
use crate::substrate::Packet;
use crate::topology::Topology;

/// Snapshot of the router's forwarding counters.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct RouterStats {
    pub forwarded: u64,
    pub dropped_ttl: u64,
    pub dropped_unknown: u64,
}

impl RouterStats {
    pub fn total(&self) -> u64 {
        self.forwarded + self.dropped_ttl + self.dropped_unknown
    }
}

/// The network layer of the router.
///
/// A dedicated intake task blocks on the link and queues every inbound
/// packet; [`RouterNetwork::forward_next`] pops one packet, applies the TTL
/// rule and re-emits it toward its destination. Nothing is ever delivered
/// upward: the router is not an endpoint. Keeping intake separate from the
/// forwarding step isolates blocking I/O from the forwarding policy.
pub struct RouterNetwork {
    link: Arc<SimpleLink>,
    routing: FxHashMap<Vip, Vip>,
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<Packet>>,
    intake: JoinHandle<()>,
    forwarded: AtomicU64,
    dropped_ttl: AtomicU64,
    dropped_unknown: AtomicU64,
}

impl RouterNetwork {
    /// Builds the router network and starts its intake task.
    pub fn start(link: SimpleLink, routing: FxHashMap<Vip, Vip>) -> Arc<RouterNetwork> {
        let link = Arc::new(link);
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let intake = tokio::spawn({
            let link = link.clone();
            async move {
                loop {
                    match link.receive().await {
                        Ok(packet) => {
                            if queue_tx.send(packet).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("router intake stopped: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        Arc::new(RouterNetwork {
            link,
            routing,
            queue: tokio::sync::Mutex::new(queue_rx),
            intake,
            forwarded: AtomicU64::new(0),
            dropped_ttl: AtomicU64::new(0),
            dropped_unknown: AtomicU64::new(0),
        })
    }

    /// Pops one queued packet and forwards it, or drops it if its TTL is
    /// spent or its destination is unknown. Blocks until a packet is
    /// available.
    pub async fn forward_next(&self) -> anyhow::Result<()> {
        let mut packet = {
            let mut queue = self.queue.lock().await;
            queue
                .recv()
                .await
                .ok_or_else(|| anyhow!("router intake task is gone"))?
        };

        if packet.ttl <= 1 {
            warn!(
                "dropping packet {} -> {}: TTL expired",
                packet.src_vip, packet.dst_vip
            );
            self.dropped_ttl.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        packet.ttl -= 1;

        let Some(next_hop) = self.routing.get(&packet.dst_vip) else {
            error!(
                "dropping packet {} -> {}: destination not in the routing table",
                packet.src_vip, packet.dst_vip
            );
            self.dropped_unknown.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        };

        debug!(
            "forwarding packet {} -> {} (next hop {}, ttl {})",
            packet.src_vip, packet.dst_vip, next_hop, packet.ttl
        );
        let next_hop = next_hop.clone();
        self.link.send(packet, &next_hop).await?;
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Forwards packets until the stack is torn down.
    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            self.forward_next().await?;
        }
    }

    /// Assembles the router's stack for a topology and starts it: physical
    /// socket, link, intake task.
    pub async fn start_for(
        topology: Arc<Topology>,
        noise: NoiseConfig,
    ) -> anyhow::Result<Arc<RouterNetwork>> {
        let node = topology.router().clone();
        let phys = SimulatedUdp::bind(&node, topology.clone(), noise).await?;
        let link = SimpleLink::new(phys, node.mac.clone(), topology.arp_table(&node.vip));
        Ok(RouterNetwork::start(link, topology.routing_table(&node.vip)))
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped_ttl: self.dropped_ttl.load(Ordering::Relaxed),
            dropped_unknown: self.dropped_unknown.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RouterNetwork {
    fn drop(&mut self) {
        self.intake.abort();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tokio::time::timeout;

    use crate::config::NoiseConfig;
    use crate::phys::SimulatedUdp;
    use crate::substrate::{Segment, SegmentPayload};
    use crate::topology::{NodeSpec, Topology};

    use super::*;

    fn test_topology(base_port: u16) -> Arc<Topology> {
        Arc::new(
            Topology::new(
                vec![
                    NodeSpec::new("a", "HOST_A", "AA:AA:AA:AA:AA:AA", ([127, 0, 0, 1], base_port).into()),
                    NodeSpec::new("b", "HOST_B", "BB:BB:BB:BB:BB:BB", ([127, 0, 0, 1], base_port + 1).into()),
                    NodeSpec::new("r", "HOST_R", "DD:DD:DD:DD:DD:DD", ([127, 0, 0, 1], base_port + 2).into()),
                ],
                "r",
            )
            .unwrap(),
        )
    }

    async fn link_for(topology: &Arc<Topology>, name: &str) -> SimpleLink {
        let node = topology.node(name).unwrap().clone();
        let phys = SimulatedUdp::bind(&node, topology.clone(), NoiseConfig::off())
            .await
            .unwrap();
        SimpleLink::new(phys, node.mac.clone(), topology.arp_table(&node.vip))
    }

    fn packet_with_ttl(ttl: u8) -> Packet {
        Packet::new(
            Vip::new("HOST_A"),
            Vip::new("HOST_B"),
            ttl,
            Segment {
                seq_num: 0,
                is_ack: false,
                payload: SegmentPayload {
                    src_vip: Vip::new("HOST_A"),
                    src_port: 49152,
                    dst_port: 5000,
                    data: String::new(),
                    more: false,
                    fin: false,
                },
            },
        )
    }

    async fn router_for(topology: &Arc<Topology>) -> Arc<RouterNetwork> {
        let link = link_for(topology, "r").await;
        let routing = topology.routing_table(&Vip::new("HOST_R"));
        RouterNetwork::start(link, routing)
    }

    #[tokio::test]
    async fn test_forwards_with_decremented_ttl() {
        let topology = test_topology(21100);
        let router = router_for(&topology).await;
        let a = link_for(&topology, "a").await;
        let b = link_for(&topology, "b").await;

        a.send(packet_with_ttl(16), &Vip::new("HOST_R")).await.unwrap();
        timeout(Duration::from_secs(1), router.forward_next())
            .await
            .unwrap()
            .unwrap();

        let received = timeout(Duration::from_secs(1), b.receive()).await.unwrap().unwrap();
        assert_eq!(received.ttl, 15);
        assert_eq!(router.stats().forwarded, 1);
    }

    #[tokio::test]
    async fn test_drops_packet_with_spent_ttl() {
        let topology = test_topology(21110);
        let router = router_for(&topology).await;
        let a = link_for(&topology, "a").await;
        let b = link_for(&topology, "b").await;

        a.send(packet_with_ttl(1), &Vip::new("HOST_R")).await.unwrap();
        timeout(Duration::from_secs(1), router.forward_next())
            .await
            .unwrap()
            .unwrap();

        assert!(timeout(Duration::from_millis(200), b.receive()).await.is_err());
        assert_eq!(
            router.stats(),
            RouterStats {
                forwarded: 0,
                dropped_ttl: 1,
                dropped_unknown: 0,
            }
        );
    }

    #[tokio::test]
    async fn test_drops_packet_for_unknown_destination() {
        let topology = test_topology(21120);
        let router = router_for(&topology).await;
        let a = link_for(&topology, "a").await;

        let mut packet = packet_with_ttl(16);
        packet.dst_vip = Vip::new("HOST_Z");
        a.send(packet, &Vip::new("HOST_R")).await.unwrap();

        timeout(Duration::from_secs(1), router.forward_next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(router.stats().dropped_unknown, 1);
        assert_eq!(router.stats().total(), 1);
    }
}
