use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::addr::Vip;
use crate::link::SimpleLink;
use crate::network::SegmentNetwork;
use crate::substrate::{Packet, Segment};

/// The network layer of an end host: originates packets with the initial TTL
/// through the static routing table and delivers only packets addressed to
/// the local VIP. Hosts never forward.
pub struct HostNetwork {
    link: SimpleLink,
    local_vip: Vip,
    routing: FxHashMap<Vip, Vip>,
    initial_ttl: u8,
}

impl HostNetwork {
    pub fn new(
        link: SimpleLink,
        local_vip: Vip,
        routing: FxHashMap<Vip, Vip>,
        initial_ttl: u8,
    ) -> HostNetwork {
        HostNetwork {
            link,
            local_vip,
            routing,
            initial_ttl,
        }
    }
}

#[async_trait]
impl SegmentNetwork for HostNetwork {
    fn local_vip(&self) -> &Vip {
        &self.local_vip
    }

    /// A destination without a route is a programming error and aborts.
    async fn send(&self, segment: Segment, dst_vip: &Vip) -> anyhow::Result<()> {
        let next_hop = self
            .routing
            .get(dst_vip)
            .unwrap_or_else(|| panic!("no route for VIP {}", dst_vip));

        let packet = Packet::new(
            self.local_vip.clone(),
            dst_vip.clone(),
            self.initial_ttl,
            segment,
        );
        self.link.send(packet, next_hop).await
    }

    async fn receive(&self) -> anyhow::Result<Segment> {
        loop {
            let packet = self.link.receive().await?;

            if packet.dst_vip == self.local_vip {
                return Ok(packet.data);
            }
            debug!(
                "dropping packet for {} (this host is {})",
                packet.dst_vip, self.local_vip
            );
        }
    }
}
