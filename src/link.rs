use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::addr::{Mac, Vip};
use crate::phys::SimulatedUdp;
use crate::substrate::{Frame, Packet};

/// The link layer: wraps packets in MAC-addressed frames and filters inbound
/// frames by integrity and destination MAC.
///
/// ARP is static: hosts resolve every next hop to the router's MAC, the
/// router resolves each host VIP to that host's own MAC. There is no
/// dynamic resolution and no broadcast.
pub struct SimpleLink {
    phys: SimulatedUdp,
    local_mac: Mac,
    arp: FxHashMap<Vip, Mac>,
}

impl SimpleLink {
    pub fn new(phys: SimulatedUdp, local_mac: Mac, arp: FxHashMap<Vip, Mac>) -> SimpleLink {
        SimpleLink {
            phys,
            local_mac,
            arp,
        }
    }

    /// Frames the packet for the next hop and puts it on the wire.
    ///
    /// A VIP without an ARP entry is a programming error and aborts.
    pub async fn send(&self, packet: Packet, next_hop: &Vip) -> anyhow::Result<()> {
        let dst_mac = self
            .arp
            .get(next_hop)
            .unwrap_or_else(|| panic!("no ARP entry for VIP {}", next_hop))
            .clone();

        let frame = Frame::new(self.local_mac.clone(), dst_mac.clone(), packet)?;
        self.phys.send(&dst_mac, frame.to_bytes()?).await
    }

    /// Blocks until a valid frame addressed to this node arrives and returns
    /// the packet it carries. Unparsable, corrupt and misaddressed frames
    /// are dropped silently; the upper layer only ever sees valid frames.
    pub async fn receive(&self) -> anyhow::Result<Packet> {
        loop {
            let bytes = self.phys.receive().await?;

            let (frame, intact) = match Frame::from_bytes(&bytes) {
                Ok(parsed) => parsed,
                Err(e) => {
                    trace!("dropping unparsable frame: {}", e);
                    continue;
                }
            };

            if !intact {
                debug!("dropping frame with bad FCS from {}", frame.src_mac);
                continue;
            }
            if frame.dst_mac != self.local_mac {
                debug!(
                    "dropping frame addressed to {} (this node is {})",
                    frame.dst_mac, self.local_mac
                );
                continue;
            }

            return Ok(frame.data);
        }
    }
}
