use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::net::UdpSocket;

use crate::addr::Mac;
use crate::config::NoiseConfig;
use crate::substrate::send_over_noisy_channel;
use crate::topology::{NodeSpec, Topology};

/// Upper bound for one datagram on this substrate. Generously above the
/// largest frame an MSS-sized chunk can produce after Base64 and JSON
/// framing.
pub const MAX_DATAGRAM: usize = 8192;

/// The physical layer: one bound UDP socket, sending through the noisy
/// channel and receiving raw datagrams.
///
/// The socket is bound for the node's whole lifetime and released when the
/// stack owning it is dropped.
pub struct SimulatedUdp {
    socket: Arc<UdpSocket>,
    topology: Arc<Topology>,
    noise: NoiseConfig,
}

impl SimulatedUdp {
    pub async fn bind(
        node: &NodeSpec,
        topology: Arc<Topology>,
        noise: NoiseConfig,
    ) -> anyhow::Result<SimulatedUdp> {
        let socket = Arc::new(UdpSocket::bind(node.endpoint).await?);
        Ok(SimulatedUdp {
            socket,
            topology,
            noise,
        })
    }

    /// Resolves the destination MAC to its real endpoint and hands the frame
    /// bytes to the noisy channel. No retry, no acknowledgement.
    ///
    /// An unknown MAC is a programming error and aborts.
    pub async fn send(&self, dst_mac: &Mac, frame_bytes: Vec<u8>) -> anyhow::Result<()> {
        let endpoint = self
            .topology
            .endpoint_for_mac(dst_mac)
            .unwrap_or_else(|| panic!("unknown MAC {}: not part of the topology", dst_mac));

        send_over_noisy_channel(&self.socket, frame_bytes, endpoint, &self.noise).await
    }

    /// Blocks until one datagram arrives and returns its raw bytes.
    pub async fn receive(&self) -> anyhow::Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(MAX_DATAGRAM);
        self.socket.recv_buf(&mut buf).await?;
        Ok(buf.to_vec())
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}
