//! The reliable transport: Stop-and-Wait connections multiplexed over a
//! single host network endpoint.

mod connection;

pub use connection::ReliableConnection;

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, bail};
use rustc_hash::FxHashMap;
use tokio::select;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::addr::{Port, VirtualAddress, Vip};
use crate::config::{NoiseConfig, StackConfig};
use crate::link::SimpleLink;
use crate::network::{HostNetwork, SegmentNetwork};
use crate::phys::SimulatedUdp;
use crate::substrate::Segment;
use crate::topology::Topology;

/// Identifies exactly one logical connection on a node.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct ConnectionKey {
    pub remote_vip: Vip,
    pub remote_port: Port,
    pub local_port: Port,
}

type ConnectionTable = Arc<StdMutex<FxHashMap<ConnectionKey, Arc<ReliableConnection>>>>;

/// First ephemeral local port handed out for active opens.
const EPHEMERAL_PORT_BASE: u16 = 49152;

/// The connection multiplexer of an end host.
///
/// One daemon task receives segments from the network and routes each one to
/// its connection by (remote VIP, remote port, local port); the first data
/// segment for an unknown key implicitly opens a passive connection and
/// queues it for [`ReliableTransport::accept`]. No handshake segments exist.
pub struct ReliableTransport {
    network: Arc<dyn SegmentNetwork>,
    config: Arc<StackConfig>,
    local_vip: Vip,
    connections: ConnectionTable,
    accept_rx: Mutex<mpsc::UnboundedReceiver<Arc<ReliableConnection>>>,
    shutdown_tx: watch::Sender<bool>,
    daemon: StdMutex<Option<JoinHandle<()>>>,
    next_ephemeral_port: AtomicU16,
}

impl ReliableTransport {
    /// Builds the transport and starts its receive daemon.
    ///
    /// Refuses to build on the router node: routers have no transport.
    pub fn start(
        network: Arc<dyn SegmentNetwork>,
        topology: &Topology,
        config: Arc<StackConfig>,
    ) -> anyhow::Result<Arc<ReliableTransport>> {
        let local_vip = network.local_vip().clone();
        if topology.is_router(&local_vip) {
            bail!("{} is the router - routers have no transport", local_vip);
        }

        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let connections: ConnectionTable = Default::default();

        let daemon = tokio::spawn(demux_loop(
            network.clone(),
            config.clone(),
            local_vip.clone(),
            connections.clone(),
            accept_tx,
            shutdown_rx,
        ));
        debug!("{}: transport demultiplexer started", local_vip);

        Ok(Arc::new(ReliableTransport {
            network,
            config,
            local_vip,
            connections,
            accept_rx: Mutex::new(accept_rx),
            shutdown_tx,
            daemon: StdMutex::new(Some(daemon)),
            next_ephemeral_port: AtomicU16::new(EPHEMERAL_PORT_BASE),
        }))
    }

    pub fn local_vip(&self) -> &Vip {
        &self.local_vip
    }

    pub fn active_connections(&self) -> usize {
        self.connections.lock().expect("connection table poisoned").len()
    }

    /// Opens a connection to the destination on a fresh ephemeral local
    /// port. The connection is registered before anything is sent, so the
    /// peer's first ACK cannot race the registration; the first data segment
    /// implicitly opens the connection on the peer.
    pub fn connect(&self, destination: VirtualAddress) -> Arc<ReliableConnection> {
        let local_port = self.next_ephemeral_port.fetch_add(1, Ordering::SeqCst);
        let key = ConnectionKey {
            remote_vip: destination.vip.clone(),
            remote_port: destination.port,
            local_port,
        };

        let connection = ReliableConnection::new(
            self.network.clone(),
            self.config.clone(),
            VirtualAddress::new(self.local_vip.clone(), local_port),
            destination,
            Some(remover(self.connections.clone(), key.clone())),
        );
        self.connections
            .lock()
            .expect("connection table poisoned")
            .insert(key, connection.clone());

        debug!(
            "{}: connection opened to {}",
            connection.local_address(),
            connection.remote_address()
        );
        connection
    }

    /// Blocks until an inbound connection arrives; passive connections are
    /// handed out in the order their opening segments arrived.
    pub async fn accept(&self) -> anyhow::Result<Arc<ReliableConnection>> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            bail!("{}: transport is shut down", self.local_vip);
        }

        let mut accept_rx = self.accept_rx.lock().await;
        select! {
            _ = shutdown_rx.changed() => bail!("{}: transport is shut down", self.local_vip),
            connection = accept_rx.recv() => {
                let connection = connection
                    .ok_or_else(|| anyhow!("{}: transport is shut down", self.local_vip))?;
                debug!("{}: accepted connection from {}", self.local_vip, connection.remote_address());
                Ok(connection)
            }
        }
    }

    /// Stops the daemon cooperatively, tears down every registered
    /// connection and wakes all blocked `receive`/`accept` callers.
    pub async fn shutdown(&self) {
        info!("{}: shutting down transport", self.local_vip);
        let _ = self.shutdown_tx.send(true);

        let daemon = self.daemon.lock().expect("daemon handle poisoned").take();
        if let Some(daemon) = daemon {
            let _ = daemon.await;
        }

        let drained: Vec<_> = {
            let mut connections = self.connections.lock().expect("connection table poisoned");
            connections.drain().map(|(_, c)| c).collect()
        };
        for connection in drained {
            connection.abort();
        }
    }
}

/// Assembles the full host-side stack for a topology node and starts its
/// transport: physical socket, link, host network, multiplexer.
pub async fn host_transport(
    node_name: &str,
    topology: Arc<Topology>,
    config: Arc<StackConfig>,
    noise: NoiseConfig,
) -> anyhow::Result<Arc<ReliableTransport>> {
    let node = topology
        .node(node_name)
        .ok_or_else(|| anyhow!("unknown node {:?}", node_name))?
        .clone();

    let phys = SimulatedUdp::bind(&node, topology.clone(), noise).await?;
    let link = SimpleLink::new(phys, node.mac.clone(), topology.arp_table(&node.vip));
    let network = Arc::new(HostNetwork::new(
        link,
        node.vip.clone(),
        topology.routing_table(&node.vip),
        config.initial_ttl,
    ));
    ReliableTransport::start(network, &topology, config)
}

fn remover(connections: ConnectionTable, key: ConnectionKey) -> connection::OnClose {
    Box::new(move || {
        connections
            .lock()
            .expect("connection table poisoned")
            .remove(&key);
        debug!("connection removed from the table (key={:?})", key);
    })
}

async fn demux_loop(
    network: Arc<dyn SegmentNetwork>,
    config: Arc<StackConfig>,
    local_vip: Vip,
    connections: ConnectionTable,
    accept_tx: mpsc::UnboundedSender<Arc<ReliableConnection>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        select! {
            _ = shutdown_rx.changed() => {
                debug!("{}: demultiplexer stopping", local_vip);
                return;
            }
            received = network.receive() => match received {
                Ok(segment) => {
                    route(&network, &config, &local_vip, &connections, &accept_tx, segment).await;
                }
                Err(e) => {
                    error!("{}: transport receive failed: {}", local_vip, e);
                    return;
                }
            }
        }
    }
}

async fn route(
    network: &Arc<dyn SegmentNetwork>,
    config: &Arc<StackConfig>,
    local_vip: &Vip,
    connections: &ConnectionTable,
    accept_tx: &mpsc::UnboundedSender<Arc<ReliableConnection>>,
    segment: Segment,
) {
    let key = ConnectionKey {
        remote_vip: segment.payload.src_vip.clone(),
        remote_port: segment.payload.src_port,
        local_port: segment.payload.dst_port,
    };

    let existing = connections
        .lock()
        .expect("connection table poisoned")
        .get(&key)
        .cloned();
    if let Some(connection) = existing {
        connection.dispatch(segment).await;
        return;
    }

    // stray ACKs and FINs without a connection are leftovers of a torn-down
    // connection, not an open attempt
    if segment.is_ack || segment.payload.fin {
        debug!(
            "{}: discarding stray segment without a connection (from {}:{})",
            local_vip, key.remote_vip, key.remote_port
        );
        return;
    }

    // first data segment of a new inbound connection: implicit open
    let connection = ReliableConnection::new(
        network.clone(),
        config.clone(),
        VirtualAddress::new(local_vip.clone(), key.local_port),
        VirtualAddress::new(key.remote_vip.clone(), key.remote_port),
        Some(remover(connections.clone(), key.clone())),
    );
    connections
        .lock()
        .expect("connection table poisoned")
        .insert(key.clone(), connection.clone());

    debug!(
        "{}: new inbound connection from {}:{}",
        local_vip, key.remote_vip, key.remote_port
    );
    connection.dispatch(segment).await;
    let _ = accept_tx.send(connection);
}
