//! A didactic five-layer network stack built on top of a lossy datagram
//! substrate, terminating in a multi-user chat application.
//!
//! Four virtual nodes share the loopback interface, distinguished by UDP
//! port: two chat clients, one chat server and one router. Every datagram
//! travels through a noisy channel that drops, corrupts and delays frames,
//! and each layer above it is designed to tolerate exactly the faults the
//! layers below cannot hide.
//!
//! ## Layering
//!
//! * **Physical** ([`phys::SimulatedUdp`]): one bound UDP socket per node;
//!   sends frame bytes through the noisy channel, blocking receive.
//! * **Link** ([`link::SimpleLink`]): wraps packets in frames, resolves the
//!   next-hop MAC through a static ARP table, validates the FCS on receive
//!   and silently drops anything that fails the check or is addressed to a
//!   different MAC.
//! * **Network** ([`network::HostNetwork`] / [`network::RouterNetwork`]):
//!   hosts originate packets with an initial TTL and deliver only packets
//!   addressed to their own virtual IP; the router decrements the TTL and
//!   forwards, and never delivers anything upward. The two variants share
//!   no code.
//! * **Transport** ([`transport::ReliableTransport`] /
//!   [`transport::ReliableConnection`]): Stop-and-Wait connections with a
//!   one-bit alternating sequence number, MSS fragmentation and reassembly,
//!   FIN-based teardown, and a demultiplexer that routes inbound segments
//!   to their logical connection by (remote VIP, remote port, local port).
//! * **Application** ([`chat`]): chat server with roster, relay and graceful
//!   shutdown; chat client bridging to a pluggable UI; a priority-scheduled
//!   sender that keeps short control and text messages ahead of bulk file
//!   transfers.
//!
//! ## Wire format
//!
//! Datagrams are JSON-encoded [`substrate::Frame`]s. The frame carries a
//! packet, the packet carries a segment, and the segment payload carries the
//! transport keys (`src_vip`, `src_port`, `dst_port`), the Base64 `data`
//! chunk and the `more` / `fin` flags. Application payloads are JSON message
//! records (`text` / `file` / `system`), reassembled from one contiguous
//! chain of segments ending in `more = false`.

pub mod addr;
pub mod chat;
pub mod config;
pub mod link;
pub mod network;
pub mod phys;
pub mod substrate;
pub mod topology;
pub mod transport;
