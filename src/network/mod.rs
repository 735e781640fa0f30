//! The network layer. Hosts and the router are deliberately separate types
//! sharing no code: a host originates and delivers, the router only
//! forwards.

mod host;
mod router;

pub use host::HostNetwork;
pub use router::{RouterNetwork, RouterStats};

use async_trait::async_trait;

use crate::addr::Vip;
use crate::substrate::Segment;

/// The seam between a host's network layer and the reliable transport.
///
/// Only [`HostNetwork`] implements this in production; the router never
/// delivers segments upward and therefore has no place behind this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SegmentNetwork: Send + Sync + 'static {
    fn local_vip(&self) -> &Vip;

    /// Originates a packet carrying the segment toward `dst_vip`.
    async fn send(&self, segment: Segment, dst_vip: &Vip) -> anyhow::Result<()>;

    /// Blocks until a segment addressed to this host arrives.
    async fn receive(&self) -> anyhow::Result<Segment>;
}
