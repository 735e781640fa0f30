//! The provided substrate: PDU structs with their bytes codec, and the noisy
//! channel send function. The wire contract here is fixed; the layers above
//! only consume it.

mod noisy;
mod pdu;

pub use noisy::send_over_noisy_channel;
pub use pdu::{Frame, Packet, Segment, SegmentPayload};
