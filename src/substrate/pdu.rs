use crc::Crc;
use serde::{Deserialize, Serialize};

use crate::addr::{Mac, Port, Vip};

const FCS: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// The keyed payload carried by every segment.
///
/// The transport stamps `src_vip`, `src_port` and `dst_port` into every
/// payload so the receiving demultiplexer can reconstruct the connection key
/// from the segment alone. `data` is a Base64 chunk; absence of `more` means
/// the chain continues, absence of `fin` means no teardown.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct SegmentPayload {
    pub src_vip: Vip,
    pub src_port: Port,
    pub dst_port: Port,
    #[serde(default)]
    pub data: String,
    #[serde(default = "default_more")]
    pub more: bool,
    #[serde(default)]
    pub fin: bool,
}

fn default_more() -> bool {
    true
}

/// Transport PDU: one unit of the Stop-and-Wait exchange. The sequence
/// number alternates in {0, 1}.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub seq_num: u8,
    pub is_ack: bool,
    pub payload: SegmentPayload,
}

/// Network PDU: addressed by virtual IPs and carrying the hop budget.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub src_vip: Vip,
    pub dst_vip: Vip,
    pub ttl: u8,
    pub data: Segment,
}

impl Packet {
    pub fn new(src_vip: Vip, dst_vip: Vip, ttl: u8, data: Segment) -> Packet {
        Packet {
            src_vip,
            dst_vip,
            ttl,
            data,
        }
    }
}

/// Link PDU: the unit actually put on the wire, MAC-addressed and protected
/// by a frame check sequence over both MACs and the serialized packet.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub src_mac: Mac,
    pub dst_mac: Mac,
    pub data: Packet,
    pub fcs: u32,
}

impl Frame {
    pub fn new(src_mac: Mac, dst_mac: Mac, data: Packet) -> anyhow::Result<Frame> {
        let fcs = compute_fcs(&src_mac, &dst_mac, &data)?;
        Ok(Frame {
            src_mac,
            dst_mac,
            data,
            fcs,
        })
    }

    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserializes a frame and re-checks its FCS.
    ///
    /// Returns the frame together with the integrity verdict; bytes that do
    /// not even parse are an error (the caller treats both the same way:
    /// drop).
    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<(Frame, bool)> {
        let frame: Frame = serde_json::from_slice(bytes)?;
        let expected = compute_fcs(&frame.src_mac, &frame.dst_mac, &frame.data)?;
        let intact = frame.fcs == expected;
        Ok((frame, intact))
    }
}

fn compute_fcs(src_mac: &Mac, dst_mac: &Mac, data: &Packet) -> anyhow::Result<u32> {
    let mut digest = FCS.digest();
    digest.update(src_mac.0.as_bytes());
    digest.update(dst_mac.0.as_bytes());
    digest.update(&serde_json::to_vec(data)?);
    Ok(digest.finalize())
}
