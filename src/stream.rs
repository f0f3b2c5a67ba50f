use crate::packet::{Address, Packet, SdpMedia};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Rtp,
    Rtcp,
}

/// A media stream announced in SDP or observed on the wire.
///
/// The destination is known at creation time (from the SDP media line);
/// the source stays unbound until the first packet is seen, which is also
/// when the payload format is fixed.
#[derive(Debug, Clone)]
pub struct Stream {
    pub kind: StreamKind,
    /// SDP media descriptor that announced this stream.
    pub media: Arc<SdpMedia>,
    /// Index of the announcing message in the owning call.
    pub msg: usize,
    pub src: Option<Address>,
    pub dst: Address,
    pub fmtcode: Option<u8>,
    pub packet_count: usize,
    pub byte_count: usize,
    pub last_packet: Option<DateTime<Utc>>,
}

impl Stream {
    pub fn new(kind: StreamKind, media: Arc<SdpMedia>, msg: usize, dst: Address) -> Self {
        Self {
            kind,
            media,
            msg,
            src: None,
            dst,
            fmtcode: None,
            packet_count: 0,
            byte_count: 0,
            last_packet: None,
        }
    }

    /// A stream is complete once its source has been bound by an observed
    /// packet.
    pub fn is_complete(&self) -> bool {
        self.src.is_some()
    }

    pub fn complete(&mut self, src: Address) {
        self.src = Some(src);
    }

    pub fn set_format(&mut self, fmtcode: u8) {
        self.fmtcode = Some(fmtcode);
    }

    pub fn add_packet(&mut self, packet: &Packet) {
        self.packet_count += 1;
        self.byte_count += packet.payload.len();
        self.last_packet = Some(packet.timestamp);
    }
}
