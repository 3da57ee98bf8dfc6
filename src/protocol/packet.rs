//! Outgoing packets as seen by the scheduler.

use std::time::Instant;

use super::Frame;
use crate::types::{ByteCount, EncryptionLevel, PacketNumber};

/// A packet built by the packer, ready to hand to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedPacket {
    pub number: PacketNumber,
    pub frames: Vec<Frame>,
    /// Encoded length on the wire.
    pub length: ByteCount,
    pub encryption_level: EncryptionLevel,
    /// Absolute delivery deadline, if the application attached one.
    pub deadline: Option<Instant>,
}

impl PackedPacket {
    /// Whether any stream frame in this packet carries FIN.
    pub fn closes_stream(&self) -> bool {
        self.frames.iter().any(Frame::closes_stream)
    }

    /// Bookkeeping record kept after a successful send.
    pub fn to_sent_packet(&self) -> SentPacket {
        SentPacket {
            packet_number: self.number,
            frames: self.frames.clone(),
            length: self.length,
            encryption_level: self.encryption_level,
            deadline: self.deadline,
        }
    }
}

/// A packet tracked by a path's sent-packet bookkeeping.
///
/// Lives until it is acknowledged or abandoned; may be re-queued for
/// retransmission or duplicated onto another path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPacket {
    pub packet_number: PacketNumber,
    pub frames: Vec<Frame>,
    pub length: ByteCount,
    pub encryption_level: EncryptionLevel,
    pub deadline: Option<Instant>,
}

impl SentPacket {
    /// Frames that must be resent if this packet is lost.
    pub fn frames_for_retransmission(&self) -> Vec<Frame> {
        self.frames
            .iter()
            .filter(|f| f.is_retransmittable())
            .cloned()
            .collect()
    }

    pub fn is_handshake(&self) -> bool {
        self.encryption_level.is_handshake()
    }
}
