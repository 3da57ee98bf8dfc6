//! Frames the scheduler and the ACK handler populate or inspect.
//!
//! Only the fields the scheduling core reads or writes are modelled; the
//! wire encoding belongs to the packer.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::types::{ByteCount, PacketNumber, PathId, StreamId};

/// An inclusive range of received packet numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckRange {
    pub first: PacketNumber,
    pub last: PacketNumber,
}

impl AckRange {
    pub fn new(first: PacketNumber, last: PacketNumber) -> Self {
        debug_assert!(first <= last);
        Self { first, last }
    }

    pub fn single(pn: PacketNumber) -> Self {
        Self { first: pn, last: pn }
    }

    pub fn contains(&self, pn: PacketNumber) -> bool {
        self.first <= pn && pn <= self.last
    }
}

/// ACK frame emitted by a path's receive side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckFrame {
    pub largest_acked: PacketNumber,
    pub lowest_acked: PacketNumber,
    /// Receipt time of `largest_acked`.
    pub packet_received_time: Instant,
    /// All received ranges, descending. Empty when there is no gap.
    pub ack_ranges: Vec<AckRange>,
    /// Packets that met their deadline since the previous ACK.
    pub num_meet_deadline: u16,
    /// Packets that carried a deadline since the previous ACK.
    pub num_has_deadline: u16,
    /// Scheduler diagnostic: packets currently waiting to be sent.
    pub cur_not_sent: u16,
    /// Scheduler diagnostic: current exploration weight.
    pub alpha: u16,
}

impl AckFrame {
    pub fn has_missing_ranges(&self) -> bool {
        !self.ack_ranges.is_empty()
    }

    /// Whether `pn` is acknowledged by this frame.
    pub fn acks_packet(&self, pn: PacketNumber) -> bool {
        if pn < self.lowest_acked || pn > self.largest_acked {
            return false;
        }
        if self.has_missing_ranges() {
            return self.ack_ranges.iter().any(|r| r.contains(pn));
        }
        true
    }
}

/// STOP_WAITING frame: the peer may forget packets below `least_unacked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopWaitingFrame {
    pub least_unacked: PacketNumber,
}

/// STREAM frame (payload omitted).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    pub stream_id: StreamId,
    pub offset: ByteCount,
    pub data_len: ByteCount,
    pub fin: bool,
}

/// WINDOW_UPDATE frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUpdateFrame {
    pub stream_id: StreamId,
    pub byte_offset: ByteCount,
}

/// CLOSE_PATH frame, carrying the receive-side summary of the closed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosePathFrame {
    pub path_id: PathId,
    pub largest_acked: PacketNumber,
    pub lowest_acked: PacketNumber,
    pub ack_ranges: Vec<AckRange>,
}

/// ADD_ADDRESS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddAddressFrame {
    pub addr: SocketAddr,
}

/// PATHS frame, announcing active paths and their RTTs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathsFrame {
    pub active_paths: Vec<PathId>,
    pub remote_rtts: Vec<Duration>,
}

/// Any frame that can end up in an outgoing packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Stream(StreamFrame),
    WindowUpdate(WindowUpdateFrame),
    Ack(AckFrame),
    StopWaiting(StopWaitingFrame),
    Ping,
    Blocked(StreamId),
    RstStream { stream_id: StreamId, byte_offset: ByteCount },
    ClosePath(ClosePathFrame),
    AddAddress(AddAddressFrame),
    Paths(PathsFrame),
}

impl Frame {
    /// ACK and STOP_WAITING frames are regenerated, never retransmitted.
    pub fn is_retransmittable(&self) -> bool {
        !matches!(self, Self::Ack(_) | Self::StopWaiting(_))
    }

    /// Whether this frame ends a stream.
    pub fn closes_stream(&self) -> bool {
        matches!(self, Self::Stream(f) if f.fin)
    }
}

impl From<AckFrame> for Frame {
    fn from(f: AckFrame) -> Self {
        Self::Ack(f)
    }
}

impl From<StopWaitingFrame> for Frame {
    fn from(f: StopWaitingFrame) -> Self {
        Self::StopWaiting(f)
    }
}

impl From<StreamFrame> for Frame {
    fn from(f: StreamFrame) -> Self {
        Self::Stream(f)
    }
}

impl From<WindowUpdateFrame> for Frame {
    fn from(f: WindowUpdateFrame) -> Self {
        Self::WindowUpdate(f)
    }
}

impl From<ClosePathFrame> for Frame {
    fn from(f: ClosePathFrame) -> Self {
        Self::ClosePath(f)
    }
}

impl From<AddAddressFrame> for Frame {
    fn from(f: AddAddressFrame) -> Self {
        Self::AddAddress(f)
    }
}

impl From<PathsFrame> for Frame {
    fn from(f: PathsFrame) -> Self {
        Self::Paths(f)
    }
}
