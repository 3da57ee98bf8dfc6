//! Core types shared by the scheduler and the ACK handler.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Byte count (congestion windows, bytes in flight, packet lengths).
pub type ByteCount = u64;

/// Maximum size of a packet, used to express windows in packets.
pub const MAX_PACKET_SIZE: ByteCount = 1350;

/// Default TCP MSS, used to normalize congestion windows for the learned policy.
pub const DEFAULT_TCP_MSS: ByteCount = 1460;

/// Default delay before an ACK is sent when no hard trigger fires.
pub const ACK_SEND_DELAY: Duration = Duration::from_millis(25);

/// Identifier of a path within a connection.
///
/// Path 0 is the initial path; it carries handshake traffic and is
/// reserved once additional paths exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathId(pub u8);

impl PathId {
    /// The initial (default) path.
    pub const INITIAL: Self = Self(0);

    pub fn new(id: u8) -> Self {
        Self(id)
    }

    pub fn is_initial(self) -> bool {
        self == Self::INITIAL
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u8> for PathId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

/// Packet number. Strictly increasing per path, never 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PacketNumber(pub u64);

impl PacketNumber {
    pub const ZERO: Self = Self(0);

    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn prev(self) -> Self {
        Self(self.0.saturating_sub(1))
    }
}

impl fmt::Display for PacketNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for PacketNumber {
    fn from(n: u64) -> Self {
        Self(n)
    }
}

/// Stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Connection identifier, as reported to the learned-policy agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Encryption level a packet was sent at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncryptionLevel {
    /// Handshake data, before any key is negotiated.
    Unencrypted,
    /// Initial keys, handshake not yet confirmed.
    Secure,
    /// Fully protected application data.
    #[default]
    ForwardSecure,
}

impl EncryptionLevel {
    /// Whether packets at this level belong to the handshake.
    pub fn is_handshake(self) -> bool {
        !matches!(self, Self::ForwardSecure)
    }
}

/// Protocol version negotiated for the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(pub u32);

impl Version {
    pub const V37: Self = Self(37);
    pub const V38: Self = Self(38);
    pub const V39: Self = Self(39);

    /// Versions before 39 force an ACK every [`MAX_PACKETS_BEFORE_ACK`] packets.
    pub fn forces_periodic_ack(self) -> bool {
        self < Self::V39
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::V39
    }
}

/// Packets received before an ACK is forced on pre-39 versions.
pub const MAX_PACKETS_BEFORE_ACK: usize = 20;

/// Retransmittable packets received before an ACK is sent immediately.
pub const RETRANSMITTABLE_PACKETS_BEFORE_ACK: usize = 2;

/// Remaining congestion window of a path, in whole packets.
pub fn packets_in_window(cwnd: ByteCount, in_flight: ByteCount) -> u64 {
    cwnd.saturating_sub(in_flight) / MAX_PACKET_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_path() {
        assert!(PathId::INITIAL.is_initial());
        assert!(!PathId(1).is_initial());
    }

    #[test]
    fn test_packets_in_window_truncates() {
        assert_eq!(packets_in_window(MAX_PACKET_SIZE * 3 - 1, 0), 2);
        assert_eq!(packets_in_window(MAX_PACKET_SIZE * 3, MAX_PACKET_SIZE), 2);
        assert_eq!(packets_in_window(100, 200), 0);
    }

    #[test]
    fn test_version_periodic_ack() {
        assert!(Version::V37.forces_periodic_ack());
        assert!(Version::V38.forces_periodic_ack());
        assert!(!Version::V39.forces_periodic_ack());
    }

    #[test]
    fn test_handshake_levels() {
        assert!(EncryptionLevel::Unencrypted.is_handshake());
        assert!(EncryptionLevel::Secure.is_handshake());
        assert!(!EncryptionLevel::ForwardSecure.is_handshake());
    }
}
