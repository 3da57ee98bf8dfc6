//! Individual path state.
//!
//! A [`Path`] couples the telemetry reported by the path's congestion
//! controller and RTT estimator with the bits of sent-side bookkeeping the
//! scheduler drives directly: the retransmission queue, stop-waiting
//! generation and the receive-side ACK state.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use super::SchedulerConfig;
use crate::ackhandler::{ReceiveStatistics, ReceivedAckState};
use crate::error::Result;
use crate::protocol::{AckFrame, SentPacket, StopWaitingFrame};
use crate::types::{packets_in_window, ByteCount, PacketNumber, PathId, Version, ACK_SEND_DELAY};

/// Snapshot of what the path's congestion controller and RTT estimator report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathTelemetry {
    /// Congestion controller allows another packet.
    pub sending_allowed: bool,
    /// Smoothed RTT; zero while unmeasured.
    pub smoothed_rtt: Duration,
    pub congestion_window: ByteCount,
    pub bytes_in_flight: ByteCount,
    /// Too many non-retransmittable packets went out; the next one needs a PING.
    pub retransmittable_due: bool,
    /// Lowest packet number not yet acknowledged by the peer.
    pub least_unacked: PacketNumber,
    /// Exploration multiplier applied to the one-way delay estimate.
    pub alpha: f64,
}

impl Default for PathTelemetry {
    fn default() -> Self {
        Self {
            sending_allowed: true,
            smoothed_rtt: Duration::ZERO,
            congestion_window: 32 * crate::types::DEFAULT_TCP_MSS,
            bytes_in_flight: 0,
            retransmittable_due: false,
            least_unacked: PacketNumber(1),
            alpha: 1.0,
        }
    }
}

impl PathTelemetry {
    /// Congestion window minus bytes in flight; negative when overcommitted.
    pub fn spare_window(&self) -> i64 {
        self.congestion_window as i64 - self.bytes_in_flight as i64
    }

    /// Remaining congestion window in whole packets.
    pub fn remaining_packets(&self) -> u64 {
        packets_in_window(self.congestion_window, self.bytes_in_flight)
    }

    /// Fraction of the congestion window in use.
    pub fn utilization(&self) -> f64 {
        if self.congestion_window == 0 {
            return 0.0;
        }
        self.bytes_in_flight as f64 / self.congestion_window as f64
    }

    pub fn has_rtt_sample(&self) -> bool {
        !self.smoothed_rtt.is_zero()
    }
}

/// Send-side counters of a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendStatistics {
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub losses: u64,
    pub bytes_sent: ByteCount,
}

#[derive(Debug, Default)]
struct SendCounters {
    packets_sent: AtomicU64,
    retransmissions: AtomicU64,
    losses: AtomicU64,
    bytes_sent: AtomicU64,
}

/// One network path of a multipath connection.
pub struct Path {
    id: PathId,
    telemetry: RwLock<PathTelemetry>,
    potentially_failed: AtomicBool,
    /// Least unacked value last published to the packer.
    least_unacked: AtomicU64,
    counters: SendCounters,
    retransmissions: Mutex<VecDeque<SentPacket>>,
    last_stop_waiting: Mutex<Option<PacketNumber>>,
    ack_state: Mutex<ReceivedAckState>,
}

impl Path {
    /// Create a new path with default telemetry.
    pub fn new(id: PathId) -> Self {
        Self::with_telemetry(id, PathTelemetry::default())
    }

    pub fn with_telemetry(id: PathId, telemetry: PathTelemetry) -> Self {
        Self::with_ack_state(
            id,
            telemetry,
            ReceivedAckState::with_ack_delay(Version::default(), ACK_SEND_DELAY),
        )
    }

    /// Create a path whose ACK state uses the configured ACK delay.
    pub fn configured(id: PathId, telemetry: PathTelemetry, config: &SchedulerConfig, version: Version) -> Self {
        Self::with_ack_state(id, telemetry, config.ack_state(version))
    }

    pub fn with_ack_state(id: PathId, telemetry: PathTelemetry, ack_state: ReceivedAckState) -> Self {
        Self {
            id,
            telemetry: RwLock::new(telemetry),
            potentially_failed: AtomicBool::new(false),
            least_unacked: AtomicU64::new(telemetry.least_unacked.0),
            counters: SendCounters::default(),
            retransmissions: Mutex::new(VecDeque::new()),
            last_stop_waiting: Mutex::new(None),
            ack_state: Mutex::new(ack_state),
        }
    }

    /// Get the path ID.
    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn is_initial(&self) -> bool {
        self.id.is_initial()
    }

    // Telemetry

    pub fn telemetry(&self) -> PathTelemetry {
        *self.telemetry.read()
    }

    pub fn set_telemetry(&self, telemetry: PathTelemetry) {
        *self.telemetry.write() = telemetry;
    }

    /// Update telemetry in place.
    pub fn update_telemetry<F>(&self, f: F)
    where
        F: FnOnce(&mut PathTelemetry),
    {
        f(&mut self.telemetry.write());
    }

    pub fn sending_allowed(&self) -> bool {
        self.telemetry.read().sending_allowed
    }

    pub fn smoothed_rtt(&self) -> Duration {
        self.telemetry.read().smoothed_rtt
    }

    pub fn congestion_window(&self) -> ByteCount {
        self.telemetry.read().congestion_window
    }

    pub fn bytes_in_flight(&self) -> ByteCount {
        self.telemetry.read().bytes_in_flight
    }

    pub fn should_send_retransmittable_packet(&self) -> bool {
        self.telemetry.read().retransmittable_due
    }

    pub fn alpha(&self) -> f64 {
        self.telemetry.read().alpha
    }

    pub fn potentially_failed(&self) -> bool {
        self.potentially_failed.load(Ordering::Relaxed)
    }

    pub fn set_potentially_failed(&self, failed: bool) {
        self.potentially_failed.store(failed, Ordering::Relaxed);
    }

    // Send-side statistics, fed by the sender

    pub fn record_sent(&self, bytes: ByteCount) {
        self.counters.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_loss(&self) {
        self.counters.losses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn statistics(&self) -> SendStatistics {
        SendStatistics {
            packets_sent: self.counters.packets_sent.load(Ordering::Relaxed),
            retransmissions: self.counters.retransmissions.load(Ordering::Relaxed),
            losses: self.counters.losses.load(Ordering::Relaxed),
            bytes_sent: self.counters.bytes_sent.load(Ordering::Relaxed),
        }
    }

    // Retransmissions

    /// Queue a lost packet for retransmission.
    pub fn queue_retransmission(&self, packet: SentPacket) {
        self.counters.retransmissions.fetch_add(1, Ordering::Relaxed);
        self.retransmissions.lock().push_back(packet);
    }

    /// Queue a copy of a packet that went out on an unproven path.
    ///
    /// Not counted as a retransmission.
    pub fn duplicate_packet(&self, packet: SentPacket) {
        tracing::trace!(path = %self.id, pn = %packet.packet_number, "Duplicating packet");
        self.retransmissions.lock().push_back(packet);
    }

    pub fn dequeue_retransmission(&self) -> Option<SentPacket> {
        self.retransmissions.lock().pop_front()
    }

    pub fn pending_retransmissions(&self) -> usize {
        self.retransmissions.lock().len()
    }

    // Stop waiting

    /// Publish the sender's least unacked value to the packer.
    pub fn refresh_least_unacked(&self) {
        let least = self.telemetry.read().least_unacked;
        self.least_unacked.store(least.0, Ordering::Relaxed);
    }

    pub fn least_unacked(&self) -> PacketNumber {
        PacketNumber(self.least_unacked.load(Ordering::Relaxed))
    }

    /// STOP_WAITING frame, if forced or if least unacked moved since the last one.
    pub fn stop_waiting_frame(&self, force: bool) -> Option<StopWaitingFrame> {
        let least_unacked = self.least_unacked();
        let mut last = self.last_stop_waiting.lock();
        if !force && *last == Some(least_unacked) {
            return None;
        }
        *last = Some(least_unacked);
        Some(StopWaitingFrame { least_unacked })
    }

    // Receive side

    pub fn received_packet(
        &self,
        packet_number: PacketNumber,
        should_instigate_ack: bool,
        now: Instant,
    ) -> Result<()> {
        self.ack_state
            .lock()
            .received_packet(packet_number, should_instigate_ack, now)
    }

    pub fn ack_frame(&self, now: Instant) -> Option<AckFrame> {
        self.ack_state.lock().ack_frame(now)
    }

    pub fn receive_statistics(&self) -> ReceiveStatistics {
        self.ack_state.lock().statistics()
    }

    /// Run `f` with exclusive access to the receive-side ACK state.
    pub fn ack_state_mut<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ReceivedAckState) -> R,
    {
        f(&mut self.ack_state.lock())
    }
}

// Abbreviated: queues and ACK state are not useful in logs.
#[allow(clippy::missing_fields_in_debug)]
impl std::fmt::Debug for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let telemetry = self.telemetry();
        f.debug_struct("Path")
            .field("id", &self.id)
            .field("sending_allowed", &telemetry.sending_allowed)
            .field("srtt", &telemetry.smoothed_rtt)
            .field("cwnd", &telemetry.congestion_window)
            .field("in_flight", &telemetry.bytes_in_flight)
            .field("potentially_failed", &self.potentially_failed())
            .finish()
    }
}
