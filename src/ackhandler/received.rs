//! Per-path receive-side ACK state machine.
//!
//! Decides when an ACK is due, builds it from the received-range history,
//! and accounts for per-packet delivery deadlines.
//!
//! Two drivers govern the next ACK: a hard `ack_queued` trigger and a soft
//! alarm. Queuing always disarms the alarm, so at most one of them is active.

use std::time::{Duration, Instant};

use super::ReceivedPacketHistory;
use crate::error::{Error, Result};
use crate::protocol::{AckFrame, ClosePathFrame};
use crate::types::{
    PacketNumber, PathId, Version, ACK_SEND_DELAY, MAX_PACKETS_BEFORE_ACK,
    RETRANSMITTABLE_PACKETS_BEFORE_ACK,
};

/// Default exploration weight reported in ACKs.
pub const DEFAULT_ALPHA: u16 = 10;

/// What currently governs the next ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTrigger {
    /// No ACK is due.
    Idle,
    /// An ACK must go out with the next packet.
    Queued,
    /// An ACK is due once the alarm fires.
    Alarm(Instant),
}

/// Result of comparing a packet's deadline with its receipt time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineOutcome {
    NoDeadline,
    Met,
    Missed,
}

/// Lifetime receive statistics of a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStatistics {
    /// Packets accepted (not duplicate, above the lower limit).
    pub packets: u64,
    /// Packets that carried a deadline.
    pub with_deadline: u64,
    /// Packets received before their deadline.
    pub deadline_met: u64,
    /// Packets received at or after their deadline.
    pub deadline_missed: u64,
}

/// Receive-side ACK state of one path.
#[derive(Debug)]
pub struct ReceivedAckState {
    largest_observed: PacketNumber,
    largest_observed_received_time: Option<Instant>,
    lower_limit: PacketNumber,

    history: ReceivedPacketHistory,
    ack_send_delay: Duration,
    version: Version,

    packets_received_since_last_ack: usize,
    retransmittable_packets_received_since_last_ack: usize,
    ack_queued: bool,
    ack_alarm: Option<Instant>,
    last_ack: Option<AckFrame>,

    stats: ReceiveStatistics,
    met_since_last_ack: u16,
    missed_since_last_ack: u16,

    cur_not_sent: u16,
    alpha: u16,
}

impl Default for ReceivedAckState {
    fn default() -> Self {
        Self::new(Version::default())
    }
}

impl ReceivedAckState {
    pub fn new(version: Version) -> Self {
        Self::with_ack_delay(version, ACK_SEND_DELAY)
    }

    pub fn with_ack_delay(version: Version, ack_send_delay: Duration) -> Self {
        Self {
            largest_observed: PacketNumber::ZERO,
            largest_observed_received_time: None,
            lower_limit: PacketNumber::ZERO,
            history: ReceivedPacketHistory::new(),
            ack_send_delay,
            version,
            packets_received_since_last_ack: 0,
            retransmittable_packets_received_since_last_ack: 0,
            ack_queued: false,
            ack_alarm: None,
            last_ack: None,
            stats: ReceiveStatistics::default(),
            met_since_last_ack: 0,
            missed_since_last_ack: 0,
            cur_not_sent: 0,
            alpha: DEFAULT_ALPHA,
        }
    }

    /// Record a received packet.
    ///
    /// Packets at or below the lower limit, and duplicates, leave the state
    /// untouched.
    pub fn received_packet(
        &mut self,
        packet_number: PacketNumber,
        should_instigate_ack: bool,
        now: Instant,
    ) -> Result<()> {
        if packet_number == PacketNumber::ZERO {
            return Err(Error::InvalidPacketNumber(packet_number));
        }

        if packet_number <= self.lower_limit {
            return Ok(());
        }

        if !self.history.received_packet(packet_number)? {
            return Ok(());
        }

        self.stats.packets += 1;

        if packet_number > self.largest_observed {
            self.largest_observed = packet_number;
            self.largest_observed_received_time = Some(now);
        }

        self.maybe_queue_ack(packet_number, should_instigate_ack, now);
        Ok(())
    }

    fn maybe_queue_ack(&mut self, packet_number: PacketNumber, should_instigate_ack: bool, now: Instant) {
        self.packets_received_since_last_ack += 1;
        if should_instigate_ack {
            self.retransmittable_packets_received_since_last_ack += 1;
        }

        match &self.last_ack {
            // Always ack the first packet.
            None => self.ack_queued = true,
            Some(last_ack) => {
                // Below the last largest acked: it was reported missing.
                if packet_number < last_ack.largest_acked {
                    self.ack_queued = true;
                }
                // A new range opened above what the peer has seen.
                if self
                    .history
                    .highest_range()
                    .is_some_and(|r| r.first > last_ack.largest_acked)
                {
                    self.ack_queued = true;
                }
            }
        }

        if self.version.forces_periodic_ack()
            && self.packets_received_since_last_ack >= MAX_PACKETS_BEFORE_ACK
        {
            self.ack_queued = true;
        }

        if !self.ack_queued && should_instigate_ack {
            if self.retransmittable_packets_received_since_last_ack
                >= RETRANSMITTABLE_PACKETS_BEFORE_ACK
            {
                self.ack_queued = true;
            } else if self.ack_alarm.is_none() {
                self.ack_alarm = Some(now + self.ack_send_delay);
            }
        }

        if self.ack_queued {
            self.ack_alarm = None;
        }
    }

    /// Build the ACK frame if one is due, resetting the since-last-ack window.
    pub fn ack_frame(&mut self, now: Instant) -> Option<AckFrame> {
        let alarm_expired = self.ack_alarm.is_some_and(|alarm| alarm <= now);
        if !self.ack_queued && !alarm_expired {
            return None;
        }

        let ranges = self.history.ack_ranges();
        let Some(lowest) = ranges.last() else {
            self.ack_queued = false;
            self.ack_alarm = None;
            return None;
        };

        let ack = AckFrame {
            largest_acked: self.largest_observed,
            lowest_acked: lowest.first,
            packet_received_time: self.largest_observed_received_time.unwrap_or(now),
            ack_ranges: if ranges.len() > 1 { ranges } else { Vec::new() },
            num_meet_deadline: self.met_since_last_ack,
            num_has_deadline: self.met_since_last_ack.saturating_add(self.missed_since_last_ack),
            cur_not_sent: self.cur_not_sent,
            alpha: self.alpha,
        };

        self.last_ack = Some(ack.clone());
        self.ack_alarm = None;
        self.ack_queued = false;
        self.packets_received_since_last_ack = 0;
        self.retransmittable_packets_received_since_last_ack = 0;
        self.met_since_last_ack = 0;
        self.missed_since_last_ack = 0;

        Some(ack)
    }

    /// Range summary for a CLOSE_PATH frame. `None` before any packet arrived.
    pub fn close_path_frame(&self, path_id: PathId) -> Option<ClosePathFrame> {
        let ranges = self.history.ack_ranges();
        let lowest = ranges.last()?.first;
        Some(ClosePathFrame {
            path_id,
            largest_acked: self.largest_observed,
            lowest_acked: lowest,
            ack_ranges: if ranges.len() > 1 { ranges } else { Vec::new() },
        })
    }

    /// Account for a received packet's delivery deadline.
    pub fn record_deadline_outcome(
        &mut self,
        deadline: Option<Instant>,
        received_at: Instant,
    ) -> DeadlineOutcome {
        let Some(deadline) = deadline else {
            return DeadlineOutcome::NoDeadline;
        };

        self.stats.with_deadline += 1;
        if deadline > received_at {
            self.stats.deadline_met += 1;
            self.met_since_last_ack = self.met_since_last_ack.saturating_add(1);
            DeadlineOutcome::Met
        } else {
            self.stats.deadline_missed += 1;
            self.missed_since_last_ack = self.missed_since_last_ack.saturating_add(1);
            DeadlineOutcome::Missed
        }
    }

    /// Stop acknowledging packets at or below `limit`.
    pub fn advance_lower_limit(&mut self, limit: PacketNumber) {
        if limit <= self.lower_limit {
            return;
        }
        self.lower_limit = limit;
        self.history.delete_up_to(limit);
    }

    pub fn update_cur_not_sent(&mut self, cur_not_sent: u16) {
        self.cur_not_sent = cur_not_sent;
    }

    /// Zero keeps the previous weight.
    pub fn update_alpha(&mut self, alpha: u16) {
        if alpha != 0 {
            self.alpha = alpha;
        }
    }

    pub fn trigger(&self) -> AckTrigger {
        match (self.ack_queued, self.ack_alarm) {
            (true, _) => AckTrigger::Queued,
            (false, Some(alarm)) => AckTrigger::Alarm(alarm),
            (false, None) => AckTrigger::Idle,
        }
    }

    pub fn alarm_timeout(&self) -> Option<Instant> {
        self.ack_alarm
    }

    pub fn lower_limit(&self) -> PacketNumber {
        self.lower_limit
    }

    pub fn largest_observed(&self) -> PacketNumber {
        self.largest_observed
    }

    pub fn last_ack(&self) -> Option<&AckFrame> {
        self.last_ack.as_ref()
    }

    pub fn statistics(&self) -> ReceiveStatistics {
        self.stats
    }
}
