//! Sorted range tracker for received packet numbers.

use crate::error::{Error, Result};
use crate::protocol::AckRange;
use crate::types::PacketNumber;

/// Upper bound on disjoint ranges tracked per path.
pub const MAX_TRACKED_RANGES: usize = 1000;

/// Received packet numbers as disjoint, non-adjacent ranges.
///
/// Stored ascending; reported descending (highest range first), the order
/// ACK frames carry them in.
#[derive(Debug, Clone)]
pub struct ReceivedPacketHistory {
    ranges: Vec<AckRange>,
    max_ranges: usize,
}

impl Default for ReceivedPacketHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceivedPacketHistory {
    pub fn new() -> Self {
        Self::with_limit(MAX_TRACKED_RANGES)
    }

    pub fn with_limit(max_ranges: usize) -> Self {
        Self {
            ranges: Vec::new(),
            max_ranges,
        }
    }

    /// Record a packet number. Returns `false` if it was already recorded.
    pub fn received_packet(&mut self, pn: PacketNumber) -> Result<bool> {
        let idx = self.ranges.partition_point(|r| r.last.0.saturating_add(1) < pn.0);

        let Some(range) = self.ranges.get(idx).copied() else {
            self.push_range(self.ranges.len(), pn)?;
            return Ok(true);
        };

        if range.contains(pn) {
            return Ok(false);
        }

        if range.last.0.checked_add(1) == Some(pn.0) {
            self.ranges[idx].last = pn;
            let merges = self
                .ranges
                .get(idx + 1)
                .is_some_and(|next| pn.0.checked_add(1) == Some(next.first.0));
            if merges {
                let next = self.ranges.remove(idx + 1);
                self.ranges[idx].last = next.last;
            }
        } else if pn.0.checked_add(1) == Some(range.first.0) {
            self.ranges[idx].first = pn;
        } else {
            self.push_range(idx, pn)?;
        }

        Ok(true)
    }

    fn push_range(&mut self, idx: usize, pn: PacketNumber) -> Result<()> {
        if self.ranges.len() >= self.max_ranges {
            return Err(Error::TooManyOutstandingRanges {
                limit: self.max_ranges,
            });
        }
        self.ranges.insert(idx, AckRange::single(pn));
        Ok(())
    }

    /// Forget every packet number at or below `pn`.
    pub fn delete_up_to(&mut self, pn: PacketNumber) {
        self.ranges.retain(|r| r.last > pn);
        if let Some(first) = self.ranges.first_mut() {
            if first.first <= pn {
                first.first = pn.next();
            }
        }
    }

    /// Highest contiguous range, if any packet is tracked.
    pub fn highest_range(&self) -> Option<AckRange> {
        self.ranges.last().copied()
    }

    /// All ranges, highest first.
    pub fn ack_ranges(&self) -> Vec<AckRange> {
        self.ranges.iter().rev().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }
}
