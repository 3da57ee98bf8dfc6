//! Receive-side acknowledgment tracking.

mod history;
mod received;

pub use history::{ReceivedPacketHistory, MAX_TRACKED_RANGES};
pub use received::{
    AckTrigger, DeadlineOutcome, ReceiveStatistics, ReceivedAckState, DEFAULT_ALPHA,
};
