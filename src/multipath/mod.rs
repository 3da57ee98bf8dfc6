//! Multipath scheduling.
//!
//! This module implements the sender side of a multipath connection:
//! - Path state and the shared, locked path set
//! - Per-packet path selection strategies
//! - Deadline-aware batch assignment solved as a linear program
//! - The send loop and its retransmission and duplication bookkeeping
//! - The port to an external learned policy

pub mod agent;
mod batch;
pub mod linopt;
mod path;
mod path_set;
mod scheduler;
mod sender;

pub use agent::{PolicyAgent, StateVector, STATE_WIDTH};
pub use batch::{BatchAssignment, BatchConfig, BatchStrategy, PathCost};
pub use path::{Path, PathTelemetry, SendStatistics};
pub use path_set::{PathMap, PathSet};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerState, SchedulingStrategy};
pub use sender::{Retransmission, Session};
