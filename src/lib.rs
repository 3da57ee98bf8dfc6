//! # mpquic-scheduler
//!
//! Path selection and acknowledgment tracking for multipath QUIC.
//!
//! A multipath connection stripes packets over several network paths. This
//! crate decides which path carries each packet, replays lost and handshake
//! packets, hedges new paths by duplicating onto them, assigns batches of
//! deadline-tagged packets with a linear program, and tracks on the receive
//! side when an ACK is due and which packets met their deadline.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Connection (packer, streams, socket)            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                    Send loop (Scheduler::send_packets)          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐   │
//! │  │ Path select  │  │ Batch / LP   │  │ Learned policy port  │   │
//! │  └──────────────┘  └──────────────┘  └──────────────────────┘   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │      PathSet (RwLock)  ·  Path telemetry  ·  Received ACK state  │
//! └─────────────────────────────────────────────────────────────────┘

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Millisecond conversions
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]       // Byte counts as f64 for the LP
#![allow(clippy::cast_possible_wrap)]        // Window arithmetic
#![allow(clippy::suboptimal_flops)]
#![allow(clippy::similar_names)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::redundant_pub_crate)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::struct_excessive_bools)]    // Boolean config fields are appropriate
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use

pub mod ackhandler;
pub mod config;
pub mod error;
pub mod multipath;
pub mod protocol;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::ackhandler::ReceivedAckState;
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::multipath::{
        BatchConfig, BatchStrategy, Path, PathSet, PathTelemetry, PolicyAgent, Scheduler,
        SchedulerConfig, SchedulingStrategy, Session,
    };
    pub use crate::protocol::{AckFrame, Frame, PackedPacket, SentPacket};
    pub use crate::types::*;
}
