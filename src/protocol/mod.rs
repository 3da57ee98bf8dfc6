//! Frame and packet model shared by the scheduler and the ACK handler.

mod frame;
mod packet;

pub use frame::{
    AckFrame, AckRange, AddAddressFrame, ClosePathFrame, Frame, PathsFrame, StopWaitingFrame,
    StreamFrame, WindowUpdateFrame,
};
pub use packet::{PackedPacket, SentPacket};
