//! RTP Reception Statistics
//!
//! This crate implements the receiver side of RFC 3550 bookkeeping: 16-bit
//! sequence arithmetic, NTP/wall-clock conversion, per-source loss, gap and
//! jitter statistics with timestamp-to-presentation-time mapping, and a
//! registry holding those statistics for every source of a session.

pub mod clock;
pub mod reception;
pub mod registry;
pub mod sequence;

pub use clock::WallTime;
pub use reception::{
    IncomingPacket, PacketTiming, ReceptionConfig, ReceptionStats, SenderReportInfo,
    DEFAULT_MAX_DROPOUT,
};
pub use registry::ReceptionStatsRegistry;
pub use sequence::{SeqNum, SequencePolicy, SequenceWindow};
