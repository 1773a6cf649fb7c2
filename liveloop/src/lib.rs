//! liveloop - cooperative media I/O
//!
//! High-level entry point re-exporting the event loop and the RTP reception
//! statistics engine.

pub use liveloop_io as io;
pub use liveloop_rtp as rtp;

// Re-export commonly used types
pub use io::{
    Condition, Reactor, ReactorConfig, ReactorError, StepOutcome, TaskToken, TriggerHandle,
    TriggerId,
};
pub use rtp::{
    IncomingPacket, ReceptionConfig, ReceptionStats, ReceptionStatsRegistry, SeqNum, SequencePolicy,
    WallTime,
};
