//! Cooperative I/O reactor
//!
//! This crate provides a single-threaded event loop that multiplexes socket
//! readiness, delayed tasks and cross-thread event triggers, together with
//! the readiness backends it runs on and a non-blocking UDP endpoint.

pub mod condition;
pub mod delay;
pub mod handler;
pub mod lab;
pub mod poll;
pub mod reactor;
pub mod socket;
pub mod time;
pub mod trigger;

pub use condition::Condition;
pub use delay::{DelayQueue, TaskToken};
pub use handler::{HandlerSet, SocketNum};
pub use lab::{LabHandle, LabMultiplexer};
pub use poll::{Multiplexer, PollMultiplexer, ReadySet};
pub use reactor::{Reactor, ReactorConfig, ReactorError, StepOutcome};
pub use socket::{SocketError, UdpEndpoint};
pub use trigger::{TriggerError, TriggerHandle, TriggerId, TriggerRegistry, MAX_EVENT_TRIGGERS};
