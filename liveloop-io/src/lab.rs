//! Deterministic multiplexer for tests
//!
//! [`LabMultiplexer`] never touches the operating system. Readiness is
//! injected through a [`LabHandle`] and stays set until cleared, like a
//! level-triggered descriptor. Each wait records the requested timeout and
//! interest list, returns immediately, and can be made to fail on demand.

use crate::condition::Condition;
use crate::handler::SocketNum;
use crate::poll::{Multiplexer, ReadySet};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct LabState {
    ready: BTreeMap<SocketNum, Condition>,
    failures: VecDeque<io::Error>,
    timeouts: Vec<Duration>,
    last_interests: Vec<(SocketNum, Condition)>,
}

/// Multiplexer driven by injected readiness
#[derive(Debug, Default)]
pub struct LabMultiplexer {
    state: Arc<Mutex<LabState>>,
}

impl LabMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for injecting readiness after the multiplexer is moved into a
    /// reactor
    pub fn handle(&self) -> LabHandle {
        LabHandle {
            state: self.state.clone(),
        }
    }
}

impl Multiplexer for LabMultiplexer {
    fn wait(
        &mut self,
        interests: &[(SocketNum, Condition)],
        timeout: Duration,
        ready: &mut ReadySet,
    ) -> io::Result<()> {
        let mut state = self.state.lock();
        state.timeouts.push(timeout);
        state.last_interests.clear();
        state.last_interests.extend_from_slice(interests);

        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        for (socket, requested) in interests {
            if let Some(observed) = state.ready.get(socket) {
                ready.insert(*socket, *observed & *requested);
            }
        }
        Ok(())
    }
}

/// Injection side of a [`LabMultiplexer`]
#[derive(Debug, Clone)]
pub struct LabHandle {
    state: Arc<Mutex<LabState>>,
}

impl LabHandle {
    /// Report `conditions` on `socket` until changed
    pub fn set_ready(&self, socket: SocketNum, conditions: Condition) {
        let mut state = self.state.lock();
        if conditions.is_empty() {
            state.ready.remove(&socket);
        } else {
            state.ready.insert(socket, conditions);
        }
    }

    /// Stop reporting anything on `socket`
    pub fn clear_ready(&self, socket: SocketNum) {
        self.state.lock().ready.remove(&socket);
    }

    /// Make the next wait fail with `err`
    pub fn fail_next(&self, err: io::Error) {
        self.state.lock().failures.push_back(err);
    }

    /// Timeouts passed to every wait so far
    pub fn timeouts(&self) -> Vec<Duration> {
        self.state.lock().timeouts.clone()
    }

    /// Number of waits performed
    pub fn wait_count(&self) -> usize {
        self.state.lock().timeouts.len()
    }

    /// Interest list passed to the most recent wait
    pub fn last_interests(&self) -> Vec<(SocketNum, Condition)> {
        self.state.lock().last_interests.clone()
    }
}
