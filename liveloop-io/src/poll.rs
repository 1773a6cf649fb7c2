//! Readiness multiplexing
//!
//! The reactor asks a [`Multiplexer`] to wait until at least one registered
//! socket satisfies one of its requested conditions, or until a timeout. The
//! default backend is `poll(2)`, rebuilt from the handler registry on every
//! wait, which keeps readiness level-triggered.

use crate::condition::Condition;
use crate::handler::SocketNum;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

/// Conditions observed ready during one wait
#[derive(Debug, Clone, Default)]
pub struct ReadySet {
    ready: HashMap<SocketNum, Condition>,
}

impl ReadySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `conditions` as ready on `socket`
    pub fn insert(&mut self, socket: SocketNum, conditions: Condition) {
        if !conditions.is_empty() {
            *self.ready.entry(socket).or_default() |= conditions;
        }
    }

    /// Conditions observed on `socket` (empty if none)
    pub fn conditions(&self, socket: SocketNum) -> Condition {
        self.ready.get(&socket).copied().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.ready.clear();
    }

    /// Number of sockets with at least one ready condition
    pub fn len(&self) -> usize {
        self.ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
    }
}

/// Readiness-wait primitive
///
/// Implementations block for at most `timeout` and fill `ready` with the
/// subset of each socket's requested conditions that hold. Errors of kind
/// `Interrupted` or `WouldBlock` are treated as retryable by the reactor;
/// anything else is fatal.
pub trait Multiplexer {
    fn wait(
        &mut self,
        interests: &[(SocketNum, Condition)],
        timeout: Duration,
        ready: &mut ReadySet,
    ) -> io::Result<()>;
}

/// Returns true for wait errors the loop can simply retry
pub fn is_retryable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Convert a wait bound to a `poll(2)` timeout in milliseconds
///
/// Rounds up so that a sub-millisecond deadline does not turn into a busy
/// loop of zero-timeout polls.
pub fn timeout_millis(timeout: Duration) -> libc::c_int {
    let micros = timeout.as_micros();
    let millis = (micros + 999) / 1000;
    millis.min(libc::c_int::MAX as u128) as libc::c_int
}

/// `poll(2)` backed multiplexer
#[derive(Default)]
pub struct PollMultiplexer {
    fds: Vec<libc::pollfd>,
}

impl std::fmt::Debug for PollMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollMultiplexer")
            .field("last_nfds", &self.fds.len())
            .finish()
    }
}

impl PollMultiplexer {
    pub fn new() -> Self {
        Self::default()
    }

    fn events_for(conditions: Condition) -> libc::c_short {
        let mut events = 0;
        if conditions.is_readable() {
            events |= libc::POLLIN;
        }
        if conditions.is_writable() {
            events |= libc::POLLOUT;
        }
        if conditions.is_exception() {
            events |= libc::POLLPRI;
        }
        events
    }

    /// Map returned events back to conditions, the way `select` would report
    /// them: hang-up reads as readable, errors as exceptional.
    fn conditions_for(revents: libc::c_short) -> Condition {
        let mut conditions = Condition::NONE;
        if revents & (libc::POLLIN | libc::POLLHUP) != 0 {
            conditions |= Condition::READABLE;
        }
        if revents & libc::POLLOUT != 0 {
            conditions |= Condition::WRITABLE;
        }
        if revents & (libc::POLLPRI | libc::POLLERR) != 0 {
            conditions |= Condition::EXCEPTION;
        }
        conditions
    }
}

impl Multiplexer for PollMultiplexer {
    fn wait(
        &mut self,
        interests: &[(SocketNum, Condition)],
        timeout: Duration,
        ready: &mut ReadySet,
    ) -> io::Result<()> {
        self.fds.clear();
        self.fds.extend(interests.iter().map(|(socket, conditions)| libc::pollfd {
            fd: *socket,
            events: Self::events_for(*conditions),
            revents: 0,
        }));

        // SAFETY: `fds` is a valid, initialised slice of `pollfd` for the
        // duration of the call and `nfds` is its exact length.
        let rc = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as libc::nfds_t,
                timeout_millis(timeout),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        for (pfd, (_, requested)) in self.fds.iter().zip(interests) {
            if pfd.revents & libc::POLLNVAL != 0 {
                // `select` fails the whole call on a closed descriptor; keep
                // that behaviour so a stale registration is not silently
                // spun on.
                return Err(io::Error::from_raw_os_error(libc::EBADF));
            }
            let observed = Self::conditions_for(pfd.revents);
            ready.insert(pfd.fd, observed & *requested);
        }

        Ok(())
    }
}
