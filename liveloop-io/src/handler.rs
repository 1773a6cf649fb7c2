//! Socket handler registry
//!
//! Maps socket descriptors to the readiness conditions a caller wants to be
//! told about and the callback to run when they occur. Iteration is ordered
//! by descriptor and can resume just after any descriptor, wrapping around,
//! which is what gives the reactor its round-robin dispatch.

use crate::condition::Condition;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;

/// Socket descriptor as seen by the readiness primitive
pub type SocketNum = std::os::unix::io::RawFd;

/// Default descriptor limit, matching `FD_SETSIZE`
pub const DEFAULT_MAX_SOCKET_NUM: SocketNum = 1024;

/// Callback for a ready socket, receiving the matched conditions
pub type HandlerFn<C> = Box<dyn FnMut(&mut C, Condition)>;

/// One registered socket
pub struct SocketHandler<C> {
    conditions: Condition,
    /// Absent while the callback is running
    callback: Option<HandlerFn<C>>,
    /// Distinguishes this registration from a later one on the same socket
    generation: u64,
}

impl<C> SocketHandler<C> {
    /// Requested condition mask
    pub fn conditions(&self) -> Condition {
        self.conditions
    }

    /// False while the handler's own callback is executing
    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }
}

impl<C> fmt::Debug for SocketHandler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketHandler")
            .field("conditions", &self.conditions)
            .field("has_callback", &self.callback.is_some())
            .field("generation", &self.generation)
            .finish()
    }
}

/// A callback checked out of the registry while it runs
pub struct CheckedOut<C> {
    generation: u64,
    callback: HandlerFn<C>,
}

impl<C> CheckedOut<C> {
    /// Invoke the callback
    pub fn call(&mut self, ctx: &mut C, conditions: Condition) {
        (self.callback)(ctx, conditions)
    }
}

/// Registry of socket handlers
pub struct HandlerSet<C> {
    handlers: BTreeMap<SocketNum, SocketHandler<C>>,
    max_socket_num: SocketNum,
    next_generation: u64,
}

impl<C> HandlerSet<C> {
    /// Create an empty registry accepting descriptors below `FD_SETSIZE`
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_SOCKET_NUM)
    }

    /// Create an empty registry accepting descriptors in `0..max_socket_num`
    pub fn with_limit(max_socket_num: SocketNum) -> Self {
        HandlerSet {
            handlers: BTreeMap::new(),
            max_socket_num,
            next_generation: 0,
        }
    }

    fn is_valid(&self, socket: SocketNum) -> bool {
        socket >= 0 && socket < self.max_socket_num
    }

    /// Install, replace or (with an empty mask) remove the handler for `socket`
    ///
    /// Descriptors outside the accepted range are ignored.
    pub fn set_interest<F>(&mut self, socket: SocketNum, conditions: Condition, callback: F)
    where
        F: FnMut(&mut C, Condition) + 'static,
    {
        if !self.is_valid(socket) {
            tracing::trace!(socket, "ignoring out-of-range socket");
            return;
        }

        if conditions.is_empty() {
            self.clear(socket);
            return;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        self.handlers.insert(
            socket,
            SocketHandler {
                conditions,
                callback: Some(Box::new(callback)),
                generation,
            },
        );
        tracing::debug!(socket, %conditions, "socket handler installed");
    }

    /// Remove the handler for `socket`, if any
    pub fn clear(&mut self, socket: SocketNum) {
        if self.handlers.remove(&socket).is_some() {
            tracing::debug!(socket, "socket handler removed");
        }
    }

    /// Move the registration on `old` to `new`
    ///
    /// Any registration already on `new` is replaced. Nothing happens if
    /// either descriptor is out of range or `old` has no handler.
    pub fn relocate(&mut self, old: SocketNum, new: SocketNum) {
        if !self.is_valid(old) || !self.is_valid(new) || old == new {
            return;
        }

        if let Some(handler) = self.handlers.remove(&old) {
            self.handlers.insert(new, handler);
            tracing::debug!(old, new, "socket handler relocated");
        }
    }

    /// Handler registered for `socket`
    pub fn get(&self, socket: SocketNum) -> Option<&SocketHandler<C>> {
        self.handlers.get(&socket)
    }

    pub fn contains(&self, socket: SocketNum) -> bool {
        self.handlers.contains_key(&socket)
    }

    /// One plus the highest registered descriptor (zero when empty)
    pub fn max_num_sockets(&self) -> SocketNum {
        self.handlers
            .keys()
            .next_back()
            .map_or(0, |socket| socket + 1)
    }

    /// Highest descriptor this registry accepts, exclusive
    pub fn socket_limit(&self) -> SocketNum {
        self.max_socket_num
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Iterate every handler in descriptor order
    pub fn iter(&self) -> impl Iterator<Item = (SocketNum, &SocketHandler<C>)> + Clone + '_ {
        self.handlers.iter().map(|(socket, handler)| (*socket, handler))
    }

    /// Iterate handlers starting just after `after`, wrapping to the beginning
    ///
    /// With `None` this is a plain pass from the lowest descriptor. Each
    /// handler is yielded exactly once; cloning the iterator restarts from
    /// the clone point.
    pub fn iter_from(
        &self,
        after: Option<SocketNum>,
    ) -> impl Iterator<Item = (SocketNum, &SocketHandler<C>)> + Clone + '_ {
        let (tail, head) = match after {
            Some(after) => (
                self.handlers.range((Bound::Excluded(after), Bound::Unbounded)),
                self.handlers.range((Bound::Unbounded, Bound::Included(after))),
            ),
            None => (
                self.handlers.range(..),
                self.handlers.range((Bound::Excluded(SocketNum::MAX), Bound::Unbounded)),
            ),
        };

        tail.chain(head)
            .map(|(socket, handler)| (*socket, handler))
    }

    /// Requested conditions of every handler, in descriptor order
    pub fn interests(&self) -> impl Iterator<Item = (SocketNum, Condition)> + '_ {
        self.handlers
            .iter()
            .map(|(socket, handler)| (*socket, handler.conditions))
    }

    /// Take the callback of `socket` out of the registry so it can be run
    /// with mutable access to the context that owns the registry
    pub fn check_out(&mut self, socket: SocketNum) -> Option<CheckedOut<C>> {
        let handler = self.handlers.get_mut(&socket)?;
        let callback = handler.callback.take()?;
        Some(CheckedOut {
            generation: handler.generation,
            callback,
        })
    }

    /// Return a callback taken by [`check_out`](Self::check_out)
    ///
    /// If the registration was removed or replaced while the callback ran,
    /// the callback is dropped. A registration relocated while it ran gets
    /// its callback back on its new descriptor.
    pub fn check_in(&mut self, socket: SocketNum, checked_out: CheckedOut<C>) {
        let CheckedOut { generation, callback } = checked_out;

        let in_place = self
            .handlers
            .get(&socket)
            .map_or(false, |handler| handler.generation == generation);

        let slot = if in_place {
            self.handlers.get_mut(&socket)
        } else {
            self.handlers
                .values_mut()
                .find(|handler| handler.generation == generation)
        };

        if let Some(handler) = slot {
            if handler.callback.is_none() {
                handler.callback = Some(callback);
            }
        }
    }
}

impl<C> Default for HandlerSet<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for HandlerSet<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.handlers.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Set = HandlerSet<Vec<SocketNum>>;

    fn noop(_: &mut Vec<SocketNum>, _: Condition) {}

    fn sockets<'a>(
        iter: impl Iterator<Item = (SocketNum, &'a SocketHandler<Vec<SocketNum>>)>,
    ) -> Vec<SocketNum> {
        iter.map(|(socket, _)| socket).collect()
    }

    #[test]
    fn test_set_and_clear_tracks_upper_bound() {
        let mut set = Set::new();
        assert_eq!(set.max_num_sockets(), 0);

        set.set_interest(3, Condition::READABLE, noop);
        set.set_interest(9, Condition::WRITABLE, noop);
        assert_eq!(set.max_num_sockets(), 10);

        set.set_interest(9, Condition::NONE, noop);
        assert_eq!(set.max_num_sockets(), 4);
        assert!(!set.contains(9));

        set.clear(3);
        assert_eq!(set.max_num_sockets(), 0);
        assert!(set.is_empty());
    }

    #[test]
    fn test_replace_registration() {
        let mut set = Set::new();
        set.set_interest(4, Condition::READABLE, noop);
        set.set_interest(4, Condition::READABLE | Condition::EXCEPTION, noop);

        assert_eq!(set.len(), 1);
        assert_eq!(
            set.get(4).unwrap().conditions(),
            Condition::READABLE | Condition::EXCEPTION
        );
    }

    #[test]
    fn test_out_of_range_ignored() {
        let mut set = Set::with_limit(16);
        set.set_interest(-1, Condition::READABLE, noop);
        set.set_interest(16, Condition::READABLE, noop);
        set.set_interest(15, Condition::READABLE, noop);

        assert_eq!(sockets(set.iter()), vec![15]);

        set.relocate(15, 99);
        assert!(set.contains(15));
    }

    #[test]
    fn test_relocate() {
        let mut set = Set::new();
        set.set_interest(5, Condition::WRITABLE, noop);
        set.relocate(5, 12);

        assert!(!set.contains(5));
        assert_eq!(set.get(12).unwrap().conditions(), Condition::WRITABLE);
        assert_eq!(set.max_num_sockets(), 13);

        set.relocate(12, 2);
        assert_eq!(set.max_num_sockets(), 3);

        // Relocating an unregistered socket does nothing
        set.relocate(40, 41);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_iter_from_wraps() {
        let mut set = Set::new();
        for socket in [2, 5, 7, 11] {
            set.set_interest(socket, Condition::READABLE, noop);
        }

        assert_eq!(sockets(set.iter_from(None)), vec![2, 5, 7, 11]);
        assert_eq!(sockets(set.iter_from(Some(5))), vec![7, 11, 2, 5]);
        assert_eq!(sockets(set.iter_from(Some(11))), vec![2, 5, 7, 11]);
        // Resuming after an unregistered descriptor still visits everything once
        assert_eq!(sockets(set.iter_from(Some(6))), vec![7, 11, 2, 5]);
    }

    #[test]
    fn test_iter_from_is_restartable() {
        let mut set = Set::new();
        for socket in [1, 2, 3] {
            set.set_interest(socket, Condition::READABLE, noop);
        }

        let mut iter = set.iter_from(Some(1));
        assert_eq!(iter.next().map(|(s, _)| s), Some(2));
        let restart = iter.clone();
        assert_eq!(sockets(iter), vec![3, 1]);
        assert_eq!(sockets(restart), vec![3, 1]);
    }

    #[test]
    fn test_check_out_and_in() {
        let mut set = Set::new();
        set.set_interest(7, Condition::READABLE, |log: &mut Vec<SocketNum>, _| log.push(7));

        let mut log = Vec::new();
        let mut cb = set.check_out(7).unwrap();
        assert!(!set.get(7).unwrap().has_callback());
        assert!(set.check_out(7).is_none());

        cb.call(&mut log, Condition::READABLE);
        set.check_in(7, cb);

        assert!(set.get(7).unwrap().has_callback());
        assert_eq!(log, vec![7]);
    }

    #[test]
    fn test_check_in_after_replace_drops_old_callback() {
        let mut set = Set::new();
        set.set_interest(7, Condition::READABLE, |log: &mut Vec<SocketNum>, _| log.push(1));

        let cb = set.check_out(7).unwrap();
        set.set_interest(7, Condition::READABLE, |log: &mut Vec<SocketNum>, _| log.push(2));
        set.check_in(7, cb);

        let mut log = Vec::new();
        let mut current = set.check_out(7).unwrap();
        current.call(&mut log, Condition::READABLE);
        assert_eq!(log, vec![2]);
    }

    #[test]
    fn test_check_in_follows_relocation() {
        let mut set = Set::new();
        set.set_interest(7, Condition::READABLE, noop);

        let cb = set.check_out(7).unwrap();
        set.relocate(7, 9);
        set.check_in(7, cb);

        assert!(set.get(9).unwrap().has_callback());
    }

    #[test]
    fn test_check_in_after_clear_drops_callback() {
        let mut set = Set::new();
        set.set_interest(7, Condition::READABLE, noop);

        let cb = set.check_out(7).unwrap();
        set.clear(7);
        set.check_in(7, cb);

        assert!(set.is_empty());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn iter_from_visits_every_socket_once(
                registered in proptest::collection::btree_set(0..64i32, 1..16),
                resume in 0..64i32,
            ) {
                let mut set = Set::new();
                for socket in &registered {
                    set.set_interest(*socket, Condition::READABLE, noop);
                }

                let resume = Some(resume).filter(|s| set.contains(*s));
                let visited = sockets(set.iter_from(resume));

                let mut sorted = visited.clone();
                sorted.sort_unstable();
                prop_assert_eq!(sorted, registered.iter().copied().collect::<Vec<_>>());
                if let Some(after) = resume {
                    prop_assert_eq!(visited.last().copied(), Some(after));
                }
            }
        }
    }
}
