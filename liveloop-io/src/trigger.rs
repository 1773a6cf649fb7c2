//! Event triggers
//!
//! A fixed table of 32 slots that code outside the loop thread can flag as
//! pending. Flagging is a single atomic OR on a shared bit mask; the bound
//! callbacks only ever run on the loop thread, one per drain, in an order
//! that rotates through the slots so a busy slot cannot starve the others.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Number of trigger slots
pub const MAX_EVENT_TRIGGERS: usize = 32;

/// Callback bound to a trigger slot
pub type TriggerFn<C> = Box<dyn FnMut(&mut C)>;

/// Trigger errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TriggerError {
    #[error("All {max} event trigger slots are in use")]
    Exhausted { max: usize },
}

/// Identifies one trigger slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TriggerId(u8);

impl TriggerId {
    /// Slot index in `0..MAX_EVENT_TRIGGERS`
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Bit of this slot in the pending mask
    #[inline]
    pub fn mask(self) -> u32 {
        1 << self.0
    }

    /// Build an id from a slot index
    pub fn from_index(index: usize) -> Option<Self> {
        if index < MAX_EVENT_TRIGGERS {
            Some(TriggerId(index as u8))
        } else {
            None
        }
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trigger#{}", self.0)
    }
}

/// Thread-safe handle for signalling triggers
///
/// Cheap to clone and safe to move to other threads.
#[derive(Clone, Default)]
pub struct TriggerHandle {
    pending: Arc<AtomicU32>,
}

impl TriggerHandle {
    /// Mark `id` as pending; its callback runs on a later drain
    #[inline]
    pub fn trigger(&self, id: TriggerId) {
        self.pending.fetch_or(id.mask(), Ordering::Release);
    }

    /// Snapshot of the pending mask
    #[inline]
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::Acquire)
    }

    /// Clear `mask` bits
    #[inline]
    fn clear(&self, mask: u32) {
        self.pending.fetch_and(!mask, Ordering::AcqRel);
    }
}

impl fmt::Debug for TriggerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TriggerHandle(pending={:#010x})", self.pending())
    }
}

/// Loop-side registry of trigger callbacks
pub struct TriggerRegistry<C> {
    slots: [Option<TriggerFn<C>>; MAX_EVENT_TRIGGERS],
    /// Bound slots, including one whose callback is currently checked out
    bound: u32,
    handle: TriggerHandle,
    last_used: usize,
}

impl<C> TriggerRegistry<C> {
    /// Create a registry with every slot free
    pub fn new() -> Self {
        TriggerRegistry {
            slots: std::array::from_fn(|_| None),
            bound: 0,
            handle: TriggerHandle::default(),
            last_used: MAX_EVENT_TRIGGERS - 1,
        }
    }

    /// Bind `callback` to a free slot
    ///
    /// The search for a free slot starts just after the last serviced one.
    pub fn allocate<F>(&mut self, callback: F) -> Result<TriggerId, TriggerError>
    where
        F: FnMut(&mut C) + 'static,
    {
        let mut index = self.last_used;
        for _ in 0..MAX_EVENT_TRIGGERS {
            index = (index + 1) % MAX_EVENT_TRIGGERS;
            let mask = 1u32 << index;
            if self.bound & mask == 0 {
                self.slots[index] = Some(Box::new(callback));
                self.bound |= mask;
                // A stale signal on a previously unused slot must not fire
                // the new callback.
                self.handle.clear(mask);
                self.last_used = index;

                let id = TriggerId(index as u8);
                tracing::debug!(%id, "event trigger allocated");
                return Ok(id);
            }
        }

        Err(TriggerError::Exhausted {
            max: MAX_EVENT_TRIGGERS,
        })
    }

    /// Handle for signalling from other threads
    pub fn handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    /// Mark `id` as pending
    pub fn signal(&self, id: TriggerId) {
        self.handle.trigger(id);
    }

    /// Snapshot of the pending mask
    pub fn pending(&self) -> u32 {
        self.handle.pending()
    }

    /// Check whether a slot has a callback bound
    pub fn is_allocated(&self, id: TriggerId) -> bool {
        self.bound & id.mask() != 0
    }

    /// Number of bound slots
    pub fn allocated(&self) -> usize {
        self.bound.count_ones() as usize
    }

    /// Slot serviced by the most recent drain (or allocation)
    pub fn last_used(&self) -> TriggerId {
        TriggerId(self.last_used as u8)
    }

    /// Pick the next pending slot to service and clear its pending bit
    ///
    /// Pending bits of unbound slots met along the way are cleared too. A
    /// bound slot whose callback is running keeps its bit for a later drain.
    fn select(&mut self) -> Option<usize> {
        let pending = self.handle.pending();
        if pending == 0 {
            return None;
        }

        let last_mask = 1u32 << self.last_used;
        if pending == last_mask && self.slots[self.last_used].is_some() {
            self.handle.clear(last_mask);
            return Some(self.last_used);
        }

        let mut index = self.last_used;
        for _ in 0..MAX_EVENT_TRIGGERS {
            index = (index + 1) % MAX_EVENT_TRIGGERS;
            let mask = 1u32 << index;
            if pending & mask == 0 {
                continue;
            }

            if self.slots[index].is_some() {
                self.handle.clear(mask);
                self.last_used = index;
                return Some(index);
            }
            if self.bound & mask == 0 {
                self.handle.clear(mask);
            }
        }

        None
    }

    /// Service at most one pending trigger
    ///
    /// `registry` locates this registry inside `ctx`. The slot's pending bit
    /// is cleared before its callback runs, so a signal raised during the
    /// callback is kept for a later drain. Returns the serviced slot.
    pub fn drain_one(
        ctx: &mut C,
        registry: fn(&mut C) -> &mut TriggerRegistry<C>,
    ) -> Option<TriggerId> {
        let triggers = registry(ctx);
        let index = triggers.select()?;
        let mut callback = triggers.slots[index].take()?;

        let id = TriggerId(index as u8);
        tracing::trace!(%id, "servicing event trigger");
        callback(ctx);

        let slot = &mut registry(ctx).slots[index];
        if slot.is_none() {
            *slot = Some(callback);
        }

        Some(id)
    }
}

impl<C> Default for TriggerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for TriggerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerRegistry")
            .field("bound", &format_args!("{:#010x}", self.bound))
            .field("pending", &format_args!("{:#010x}", self.pending()))
            .field("last_used", &self.last_used)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Ctx {
        triggers: TriggerRegistry<Ctx>,
        log: Vec<usize>,
    }

    fn triggers(ctx: &mut Ctx) -> &mut TriggerRegistry<Ctx> {
        &mut ctx.triggers
    }

    fn logging(n: usize) -> impl FnMut(&mut Ctx) {
        move |c: &mut Ctx| c.log.push(n)
    }

    #[test]
    fn test_allocate_in_order() {
        let mut ctx = Ctx::default();
        let a = ctx.triggers.allocate(logging(0)).unwrap();
        let b = ctx.triggers.allocate(logging(1)).unwrap();
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(ctx.triggers.allocated(), 2);
    }

    #[test]
    fn test_allocate_exhaustion() {
        let mut ctx = Ctx::default();
        for i in 0..MAX_EVENT_TRIGGERS {
            ctx.triggers.allocate(logging(i)).unwrap();
        }
        assert_eq!(
            ctx.triggers.allocate(logging(99)),
            Err(TriggerError::Exhausted { max: 32 })
        );
    }

    #[test]
    fn test_drain_nothing_pending() {
        let mut ctx = Ctx::default();
        ctx.triggers.allocate(logging(0)).unwrap();
        assert_eq!(TriggerRegistry::drain_one(&mut ctx, triggers), None);
        assert!(ctx.log.is_empty());
    }

    #[test]
    fn test_drain_services_one_per_call() {
        let mut ctx = Ctx::default();
        let ids: Vec<_> = (0..3)
            .map(|i| ctx.triggers.allocate(logging(i)).unwrap())
            .collect();
        for id in &ids {
            ctx.triggers.signal(*id);
        }

        assert_eq!(TriggerRegistry::drain_one(&mut ctx, triggers), Some(ids[0]));
        assert_eq!(ctx.log, vec![0]);
        TriggerRegistry::drain_one(&mut ctx, triggers);
        TriggerRegistry::drain_one(&mut ctx, triggers);
        assert_eq!(ctx.log, vec![0, 1, 2]);
        assert_eq!(ctx.triggers.pending(), 0);
    }

    #[test]
    fn test_fast_path_for_repeated_single_trigger() {
        let mut ctx = Ctx::default();
        ctx.triggers.allocate(logging(0)).unwrap();
        let id = ctx.triggers.allocate(logging(1)).unwrap();

        for _ in 0..3 {
            ctx.triggers.signal(id);
            assert_eq!(TriggerRegistry::drain_one(&mut ctx, triggers), Some(id));
        }
        assert_eq!(ctx.log, vec![1, 1, 1]);
    }

    #[test]
    fn test_rotation_prevents_starvation() {
        let mut ctx = Ctx::default();
        let a = ctx.triggers.allocate(logging(0)).unwrap();
        let b = ctx.triggers.allocate(logging(1)).unwrap();

        // Both slots are re-signalled before every drain.
        for _ in 0..6 {
            ctx.triggers.signal(a);
            ctx.triggers.signal(b);
            TriggerRegistry::drain_one(&mut ctx, triggers);
        }
        assert_eq!(ctx.log, vec![0, 1, 0, 1, 0, 1]);
    }

    #[test]
    fn test_signal_during_callback_is_kept() {
        let mut ctx = Ctx::default();
        let id = TriggerId::from_index(0).unwrap();
        ctx.triggers
            .allocate(move |c: &mut Ctx| {
                c.log.push(c.log.len());
                if c.log.len() < 2 {
                    c.triggers.signal(id);
                }
            })
            .unwrap();

        ctx.triggers.signal(id);
        TriggerRegistry::drain_one(&mut ctx, triggers);
        assert_eq!(ctx.triggers.pending(), id.mask());
        TriggerRegistry::drain_one(&mut ctx, triggers);
        assert_eq!(ctx.log, vec![0, 1]);
        assert_eq!(ctx.triggers.pending(), 0);
    }

    #[test]
    fn test_nested_drain_skips_running_slot() {
        let mut ctx = Ctx::default();
        let other = TriggerId::from_index(1).unwrap();
        let id = ctx
            .triggers
            .allocate(move |c: &mut Ctx| {
                c.log.push(0);
                if c.log.len() == 1 {
                    let id = c.triggers.last_used();
                    c.triggers.signal(id);
                    c.triggers.signal(other);
                    // Only the idle slot is serviced while this one runs
                    assert_eq!(TriggerRegistry::drain_one(c, triggers), Some(other));
                    assert_eq!(TriggerRegistry::drain_one(c, triggers), None);
                }
            })
            .unwrap();
        ctx.triggers.allocate(logging(1)).unwrap();

        ctx.triggers.signal(id);
        assert_eq!(TriggerRegistry::drain_one(&mut ctx, triggers), Some(id));
        assert_eq!(ctx.triggers.pending(), id.mask());
        assert_eq!(TriggerRegistry::drain_one(&mut ctx, triggers), Some(id));
        assert_eq!(ctx.log, vec![0, 1, 0]);
        assert_eq!(ctx.triggers.pending(), 0);
    }

    #[test]
    fn test_unbound_slot_is_inert() {
        let mut ctx = Ctx::default();
        let bound = ctx.triggers.allocate(logging(0)).unwrap();
        let unbound = TriggerId::from_index(5).unwrap();

        ctx.triggers.signal(unbound);
        assert_eq!(TriggerRegistry::drain_one(&mut ctx, triggers), None);
        assert_eq!(ctx.triggers.pending(), 0);

        ctx.triggers.signal(unbound);
        ctx.triggers.signal(bound);
        assert_eq!(TriggerRegistry::drain_one(&mut ctx, triggers), Some(bound));
        assert_eq!(ctx.log, vec![0]);
    }

    #[test]
    fn test_signal_from_other_thread() {
        let mut ctx = Ctx::default();
        let id = ctx.triggers.allocate(logging(7)).unwrap();
        let handle = ctx.triggers.handle();

        thread::spawn(move || handle.trigger(id)).join().unwrap();

        assert_eq!(TriggerRegistry::drain_one(&mut ctx, triggers), Some(id));
        assert_eq!(ctx.log, vec![7]);
    }

    #[test]
    fn test_trigger_id_bounds() {
        assert!(TriggerId::from_index(31).is_some());
        assert!(TriggerId::from_index(32).is_none());
        assert_eq!(TriggerId::from_index(3).unwrap().mask(), 0b1000);
    }
}
