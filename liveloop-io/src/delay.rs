//! Delay queue for timer-based work
//!
//! Holds one-shot tasks keyed by absolute deadline. The queue is generic over
//! the context `C` its callbacks run against (the reactor, in practice), so a
//! callback can schedule or cancel further tasks while the queue is firing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::{Duration, Instant};

/// Callback for a delayed task
pub type TaskFn<C> = Box<dyn FnOnce(&mut C)>;

/// Handle identifying a scheduled task
///
/// Tokens are never reused, so a stale token can only ever cancel nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskToken(u64);

impl TaskToken {
    /// Raw token value
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

/// Ordered collection of pending tasks
pub struct DelayQueue<C> {
    /// Tasks ordered by (deadline, token); the token breaks ties in
    /// scheduling order.
    tasks: BTreeMap<(Instant, TaskToken), TaskFn<C>>,
    /// Deadline of every live token, for cancellation
    deadlines: HashMap<TaskToken, Instant>,
    next_token: u64,
}

impl<C> DelayQueue<C> {
    /// Create an empty delay queue
    pub fn new() -> Self {
        DelayQueue {
            tasks: BTreeMap::new(),
            deadlines: HashMap::new(),
            next_token: 0,
        }
    }

    /// Schedule `task` to run once `delay` has elapsed
    pub fn schedule<F>(&mut self, delay: Duration, task: F) -> TaskToken
    where
        F: FnOnce(&mut C) + 'static,
    {
        let now = Instant::now();
        let deadline = now.checked_add(delay).unwrap_or_else(|| far_future(now));
        self.schedule_at(deadline, task)
    }

    /// Schedule `task` to run at an absolute deadline
    pub fn schedule_at<F>(&mut self, deadline: Instant, task: F) -> TaskToken
    where
        F: FnOnce(&mut C) + 'static,
    {
        let token = TaskToken(self.next_token);
        self.next_token += 1;

        self.tasks.insert((deadline, token), Box::new(task));
        self.deadlines.insert(token, deadline);
        token
    }

    /// Cancel a pending task
    ///
    /// Returns false if the task already fired or was cancelled.
    pub fn cancel(&mut self, token: TaskToken) -> bool {
        match self.deadlines.remove(&token) {
            Some(deadline) => self.tasks.remove(&(deadline, token)).is_some(),
            None => false,
        }
    }

    /// Cancel `token` (if still pending) and schedule `task` in its place
    ///
    /// `token` is updated to identify the new task.
    pub fn reschedule<F>(&mut self, token: &mut TaskToken, delay: Duration, task: F)
    where
        F: FnOnce(&mut C) + 'static,
    {
        self.cancel(*token);
        *token = self.schedule(delay, task);
    }

    /// Check whether a task is still pending
    pub fn is_pending(&self, token: TaskToken) -> bool {
        self.deadlines.contains_key(&token)
    }

    /// Deadline of the earliest pending task
    pub fn next_deadline(&self) -> Option<Instant> {
        self.tasks.keys().next().map(|(deadline, _)| *deadline)
    }

    /// Time remaining until the earliest deadline
    ///
    /// `None` means the queue is empty and any wait is unbounded. A deadline
    /// already in the past yields `Duration::ZERO`.
    pub fn time_to_next_deadline(&self) -> Option<Duration> {
        self.time_to_next_deadline_at(Instant::now())
    }

    /// Same as [`time_to_next_deadline`](Self::time_to_next_deadline) with an explicit clock
    pub fn time_to_next_deadline_at(&self, now: Instant) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drop every pending task without running it
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.deadlines.clear();
    }

    /// Remove the earliest task that is due at `now` and was issued before
    /// `watermark`
    fn pop_due(&mut self, now: Instant, watermark: u64) -> Option<TaskFn<C>> {
        let key = self
            .tasks
            .range(..=(now, TaskToken(u64::MAX)))
            .map(|(key, _)| *key)
            .find(|(_, token)| token.0 < watermark)?;

        self.deadlines.remove(&key.1);
        self.tasks.remove(&key)
    }

    /// Fire every task that is due now
    ///
    /// `queue` locates the delay queue inside `ctx`. Each task is removed
    /// before it runs, so callbacks may freely schedule or cancel through the
    /// context. Tasks scheduled during this pass wait for the next one.
    /// Returns the number of tasks fired.
    pub fn fire_due(ctx: &mut C, queue: fn(&mut C) -> &mut DelayQueue<C>) -> usize {
        Self::fire_due_at(ctx, queue, Instant::now())
    }

    /// Same as [`fire_due`](Self::fire_due) with an explicit clock
    pub fn fire_due_at(
        ctx: &mut C,
        queue: fn(&mut C) -> &mut DelayQueue<C>,
        now: Instant,
    ) -> usize {
        let watermark = queue(ctx).next_token;
        let mut fired = 0;

        while let Some(task) = queue(ctx).pop_due(now, watermark) {
            task(ctx);
            fired += 1;
        }

        fired
    }
}

impl<C> Default for DelayQueue<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for DelayQueue<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayQueue")
            .field("pending", &self.tasks.len())
            .field("next_deadline", &self.next_deadline())
            .finish()
    }
}

/// Deadline used when `now + delay` overflows `Instant`
fn far_future(now: Instant) -> Instant {
    // Roughly thirty years; still representable on every supported platform.
    now + Duration::from_secs(86_400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ctx {
        queue: DelayQueue<Ctx>,
        log: Vec<&'static str>,
    }

    fn queue(ctx: &mut Ctx) -> &mut DelayQueue<Ctx> {
        &mut ctx.queue
    }

    #[test]
    fn test_empty_queue_is_unbounded() {
        let q: DelayQueue<Ctx> = DelayQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.time_to_next_deadline(), None);
    }

    #[test]
    fn test_time_to_next_deadline() {
        let base = Instant::now();
        let mut q: DelayQueue<Ctx> = DelayQueue::new();
        q.schedule_at(base + Duration::from_millis(50), |_| {});
        q.schedule_at(base + Duration::from_millis(20), |_| {});

        assert_eq!(q.time_to_next_deadline_at(base), Some(Duration::from_millis(20)));
        assert_eq!(
            q.time_to_next_deadline_at(base + Duration::from_millis(30)),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let base = Instant::now();
        let mut ctx = Ctx::default();
        ctx.queue.schedule_at(base + Duration::from_millis(30), |c| c.log.push("c"));
        ctx.queue.schedule_at(base + Duration::from_millis(10), |c| c.log.push("a"));
        ctx.queue.schedule_at(base + Duration::from_millis(20), |c| c.log.push("b"));
        ctx.queue.schedule_at(base + Duration::from_millis(90), |c| c.log.push("late"));

        let fired = DelayQueue::fire_due_at(&mut ctx, queue, base + Duration::from_millis(30));

        assert_eq!(fired, 3);
        assert_eq!(ctx.log, vec!["a", "b", "c"]);
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn test_equal_deadlines_fire_in_schedule_order() {
        let base = Instant::now();
        let mut ctx = Ctx::default();
        ctx.queue.schedule_at(base, |c| c.log.push("first"));
        ctx.queue.schedule_at(base, |c| c.log.push("second"));

        DelayQueue::fire_due_at(&mut ctx, queue, base);
        assert_eq!(ctx.log, vec!["first", "second"]);
    }

    #[test]
    fn test_cancel() {
        let base = Instant::now();
        let mut ctx = Ctx::default();
        let token = ctx.queue.schedule_at(base, |c| c.log.push("cancelled"));
        ctx.queue.schedule_at(base, |c| c.log.push("kept"));

        assert!(ctx.queue.cancel(token));
        assert!(!ctx.queue.cancel(token));

        DelayQueue::fire_due_at(&mut ctx, queue, base);
        assert_eq!(ctx.log, vec!["kept"]);
    }

    #[test]
    fn test_cancel_after_fire_is_noop() {
        let base = Instant::now();
        let mut ctx = Ctx::default();
        let token = ctx.queue.schedule_at(base, |c| c.log.push("ran"));

        DelayQueue::fire_due_at(&mut ctx, queue, base);
        assert!(!ctx.queue.is_pending(token));
        assert!(!ctx.queue.cancel(token));
        assert_eq!(ctx.log, vec!["ran"]);
    }

    #[test]
    fn test_callback_can_schedule_and_cancel() {
        let base = Instant::now();
        let mut ctx = Ctx::default();
        let victim = ctx
            .queue
            .schedule_at(base + Duration::from_millis(1), |c| c.log.push("victim"));
        ctx.queue.schedule_at(base, move |c| {
            c.log.push("canceller");
            c.queue.cancel(victim);
            c.queue.schedule_at(base, |c| c.log.push("rescheduled"));
        });

        let fired = DelayQueue::fire_due_at(&mut ctx, queue, base + Duration::from_millis(1));
        assert_eq!(fired, 1);
        assert_eq!(ctx.log, vec!["canceller"]);

        // The task added during the pass is picked up by the next one.
        DelayQueue::fire_due_at(&mut ctx, queue, base + Duration::from_millis(1));
        assert_eq!(ctx.log, vec!["canceller", "rescheduled"]);
    }

    #[test]
    fn test_self_rescheduling_task_terminates() {
        fn tick(c: &mut Ctx) {
            c.log.push("tick");
            c.queue.schedule(Duration::ZERO, tick);
        }

        let mut ctx = Ctx::default();
        ctx.queue.schedule(Duration::ZERO, tick);

        let later = Instant::now() + Duration::from_secs(1);
        let fired = DelayQueue::fire_due_at(&mut ctx, queue, later);
        assert_eq!(fired, 1);
        assert_eq!(ctx.queue.len(), 1);
    }

    #[test]
    fn test_reschedule() {
        let mut ctx = Ctx::default();
        let mut token = ctx.queue.schedule(Duration::from_secs(60), |c| c.log.push("old"));
        let old = token;

        ctx.queue
            .reschedule(&mut token, Duration::ZERO, |c| c.log.push("new"));

        assert_ne!(old, token);
        assert!(!ctx.queue.is_pending(old));
        DelayQueue::fire_due_at(&mut ctx, queue, Instant::now() + Duration::from_millis(1));
        assert_eq!(ctx.log, vec!["new"]);
    }

    #[test]
    fn test_huge_delay_does_not_panic() {
        let mut q: DelayQueue<Ctx> = DelayQueue::new();
        q.schedule(Duration::MAX, |_| {});
        assert!(q.time_to_next_deadline().unwrap() > Duration::from_secs(86_400));
    }
}
