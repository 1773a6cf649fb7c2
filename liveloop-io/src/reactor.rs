//! Single-threaded cooperative event loop
//!
//! A [`Reactor`] owns the socket handler registry, the delay queue and the
//! event trigger registry, and advances all three in [`Reactor::single_step`]:
//!
//! 1. wait for readiness, bounded by the caller, a global cap and the next
//!    delayed task;
//! 2. dispatch at most one ready socket handler, resuming the scan just after
//!    the socket serviced last time;
//! 3. service at most one pending event trigger;
//! 4. fire every delayed task that has come due.
//!
//! Callbacks receive `&mut Reactor`, so they can register sockets, schedule
//! tasks, signal triggers or even step the loop again from inside a handler.
//! Nothing here is thread-safe except [`TriggerHandle`].

use crate::condition::Condition;
use crate::delay::{DelayQueue, TaskToken};
use crate::handler::{HandlerSet, SocketNum, DEFAULT_MAX_SOCKET_NUM};
use crate::poll::{is_retryable, Multiplexer, PollMultiplexer, ReadySet};
use crate::time::{effective_wait, DEFAULT_MAX_WAIT, DEFAULT_SCHEDULER_GRANULARITY};
use crate::trigger::{TriggerError, TriggerHandle, TriggerId, TriggerRegistry};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Reactor errors
#[derive(Error, Debug)]
pub enum ReactorError {
    /// The readiness wait failed in a way that cannot be retried. The loop
    /// should not be stepped again.
    #[error("Readiness wait failed: {0}")]
    Wait(#[source] io::Error),
}

/// Reactor configuration
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Period of the internal tick task that bounds how long a step blocks
    /// when nothing else is scheduled. Zero disables the tick.
    pub max_scheduler_granularity: Duration,
    /// Upper bound on any single readiness wait
    pub max_wait: Duration,
    /// Socket descriptors at or above this value are ignored
    pub max_socket_num: SocketNum,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        ReactorConfig {
            max_scheduler_granularity: DEFAULT_SCHEDULER_GRANULARITY,
            max_wait: DEFAULT_MAX_WAIT,
            max_socket_num: DEFAULT_MAX_SOCKET_NUM,
        }
    }
}

/// What one step did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StepOutcome {
    /// Socket whose handler ran
    pub socket: Option<SocketNum>,
    /// Conditions passed to that handler
    pub conditions: Condition,
    /// Event trigger serviced
    pub trigger: Option<TriggerId>,
    /// Delayed tasks fired
    pub timers_fired: usize,
    /// The wait was interrupted and the step returned early
    pub interrupted: bool,
}

impl StepOutcome {
    /// True if no callback of any kind ran
    pub fn is_idle(&self) -> bool {
        self.socket.is_none() && self.trigger.is_none() && self.timers_fired == 0
    }
}

/// Cooperative I/O reactor
pub struct Reactor {
    multiplexer: Box<dyn Multiplexer>,
    handlers: HandlerSet<Reactor>,
    delay_queue: DelayQueue<Reactor>,
    triggers: TriggerRegistry<Reactor>,
    /// Socket serviced by the previous step, where the next scan resumes
    last_handled: Option<SocketNum>,
    interests: Vec<(SocketNum, Condition)>,
    ready: ReadySet,
    tick: Option<TaskToken>,
    config: ReactorConfig,
}

fn delay_queue_of(reactor: &mut Reactor) -> &mut DelayQueue<Reactor> {
    &mut reactor.delay_queue
}

fn triggers_of(reactor: &mut Reactor) -> &mut TriggerRegistry<Reactor> {
    &mut reactor.triggers
}

fn scheduler_tick(reactor: &mut Reactor) {
    let granularity = reactor.config.max_scheduler_granularity;
    reactor.tick = if granularity.is_zero() {
        None
    } else {
        Some(reactor.delay_queue.schedule(granularity, scheduler_tick))
    };
}

impl Reactor {
    /// Create a reactor with the default configuration on `poll(2)`
    pub fn new() -> Self {
        Self::with_config(ReactorConfig::default())
    }

    /// Create a reactor on `poll(2)`
    pub fn with_config(config: ReactorConfig) -> Self {
        Self::with_multiplexer(config, PollMultiplexer::new())
    }

    /// Create a reactor on a custom readiness backend
    pub fn with_multiplexer<M>(config: ReactorConfig, multiplexer: M) -> Self
    where
        M: Multiplexer + 'static,
    {
        let mut reactor = Reactor {
            multiplexer: Box::new(multiplexer),
            handlers: HandlerSet::with_limit(config.max_socket_num),
            delay_queue: DelayQueue::new(),
            triggers: TriggerRegistry::new(),
            last_handled: None,
            interests: Vec::new(),
            ready: ReadySet::new(),
            tick: None,
            config,
        };
        scheduler_tick(&mut reactor);
        reactor
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    // Socket handling

    /// Watch `socket` for `conditions`, replacing any previous handler
    ///
    /// An empty condition set removes the handler. Descriptors that are
    /// negative or beyond the configured limit are ignored.
    pub fn set_interest<F>(&mut self, socket: SocketNum, conditions: Condition, handler: F)
    where
        F: FnMut(&mut Reactor, Condition) + 'static,
    {
        self.handlers.set_interest(socket, conditions, handler);
    }

    /// Watch `socket` for readability
    pub fn turn_on_background_read_handling<F>(&mut self, socket: SocketNum, handler: F)
    where
        F: FnMut(&mut Reactor, Condition) + 'static,
    {
        self.set_interest(socket, Condition::READABLE, handler);
    }

    /// Stop watching `socket`
    pub fn disable_background_handling(&mut self, socket: SocketNum) {
        self.handlers.clear(socket);
    }

    /// Move the handler registered on `old` to `new`
    pub fn relocate_interest(&mut self, old: SocketNum, new: SocketNum) {
        self.handlers.relocate(old, new);
    }

    pub fn handlers(&self) -> &HandlerSet<Reactor> {
        &self.handlers
    }

    /// Socket serviced by the most recent step
    pub fn last_handled_socket(&self) -> Option<SocketNum> {
        self.last_handled
    }

    // Delayed tasks

    /// Run `task` once, after `delay`
    pub fn schedule_delayed_task<F>(&mut self, delay: Duration, task: F) -> TaskToken
    where
        F: FnOnce(&mut Reactor) + 'static,
    {
        self.delay_queue.schedule(delay, task)
    }

    /// Cancel a delayed task; a no-op once it has fired
    pub fn unschedule_delayed_task(&mut self, token: TaskToken) -> bool {
        self.delay_queue.cancel(token)
    }

    /// Replace the task identified by `token` with a new one
    pub fn reschedule_delayed_task<F>(&mut self, token: &mut TaskToken, delay: Duration, task: F)
    where
        F: FnOnce(&mut Reactor) + 'static,
    {
        self.delay_queue.reschedule(token, delay, task);
    }

    pub fn delay_queue(&self) -> &DelayQueue<Reactor> {
        &self.delay_queue
    }

    /// Token of the internal scheduler tick, if enabled
    pub fn tick_token(&self) -> Option<TaskToken> {
        self.tick
    }

    // Event triggers

    /// Bind `handler` to a free event trigger slot
    pub fn create_event_trigger<F>(&mut self, handler: F) -> Result<TriggerId, TriggerError>
    where
        F: FnMut(&mut Reactor) + 'static,
    {
        self.triggers.allocate(handler)
    }

    /// Mark a trigger pending from the loop thread
    pub fn trigger_event(&self, id: TriggerId) {
        self.triggers.signal(id);
    }

    /// Handle for signalling triggers from other threads
    pub fn trigger_handle(&self) -> TriggerHandle {
        self.triggers.handle()
    }

    pub fn triggers(&self) -> &TriggerRegistry<Reactor> {
        &self.triggers
    }

    // Loop

    /// Run one iteration of the event loop, blocking for at most `max_delay`
    ///
    /// A zero `max_delay` makes the step a non-blocking poll.
    pub fn single_step(&mut self, max_delay: Duration) -> Result<StepOutcome, ReactorError> {
        let wait = effective_wait(
            max_delay,
            self.config.max_wait,
            self.delay_queue.time_to_next_deadline(),
        );

        self.interests.clear();
        self.interests.extend(self.handlers.interests());
        self.ready.clear();

        if let Err(err) = self.multiplexer.wait(&self.interests, wait, &mut self.ready) {
            if is_retryable(&err) {
                tracing::trace!(error = %err, "readiness wait interrupted");
                return Ok(StepOutcome {
                    interrupted: true,
                    ..StepOutcome::default()
                });
            }

            let sockets: Vec<String> = self
                .interests
                .iter()
                .map(|(socket, conditions)| format!("{}({})", socket, conditions))
                .collect();
            tracing::error!(
                error = %err,
                sockets = %sockets.join(" "),
                "readiness wait failed"
            );
            return Err(ReactorError::Wait(err));
        }

        let mut outcome = StepOutcome::default();

        match self.select_handler() {
            Some((socket, matched)) => {
                // Recorded before the call so a handler that steps the loop
                // itself resumes after this socket.
                self.last_handled = Some(socket);
                if let Some(mut handler) = self.handlers.check_out(socket) {
                    tracing::trace!(socket, %matched, "dispatching socket handler");
                    handler.call(self, matched);
                    self.handlers.check_in(socket, handler);
                }
                outcome.socket = Some(socket);
                outcome.conditions = matched;
            }
            None => self.last_handled = None,
        }

        // After the socket handler, so a trigger it raised is seen this step.
        outcome.trigger = TriggerRegistry::drain_one(self, triggers_of);
        outcome.timers_fired = DelayQueue::fire_due(self, delay_queue_of);

        Ok(outcome)
    }

    /// First ready handler in round-robin order after the last one serviced
    fn select_handler(&self) -> Option<(SocketNum, Condition)> {
        let resume = self
            .last_handled
            .filter(|socket| self.handlers.contains(*socket));

        self.handlers
            .iter_from(resume)
            .find_map(|(socket, handler)| {
                let matched = handler.conditions() & self.ready.conditions(socket);
                (!matched.is_empty() && handler.has_callback()).then_some((socket, matched))
            })
    }

    /// Step the loop until `watch` becomes true
    ///
    /// `watch` is checked before every step, so it may be set by a callback
    /// or from another thread. Returns the first fatal error.
    pub fn do_event_loop(&mut self, watch: &AtomicBool) -> Result<(), ReactorError> {
        while !watch.load(Ordering::Acquire) {
            self.single_step(Duration::MAX)?;
        }
        Ok(())
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("handlers", &self.handlers)
            .field("delay_queue", &self.delay_queue)
            .field("triggers", &self.triggers)
            .field("last_handled", &self.last_handled)
            .field("config", &self.config)
            .finish()
    }
}
