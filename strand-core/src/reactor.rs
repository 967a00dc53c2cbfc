//! A single-threaded reactor implementing [`EventLoop`].
//!
//! One turn runs every next-tick callback that was queued before the turn
//! started, then every timer whose deadline has passed, earliest first (ties
//! in submission order). When nothing is runnable the clock is advanced to the
//! next deadline: the virtual clock jumps, the system clock sleeps.
//!
//! # Examples
//!
//! ```rust
//! use strand_core::event_loop::EventLoop;
//! use strand_core::reactor::{ClockMode, Reactor};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use std::time::Duration;
//!
//! let reactor = Reactor::new(ClockMode::Virtual);
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let l = log.clone();
//! reactor.schedule_after(Duration::from_secs(5), Box::new(move || l.borrow_mut().push("timer")));
//! let l = log.clone();
//! reactor.next_tick(Box::new(move || l.borrow_mut().push("tick")));
//!
//! reactor.run();
//! assert_eq!(*log.borrow(), vec!["tick", "timer"]);
//! assert_eq!(reactor.now(), Duration::from_secs(5));
//! ```

use crate::event_loop::{Callback, EventLoop, TimerHandle};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::trace;

/// How the reactor measures time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Wall-clock monotonic time; idle turns sleep the thread.
    #[default]
    System,
    /// Simulated time that jumps straight to the next deadline.
    Virtual,
}

enum Clock {
    System(Instant),
    Virtual(Cell<Duration>),
}

impl Clock {
    fn new(mode: ClockMode) -> Self {
        match mode {
            ClockMode::System => Self::System(Instant::now()),
            ClockMode::Virtual => Self::Virtual(Cell::new(Duration::ZERO)),
        }
    }

    fn now(&self) -> Duration {
        match self {
            Self::System(origin) => origin.elapsed(),
            Self::Virtual(now) => now.get(),
        }
    }

    fn advance_to(&self, deadline: Duration) {
        match self {
            Self::System(origin) => {
                let remaining = deadline.saturating_sub(origin.elapsed());
                if !remaining.is_zero() {
                    std::thread::sleep(remaining);
                }
            }
            Self::Virtual(now) => {
                if deadline > now.get() {
                    now.set(deadline);
                }
            }
        }
    }
}

/// Why [`Reactor::run_until`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The caller's condition became true.
    Done,
    /// Nothing was left to run.
    Idle,
    /// [`Reactor::stop`] was called.
    Stopped,
    /// The configured turn budget ran out.
    BudgetExhausted,
}

#[derive(Default)]
struct ReactorState {
    ticks: VecDeque<Callback>,
    timers: BTreeMap<(Duration, u64), Callback>,
    deadlines: HashMap<u64, Duration>,
    next_timer: u64,
    stop_requested: bool,
}

pub struct Reactor {
    clock: Clock,
    state: RefCell<ReactorState>,
    running: Cell<bool>,
    turns: Cell<u64>,
    turn_budget: Option<u64>,
}

impl Reactor {
    pub fn new(mode: ClockMode) -> Self {
        Self {
            clock: Clock::new(mode),
            state: RefCell::new(ReactorState::default()),
            running: Cell::new(false),
            turns: Cell::new(0),
            turn_budget: None,
        }
    }

    /// Limits the number of turns a single `run`/`run_until` call may take.
    pub fn with_turn_budget(mut self, budget: Option<u64>) -> Self {
        self.turn_budget = budget;
        self
    }

    pub fn turn_budget(&self) -> Option<u64> {
        self.turn_budget
    }

    /// Total turns taken so far.
    pub fn turns(&self) -> u64 {
        self.turns.get()
    }

    /// Number of queued next-tick callbacks and pending timers.
    pub fn pending(&self) -> usize {
        let state = self.state.borrow();
        state.ticks.len() + state.timers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Asks a running loop to return after the current turn.
    pub fn stop(&self) {
        self.state.borrow_mut().stop_requested = true;
    }

    /// Runs a single turn. Returns false if there was nothing to do.
    pub fn turn(&self) -> bool {
        self.turns.set(self.turns.get() + 1);

        let ticks = std::mem::take(&mut self.state.borrow_mut().ticks);
        let ran_ticks = !ticks.is_empty();
        for callback in ticks {
            callback();
        }

        let now = self.clock.now();
        let mut fired = false;
        while let Some(callback) = self.take_due_timer(now) {
            fired = true;
            callback();
        }

        if ran_ticks || fired {
            return true;
        }

        let next_deadline = {
            let state = self.state.borrow();
            if !state.ticks.is_empty() {
                return true;
            }
            state.timers.keys().next().map(|(deadline, _)| *deadline)
        };

        match next_deadline {
            Some(deadline) => {
                trace!(?deadline, "reactor idle, advancing clock");
                self.clock.advance_to(deadline);
                true
            }
            None => false,
        }
    }

    /// Runs `f` with the reactor reporting itself as running, as if `f` were
    /// called from inside a turn.
    pub fn run_in_turn<R>(&self, f: impl FnOnce() -> R) -> R {
        let was_running = self.running.replace(true);
        let result = f();
        self.running.set(was_running);
        result
    }

    /// Runs turns until nothing is left, the loop is stopped or the budget runs out.
    pub fn run(&self) -> RunOutcome {
        self.run_until(|| false)
    }

    /// Runs turns until `done` returns true.
    pub fn run_until<F>(&self, mut done: F) -> RunOutcome
    where
        F: FnMut() -> bool,
    {
        let was_running = self.running.replace(true);
        let started = self.turns.get();

        let outcome = loop {
            if done() {
                break RunOutcome::Done;
            }
            if std::mem::take(&mut self.state.borrow_mut().stop_requested) {
                break RunOutcome::Stopped;
            }
            if let Some(budget) = self.turn_budget {
                if self.turns.get() - started >= budget {
                    break RunOutcome::BudgetExhausted;
                }
            }
            if !self.turn() {
                break if done() {
                    RunOutcome::Done
                } else {
                    RunOutcome::Idle
                };
            }
        };

        self.running.set(was_running);
        outcome
    }

    fn take_due_timer(&self, now: Duration) -> Option<Callback> {
        let mut state = self.state.borrow_mut();
        let key = *state.timers.keys().next()?;
        if key.0 > now {
            return None;
        }
        state.deadlines.remove(&key.1);
        state.timers.remove(&key)
    }
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new(ClockMode::default())
    }
}

impl EventLoop for Reactor {
    fn next_tick(&self, callback: Callback) {
        self.state.borrow_mut().ticks.push_back(callback);
    }

    fn schedule_after(&self, delay: Duration, callback: Callback) -> TimerHandle {
        let deadline = self.clock.now() + delay;
        let mut state = self.state.borrow_mut();
        let id = state.next_timer;
        state.next_timer += 1;
        state.timers.insert((deadline, id), callback);
        state.deadlines.insert(id, deadline);
        TimerHandle::new(id)
    }

    fn cancel(&self, timer: TimerHandle) -> bool {
        let mut state = self.state.borrow_mut();
        match state.deadlines.remove(&timer.raw()) {
            Some(deadline) => state.timers.remove(&(deadline, timer.raw())).is_some(),
            None => false,
        }
    }

    fn is_running(&self) -> bool {
        self.running.get()
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("now", &self.clock.now())
            .field("pending", &self.pending())
            .field("running", &self.running.get())
            .finish_non_exhaustive()
    }
}
