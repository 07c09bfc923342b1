//! The event-loop bridge (component E).
//!
//! A cooperative runtime with no I/O integration deadlocks the instant
//! every context is waiting on the outside world: nothing is `READY`, so
//! the default idle hook fires and exits. [`Reactor`] is the seam an
//! embedder plugs an event loop into: install one with
//! [`install_reactor`] and the idle hook polls it instead of giving up.
//!
//! This module does not ship a production-grade poller (that needs a
//! real `epoll`/`kqueue`/IOCP binding, which is out of scope for a
//! cooperative-scheduling crate to vendor). It ships the trait, the glue
//! that wires an implementation into the scheduler's idle hook, and a
//! minimal reference implementation driven entirely off registered
//! wake-up times, useful for tests and for embedders who only need timer
//! wheel semantics.

use std::cell::RefCell;
use std::collections::BinaryHeap;
use std::cmp::Reverse;
use std::rc::Rc;
use std::time::{Duration, Instant};

use log::trace;

use crate::context::Context;
use crate::scheduler;

/// Bridges the cooperative scheduler to an external source of readiness
/// (sockets, timers, signals). `poll_once` is called from the idle hook
/// when nothing is runnable; it should block until either `deadline`
/// passes or some previously-registered interest fires, readying the
/// waiting contexts itself, and return how many it readied.
///
/// Implementations must never call back into the scheduler except via
/// `Context::ready`/`ready()` — nothing in this trait is expected to run
/// with a scheduler borrow held.
pub trait Reactor {
    /// Block for at most until `deadline` (or indefinitely if `None`),
    /// then ready every context whose interest has fired. Returns the
    /// number of contexts readied.
    fn poll_once(&mut self, deadline: Option<Instant>) -> usize;
}

/// Hands `reactor` to the scheduler's idle hook: whenever nothing is
/// `READY`, the reactor is polled instead of the default
/// deadlock-and-exit behavior.
///
/// The idle hook first checks whether anything is already ready — an
/// event loop that queued wake-ups between turns should be drained
/// before blocking, not after — and only calls `poll_once` when the
/// check comes back empty.
pub fn install_reactor<R: Reactor + 'static>(reactor: R) {
    let reactor = Rc::new(RefCell::new(reactor));
    scheduler::set_idle_hook(move || {
        if scheduler::stats().ready_total() > 0 {
            return true;
        }
        let woke = reactor.borrow_mut().poll_once(None);
        trace!("reactor woke {woke} context(s)");
        woke > 0
    });
}

/// A deadline-only reactor: contexts register a wake-up time via
/// [`TimerReactor::register`] and are readied once it passes. Good
/// enough to drive [`crate::timer::sleep`] without any real I/O source;
/// an embedder with sockets to watch composes this with its own
/// `Reactor` rather than using this one directly.
pub struct TimerReactor {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    waiters: std::collections::HashMap<u64, Context>,
    next_token: u64,
}

impl Default for TimerReactor {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerReactor {
    pub fn new() -> Self {
        TimerReactor {
            heap: BinaryHeap::new(),
            waiters: std::collections::HashMap::new(),
            next_token: 0,
        }
    }

    /// Register `ctx` to be readied at or after `deadline`. Returns a
    /// token that can be used to cancel the registration before it
    /// fires.
    pub fn register(&mut self, deadline: Instant, ctx: Context) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.heap.push(Reverse((deadline, token)));
        self.waiters.insert(token, ctx);
        token
    }

    pub fn cancel(&mut self, token: u64) {
        self.waiters.remove(&token);
    }

    /// How many registrations are still waiting on their deadline. A
    /// stale `heap` entry left behind by `cancel` does not count: it has
    /// no matching `waiters` entry and is discarded the next time
    /// `poll_once` pops past it.
    pub(crate) fn pending_count(&self) -> usize {
        self.waiters.len()
    }
}

impl Reactor for TimerReactor {
    fn poll_once(&mut self, deadline: Option<Instant>) -> usize {
        let Some(Reverse((next_fire, _))) = self.heap.peek().copied() else {
            // Nothing registered at all: there is no event source to
            // wait on, so honor the caller's deadline (or sleep briefly
            // to avoid busy-spinning a poll loop with no work).
            std::thread::sleep(
                deadline
                    .map(|d| d.saturating_duration_since(Instant::now()))
                    .unwrap_or(Duration::from_millis(10)),
            );
            return 0;
        };

        let now = Instant::now();
        if next_fire > now {
            let wait = next_fire - now;
            let wait = deadline
                .map(|d| wait.min(d.saturating_duration_since(now)))
                .unwrap_or(wait);
            std::thread::sleep(wait);
        }

        let mut woken = 0;
        let now = Instant::now();
        while let Some(Reverse((fire, token))) = self.heap.peek().copied() {
            if fire > now {
                break;
            }
            self.heap.pop();
            if let Some(ctx) = self.waiters.remove(&token) {
                let _ = ctx.ready();
                woken += 1;
            }
        }
        woken
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_reactor_wakes_registered_context_after_deadline() {
        let mut reactor = TimerReactor::new();
        let ctx = Context::new(|_| scheduler::terminate(Vec::new()));
        reactor.register(Instant::now(), ctx);
        let woken = reactor.poll_once(None);
        assert_eq!(woken, 1);
        assert_eq!(ctx.status(), crate::context::Status::Ready);
        ctx.join();
    }

    #[test]
    fn cancel_prevents_a_wake_up() {
        let mut reactor = TimerReactor::new();
        let ctx = Context::new(|_| scheduler::terminate(Vec::new()));
        let token = reactor.register(Instant::now() + Duration::from_secs(3600), ctx);
        reactor.cancel(token);
        assert!(reactor.waiters.is_empty());
        ctx.cancel(Vec::new());
    }
}
