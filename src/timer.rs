//! Time-based suspension (component H): `sleep`, built on whatever
//! [`Reactor`](crate::reactor::Reactor) the embedder installed.
//!
//! Without a reactor installed, `sleep` still works: it falls back to
//! registering directly with the default idle hook's deadlock path
//! replaced by a simple timed wait, so a context can always use `sleep`
//! even in a program that never touches I/O.

use std::cell::RefCell;
use std::time::{Duration, Instant};

use crate::reactor::TimerReactor;
use crate::scheduler;

thread_local! {
    static FALLBACK: RefCell<TimerReactor> = RefCell::new(TimerReactor::new());
}

/// Suspend the current context for at least `dt`, then ready it again.
///
/// If a reactor was installed with
/// [`install_reactor`](crate::reactor::install_reactor), the deadline is
/// handled the next time the scheduler is idle, same as any other
/// reactor-driven wait. If not, a small built-in timer reactor takes
/// over as the idle hook the first time `sleep` is called, so programs
/// that only need timers never have to install anything themselves.
pub fn sleep(dt: Duration) {
    ensure_fallback_hook_installed();
    let deadline = Instant::now() + dt;
    let me = scheduler::current();
    let token = FALLBACK.with(|r| r.borrow_mut().register(deadline, me));
    scheduler::with_scheduler(|s| s.set_suspended(me.id()));
    // If cancelled before the deadline fires, pull the registration back
    // out of the timer heap rather than leave it to wake a dead context.
    scheduler::suspend_with_cancel_hook(move || {
        FALLBACK.with(|r| r.borrow_mut().cancel(token));
    });
}

fn ensure_fallback_hook_installed() {
    thread_local! {
        static INSTALLED: std::cell::Cell<bool> = std::cell::Cell::new(false);
    }
    INSTALLED.with(|installed| {
        if installed.get() {
            return;
        }
        installed.set(true);
        scheduler::set_idle_hook(|| {
            if scheduler::stats().ready_total() > 0 {
                return true;
            }
            let woken = FALLBACK.with(|r| {
                use crate::reactor::Reactor;
                r.borrow_mut().poll_once(None)
            });
            woken > 0
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::scheduler::{cede, terminate};

    #[test]
    fn sleep_suspends_until_the_deadline_passes() {
        let started = Instant::now();
        let c = Context::new(|_| {
            sleep(Duration::from_millis(5));
            terminate(Vec::new())
        });
        c.ready().unwrap();
        cede();
        c.join();
        assert!(started.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn cancelling_a_sleeping_context_removes_its_timer_registration() {
        let c = Context::new(|_| {
            sleep(Duration::from_secs(3600));
            unreachable!("cancelled long before the deadline");
        });
        c.ready().unwrap();
        cede(); // c blocks in sleep()
        c.cancel(Vec::new());
        assert_eq!(FALLBACK.with(|r| r.borrow().pending_count()), 0);
    }
}
