//! A counting semaphore with strict FIFO wake order.

use std::cell::Cell;
use std::collections::VecDeque;

use crate::context::ContextId;
use crate::scheduler;

/// A counting semaphore. `down` blocks while the count is zero; `up`
/// increments it and, if anyone is waiting, hands the permit straight to
/// the longest-waiting context rather than incrementing the visible
/// count — this is what gives `down`/`up` strict FIFO fairness instead
/// of letting a context that calls `down` first-after-an-`up` cut the
/// queue.
pub struct Semaphore {
    count: Cell<i64>,
    waiters: std::cell::RefCell<VecDeque<ContextId>>,
}

impl Semaphore {
    pub fn new(initial: i64) -> Self {
        Semaphore {
            count: Cell::new(initial),
            waiters: std::cell::RefCell::new(VecDeque::new()),
        }
    }

    /// Acquire a permit, blocking until one is available.
    pub fn down(&self) {
        let me = {
            let mut waiters = self.waiters.borrow_mut();
            if self.count.get() > 0 && waiters.is_empty() {
                self.count.set(self.count.get() - 1);
                None
            } else {
                let me = scheduler::current().id();
                waiters.push_back(me);
                scheduler::with_scheduler(|s| s.set_suspended(me));
                Some(me)
            }
        };
        if let Some(me) = me {
            let self_ptr: *const Semaphore = self;
            // SAFETY: a waiter's stack stays parked, and this `Semaphore`
            // is not dropped, for as long as the hook could possibly run —
            // between registering it here and `suspend_with_cancel_hook`
            // clearing it below.
            scheduler::suspend_with_cancel_hook(move || unsafe {
                (*self_ptr).remove_waiter(me);
            });
        }
    }

    /// Remove `id` from the wait-queue if it is still sitting in it. Used
    /// by the cancellation hook registered in `down`, so a cancelled
    /// waiter never receives a permit meant for the next live one.
    fn remove_waiter(&self, id: ContextId) {
        let mut waiters = self.waiters.borrow_mut();
        if let Some(pos) = waiters.iter().position(|&w| w == id) {
            waiters.remove(pos);
        }
    }

    /// Acquire a permit only if one is immediately available, without
    /// blocking.
    pub fn try_down(&self) -> bool {
        let waiters = self.waiters.borrow();
        if self.count.get() > 0 && waiters.is_empty() {
            self.count.set(self.count.get() - 1);
            true
        } else {
            false
        }
    }

    /// Release a permit. If a context is waiting, it is handed the
    /// permit directly (readied) instead of the count being incremented,
    /// preserving FIFO order across interleaved `down`/`up` calls.
    pub fn up(&self) {
        loop {
            let waiter = self.waiters.borrow_mut().pop_front();
            match waiter {
                Some(waiter) => {
                    // A cancelled waiter is pulled out of `waiters` by its
                    // own cancellation hook before it can ever be popped
                    // here; this `ready()` failing would mean that hook
                    // was skipped, not that the permit should be dropped
                    // on the floor, so fall through to the next waiter.
                    if crate::context::Context(waiter).ready().is_ok() {
                        return;
                    }
                }
                None => {
                    self.count.set(self.count.get() + 1);
                    return;
                }
            }
        }
    }

    pub fn count(&self) -> i64 {
        self.count.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::scheduler::{cede, terminate};
    use std::cell::RefCell as StdRefCell;
    use std::rc::Rc;

    #[test]
    fn down_blocks_until_a_matching_up() {
        let sem = Rc::new(Semaphore::new(0));
        let log = Rc::new(StdRefCell::new(Vec::<&'static str>::new()));

        let sem2 = sem.clone();
        let log2 = log.clone();
        let waiter = Context::new(move |_| {
            sem2.down();
            log2.borrow_mut().push("acquired");
            terminate(Vec::new())
        });
        waiter.ready().unwrap();
        cede(); // let it block on down()

        log.borrow_mut().push("about to release");
        sem.up();
        waiter.join();

        assert_eq!(*log.borrow(), vec!["about to release", "acquired"]);
    }

    #[test]
    fn try_down_does_not_block() {
        let sem = Semaphore::new(1);
        assert!(sem.try_down());
        assert!(!sem.try_down());
        sem.up();
        assert!(sem.try_down());
    }

    #[test]
    fn waiters_are_served_in_fifo_order() {
        let sem = Rc::new(Semaphore::new(0));
        let log = Rc::new(StdRefCell::new(Vec::<i64>::new()));

        let contexts: Vec<_> = (0..3i64)
            .map(|i| {
                let sem = sem.clone();
                let log = log.clone();
                let c = Context::new(move |_| {
                    sem.down();
                    log.borrow_mut().push(i);
                    terminate(Vec::new())
                });
                c.ready().unwrap();
                c
            })
            .collect();

        cede(); // let all three block
        sem.up();
        sem.up();
        sem.up();
        for c in &contexts {
            c.join();
        }

        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn cancelling_a_waiter_does_not_strand_the_permit() {
        let sem = Rc::new(Semaphore::new(0));
        let log = Rc::new(StdRefCell::new(Vec::<&'static str>::new()));

        let doomed = {
            let sem = sem.clone();
            Context::new(move |_| {
                sem.down();
                unreachable!("cancelled before a permit ever reaches this waiter");
            })
        };
        let survivor = {
            let sem = sem.clone();
            let log = log.clone();
            Context::new(move |_| {
                sem.down();
                log.borrow_mut().push("acquired");
                terminate(Vec::new())
            })
        };
        doomed.ready().unwrap();
        survivor.ready().unwrap();
        cede(); // both block, in FIFO order: doomed then survivor

        doomed.cancel(Vec::new());
        sem.up();
        survivor.join();

        assert_eq!(*log.borrow(), vec!["acquired"]);
        assert_eq!(sem.count(), 0);
    }
}
