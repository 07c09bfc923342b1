//! A signal with a one-slot pending flag: `wait` blocks until a
//! subsequent `send`, unless a `send` already arrived with nobody
//! waiting, in which case that one pending signal is consumed
//! immediately instead of suspending. `broadcast` never sets the
//! pending flag — it only wakes whoever is waiting *right now*.
//! Contrast with [`Semaphore`](super::Semaphore), whose permits
//! accumulate past one.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use crate::context::{Context, ContextId};
use crate::scheduler;

#[derive(Default)]
pub struct Signal {
    waiters: RefCell<VecDeque<ContextId>>,
    pending: Cell<bool>,
}

impl Signal {
    pub fn new() -> Self {
        Signal {
            waiters: RefCell::new(VecDeque::new()),
            pending: Cell::new(false),
        }
    }

    /// If a `send` already arrived with no one waiting, consume it and
    /// return immediately. Otherwise block until the next `send`.
    pub fn wait(&self) {
        if self.pending.take() {
            return;
        }
        let me = scheduler::current().id();
        self.waiters.borrow_mut().push_back(me);
        scheduler::with_scheduler(|s| s.set_suspended(me));
        let self_ptr: *const Signal = self;
        // SAFETY: see `Semaphore::down` — this `Signal` outlives the
        // window in which the hook could fire.
        scheduler::suspend_with_cancel_hook(move || unsafe {
            (*self_ptr).remove_waiter(me);
        });
    }

    /// Remove `id` from the wait-queue if it is still sitting in it,
    /// used by the cancellation hook registered in `wait`.
    fn remove_waiter(&self, id: ContextId) {
        let mut waiters = self.waiters.borrow_mut();
        if let Some(pos) = waiters.iter().position(|&w| w == id) {
            waiters.remove(pos);
        }
    }

    /// Wake exactly one waiter if any are blocked; otherwise set the
    /// pending flag so the next `wait()` returns immediately instead of
    /// suspending.
    pub fn send(&self) -> bool {
        loop {
            let id = self.waiters.borrow_mut().pop_front();
            match id {
                // A cancelled waiter is pulled from `waiters` by its own
                // hook before it could ever be popped here; fall through
                // to the next one rather than drop the wakeup.
                Some(id) if Context(id).ready().is_ok() => return true,
                Some(_) => continue,
                None => {
                    self.pending.set(true);
                    return false;
                }
            }
        }
    }

    /// Wake every current waiter.
    pub fn broadcast(&self) -> usize {
        let waiters: Vec<ContextId> = self.waiters.borrow_mut().drain(..).collect();
        let n = waiters.len();
        for id in waiters {
            let _ = Context(id).ready();
        }
        n
    }

    pub fn waiting_count(&self) -> usize {
        self.waiters.borrow().len()
    }
}
