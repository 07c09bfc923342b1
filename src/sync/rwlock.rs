//! A cooperative read/write lock with writer preference: once a writer is
//! waiting, new readers queue up behind it instead of continuing to
//! acquire the lock, so a steady stream of readers cannot starve a
//! writer out indefinitely.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};

use crate::context::{Context, ContextId};
use crate::scheduler;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Holder {
    None,
    Readers(usize),
    Writer,
}

pub struct RwLock<T> {
    holder: Cell<Holder>,
    pending_writers: Cell<usize>,
    read_waiters: RefCell<VecDeque<ContextId>>,
    write_waiters: RefCell<VecDeque<ContextId>>,
    value: UnsafeCell<T>,
}

impl<T: 'static> RwLock<T> {
    pub fn new(value: T) -> Self {
        RwLock {
            holder: Cell::new(Holder::None),
            pending_writers: Cell::new(0),
            read_waiters: RefCell::new(VecDeque::new()),
            write_waiters: RefCell::new(VecDeque::new()),
            value: UnsafeCell::new(value),
        }
    }

    fn can_read_now(&self) -> bool {
        self.pending_writers.get() == 0
            && !matches!(self.holder.get(), Holder::Writer)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        loop {
            if self.can_read_now() {
                self.holder.set(match self.holder.get() {
                    Holder::Readers(n) => Holder::Readers(n + 1),
                    _ => Holder::Readers(1),
                });
                return RwLockReadGuard { lock: self };
            }
            let me = scheduler::current().id();
            self.read_waiters.borrow_mut().push_back(me);
            scheduler::with_scheduler(|s| s.set_suspended(me));
            let self_ptr: *const RwLock<T> = self;
            // SAFETY: see `Semaphore::down` — this `RwLock` outlives the
            // window in which the hook could fire.
            scheduler::suspend_with_cancel_hook(move || unsafe {
                (*self_ptr).remove_read_waiter(me);
            });
        }
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        loop {
            if matches!(self.holder.get(), Holder::None) {
                self.holder.set(Holder::Writer);
                return RwLockWriteGuard { lock: self };
            }
            let me = scheduler::current().id();
            self.pending_writers.set(self.pending_writers.get() + 1);
            self.write_waiters.borrow_mut().push_back(me);
            scheduler::with_scheduler(|s| s.set_suspended(me));
            let self_ptr: *const RwLock<T> = self;
            scheduler::suspend_with_cancel_hook(move || unsafe {
                (*self_ptr).remove_write_waiter(me);
            });
        }
    }

    /// Remove `id` from the read/write wait-queue it is still sitting
    /// in, if any. Used by the cancellation hooks registered in
    /// `read`/`write` so a cancelled waiter never keeps a writer pending
    /// or a reader queued behind nothing.
    fn remove_read_waiter(&self, id: ContextId) {
        let mut waiters = self.read_waiters.borrow_mut();
        if let Some(pos) = waiters.iter().position(|&w| w == id) {
            waiters.remove(pos);
        }
    }

    fn remove_write_waiter(&self, id: ContextId) {
        let mut waiters = self.write_waiters.borrow_mut();
        if let Some(pos) = waiters.iter().position(|&w| w == id) {
            waiters.remove(pos);
            self.pending_writers.set(self.pending_writers.get() - 1);
        }
    }

    fn release_read(&self) {
        self.holder.set(match self.holder.get() {
            Holder::Readers(n) if n > 1 => Holder::Readers(n - 1),
            _ => Holder::None,
        });
        self.wake_next();
    }

    fn release_write(&self) {
        self.holder.set(Holder::None);
        self.wake_next();
    }

    /// Writer preference: prefer waking a waiting writer; only wake
    /// readers once no writer is queued.
    fn wake_next(&self) {
        if !matches!(self.holder.get(), Holder::None) {
            return;
        }
        if let Some(writer) = self.write_waiters.borrow_mut().pop_front() {
            self.pending_writers.set(self.pending_writers.get() - 1);
            let _ = Context(writer).ready();
            return;
        }
        let mut readers = self.read_waiters.borrow_mut();
        for reader in readers.drain(..) {
            let _ = Context(reader).ready();
        }
    }
}

pub struct RwLockReadGuard<'a, T: 'static> {
    lock: &'a RwLock<T>,
}

impl<T: 'static> Deref for RwLockReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: 'static> Drop for RwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

pub struct RwLockWriteGuard<'a, T: 'static> {
    lock: &'a RwLock<T>,
}

impl<T: 'static> Deref for RwLockWriteGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T: 'static> DerefMut for RwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<T: 'static> Drop for RwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{cede, terminate};
    use std::rc::Rc;

    #[test]
    fn concurrent_readers_are_allowed() {
        let lock = Rc::new(RwLock::new(0i64));
        let a = {
            let lock = lock.clone();
            Context::new(move |_| {
                let _g = lock.read();
                cede();
                terminate(Vec::new())
            })
        };
        let b = {
            let lock = lock.clone();
            Context::new(move |_| {
                let _g = lock.read();
                terminate(Vec::new())
            })
        };
        a.ready().unwrap();
        b.ready().unwrap();
        cede();
        a.join();
        b.join();
    }

    #[test]
    fn a_pending_writer_blocks_new_readers() {
        let lock = Rc::new(RwLock::new(0i64));
        let log = Rc::new(std::cell::RefCell::new(Vec::<&'static str>::new()));

        let first_read = lock.read();

        let writer = {
            let lock = lock.clone();
            let log = log.clone();
            Context::new(move |_| {
                let _g = lock.write();
                log.borrow_mut().push("writer");
                terminate(Vec::new())
            })
        };
        writer.ready().unwrap();
        cede(); // writer blocks, registers as pending

        let reader = {
            let lock = lock.clone();
            let log = log.clone();
            Context::new(move |_| {
                let _g = lock.read();
                log.borrow_mut().push("reader");
                terminate(Vec::new())
            })
        };
        reader.ready().unwrap();
        cede(); // reader must also block: a writer is pending

        drop(first_read);
        writer.join();
        reader.join();

        assert_eq!(*log.borrow(), vec!["writer", "reader"]);
    }

    #[test]
    fn cancelling_a_pending_writer_stops_blocking_new_readers() {
        let lock = Rc::new(RwLock::new(0i64));
        let log = Rc::new(std::cell::RefCell::new(Vec::<&'static str>::new()));

        let first_read = lock.read();

        let doomed_writer = {
            let lock = lock.clone();
            Context::new(move |_| {
                let _g = lock.write();
                unreachable!("cancelled before ever acquiring the lock");
            })
        };
        doomed_writer.ready().unwrap();
        cede(); // writer blocks behind the held read guard

        doomed_writer.cancel(Vec::new());
        drop(first_read);

        let reader = {
            let lock = lock.clone();
            let log = log.clone();
            Context::new(move |_| {
                let _g = lock.read();
                log.borrow_mut().push("reader");
                terminate(Vec::new())
            })
        };
        reader.ready().unwrap();
        reader.join();

        assert_eq!(*log.borrow(), vec!["reader"]);
    }
}
