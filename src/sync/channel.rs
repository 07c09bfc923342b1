//! A bounded channel with direct hand-off: a `put` against a waiting
//! `get` transfers the value straight across without ever touching the
//! buffer, the same way an unbuffered channel would, while a channel
//! created with nonzero capacity also tolerates bursts up to that
//! capacity before a putter has to wait.

use std::cell::RefCell;
use std::collections::VecDeque;

use crate::context::{Context, ContextId};
use crate::error::RuntimeError;
use crate::scheduler;
use crate::value::Value;

struct Inner {
    capacity: usize,
    buffer: VecDeque<Value>,
    putters: VecDeque<ContextId>,
    getters: VecDeque<ContextId>,
    closed: bool,
}

/// A bounded FIFO channel of [`Value`]s.
pub struct Channel {
    inner: RefCell<Inner>,
}

impl Channel {
    pub fn new(capacity: usize) -> Self {
        Channel {
            inner: RefCell::new(Inner {
                capacity,
                buffer: VecDeque::new(),
                putters: VecDeque::new(),
                getters: VecDeque::new(),
                closed: false,
            }),
        }
    }

    /// Send `value`, blocking if the buffer is full and no getter is
    /// waiting to take it directly.
    pub fn put(&self, value: Value) -> Result<(), RuntimeError> {
        loop {
            let me = {
                let mut inner = self.inner.borrow_mut();
                if inner.closed {
                    return Err(RuntimeError::ChannelClosed);
                }
                if let Some(getter) = inner.getters.pop_front() {
                    inner.buffer.push_back(value);
                    drop(inner);
                    let _ = Context(getter).ready();
                    return Ok(());
                }
                if inner.buffer.len() < inner.capacity {
                    inner.buffer.push_back(value);
                    return Ok(());
                }
                let me = scheduler::current().id();
                inner.putters.push_back(me);
                scheduler::with_scheduler(|s| s.set_suspended(me));
                me
            };
            // Neither success branch above was taken, so `value` was
            // never moved: it is still ours to retry with once we wake.
            let self_ptr: *const Channel = self;
            // SAFETY: see `Semaphore::down` — this `Channel` outlives the
            // window in which the hook could fire.
            scheduler::suspend_with_cancel_hook(move || unsafe {
                (*self_ptr).remove_putter(me);
            });
        }
    }

    /// Receive a value, blocking until one is available or the channel is
    /// closed with nothing left buffered.
    pub fn get(&self) -> Result<Value, RuntimeError> {
        loop {
            let me = {
                let mut inner = self.inner.borrow_mut();
                if let Some(value) = inner.buffer.pop_front() {
                    if let Some(putter) = inner.putters.pop_front() {
                        drop(inner);
                        let _ = Context(putter).ready();
                    }
                    return Ok(value);
                }
                if inner.closed {
                    return Err(RuntimeError::ChannelClosed);
                }
                let me = scheduler::current().id();
                inner.getters.push_back(me);
                scheduler::with_scheduler(|s| s.set_suspended(me));
                me
            };
            let self_ptr: *const Channel = self;
            scheduler::suspend_with_cancel_hook(move || unsafe {
                (*self_ptr).remove_getter(me);
            });
        }
    }

    /// Remove `id` from the putter/getter queue it is still sitting in,
    /// if any. Used by the cancellation hooks registered in `put`/`get`
    /// so a cancelled waiter's slot in the direct hand-off never eats a
    /// value or wake-up meant for the next live one.
    fn remove_putter(&self, id: ContextId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(pos) = inner.putters.iter().position(|&w| w == id) {
            inner.putters.remove(pos);
        }
    }

    fn remove_getter(&self, id: ContextId) {
        let mut inner = self.inner.borrow_mut();
        if let Some(pos) = inner.getters.iter().position(|&w| w == id) {
            inner.getters.remove(pos);
        }
    }

    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.closed = true;
        let mut waiters: Vec<ContextId> = inner.putters.drain(..).collect();
        waiters.extend(inner.getters.drain(..));
        drop(inner);
        for w in waiters {
            let _ = Context(w).ready();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context as Ctx;
    use crate::scheduler::{cede, terminate};
    use std::rc::Rc;

    #[test]
    fn buffered_put_does_not_block_under_capacity() {
        let ch = Channel::new(2);
        ch.put(Value::Int(1)).unwrap();
        ch.put(Value::Int(2)).unwrap();
        assert_eq!(ch.len(), 2);
        assert_eq!(ch.get().unwrap(), Value::Int(1));
        assert_eq!(ch.get().unwrap(), Value::Int(2));
    }

    #[test]
    fn get_blocks_until_a_put_arrives_direct_hand_off() {
        let ch = Rc::new(Channel::new(0));
        let log = Rc::new(std::cell::RefCell::new(Vec::<&'static str>::new()));

        let ch2 = ch.clone();
        let log2 = log.clone();
        let getter = Ctx::new(move |_| {
            let v = ch2.get().unwrap();
            log2.borrow_mut().push(match v {
                Value::Int(1) => "got-1",
                _ => "got-other",
            });
            terminate(Vec::new())
        });
        getter.ready().unwrap();
        cede(); // getter blocks: nothing buffered, zero capacity

        log.borrow_mut().push("about to put");
        ch.put(Value::Int(1)).unwrap();
        getter.join();

        assert_eq!(*log.borrow(), vec!["about to put", "got-1"]);
    }

    #[test]
    fn close_wakes_blocked_getters_with_an_error() {
        let ch = Rc::new(Channel::new(0));
        let ch2 = ch.clone();
        let getter = Ctx::new(move |_| match ch2.get() {
            Err(RuntimeError::ChannelClosed) => crate::values!["closed"],
            _ => crate::values!["unexpected"],
        });
        getter.ready().unwrap();
        cede();
        ch.close();
        assert_eq!(getter.join(), crate::values!["closed"]);
    }

    #[test]
    fn cancelling_a_blocked_getter_leaves_the_value_for_the_next_one() {
        let ch = Rc::new(Channel::new(0));
        let log = Rc::new(std::cell::RefCell::new(Vec::<&'static str>::new()));

        let doomed = {
            let ch = ch.clone();
            Ctx::new(move |_| {
                ch.get().unwrap();
                unreachable!("cancelled before any put reaches this getter");
            })
        };
        let survivor = {
            let ch = ch.clone();
            let log = log.clone();
            Ctx::new(move |_| {
                let v = ch.get().unwrap();
                if v == Value::Int(7) {
                    log.borrow_mut().push("got-7");
                }
                terminate(Vec::new())
            })
        };
        doomed.ready().unwrap();
        survivor.ready().unwrap();
        cede(); // both block: zero capacity, nothing buffered

        doomed.cancel(Vec::new());
        ch.put(Value::Int(7)).unwrap();
        survivor.join();

        assert_eq!(*log.borrow(), vec!["got-7"]);
    }
}
