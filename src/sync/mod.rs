//! Suspension-based synchronization primitives (component G).
//!
//! Every primitive here is built the same way: check whether the
//! operation can complete without blocking; if not, push the current
//! context's id onto a `VecDeque` wait queue and suspend it, then call
//! [`crate::scheduler::schedule`]. Whoever completes the dual operation
//! later pops a waiter and calls `ready()` on it. None of these types do
//! their own locking — there is only one context running at a time on
//! this OS thread, so plain `Cell`/`RefCell` suffice.

pub mod channel;
pub mod rwlock;
pub mod semaphore;
pub mod signal;

pub use channel::Channel;
pub use rwlock::RwLock;
pub use semaphore::Semaphore;
pub use signal::Signal;
